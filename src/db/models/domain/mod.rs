//
// Copyright (c) 2020-2022 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

//! The relational model extraction and transform write into: the tables
//! queried by downstream analytics and by the embedding-text assembly step, as
//! distinct from the ETL plumbing tables in the parent module.

pub mod project;
pub mod repository;
pub mod work_item;

pub use project::Project;
pub use repository::Repository;
pub use work_item::WorkItem;
