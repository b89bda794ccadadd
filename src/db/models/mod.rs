//
// Copyright (c) 2020-2022 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

pub mod domain;

mod checkpoint;
pub use checkpoint::*;

mod integration;
pub use integration::*;

mod job_schedule;
pub use job_schedule::*;

mod raw_extraction;
pub use raw_extraction::*;

mod tenant;
pub use tenant::*;

mod vector_bridge;
pub use vector_bridge::*;

mod vectorization_queue;
pub use vectorization_queue::*;
