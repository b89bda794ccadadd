//
// Copyright (c) 2020-2022 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

//! The status state machine: the canonical per-job document and the seven
//! transition rules the orchestrator applies to it.

pub mod document;
pub mod transitions;

pub use document::OverallState;
pub use document::StageState;
pub use document::StatusDocument;
pub use document::StepState;
