//
// Copyright (c) 2020-2022 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

use serde::Deserialize;
use serde::Serialize;

use crate::status::StatusDocument;

/// The typed events the publisher emits on each status transition.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProgressEvent {
    Progress { percentage: u8, step: String },
    Exception { level: ExceptionLevel, message: String, details: Option<String> },
    Status { document: StatusDocument },
    Completion { succeeded: u64, failed: u64 },
    Pong,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ExceptionLevel {
    Warning,
    Error,
}

/// The latest `progress` event for one `(tenant, job)` subscription key, retained
/// in-process so a late subscriber gets an immediate snapshot instead of silence until
/// the next publish.
#[derive(Clone, Debug)]
pub struct ProgressSnapshot {
    pub percentage: u8,
    pub step: String,
}
