//
// Copyright (c) 2020-2022 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

//! This module contains default functions that are called by serde when deserializing the
//! configuration and having to use default values.

use std::collections::BTreeMap;

/// The default number of retries the bus allows before dead-lettering a message.
pub fn default_max_delivery_attempts() -> u16 {
    5
}

/// The default database connection timeout, in seconds.
pub fn default_database_connection_timeout() -> u16 {
    30
}

/// The default number of idle database connections kept open per r2d2 pool.
pub fn default_database_pool_size() -> u32 {
    10
}

/// The default crash-recovery policy applied to schedules left `running` at process
/// start: reset to idle rather than failed, since the previous process crashing
/// is not itself a data error.
pub fn default_recover_running_schedules_as_idle() -> bool {
    true
}

/// The default number of consecutive handler crashes within the backoff window before
/// the worker pool starts backing off a handler slot.
pub fn default_restart_backoff_threshold() -> u32 {
    3
}

/// The default backoff window, in seconds, the restart-threshold count is measured over.
pub fn default_restart_backoff_window_secs() -> u64 {
    60
}

/// The default embedding model used when a tenant has no bridge rows yet.
pub fn default_embedding_model() -> String {
    String::from("text-embedding-3-small")
}

/// The default embedding dimensionality paired with [`default_embedding_model`].
pub fn default_embedding_dimensions() -> u32 {
    1536
}

/// The default field list used to assemble embedding text for a domain table that has
/// no entry in the configured `TextAssemblyConfig`.
pub fn default_text_assembly_fields() -> BTreeMap<String, Vec<String>> {
    let mut fields = BTreeMap::new();
    fields.insert("work_items".to_string(), vec!["title".to_string(), "description".to_string(), "status_name".to_string()]);
    fields.insert("repositories".to_string(), vec!["name".to_string(), "default_branch".to_string()]);
    fields.insert("projects".to_string(), vec!["key".to_string(), "name".to_string(), "description".to_string()]);
    fields
}

/// The default progress-bar template used by [`crate::util::progress::ProgressBars`].
pub fn default_progress_format() -> String {
    String::from("[{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}")
}
