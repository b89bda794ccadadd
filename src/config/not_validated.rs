//
// Copyright (c) 2020-2021 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

use std::collections::BTreeMap;

use anyhow::anyhow;
use anyhow::Result;
use getset::Getters;
use serde::Deserialize;
use url::Url;

use crate::config::util::*;
use crate::config::Configuration;

/// Per-`(tier-or-tenant, stage)` desired worker count, the `WORKER_COUNTS` environment
/// key flattened into a map.
pub type WorkerCounts = BTreeMap<String, u32>;

/// `table_name -> ordered field list` driving how embedding text is assembled for each
/// domain table.
pub type TextAssemblyConfig = BTreeMap<String, Vec<String>>;

#[derive(Debug, Getters, Deserialize)]
pub struct NotValidatedConfiguration {
    /// `DB_URL_RW`: the read-write database endpoint.
    #[getset(get = "pub")]
    db_url_rw: String,

    /// `DB_URL_RO`: the read replica used for extraction fetches that do not need
    /// fresh writes.
    #[getset(get = "pub")]
    db_url_ro: String,

    #[serde(default = "default_database_connection_timeout")]
    #[getset(get = "pub")]
    database_connection_timeout: u16,

    #[serde(default = "default_database_pool_size")]
    #[getset(get = "pub")]
    database_pool_size: u32,

    /// `BUS_URL`: the AMQP broker connection string.
    #[getset(get = "pub")]
    bus_url: String,

    /// `VECTOR_STORE_URL`: the external vector store endpoint for the embedding handler.
    #[getset(get = "pub")]
    vector_store_url: String,

    /// Redis connection string backing the progress publisher's push channel.
    #[getset(get = "pub")]
    redis_url: String,

    /// `TENANT_TIME_ZONE`: the fallback IANA time zone name used when a tenant row has
    /// none set, so scheduling never operates on an ambiguous zone.
    #[getset(get = "pub")]
    tenant_time_zone: String,

    /// `WORKER_COUNTS`.
    #[serde(default)]
    #[getset(get = "pub")]
    worker_counts: WorkerCounts,

    /// `RETRY_LIMIT`: the number of retryable failures the bus allows before
    /// dead-lettering a message.
    #[serde(default = "default_max_delivery_attempts")]
    #[getset(get = "pub")]
    retry_limit: u16,

    /// `EMBEDDING_DEFAULT_MODEL`: used for a tenant's first embedded record.
    #[serde(default = "default_embedding_model")]
    #[getset(get = "pub")]
    embedding_default_model: String,

    #[serde(default = "default_embedding_dimensions")]
    #[getset(get = "pub")]
    embedding_default_dimensions: u32,

    #[serde(default = "default_text_assembly_fields")]
    #[getset(get = "pub")]
    text_assembly: TextAssemblyConfig,

    #[serde(default = "default_recover_running_schedules_as_idle")]
    #[getset(get = "pub")]
    recover_running_schedules_as_idle: bool,

    #[serde(default = "default_restart_backoff_threshold")]
    #[getset(get = "pub")]
    restart_backoff_threshold: u32,

    #[serde(default = "default_restart_backoff_window_secs")]
    #[getset(get = "pub")]
    restart_backoff_window_secs: u64,

    #[serde(default = "default_progress_format")]
    #[getset(get = "pub")]
    progress_format: String,

    #[serde(default = "default_spinner_format")]
    #[getset(get = "pub")]
    spinner_format: String,
}

impl NotValidatedConfiguration {
    pub fn validate(self) -> Result<Configuration> {
        for (key, url) in [("DB_URL_RW", &self.db_url_rw), ("DB_URL_RO", &self.db_url_ro), ("BUS_URL", &self.bus_url), ("VECTOR_STORE_URL", &self.vector_store_url), ("REDIS_URL", &self.redis_url)] {
            Url::parse(url).map_err(|e| anyhow!("Invalid {}: {}", key, e))?;
        }

        if self.tenant_time_zone.parse::<chrono_tz::Tz>().is_err() {
            return Err(anyhow!("TENANT_TIME_ZONE is not a recognized IANA time zone: {}", self.tenant_time_zone));
        }

        if self.retry_limit == 0 {
            return Err(anyhow!("RETRY_LIMIT must be at least 1"));
        }

        if self.embedding_default_dimensions == 0 {
            return Err(anyhow!("embedding_default_dimensions must be greater than zero"));
        }

        for (tier_or_tenant, count) in self.worker_counts.iter() {
            if *count == 0 {
                return Err(anyhow!("WORKER_COUNTS entry for {} is zero; omit the entry instead of setting it to zero", tier_or_tenant));
            }
        }

        Ok(Configuration { inner: self })
    }
}

fn default_spinner_format() -> String {
    String::from("{spinner:.green} {msg}")
}
