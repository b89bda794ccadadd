//
// Copyright (c) 2020-2022 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

use std::str::FromStr;

use anyhow::anyhow;
use anyhow::Error;
use anyhow::Result;
use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel::PgConnection;
use serde_json::Value;

use crate::db::tenant_scope::TenantId;
use crate::schema::raw_extraction_data;
use crate::schema::raw_extraction_data::dsl;

/// Lifecycle of one extracted record sitting in `raw_extraction_data` between
/// extraction writing it and transform consuming it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RawRecordStatus {
    Pending,
    Transformed,
    Failed,
}

impl RawRecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RawRecordStatus::Pending => "pending",
            RawRecordStatus::Transformed => "transformed",
            RawRecordStatus::Failed => "failed",
        }
    }
}

impl FromStr for RawRecordStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(RawRecordStatus::Pending),
            "transformed" => Ok(RawRecordStatus::Transformed),
            "failed" => Ok(RawRecordStatus::Failed),
            other => Err(anyhow!("Unknown raw extraction record status: {}", other)),
        }
    }
}

/// One page of unprocessed extractor output, queued for the transform stage.
#[derive(Debug, Identifiable, Queryable, Clone)]
#[table_name = "raw_extraction_data"]
pub struct RawExtractionRecord {
    pub id: i32,
    pub tenant_id: i32,
    pub integration_id: i32,
    pub job_id: i32,
    pub step_name: String,
    pub record_type: String,
    pub payload: Value,
    pub status: String,
    pub last_item: bool,
    pub error_details: Option<String>,
    pub created_at: NaiveDateTime,
}

impl RawExtractionRecord {
    pub fn status(&self) -> Result<RawRecordStatus> {
        RawRecordStatus::from_str(&self.status)
    }

    pub fn find(database_connection: &PgConnection, tenant: TenantId, id: i32) -> Result<RawExtractionRecord> {
        dsl::raw_extraction_data
            .filter(dsl::tenant_id.eq(tenant.0))
            .filter(dsl::id.eq(id))
            .first::<RawExtractionRecord>(database_connection)
            .map_err(Error::from)
    }

    pub fn pending_for_job(database_connection: &PgConnection, tenant: TenantId, job_id: i32, step_name: &str) -> Result<Vec<RawExtractionRecord>> {
        dsl::raw_extraction_data
            .filter(dsl::tenant_id.eq(tenant.0))
            .filter(dsl::job_id.eq(job_id))
            .filter(dsl::step_name.eq(step_name))
            .filter(dsl::status.eq(RawRecordStatus::Pending.as_str()))
            .order(dsl::id.asc())
            .load::<RawExtractionRecord>(database_connection)
            .map_err(Error::from)
    }

    /// Every raw record still `pending` for a tenant, across every job and step, oldest
    /// first. Backs the `requeue-pending-raw` control-surface operation: a transform
    /// worker crash after acking extraction but before its transform message was ever
    /// published would otherwise leave the record stuck, since at-least-once delivery
    /// only covers messages that made it onto the bus.
    pub fn pending_for_tenant(database_connection: &PgConnection, tenant: TenantId, limit: Option<i64>) -> Result<Vec<RawExtractionRecord>> {
        let mut query = dsl::raw_extraction_data
            .filter(dsl::tenant_id.eq(tenant.0))
            .filter(dsl::status.eq(RawRecordStatus::Pending.as_str()))
            .order(dsl::id.asc())
            .into_boxed();

        if let Some(limit) = limit {
            query = query.limit(limit);
        }

        query.load::<RawExtractionRecord>(database_connection).map_err(Error::from)
    }

    pub fn mark_transformed(database_connection: &PgConnection, tenant: TenantId, id: i32) -> Result<()> {
        diesel::update(dsl::raw_extraction_data.filter(dsl::tenant_id.eq(tenant.0)).filter(dsl::id.eq(id)))
            .set(dsl::status.eq(RawRecordStatus::Transformed.as_str()))
            .execute(database_connection)
            .map(|_| ())
            .map_err(Error::from)
    }

    pub fn mark_failed(database_connection: &PgConnection, tenant: TenantId, id: i32, error_details: &str) -> Result<()> {
        diesel::update(dsl::raw_extraction_data.filter(dsl::tenant_id.eq(tenant.0)).filter(dsl::id.eq(id)))
            .set((dsl::status.eq(RawRecordStatus::Failed.as_str()), dsl::error_details.eq(Some(error_details))))
            .execute(database_connection)
            .map(|_| ())
            .map_err(Error::from)
    }
}

#[derive(Insertable)]
#[table_name = "raw_extraction_data"]
pub struct NewRawExtractionRecord<'a> {
    pub tenant_id: i32,
    pub integration_id: i32,
    pub job_id: i32,
    pub step_name: &'a str,
    pub record_type: &'a str,
    pub payload: Value,
    pub status: &'a str,
    pub last_item: bool,
    pub created_at: NaiveDateTime,
}

impl<'a> NewRawExtractionRecord<'a> {
    pub fn create(self, database_connection: &PgConnection) -> Result<RawExtractionRecord> {
        diesel::insert_into(raw_extraction_data::table)
            .values(&self)
            .get_result(database_connection)
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips() {
        for status in [RawRecordStatus::Pending, RawRecordStatus::Transformed, RawRecordStatus::Failed] {
            assert_eq!(RawRecordStatus::from_str(status.as_str()).unwrap().as_str(), status.as_str());
        }
    }
}
