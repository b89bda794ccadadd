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

use crate::db::tenant_scope::TenantId;
use crate::schema::vectorization_queue;
use crate::schema::vectorization_queue::dsl;

/// What the vector store collaborator should do with a record.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Operation {
    Upsert,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Upsert => "upsert",
            Operation::Delete => "delete",
        }
    }
}

impl FromStr for Operation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "upsert" => Ok(Operation::Upsert),
            "delete" => Ok(Operation::Delete),
            other => Err(anyhow!("Unknown vectorization queue operation: {}", other)),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum QueueItemStatus {
    Pending,
    Embedded,
    Failed,
}

impl QueueItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueItemStatus::Pending => "pending",
            QueueItemStatus::Embedded => "embedded",
            QueueItemStatus::Failed => "failed",
        }
    }
}

impl FromStr for QueueItemStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(QueueItemStatus::Pending),
            "embedded" => Ok(QueueItemStatus::Embedded),
            "failed" => Ok(QueueItemStatus::Failed),
            other => Err(anyhow!("Unknown vectorization queue item status: {}", other)),
        }
    }
}

/// One row of pending embedding work, keyed by the changed domain record. The
/// routing queue name for the message bus is `vectorization_queue_tenant_<id>`, tenant
/// scoped rather than tier scoped because embedding work competes for a shared external
/// vector store budget per tenant, not a shared worker pool.
#[derive(Debug, Identifiable, Queryable, Clone)]
#[table_name = "vectorization_queue"]
pub struct VectorizationQueueItem {
    pub id: i32,
    pub tenant_id: i32,
    pub job_id: i32,
    pub step_name: String,
    pub table_name: String,
    pub external_id: String,
    pub operation: String,
    pub status: String,
    pub created_at: NaiveDateTime,
}

impl VectorizationQueueItem {
    pub fn operation(&self) -> Result<Operation> {
        Operation::from_str(&self.operation)
    }

    pub fn status(&self) -> Result<QueueItemStatus> {
        QueueItemStatus::from_str(&self.status)
    }

    pub fn queue_name(tenant: TenantId) -> String {
        format!("vectorization_queue_tenant_{}", tenant.0)
    }

    pub fn find(database_connection: &PgConnection, tenant: TenantId, id: i32) -> Result<VectorizationQueueItem> {
        dsl::vectorization_queue
            .filter(dsl::tenant_id.eq(tenant.0))
            .filter(dsl::id.eq(id))
            .first::<VectorizationQueueItem>(database_connection)
            .map_err(Error::from)
    }

    pub fn pending_for_tenant(database_connection: &PgConnection, tenant: TenantId, limit: i64) -> Result<Vec<VectorizationQueueItem>> {
        dsl::vectorization_queue
            .filter(dsl::tenant_id.eq(tenant.0))
            .filter(dsl::status.eq(QueueItemStatus::Pending.as_str()))
            .order(dsl::id.asc())
            .limit(limit)
            .load::<VectorizationQueueItem>(database_connection)
            .map_err(Error::from)
    }

    /// Outstanding (pending) embedding items for one `(tenant, job, step)`, the count
    /// rule 4 drains to zero before `embedding→finished` is allowed.
    pub fn pending_count_for_step(database_connection: &PgConnection, tenant: TenantId, job_id: i32, step_name: &str) -> Result<i64> {
        dsl::vectorization_queue
            .filter(dsl::tenant_id.eq(tenant.0))
            .filter(dsl::job_id.eq(job_id))
            .filter(dsl::step_name.eq(step_name))
            .filter(dsl::status.eq(QueueItemStatus::Pending.as_str()))
            .count()
            .get_result(database_connection)
            .map_err(Error::from)
    }

    pub fn mark_embedded(database_connection: &PgConnection, tenant: TenantId, id: i32) -> Result<()> {
        diesel::update(dsl::vectorization_queue.filter(dsl::tenant_id.eq(tenant.0)).filter(dsl::id.eq(id)))
            .set(dsl::status.eq(QueueItemStatus::Embedded.as_str()))
            .execute(database_connection)
            .map(|_| ())
            .map_err(Error::from)
    }

    pub fn mark_failed(database_connection: &PgConnection, tenant: TenantId, id: i32) -> Result<()> {
        diesel::update(dsl::vectorization_queue.filter(dsl::tenant_id.eq(tenant.0)).filter(dsl::id.eq(id)))
            .set(dsl::status.eq(QueueItemStatus::Failed.as_str()))
            .execute(database_connection)
            .map(|_| ())
            .map_err(Error::from)
    }
}

#[derive(Insertable)]
#[table_name = "vectorization_queue"]
pub struct NewVectorizationQueueItem<'a> {
    pub tenant_id: i32,
    pub job_id: i32,
    pub step_name: &'a str,
    pub table_name: &'a str,
    pub external_id: &'a str,
    pub operation: &'a str,
    pub status: &'a str,
    pub created_at: NaiveDateTime,
}

impl<'a> NewVectorizationQueueItem<'a> {
    pub fn create(self, database_connection: &PgConnection) -> Result<VectorizationQueueItem> {
        diesel::insert_into(vectorization_queue::table)
            .values(&self)
            .get_result(database_connection)
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_name_is_tenant_scoped() {
        assert_eq!(VectorizationQueueItem::queue_name(TenantId(7)), "vectorization_queue_tenant_7");
    }
}
