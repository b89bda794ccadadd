//
// Copyright (c) 2020-2022 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

use anyhow::Error;
use anyhow::Result;
use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel::PgConnection;

use crate::db::tenant_scope::TenantId;
use crate::schema::checkpoints;
use crate::schema::checkpoints::dsl;

/// The durable resume point for one (job, step) pair.
///
/// `cursor_token` is an opaque, provider-defined string (a page token, a `since`
/// cursor, whatever the extractor uses) so this table stays provider-agnostic.
#[derive(Debug, Identifiable, Queryable, Clone)]
#[table_name = "checkpoints"]
pub struct Checkpoint {
    pub id: i32,
    pub tenant_id: i32,
    pub job_id: i32,
    pub step_name: String,
    pub stage: String,
    pub cursor_token: Option<String>,
    pub updated_at: NaiveDateTime,
}

impl Checkpoint {
    pub fn find(database_connection: &PgConnection, tenant: TenantId, job_id: i32, step_name: &str, stage: &str) -> Result<Option<Checkpoint>> {
        dsl::checkpoints
            .filter(dsl::tenant_id.eq(tenant.0))
            .filter(dsl::job_id.eq(job_id))
            .filter(dsl::step_name.eq(step_name))
            .filter(dsl::stage.eq(stage))
            .first::<Checkpoint>(database_connection)
            .optional()
            .map_err(Error::from)
    }

    /// Write-before-publish: callers must persist the new cursor here before acking
    /// the message that produced it, so a crash between write and ack can only replay
    /// a page, never skip one.
    pub fn upsert(database_connection: &PgConnection, tenant: TenantId, job_id: i32, step_name: &str, stage: &str, cursor_token: Option<&str>, now: NaiveDateTime) -> Result<Checkpoint> {
        let existing = Checkpoint::find(database_connection, tenant, job_id, step_name, stage)?;

        match existing {
            Some(checkpoint) => diesel::update(dsl::checkpoints.filter(dsl::tenant_id.eq(tenant.0)).filter(dsl::id.eq(checkpoint.id)))
                .set((dsl::cursor_token.eq(cursor_token), dsl::updated_at.eq(now)))
                .get_result(database_connection)
                .map_err(Error::from),
            None => diesel::insert_into(checkpoints::table)
                .values(&NewCheckpoint {
                    tenant_id: tenant.0,
                    job_id,
                    step_name,
                    stage,
                    cursor_token,
                    updated_at: now,
                })
                .get_result(database_connection)
                .map_err(Error::from),
        }
    }

    pub fn clear(database_connection: &PgConnection, tenant: TenantId, job_id: i32, step_name: &str, stage: &str) -> Result<()> {
        diesel::delete(
            dsl::checkpoints
                .filter(dsl::tenant_id.eq(tenant.0))
                .filter(dsl::job_id.eq(job_id))
                .filter(dsl::step_name.eq(step_name))
                .filter(dsl::stage.eq(stage)),
        )
        .execute(database_connection)
        .map(|_| ())
        .map_err(Error::from)
    }
}

#[derive(Insertable)]
#[table_name = "checkpoints"]
struct NewCheckpoint<'a> {
    tenant_id: i32,
    job_id: i32,
    step_name: &'a str,
    stage: &'a str,
    cursor_token: Option<&'a str>,
    updated_at: NaiveDateTime,
}
