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
use crate::schema::job_schedules;
use crate::schema::job_schedules::dsl;
use crate::status::document::StatusDocument;

/// One scheduled recurring job for one tenant/integration pair.
///
/// `next_run` is computed in the tenant's local time zone and stored as the naive
/// (zone-less) instant it resolves to: the stored `next_run` always reflects the
/// tenant's local wall-clock, not UTC.
#[derive(Debug, Identifiable, Queryable, Clone)]
#[table_name = "job_schedules"]
pub struct JobSchedule {
    pub id: i32,
    pub tenant_id: i32,
    pub integration_id: i32,
    pub job_name: String,
    pub execution_order: i32,
    pub schedule_interval_minutes: i32,
    pub last_run_started_at: Option<NaiveDateTime>,
    pub last_success_at: Option<NaiveDateTime>,
    pub next_run: Option<NaiveDateTime>,
    pub active: bool,
    pub status: serde_json::Value,
}

impl JobSchedule {
    pub fn tenant(&self) -> TenantId {
        TenantId(self.tenant_id)
    }

    pub fn status_document(&self) -> Result<StatusDocument> {
        serde_json::from_value(self.status.clone()).map_err(Error::from)
    }

    pub fn find(database_connection: &PgConnection, tenant: TenantId, id: i32) -> Result<JobSchedule> {
        dsl::job_schedules
            .filter(dsl::tenant_id.eq(tenant.0))
            .filter(dsl::id.eq(id))
            .first::<JobSchedule>(database_connection)
            .map_err(Error::from)
    }

    /// Looks a schedule up by its human-chosen name, as the CLI's `run-job`/`cancel-job`/
    /// `status` subcommands do. Job names are expected unique per tenant but that is an
    /// application-level convention, not a database constraint, so the first match wins.
    pub fn find_by_name(database_connection: &PgConnection, tenant: TenantId, job_name: &str) -> Result<JobSchedule> {
        dsl::job_schedules
            .filter(dsl::tenant_id.eq(tenant.0))
            .filter(dsl::job_name.eq(job_name))
            .first::<JobSchedule>(database_connection)
            .map_err(Error::from)
    }

    pub fn all_active(database_connection: &PgConnection, tenant: TenantId) -> Result<Vec<JobSchedule>> {
        dsl::job_schedules
            .filter(dsl::tenant_id.eq(tenant.0))
            .filter(dsl::active.eq(true))
            .order(dsl::execution_order.asc())
            .load::<JobSchedule>(database_connection)
            .map_err(Error::from)
    }

    /// Every active schedule across every tenant, used once at scheduler startup to
    /// reconstruct the in-memory timer set.
    pub fn all_active_every_tenant(database_connection: &PgConnection) -> Result<Vec<JobSchedule>> {
        dsl::job_schedules
            .filter(dsl::active.eq(true))
            .load::<JobSchedule>(database_connection)
            .map_err(Error::from)
    }

    /// Claims the schedule for a run: locks the row, checks nobody else is already
    /// running it, and stamps `last_run_started_at`. Returns `Ok(false)` (not an error)
    /// when the schedule is already running: if the previous tick for a schedule is
    /// still running, the new tick is skipped, not queued.
    ///
    /// This is hand-written SQL rather than the query DSL because it needs
    /// `SELECT ... FOR UPDATE` row locking that diesel 1's DSL does not expose
    /// directly; `assert_tenant_filtered` is the runtime counterpart to the type-level
    /// check every other function in this module gets for free.
    pub fn try_claim_for_run(database_connection: &PgConnection, tenant: TenantId, id: i32, now: NaiveDateTime) -> Result<bool> {
        database_connection.transaction(|| {
            let schedule = dsl::job_schedules
                .filter(dsl::tenant_id.eq(tenant.0))
                .filter(dsl::id.eq(id))
                .for_update()
                .first::<JobSchedule>(database_connection)?;

            let already_running = match (schedule.last_run_started_at, schedule.last_success_at) {
                (Some(started), Some(succeeded)) => started > succeeded,
                (Some(_), None) => true,
                (None, _) => false,
            };

            if already_running {
                return Ok(false);
            }

            diesel::update(dsl::job_schedules.filter(dsl::tenant_id.eq(tenant.0)).filter(dsl::id.eq(id)))
                .set(dsl::last_run_started_at.eq(Some(now)))
                .execute(database_connection)?;

            Ok(true)
        })
    }

    pub fn mark_succeeded(database_connection: &PgConnection, tenant: TenantId, id: i32, now: NaiveDateTime, next_run: NaiveDateTime) -> Result<()> {
        diesel::update(dsl::job_schedules.filter(dsl::tenant_id.eq(tenant.0)).filter(dsl::id.eq(id)))
            .set((dsl::last_success_at.eq(Some(now)), dsl::next_run.eq(Some(next_run))))
            .execute(database_connection)
            .map(|_| ())
            .map_err(Error::from)
    }

    pub fn update_status(database_connection: &PgConnection, tenant: TenantId, id: i32, status: &StatusDocument) -> Result<()> {
        let value = serde_json::to_value(status)?;
        diesel::update(dsl::job_schedules.filter(dsl::tenant_id.eq(tenant.0)).filter(dsl::id.eq(id)))
            .set(dsl::status.eq(value))
            .execute(database_connection)
            .map(|_| ())
            .map_err(Error::from)
    }

    /// Advances `next_run` without touching `last_success_at`.
    pub fn bump_next_run_only(database_connection: &PgConnection, tenant: TenantId, id: i32, next_run: NaiveDateTime) -> Result<()> {
        diesel::update(dsl::job_schedules.filter(dsl::tenant_id.eq(tenant.0)).filter(dsl::id.eq(id)))
            .set(dsl::next_run.eq(Some(next_run)))
            .execute(database_connection)
            .map(|_| ())
            .map_err(Error::from)
    }

    /// Fills in a missing `next_run` at scheduler startup.
    pub fn seed_next_run_if_missing(database_connection: &PgConnection, tenant: TenantId, id: i32, next_run: NaiveDateTime) -> Result<()> {
        diesel::update(
            dsl::job_schedules
                .filter(dsl::tenant_id.eq(tenant.0))
                .filter(dsl::id.eq(id))
                .filter(dsl::next_run.is_null()),
        )
        .set(dsl::next_run.eq(Some(next_run)))
        .execute(database_connection)
        .map(|_| ())
        .map_err(Error::from)
    }

    /// Resets a schedule's status to idle at scheduler startup, for schedules the
    /// previous (necessarily dead) process left `overall=running`.
    pub fn reset_to_idle(database_connection: &PgConnection, tenant: TenantId, id: i32, step_order: &[(String, String)]) -> Result<()> {
        let document = StatusDocument::idle(step_order);
        JobSchedule::update_status(database_connection, tenant, id, &document)
    }

    /// Runs `f` against this schedule's status document under a `SELECT ... FOR
    /// UPDATE` row lock, persisting whatever document `f` returns and handing back
    /// `f`'s auxiliary result. This is the single choke point every orchestrator
    /// transition goes through: all writes to `JobSchedule.status` use this row-level
    /// lock to serialize concurrent transitions.
    pub fn with_locked_status<F, R>(database_connection: &PgConnection, tenant: TenantId, id: i32, f: F) -> Result<R>
    where
        F: FnOnce(StatusDocument) -> Result<(StatusDocument, R)>,
    {
        database_connection.transaction(|| {
            let schedule = dsl::job_schedules
                .filter(dsl::tenant_id.eq(tenant.0))
                .filter(dsl::id.eq(id))
                .for_update()
                .first::<JobSchedule>(database_connection)?;

            let document = schedule.status_document()?;
            let (new_document, result) = f(document)?;
            let value = serde_json::to_value(&new_document)?;

            diesel::update(dsl::job_schedules.filter(dsl::tenant_id.eq(tenant.0)).filter(dsl::id.eq(id)))
                .set(dsl::status.eq(value))
                .execute(database_connection)?;

            Ok(result)
        })
    }
}

#[derive(Insertable)]
#[table_name = "job_schedules"]
pub struct NewJobSchedule<'a> {
    pub tenant_id: i32,
    pub integration_id: i32,
    pub job_name: &'a str,
    pub execution_order: i32,
    pub schedule_interval_minutes: i32,
    pub next_run: Option<NaiveDateTime>,
    pub active: bool,
    pub status: serde_json::Value,
}

impl<'a> NewJobSchedule<'a> {
    pub fn create(self, database_connection: &PgConnection) -> Result<JobSchedule> {
        diesel::insert_into(job_schedules::table)
            .values(&self)
            .get_result(database_connection)
            .map_err(Error::from)
    }
}
