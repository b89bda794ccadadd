//
// Copyright (c) 2020-2022 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

//! The job scheduler: one independent timer per active [`JobSchedule`], waking at
//! `next_run` (computed in the tenant's local time zone) to attempt a single-flight
//! claim and, on success, seed the run's first extraction message. Crash recovery at
//! startup resets schedules a dead process left `running` back to `idle` and fills in
//! any `next_run` a freshly inserted schedule has never had computed.
//!
//! Mirrors [`crate::worker_pool::WorkerPool`]'s shape: a `DashMap` of per-key shutdown
//! handles, a bundled deps struct cloned into each spawned task, idempotent start/stop.

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use anyhow::Error;
use anyhow::Result;
use chrono::Utc;
use dashmap::DashMap;
use log::error;
use log::info;
use log::warn;
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::bus::Envelope;
use crate::bus::MessageBus;
use crate::bus::QueueName;
use crate::cancellation::CancellationRegistry;
use crate::config::Configuration;
use crate::db::connection::DbPools;
use crate::db::models::job_schedule::JobSchedule;
use crate::db::models::Integration;
use crate::db::models::Tenant;
use crate::db::tenant_scope::TenantId;
use crate::handlers::HandlerRegistry;
use crate::orchestrator;
use crate::publisher::event::ProgressEvent;
use crate::publisher::Publisher;
use crate::status::document::OverallState;

/// How often a timer re-checks its own `next_run` when it cannot compute a sane delay
/// (e.g. the schedule's tenant has an unparseable time zone). Generous enough to avoid
/// a busy loop, short enough that a transient misconfiguration self-heals quickly.
const FALLBACK_RECHECK: Duration = Duration::from_secs(60);

#[derive(Clone, typed_builder::TypedBuilder)]
struct SchedulerDeps {
    db_pools: DbPools,
    bus: Arc<dyn MessageBus>,
    registry: Arc<HandlerRegistry>,
    cancellation: Arc<CancellationRegistry>,
    publisher: Arc<Publisher>,
    config: Arc<Configuration>,
}

pub struct Scheduler {
    deps: SchedulerDeps,
    timers: DashMap<(TenantId, i32), (watch::Sender<bool>, JoinHandle<()>)>,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db_pools: DbPools,
        bus: Arc<dyn MessageBus>,
        registry: Arc<HandlerRegistry>,
        cancellation: Arc<CancellationRegistry>,
        publisher: Arc<Publisher>,
        config: Arc<Configuration>,
    ) -> Scheduler {
        let deps = SchedulerDeps::builder()
            .db_pools(db_pools)
            .bus(bus)
            .registry(registry)
            .cancellation(cancellation)
            .publisher(publisher)
            .config(config)
            .build();

        Scheduler { deps, timers: DashMap::new() }
    }

    /// Runs crash recovery, spawns one timer per active schedule across every tenant,
    /// then blocks until `shutdown` fires. Intended to be run to completion in the
    /// `scheduler run` foreground subcommand.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        self.recover_at_startup()?;
        self.spawn_all()?;

        shutdown.changed().await.ok();
        self.stop_all().await;
        Ok(())
    }

    /// Resets schedules left `running` by a crashed process back to `idle` (when
    /// `recover_running_schedules_as_idle` is set) and fills in a `next_run` for any
    /// schedule that has never had one computed.
    fn recover_at_startup(&self) -> Result<()> {
        let conn = self.deps.db_pools.rw().get().map_err(Error::from)?;
        let schedules = JobSchedule::all_active_every_tenant(&conn)?;

        for schedule in &schedules {
            let tenant = schedule.tenant();

            if *self.deps.config.recover_running_schedules_as_idle() {
                let document = schedule.status_document()?;
                if matches!(document.overall, OverallState::Running) {
                    let integration = Integration::find(&conn, tenant, schedule.integration_id)?;
                    let step_order = self
                        .deps
                        .registry
                        .step_order(&integration.provider)
                        .ok_or_else(|| anyhow!("no handlers registered for provider {}", integration.provider))?;
                    JobSchedule::reset_to_idle(&conn, tenant, schedule.id, &step_order)?;
                    warn!("recovered job {} (tenant {}) from running to idle at startup", schedule.job_name, tenant.0);
                }
            }

            if schedule.next_run.is_none() {
                let tenant_row = Tenant::find(&conn, tenant)?;
                let tz = tenant_row.time_zone()?;
                let now_local = Utc::now().with_timezone(&tz).naive_local();
                JobSchedule::seed_next_run_if_missing(&conn, tenant, schedule.id, now_local)?;
            }
        }

        Ok(())
    }

    fn spawn_all(&self) -> Result<()> {
        let conn = self.deps.db_pools.rw().get().map_err(Error::from)?;
        let schedules = JobSchedule::all_active_every_tenant(&conn)?;
        drop(conn);

        for schedule in schedules {
            self.spawn_timer(schedule.tenant(), schedule.id);
        }
        Ok(())
    }

    /// Starts a timer for `(tenant, job_id)` if one is not already running. Used both at
    /// startup and by the control surface when a new schedule is activated.
    pub fn spawn_timer(&self, tenant: TenantId, job_id: i32) {
        let key = (tenant, job_id);
        if self.timers.contains_key(&key) {
            return;
        }

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run_timer(tenant, job_id, self.deps.clone(), rx));
        self.timers.insert(key, (tx, handle));
        info!("scheduler timer started for tenant {} job {}", tenant.0, job_id);
    }

    /// Runs a single claim-and-seed attempt for `(tenant, job_id)` immediately, outside
    /// its normal timer cadence. Returns whether the claim was won: `false` means the
    /// job was already running and nothing was started. Backs the `run-job` CLI
    /// subcommand; single-flight safety is the same `try_claim_for_run` the timer uses,
    /// so forcing a run never races a concurrently ticking timer for the same job.
    pub async fn run_now(&self, tenant: TenantId, job_id: i32) -> Result<bool> {
        let before = {
            let conn = self.deps.db_pools.rw().get().map_err(Error::from)?;
            JobSchedule::find(&conn, tenant, job_id)?.last_run_started_at
        };
        tick(&self.deps, tenant, job_id).await?;
        let after = {
            let conn = self.deps.db_pools.rw().get().map_err(Error::from)?;
            JobSchedule::find(&conn, tenant, job_id)?.last_run_started_at
        };
        Ok(after != before)
    }

    pub fn stop_timer(&self, tenant: TenantId, job_id: i32) {
        if let Some((_, (shutdown, _))) = self.timers.remove(&(tenant, job_id)) {
            let _ = shutdown.send(true);
        }
    }

    /// Signals every timer to stop and waits for each to observe the signal.
    pub async fn stop_all(&self) {
        let keys: Vec<(TenantId, i32)> = self.timers.iter().map(|entry| *entry.key()).collect();
        for key in keys {
            if let Some((_, (shutdown, handle))) = self.timers.remove(&key) {
                let _ = shutdown.send(true);
                let _ = handle.await;
            }
        }
    }
}

async fn run_timer(tenant: TenantId, job_id: i32, deps: SchedulerDeps, mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }

        let wait = match next_delay(&deps, tenant, job_id) {
            Ok(delay) => delay,
            Err(error) => {
                error!("scheduler could not compute next delay for tenant {} job {}: {:#}", tenant.0, job_id, error);
                FALLBACK_RECHECK
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = shutdown.changed() => {}
        }

        if *shutdown.borrow() {
            return;
        }

        if let Err(error) = tick(&deps, tenant, job_id).await {
            error!("scheduler tick failed for tenant {} job {}: {:#}", tenant.0, job_id, error);
        }
    }
}

fn next_delay(deps: &SchedulerDeps, tenant: TenantId, job_id: i32) -> Result<Duration> {
    let conn = deps.db_pools.rw().get().map_err(Error::from)?;
    let schedule = JobSchedule::find(&conn, tenant, job_id)?;
    let tenant_row = Tenant::find(&conn, tenant)?;
    let tz = tenant_row.time_zone()?;
    let now_local = Utc::now().with_timezone(&tz).naive_local();

    let next_run = match schedule.next_run {
        Some(next_run) => next_run,
        None => now_local,
    };

    let millis = next_run.signed_duration_since(now_local).num_milliseconds().max(0) as u64;
    Ok(Duration::from_millis(millis))
}

/// One scheduler tick: attempts the single-flight claim and, if it wins, starts the run.
/// A lost claim (the previous run for this schedule is still in flight) is not an error;
/// the timer simply re-arms for the next tick once [`next_delay`] re-reads the schedule.
async fn tick(deps: &SchedulerDeps, tenant: TenantId, job_id: i32) -> Result<()> {
    let now = Utc::now().naive_utc();

    let claimed = {
        let conn = deps.db_pools.rw().get().map_err(Error::from)?;
        JobSchedule::try_claim_for_run(&conn, tenant, job_id, now)?
    };

    if !claimed {
        return Ok(());
    }

    // A new run owns a fresh cancellation flag regardless of how the previous run for
    // this job id ended.
    deps.cancellation.reset(tenant, job_id);

    let conn = deps.db_pools.rw().get().map_err(Error::from)?;
    let schedule = JobSchedule::find(&conn, tenant, job_id)?;
    let integration = Integration::find(&conn, tenant, schedule.integration_id)?;
    let step_order = deps
        .registry
        .step_order(&integration.provider)
        .ok_or_else(|| anyhow!("no handlers registered for provider {}", integration.provider))?;
    let first_step = step_order.first().map(|(name, _)| name.clone()).ok_or_else(|| anyhow!("provider {} has no steps registered", integration.provider))?;

    orchestrator::start_run(&conn, tenant, job_id, &step_order)?;

    let tenant_row = Tenant::find(&conn, tenant)?;
    let tier = tenant_row.tier()?;
    let tz = tenant_row.time_zone()?;
    let now_local = Utc::now().with_timezone(&tz).naive_local();
    let next_run = now_local + chrono::Duration::minutes(schedule.schedule_interval_minutes.into());
    JobSchedule::bump_next_run_only(&conn, tenant, job_id, next_run)?;
    drop(conn);

    let envelope = Envelope::new(
        tenant,
        job_id,
        schedule.integration_id,
        "extraction_page",
        json!({ "provider": integration.provider, "step_name": first_step }),
    );
    let queue = QueueName::Extraction(tier);
    deps.bus.declare_queue(&queue).await?;
    deps.bus.publish(&queue, &envelope).await?;

    if let Err(error) = deps.publisher.publish(tenant, job_id, ProgressEvent::Progress { percentage: 0, step: first_step.clone() }).await {
        warn!("failed to publish run-started progress event: {:#}", error);
    }

    info!("started run for tenant {} job {} ({}), seeded step {}", tenant.0, job_id, schedule.job_name, first_step);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_recheck_is_positive() {
        assert!(FALLBACK_RECHECK > Duration::ZERO);
    }
}
