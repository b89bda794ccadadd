//
// Copyright (c) 2020-2022 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

//! The worker pool: per `(tier, stage)` or `(tenant, stage)` consumer groups, each a
//! fixed number of concurrent handler slots polling one [`QueueName`] and dispatching
//! through [`crate::handlers::dispatch`]. Extraction groups are shared per tier (many
//! tenants feed the same queue); transform and embedding groups are per tenant.
//!
//! A group is started idempotently and reference-counted for the shared extraction
//! case: `stop_tenant_workers` only tears an extraction group down once every tenant
//! that asked for it has also asked to stop.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use anyhow::anyhow;
use anyhow::Error;
use anyhow::Result;
use chrono::NaiveDateTime;
use dashmap::DashMap;
use log::error;
use log::info;
use log::warn;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::bus::Delivery;
use crate::bus::Envelope;
use crate::bus::MessageBus;
use crate::bus::QueueName;
use crate::cancellation::CancellationRegistry;
use crate::config::Configuration;
use crate::db::connection::DbPools;
use crate::db::models::Integration;
use crate::db::models::RawExtractionRecord;
use crate::db::models::Tenant;
use crate::db::models::Tier;
use crate::db::tenant_scope::TenantId;
use crate::embedding::EmbeddingProvider;
use crate::errors::HandlerError;
use crate::handlers::dispatch;
use crate::handlers::dispatch::StageDeps;
use crate::handlers::HandlerContext;
use crate::handlers::HandlerRegistry;
use crate::publisher::event::ExceptionLevel;
use crate::publisher::event::ProgressEvent;
use crate::publisher::Publisher;
use crate::vector_store::VectorStore;

const IDLE_POLL_BACKOFF: Duration = Duration::from_millis(500);
const DEFAULT_WORKER_COUNT: u32 = 1;

/// One entry of [`WorkerPool::status`]: the observable state of a single consumer
/// group.
#[derive(Clone, Debug)]
pub struct GroupStatus {
    pub queue: QueueName,
    pub running: bool,
    pub desired_workers: u32,
    pub active_workers: u32,
    pub last_heartbeat: Option<NaiveDateTime>,
}

/// Crash bookkeeping for one slot: the timestamps of its last few restarts, used to
/// decide when repeated crashes within the configured window warrant backing off
/// instead of respawning immediately.
#[derive(Default)]
struct CrashHistory {
    timestamps: Mutex<Vec<Instant>>,
}

impl CrashHistory {
    /// Records a crash and returns how long the supervisor should wait before
    /// respawning: zero until `threshold` crashes have landed inside `window`, then an
    /// exponential backoff keyed off how many crashes are currently in the window.
    fn record_and_backoff(&self, threshold: u32, window: Duration) -> Duration {
        let now = Instant::now();
        let mut timestamps = self.timestamps.lock().unwrap();
        timestamps.retain(|t| now.duration_since(*t) <= window);
        timestamps.push(now);
        let count = timestamps.len() as u32;
        if count < threshold {
            Duration::ZERO
        } else {
            let exponent = count - threshold;
            Duration::from_secs(2u64.saturating_pow(exponent)).min(Duration::from_secs(300))
        }
    }
}

struct WorkerGroup {
    shutdown: watch::Sender<bool>,
    slots: Vec<JoinHandle<()>>,
    desired_workers: u32,
    heartbeat: Arc<Mutex<Option<NaiveDateTime>>>,
}

/// Everything a single poll-loop slot needs, bundled so spawning a slot is one call
/// rather than a dozen `.clone()`s at the call site. Built via [`typed_builder`] at the
/// one real call site (process start-up wiring every one of these) instead of a
/// positional constructor, so adding a dependency cannot silently swap two `Arc<dyn _>`
/// arguments of the same shape.
#[derive(Clone, typed_builder::TypedBuilder)]
struct SlotDeps {
    db_pools: DbPools,
    bus: Arc<dyn MessageBus>,
    registry: Arc<HandlerRegistry>,
    embedding_provider: Arc<dyn EmbeddingProvider>,
    vector_store: Arc<dyn VectorStore>,
    cancellation: Arc<CancellationRegistry>,
    publisher: Arc<Publisher>,
    config: Arc<Configuration>,
}

pub struct WorkerPool {
    deps: SlotDeps,
    groups: DashMap<String, WorkerGroup>,
    tier_tenant_refs: DashMap<String, HashSet<TenantId>>,
}

impl WorkerPool {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db_pools: DbPools,
        bus: Arc<dyn MessageBus>,
        registry: Arc<HandlerRegistry>,
        embedding_provider: Arc<dyn EmbeddingProvider>,
        vector_store: Arc<dyn VectorStore>,
        cancellation: Arc<CancellationRegistry>,
        publisher: Arc<Publisher>,
        config: Arc<Configuration>,
    ) -> WorkerPool {
        let deps = SlotDeps::builder()
            .db_pools(db_pools)
            .bus(bus)
            .registry(registry)
            .embedding_provider(embedding_provider)
            .vector_store(vector_store)
            .cancellation(cancellation)
            .publisher(publisher)
            .config(config)
            .build();

        WorkerPool { deps, groups: DashMap::new(), tier_tenant_refs: DashMap::new() }
    }

    /// Starts (idempotently) the tenant's transform and embedding groups, plus the
    /// shared extraction group for the tenant's tier.
    pub async fn start_tenant_workers(&self, tenant: TenantId) -> Result<()> {
        let tier = self.tenant_tier(tenant)?;

        let tier_key = queue_key(&QueueName::Extraction(tier));
        let mut refs = self.tier_tenant_refs.entry(tier_key).or_default();
        refs.insert(tenant);
        drop(refs);

        self.ensure_group(QueueName::Extraction(tier)).await;
        self.ensure_group(QueueName::Transform(tenant)).await;
        self.ensure_group(QueueName::Vectorization(tenant)).await;
        Ok(())
    }

    /// Stops the tenant's transform and embedding groups. The shared extraction group
    /// for the tenant's tier is only torn down once no other tenant in that tier has an
    /// outstanding `start_tenant_workers` call.
    pub async fn stop_tenant_workers(&self, tenant: TenantId) -> Result<()> {
        let tier = self.tenant_tier(tenant)?;

        self.teardown_group(&queue_key(&QueueName::Transform(tenant)));
        self.teardown_group(&queue_key(&QueueName::Vectorization(tenant)));

        let tier_key = queue_key(&QueueName::Extraction(tier));
        let now_empty = match self.tier_tenant_refs.get_mut(&tier_key) {
            Some(mut refs) => {
                refs.remove(&tenant);
                refs.is_empty()
            }
            None => true,
        };
        if now_empty {
            self.teardown_group(&tier_key);
        }
        Ok(())
    }

    pub async fn start_all(&self) -> Result<()> {
        let tenants = {
            let conn = self.deps.db_pools.rw().get().map_err(Error::from)?;
            Tenant::all_active(&conn)?
        };
        for tenant in tenants {
            self.start_tenant_workers(tenant.tenant_id()).await?;
        }
        Ok(())
    }

    pub async fn stop_all(&self) -> Result<()> {
        let tenants = {
            let conn = self.deps.db_pools.rw().get().map_err(Error::from)?;
            Tenant::all_active(&conn)?
        };
        for tenant in tenants {
            self.stop_tenant_workers(tenant.tenant_id()).await?;
        }
        Ok(())
    }

    pub fn status(&self) -> Vec<GroupStatus> {
        self.groups
            .iter()
            .filter_map(|entry| {
                let queue = parse_queue_key(entry.key())?;
                let group = entry.value();
                Some(GroupStatus {
                    queue,
                    running: true,
                    desired_workers: group.desired_workers,
                    active_workers: group.slots.len() as u32,
                    last_heartbeat: *group.heartbeat.lock().unwrap(),
                })
            })
            .collect()
    }

    /// Blocks until every running slot has observed its shutdown signal and returned,
    /// used during process shutdown once `stop_all` has been called.
    pub async fn join(&self) {
        let keys: Vec<String> = self.groups.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some((_, group)) = self.groups.remove(&key) {
                for slot in group.slots {
                    let _ = slot.await;
                }
            }
        }
    }

    fn tenant_tier(&self, tenant: TenantId) -> Result<Tier> {
        let conn = self.deps.db_pools.rw().get().map_err(Error::from)?;
        Tenant::find(&conn, tenant)?.tier()
    }

    async fn ensure_group(&self, queue: QueueName) {
        let key = queue_key(&queue);
        if self.groups.contains_key(&key) {
            return;
        }

        let desired = self.worker_count_for(&queue);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let heartbeat = Arc::new(Mutex::new(None));

        if let Err(error) = self.deps.bus.declare_queue(&queue).await {
            error!("failed to declare queue {}: {:#}", queue.as_string(), error);
        }

        let mut slots = Vec::with_capacity(desired as usize);
        for _ in 0..desired {
            slots.push(spawn_slot(queue.clone(), self.deps.clone(), shutdown_rx.clone(), heartbeat.clone()));
        }

        self.groups.insert(key, WorkerGroup { shutdown: shutdown_tx, slots, desired_workers: desired, heartbeat });
        info!("started worker group for {} with {} slot(s)", queue.as_string(), desired);
    }

    fn teardown_group(&self, key: &str) {
        if let Some((_, group)) = self.groups.remove(key) {
            let _ = group.shutdown.send(true);
            info!("stopping worker group {}", key);
        }
    }

    fn worker_count_for(&self, queue: &QueueName) -> u32 {
        self.deps.config.worker_counts().get(&queue_key(queue)).copied().unwrap_or(DEFAULT_WORKER_COUNT)
    }
}

fn queue_key(queue: &QueueName) -> String {
    match queue {
        QueueName::Extraction(tier) => format!("extraction:{}", tier.as_str()),
        QueueName::Transform(tenant) => format!("transform:tenant:{}", tenant.0),
        QueueName::Vectorization(tenant) => format!("embedding:tenant:{}", tenant.0),
        QueueName::Orchestrator => "orchestrator".to_string(),
    }
}

fn parse_queue_key(key: &str) -> Option<QueueName> {
    let mut parts = key.splitn(3, ':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("extraction"), Some(tier), None) => tier.parse::<Tier>().ok().map(QueueName::Extraction),
        (Some("transform"), Some("tenant"), Some(id)) => id.parse::<i32>().ok().map(|id| QueueName::Transform(TenantId(id))),
        (Some("embedding"), Some("tenant"), Some(id)) => id.parse::<i32>().ok().map(|id| QueueName::Vectorization(TenantId(id))),
        _ => None,
    }
}

fn spawn_slot(queue: QueueName, deps: SlotDeps, mut shutdown: watch::Receiver<bool>, heartbeat: Arc<Mutex<Option<NaiveDateTime>>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let history = CrashHistory::default();
        let threshold = *deps.config.restart_backoff_threshold();
        let window = Duration::from_secs(*deps.config.restart_backoff_window_secs());

        loop {
            if *shutdown.borrow() {
                return;
            }

            let slot_shutdown = shutdown.clone();
            let handle = tokio::spawn(run_slot(queue.clone(), deps.clone(), slot_shutdown, heartbeat.clone()));

            match handle.await {
                Ok(()) => return,
                Err(join_error) => {
                    warn!("worker slot for {} crashed: {}", queue.as_string(), join_error);
                    let backoff = history.record_and_backoff(threshold, window);
                    if backoff > Duration::ZERO {
                        warn!("backing off worker slot for {} for {:?}", queue.as_string(), backoff);
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }
    })
}

async fn run_slot(queue: QueueName, deps: SlotDeps, mut shutdown: watch::Receiver<bool>, heartbeat: Arc<Mutex<Option<NaiveDateTime>>>) {
    loop {
        if *shutdown.borrow() {
            return;
        }

        *heartbeat.lock().unwrap() = Some(chrono::Utc::now().naive_utc());

        let delivery = match deps.bus.poll(&queue).await {
            Ok(delivery) => delivery,
            Err(error) => {
                error!("poll failed for {}: {:#}", queue.as_string(), error);
                None
            }
        };

        let delivery = match delivery {
            Some(delivery) => delivery,
            None => {
                tokio::select! {
                    _ = tokio::time::sleep(IDLE_POLL_BACKOFF) => {}
                    _ = shutdown.changed() => {}
                }
                continue;
            }
        };

        if let Err(error) = handle_delivery(&queue, delivery, &deps).await {
            error!("unhandled error processing message on {}: {:#}", queue.as_string(), error);
        }
    }
}

async fn handle_delivery(queue: &QueueName, delivery: Box<dyn Delivery>, deps: &SlotDeps) -> Result<()> {
    let attempt = delivery.delivery_attempt();
    let retry_limit = *deps.config.retry_limit();
    let now = chrono::Utc::now().naive_utc();

    let conn = deps.db_pools.rw().get().map_err(Error::from)?;

    // Extraction is the only stage whose pre-dispatch lookups (the integration's
    // credentials, the tenant's tier for queue routing) tolerate replication lag; every
    // other stage reads and writes through the same write-pool connection so it always
    // observes its own prior writes.
    let ro_conn;
    let read_connection: &diesel::PgConnection = if matches!(queue, QueueName::Extraction(_)) {
        ro_conn = deps.db_pools.ro().get().map_err(Error::from)?;
        &ro_conn
    } else {
        &conn
    };

    let context = HandlerContext::new(cancellation_flag(&deps.cancellation, delivery.envelope()));
    let stage_deps = StageDeps {
        database_connection: &conn,
        read_connection,
        bus: deps.bus.as_ref(),
        registry: deps.registry.as_ref(),
        embedding_provider: deps.embedding_provider.as_ref(),
        vector_store: deps.vector_store.as_ref(),
        text_assembly: deps.config.text_assembly(),
        context: &context,
    };

    let result = dispatch_for_queue(queue, &stage_deps, delivery.envelope(), now, deps).await;

    match result {
        Ok(()) => delivery.ack().await,
        Err(error) => {
            report_failure(deps, delivery.envelope(), &error).await;
            if matches!(error, HandlerError::Cancelled) {
                delivery.ack().await
            } else if error.is_retryable() && attempt < retry_limit {
                delivery.nack_requeue().await
            } else {
                delivery.nack_dead_letter().await
            }
        }
    }
}

fn cancellation_flag(registry: &CancellationRegistry, envelope: &Envelope) -> crate::cancellation::CancellationFlag {
    let tenant = envelope.tenant();
    registry.get(tenant, envelope.job_id).unwrap_or_else(|| registry.reset(tenant, envelope.job_id))
}

async fn dispatch_for_queue(queue: &QueueName, stage_deps: &StageDeps<'_>, envelope: &Envelope, now: NaiveDateTime, deps: &SlotDeps) -> Result<(), HandlerError> {
    let tenant = envelope.tenant();

    match queue {
        QueueName::Extraction(_) => {
            let provider = string_field(envelope, "provider")?;
            let step_name = string_field(envelope, "step_name")?;
            let cursor = envelope.payload.get("cursor").and_then(Value::as_str).map(str::to_string);
            let integration = Integration::find(stage_deps.read_connection, tenant, envelope.integration_id).map_err(db_err)?;
            dispatch::extract_page(stage_deps, tenant, envelope.job_id, &integration, &provider, &step_name, cursor, now).await
        }
        QueueName::Transform(_) => {
            let raw_record_id = int_field(envelope, "raw_record_id")?;
            let record = RawExtractionRecord::find(stage_deps.database_connection, tenant, raw_record_id).map_err(db_err)?;
            let integration = Integration::find(stage_deps.database_connection, tenant, record.integration_id).map_err(db_err)?;
            let provider = integration.provider.clone();
            dispatch::transform_raw_record(stage_deps, tenant, &integration, &provider, raw_record_id, now).await
        }
        QueueName::Vectorization(_) => {
            let queue_item_id = int_field(envelope, "queue_item_id")?;
            dispatch::embed_item(stage_deps, tenant, queue_item_id, deps.config.embedding_default_model(), *deps.config.embedding_default_dimensions() as i32, now).await
        }
        QueueName::Orchestrator => Err(HandlerError::PoisonMessage("worker pool does not consume the orchestrator queue directly".to_string())),
    }
}

fn string_field(envelope: &Envelope, field: &str) -> Result<String, HandlerError> {
    envelope.payload.get(field).and_then(Value::as_str).map(str::to_string).ok_or_else(|| HandlerError::PoisonMessage(format!("missing `{}` field", field)))
}

fn int_field(envelope: &Envelope, field: &str) -> Result<i32, HandlerError> {
    envelope
        .payload
        .get(field)
        .and_then(Value::as_i64)
        .map(|v| v as i32)
        .ok_or_else(|| HandlerError::PoisonMessage(format!("missing `{}` field", field)))
}

fn db_err(error: anyhow::Error) -> HandlerError {
    HandlerError::TransientDb(error.to_string())
}

async fn report_failure(deps: &SlotDeps, envelope: &Envelope, error: &HandlerError) {
    let level = if error.fails_step() { ExceptionLevel::Error } else { ExceptionLevel::Warning };
    let event = ProgressEvent::Exception { level, message: error.to_string(), details: None };
    if let Err(publish_error) = deps.publisher.publish(envelope.tenant(), envelope.job_id, event).await {
        warn!("failed to publish exception event: {:#}", publish_error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_key_round_trips_through_parse() {
        for queue in [QueueName::Extraction(Tier::Enterprise), QueueName::Transform(TenantId(4)), QueueName::Vectorization(TenantId(9))] {
            let key = queue_key(&queue);
            assert_eq!(parse_queue_key(&key), Some(queue));
        }
    }

    #[test]
    fn crash_history_stays_quiet_under_threshold() {
        let history = CrashHistory::default();
        assert_eq!(history.record_and_backoff(3, Duration::from_secs(60)), Duration::ZERO);
        assert_eq!(history.record_and_backoff(3, Duration::from_secs(60)), Duration::ZERO);
    }

    #[test]
    fn crash_history_backs_off_once_threshold_reached() {
        let history = CrashHistory::default();
        for _ in 0..3 {
            history.record_and_backoff(3, Duration::from_secs(60));
        }
        assert!(history.record_and_backoff(3, Duration::from_secs(60)) > Duration::ZERO);
    }

    #[test]
    fn string_field_reports_a_poison_message_when_missing() {
        let envelope = Envelope::new(TenantId(1), 1, 1, "extraction_page", serde_json::json!({}));
        let error = string_field(&envelope, "provider").unwrap_err();
        assert!(matches!(error, HandlerError::PoisonMessage(_)));
    }
}
