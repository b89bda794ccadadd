//
// Copyright (c) 2020-2022 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

//! Generic stage dispatch: the three functions the worker pool calls for
//! every delivered message, one per stage. These functions own the read-parse-write
//! cycle around a registered [`Extractor`]/[`Transformer`]/[`EmbeddingProvider`] call;
//! they never touch the bus's ack/nack handle directly, and they
//! never know which provider they're running — that comes entirely from the registry
//! lookup keyed by `(provider, step_name)`.

use chrono::NaiveDateTime;
use diesel::PgConnection;
use serde_json::json;
use serde_json::Value;

use crate::bus::Envelope;
use crate::bus::MessageBus;
use crate::bus::QueueName;
use crate::config::TextAssemblyConfig;
use crate::db::models::domain::Project;
use crate::db::models::domain::Repository;
use crate::db::models::domain::WorkItem;
use crate::db::models::Checkpoint;
use crate::db::models::Integration;
use crate::db::models::JobSchedule;
use crate::db::models::NewVectorBridge;
use crate::db::models::RawExtractionRecord;
use crate::db::models::Tenant;
use crate::db::models::VectorBridge;
use crate::db::tenant_scope::TenantId;
use crate::embedding::EmbeddingProvider;
use crate::errors::HandlerError;
use crate::handlers::DomainRow;
use crate::handlers::HandlerContext;
use crate::handlers::HandlerRegistry;
use crate::handlers::ParsedProject;
use crate::handlers::ParsedRepository;
use crate::handlers::ParsedRow;
use crate::handlers::ParsedWorkItem;
use crate::orchestrator;
use crate::status::document::OverallState;
use crate::status::transitions::Stage;
use crate::vector_store::VectorStore;

/// The collaborators every dispatch function needs, bundled so call sites (the worker
/// pool's per-message poll loop) don't thread six parameters through on every call.
pub struct StageDeps<'a> {
    pub database_connection: &'a PgConnection,
    /// Read-replica connection for lookups that tolerate replication lag. The worker
    /// pool hands this in from `DbPools::ro()` for the extraction stage (the only
    /// stage with reads that don't need to observe the handler's own writes) and
    /// aliases it to `database_connection` for every other stage.
    pub read_connection: &'a PgConnection,
    pub bus: &'a dyn MessageBus,
    pub registry: &'a HandlerRegistry,
    pub embedding_provider: &'a dyn EmbeddingProvider,
    pub vector_store: &'a dyn VectorStore,
    pub text_assembly: &'a TextAssemblyConfig,
    pub context: &'a HandlerContext,
}

fn db_err(error: anyhow::Error) -> HandlerError {
    HandlerError::TransientDb(error.to_string())
}

fn bus_err(error: anyhow::Error) -> HandlerError {
    HandlerError::Retryable(error.to_string())
}

/// Fetches one page for `(provider, step_name)`, persists it as raw records, and
/// publishes the follow-on messages.
pub async fn extract_page(
    deps: &StageDeps<'_>,
    tenant: TenantId,
    job_id: i32,
    integration: &Integration,
    provider: &str,
    step_name: &str,
    cursor: Option<String>,
    now: NaiveDateTime,
) -> Result<(), HandlerError> {
    if deps.context.is_cancelled() {
        orchestrator::on_cancelled(deps.database_connection, tenant, job_id, step_name).map_err(db_err)?;
        return Err(HandlerError::Cancelled);
    }

    let step = deps
        .registry
        .step(provider, step_name)
        .ok_or_else(|| HandlerError::ProviderSchema(format!("no handler registered for {}/{}", provider, step_name)))?;

    let page = step.extractor.fetch_page(integration, cursor.as_deref()).await?;

    let mut created_ids = Vec::new();

    if page.records.is_empty() {
        let record = crate::db::models::NewRawExtractionRecord {
            tenant_id: tenant.0,
            integration_id: integration.id,
            job_id,
            step_name,
            record_type: &step.record_type,
            payload: Value::Object(serde_json::Map::new()),
            status: crate::db::models::RawRecordStatus::Pending.as_str(),
            last_item: page.last_item,
            created_at: now,
        }
        .create(deps.database_connection)
        .map_err(db_err)?;
        created_ids.push(record.id);
    } else {
        let last_index = page.records.len() - 1;
        for (index, item) in page.records.into_iter().enumerate() {
            let record = crate::db::models::NewRawExtractionRecord {
                tenant_id: tenant.0,
                integration_id: integration.id,
                job_id,
                step_name,
                record_type: &item.record_type,
                payload: item.payload,
                status: crate::db::models::RawRecordStatus::Pending.as_str(),
                last_item: page.last_item && index == last_index,
                created_at: now,
            }
            .create(deps.database_connection)
            .map_err(db_err)?;
            created_ids.push(record.id);
        }
    }

    if page.last_item {
        Checkpoint::clear(deps.database_connection, tenant, job_id, step_name, "extraction").map_err(db_err)?;
    } else {
        // Write-before-publish: the checkpoint must land before the continuation
        // message so a crash in between only replays a page, never skips one.
        Checkpoint::upsert(deps.database_connection, tenant, job_id, step_name, "extraction", page.next_cursor.as_deref(), now).map_err(db_err)?;
    }

    let transform_queue = QueueName::Transform(tenant);
    for raw_record_id in &created_ids {
        let envelope = Envelope::new(tenant, job_id, integration.id, "transform_raw_record", json!({ "raw_record_id": raw_record_id }));
        deps.bus.publish(&transform_queue, &envelope).await.map_err(bus_err)?;
    }

    if !page.last_item {
        let tenant_row = Tenant::find(deps.read_connection, tenant).map_err(db_err)?;
        let tier = tenant_row.tier().map_err(db_err)?;
        let extraction_queue = QueueName::Extraction(tier);
        let envelope = Envelope::new(
            tenant,
            job_id,
            integration.id,
            "extraction_page",
            json!({ "provider": provider, "step_name": step_name, "cursor": page.next_cursor }),
        );
        deps.bus.publish(&extraction_queue, &envelope).await.map_err(bus_err)?;
    }

    Ok(())
}

/// Parses one raw record into domain rows, upserts them, enqueues vectorization work,
/// and drives the status transitions that follow from `last_item`.
pub async fn transform_raw_record(deps: &StageDeps<'_>, tenant: TenantId, integration: &Integration, provider: &str, raw_record_id: i32, now: NaiveDateTime) -> Result<(), HandlerError> {
    let record = RawExtractionRecord::find(deps.database_connection, tenant, raw_record_id).map_err(db_err)?;

    if deps.context.is_cancelled() {
        orchestrator::on_cancelled(deps.database_connection, tenant, record.job_id, &record.step_name).map_err(db_err)?;
        return Err(HandlerError::Cancelled);
    }

    let step = deps
        .registry
        .step(provider, &record.step_name)
        .ok_or_else(|| HandlerError::ProviderSchema(format!("no handler registered for {}/{}", provider, record.step_name)))?;

    let rows = match step.transformer.parse(&record.record_type, &record.payload).await {
        Ok(rows) => rows,
        Err(error) => {
            RawExtractionRecord::mark_failed(deps.database_connection, tenant, record.id, &error.to_string()).map_err(db_err)?;
            if error.fails_step() {
                orchestrator::on_stage_failed(deps.database_connection, tenant, record.job_id, &record.step_name, Stage::Transform).map_err(db_err)?;
            }
            return Err(error);
        }
    };

    let vectorization_queue = QueueName::Vectorization(tenant);
    let mut enqueued_any = false;

    for row in rows {
        let table_name = row.table_name();
        let external_id = row.external_id().to_string();

        upsert_parsed_row(deps.database_connection, tenant, integration.id, row).map_err(db_err)?;

        let queue_item = crate::db::models::NewVectorizationQueueItem {
            tenant_id: tenant.0,
            job_id: record.job_id,
            step_name: &record.step_name,
            table_name,
            external_id: &external_id,
            operation: crate::db::models::Operation::Upsert.as_str(),
            status: crate::db::models::QueueItemStatus::Pending.as_str(),
            created_at: now,
        }
        .create(deps.database_connection)
        .map_err(db_err)?;

        enqueued_any = true;

        let envelope = Envelope::new(tenant, record.job_id, integration.id, "embed_queue_item", json!({ "queue_item_id": queue_item.id }));
        deps.bus.publish(&vectorization_queue, &envelope).await.map_err(bus_err)?;
    }

    RawExtractionRecord::mark_transformed(deps.database_connection, tenant, record.id).map_err(db_err)?;

    if enqueued_any {
        orchestrator::on_embedding_item_enqueued(deps.database_connection, tenant, record.job_id, &record.step_name).map_err(db_err)?;
    }

    if record.last_item {
        orchestrator::on_last_item_transformed(deps.database_connection, tenant, record.job_id, &record.step_name).map_err(db_err)?;
        advance_if_drained(deps, tenant, record.job_id, &record.step_name, now).await?;
    }

    Ok(())
}

/// Dequeues one vectorization item, embeds and stores its text, and drives the status
/// transitions that follow from the queue draining to zero.
pub async fn embed_item(deps: &StageDeps<'_>, tenant: TenantId, queue_item_id: i32, embedding_default_model: &str, embedding_default_dimensions: i32, now: NaiveDateTime) -> Result<(), HandlerError> {
    let item = crate::db::models::VectorizationQueueItem::find(deps.database_connection, tenant, queue_item_id).map_err(db_err)?;

    // At-least-once delivery can redeliver a queue item whose ack was lost after
    // it was already embedded; re-processing it would double-call the embedding
    // provider for no benefit, so a non-pending item is a no-op rather than an error.
    if !matches!(item.status().map_err(db_err)?, crate::db::models::QueueItemStatus::Pending) {
        return Ok(());
    }

    if deps.context.is_cancelled() {
        orchestrator::on_cancelled(deps.database_connection, tenant, item.job_id, &item.step_name).map_err(db_err)?;
        return Err(HandlerError::Cancelled);
    }

    let result = embed_item_inner(deps, tenant, &item, embedding_default_model, embedding_default_dimensions).await;

    match &result {
        Ok(()) => {
            crate::db::models::VectorizationQueueItem::mark_embedded(deps.database_connection, tenant, item.id).map_err(db_err)?;
        }
        Err(error) => {
            crate::db::models::VectorizationQueueItem::mark_failed(deps.database_connection, tenant, item.id).map_err(db_err)?;
            if matches!(error, HandlerError::ModelMismatch { .. }) {
                //: a mismatch fails this one item; the step's embedding stage is only
                // marked failed once the run owner resolves the mismatch (migration is
                // an explicit operation outside this handler's scope), so no
                // `on_stage_failed` call here.
            } else if error.fails_step() {
                orchestrator::on_stage_failed(deps.database_connection, tenant, item.job_id, &item.step_name, Stage::Embedding).map_err(db_err)?;
            }
        }
    }

    advance_if_drained(deps, tenant, item.job_id, &item.step_name, now).await?;

    result
}

async fn embed_item_inner(deps: &StageDeps<'_>, tenant: TenantId, item: &crate::db::models::VectorizationQueueItem, embedding_default_model: &str, embedding_default_dimensions: i32) -> Result<(), HandlerError> {
    let operation = item.operation().map_err(db_err)?;

    if matches!(operation, crate::db::models::Operation::Delete) {
        deps.vector_store.delete(tenant, &item.table_name, &item.external_id).await?;
        return Ok(());
    }

    let domain_row = load_domain_row(deps.database_connection, tenant, &item.table_name, &item.external_id)?
        .ok_or_else(|| HandlerError::PoisonMessage(format!("no {} row for external_id {}", item.table_name, item.external_id)))?;

    let fields = deps.text_assembly.get(&item.table_name).cloned().unwrap_or_default();
    let text = domain_row.assemble_text(&fields);

    let existing_model = VectorBridge::current_model(deps.database_connection, tenant).map_err(db_err)?;
    let (model_name, dimensions) = match &existing_model {
        Some((model, dimensions)) => (model.clone(), *dimensions),
        None => (embedding_default_model.to_string(), embedding_default_dimensions),
    };

    if let Some((existing_model, existing_dimensions)) = &existing_model {
        let attempted_model = deps.embedding_provider.model_name();
        let attempted_dimensions = deps.embedding_provider.dimensions();
        if existing_model != attempted_model || *existing_dimensions != attempted_dimensions {
            return Err(HandlerError::ModelMismatch {
                tenant_id: tenant.0,
                existing_model: existing_model.clone(),
                existing_dimensions: *existing_dimensions,
                attempted_model: attempted_model.to_string(),
                attempted_dimensions,
            });
        }
    }

    let vector = deps.embedding_provider.embed(&text).await?;

    deps.vector_store.upsert(tenant, &item.table_name, &item.external_id, vector, json!({ "text": text })).await?;

    NewVectorBridge {
        tenant_id: tenant.0,
        table_name: &item.table_name,
        record_id: domain_row.record_id(),
        external_id: &item.external_id,
        embedding_model: &model_name,
        embedding_dimensions: dimensions,
        active: true,
    }
    .create_or_fetch(deps.database_connection)
    .map_err(db_err)?;

    Ok(())
}

/// Checks whether the vectorization queue for this step has drained and, if so,
/// advances the run: seeds the next step's extraction or, on the final step, records
/// the successful completion.
async fn advance_if_drained(deps: &StageDeps<'_>, tenant: TenantId, job_id: i32, step_name: &str, now: NaiveDateTime) -> Result<(), HandlerError> {
    let (document, next_step) = orchestrator::maybe_drain_embedding(deps.database_connection, tenant, job_id, step_name).map_err(db_err)?;

    match next_step {
        Some(next_step_name) => {
            let schedule = JobSchedule::find(deps.database_connection, tenant, job_id).map_err(db_err)?;
            let integration = Integration::find(deps.database_connection, tenant, schedule.integration_id).map_err(db_err)?;
            let tenant_row = Tenant::find(deps.database_connection, tenant).map_err(db_err)?;
            let tier = tenant_row.tier().map_err(db_err)?;
            let extraction_queue = QueueName::Extraction(tier);
            let envelope = Envelope::new(
                tenant,
                job_id,
                integration.id,
                "extraction_page",
                json!({ "provider": integration.provider, "step_name": next_step_name, "cursor": Value::Null }),
            );
            deps.bus.publish(&extraction_queue, &envelope).await.map_err(bus_err)?;
        }
        None => {
            if matches!(document.overall, OverallState::Finished) {
                let schedule = JobSchedule::find(deps.database_connection, tenant, job_id).map_err(db_err)?;
                orchestrator::finish_run_successfully(deps.database_connection, tenant, job_id, schedule.schedule_interval_minutes, now).map_err(db_err)?;
            }
        }
    }

    Ok(())
}

fn upsert_parsed_row(database_connection: &PgConnection, tenant: TenantId, integration_id: i32, row: ParsedRow) -> anyhow::Result<()> {
    match row {
        ParsedRow::Project(ParsedProject { external_id, key, name, description }) => {
            crate::db::models::domain::project::NewProject {
                tenant_id: tenant.0,
                integration_id,
                external_id: &external_id,
                key: &key,
                name: &name,
                description: description.as_deref(),
                active: true,
            }
            .create_or_update(database_connection)?;
        }
        ParsedRow::WorkItem(ParsedWorkItem {
            external_id,
            project_external_id,
            title,
            description,
            work_item_type,
            status_name,
            assignee,
            raw_fields,
        }) => {
            crate::db::models::domain::work_item::NewWorkItem {
                tenant_id: tenant.0,
                integration_id,
                external_id: &external_id,
                project_external_id: project_external_id.as_deref(),
                title: &title,
                description: description.as_deref(),
                work_item_type: &work_item_type,
                status_name: &status_name,
                assignee: assignee.as_deref(),
                raw_fields,
                active: true,
            }
            .create_or_update(database_connection)?;
        }
        ParsedRow::Repository(ParsedRepository { external_id, name, default_branch }) => {
            crate::db::models::domain::repository::NewRepository {
                tenant_id: tenant.0,
                integration_id,
                external_id: &external_id,
                name: &name,
                default_branch: &default_branch,
                active: true,
            }
            .create_or_update(database_connection)?;
        }
    }

    Ok(())
}

fn load_domain_row(database_connection: &PgConnection, tenant: TenantId, table_name: &str, external_id: &str) -> Result<Option<DomainRow>, HandlerError> {
    // The embedding queue item only names the table, not the integration, so lookups
    // here scan across the tenant's integrations for this provider-agnostic table
    // rather than filtering by integration_id, same as the bridge table itself does.
    match table_name {
        "projects" => find_project_any_integration(database_connection, tenant, external_id).map(|row| row.map(DomainRow::Project)).map_err(db_err),
        "work_items" => find_work_item_any_integration(database_connection, tenant, external_id).map(|row| row.map(DomainRow::WorkItem)).map_err(db_err),
        "repositories" => find_repository_any_integration(database_connection, tenant, external_id).map(|row| row.map(DomainRow::Repository)).map_err(db_err),
        other => Err(HandlerError::PoisonMessage(format!("unknown domain table: {}", other))),
    }
}

fn find_project_any_integration(database_connection: &PgConnection, tenant: TenantId, external_id: &str) -> anyhow::Result<Option<Project>> {
    use diesel::prelude::*;

    use crate::schema::projects::dsl;
    dsl::projects
        .filter(dsl::tenant_id.eq(tenant.0))
        .filter(dsl::external_id.eq(external_id))
        .first::<Project>(database_connection)
        .optional()
        .map_err(anyhow::Error::from)
}

fn find_work_item_any_integration(database_connection: &PgConnection, tenant: TenantId, external_id: &str) -> anyhow::Result<Option<WorkItem>> {
    use diesel::prelude::*;

    use crate::schema::work_items::dsl;
    dsl::work_items
        .filter(dsl::tenant_id.eq(tenant.0))
        .filter(dsl::external_id.eq(external_id))
        .first::<WorkItem>(database_connection)
        .optional()
        .map_err(anyhow::Error::from)
}

fn find_repository_any_integration(database_connection: &PgConnection, tenant: TenantId, external_id: &str) -> anyhow::Result<Option<Repository>> {
    use diesel::prelude::*;

    use crate::schema::repositories::dsl;
    dsl::repositories
        .filter(dsl::tenant_id.eq(tenant.0))
        .filter(dsl::external_id.eq(external_id))
        .first::<Repository>(database_connection)
        .optional()
        .map_err(anyhow::Error::from)
}
