//
// Copyright (c) 2020-2022 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

//! Stage handlers: three polymorphic interfaces invoked by the worker pool
//! , registered per `(provider, step_name)` in a [`HandlerRegistry`]. The core ships
//! the registry mechanism and one illustrative in-memory fixture pair; concrete provider adapters
//! plug into the same traits.

pub mod dispatch;
pub mod fixture;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::cancellation::CancellationFlag;
use crate::db::models::domain::Project;
use crate::db::models::domain::Repository;
use crate::db::models::domain::WorkItem;
use crate::db::models::Integration;
use crate::errors::HandlerError;

/// One page of extractor output: zero or more logical records plus pagination state.
/// `last_item` is set on the final page of the step's *primary* extraction only when
/// no secondary extraction was triggered by it.
pub struct FetchedPage {
    pub records: Vec<FetchedItem>,
    pub next_cursor: Option<String>,
    pub last_item: bool,
}

/// One raw record as the extractor hands it off, before it is persisted. `record_type`
/// distinguishes payload shapes within a step (e.g. a Jira step might emit both
/// `issue` and `changelog` record types).
pub struct FetchedItem {
    pub record_type: String,
    pub payload: Value,
}

/// Fetches one page of provider data for a `(provider, step_name)` pair. Implementors
/// own all provider-specific REST/GraphQL logic; this crate only
/// defines the seam and ships [`fixture::FixtureExtractor`] as a worked example.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn fetch_page(&self, integration: &Integration, cursor: Option<&str>) -> Result<FetchedPage, HandlerError>;
}

/// One normalized row a [`Transformer`] produced from a raw record, tagged by which
/// domain table it belongs to so the generic transform dispatch (`dispatch::transform`)
/// can upsert it without knowing the provider.
pub enum ParsedRow {
    Project(ParsedProject),
    WorkItem(ParsedWorkItem),
    Repository(ParsedRepository),
}

pub struct ParsedProject {
    pub external_id: String,
    pub key: String,
    pub name: String,
    pub description: Option<String>,
}

pub struct ParsedWorkItem {
    pub external_id: String,
    pub project_external_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub work_item_type: String,
    pub status_name: String,
    pub assignee: Option<String>,
    pub raw_fields: Value,
}

pub struct ParsedRepository {
    pub external_id: String,
    pub name: String,
    pub default_branch: String,
}

impl ParsedRow {
    /// The domain table name this row upserts into, matching the keys
    /// `TextAssemblyConfig` and the embedding handler's table dispatch use.
    pub fn table_name(&self) -> &'static str {
        match self {
            ParsedRow::Project(_) => "projects",
            ParsedRow::WorkItem(_) => "work_items",
            ParsedRow::Repository(_) => "repositories",
        }
    }

    pub fn external_id(&self) -> &str {
        match self {
            ParsedRow::Project(row) => &row.external_id,
            ParsedRow::WorkItem(row) => &row.external_id,
            ParsedRow::Repository(row) => &row.external_id,
        }
    }
}

/// Parses one raw record into zero or more normalized domain rows. Implementors own all
/// provider-specific field mapping.
#[async_trait]
pub trait Transformer: Send + Sync {
    async fn parse(&self, record_type: &str, payload: &Value) -> Result<Vec<ParsedRow>, HandlerError>;
}

/// The text an [`Embedder`] needs, already loaded from whichever domain table owns the
/// vectorization queue item. `fields`/`config` drive `assemble_text`.
pub struct EmbeddableRecord {
    pub record_id: i32,
    pub text: String,
}

/// Cooperative-cancellation and provider-lookup context handed to every handler call.
/// A plain struct rather than a global: callers construct one per run and thread it
/// through explicitly, so tests can swap in a fresh cancellation flag per case.
pub struct HandlerContext {
    pub cancellation: CancellationFlag,
}

impl HandlerContext {
    pub fn new(cancellation: CancellationFlag) -> HandlerContext {
        HandlerContext { cancellation }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// One provider's step list plus its handler pairs, the unit the registry indexes.
pub struct ProviderDefinition {
    pub provider: String,
    pub steps: Vec<StepSpec>,
}

/// One step of a provider's pipeline: its display name (for the status document) and
/// the extractor/transformer pair that implements it.
pub struct StepSpec {
    pub step_name: String,
    pub display_name: String,
    pub record_type: String,
    pub extractor: Arc<dyn Extractor>,
    pub transformer: Arc<dyn Transformer>,
}

/// Registry of `(provider, step_name) -> (Extractor, Transformer)`. Built once at
/// process start from [`ProviderDefinition`]s and shared across the worker pool.
#[derive(Default)]
pub struct HandlerRegistry {
    providers: HashMap<String, ProviderDefinition>,
}

impl HandlerRegistry {
    pub fn new() -> HandlerRegistry {
        HandlerRegistry::default()
    }

    pub fn register(&mut self, definition: ProviderDefinition) {
        self.providers.insert(definition.provider.clone(), definition);
    }

    pub fn provider(&self, provider: &str) -> Option<&ProviderDefinition> {
        self.providers.get(provider)
    }

    pub fn step(&self, provider: &str, step_name: &str) -> Option<&StepSpec> {
        self.providers.get(provider)?.steps.iter().find(|step| step.step_name == step_name)
    }

    /// The ordered `(step_name, display_name)` list a provider's step list reduces to,
    /// the shape [`crate::status::document::StatusDocument::start_run`] expects.
    pub fn step_order(&self, provider: &str) -> Option<Vec<(String, String)>> {
        let definition = self.providers.get(provider)?;
        Some(definition.steps.iter().map(|step| (step.step_name.clone(), step.display_name.clone())).collect())
    }
}

/// A domain row loaded generically by table name, the shape the embedding handler needs
/// regardless of which of the three shipped domain tables it is reading from.
pub enum DomainRow {
    Project(Project),
    WorkItem(WorkItem),
    Repository(Repository),
}

impl DomainRow {
    pub fn record_id(&self) -> i32 {
        match self {
            DomainRow::Project(row) => row.id,
            DomainRow::WorkItem(row) => row.id,
            DomainRow::Repository(row) => row.id,
        }
    }

    pub fn assemble_text(&self, fields: &[String]) -> String {
        match self {
            DomainRow::Project(row) => row.assemble_text(fields),
            DomainRow::WorkItem(row) => row.assemble_text(fields),
            DomainRow::Repository(row) => row.assemble_text(fields),
        }
    }
}
