//
// Copyright (c) 2020-2022 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

//! The illustrative in-memory fixture adapter pair: a worked example of the
//! `(provider, step_name)` registry mechanism and a template for a real provider,
//! exercised by the test suite and used as the "fixture provider" in end-to-end
//! scenario tests.

use async_trait::async_trait;
use serde_json::json;
use serde_json::Value;

use crate::db::models::Integration;
use crate::errors::HandlerError;
use crate::handlers::Extractor;
use crate::handlers::FetchedItem;
use crate::handlers::FetchedPage;
use crate::handlers::ParsedRow;
use crate::handlers::ParsedWorkItem;
use crate::handlers::Transformer;

/// A fixed, in-memory dataset paginated by an integer-offset cursor. Real extractors
/// fetch from a network provider; this one stands in for one so the orchestrator, the
/// worker pool, and the status state machine can be exercised end-to-end without a
/// broker or an external API.
pub struct FixtureExtractor {
    items: Vec<Value>,
    page_size: usize,
}

impl FixtureExtractor {
    pub fn new(items: Vec<Value>, page_size: usize) -> FixtureExtractor {
        FixtureExtractor { items, page_size }
    }
}

#[async_trait]
impl Extractor for FixtureExtractor {
    async fn fetch_page(&self, _integration: &Integration, cursor: Option<&str>) -> Result<FetchedPage, HandlerError> {
        let offset: usize = match cursor {
            Some(token) => token.parse().map_err(|_| HandlerError::ProviderSchema(format!("fixture cursor is not an integer offset: {}", token)))?,
            None => 0,
        };

        let end = (offset + self.page_size).min(self.items.len());
        let records = self.items[offset.min(self.items.len())..end]
            .iter()
            .map(|item| FetchedItem { record_type: "work_item".to_string(), payload: item.clone() })
            .collect::<Vec<_>>();

        let last_item = end >= self.items.len();
        let next_cursor = if last_item { None } else { Some(end.to_string()) };

        Ok(FetchedPage { records, next_cursor, last_item })
    }
}

/// Parses the fixture extractor's `work_item` payload shape into a [`ParsedWorkItem`].
pub struct FixtureTransformer;

#[async_trait]
impl Transformer for FixtureTransformer {
    async fn parse(&self, record_type: &str, payload: &Value) -> Result<Vec<ParsedRow>, HandlerError> {
        if record_type != "work_item" {
            return Err(HandlerError::ProviderSchema(format!("fixture transformer does not know record type: {}", record_type)));
        }

        if payload.get("external_id").is_none() {
            // An empty page for S1 arrives as `payload: {}` with no fields; nothing to parse.
            return Ok(Vec::new());
        }

        let external_id = payload
            .get("external_id")
            .and_then(Value::as_str)
            .ok_or_else(|| HandlerError::ProviderSchema("missing external_id".to_string()))?
            .to_string();

        let title = payload
            .get("title")
            .and_then(Value::as_str)
            .ok_or_else(|| HandlerError::ProviderSchema("missing title".to_string()))?
            .to_string();

        let status_name = payload.get("status_name").and_then(Value::as_str).unwrap_or("open").to_string();
        let work_item_type = payload.get("work_item_type").and_then(Value::as_str).unwrap_or("task").to_string();
        let description = payload.get("description").and_then(Value::as_str).map(str::to_string);
        let assignee = payload.get("assignee").and_then(Value::as_str).map(str::to_string);
        let project_external_id = payload.get("project_external_id").and_then(Value::as_str).map(str::to_string);

        Ok(vec![ParsedRow::WorkItem(ParsedWorkItem {
            external_id,
            project_external_id,
            title,
            description,
            work_item_type,
            status_name,
            assignee,
            raw_fields: payload.clone(),
        })])
    }
}

/// A convenience payload builder for tests: `{external_id, title, ...}`.
pub fn fixture_work_item(external_id: &str, title: &str) -> Value {
    json!({ "external_id": external_id, "title": title })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn integration() -> Integration {
        Integration {
            id: 1,
            tenant_id: 1,
            provider: "fixture".to_string(),
            display_name: "Fixture".to_string(),
            credential_token: "token".to_string(),
            endpoint_config: Value::Null,
            active: true,
        }
    }

    #[tokio::test]
    async fn fetch_page_paginates_and_marks_last_item() {
        let items = vec![fixture_work_item("WI-1", "a"), fixture_work_item("WI-2", "b"), fixture_work_item("WI-3", "c")];
        let extractor = FixtureExtractor::new(items, 2);

        let page1 = extractor.fetch_page(&integration(), None).await.unwrap();
        assert_eq!(page1.records.len(), 2);
        assert!(!page1.last_item);
        assert_eq!(page1.next_cursor.as_deref(), Some("2"));

        let page2 = extractor.fetch_page(&integration(), page1.next_cursor.as_deref()).await.unwrap();
        assert_eq!(page2.records.len(), 1);
        assert!(page2.last_item);
        assert_eq!(page2.next_cursor, None);
    }

    #[tokio::test]
    async fn fetch_page_on_empty_dataset_is_a_single_last_item_page() {
        let extractor = FixtureExtractor::new(Vec::new(), 50);
        let page = extractor.fetch_page(&integration(), None).await.unwrap();
        assert!(page.records.is_empty());
        assert!(page.last_item);
    }

    #[tokio::test]
    async fn transform_parses_work_item_payload() {
        let transformer = FixtureTransformer;
        let payload = fixture_work_item("WI-1", "Fix the bug");
        let rows = transformer.parse("work_item", &payload).await.unwrap();
        assert_eq!(rows.len(), 1);
        match &rows[0] {
            ParsedRow::WorkItem(row) => {
                assert_eq!(row.external_id, "WI-1");
                assert_eq!(row.title, "Fix the bug");
            }
            _ => panic!("expected a work item row"),
        }
    }

    #[tokio::test]
    async fn transform_rejects_unknown_record_type() {
        let transformer = FixtureTransformer;
        let result = transformer.parse("pull_request", &json!({})).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn transform_empty_page_payload_parses_to_no_rows() {
        let transformer = FixtureTransformer;
        let rows = transformer.parse("work_item", &json!({})).await.unwrap();
        assert!(rows.is_empty());
    }

}
