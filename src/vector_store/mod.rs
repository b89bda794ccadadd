//
// Copyright (c) 2020-2022 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

//! The external vector store seam: per-tenant collection, upsert/delete
//! keyed by `(tenant_id, table_name, external_id)`, storing a vector plus a payload
//! subset of domain fields. A real vector database client
//! implements [`VectorStore`]; this crate ships [`FixtureVectorStore`], an in-memory
//! stand-in the test suite uses to exercise the embedding handler end-to-end.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use crate::db::tenant_scope::TenantId;
use crate::errors::HandlerError;

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(&self, tenant: TenantId, table_name: &str, external_id: &str, vector: Vec<f32>, payload: Value) -> Result<(), HandlerError>;

    async fn delete(&self, tenant: TenantId, table_name: &str, external_id: &str) -> Result<(), HandlerError>;
}

/// One stored record: the vector plus whatever payload subset the caller chose to
/// carry alongside it.
#[derive(Clone, Debug)]
pub struct StoredVector {
    pub vector: Vec<f32>,
    pub payload: Value,
}

/// A `DashMap`-backed stand-in for a real vector database, keyed the same way the
/// bridge table is: by `(tenant_id, table_name, external_id)`.
#[derive(Default)]
pub struct FixtureVectorStore {
    records: DashMap<(i32, String, String), StoredVector>,
}

impl FixtureVectorStore {
    pub fn new() -> FixtureVectorStore {
        FixtureVectorStore::default()
    }

    pub fn get(&self, tenant: TenantId, table_name: &str, external_id: &str) -> Option<StoredVector> {
        self.records.get(&(tenant.0, table_name.to_string(), external_id.to_string())).map(|entry| entry.clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl VectorStore for FixtureVectorStore {
    async fn upsert(&self, tenant: TenantId, table_name: &str, external_id: &str, vector: Vec<f32>, payload: Value) -> Result<(), HandlerError> {
        self.records.insert((tenant.0, table_name.to_string(), external_id.to_string()), StoredVector { vector, payload });
        Ok(())
    }

    async fn delete(&self, tenant: TenantId, table_name: &str, external_id: &str) -> Result<(), HandlerError> {
        self.records.remove(&(tenant.0, table_name.to_string(), external_id.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn upsert_then_get_round_trips() {
        let store = FixtureVectorStore::new();
        store.upsert(TenantId(1), "work_items", "WI-1", vec![0.1, 0.2], json!({"title": "a"})).await.unwrap();
        let stored = store.get(TenantId(1), "work_items", "WI-1").unwrap();
        assert_eq!(stored.vector, vec![0.1, 0.2]);
    }

    #[tokio::test]
    async fn delete_removes_the_record() {
        let store = FixtureVectorStore::new();
        store.upsert(TenantId(1), "work_items", "WI-1", vec![0.1], Value::Null).await.unwrap();
        store.delete(TenantId(1), "work_items", "WI-1").await.unwrap();
        assert!(store.get(TenantId(1), "work_items", "WI-1").is_none());
    }

    #[tokio::test]
    async fn upsert_is_tenant_scoped() {
        let store = FixtureVectorStore::new();
        store.upsert(TenantId(1), "work_items", "WI-1", vec![0.1], Value::Null).await.unwrap();
        assert!(store.get(TenantId(2), "work_items", "WI-1").is_none());
    }
}
