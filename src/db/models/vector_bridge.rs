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
use diesel::prelude::*;
use diesel::PgConnection;

use crate::db::tenant_scope::TenantId;
use crate::schema::vector_bridge;
use crate::schema::vector_bridge::dsl;

/// Tracks which (model, dimensions) pair backs the embeddings for one domain record,
/// so the consistency check ("a tenant's embedded records must all share one model and
/// one dimensionality, or the mismatching record fails with ModelMismatch") has
/// something to compare new embedding requests against.
#[derive(Debug, Identifiable, Queryable, Clone)]
#[table_name = "vector_bridge"]
pub struct VectorBridge {
    pub id: i32,
    pub tenant_id: i32,
    pub table_name: String,
    pub record_id: i32,
    pub external_id: String,
    pub embedding_model: String,
    pub embedding_dimensions: i32,
    pub active: bool,
}

impl VectorBridge {
    /// Returns the (model, dimensions) pair currently in force for a tenant, if any
    /// record has been embedded yet. `None` means the tenant is free to pick any model
    /// for its first embedding.
    pub fn current_model(database_connection: &PgConnection, tenant: TenantId) -> Result<Option<(String, i32)>> {
        dsl::vector_bridge
            .filter(dsl::tenant_id.eq(tenant.0))
            .filter(dsl::active.eq(true))
            .select((dsl::embedding_model, dsl::embedding_dimensions))
            .first::<(String, i32)>(database_connection)
            .optional()
            .map_err(Error::from)
    }

    pub fn find_by_record(database_connection: &PgConnection, tenant: TenantId, table_name: &str, record_id: i32) -> Result<Option<VectorBridge>> {
        dsl::vector_bridge
            .filter(dsl::tenant_id.eq(tenant.0))
            .filter(dsl::table_name.eq(table_name))
            .filter(dsl::record_id.eq(record_id))
            .first::<VectorBridge>(database_connection)
            .optional()
            .map_err(Error::from)
    }
}

#[derive(Insertable)]
#[table_name = "vector_bridge"]
pub struct NewVectorBridge<'a> {
    pub tenant_id: i32,
    pub table_name: &'a str,
    pub record_id: i32,
    pub external_id: &'a str,
    pub embedding_model: &'a str,
    pub embedding_dimensions: i32,
    pub active: bool,
}

impl<'a> NewVectorBridge<'a> {
    pub fn create_or_fetch(self, database_connection: &PgConnection) -> Result<VectorBridge> {
        diesel::insert_into(vector_bridge::table)
            .values(&self)
            .on_conflict_do_nothing()
            .execute(database_connection)?;

        dsl::vector_bridge
            .filter(dsl::tenant_id.eq(self.tenant_id))
            .filter(dsl::table_name.eq(self.table_name))
            .filter(dsl::record_id.eq(self.record_id))
            .first::<VectorBridge>(database_connection)
            .map_err(Error::from)
    }
}
