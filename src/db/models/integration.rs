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
use serde_json::Value;

use crate::db::tenant_scope::TenantId;
use crate::schema::integrations;
use crate::schema::integrations::dsl;

/// A configured connection to one external provider (Jira, GitHub, ...) for one tenant.
/// `credential_token` is an opaque reference into the secrets store, never the
/// credential itself.
#[derive(Debug, Identifiable, Queryable, Clone)]
#[table_name = "integrations"]
pub struct Integration {
    pub id: i32,
    pub tenant_id: i32,
    pub provider: String,
    pub display_name: String,
    pub credential_token: String,
    pub endpoint_config: Value,
    pub active: bool,
}

impl Integration {
    pub fn find(database_connection: &PgConnection, tenant: TenantId, id: i32) -> Result<Integration> {
        dsl::integrations
            .filter(dsl::tenant_id.eq(tenant.0))
            .filter(dsl::id.eq(id))
            .first::<Integration>(database_connection)
            .map_err(Error::from)
    }

    pub fn all_active_for_tenant(database_connection: &PgConnection, tenant: TenantId) -> Result<Vec<Integration>> {
        dsl::integrations
            .filter(dsl::tenant_id.eq(tenant.0))
            .filter(dsl::active.eq(true))
            .load::<Integration>(database_connection)
            .map_err(Error::from)
    }

    pub fn all_active_for_provider(database_connection: &PgConnection, tenant: TenantId, provider: &str) -> Result<Vec<Integration>> {
        dsl::integrations
            .filter(dsl::tenant_id.eq(tenant.0))
            .filter(dsl::provider.eq(provider))
            .filter(dsl::active.eq(true))
            .load::<Integration>(database_connection)
            .map_err(Error::from)
    }
}

#[derive(Insertable)]
#[table_name = "integrations"]
pub struct NewIntegration<'a> {
    pub tenant_id: i32,
    pub provider: &'a str,
    pub display_name: &'a str,
    pub credential_token: &'a str,
    pub endpoint_config: Value,
    pub active: bool,
}

impl<'a> NewIntegration<'a> {
    pub fn create(self, database_connection: &PgConnection) -> Result<Integration> {
        diesel::insert_into(integrations::table)
            .values(&self)
            .get_result(database_connection)
            .map_err(Error::from)
    }
}
