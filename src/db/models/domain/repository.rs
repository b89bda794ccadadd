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
use crate::schema::repositories;
use crate::schema::repositories::dsl;

/// A source-control repository transformed into the relational model.
#[derive(Debug, Identifiable, Queryable, Clone)]
#[table_name = "repositories"]
pub struct Repository {
    pub id: i32,
    pub tenant_id: i32,
    pub integration_id: i32,
    pub external_id: String,
    pub name: String,
    pub default_branch: String,
    pub active: bool,
}

impl Repository {
    pub fn find_by_external_id(database_connection: &PgConnection, tenant: TenantId, integration_id: i32, external_id: &str) -> Result<Option<Repository>> {
        dsl::repositories
            .filter(dsl::tenant_id.eq(tenant.0))
            .filter(dsl::integration_id.eq(integration_id))
            .filter(dsl::external_id.eq(external_id))
            .first::<Repository>(database_connection)
            .optional()
            .map_err(Error::from)
    }

    /// Text assembly driven by a configurable field list.
    pub fn assemble_text(&self, fields: &[String]) -> String {
        fields
            .iter()
            .filter_map(|field| match field.as_str() {
                "name" => Some(self.name.clone()),
                "default_branch" => Some(format!("default branch: {}", self.default_branch)),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Insertable, AsChangeset)]
#[table_name = "repositories"]
pub struct NewRepository<'a> {
    pub tenant_id: i32,
    pub integration_id: i32,
    pub external_id: &'a str,
    pub name: &'a str,
    pub default_branch: &'a str,
    pub active: bool,
}

impl<'a> NewRepository<'a> {
    pub fn create_or_update(self, database_connection: &PgConnection) -> Result<Repository> {
        diesel::insert_into(repositories::table)
            .values(&self)
            .on_conflict_do_nothing()
            .execute(database_connection)?;

        let existing = dsl::repositories
            .filter(dsl::tenant_id.eq(self.tenant_id))
            .filter(dsl::integration_id.eq(self.integration_id))
            .filter(dsl::external_id.eq(self.external_id))
            .first::<Repository>(database_connection)?;

        diesel::update(dsl::repositories.filter(dsl::id.eq(existing.id)))
            .set(&self)
            .get_result(database_connection)
            .map_err(Error::from)
    }
}
