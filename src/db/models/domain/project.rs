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
use crate::schema::projects;
use crate::schema::projects::dsl;

/// A project/board in the source system (a Jira project, a GitHub org), transformed
/// into the relational model.
#[derive(Debug, Identifiable, Queryable, Clone)]
#[table_name = "projects"]
pub struct Project {
    pub id: i32,
    pub tenant_id: i32,
    pub integration_id: i32,
    pub external_id: String,
    pub key: String,
    pub name: String,
    pub description: Option<String>,
    pub active: bool,
}

impl Project {
    pub fn find_by_external_id(database_connection: &PgConnection, tenant: TenantId, integration_id: i32, external_id: &str) -> Result<Option<Project>> {
        dsl::projects
            .filter(dsl::tenant_id.eq(tenant.0))
            .filter(dsl::integration_id.eq(integration_id))
            .filter(dsl::external_id.eq(external_id))
            .first::<Project>(database_connection)
            .optional()
            .map_err(Error::from)
    }

    /// Text assembly driven by a configurable field list.
    pub fn assemble_text(&self, fields: &[String]) -> String {
        fields
            .iter()
            .filter_map(|field| match field.as_str() {
                "name" => Some(self.name.clone()),
                "key" => Some(format!("key: {}", self.key)),
                "description" => self.description.clone(),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Insertable, AsChangeset)]
#[table_name = "projects"]
pub struct NewProject<'a> {
    pub tenant_id: i32,
    pub integration_id: i32,
    pub external_id: &'a str,
    pub key: &'a str,
    pub name: &'a str,
    pub description: Option<&'a str>,
    pub active: bool,
}

impl<'a> NewProject<'a> {
    /// Upserts on the natural key (tenant, integration, external id), the same
    /// insert-then-fetch idiom the rest of this module's siblings use for create-only
    /// rows, extended with an `AsChangeset` update for fields the source system may
    /// have edited since the last extraction pass.
    pub fn create_or_update(self, database_connection: &PgConnection) -> Result<Project> {
        diesel::insert_into(projects::table)
            .values(&self)
            .on_conflict_do_nothing()
            .execute(database_connection)?;

        let existing = dsl::projects
            .filter(dsl::tenant_id.eq(self.tenant_id))
            .filter(dsl::integration_id.eq(self.integration_id))
            .filter(dsl::external_id.eq(self.external_id))
            .first::<Project>(database_connection)?;

        diesel::update(dsl::projects.filter(dsl::id.eq(existing.id)))
            .set(&self)
            .get_result(database_connection)
            .map_err(Error::from)
    }
}
