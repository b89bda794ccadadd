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
use crate::schema::work_items;
use crate::schema::work_items::dsl;

/// A ticket/issue transformed into the common relational shape. `raw_fields`
/// retains the provider's custom-field payload verbatim, so the embedding-text
/// assembly step can draw on fields this model does not normalize.
#[derive(Debug, Identifiable, Queryable, Clone)]
#[table_name = "work_items"]
pub struct WorkItem {
    pub id: i32,
    pub tenant_id: i32,
    pub integration_id: i32,
    pub external_id: String,
    pub project_external_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub work_item_type: String,
    pub status_name: String,
    pub assignee: Option<String>,
    pub raw_fields: Value,
    pub active: bool,
}

impl WorkItem {
    pub fn find_by_external_id(database_connection: &PgConnection, tenant: TenantId, integration_id: i32, external_id: &str) -> Result<Option<WorkItem>> {
        dsl::work_items
            .filter(dsl::tenant_id.eq(tenant.0))
            .filter(dsl::integration_id.eq(integration_id))
            .filter(dsl::external_id.eq(external_id))
            .first::<WorkItem>(database_connection)
            .optional()
            .map_err(Error::from)
    }

    /// Text assembly driven by a configurable field list,
    /// so an integrator can reorder or drop fields without a code change. Unknown field
    /// names are skipped rather than erroring, so a config typo loses one line of
    /// context instead of failing the whole embedding run.
    pub fn assemble_text(&self, fields: &[String]) -> String {
        fields
            .iter()
            .filter_map(|field| match field.as_str() {
                "title" => Some(self.title.clone()),
                "description" => self.description.clone(),
                "status_name" => Some(format!("status: {}", self.status_name)),
                "work_item_type" => Some(format!("type: {}", self.work_item_type)),
                "assignee" => self.assignee.clone().map(|a| format!("assignee: {}", a)),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Insertable, AsChangeset)]
#[table_name = "work_items"]
pub struct NewWorkItem<'a> {
    pub tenant_id: i32,
    pub integration_id: i32,
    pub external_id: &'a str,
    pub project_external_id: Option<&'a str>,
    pub title: &'a str,
    pub description: Option<&'a str>,
    pub work_item_type: &'a str,
    pub status_name: &'a str,
    pub assignee: Option<&'a str>,
    pub raw_fields: Value,
    pub active: bool,
}

impl<'a> NewWorkItem<'a> {
    pub fn create_or_update(self, database_connection: &PgConnection) -> Result<WorkItem> {
        diesel::insert_into(work_items::table)
            .values(&self)
            .on_conflict_do_nothing()
            .execute(database_connection)?;

        let existing = dsl::work_items
            .filter(dsl::tenant_id.eq(self.tenant_id))
            .filter(dsl::integration_id.eq(self.integration_id))
            .filter(dsl::external_id.eq(self.external_id))
            .first::<WorkItem>(database_connection)?;

        diesel::update(dsl::work_items.filter(dsl::id.eq(existing.id)))
            .set(&self)
            .get_result(database_connection)
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> WorkItem {
        WorkItem {
            id: 1,
            tenant_id: 1,
            integration_id: 1,
            external_id: "PROJ-1".to_string(),
            project_external_id: Some("PROJ".to_string()),
            title: "Fix login bug".to_string(),
            description: Some("Users cannot log in after the last deploy.".to_string()),
            work_item_type: "bug".to_string(),
            status_name: "in_progress".to_string(),
            assignee: None,
            raw_fields: Value::Null,
            active: true,
        }
    }

    #[test]
    fn assemble_text_includes_requested_fields_in_order() {
        let fields = vec!["title".to_string(), "description".to_string(), "status_name".to_string()];
        let text = sample().assemble_text(&fields);
        assert_eq!(text, "Fix login bug\nUsers cannot log in after the last deploy.\nstatus: in_progress");
    }

    #[test]
    fn assemble_text_omits_missing_description() {
        let mut work_item = sample();
        work_item.description = None;
        let fields = vec!["title".to_string(), "description".to_string(), "status_name".to_string()];
        assert_eq!(work_item.assemble_text(&fields), "Fix login bug\nstatus: in_progress");
    }

    #[test]
    fn assemble_text_skips_unknown_field_names() {
        let fields = vec!["title".to_string(), "bogus_field".to_string()];
        assert_eq!(sample().assemble_text(&fields), "Fix login bug");
    }
}
