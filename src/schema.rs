//
// Copyright (c) 2020-2022 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

table! {
    tenants (id) {
        id -> Int4,
        uuid -> Uuid,
        name -> Varchar,
        tier -> Varchar,
        active -> Bool,
        time_zone -> Varchar,
    }
}

table! {
    integrations (id) {
        id -> Int4,
        tenant_id -> Int4,
        provider -> Varchar,
        display_name -> Varchar,
        credential_token -> Varchar,
        endpoint_config -> Jsonb,
        active -> Bool,
    }
}

table! {
    job_schedules (id) {
        id -> Int4,
        tenant_id -> Int4,
        integration_id -> Int4,
        job_name -> Varchar,
        execution_order -> Int4,
        schedule_interval_minutes -> Int4,
        last_run_started_at -> Nullable<Timestamp>,
        last_success_at -> Nullable<Timestamp>,
        next_run -> Nullable<Timestamp>,
        active -> Bool,
        status -> Jsonb,
    }
}

table! {
    raw_extraction_data (id) {
        id -> Int4,
        tenant_id -> Int4,
        integration_id -> Int4,
        job_id -> Int4,
        step_name -> Varchar,
        record_type -> Varchar,
        payload -> Jsonb,
        status -> Varchar,
        last_item -> Bool,
        error_details -> Nullable<Text>,
        created_at -> Timestamp,
    }
}

table! {
    checkpoints (id) {
        id -> Int4,
        tenant_id -> Int4,
        job_id -> Int4,
        step_name -> Varchar,
        stage -> Varchar,
        cursor_token -> Nullable<Text>,
        updated_at -> Timestamp,
    }
}

table! {
    vectorization_queue (id) {
        id -> Int4,
        tenant_id -> Int4,
        job_id -> Int4,
        step_name -> Varchar,
        table_name -> Varchar,
        external_id -> Varchar,
        operation -> Varchar,
        status -> Varchar,
        created_at -> Timestamp,
    }
}

table! {
    vector_bridge (id) {
        id -> Int4,
        tenant_id -> Int4,
        table_name -> Varchar,
        record_id -> Int4,
        external_id -> Varchar,
        embedding_model -> Varchar,
        embedding_dimensions -> Int4,
        active -> Bool,
    }
}

table! {
    projects (id) {
        id -> Int4,
        tenant_id -> Int4,
        integration_id -> Int4,
        external_id -> Varchar,
        key -> Varchar,
        name -> Varchar,
        description -> Nullable<Text>,
        active -> Bool,
    }
}

table! {
    work_items (id) {
        id -> Int4,
        tenant_id -> Int4,
        integration_id -> Int4,
        external_id -> Varchar,
        project_external_id -> Nullable<Varchar>,
        title -> Varchar,
        description -> Nullable<Text>,
        work_item_type -> Varchar,
        status_name -> Varchar,
        assignee -> Nullable<Varchar>,
        raw_fields -> Jsonb,
        active -> Bool,
    }
}

table! {
    repositories (id) {
        id -> Int4,
        tenant_id -> Int4,
        integration_id -> Int4,
        external_id -> Varchar,
        name -> Varchar,
        default_branch -> Varchar,
        active -> Bool,
    }
}

joinable!(integrations -> tenants (tenant_id));
joinable!(job_schedules -> tenants (tenant_id));
joinable!(job_schedules -> integrations (integration_id));
joinable!(raw_extraction_data -> tenants (tenant_id));
joinable!(raw_extraction_data -> integrations (integration_id));
joinable!(checkpoints -> tenants (tenant_id));
joinable!(vectorization_queue -> tenants (tenant_id));
joinable!(vector_bridge -> tenants (tenant_id));
joinable!(projects -> tenants (tenant_id));
joinable!(projects -> integrations (integration_id));
joinable!(work_items -> tenants (tenant_id));
joinable!(work_items -> integrations (integration_id));
joinable!(repositories -> tenants (tenant_id));
joinable!(repositories -> integrations (integration_id));

allow_tables_to_appear_in_same_query!(
    tenants,
    integrations,
    job_schedules,
    raw_extraction_data,
    checkpoints,
    vectorization_queue,
    vector_bridge,
    projects,
    work_items,
    repositories,
);
