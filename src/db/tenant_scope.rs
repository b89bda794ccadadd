//
// Copyright (c) 2020-2022 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

//! Tenant isolation primitives.
//!
//! Every read or write against a tenant-scoped table takes a [`TenantId`] as its first
//! argument. There is no query helper in this crate that operates without one: the
//! compiler rejects a call site that tries to omit it, so a query that forgets to
//! filter by tenant is a compile error, not a data leak waiting to happen.
//!
//! Hand-written SQL (the row-level lock in `job_schedule.rs`) cannot be checked by the
//! type system, so [`assert_tenant_filtered`] provides a runtime decorator for those
//! call sites: it greps the literal SQL text for the `tenant_id` column before the
//! statement is executed.

use anyhow::anyhow;
use anyhow::Result;
use serde::Deserialize;
use serde::Serialize;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct TenantId(pub i32);

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for TenantId {
    fn from(v: i32) -> Self {
        TenantId(v)
    }
}

/// Runtime guard for hand-written SQL strings that cannot carry a type-level
/// tenant parameter. Panics are not used here on purpose (a malformed query should
/// fail the request, not the process).
pub fn assert_tenant_filtered(sql: &str) -> Result<()> {
    if sql.to_lowercase().contains("tenant_id") {
        Ok(())
    } else {
        Err(anyhow!(
            "Refusing to execute a statement against a tenant-scoped table without a tenant_id filter: {}",
            sql
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_filtered_statement() {
        let sql = "SELECT * FROM job_schedules WHERE tenant_id = $1 FOR UPDATE";
        assert!(assert_tenant_filtered(sql).is_ok());
    }

    #[test]
    fn rejects_unfiltered_statement() {
        let sql = "SELECT * FROM job_schedules FOR UPDATE";
        assert!(assert_tenant_filtered(sql).is_err());
    }

    #[test]
    fn tenant_id_displays_as_integer() {
        assert_eq!(TenantId(42).to_string(), "42");
    }
}
