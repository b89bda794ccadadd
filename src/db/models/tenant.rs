//
// Copyright (c) 2020-2022 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

use std::str::FromStr;

use anyhow::anyhow;
use anyhow::Error;
use anyhow::Result;
use diesel::prelude::*;
use diesel::PgConnection;
use serde::Deserialize;
use serde::Serialize;

use crate::db::tenant_scope::TenantId;
use crate::schema::tenants;
use crate::schema::tenants::dsl;

/// Coarse priority class controlling worker parallelism for extraction.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Basic,
    Premium,
    Enterprise,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Basic => "basic",
            Tier::Premium => "premium",
            Tier::Enterprise => "enterprise",
        }
    }

    pub fn queue_name(&self) -> String {
        format!("extraction_queue_{}", self.as_str())
    }
}

impl FromStr for Tier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "free" => Ok(Tier::Free),
            "basic" => Ok(Tier::Basic),
            "premium" => Ok(Tier::Premium),
            "enterprise" => Ok(Tier::Enterprise),
            other => Err(anyhow!("Unknown tier: {}", other)),
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Identifiable, Queryable, Clone)]
#[table_name = "tenants"]
pub struct Tenant {
    pub id: i32,
    pub uuid: uuid::Uuid,
    pub name: String,
    pub tier: String,
    pub active: bool,
    pub time_zone: String,
}

impl Tenant {
    pub fn tenant_id(&self) -> TenantId {
        TenantId(self.id)
    }

    pub fn tier(&self) -> Result<Tier> {
        Tier::from_str(&self.tier)
    }

    pub fn time_zone(&self) -> Result<chrono_tz::Tz> {
        self.time_zone
            .parse()
            .map_err(|_| anyhow!("Invalid time zone stored for tenant {}: {}", self.id, self.time_zone))
    }

    pub fn find(database_connection: &PgConnection, tenant: TenantId) -> Result<Tenant> {
        dsl::tenants
            .filter(dsl::id.eq(tenant.0))
            .first::<Tenant>(database_connection)
            .map_err(Error::from)
    }

    /// Lists all active tenants. Not tenant-scoped by construction: this is the one
    /// legitimate cross-tenant read in the system (the scheduler needs it at startup to
    /// spawn one timer per active schedule across every tenant).
    pub fn all_active(database_connection: &PgConnection) -> Result<Vec<Tenant>> {
        dsl::tenants
            .filter(dsl::active.eq(true))
            .load::<Tenant>(database_connection)
            .map_err(Error::from)
    }
}

#[derive(Insertable)]
#[table_name = "tenants"]
pub struct NewTenant<'a> {
    pub uuid: uuid::Uuid,
    pub name: &'a str,
    pub tier: &'a str,
    pub active: bool,
    pub time_zone: &'a str,
}

impl<'a> NewTenant<'a> {
    pub fn create(self, database_connection: &PgConnection) -> Result<Tenant> {
        diesel::insert_into(tenants::table)
            .values(&self)
            .get_result(database_connection)
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_round_trips_through_str() {
        for tier in [Tier::Free, Tier::Basic, Tier::Premium, Tier::Enterprise] {
            assert_eq!(Tier::from_str(tier.as_str()).unwrap(), tier);
        }
    }

    #[test]
    fn tier_queue_name_matches_naming_convention() {
        assert_eq!(Tier::Premium.queue_name(), "extraction_queue_premium");
    }

    #[test]
    fn unknown_tier_is_rejected() {
        assert!(Tier::from_str("platinum").is_err());
    }
}
