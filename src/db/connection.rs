//
// Copyright (c) 2020-2021 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

use anyhow::Error;
use anyhow::Result;
use diesel::pg::PgConnection;
use diesel::r2d2::ConnectionManager;
use diesel::r2d2::Pool;
use log::debug;

use crate::config::Configuration;

pub type PgPool = Pool<ConnectionManager<PgConnection>>;

/// The two connection pools every handler is handed through its handler context.
#[derive(Clone)]
pub struct DbPools {
    rw: PgPool,
    ro: PgPool,
}

impl DbPools {
    pub fn establish(config: &Configuration) -> Result<DbPools> {
        debug!("Establishing database connection pools");

        let rw = Pool::builder()
            .max_size(*config.database_pool_size())
            .connection_timeout(std::time::Duration::from_secs((*config.database_connection_timeout()).into()))
            .build(ConnectionManager::<PgConnection>::new(config.db_url_rw()))
            .map_err(Error::from)?;

        let ro = Pool::builder()
            .max_size(*config.database_pool_size())
            .connection_timeout(std::time::Duration::from_secs((*config.database_connection_timeout()).into()))
            .build(ConnectionManager::<PgConnection>::new(config.db_url_ro()))
            .map_err(Error::from)?;

        Ok(DbPools { rw, ro })
    }

    /// The write pool: used for everything except extraction's bulk provider-page reads.
    pub fn rw(&self) -> &PgPool {
        &self.rw
    }

    /// The read-replica pool: used by extraction handlers for reads that tolerate
    /// replication lag.
    pub fn ro(&self) -> &PgPool {
        &self.ro
    }
}
