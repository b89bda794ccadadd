//
// Copyright (c) 2020-2022 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

//! The progress publisher: one push channel per `(tenant, job)`, transported over
//! Redis pub/sub. Retaining the latest progress snapshot in an in-process [`DashMap`]
//! means a new subscriber never sees a blank state during the race between
//! subscribing and the next publish.

pub mod event;

use anyhow::Error;
use anyhow::Result;
use dashmap::DashMap;
use redis::AsyncCommands;

pub use event::ExceptionLevel;
pub use event::ProgressEvent;
pub use event::ProgressSnapshot;

use crate::db::tenant_scope::TenantId;

pub type JobId = i32;

pub struct Publisher {
    client: redis::Client,
    snapshots: DashMap<(TenantId, JobId), ProgressSnapshot>,
}

impl Publisher {
    pub fn new(redis_url: &str) -> Result<Publisher> {
        let client = redis::Client::open(redis_url).map_err(Error::from)?;
        Ok(Publisher { client, snapshots: DashMap::new() })
    }

    pub fn channel_name(tenant: TenantId, job_id: JobId) -> String {
        format!("progress:{}:{}", tenant.0, job_id)
    }

    /// Publishes `event` on the `(tenant, job)` channel. If `event` is a `Progress`
    /// event, the in-process snapshot is updated first so a subscriber racing the
    /// Redis publish still observes a consistent, monotonically-fresh state.
    pub async fn publish(&self, tenant: TenantId, job_id: JobId, event: ProgressEvent) -> Result<()> {
        if let ProgressEvent::Progress { percentage, ref step } = event {
            self.snapshots.insert((tenant, job_id), ProgressSnapshot { percentage, step: step.clone() });
        }

        let payload = serde_json::to_string(&event)?;
        let mut connection = self.client.get_async_connection().await.map_err(Error::from)?;
        let _: () = connection.publish(Publisher::channel_name(tenant, job_id), payload).await.map_err(Error::from)?;
        Ok(())
    }

    /// The latest retained `progress` snapshot for `(tenant, job)`, consulted before a
    /// fresh `SUBSCRIBE` read returns to a new subscriber.
    pub fn snapshot(&self, tenant: TenantId, job_id: JobId) -> Option<ProgressSnapshot> {
        self.snapshots.get(&(tenant, job_id)).map(|entry| entry.clone())
    }

    pub fn clear_snapshot(&self, tenant: TenantId, job_id: JobId) {
        self.snapshots.remove(&(tenant, job_id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_name_is_scoped_to_tenant_and_job() {
        assert_eq!(Publisher::channel_name(TenantId(4), 17), "progress:4:17");
    }

    #[test]
    fn snapshot_is_absent_until_a_progress_event_is_recorded() {
        let publisher = Publisher::new("redis://localhost").unwrap();
        assert!(publisher.snapshot(TenantId(1), 1).is_none());

        publisher.snapshots.insert((TenantId(1), 1), ProgressSnapshot { percentage: 42, step: "issues".to_string() });
        let snapshot = publisher.snapshot(TenantId(1), 1).unwrap();
        assert_eq!(snapshot.percentage, 42);
        assert_eq!(snapshot.step, "issues");
    }
}
