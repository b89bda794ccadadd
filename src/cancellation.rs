//
// Copyright (c) 2020-2022 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

//! Cooperative cancellation. A cancellation request sets a per-job flag;
//! stage handlers poll it between page boundaries and, when set, stop publishing
//! follow-on messages instead of being interrupted mid-call.
//!
//! One flag per running job rather than a single process-wide signal map, so a
//! cancellation on one tenant's job can never be observed by another's.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use dashmap::DashMap;

use crate::db::tenant_scope::TenantId;

#[derive(Clone)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// One flag per `(tenant, job)`. Handlers are handed a [`CancellationFlag`] clone
/// through their [`crate::handlers::HandlerContext`]; the registry itself is only
/// consulted by the control surface (`cancel_job`) and the orchestrator, which creates
/// a fresh flag for every run so a stale cancellation from a prior run can never leak
/// into the next one.
#[derive(Default)]
pub struct CancellationRegistry {
    flags: DashMap<(TenantId, i32), CancellationFlag>,
}

impl CancellationRegistry {
    pub fn new() -> CancellationRegistry {
        CancellationRegistry::default()
    }

    /// Creates (or resets) the flag for a job run. Called by the orchestrator at run
    /// start so each run gets an unset flag regardless of how the previous run ended.
    pub fn reset(&self, tenant: TenantId, job_id: i32) -> CancellationFlag {
        let flag = CancellationFlag(Arc::new(AtomicBool::new(false)));
        self.flags.insert((tenant, job_id), flag.clone());
        flag
    }

    pub fn get(&self, tenant: TenantId, job_id: i32) -> Option<CancellationFlag> {
        self.flags.get(&(tenant, job_id)).map(|entry| entry.clone())
    }

    /// Sets the cancellation flag for a running job. A no-op (not an error) if the job
    /// has no registered flag, i.e. it is not currently running.
    pub fn request_cancel(&self, tenant: TenantId, job_id: i32) -> bool {
        match self.flags.get(&(tenant, job_id)) {
            Some(flag) => {
                flag.cancel();
                true
            }
            None => false,
        }
    }

    pub fn clear(&self, tenant: TenantId, job_id: i32) {
        self.flags.remove(&(tenant, job_id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_flag_is_not_cancelled() {
        let registry = CancellationRegistry::new();
        let flag = registry.reset(TenantId(1), 1);
        assert!(!flag.is_cancelled());
    }

    #[test]
    fn request_cancel_sets_the_flag_held_by_the_handler() {
        let registry = CancellationRegistry::new();
        let flag = registry.reset(TenantId(1), 1);
        assert!(registry.request_cancel(TenantId(1), 1));
        assert!(flag.is_cancelled());
    }

    #[test]
    fn request_cancel_on_unknown_job_is_a_noop() {
        let registry = CancellationRegistry::new();
        assert!(!registry.request_cancel(TenantId(9), 9));
    }

    #[test]
    fn reset_clears_a_previous_run_cancellation() {
        let registry = CancellationRegistry::new();
        let first = registry.reset(TenantId(1), 1);
        first.cancel();
        let second = registry.reset(TenantId(1), 1);
        assert!(!second.is_cancelled());
    }
}
