//
// Copyright (c) 2020-2022 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

use crate::db::models::tenant::Tier;
use crate::db::tenant_scope::TenantId;

/// Queue naming: tier queues for extraction, tenant queues for transform and
/// embedding. Centralized here so every publisher/consumer pair agrees on the exact
/// string without repeating `format!` calls.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum QueueName {
    Extraction(Tier),
    Transform(TenantId),
    Vectorization(TenantId),
    Orchestrator,
}

impl QueueName {
    pub fn as_string(&self) -> String {
        match self {
            QueueName::Extraction(tier) => tier.queue_name(),
            QueueName::Transform(tenant) => format!("transform_queue_tenant_{}", tenant.0),
            QueueName::Vectorization(tenant) => format!("vectorization_queue_tenant_{}", tenant.0),
            QueueName::Orchestrator => "orchestrator_queue".to_string(),
        }
    }

    pub fn dead_letter_exchange(&self) -> String {
        format!("{}{}", self.as_string(), crate::consts::DEAD_LETTER_EXCHANGE_SUFFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extraction_queue_name_is_tier_scoped() {
        assert_eq!(QueueName::Extraction(Tier::Enterprise).as_string(), "extraction_queue_enterprise");
    }

    #[test]
    fn transform_queue_name_is_tenant_scoped() {
        assert_eq!(QueueName::Transform(TenantId(3)).as_string(), "transform_queue_tenant_3");
    }

    #[test]
    fn dead_letter_exchange_suffixes_the_queue_name() {
        assert_eq!(QueueName::Vectorization(TenantId(3)).dead_letter_exchange(), "vectorization_queue_tenant_3.dlx");
    }
}
