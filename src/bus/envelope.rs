//
// Copyright (c) 2020-2022 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::db::tenant_scope::TenantId;

/// The envelope every bus message carries regardless of queue or stage: a
/// required `{tenant_id, job_id, integration_id, type}` header plus a stage-specific
/// payload bag. Deserializing stage-specific fields out of `payload` is the
/// responsibility of the handler that owns that message `type`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    pub tenant_id: i32,
    pub job_id: i32,
    pub integration_id: i32,
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(flatten)]
    pub payload: Value,
}

impl Envelope {
    pub fn new(tenant: TenantId, job_id: i32, integration_id: i32, message_type: impl Into<String>, payload: Value) -> Envelope {
        Envelope { tenant_id: tenant.0, job_id, integration_id, message_type: message_type.into(), payload }
    }

    pub fn tenant(&self) -> TenantId {
        TenantId(self.tenant_id)
    }

    /// The idempotency key `(tenant_id, type, external_id, stage)`, present
    /// when the message carries an `external_id` and `stage` field, `None` otherwise
    /// (messages without a natural external id, such as scheduler seed messages, have
    /// no idempotency key and rely on at-least-once delivery alone).
    pub fn idempotency_key(&self) -> Option<String> {
        let external_id = self.payload.get("external_id")?.as_str()?;
        let stage = self.payload.get("stage")?.as_str()?;
        Some(format!("{}:{}:{}:{}", self.tenant_id, self.message_type, external_id, stage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn idempotency_key_requires_external_id_and_stage() {
        let envelope = Envelope::new(TenantId(1), 2, 3, "extraction_page", json!({"cursor": "abc"}));
        assert_eq!(envelope.idempotency_key(), None);

        let envelope = Envelope::new(TenantId(1), 2, 3, "extraction_page", json!({"external_id": "PROJ-1", "stage": "extraction"}));
        assert_eq!(envelope.idempotency_key(), Some("1:extraction_page:PROJ-1:extraction".to_string()));
    }

    #[test]
    fn envelope_round_trips_through_json() {
        let envelope = Envelope::new(TenantId(5), 9, 1, "transform_raw_record", json!({"raw_record_id": 42}));
        let serialized = serde_json::to_string(&envelope).unwrap();
        let deserialized: Envelope = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized.tenant_id, 5);
        assert_eq!(deserialized.payload.get("raw_record_id").unwrap(), 42);
    }
}
