//
// Copyright (c) 2020-2022 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

//! A flat error enumeration, one discriminant per failure kind the worker pool needs to
//! treat differently. Every `Extractor`/`Transformer`/`Embedder` method returns
//! `Result<_, HandlerError>` so the worker pool can match on the discriminant to decide
//! ack/nack/dead-letter/status transition without downcasting an opaque `anyhow::Error`.

use thiserror::Error;

/// One discriminant per failure kind. The source of an error determines its
/// kind, not its call site — a provider adapter returning `HandlerError::Retryable` for
/// a 503 looks the same to the worker pool whether it came from Jira or GitHub.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Network error, 5xx, rate limit, or timeout. Bus-level retry up to `RETRY_LIMIT`.
    #[error("retryable error: {0}")]
    Retryable(String),

    /// Malformed payload or unknown message type. Dead-lettered without failing the
    /// step: a poison message is a data problem with one message, not the whole run.
    #[error("poison message: {0}")]
    PoisonMessage(String),

    /// Provider rejected credentials. Not retried; fails the step and the run.
    #[error("provider authentication failed: {0}")]
    ProviderAuth(String),

    /// Provider payload did not match the shape the transformer expects. Not retried.
    #[error("provider schema mismatch: {0}")]
    ProviderSchema(String),

    /// The embedding consistency validator rejected a write because the
    /// tenant's existing bridge rows carry a different `(model, dimensions)` pair.
    #[error("embedding model mismatch for tenant {tenant_id}: existing {existing_model}/{existing_dimensions}, attempted {attempted_model}/{attempted_dimensions}")]
    ModelMismatch {
        tenant_id: i32,
        existing_model: String,
        existing_dimensions: i32,
        attempted_model: String,
        attempted_dimensions: i32,
    },

    /// A cancellation flag was observed at a page boundary.
    #[error("job run was cancelled")]
    Cancelled,

    /// Serialization conflict or deadlock. Retried in-process up to 3 times before the
    /// caller falls back to a bus-level nack.
    #[error("transient database error: {0}")]
    TransientDb(String),
}

impl HandlerError {
    /// Whether the bus should requeue the message. Only
    /// `Retryable` and `TransientDb` (once in-process retries are exhausted) flow
    /// through the bus's own retry counter.
    pub fn is_retryable(&self) -> bool {
        matches!(self, HandlerError::Retryable(_) | HandlerError::TransientDb(_))
    }

    /// Whether this error fails the whole run (step `failed`, `overall=failed`) rather
    /// than just the one message.
    pub fn fails_step(&self) -> bool {
        matches!(self, HandlerError::ProviderAuth(_) | HandlerError::ProviderSchema(_))
    }

    /// A redacted, user-facing summary: step name, stage, and one sentence of cause.
    /// Provider payloads are never echoed verbatim, so this formats only the
    /// enum's own message, never a field pulled from the raw extraction payload.
    pub fn user_message(&self, step_name: &str, stage: &str) -> String {
        format!("{}/{}: {}", step_name, stage, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_and_transient_db_are_retryable() {
        assert!(HandlerError::Retryable("503".to_string()).is_retryable());
        assert!(HandlerError::TransientDb("deadlock".to_string()).is_retryable());
        assert!(!HandlerError::PoisonMessage("bad json".to_string()).is_retryable());
    }

    #[test]
    fn auth_and_schema_errors_fail_the_step() {
        assert!(HandlerError::ProviderAuth("401".to_string()).fails_step());
        assert!(HandlerError::ProviderSchema("missing field".to_string()).fails_step());
        assert!(!HandlerError::Cancelled.fails_step());
    }

    #[test]
    fn user_message_includes_step_and_stage_but_not_raw_payload() {
        let error = HandlerError::ProviderAuth("token rejected by upstream".to_string());
        let message = error.user_message("issues", "extraction");
        assert!(message.contains("issues/extraction"));
        assert!(message.contains("token rejected"));
    }
}
