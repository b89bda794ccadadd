//
// Copyright (c) 2020-2022 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

//! The embedding provider seam: turns assembled text into a fixed-width
//! vector. Real embedding APIs implement [`EmbeddingProvider`];
//! this crate ships [`FixtureEmbeddingProvider`], a deterministic stand-in the test
//! suite uses to exercise the embedding handler and the model-consistency validator
//! without a network call.

use async_trait::async_trait;

use crate::errors::HandlerError;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, HandlerError>;

    fn model_name(&self) -> &str;

    fn dimensions(&self) -> i32;
}

/// Produces a deterministic vector from a simple hash of the input text, so the same
/// text always embeds to the same vector and different text (almost certainly) embeds
/// differently — enough to exercise upsert idempotency and the consistency validator
/// without pulling in a real model.
pub struct FixtureEmbeddingProvider {
    model_name: String,
    dimensions: usize,
}

impl FixtureEmbeddingProvider {
    pub fn new(model_name: impl Into<String>, dimensions: usize) -> FixtureEmbeddingProvider {
        FixtureEmbeddingProvider { model_name: model_name.into(), dimensions }
    }
}

#[async_trait]
impl EmbeddingProvider for FixtureEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, HandlerError> {
        if text.trim().is_empty() {
            return Err(HandlerError::ProviderSchema("cannot embed empty text".to_string()));
        }

        let mut seed: u64 = 0xcbf29ce484222325;
        for byte in text.bytes() {
            seed ^= byte as u64;
            seed = seed.wrapping_mul(0x100000001b3);
        }

        let vector = (0..self.dimensions)
            .map(|index| {
                let mixed = seed.wrapping_add(index as u64).wrapping_mul(0x9e3779b97f4a7c15);
                ((mixed >> 40) as i32 % 1000) as f32 / 1000.0
            })
            .collect();

        Ok(vector)
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dimensions(&self) -> i32 {
        self.dimensions as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn embed_is_deterministic_for_the_same_text() {
        let provider = FixtureEmbeddingProvider::new("fixture-v1", 8);
        let first = provider.embed("hello world").await.unwrap();
        let second = provider.embed("hello world").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 8);
    }

    #[tokio::test]
    async fn embed_differs_for_different_text() {
        let provider = FixtureEmbeddingProvider::new("fixture-v1", 8);
        let a = provider.embed("alpha").await.unwrap();
        let b = provider.embed("beta").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn embed_rejects_empty_text() {
        let provider = FixtureEmbeddingProvider::new("fixture-v1", 8);
        assert!(provider.embed("   ").await.is_err());
    }
}
