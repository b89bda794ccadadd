//
// Copyright (c) 2020-2022 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

//! An in-memory [`MessageBus`] implementation for tests and for the illustrative
//! fixture handler pair in [`crate::handlers::fixture`]. Delivery attempt counting and
//! dead-lettering are modeled faithfully enough to exercise the worker pool's retry
//! logic without a running broker.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use crate::bus::envelope::Envelope;
use crate::bus::queue_name::QueueName;
use crate::bus::Delivery;
use crate::bus::MessageBus;

/// Retries under this many attempts are requeued; at or above it they are dead-lettered.
/// The bus trait itself has no notion of a retry limit (that is worker-pool policy), so
/// the fixture bakes in a fixed ceiling generous enough for every test in this crate.
const FIXTURE_RETRY_LIMIT: u16 = 5;

struct QueuedMessage {
    envelope: Envelope,
    attempt: u16,
}

#[derive(Default)]
struct FixtureState {
    queues: Mutex<HashMap<String, VecDeque<QueuedMessage>>>,
    dead_letters: Mutex<HashMap<String, Vec<Envelope>>>,
}

#[derive(Default)]
pub struct FixtureBus {
    state: Arc<FixtureState>,
}

impl FixtureBus {
    pub fn new() -> FixtureBus {
        FixtureBus::default()
    }

    pub fn dead_lettered(&self, queue: &QueueName) -> Vec<Envelope> {
        self.state.dead_letters.lock().unwrap().get(&queue.as_string()).cloned().unwrap_or_default()
    }

    pub fn depth(&self, queue: &QueueName) -> usize {
        self.state.queues.lock().unwrap().get(&queue.as_string()).map(VecDeque::len).unwrap_or(0)
    }
}

#[async_trait]
impl MessageBus for FixtureBus {
    async fn declare_queue(&self, queue: &QueueName) -> Result<()> {
        self.state.queues.lock().unwrap().entry(queue.as_string()).or_default();
        Ok(())
    }

    async fn publish(&self, queue: &QueueName, envelope: &Envelope) -> Result<()> {
        self.state
            .queues
            .lock()
            .unwrap()
            .entry(queue.as_string())
            .or_default()
            .push_back(QueuedMessage { envelope: envelope.clone(), attempt: 1 });
        Ok(())
    }

    async fn poll(&self, queue: &QueueName) -> Result<Option<Box<dyn Delivery>>> {
        let message = self.state.queues.lock().unwrap().get_mut(&queue.as_string()).and_then(VecDeque::pop_front);

        Ok(message.map(|message| {
            Box::new(FixtureDelivery {
                state: self.state.clone(),
                queue: queue.clone(),
                envelope: message.envelope,
                attempt: message.attempt,
            }) as Box<dyn Delivery>
        }))
    }
}

struct FixtureDelivery {
    state: Arc<FixtureState>,
    queue: QueueName,
    envelope: Envelope,
    attempt: u16,
}

#[async_trait]
impl Delivery for FixtureDelivery {
    fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    fn delivery_attempt(&self) -> u16 {
        self.attempt
    }

    async fn ack(self: Box<Self>) -> Result<()> {
        Ok(())
    }

    async fn nack_requeue(self: Box<Self>) -> Result<()> {
        if self.attempt >= FIXTURE_RETRY_LIMIT {
            self.state.dead_letters.lock().unwrap().entry(self.queue.dead_letter_exchange()).or_default().push(self.envelope);
        } else {
            self.state
                .queues
                .lock()
                .unwrap()
                .entry(self.queue.as_string())
                .or_default()
                .push_back(QueuedMessage { envelope: self.envelope, attempt: self.attempt + 1 });
        }
        Ok(())
    }

    async fn nack_dead_letter(self: Box<Self>) -> Result<()> {
        self.state.dead_letters.lock().unwrap().entry(self.queue.dead_letter_exchange()).or_default().push(self.envelope);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tenant_scope::TenantId;
    use serde_json::json;

    #[tokio::test]
    async fn publish_then_poll_round_trips_a_message() {
        let bus = FixtureBus::new();
        let queue = QueueName::Orchestrator;
        bus.declare_queue(&queue).await.unwrap();

        let envelope = Envelope::new(TenantId(1), 1, 1, "seed", json!({}));
        bus.publish(&queue, &envelope).await.unwrap();

        let delivery = bus.poll(&queue).await.unwrap().expect("message should be present");
        assert_eq!(delivery.envelope().tenant_id, 1);
        assert_eq!(delivery.delivery_attempt(), 1);
        delivery.ack().await.unwrap();

        assert!(bus.poll(&queue).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn nack_requeue_dead_letters_after_retry_limit() {
        let bus = FixtureBus::new();
        let queue = QueueName::Orchestrator;
        bus.declare_queue(&queue).await.unwrap();
        let envelope = Envelope::new(TenantId(1), 1, 1, "seed", json!({}));

        for _ in 0..FIXTURE_RETRY_LIMIT {
            bus.publish(&queue, &envelope).await.unwrap();
            let delivery = bus.poll(&queue).await.unwrap().unwrap();
            delivery.nack_requeue().await.unwrap();
        }

        assert_eq!(bus.dead_lettered(&queue).len(), 1);
        assert_eq!(bus.depth(&queue), 0);
    }

    #[tokio::test]
    async fn nack_requeue_requeues_under_retry_limit() {
        let bus = FixtureBus::new();
        let queue = QueueName::Orchestrator;
        bus.declare_queue(&queue).await.unwrap();
        let envelope = Envelope::new(TenantId(1), 1, 1, "seed", json!({}));
        bus.publish(&queue, &envelope).await.unwrap();

        let delivery = bus.poll(&queue).await.unwrap().unwrap();
        assert_eq!(delivery.delivery_attempt(), 1);
        delivery.nack_requeue().await.unwrap();

        assert_eq!(bus.depth(&queue), 1);
        assert!(bus.dead_lettered(&queue).is_empty());
        let redelivered = bus.poll(&queue).await.unwrap().unwrap();
        assert_eq!(redelivered.delivery_attempt(), 2);
    }

    #[tokio::test]
    async fn nack_dead_letter_routes_directly_without_requeue() {
        let bus = FixtureBus::new();
        let queue = QueueName::Orchestrator;
        bus.declare_queue(&queue).await.unwrap();
        let envelope = Envelope::new(TenantId(1), 1, 1, "seed", json!({}));
        bus.publish(&queue, &envelope).await.unwrap();

        let delivery = bus.poll(&queue).await.unwrap().unwrap();
        delivery.nack_dead_letter().await.unwrap();

        assert_eq!(bus.dead_lettered(&queue).len(), 1);
        assert_eq!(bus.depth(&queue), 0);
    }
}
