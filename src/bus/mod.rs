//
// Copyright (c) 2020-2022 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

//! The message bus: durable queues organized by tier (extraction) and by tenant
//! (transform, embedding), at-least-once delivery with manual acknowledgement, and a
//! dead-letter exchange per queue for the N-th delivery failure.
//!
//! [`MessageBus`] is transport-agnostic; [`lapin_bus::LapinBus`] is the shipped AMQP
//! implementation backing the real deployment, with [`fixture::FixtureBus`] standing
//! in for it in tests.

pub mod envelope;
pub mod fixture;
pub mod lapin_bus;
pub mod queue_name;

pub use envelope::Envelope;
pub use queue_name::QueueName;

use anyhow::Result;
use async_trait::async_trait;

/// A single delivered message plus the acknowledgement handle the consumer must
/// eventually call exactly once. Holding a `Delivery` without acking/nacking it is a
/// handler bug: the broker (or the fixture bus) will consider it outstanding forever.
#[async_trait]
pub trait Delivery: Send {
    fn envelope(&self) -> &Envelope;

    /// Number of times this message has already been delivered, including this
    /// delivery. Used by the worker pool to decide when to stop requeuing and dead
    /// letter instead.
    fn delivery_attempt(&self) -> u16;

    async fn ack(self: Box<Self>) -> Result<()>;

    /// Negative-acknowledge with requeue-on-first-failure semantics: the bus either
    /// redelivers the message (if under `RETRY_LIMIT`) or routes it to the queue's
    /// dead-letter exchange.
    async fn nack_requeue(self: Box<Self>) -> Result<()>;

    /// Negative-acknowledge without requeue, once the worker pool has decided
    /// `delivery_attempt()` has reached `RETRY_LIMIT`. The queue's dead-letter-exchange
    /// argument (declared by `declare_queue`) is what actually routes the message from
    /// here, not this call itself.
    async fn nack_dead_letter(self: Box<Self>) -> Result<()>;
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Declares a queue (and its dead-letter exchange) if it does not already exist.
    /// Idempotent: safe to call before every publish.
    async fn declare_queue(&self, queue: &QueueName) -> Result<()>;

    async fn publish(&self, queue: &QueueName, envelope: &Envelope) -> Result<()>;

    /// Pulls the next available message from `queue`, or `None` if none is available
    /// right now. The worker pool calls this in a loop rather than holding a
    /// long-lived stream, so a handler crash mid-message only loses that one delivery
    /// handle, not the whole consumer.
    async fn poll(&self, queue: &QueueName) -> Result<Option<Box<dyn Delivery>>>;
}
