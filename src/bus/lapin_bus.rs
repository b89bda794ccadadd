//
// Copyright (c) 2020-2022 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

use anyhow::Context;
use anyhow::Error;
use anyhow::Result;
use async_trait::async_trait;
use lapin::options::BasicAckOptions;
use lapin::options::BasicGetOptions;
use lapin::options::BasicNackOptions;
use lapin::options::BasicPublishOptions;
use lapin::options::ExchangeDeclareOptions;
use lapin::options::QueueDeclareOptions;
use lapin::types::AMQPValue;
use lapin::types::FieldTable;
use lapin::BasicProperties;
use lapin::Channel;
use lapin::Connection;
use lapin::ConnectionProperties;
use lapin::ExchangeKind;

use crate::bus::envelope::Envelope;
use crate::bus::queue_name::QueueName;
use crate::bus::Delivery;
use crate::bus::MessageBus;
use crate::consts::DELIVERY_ATTEMPT_HEADER;

/// The shipped transport for [`MessageBus`]: one AMQP connection, one [`Channel`] per
/// consumer/publisher task, a per-queue dead-letter exchange declared via
/// `x-dead-letter-exchange` so dead-lettering happens broker-side rather than via
/// application polling.
pub struct LapinBus {
    channel: Channel,
}

impl LapinBus {
    pub async fn connect(bus_url: &str) -> Result<LapinBus> {
        let connection = Connection::connect(bus_url, ConnectionProperties::default())
            .await
            .context("Connecting to the AMQP broker")?;
        let channel = connection.create_channel().await.context("Opening an AMQP channel")?;
        Ok(LapinBus { channel })
    }
}

#[async_trait]
impl MessageBus for LapinBus {
    async fn declare_queue(&self, queue: &QueueName) -> Result<()> {
        let dlx_name = queue.dead_letter_exchange();

        self.channel
            .exchange_declare(&dlx_name, ExchangeKind::Fanout, ExchangeDeclareOptions { durable: true, ..Default::default() }, FieldTable::default())
            .await
            .map_err(Error::from)?;

        let dead_letter_queue = format!("{}.dead", queue.as_string());
        self.channel
            .queue_declare(&dead_letter_queue, QueueDeclareOptions { durable: true, ..Default::default() }, FieldTable::default())
            .await
            .map_err(Error::from)?;
        self.channel
            .queue_bind(&dead_letter_queue, &dlx_name, "", Default::default(), FieldTable::default())
            .await
            .map_err(Error::from)?;

        let mut arguments = FieldTable::default();
        arguments.insert("x-dead-letter-exchange".into(), AMQPValue::LongString(dlx_name.into()));

        self.channel
            .queue_declare(&queue.as_string(), QueueDeclareOptions { durable: true, ..Default::default() }, arguments)
            .await
            .map_err(Error::from)?;

        Ok(())
    }

    async fn publish(&self, queue: &QueueName, envelope: &Envelope) -> Result<()> {
        let payload = serde_json::to_vec(envelope)?;
        self.channel
            .basic_publish("", &queue.as_string(), BasicPublishOptions::default(), &payload, BasicProperties::default())
            .await
            .map_err(Error::from)?
            .await
            .map_err(Error::from)?;
        Ok(())
    }

    async fn poll(&self, queue: &QueueName) -> Result<Option<Box<dyn Delivery>>> {
        let delivery = self
            .channel
            .basic_get(&queue.as_string(), BasicGetOptions::default())
            .await
            .map_err(Error::from)?;

        match delivery {
            Some(delivery) => {
                let envelope: Envelope = serde_json::from_slice(&delivery.data).context("Parsing bus message as an envelope")?;
                let attempt = read_delivery_attempt(&delivery);

                Ok(Some(Box::new(LapinDelivery {
                    channel: self.channel.clone(),
                    queue: queue.clone(),
                    delivery,
                    envelope,
                    attempt,
                })))
            }
            None => Ok(None),
        }
    }
}

fn read_delivery_attempt(delivery: &lapin::message::Delivery) -> u16 {
    delivery
        .properties
        .headers()
        .as_ref()
        .and_then(|headers| headers.inner().get(DELIVERY_ATTEMPT_HEADER))
        .and_then(|value| match value {
            AMQPValue::ShortShort(v) => Some(*v as u16),
            _ => None,
        })
        .unwrap_or(1)
}

struct LapinDelivery {
    channel: Channel,
    queue: QueueName,
    delivery: lapin::message::Delivery,
    envelope: Envelope,
    attempt: u16,
}

#[async_trait]
impl Delivery for LapinDelivery {
    fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    fn delivery_attempt(&self) -> u16 {
        self.attempt
    }

    async fn ack(self: Box<Self>) -> Result<()> {
        self.delivery.ack(BasicAckOptions::default()).await.map_err(Error::from)
    }

    /// Classic queues carry no delivery counter of their own, so `basic_nack(requeue:
    /// true)` alone would redeliver the same properties forever and the worker pool's
    /// `attempt < retry_limit` check would never trip. Instead this republishes the
    /// same body under the same routing key with `x-delivery-attempt` incremented, then
    /// acks the original so the dead-letter path eventually fires. Re-publish-then-ack
    /// (not the other order) means a crash in between duplicates the message rather
    /// than losing it, same as the write-before-publish rule extraction follows for
    /// checkpoints.
    async fn nack_requeue(self: Box<Self>) -> Result<()> {
        let next_attempt = self.attempt.saturating_add(1).min(i8::MAX as u16) as i8;
        let mut headers = FieldTable::default();
        headers.insert(DELIVERY_ATTEMPT_HEADER.into(), AMQPValue::ShortShort(next_attempt));
        let properties = BasicProperties::default().with_headers(headers);

        self.channel
            .basic_publish("", &self.queue.as_string(), BasicPublishOptions::default(), &self.delivery.data, properties)
            .await
            .map_err(Error::from)?
            .await
            .map_err(Error::from)?;

        self.delivery.ack(BasicAckOptions::default()).await.map_err(Error::from)
    }

    async fn nack_dead_letter(self: Box<Self>) -> Result<()> {
        self.delivery.nack(BasicNackOptions { requeue: false, ..Default::default() }).await.map_err(Error::from)
    }
}
