//! Broker-backed transport over the `pulsar` client crate.
//!
//! Enabled with the `pulsar-client` feature. Readers subscribe exclusively
//! with a reader-style cursor; positions the broker cannot seek to exactly
//! are enforced client-side by filtering on the requested cursor.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use pulsar::consumer::InitialPosition;
use pulsar::{
    producer, proto, Consumer, ConsumerOptions, Producer, Pulsar, SubType, TokioExecutor,
};
use tracing::debug;

use crate::error::TransportError;
use crate::position::{Cursor, MessageId};
use crate::topic::TopicName;
use crate::transport::{
    MessageEnvelope, MessageTransport, ReceivedMessage, TopicReader, TopicWriter,
};

fn transport_err(e: &pulsar::Error) -> TransportError {
    let text = e.to_string();
    if text.contains("ConsumerBusy") || text.contains("Exclusive") {
        TransportError::SubscriptionInUse(text)
    } else if text.contains("TopicNotFound") {
        TransportError::TopicNotFound(text)
    } else if matches!(e, pulsar::Error::Connection(_)) {
        TransportError::Transient(text)
    } else {
        TransportError::Fatal(text)
    }
}

fn concrete_topic(topic: &TopicName, partition: i32) -> TopicName {
    if partition < 0 {
        topic.clone()
    } else {
        topic.partition(partition)
    }
}

/// Transport backed by a live broker connection.
pub struct PulsarTransport {
    client: Pulsar<TokioExecutor>,
}

impl PulsarTransport {
    /// Connects to the broker at `service_url`.
    ///
    /// # Errors
    ///
    /// Returns a fatal transport error if the connection cannot be
    /// established.
    pub async fn connect(service_url: &str) -> Result<Self, TransportError> {
        let client = Pulsar::builder(service_url, TokioExecutor)
            .build()
            .await
            .map_err(|e| transport_err(&e))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl MessageTransport for PulsarTransport {
    async fn create_reader(
        &self,
        topic: &TopicName,
        partition: i32,
        cursor: Cursor,
        subscription: &str,
    ) -> Result<Box<dyn TopicReader>, TransportError> {
        let concrete = concrete_topic(topic, partition);
        let consumer = self
            .client
            .consumer()
            .with_topic(concrete.to_string())
            .with_subscription(subscription)
            .with_subscription_type(SubType::Exclusive)
            .with_options(
                ConsumerOptions::default().with_initial_position(InitialPosition::Earliest),
            )
            .build::<Vec<u8>>()
            .await
            .map_err(|e| transport_err(&e))?;
        debug!(topic = %concrete, subscription, "reader attached");
        Ok(Box::new(PulsarTopicReader {
            consumer,
            topic: concrete,
            partition,
            cursor,
            delivered: HashMap::new(),
        }))
    }

    async fn create_writer(
        &self,
        topic: &TopicName,
        partition: i32,
    ) -> Result<Box<dyn TopicWriter>, TransportError> {
        let concrete = concrete_topic(topic, partition);
        let producer = self
            .client
            .producer()
            .with_topic(concrete.to_string())
            .build()
            .await
            .map_err(|e| transport_err(&e))?;
        Ok(Box::new(PulsarTopicWriter {
            producer,
            topic: concrete,
        }))
    }
}

struct PulsarTopicReader {
    consumer: Consumer<Vec<u8>, TokioExecutor>,
    topic: TopicName,
    partition: i32,
    cursor: Cursor,
    delivered: HashMap<MessageId, proto::MessageIdData>,
}

#[async_trait]
impl TopicReader for PulsarTopicReader {
    async fn receive(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<ReceivedMessage>, TransportError> {
        loop {
            let next = tokio::time::timeout(timeout, self.consumer.try_next()).await;
            let message = match next {
                Err(_) => return Ok(None),
                Ok(result) => match result.map_err(|e| transport_err(&e))? {
                    Some(m) => m,
                    None => return Ok(None),
                },
            };
            let proto_id = message.message_id().clone();
            let id = MessageId::new(proto_id.ledger_id, proto_id.entry_id);
            if !self.cursor.admits(id) {
                // Positioned past this entry; acknowledge and keep scanning.
                self.consumer
                    .ack(&message)
                    .await
                    .map_err(|e| transport_err(&e))?;
                continue;
            }
            let metadata = message.metadata().clone();
            let properties = metadata
                .properties
                .into_iter()
                .map(|kv| (kv.key, kv.value))
                .collect();
            self.delivered.insert(id, proto_id);
            #[allow(clippy::cast_possible_wrap)]
            return Ok(Some(ReceivedMessage {
                topic: self.topic.clone(),
                partition: self.partition,
                message_id: id,
                key: metadata.partition_key.clone(),
                key_payload: None,
                payload: message.payload.data,
                properties,
                event_time: metadata.event_time,
                publish_time: metadata.publish_time,
                sequence_id: metadata.sequence_id as i64,
            }));
        }
    }

    async fn ack(&mut self, id: MessageId) -> Result<(), TransportError> {
        let proto_id = self
            .delivered
            .remove(&id)
            .ok_or_else(|| TransportError::Fatal(format!("ack of undelivered position {id}")))?;
        self.consumer
            .ack_with_id(&self.topic.to_string(), proto_id)
            .await
            .map_err(|e| transport_err(&e))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.consumer
            .close()
            .await
            .map_err(|e| transport_err(&e))
    }
}

struct PulsarTopicWriter {
    producer: Producer<TokioExecutor>,
    topic: TopicName,
}

#[async_trait]
impl TopicWriter for PulsarTopicWriter {
    async fn send(&mut self, envelope: MessageEnvelope) -> Result<MessageId, TransportError> {
        let message = producer::Message {
            payload: envelope.payload,
            partition_key: envelope.key,
            properties: envelope.properties,
            event_time: envelope.event_time,
            ..Default::default()
        };
        let receipt = self
            .producer
            .send_non_blocking(message)
            .await
            .map_err(|e| transport_err(&e))?
            .await
            .map_err(|e| transport_err(&e))?;
        let id = receipt
            .message_id
            .ok_or_else(|| TransportError::Fatal("send receipt carried no position".into()))?;
        Ok(MessageId::new(id.ledger_id, id.entry_id))
    }

    async fn flush(&mut self) -> Result<(), TransportError> {
        // Receipts are awaited per send; nothing buffered here.
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        debug!(topic = %self.topic, "writer closed");
        self.producer
            .close()
            .await
            .map_err(|e| transport_err(&e))
    }
}
