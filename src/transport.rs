//! Data-plane traits.
//!
//! The source and sink adapters depend only on these narrow traits:
//! [`MessageTransport`] opens per-partition readers and writers,
//! [`TopicReader`] delivers messages in partition order, and
//! [`TopicWriter`] persists outgoing envelopes. Production
//! implementations live behind the `pulsar-client` feature; tests use
//! the in-memory backend.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::TransportError;
use crate::position::{Cursor, MessageId};
use crate::topic::TopicName;

/// An outgoing message.
#[derive(Debug, Clone, Default)]
pub struct MessageEnvelope {
    /// Partition key, when the row has key columns.
    pub key: Option<String>,
    /// Serialized key payload for key/value split tables.
    pub key_payload: Option<Vec<u8>>,
    /// Serialized value payload.
    pub payload: Vec<u8>,
    /// Application properties attached to the message.
    pub properties: HashMap<String, String>,
    /// Event time in epoch milliseconds, if the row carries one.
    pub event_time: Option<u64>,
}

/// A message delivered by a partition reader.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    /// Concrete topic the message came from, partition suffix included.
    pub topic: TopicName,
    /// Partition index, -1 for non-partitioned topics.
    pub partition: i32,
    /// Position of the message within its partition.
    pub message_id: MessageId,
    /// Partition key, if set by the producer.
    pub key: Option<String>,
    /// Serialized key payload for key/value split tables.
    pub key_payload: Option<Vec<u8>>,
    /// Serialized value payload.
    pub payload: Vec<u8>,
    /// Application properties.
    pub properties: HashMap<String, String>,
    /// Event time in epoch milliseconds, if set by the producer.
    pub event_time: Option<u64>,
    /// Broker publish time in epoch milliseconds.
    pub publish_time: u64,
    /// Producer sequence id.
    pub sequence_id: i64,
}

/// Ordered reader over one partition.
#[async_trait]
pub trait TopicReader: Send {
    /// Waits up to `timeout` for the next message.
    ///
    /// Returns `None` on timeout. Messages arrive in partition order.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if the subscription fails.
    async fn receive(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<ReceivedMessage>, TransportError>;

    /// Acknowledges a delivered message.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if the acknowledgment cannot be recorded.
    async fn ack(&mut self, id: MessageId) -> Result<(), TransportError>;

    /// Releases the subscription.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if teardown fails.
    async fn close(&mut self) -> Result<(), TransportError>;
}

impl std::fmt::Debug for dyn TopicReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TopicReader")
    }
}

/// Writer for one partition (or a whole non-partitioned topic).
#[async_trait]
pub trait TopicWriter: Send {
    /// Persists an envelope, returning its assigned position.
    ///
    /// # Errors
    ///
    /// Returns `TransportError`; transient failures may be retried by the
    /// caller.
    async fn send(&mut self, envelope: MessageEnvelope) -> Result<MessageId, TransportError>;

    /// Waits until all sent envelopes are durable.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if outstanding sends failed.
    async fn flush(&mut self) -> Result<(), TransportError>;

    /// Releases the producer.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if teardown fails.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Factory for per-partition readers and writers.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// Opens an exclusive reader on one partition starting at `cursor`.
    ///
    /// `partition` is -1 for non-partitioned topics.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::SubscriptionInUse` when the subscription
    /// name is already held; callers retry with a fresh name.
    async fn create_reader(
        &self,
        topic: &TopicName,
        partition: i32,
        cursor: Cursor,
        subscription: &str,
    ) -> Result<Box<dyn TopicReader>, TransportError>;

    /// Opens a writer on one partition.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if the producer cannot be created.
    async fn create_writer(
        &self,
        topic: &TopicName,
        partition: i32,
    ) -> Result<Box<dyn TopicWriter>, TransportError>;
}
