//! In-memory backend for tests.
//!
//! [`MemoryBackend`] implements both [`AdminGateway`] and
//! [`MessageTransport`] over shared in-process state, so catalog, source,
//! and sink behavior can be exercised end to end without a broker.
//! Partition logs are append-only vectors; publish times come from a
//! monotonic logical clock so timestamp positioning is deterministic.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::admin::AdminGateway;
use crate::error::{AdminError, AdminErrorKind, TransportError};
use crate::position::{Cursor, MessageId};
use crate::schema::SchemaDescriptor;
use crate::topic::TopicName;
use crate::transport::{
    MessageEnvelope, MessageTransport, ReceivedMessage, TopicReader, TopicWriter,
};

#[derive(Debug, Clone)]
struct StoredMessage {
    id: MessageId,
    key: Option<String>,
    key_payload: Option<Vec<u8>>,
    payload: Vec<u8>,
    properties: HashMap<String, String>,
    event_time: Option<u64>,
    publish_time: u64,
    sequence_id: i64,
}

struct TopicState {
    name: TopicName,
    partitions: Option<u32>,
    descriptor: Option<SchemaDescriptor>,
    logs: HashMap<i32, Vec<StoredMessage>>,
    next_sequence: i64,
}

impl TopicState {
    fn partition_indexes(&self) -> Vec<i32> {
        match self.partitions {
            #[allow(clippy::cast_possible_wrap)]
            Some(n) => (0..n as i32).collect(),
            None => vec![-1],
        }
    }
}

#[derive(Default)]
struct BackendState {
    tenants: BTreeMap<String, BTreeSet<String>>,
    topics: BTreeMap<String, TopicState>,
    subscriptions: HashSet<String>,
    acks: HashMap<String, Vec<MessageId>>,
    clock: u64,
}

impl BackendState {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn topic_mut(&mut self, topic: &TopicName) -> Result<&mut TopicState, TransportError> {
        self.topics
            .get_mut(&topic.to_string())
            .ok_or_else(|| TransportError::TopicNotFound(topic.to_string()))
    }

    fn append(
        &mut self,
        topic: &TopicName,
        partition: i32,
        envelope: MessageEnvelope,
    ) -> Result<MessageId, TransportError> {
        let publish_time = self.tick();
        let state = self.topic_mut(topic)?;
        if !state.partition_indexes().contains(&partition) {
            return Err(TransportError::Fatal(format!(
                "partition {partition} out of range for {topic}"
            )));
        }
        let sequence_id = state.next_sequence;
        state.next_sequence += 1;
        let log = state.logs.entry(partition).or_default();
        let id = MessageId::new(1, log.len() as u64);
        log.push(StoredMessage {
            id,
            key: envelope.key,
            key_payload: envelope.key_payload,
            payload: envelope.payload,
            properties: envelope.properties,
            event_time: envelope.event_time,
            publish_time,
            sequence_id,
        });
        Ok(id)
    }
}

fn subscription_key(topic: &TopicName, partition: i32, subscription: &str) -> String {
    format!("{topic}|{partition}|{subscription}")
}

/// Shared in-memory backend implementing the gateway and transport traits.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Mutex<BackendState>>,
}

impl MemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tenant.
    pub fn add_tenant(&self, tenant: &str) {
        self.inner
            .lock()
            .tenants
            .entry(tenant.to_string())
            .or_default();
    }

    /// Registers a namespace, creating the tenant if needed.
    pub fn add_namespace(&self, database: &str) {
        let Some((tenant, _)) = database.split_once('/') else {
            return;
        };
        self.inner
            .lock()
            .tenants
            .entry(tenant.to_string())
            .or_default()
            .insert(database.to_string());
    }

    /// Creates a topic directly, bypassing the gateway.
    pub fn add_topic(&self, topic: &TopicName, partitions: Option<u32>) {
        let mut state = self.inner.lock();
        state.topics.insert(
            topic.to_string(),
            TopicState {
                name: topic.clone(),
                partitions,
                descriptor: None,
                logs: HashMap::new(),
                next_sequence: 0,
            },
        );
    }

    /// Sets a topic's schema directly.
    pub fn set_schema(&self, topic: &TopicName, descriptor: SchemaDescriptor) {
        if let Some(state) = self.inner.lock().topics.get_mut(&topic.to_string()) {
            state.descriptor = Some(descriptor);
        }
    }

    /// Publishes a message directly, as another client would.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::TopicNotFound` for an unknown topic.
    pub fn publish(
        &self,
        topic: &TopicName,
        partition: i32,
        envelope: MessageEnvelope,
    ) -> Result<MessageId, TransportError> {
        self.inner.lock().append(topic, partition, envelope)
    }

    /// Payloads currently stored in one partition, in order.
    #[must_use]
    pub fn payloads(&self, topic: &TopicName, partition: i32) -> Vec<Vec<u8>> {
        let state = self.inner.lock();
        state
            .topics
            .get(&topic.to_string())
            .and_then(|t| t.logs.get(&partition))
            .map(|log| log.iter().map(|m| m.payload.clone()).collect())
            .unwrap_or_default()
    }

    /// Number of messages stored across all partitions of a topic.
    #[must_use]
    pub fn message_count(&self, topic: &TopicName) -> usize {
        let state = self.inner.lock();
        state
            .topics
            .get(&topic.to_string())
            .map(|t| t.logs.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    /// Positions acknowledged under a subscription name, in ack order.
    #[must_use]
    pub fn acked(&self, topic: &TopicName, partition: i32, subscription: &str) -> Vec<MessageId> {
        self.inner
            .lock()
            .acks
            .get(&subscription_key(topic, partition, subscription))
            .cloned()
            .unwrap_or_default()
    }

    /// The logical clock's current value.
    #[must_use]
    pub fn now(&self) -> u64 {
        self.inner.lock().clock
    }
}

#[async_trait]
impl AdminGateway for MemoryBackend {
    async fn list_tenants(&self) -> Result<Vec<String>, AdminError> {
        Ok(self.inner.lock().tenants.keys().cloned().collect())
    }

    async fn list_namespaces(&self, tenant: &str) -> Result<Vec<String>, AdminError> {
        let state = self.inner.lock();
        state
            .tenants
            .get(tenant)
            .map(|namespaces| namespaces.iter().cloned().collect())
            .ok_or_else(|| AdminError::not_found(format!("tenant '{tenant}'")))
    }

    async fn list_topics(&self, namespace: &str) -> Result<Vec<TopicName>, AdminError> {
        let state = self.inner.lock();
        let known = state
            .tenants
            .values()
            .any(|namespaces| namespaces.contains(namespace));
        if !known {
            return Err(AdminError::not_found(format!("namespace '{namespace}'")));
        }
        let mut out = Vec::new();
        for topic in state.topics.values() {
            if topic.name.database() != namespace {
                continue;
            }
            match topic.partitions {
                Some(n) => {
                    #[allow(clippy::cast_possible_wrap)]
                    for i in 0..n as i32 {
                        out.push(topic.name.partition(i));
                    }
                }
                None => out.push(topic.name.clone()),
            }
        }
        Ok(out)
    }

    async fn partitioned_topic_partitions(
        &self,
        topic: &TopicName,
    ) -> Result<Option<u32>, AdminError> {
        let state = self.inner.lock();
        Ok(state
            .topics
            .get(&topic.to_string())
            .and_then(|t| t.partitions))
    }

    async fn topic_exists(&self, topic: &TopicName) -> Result<bool, AdminError> {
        Ok(self.inner.lock().topics.contains_key(&topic.to_string()))
    }

    async fn create_topic(&self, topic: &TopicName, partitions: u32) -> Result<(), AdminError> {
        let mut state = self.inner.lock();
        let database = topic.database();
        let known = state
            .tenants
            .values()
            .any(|namespaces| namespaces.contains(&database));
        if !known {
            return Err(AdminError::not_found(format!("namespace '{database}'")));
        }
        if state.topics.contains_key(&topic.to_string()) {
            return Err(AdminError::new(
                AdminErrorKind::Conflict,
                format!("topic {topic} already exists"),
            ));
        }
        state.topics.insert(
            topic.to_string(),
            TopicState {
                name: topic.clone(),
                partitions: (partitions > 0).then_some(partitions),
                descriptor: None,
                logs: HashMap::new(),
                next_sequence: 0,
            },
        );
        Ok(())
    }

    async fn delete_topic(&self, topic: &TopicName, _force: bool) -> Result<(), AdminError> {
        let mut state = self.inner.lock();
        state
            .topics
            .remove(&topic.to_string())
            .map(|_| ())
            .ok_or_else(|| AdminError::not_found(format!("topic {topic}")))
    }

    async fn get_schema(&self, topic: &TopicName) -> Result<Option<SchemaDescriptor>, AdminError> {
        let state = self.inner.lock();
        let topic_state = state
            .topics
            .get(&topic.to_string())
            .ok_or_else(|| AdminError::not_found(format!("topic {topic}")))?;
        Ok(topic_state.descriptor.clone())
    }

    async fn declare_schema(
        &self,
        topic: &TopicName,
        descriptor: &SchemaDescriptor,
    ) -> Result<(), AdminError> {
        let mut state = self.inner.lock();
        let topic_state = state
            .topics
            .get_mut(&topic.to_string())
            .ok_or_else(|| AdminError::not_found(format!("topic {topic}")))?;
        topic_state.descriptor = Some(descriptor.clone());
        Ok(())
    }

    async fn latest_position(
        &self,
        topic: &TopicName,
        partition: i32,
    ) -> Result<Option<MessageId>, AdminError> {
        let state = self.inner.lock();
        let topic_state = state
            .topics
            .get(&topic.to_string())
            .ok_or_else(|| AdminError::not_found(format!("topic {topic}")))?;
        Ok(topic_state
            .logs
            .get(&partition)
            .and_then(|log| log.last())
            .map(|m| m.id))
    }

    async fn position_for_time(
        &self,
        topic: &TopicName,
        partition: i32,
        millis: u64,
    ) -> Result<Option<MessageId>, AdminError> {
        let state = self.inner.lock();
        let topic_state = state
            .topics
            .get(&topic.to_string())
            .ok_or_else(|| AdminError::not_found(format!("topic {topic}")))?;
        Ok(topic_state
            .logs
            .get(&partition)
            .and_then(|log| log.iter().find(|m| m.publish_time >= millis))
            .map(|m| m.id))
    }
}

struct MemoryReader {
    inner: Arc<Mutex<BackendState>>,
    topic: TopicName,
    partition: i32,
    cursor: Cursor,
    next_index: usize,
    sub_key: String,
}

#[async_trait]
impl TopicReader for MemoryReader {
    async fn receive(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<ReceivedMessage>, TransportError> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let state = self.inner.lock();
                let topic_state = state
                    .topics
                    .get(&self.topic.to_string())
                    .ok_or_else(|| TransportError::TopicNotFound(self.topic.to_string()))?;
                if let Some(log) = topic_state.logs.get(&self.partition) {
                    while self.next_index < log.len() {
                        let message = &log[self.next_index];
                        self.next_index += 1;
                        if !self.cursor.admits(message.id) {
                            continue;
                        }
                        let concrete = if self.partition < 0 {
                            self.topic.clone()
                        } else {
                            self.topic.partition(self.partition)
                        };
                        return Ok(Some(ReceivedMessage {
                            topic: concrete,
                            partition: self.partition,
                            message_id: message.id,
                            key: message.key.clone(),
                            key_payload: message.key_payload.clone(),
                            payload: message.payload.clone(),
                            properties: message.properties.clone(),
                            event_time: message.event_time,
                            publish_time: message.publish_time,
                            sequence_id: message.sequence_id,
                        }));
                    }
                }
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    async fn ack(&mut self, id: MessageId) -> Result<(), TransportError> {
        self.inner
            .lock()
            .acks
            .entry(self.sub_key.clone())
            .or_default()
            .push(id);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.inner.lock().subscriptions.remove(&self.sub_key);
        Ok(())
    }
}

struct MemoryWriter {
    inner: Arc<Mutex<BackendState>>,
    topic: TopicName,
    partition: i32,
}

#[async_trait]
impl TopicWriter for MemoryWriter {
    async fn send(&mut self, envelope: MessageEnvelope) -> Result<MessageId, TransportError> {
        self.inner.lock().append(&self.topic, self.partition, envelope)
    }

    async fn flush(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

#[async_trait]
impl MessageTransport for MemoryBackend {
    async fn create_reader(
        &self,
        topic: &TopicName,
        partition: i32,
        cursor: Cursor,
        subscription: &str,
    ) -> Result<Box<dyn TopicReader>, TransportError> {
        let mut state = self.inner.lock();
        if !state.topics.contains_key(&topic.to_string()) {
            return Err(TransportError::TopicNotFound(topic.to_string()));
        }
        let sub_key = subscription_key(topic, partition, subscription);
        if !state.subscriptions.insert(sub_key.clone()) {
            return Err(TransportError::SubscriptionInUse(subscription.to_string()));
        }
        Ok(Box::new(MemoryReader {
            inner: Arc::clone(&self.inner),
            topic: topic.clone(),
            partition,
            cursor,
            next_index: 0,
            sub_key,
        }))
    }

    async fn create_writer(
        &self,
        topic: &TopicName,
        partition: i32,
    ) -> Result<Box<dyn TopicWriter>, TransportError> {
        let state = self.inner.lock();
        let Some(topic_state) = state.topics.get(&topic.to_string()) else {
            return Err(TransportError::TopicNotFound(topic.to_string()));
        };
        if !topic_state.partition_indexes().contains(&partition) {
            return Err(TransportError::Fatal(format!(
                "partition {partition} out of range for {topic}"
            )));
        }
        Ok(Box::new(MemoryWriter {
            inner: Arc::clone(&self.inner),
            topic: topic.clone(),
            partition,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic(name: &str) -> TopicName {
        TopicName::parse(name).unwrap()
    }

    #[tokio::test]
    async fn test_namespace_listing() {
        let backend = MemoryBackend::new();
        backend.add_namespace("tn1/ns1");
        backend.add_namespace("tn1/ns2");

        let tenants = backend.list_tenants().await.unwrap();
        assert_eq!(tenants, vec!["tn1"]);
        let namespaces = backend.list_namespaces("tn1").await.unwrap();
        assert_eq!(namespaces, vec!["tn1/ns1", "tn1/ns2"]);
        assert!(backend.list_namespaces("missing").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_partitioned_topic_expansion() {
        let backend = MemoryBackend::new();
        backend.add_namespace("tn1/ns1");
        let t = topic("persistent://tn1/ns1/ptp1");
        backend.add_topic(&t, Some(3));

        let listed = backend.list_topics("tn1/ns1").await.unwrap();
        assert_eq!(listed.len(), 3);
        assert_eq!(listed[0].local, "ptp1-partition-0");
        assert_eq!(
            backend.partitioned_topic_partitions(&t).await.unwrap(),
            Some(3)
        );
    }

    #[tokio::test]
    async fn test_subscription_exclusivity() {
        let backend = MemoryBackend::new();
        backend.add_namespace("tn1/ns1");
        let t = topic("persistent://tn1/ns1/tp1");
        backend.add_topic(&t, None);

        let _reader = backend
            .create_reader(&t, -1, Cursor::Earliest, "sub")
            .await
            .unwrap();
        let second = backend.create_reader(&t, -1, Cursor::Earliest, "sub").await;
        assert!(matches!(
            second.unwrap_err(),
            TransportError::SubscriptionInUse(_)
        ));
    }

    #[tokio::test]
    async fn test_reader_respects_cursor() {
        let backend = MemoryBackend::new();
        backend.add_namespace("tn1/ns1");
        let t = topic("persistent://tn1/ns1/tp1");
        backend.add_topic(&t, None);

        let first = backend
            .publish(&t, -1, MessageEnvelope {
                payload: b"old".to_vec(),
                ..MessageEnvelope::default()
            })
            .unwrap();

        let mut reader = backend
            .create_reader(&t, -1, Cursor::After(first), "sub")
            .await
            .unwrap();
        assert!(reader
            .receive(Duration::from_millis(10))
            .await
            .unwrap()
            .is_none());

        backend
            .publish(&t, -1, MessageEnvelope {
                payload: b"new".to_vec(),
                ..MessageEnvelope::default()
            })
            .unwrap();
        let message = reader
            .receive(Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.payload, b"new");
    }

    #[tokio::test]
    async fn test_publish_time_monotonic() {
        let backend = MemoryBackend::new();
        backend.add_namespace("tn1/ns1");
        let t = topic("persistent://tn1/ns1/tp1");
        backend.add_topic(&t, None);

        backend.publish(&t, -1, MessageEnvelope::default()).unwrap();
        let cut = backend.now();
        backend.publish(&t, -1, MessageEnvelope::default()).unwrap();

        let position = backend.position_for_time(&t, -1, cut + 1).await.unwrap();
        assert_eq!(position, Some(MessageId::new(1, 1)));
    }
}
