//! Streaming source adapter.
//!
//! [`PulsarSource`] reads one table as an ordered row stream. Each
//! partition gets its own exclusive reader; rows within a partition arrive
//! in partition order, with no ordering across partitions. Messages are
//! acknowledged only after their rows have been handed to the caller, so a
//! crash between hand-off and ack re-delivers rather than loses.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use arrow_array::builder::{
    Int64Builder, MapBuilder, StringBuilder, TimestampMillisecondBuilder,
};
use arrow_array::{new_null_array, ArrayRef, RecordBatch};
use arrow_schema::SchemaRef;
use tracing::{debug, info, warn};

use crate::catalog::TableInfo;
use crate::config::CatalogConfig;
use crate::cursor::{CursorTracker, SourceCheckpoint};
use crate::error::{BridgeError, SerdeError, TransportError};
use crate::position::{Cursor, PositionResolver};
use crate::schema::{key_descriptor_for, value_descriptor_for, ColumnKind};
use crate::serde::{deserializer_for, RecordDeserializer};
use crate::topic::TopicName;
use crate::transport::{MessageTransport, ReceivedMessage, TopicReader};

/// Lifecycle of one partition's subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PartitionPhase {
    Streaming,
    Failed,
}

struct PartitionState {
    partition: i32,
    topic: TopicName,
    reader: Box<dyn TopicReader>,
    phase: PartitionPhase,
}

/// Streaming source over one table.
pub struct PulsarSource {
    info: TableInfo,
    config: CatalogConfig,
    full_schema: SchemaRef,
    value_schema: SchemaRef,
    key_schema: Option<SchemaRef>,
    value_deserializer: Box<dyn RecordDeserializer>,
    key_deserializer: Option<Box<dyn RecordDeserializer>>,
    partitions: Vec<PartitionState>,
    tracker: CursorTracker,
    stop: Arc<AtomicBool>,
    epoch: u64,
}

fn fresh_subscription(base: &str, attempt: u32) -> String {
    if attempt == 0 {
        return base.to_string();
    }
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    format!("{base}-{attempt}-{nanos:x}")
}

impl PulsarSource {
    /// Opens a source over every partition of a table.
    ///
    /// Start positions come from `checkpoint` when it carries offsets,
    /// otherwise each partition is resolved once against the configured
    /// startup mode. With the latest-mode snapshot, messages published
    /// between resolution and the first receive are delivered.
    ///
    /// # Errors
    ///
    /// Fails on position resolution, codec construction, or subscription
    /// errors that survive the bounded collision retries.
    pub async fn open(
        transport: Arc<dyn MessageTransport>,
        gateway: Arc<dyn crate::admin::AdminGateway>,
        info: TableInfo,
        config: CatalogConfig,
        subscription: &str,
        checkpoint: Option<&SourceCheckpoint>,
    ) -> Result<Self, BridgeError> {
        let value_desc = value_descriptor_for(
            &info.descriptor,
            &config.key_fields,
            config.value_fields_include,
        );
        let key_format = config.key_format.and_then(|f| f.struct_format());
        let key_desc = key_descriptor_for(&info.descriptor, &config.key_fields, key_format);

        let value_deserializer = deserializer_for(&value_desc)?;
        let key_deserializer = match &key_desc {
            Some(desc) => Some(deserializer_for(desc)?),
            None => None,
        };

        let full_schema = info.schema.to_arrow();
        let value_schema = info.schema.value_arrow(config.value_fields_include);
        let key_schema = key_desc.as_ref().map(|_| {
            Arc::new(arrow_schema::Schema::new(
                info.schema
                    .key_columns()
                    .iter()
                    .map(|c| c.field.clone())
                    .collect::<Vec<_>>(),
            ))
        });

        let partition_indexes: Vec<i32> = match info.partitions {
            #[allow(clippy::cast_possible_wrap)]
            Some(n) => (0..n as i32).collect(),
            None => vec![-1],
        };

        let resume = match checkpoint {
            Some(cp) if !cp.is_empty() => Some(cp.resume_cursors()?),
            _ => None,
        };
        let resolver = PositionResolver::new(gateway.as_ref());

        let mut partitions = Vec::with_capacity(partition_indexes.len());
        for partition in partition_indexes {
            let cursor = match &resume {
                Some(cursors) => cursors.get(&partition).copied().unwrap_or(Cursor::Earliest),
                None => {
                    resolver
                        .resolve(&info.topic, partition, config.startup_mode)
                        .await?
                }
            };
            let reader = Self::subscribe(
                transport.as_ref(),
                &info.topic,
                partition,
                cursor,
                subscription,
                config.subscription_retry_limit,
            )
            .await?;
            let topic = if partition < 0 {
                info.topic.clone()
            } else {
                info.topic.partition(partition)
            };
            partitions.push(PartitionState {
                partition,
                topic,
                reader,
                phase: PartitionPhase::Streaming,
            });
        }

        info!(
            topic = %info.topic,
            partitions = partitions.len(),
            subscription,
            "source opened"
        );

        Ok(Self {
            info,
            config,
            full_schema,
            value_schema,
            key_schema,
            value_deserializer,
            key_deserializer,
            partitions,
            tracker: CursorTracker::new(),
            stop: Arc::new(AtomicBool::new(false)),
            epoch: 0,
        })
    }

    async fn subscribe(
        transport: &dyn MessageTransport,
        topic: &TopicName,
        partition: i32,
        cursor: Cursor,
        subscription: &str,
        retry_limit: u32,
    ) -> Result<Box<dyn TopicReader>, BridgeError> {
        let mut attempt = 0;
        loop {
            let name = fresh_subscription(subscription, attempt);
            match transport
                .create_reader(topic, partition, cursor, &name)
                .await
            {
                Ok(reader) => return Ok(reader),
                Err(TransportError::SubscriptionInUse(held)) if attempt < retry_limit => {
                    warn!(topic = %topic, partition, subscription = held, "subscription in use, retrying");
                    attempt += 1;
                }
                Err(e) => {
                    return Err(BridgeError::SourcePartitionFailure {
                        topic: topic.to_string(),
                        partition,
                        message: e.to_string(),
                    })
                }
            }
        }
    }

    /// Handle the caller flips to request a cooperative stop.
    #[must_use]
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// The table's full Arrow schema, metadata columns included.
    #[must_use]
    pub fn schema(&self) -> SchemaRef {
        Arc::clone(&self.full_schema)
    }

    /// Number of delivered rows whose messages are not yet acknowledged.
    #[must_use]
    pub fn pending_acks(&self) -> usize {
        self.tracker.pending_count()
    }

    /// Polls every partition once and returns the collected rows.
    ///
    /// Acknowledgments for rows handed off by the previous poll are flushed
    /// first. Returns `Ok(None)` once a stop has been requested; an empty
    /// batch means no partition had data within the bounded wait.
    ///
    /// # Errors
    ///
    /// A partition hitting an unrecoverable transport error fails the whole
    /// source with `SourcePartitionFailure`.
    pub async fn poll_batch(&mut self) -> Result<Option<RecordBatch>, BridgeError> {
        self.flush_acks().await?;

        if self.stop.load(Ordering::Acquire) {
            return Ok(None);
        }

        let timeout = Duration::from_millis(self.config.poll_timeout_ms);
        let max_records = self.config.max_poll_records;
        let mut rows: Vec<RecordBatch> = Vec::new();

        'collect: loop {
            let mut progressed = false;
            for idx in 0..self.partitions.len() {
                if rows.len() >= max_records || self.stop.load(Ordering::Acquire) {
                    break 'collect;
                }
                let state = &mut self.partitions[idx];
                if state.phase != PartitionPhase::Streaming {
                    continue;
                }
                match state.reader.receive(timeout).await {
                    Ok(Some(message)) => {
                        let partition = state.partition;
                        let id = message.message_id;
                        let row = self.build_row(&message)?;
                        rows.push(row);
                        self.tracker.record_delivered(partition, id);
                        progressed = true;
                    }
                    Ok(None) => {}
                    Err(e) if e.is_transient() => {
                        warn!(topic = %state.topic, error = %e, "transient receive error");
                    }
                    Err(e) => {
                        state.phase = PartitionPhase::Failed;
                        return Err(BridgeError::SourcePartitionFailure {
                            topic: state.topic.to_string(),
                            partition: state.partition,
                            message: e.to_string(),
                        });
                    }
                }
            }
            if !progressed {
                break;
            }
        }

        if rows.is_empty() {
            return Ok(Some(RecordBatch::new_empty(Arc::clone(&self.full_schema))));
        }
        let batch = arrow_select::concat::concat_batches(&self.full_schema, &rows)
            .map_err(|e| SerdeError::MalformedPayload(format!("failed to concat rows: {e}")))?;
        debug!(rows = batch.num_rows(), topic = %self.info.topic, "polled batch");
        Ok(Some(batch))
    }

    /// Acknowledges everything handed off so far and returns a checkpoint.
    ///
    /// The checkpoint holds the last acknowledged position per partition;
    /// restoring from it resumes with the first unacknowledged message.
    ///
    /// # Errors
    ///
    /// Propagates acknowledgment failures.
    pub async fn commit(&mut self) -> Result<SourceCheckpoint, BridgeError> {
        self.flush_acks().await?;
        self.epoch += 1;
        Ok(self.tracker.to_checkpoint(self.epoch))
    }

    /// The current checkpoint without forcing acknowledgment.
    #[must_use]
    pub fn checkpoint(&self) -> SourceCheckpoint {
        self.tracker.to_checkpoint(self.epoch)
    }

    /// Acknowledges pending hand-offs and releases all subscriptions.
    ///
    /// # Errors
    ///
    /// Propagates acknowledgment and teardown failures.
    pub async fn close(&mut self) -> Result<(), BridgeError> {
        self.stop.store(true, Ordering::Release);
        self.flush_acks().await?;
        for state in &mut self.partitions {
            if let Err(e) = state.reader.close().await {
                warn!(topic = %state.topic, error = %e, "reader close failed");
            }
        }
        info!(topic = %self.info.topic, "source closed");
        Ok(())
    }

    async fn flush_acks(&mut self) -> Result<(), BridgeError> {
        for (partition, id) in self.tracker.take_pending() {
            let state = self
                .partitions
                .iter_mut()
                .find(|s| s.partition == partition);
            if let Some(state) = state {
                state
                    .reader
                    .ack(id)
                    .await
                    .map_err(|e| BridgeError::SourcePartitionFailure {
                        topic: state.topic.to_string(),
                        partition,
                        message: format!("ack failed: {e}"),
                    })?;
                self.tracker.record_acked(partition, id);
            }
        }
        Ok(())
    }

    /// Builds the one-row batch for a message: payload columns first, then
    /// the four metadata columns.
    fn build_row(&self, message: &ReceivedMessage) -> Result<RecordBatch, BridgeError> {
        let value_batch = self
            .value_deserializer
            .deserialize(&message.payload, &self.value_schema)?;

        let key_batch = match (&self.key_deserializer, &self.key_schema) {
            (Some(deser), Some(schema)) => match &message.key_payload {
                Some(bytes) => Some(deser.deserialize(bytes, schema)?),
                None => None,
            },
            _ => None,
        };

        let mut arrays: Vec<ArrayRef> = Vec::with_capacity(self.full_schema.fields().len());
        for column in self.info.schema.columns() {
            let array = match column.kind {
                ColumnKind::Physical => {
                    self.physical_array(column.name(), &value_batch, key_batch.as_ref())?
                }
                ColumnKind::Metadata | ColumnKind::MetadataVirtual => {
                    metadata_array(column.name(), message)?
                }
            };
            arrays.push(array);
        }

        RecordBatch::try_new(Arc::clone(&self.full_schema), arrays)
            .map_err(|e| SerdeError::MalformedPayload(format!("failed to build row: {e}")).into())
    }

    fn physical_array(
        &self,
        name: &str,
        value_batch: &RecordBatch,
        key_batch: Option<&RecordBatch>,
    ) -> Result<ArrayRef, BridgeError> {
        if let Ok(idx) = value_batch.schema().index_of(name) {
            return Ok(Arc::clone(value_batch.column(idx)));
        }
        if let Some(key_batch) = key_batch {
            if let Ok(idx) = key_batch.schema().index_of(name) {
                return Ok(Arc::clone(key_batch.column(idx)));
            }
        }
        let field_idx = self
            .full_schema
            .index_of(name)
            .map_err(|_| SerdeError::MissingField(name.to_string()))?;
        let field = self.full_schema.field(field_idx);
        if field.is_nullable() {
            Ok(new_null_array(field.data_type(), 1))
        } else {
            Err(SerdeError::MissingField(name.to_string()).into())
        }
    }
}

fn metadata_array(name: &str, message: &ReceivedMessage) -> Result<ArrayRef, BridgeError> {
    use crate::schema::{EVENT_TIME_COLUMN, PROPERTIES_COLUMN, SEQUENCE_ID_COLUMN, TOPIC_COLUMN};

    match name {
        EVENT_TIME_COLUMN => {
            let mut builder = TimestampMillisecondBuilder::with_capacity(1);
            match message.event_time {
                #[allow(clippy::cast_possible_wrap)]
                Some(millis) => builder.append_value(millis as i64),
                None => builder.append_null(),
            }
            Ok(Arc::new(builder.finish()))
        }
        PROPERTIES_COLUMN => {
            let mut builder = MapBuilder::new(None, StringBuilder::new(), StringBuilder::new());
            let mut entries: Vec<_> = message.properties.iter().collect();
            entries.sort();
            for (key, value) in entries {
                builder.keys().append_value(key);
                builder.values().append_value(value);
            }
            builder
                .append(true)
                .map_err(|e| SerdeError::MalformedPayload(format!("properties map: {e}")))?;
            Ok(Arc::new(builder.finish()))
        }
        TOPIC_COLUMN => {
            let mut builder = StringBuilder::new();
            builder.append_value(message.topic.to_string());
            Ok(Arc::new(builder.finish()))
        }
        SEQUENCE_ID_COLUMN => {
            let mut builder = Int64Builder::with_capacity(1);
            builder.append_value(message.sequence_id);
            Ok(Arc::new(builder.finish()))
        }
        other => Err(SerdeError::MissingField(other.to_string()).into()),
    }
}
