//! Streaming sink adapter.
//!
//! [`PulsarSink`] writes table rows back to a topic. If the target table
//! does not exist when the sink opens, it is created through the catalog
//! with the declared schema. Rows are reverse-translated: payload columns
//! are serialized in the topic's wire format, computed metadata columns
//! populate the outgoing envelope, and virtual columns are dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arrow_array::{Array, ArrayRef, MapArray, RecordBatch, StringArray, TimestampMillisecondArray};
use arrow_cast::display::array_value_to_string;
use arrow_schema::{Field, SchemaRef};
use tracing::{debug, info, warn};

use crate::catalog::{PulsarCatalog, TableInfo};
use crate::config::CatalogConfig;
use crate::error::{BridgeError, SerdeError};
use crate::router::{router_for, PartitionRouter};
use crate::schema::{EVENT_TIME_COLUMN, PROPERTIES_COLUMN};
use crate::serde::{serializer_for, RecordSerializer};
use crate::schema::{key_descriptor_for, value_descriptor_for};
use crate::transport::{MessageEnvelope, MessageTransport, TopicWriter};

/// Streaming sink over one table.
pub struct PulsarSink {
    info: TableInfo,
    config: CatalogConfig,
    value_schema: SchemaRef,
    key_schema: Option<SchemaRef>,
    value_serializer: Box<dyn RecordSerializer>,
    key_serializer: Option<Box<dyn RecordSerializer>>,
    writers: Vec<(i32, Box<dyn TopicWriter>)>,
    router: Box<dyn PartitionRouter>,
    unflushed: usize,
    stop: Arc<AtomicBool>,
}

impl std::fmt::Debug for PulsarSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PulsarSink")
            .field("info", &self.info)
            .field("config", &self.config)
            .field("value_schema", &self.value_schema)
            .field("key_schema", &self.key_schema)
            .field("unflushed", &self.unflushed)
            .finish_non_exhaustive()
    }
}

impl PulsarSink {
    /// Opens a sink, creating the target table if it is absent.
    ///
    /// `declared_fields` are the table's physical columns as declared by
    /// the writer's DDL; they are only used when the topic has to be
    /// created, and must be structurally compatible with an existing
    /// topic's schema otherwise.
    ///
    /// # Errors
    ///
    /// Propagates catalog errors from the auto-create path and transport
    /// errors from producer construction.
    pub async fn open(
        transport: Arc<dyn MessageTransport>,
        catalog: &PulsarCatalog,
        database: &str,
        table: &str,
        declared_fields: Vec<Field>,
    ) -> Result<Self, BridgeError> {
        let config = catalog.config().clone();
        let info = catalog
            .create_table(database, table, declared_fields, 0, true)
            .await?;

        let value_desc = value_descriptor_for(
            &info.descriptor,
            &config.key_fields,
            config.value_fields_include,
        );
        let key_format = config.key_format.and_then(|f| f.struct_format());
        let key_desc = key_descriptor_for(&info.descriptor, &config.key_fields, key_format);

        let value_serializer = serializer_for(&value_desc)?;
        let key_serializer = match &key_desc {
            Some(desc) => Some(serializer_for(desc)?),
            None => None,
        };

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
        let mut writers = Vec::with_capacity(partition_indexes.len());
        for partition in partition_indexes {
            let writer = transport
                .create_writer(&info.topic, partition)
                .await
                .map_err(|e| BridgeError::SinkWriteFailure {
                    topic: info.topic.to_string(),
                    message: e.to_string(),
                    pending: 0,
                })?;
            writers.push((partition, writer));
        }

        info!(topic = %info.topic, writers = writers.len(), "sink opened");

        let router = router_for(config.routing_mode);
        Ok(Self {
            info,
            config,
            value_schema,
            key_schema,
            value_serializer,
            key_serializer,
            writers,
            router,
            unflushed: 0,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Handle the caller flips to request a cooperative stop.
    #[must_use]
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Rows sent but not yet confirmed durable by a flush.
    #[must_use]
    pub fn pending_writes(&self) -> usize {
        self.unflushed
    }

    /// Writes every row of a batch.
    ///
    /// Rows route to partitions by key hash (or round-robin); transient
    /// send failures are retried a bounded number of times. A stop request
    /// flushes what was already sent and surfaces `Closed` instead of
    /// silently dropping the remainder.
    ///
    /// # Errors
    ///
    /// Returns `SinkWriteFailure` when a row cannot be persisted within the
    /// retry budget.
    pub async fn write_batch(&mut self, batch: &RecordBatch) -> Result<(), BridgeError> {
        let value_batch = project(batch, &self.value_schema)?;
        let value_payloads = self.value_serializer.serialize(&value_batch)?;

        let key_payloads = match (&self.key_serializer, &self.key_schema) {
            (Some(ser), Some(schema)) => {
                let key_batch = project(batch, schema)?;
                Some(ser.serialize(&key_batch)?)
            }
            _ => None,
        };
        let key_columns: Vec<ArrayRef> = self
            .info
            .schema
            .key_columns()
            .iter()
            .filter_map(|c| batch.column_by_name(c.name()).cloned())
            .collect();

        let event_times = batch
            .column_by_name(EVENT_TIME_COLUMN)
            .and_then(|c| c.as_any().downcast_ref::<TimestampMillisecondArray>().cloned());
        let properties = batch
            .column_by_name(PROPERTIES_COLUMN)
            .and_then(|c| c.as_any().downcast_ref::<MapArray>().cloned());

        for row in 0..batch.num_rows() {
            if self.stop.load(Ordering::Acquire) {
                self.flush().await?;
                return Err(BridgeError::Closed);
            }

            let key = routing_key(&key_columns, row)?;
            let mut envelope = MessageEnvelope {
                key: key.clone(),
                key_payload: key_payloads.as_ref().map(|p| p[row].clone()),
                payload: value_payloads[row].clone(),
                ..MessageEnvelope::default()
            };
            if let Some(times) = &event_times {
                if !times.is_null(row) {
                    #[allow(clippy::cast_sign_loss)]
                    {
                        envelope.event_time = Some(times.value(row) as u64);
                    }
                }
            }
            if let Some(props) = &properties {
                if !props.is_null(row) {
                    envelope.properties = map_entries(props, row)?;
                }
            }

            let writer_idx = self.pick_writer(key.as_deref());
            self.send_with_retry(writer_idx, envelope).await?;
            self.unflushed += 1;
        }
        debug!(rows = batch.num_rows(), topic = %self.info.topic, "wrote batch");
        Ok(())
    }

    fn pick_writer(&mut self, key: Option<&str>) -> usize {
        if self.writers.len() <= 1 {
            return 0;
        }
        #[allow(clippy::cast_possible_truncation)]
        let partitions = self.writers.len() as u32;
        self.router.route(key, partitions) as usize
    }

    async fn send_with_retry(
        &mut self,
        writer_idx: usize,
        envelope: MessageEnvelope,
    ) -> Result<(), BridgeError> {
        let retry_limit = self.config.send_retry_limit;
        let (_, writer) = &mut self.writers[writer_idx];
        let mut attempt = 0;
        loop {
            match writer.send(envelope.clone()).await {
                Ok(_) => return Ok(()),
                Err(e) if e.is_transient() && attempt < retry_limit => {
                    attempt += 1;
                    warn!(topic = %self.info.topic, attempt, error = %e, "retrying send");
                    tokio::time::sleep(Duration::from_millis(10 * u64::from(attempt))).await;
                }
                Err(e) => {
                    return Err(BridgeError::SinkWriteFailure {
                        topic: self.info.topic.to_string(),
                        message: e.to_string(),
                        pending: self.unflushed,
                    })
                }
            }
        }
    }

    /// Waits until every sent row is durable.
    ///
    /// # Errors
    ///
    /// Returns `SinkWriteFailure` if outstanding sends failed.
    pub async fn flush(&mut self) -> Result<(), BridgeError> {
        for (_, writer) in &mut self.writers {
            writer
                .flush()
                .await
                .map_err(|e| BridgeError::SinkWriteFailure {
                    topic: self.info.topic.to_string(),
                    message: e.to_string(),
                    pending: self.unflushed,
                })?;
        }
        self.unflushed = 0;
        Ok(())
    }

    /// Flushes and releases all producers.
    ///
    /// # Errors
    ///
    /// Propagates flush and teardown failures.
    pub async fn close(&mut self) -> Result<(), BridgeError> {
        self.stop.store(true, Ordering::Release);
        self.flush().await?;
        for (_, writer) in &mut self.writers {
            if let Err(e) = writer.close().await {
                warn!(topic = %self.info.topic, error = %e, "writer close failed");
            }
        }
        info!(topic = %self.info.topic, "sink closed");
        Ok(())
    }
}

/// Projects named columns of `batch` into the target schema's order.
fn project(batch: &RecordBatch, schema: &SchemaRef) -> Result<RecordBatch, BridgeError> {
    let mut columns = Vec::with_capacity(schema.fields().len());
    for field in schema.fields() {
        let column = batch
            .column_by_name(field.name())
            .ok_or_else(|| SerdeError::MissingField(field.name().clone()))?;
        columns.push(Arc::clone(column));
    }
    RecordBatch::try_new(Arc::clone(schema), columns)
        .map_err(|e| SerdeError::MalformedPayload(format!("failed to project batch: {e}")).into())
}

/// Text form of the row's key columns, joined for routing.
fn routing_key(key_columns: &[ArrayRef], row: usize) -> Result<Option<String>, BridgeError> {
    if key_columns.is_empty() {
        return Ok(None);
    }
    let mut parts = Vec::with_capacity(key_columns.len());
    for column in key_columns {
        let text = array_value_to_string(column, row)
            .map_err(|e| SerdeError::MalformedPayload(format!("key column: {e}")))?;
        parts.push(text);
    }
    Ok(Some(parts.join(",")))
}

fn map_entries(
    map: &MapArray,
    row: usize,
) -> Result<std::collections::HashMap<String, String>, BridgeError> {
    let entries = map.value(row);
    let keys = entries
        .column(0)
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| SerdeError::MalformedPayload("properties keys must be strings".into()))?;
    let values = entries
        .column(1)
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| SerdeError::MalformedPayload("properties values must be strings".into()))?;
    let mut out = std::collections::HashMap::with_capacity(keys.len());
    for i in 0..keys.len() {
        if !values.is_null(i) {
            out.insert(keys.value(i).to_string(), values.value(i).to_string());
        }
    }
    Ok(out)
}
