//! Raw bytes pass-through codec.
//!
//! Topics with no declared schema expose a single Binary `value` column;
//! payload bytes flow through untouched in both directions.

use std::sync::Arc;

use arrow_array::builder::BinaryBuilder;
use arrow_array::{Array, BinaryArray, RecordBatch};
use arrow_schema::{DataType, SchemaRef};

use super::{Format, RecordDeserializer, RecordSerializer};
use crate::error::SerdeError;

fn check_raw_schema(schema: &SchemaRef) -> Result<(), SerdeError> {
    if schema.fields().len() != 1 || schema.field(0).data_type() != &DataType::Binary {
        return Err(SerdeError::UnsupportedFormat(
            "raw codec requires a single Binary column".into(),
        ));
    }
    Ok(())
}

/// Raw bytes deserializer.
#[derive(Debug, Clone, Default)]
pub struct RawBytesDeserializer;

impl RawBytesDeserializer {
    /// Creates a new raw bytes deserializer.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl RecordDeserializer for RawBytesDeserializer {
    fn deserialize(&self, data: &[u8], schema: &SchemaRef) -> Result<RecordBatch, SerdeError> {
        self.deserialize_batch(&[data], schema)
    }

    fn deserialize_batch(
        &self,
        records: &[&[u8]],
        schema: &SchemaRef,
    ) -> Result<RecordBatch, SerdeError> {
        check_raw_schema(schema)?;
        let mut builder = BinaryBuilder::new();
        for data in records {
            builder.append_value(data);
        }
        RecordBatch::try_new(schema.clone(), vec![Arc::new(builder.finish())])
            .map_err(|e| SerdeError::MalformedPayload(format!("failed to create RecordBatch: {e}")))
    }

    fn format(&self) -> Format {
        Format::Raw
    }
}

/// Raw bytes serializer.
#[derive(Debug, Clone, Default)]
pub struct RawBytesSerializer;

impl RawBytesSerializer {
    /// Creates a new raw bytes serializer.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl RecordSerializer for RawBytesSerializer {
    fn serialize(&self, batch: &RecordBatch) -> Result<Vec<Vec<u8>>, SerdeError> {
        check_raw_schema(&batch.schema())?;
        let column = batch
            .column(0)
            .as_any()
            .downcast_ref::<BinaryArray>()
            .ok_or_else(|| SerdeError::MalformedPayload("column type mismatch".into()))?;
        let mut records = Vec::with_capacity(batch.num_rows());
        for row in 0..batch.num_rows() {
            if column.is_null(row) {
                records.push(Vec::new());
            } else {
                records.push(column.value(row).to_vec());
            }
        }
        Ok(records)
    }

    fn format(&self) -> Format {
        Format::Raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_schema::{Field, Schema};

    fn raw_schema() -> SchemaRef {
        Arc::new(Schema::new(vec![Field::new(
            "value",
            DataType::Binary,
            true,
        )]))
    }

    #[test]
    fn test_raw_round_trip() {
        let deser = RawBytesDeserializer::new();
        let ser = RawBytesSerializer::new();
        let schema = raw_schema();

        let payloads: Vec<&[u8]> = vec![b"one", b"\x00\x01\x02"];
        let batch = deser.deserialize_batch(&payloads, &schema).unwrap();
        assert_eq!(batch.num_rows(), 2);

        let out = ser.serialize(&batch).unwrap();
        assert_eq!(out[0], b"one");
        assert_eq!(out[1], b"\x00\x01\x02");
    }

    #[test]
    fn test_raw_rejects_wrong_schema() {
        let deser = RawBytesDeserializer::new();
        let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Utf8, true)]));
        assert!(deser.deserialize(b"data", &schema).is_err());
    }
}
