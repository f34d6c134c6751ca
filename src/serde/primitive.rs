//! Primitive scalar codec.
//!
//! Topics with a primitive schema carry one scalar per message. Numeric
//! kinds use fixed-width big-endian encodings, strings are UTF-8, booleans
//! a single byte. An empty payload decodes to null.

use std::sync::Arc;

use arrow_array::builder::{
    BinaryBuilder, BooleanBuilder, Float32Builder, Float64Builder, Int16Builder, Int32Builder,
    Int64Builder, Int8Builder, StringBuilder,
};
use arrow_array::{Array, ArrayRef, RecordBatch};
use arrow_schema::SchemaRef;

use super::{Format, RecordDeserializer, RecordSerializer};
use crate::error::SerdeError;
use crate::schema::PrimitiveKind;

fn fixed_width(data: &[u8], want: usize, kind: PrimitiveKind) -> Result<&[u8], SerdeError> {
    if data.len() == want {
        Ok(data)
    } else {
        Err(SerdeError::MalformedPayload(format!(
            "{kind:?} payload must be {want} bytes, got {}",
            data.len()
        )))
    }
}

/// Primitive scalar deserializer for a fixed kind.
#[derive(Debug, Clone)]
pub struct PrimitiveDeserializer {
    kind: PrimitiveKind,
}

impl PrimitiveDeserializer {
    /// Creates a deserializer for the given scalar kind.
    #[must_use]
    pub fn new(kind: PrimitiveKind) -> Self {
        Self { kind }
    }

    #[allow(clippy::too_many_lines)]
    fn build_column(&self, records: &[&[u8]]) -> Result<ArrayRef, SerdeError> {
        let kind = self.kind;
        Ok(match kind {
            PrimitiveKind::Boolean => {
                let mut b = BooleanBuilder::with_capacity(records.len());
                for data in records {
                    if data.is_empty() {
                        b.append_null();
                    } else {
                        let byte = fixed_width(data, 1, kind)?[0];
                        b.append_value(byte != 0);
                    }
                }
                Arc::new(b.finish())
            }
            PrimitiveKind::Int8 => {
                let mut b = Int8Builder::with_capacity(records.len());
                for data in records {
                    if data.is_empty() {
                        b.append_null();
                    } else {
                        #[allow(clippy::cast_possible_wrap)]
                        b.append_value(fixed_width(data, 1, kind)?[0] as i8);
                    }
                }
                Arc::new(b.finish())
            }
            PrimitiveKind::Int16 => {
                let mut b = Int16Builder::with_capacity(records.len());
                for data in records {
                    if data.is_empty() {
                        b.append_null();
                    } else {
                        let bytes = fixed_width(data, 2, kind)?;
                        b.append_value(i16::from_be_bytes([bytes[0], bytes[1]]));
                    }
                }
                Arc::new(b.finish())
            }
            PrimitiveKind::Int32 => {
                let mut b = Int32Builder::with_capacity(records.len());
                for data in records {
                    if data.is_empty() {
                        b.append_null();
                    } else {
                        let bytes: [u8; 4] = fixed_width(data, 4, kind)?.try_into().unwrap();
                        b.append_value(i32::from_be_bytes(bytes));
                    }
                }
                Arc::new(b.finish())
            }
            PrimitiveKind::Int64 => {
                let mut b = Int64Builder::with_capacity(records.len());
                for data in records {
                    if data.is_empty() {
                        b.append_null();
                    } else {
                        let bytes: [u8; 8] = fixed_width(data, 8, kind)?.try_into().unwrap();
                        b.append_value(i64::from_be_bytes(bytes));
                    }
                }
                Arc::new(b.finish())
            }
            PrimitiveKind::Float => {
                let mut b = Float32Builder::with_capacity(records.len());
                for data in records {
                    if data.is_empty() {
                        b.append_null();
                    } else {
                        let bytes: [u8; 4] = fixed_width(data, 4, kind)?.try_into().unwrap();
                        b.append_value(f32::from_be_bytes(bytes));
                    }
                }
                Arc::new(b.finish())
            }
            PrimitiveKind::Double => {
                let mut b = Float64Builder::with_capacity(records.len());
                for data in records {
                    if data.is_empty() {
                        b.append_null();
                    } else {
                        let bytes: [u8; 8] = fixed_width(data, 8, kind)?.try_into().unwrap();
                        b.append_value(f64::from_be_bytes(bytes));
                    }
                }
                Arc::new(b.finish())
            }
            PrimitiveKind::String => {
                let mut b = StringBuilder::with_capacity(records.len(), records.len() * 16);
                for data in records {
                    let s = std::str::from_utf8(data).map_err(|e| {
                        SerdeError::MalformedPayload(format!("invalid UTF-8 payload: {e}"))
                    })?;
                    b.append_value(s);
                }
                Arc::new(b.finish())
            }
            PrimitiveKind::Bytes => {
                let mut b = BinaryBuilder::new();
                for data in records {
                    b.append_value(data);
                }
                Arc::new(b.finish())
            }
        })
    }
}

impl RecordDeserializer for PrimitiveDeserializer {
    fn deserialize(&self, data: &[u8], schema: &SchemaRef) -> Result<RecordBatch, SerdeError> {
        self.deserialize_batch(&[data], schema)
    }

    fn deserialize_batch(
        &self,
        records: &[&[u8]],
        schema: &SchemaRef,
    ) -> Result<RecordBatch, SerdeError> {
        if schema.fields().len() != 1 || schema.field(0).data_type() != &self.kind.data_type() {
            return Err(SerdeError::UnsupportedFormat(format!(
                "primitive codec for {:?} requires a single {} column",
                self.kind,
                self.kind.data_type()
            )));
        }
        let column = self.build_column(records)?;
        RecordBatch::try_new(schema.clone(), vec![column])
            .map_err(|e| SerdeError::MalformedPayload(format!("failed to create RecordBatch: {e}")))
    }

    fn format(&self) -> Format {
        Format::Primitive
    }
}

/// Primitive scalar serializer for a fixed kind.
#[derive(Debug, Clone)]
pub struct PrimitiveSerializer {
    kind: PrimitiveKind,
}

impl PrimitiveSerializer {
    /// Creates a serializer for the given scalar kind.
    #[must_use]
    pub fn new(kind: PrimitiveKind) -> Self {
        Self { kind }
    }
}

impl RecordSerializer for PrimitiveSerializer {
    fn serialize(&self, batch: &RecordBatch) -> Result<Vec<Vec<u8>>, SerdeError> {
        use arrow_array::{
            BinaryArray, BooleanArray, Float32Array, Float64Array, Int16Array, Int32Array,
            Int64Array, Int8Array, StringArray,
        };

        if batch.num_columns() != 1 {
            return Err(SerdeError::UnsupportedFormat(
                "primitive codec requires a single column".into(),
            ));
        }
        let column = batch.column(0);

        macro_rules! downcast {
            ($ty:ty) => {
                column
                    .as_any()
                    .downcast_ref::<$ty>()
                    .ok_or_else(|| SerdeError::MalformedPayload("column type mismatch".into()))?
            };
        }

        let mut records = Vec::with_capacity(batch.num_rows());
        for row in 0..batch.num_rows() {
            if column.is_null(row) {
                records.push(Vec::new());
                continue;
            }
            let bytes = match self.kind {
                PrimitiveKind::Boolean => vec![u8::from(downcast!(BooleanArray).value(row))],
                #[allow(clippy::cast_sign_loss)]
                PrimitiveKind::Int8 => vec![downcast!(Int8Array).value(row) as u8],
                PrimitiveKind::Int16 => downcast!(Int16Array).value(row).to_be_bytes().to_vec(),
                PrimitiveKind::Int32 => downcast!(Int32Array).value(row).to_be_bytes().to_vec(),
                PrimitiveKind::Int64 => downcast!(Int64Array).value(row).to_be_bytes().to_vec(),
                PrimitiveKind::Float => downcast!(Float32Array).value(row).to_be_bytes().to_vec(),
                PrimitiveKind::Double => downcast!(Float64Array).value(row).to_be_bytes().to_vec(),
                PrimitiveKind::String => downcast!(StringArray).value(row).as_bytes().to_vec(),
                PrimitiveKind::Bytes => downcast!(BinaryArray).value(row).to_vec(),
            };
            records.push(bytes);
        }
        Ok(records)
    }

    fn format(&self) -> Format {
        Format::Primitive
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_schema::{Field, Schema};

    fn schema_for(kind: PrimitiveKind) -> SchemaRef {
        Arc::new(Schema::new(vec![Field::new(
            "value",
            kind.data_type(),
            true,
        )]))
    }

    #[test]
    fn test_int32_big_endian() {
        let deser = PrimitiveDeserializer::new(PrimitiveKind::Int32);
        let schema = schema_for(PrimitiveKind::Int32);
        let batch = deser
            .deserialize(&0x0102_0304_i32.to_be_bytes(), &schema)
            .unwrap();
        let arr = batch
            .column(0)
            .as_any()
            .downcast_ref::<arrow_array::Int32Array>()
            .unwrap();
        assert_eq!(arr.value(0), 0x0102_0304);
    }

    #[test]
    fn test_int32_round_trip() {
        let deser = PrimitiveDeserializer::new(PrimitiveKind::Int32);
        let ser = PrimitiveSerializer::new(PrimitiveKind::Int32);
        let schema = schema_for(PrimitiveKind::Int32);

        let payloads: Vec<&[u8]> = vec![&[0, 0, 0, 7], &[255, 255, 255, 255]];
        let batch = deser.deserialize_batch(&payloads, &schema).unwrap();
        let out = ser.serialize(&batch).unwrap();
        assert_eq!(out[0], vec![0, 0, 0, 7]);
        assert_eq!(out[1], vec![255, 255, 255, 255]);
    }

    #[test]
    fn test_string_utf8() {
        let deser = PrimitiveDeserializer::new(PrimitiveKind::String);
        let schema = schema_for(PrimitiveKind::String);
        let batch = deser.deserialize(b"hello", &schema).unwrap();
        let arr = batch
            .column(0)
            .as_any()
            .downcast_ref::<arrow_array::StringArray>()
            .unwrap();
        assert_eq!(arr.value(0), "hello");

        assert!(deser.deserialize(&[0xff, 0xfe], &schema).is_err());
    }

    #[test]
    fn test_empty_payload_is_null() {
        let deser = PrimitiveDeserializer::new(PrimitiveKind::Int64);
        let schema = schema_for(PrimitiveKind::Int64);
        let batch = deser.deserialize(b"", &schema).unwrap();
        assert!(batch.column(0).is_null(0));
    }

    #[test]
    fn test_wrong_width_rejected() {
        let deser = PrimitiveDeserializer::new(PrimitiveKind::Int64);
        let schema = schema_for(PrimitiveKind::Int64);
        assert!(deser.deserialize(&[1, 2, 3], &schema).is_err());
    }

    #[test]
    fn test_double_round_trip() {
        let deser = PrimitiveDeserializer::new(PrimitiveKind::Double);
        let ser = PrimitiveSerializer::new(PrimitiveKind::Double);
        let schema = schema_for(PrimitiveKind::Double);

        let payload = 3.5_f64.to_be_bytes();
        let batch = deser.deserialize(&payload, &schema).unwrap();
        let out = ser.serialize(&batch).unwrap();
        assert_eq!(out[0], payload.to_vec());
    }
}
