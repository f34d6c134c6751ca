//! Avro payload codec.
//!
//! Converts between Avro binary records and Arrow `RecordBatch` using
//! `apache-avro`. The Avro record schema is derived from the topic's field
//! definitions; payloads are single datums without container framing.

use apache_avro::types::Value as AvroValue;
use apache_avro::{from_avro_datum, to_avro_datum, Schema as AvroSchema};
use arrow_array::{Array, RecordBatch};
use arrow_schema::{DataType, SchemaRef};
use serde_json::{json, Value as JsonValue};

use super::{json::rows_to_batch, Format, RecordDeserializer, RecordSerializer};
use crate::error::SerdeError;
use crate::schema::FieldDef;

fn avro_type_name(dt: &DataType) -> Result<&'static str, SerdeError> {
    match dt {
        DataType::Boolean => Ok("boolean"),
        DataType::Int8 | DataType::Int16 | DataType::Int32 => Ok("int"),
        DataType::Int64 => Ok("long"),
        DataType::Float32 => Ok("float"),
        DataType::Float64 => Ok("double"),
        DataType::Utf8 => Ok("string"),
        other => Err(SerdeError::UnsupportedFormat(format!(
            "unsupported Arrow type for Avro payloads: {other}"
        ))),
    }
}

/// Derives the Avro record schema for a field list.
fn record_schema(fields: &[FieldDef]) -> Result<AvroSchema, SerdeError> {
    let mut avro_fields = Vec::with_capacity(fields.len());
    for f in fields {
        let type_name = avro_type_name(&f.data_type)?;
        let ty: JsonValue = if f.nullable {
            json!(["null", type_name])
        } else {
            json!(type_name)
        };
        avro_fields.push(json!({ "name": f.name, "type": ty }));
    }
    let schema_json = json!({
        "type": "record",
        "name": "Row",
        "fields": avro_fields,
    });
    AvroSchema::parse(&schema_json).map_err(|e| SerdeError::Avro(e.to_string()))
}

fn avro_to_json(value: AvroValue) -> Result<JsonValue, SerdeError> {
    Ok(match value {
        AvroValue::Null => JsonValue::Null,
        AvroValue::Boolean(b) => JsonValue::Bool(b),
        AvroValue::Int(i) => JsonValue::from(i),
        AvroValue::Long(l) => JsonValue::from(l),
        AvroValue::Float(f) => {
            serde_json::Number::from_f64(f64::from(f)).map_or(JsonValue::Null, JsonValue::Number)
        }
        AvroValue::Double(d) => {
            serde_json::Number::from_f64(d).map_or(JsonValue::Null, JsonValue::Number)
        }
        AvroValue::String(s) => JsonValue::String(s),
        AvroValue::Union(_, inner) => avro_to_json(*inner)?,
        AvroValue::Record(fields) => {
            let mut obj = serde_json::Map::with_capacity(fields.len());
            for (name, v) in fields {
                obj.insert(name, avro_to_json(v)?);
            }
            JsonValue::Object(obj)
        }
        other => {
            return Err(SerdeError::Avro(format!(
                "unsupported Avro value: {other:?}"
            )))
        }
    })
}

/// Avro payload deserializer.
#[derive(Debug)]
pub struct AvroDeserializer {
    schema: AvroSchema,
}

impl AvroDeserializer {
    /// Creates a deserializer from the topic's field definitions.
    ///
    /// # Errors
    ///
    /// Returns `SerdeError::UnsupportedFormat` if a field type has no Avro
    /// mapping.
    pub fn from_fields(fields: &[FieldDef]) -> Result<Self, SerdeError> {
        Ok(Self {
            schema: record_schema(fields)?,
        })
    }
}

impl RecordDeserializer for AvroDeserializer {
    fn deserialize(&self, data: &[u8], schema: &SchemaRef) -> Result<RecordBatch, SerdeError> {
        let mut reader = data;
        let value = from_avro_datum(&self.schema, &mut reader, None)
            .map_err(|e| SerdeError::Avro(e.to_string()))?;
        let row = avro_to_json(value)?;
        rows_to_batch(&[row], schema)
    }

    fn format(&self) -> Format {
        Format::Avro
    }
}

/// Avro payload serializer.
#[derive(Debug)]
pub struct AvroSerializer {
    schema: AvroSchema,
}

impl AvroSerializer {
    /// Creates a serializer from the topic's field definitions.
    ///
    /// # Errors
    ///
    /// Returns `SerdeError::UnsupportedFormat` if a field type has no Avro
    /// mapping.
    pub fn from_fields(fields: &[FieldDef]) -> Result<Self, SerdeError> {
        Ok(Self {
            schema: record_schema(fields)?,
        })
    }

    fn cell_to_avro(
        column: &arrow_array::ArrayRef,
        row: usize,
        data_type: &DataType,
        nullable: bool,
    ) -> Result<AvroValue, SerdeError> {
        use arrow_array::{
            BooleanArray, Float32Array, Float64Array, Int16Array, Int32Array, Int64Array,
            Int8Array, StringArray,
        };

        macro_rules! downcast {
            ($ty:ty) => {
                column
                    .as_any()
                    .downcast_ref::<$ty>()
                    .ok_or_else(|| SerdeError::MalformedPayload("column type mismatch".into()))?
            };
        }

        let inner = if column.is_null(row) {
            AvroValue::Null
        } else {
            match data_type {
                DataType::Boolean => AvroValue::Boolean(downcast!(BooleanArray).value(row)),
                DataType::Int8 => AvroValue::Int(i32::from(downcast!(Int8Array).value(row))),
                DataType::Int16 => AvroValue::Int(i32::from(downcast!(Int16Array).value(row))),
                DataType::Int32 => AvroValue::Int(downcast!(Int32Array).value(row)),
                DataType::Int64 => AvroValue::Long(downcast!(Int64Array).value(row)),
                DataType::Float32 => AvroValue::Float(downcast!(Float32Array).value(row)),
                DataType::Float64 => AvroValue::Double(downcast!(Float64Array).value(row)),
                DataType::Utf8 => AvroValue::String(downcast!(StringArray).value(row).to_string()),
                other => {
                    return Err(SerdeError::UnsupportedFormat(format!(
                        "unsupported Arrow type for Avro payloads: {other}"
                    )))
                }
            }
        };

        // Nullable fields are ["null", T] unions; position 0 is null.
        if nullable {
            let position = u32::from(!matches!(inner, AvroValue::Null));
            Ok(AvroValue::Union(position, Box::new(inner)))
        } else {
            Ok(inner)
        }
    }
}

impl RecordSerializer for AvroSerializer {
    fn serialize(&self, batch: &RecordBatch) -> Result<Vec<Vec<u8>>, SerdeError> {
        let schema = batch.schema();
        let mut records = Vec::with_capacity(batch.num_rows());

        for row in 0..batch.num_rows() {
            let mut fields = Vec::with_capacity(schema.fields().len());
            for (col_idx, field) in schema.fields().iter().enumerate() {
                let value = Self::cell_to_avro(
                    batch.column(col_idx),
                    row,
                    field.data_type(),
                    field.is_nullable(),
                )?;
                fields.push((field.name().clone(), value));
            }
            let datum = to_avro_datum(&self.schema, AvroValue::Record(fields))
                .map_err(|e| SerdeError::Avro(e.to_string()))?;
            records.push(datum);
        }
        Ok(records)
    }

    fn format(&self) -> Format {
        Format::Avro
    }
}
