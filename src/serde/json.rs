//! JSON payload codec.
//!
//! Converts between JSON object payloads and Arrow `RecordBatch` using
//! `serde_json`. Fields map by name; nullability follows the schema.

use std::sync::Arc;

use arrow_array::builder::{
    BooleanBuilder, Float32Builder, Float64Builder, Int16Builder, Int32Builder, Int64Builder,
    Int8Builder, StringBuilder,
};
use arrow_array::{Array, ArrayRef, RecordBatch};
use arrow_schema::{DataType, SchemaRef};
use serde_json::Value;

use super::{Format, RecordDeserializer, RecordSerializer};
use crate::error::SerdeError;

/// JSON payload deserializer.
///
/// Supported Arrow types: Boolean, Int8 through Int64, Float32/Float64,
/// and Utf8. Non-string JSON values are coerced to text for Utf8 columns.
#[derive(Debug, Clone, Default)]
pub struct JsonDeserializer;

impl JsonDeserializer {
    /// Creates a new JSON deserializer.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl RecordDeserializer for JsonDeserializer {
    fn deserialize(&self, data: &[u8], schema: &SchemaRef) -> Result<RecordBatch, SerdeError> {
        let value: Value = serde_json::from_slice(data)?;
        rows_to_batch(&[value], schema)
    }

    fn deserialize_batch(
        &self,
        records: &[&[u8]],
        schema: &SchemaRef,
    ) -> Result<RecordBatch, SerdeError> {
        let values: Vec<Value> = records
            .iter()
            .map(|data| serde_json::from_slice(data).map_err(SerdeError::from))
            .collect::<Result<_, _>>()?;
        rows_to_batch(&values, schema)
    }

    fn format(&self) -> Format {
        Format::Json
    }
}

/// JSON payload serializer.
#[derive(Debug, Clone, Default)]
pub struct JsonSerializer;

impl JsonSerializer {
    /// Creates a new JSON serializer.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl RecordSerializer for JsonSerializer {
    fn serialize(&self, batch: &RecordBatch) -> Result<Vec<Vec<u8>>, SerdeError> {
        let schema = batch.schema();
        let mut records = Vec::with_capacity(batch.num_rows());

        for row in 0..batch.num_rows() {
            let mut obj = serde_json::Map::new();
            for (col_idx, field) in schema.fields().iter().enumerate() {
                let column = batch.column(col_idx);
                let value = if column.is_null(row) {
                    Value::Null
                } else {
                    cell_to_json(column, row, field.data_type())?
                };
                obj.insert(field.name().clone(), value);
            }
            records.push(serde_json::to_vec(&Value::Object(obj))?);
        }
        Ok(records)
    }

    fn format(&self) -> Format {
        Format::Json
    }
}

/// Builds a batch from one JSON object per row.
///
/// Shared with the Avro codec, which converts decoded records to JSON
/// values before column assembly.
pub(crate) fn rows_to_batch(rows: &[Value], schema: &SchemaRef) -> Result<RecordBatch, SerdeError> {
    if rows.is_empty() {
        return Ok(RecordBatch::new_empty(schema.clone()));
    }

    let mut objects = Vec::with_capacity(rows.len());
    for row in rows {
        objects.push(
            row.as_object()
                .ok_or_else(|| SerdeError::MalformedPayload("expected JSON object".into()))?,
        );
    }

    let mut columns: Vec<ArrayRef> = Vec::with_capacity(schema.fields().len());
    for field in schema.fields() {
        let mut cells = Vec::with_capacity(objects.len());
        for obj in &objects {
            let cell = obj.get(field.name());
            if !field.is_nullable() && matches!(cell, None | Some(Value::Null)) {
                return Err(SerdeError::MissingField(field.name().clone()));
            }
            cells.push(cell);
        }
        columns.push(build_column(field.data_type(), field.name(), &cells)?);
    }

    RecordBatch::try_new(schema.clone(), columns)
        .map_err(|e| SerdeError::MalformedPayload(format!("failed to create RecordBatch: {e}")))
}

fn conversion_error(field: &str, expected: &str, got: &dyn std::fmt::Debug) -> SerdeError {
    SerdeError::TypeConversion {
        field: field.into(),
        expected: expected.into(),
        message: format!("got {got:?}"),
    }
}

macro_rules! int_column {
    ($builder:ty, $native:ty, $name:expr, $cells:expr, $type_name:expr) => {{
        let mut builder = <$builder>::with_capacity($cells.len());
        for cell in $cells {
            match cell {
                Some(Value::Number(n)) => {
                    let i = n
                        .as_i64()
                        .ok_or_else(|| conversion_error($name, $type_name, n))?;
                    let native = <$native>::try_from(i).map_err(|e| SerdeError::TypeConversion {
                        field: $name.into(),
                        expected: $type_name.into(),
                        message: format!("{e}"),
                    })?;
                    builder.append_value(native);
                }
                Some(Value::Null) | None => builder.append_null(),
                Some(other) => return Err(conversion_error($name, $type_name, other)),
            }
        }
        Ok(Arc::new(builder.finish()) as ArrayRef)
    }};
}

fn build_column(
    data_type: &DataType,
    name: &str,
    cells: &[Option<&Value>],
) -> Result<ArrayRef, SerdeError> {
    match data_type {
        DataType::Boolean => {
            let mut builder = BooleanBuilder::with_capacity(cells.len());
            for cell in cells {
                match cell {
                    Some(Value::Bool(b)) => builder.append_value(*b),
                    Some(Value::Null) | None => builder.append_null(),
                    Some(other) => return Err(conversion_error(name, "Boolean", other)),
                }
            }
            Ok(Arc::new(builder.finish()))
        }
        DataType::Int8 => int_column!(Int8Builder, i8, name, cells, "Int8"),
        DataType::Int16 => int_column!(Int16Builder, i16, name, cells, "Int16"),
        DataType::Int32 => int_column!(Int32Builder, i32, name, cells, "Int32"),
        DataType::Int64 => int_column!(Int64Builder, i64, name, cells, "Int64"),
        DataType::Float32 => {
            let mut builder = Float32Builder::with_capacity(cells.len());
            for cell in cells {
                match cell {
                    Some(Value::Number(n)) => {
                        let v = n
                            .as_f64()
                            .ok_or_else(|| conversion_error(name, "Float32", n))?;
                        #[allow(clippy::cast_possible_truncation)]
                        builder.append_value(v as f32);
                    }
                    Some(Value::Null) | None => builder.append_null(),
                    Some(other) => return Err(conversion_error(name, "Float32", other)),
                }
            }
            Ok(Arc::new(builder.finish()))
        }
        DataType::Float64 => {
            let mut builder = Float64Builder::with_capacity(cells.len());
            for cell in cells {
                match cell {
                    Some(Value::Number(n)) => {
                        let v = n
                            .as_f64()
                            .ok_or_else(|| conversion_error(name, "Float64", n))?;
                        builder.append_value(v);
                    }
                    Some(Value::Null) | None => builder.append_null(),
                    Some(other) => return Err(conversion_error(name, "Float64", other)),
                }
            }
            Ok(Arc::new(builder.finish()))
        }
        DataType::Utf8 => {
            let mut builder = StringBuilder::with_capacity(cells.len(), cells.len() * 32);
            for cell in cells {
                match cell {
                    Some(Value::String(s)) => builder.append_value(s),
                    Some(Value::Null) | None => builder.append_null(),
                    // Coerce non-string values to their text form
                    Some(other) => builder.append_value(other.to_string()),
                }
            }
            Ok(Arc::new(builder.finish()))
        }
        other => Err(SerdeError::UnsupportedFormat(format!(
            "unsupported Arrow type for JSON payloads: {other}"
        ))),
    }
}

fn cell_to_json(column: &ArrayRef, row: usize, data_type: &DataType) -> Result<Value, SerdeError> {
    use arrow_array::{
        BooleanArray, Float32Array, Float64Array, Int16Array, Int32Array, Int64Array, Int8Array,
        StringArray,
    };

    macro_rules! downcast {
        ($ty:ty) => {
            column
                .as_any()
                .downcast_ref::<$ty>()
                .ok_or_else(|| SerdeError::MalformedPayload("column type mismatch".into()))?
        };
    }

    match data_type {
        DataType::Boolean => Ok(Value::Bool(downcast!(BooleanArray).value(row))),
        DataType::Int8 => Ok(Value::from(downcast!(Int8Array).value(row))),
        DataType::Int16 => Ok(Value::from(downcast!(Int16Array).value(row))),
        DataType::Int32 => Ok(Value::from(downcast!(Int32Array).value(row))),
        DataType::Int64 => Ok(Value::from(downcast!(Int64Array).value(row))),
        DataType::Float32 => {
            let v = f64::from(downcast!(Float32Array).value(row));
            Ok(serde_json::Number::from_f64(v).map_or(Value::Null, Value::Number))
        }
        DataType::Float64 => {
            let v = downcast!(Float64Array).value(row);
            Ok(serde_json::Number::from_f64(v).map_or(Value::Null, Value::Number))
        }
        DataType::Utf8 => Ok(Value::String(downcast!(StringArray).value(row).to_string())),
        other => Err(SerdeError::UnsupportedFormat(format!(
            "unsupported Arrow type for JSON payloads: {other}"
        ))),
    }
}
