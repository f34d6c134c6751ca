//! Payload serialization and deserialization framework.
//!
//! Converts between topic payload bytes and Arrow `RecordBatch`:
//!
//! - [`RecordDeserializer`]: raw payload bytes to `RecordBatch`
//! - [`RecordSerializer`]: `RecordBatch` to raw payload bytes
//! - [`Format`]: the supported wire formats
//!
//! ## Implementations
//!
//! - [`json`]: JSON objects using `serde_json`
//! - [`avro`]: Avro binary records using `apache-avro`
//! - [`primitive`]: scalar wire encodings (big-endian numerics, UTF-8 text)
//! - [`raw`]: opaque bytes pass-through

pub mod avro;
pub mod json;
pub mod primitive;
pub mod raw;

use arrow_array::RecordBatch;
use arrow_schema::SchemaRef;

use crate::error::SerdeError;
use crate::schema::{SchemaDescriptor, StructFormat};

/// Supported wire formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    /// JSON objects.
    Json,

    /// Avro binary records.
    Avro,

    /// Raw bytes (no deserialization).
    Raw,

    /// Scalar wire encoding of a primitive-schema topic.
    Primitive,
}

impl Format {
    /// Returns the format name as a string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Json => "json",
            Format::Avro => "avro",
            Format::Raw => "raw",
            Format::Primitive => "primitive",
        }
    }

    /// The structured-schema format this wire format corresponds to, if any.
    #[must_use]
    pub fn struct_format(&self) -> Option<StructFormat> {
        match self {
            Format::Json => Some(StructFormat::Json),
            Format::Avro => Some(StructFormat::Avro),
            Format::Raw | Format::Primitive => None,
        }
    }
}

impl std::str::FromStr for Format {
    type Err = SerdeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Format::Json),
            "avro" => Ok(Format::Avro),
            "raw" | "bytes" => Ok(Format::Raw),
            other => Err(SerdeError::UnsupportedFormat(other.to_string())),
        }
    }
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Trait for deserializing payload bytes into Arrow `RecordBatch`.
///
/// The schema passed in covers the payload's columns only; envelope
/// metadata columns are assembled by the caller.
pub trait RecordDeserializer: Send + Sync {
    /// Deserializes a single payload into a one-row batch.
    ///
    /// # Errors
    ///
    /// Returns `SerdeError` if the input cannot be parsed or does not
    /// match the expected schema.
    fn deserialize(&self, data: &[u8], schema: &SchemaRef) -> Result<RecordBatch, SerdeError>;

    /// Deserializes a batch of payloads.
    ///
    /// The default implementation calls `deserialize` per payload and
    /// concatenates the results.
    ///
    /// # Errors
    ///
    /// Returns `SerdeError` if any payload cannot be parsed.
    fn deserialize_batch(
        &self,
        records: &[&[u8]],
        schema: &SchemaRef,
    ) -> Result<RecordBatch, SerdeError> {
        if records.is_empty() {
            return Ok(RecordBatch::new_empty(schema.clone()));
        }

        let batches: Result<Vec<RecordBatch>, SerdeError> = records
            .iter()
            .map(|data| self.deserialize(data, schema))
            .collect();
        let batches = batches?;

        arrow_select::concat::concat_batches(schema, &batches)
            .map_err(|e| SerdeError::MalformedPayload(format!("failed to concat batches: {e}")))
    }

    /// Returns the format this deserializer handles.
    fn format(&self) -> Format;
}

/// Trait for serializing Arrow `RecordBatch` into payload bytes.
///
/// Each row becomes one payload.
pub trait RecordSerializer: Send + Sync {
    /// Serializes a `RecordBatch`, one byte record per row.
    ///
    /// # Errors
    ///
    /// Returns `SerdeError` if serialization fails.
    fn serialize(&self, batch: &RecordBatch) -> Result<Vec<Vec<u8>>, SerdeError>;

    /// Returns the format this serializer produces.
    fn format(&self) -> Format;
}

/// Creates a deserializer for a topic's schema descriptor.
///
/// Primitive and raw descriptors fix the codec; structured descriptors
/// select the codec by their declared wire format.
///
/// # Errors
///
/// Returns `SerdeError::UnsupportedFormat` if no codec covers the
/// descriptor.
pub fn deserializer_for(
    descriptor: &SchemaDescriptor,
) -> Result<Box<dyn RecordDeserializer>, SerdeError> {
    match descriptor {
        SchemaDescriptor::Primitive(kind) => {
            Ok(Box::new(primitive::PrimitiveDeserializer::new(*kind)))
        }
        SchemaDescriptor::Structured {
            format: StructFormat::Json,
            ..
        } => Ok(Box::new(json::JsonDeserializer::new())),
        SchemaDescriptor::Structured {
            format: StructFormat::Avro,
            fields,
        } => Ok(Box::new(avro::AvroDeserializer::from_fields(fields)?)),
        SchemaDescriptor::Raw => Ok(Box::new(raw::RawBytesDeserializer::new())),
    }
}

/// Creates a serializer for a topic's schema descriptor.
///
/// # Errors
///
/// Returns `SerdeError::UnsupportedFormat` if no codec covers the
/// descriptor.
pub fn serializer_for(
    descriptor: &SchemaDescriptor,
) -> Result<Box<dyn RecordSerializer>, SerdeError> {
    match descriptor {
        SchemaDescriptor::Primitive(kind) => {
            Ok(Box::new(primitive::PrimitiveSerializer::new(*kind)))
        }
        SchemaDescriptor::Structured {
            format: StructFormat::Json,
            ..
        } => Ok(Box::new(json::JsonSerializer::new())),
        SchemaDescriptor::Structured {
            format: StructFormat::Avro,
            fields,
        } => Ok(Box::new(avro::AvroSerializer::from_fields(fields)?)),
        SchemaDescriptor::Raw => Ok(Box::new(raw::RawBytesSerializer::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::PrimitiveKind;

    #[test]
    fn test_format_from_str() {
        assert_eq!("json".parse::<Format>().unwrap(), Format::Json);
        assert_eq!("JSON".parse::<Format>().unwrap(), Format::Json);
        assert_eq!("avro".parse::<Format>().unwrap(), Format::Avro);
        assert_eq!("raw".parse::<Format>().unwrap(), Format::Raw);
        assert_eq!("bytes".parse::<Format>().unwrap(), Format::Raw);
        assert!("csv".parse::<Format>().is_err());
    }

    #[test]
    fn test_format_display() {
        assert_eq!(Format::Json.to_string(), "json");
        assert_eq!(Format::Avro.to_string(), "avro");
        assert_eq!(Format::Raw.to_string(), "raw");
    }

    #[test]
    fn test_codec_selection() {
        let primitive = SchemaDescriptor::Primitive(PrimitiveKind::Int64);
        assert!(deserializer_for(&primitive).is_ok());
        assert!(serializer_for(&primitive).is_ok());

        let raw = SchemaDescriptor::Raw;
        assert_eq!(deserializer_for(&raw).unwrap().format(), Format::Raw);
        assert_eq!(serializer_for(&raw).unwrap().format(), Format::Raw);
    }
}
