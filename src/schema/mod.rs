//! Schema translation between topic schema descriptors and table schemas.
//!
//! A topic's [`SchemaDescriptor`] maps to a [`TableSchema`]: primitive
//! descriptors become a single `value` column, structured descriptors become
//! one column per field, and four metadata columns are always appended.
//! The mapping also runs in reverse when creating a topic for a new table.

use std::sync::Arc;

use arrow_schema::{DataType, Field, Fields, Schema, TimeUnit};

use crate::config::FieldsInclude;
use crate::error::BridgeError;

/// Name of the computed event-time metadata column.
pub const EVENT_TIME_COLUMN: &str = "eventTime";
/// Name of the computed message-properties metadata column.
pub const PROPERTIES_COLUMN: &str = "properties";
/// Name of the virtual origin-topic metadata column.
pub const TOPIC_COLUMN: &str = "topic";
/// Name of the virtual sequence-id metadata column.
pub const SEQUENCE_ID_COLUMN: &str = "sequenceId";

/// Name of the single physical column for primitive-schema topics.
pub const PRIMITIVE_VALUE_COLUMN: &str = "value";

/// Scalar kinds a primitive topic schema can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveKind {
    /// Single byte, 0 or 1.
    Boolean,
    /// Signed 8-bit integer.
    Int8,
    /// Signed 16-bit integer, big-endian on the wire.
    Int16,
    /// Signed 32-bit integer, big-endian on the wire.
    Int32,
    /// Signed 64-bit integer, big-endian on the wire.
    Int64,
    /// IEEE-754 single precision, big-endian on the wire.
    Float,
    /// IEEE-754 double precision, big-endian on the wire.
    Double,
    /// UTF-8 text.
    String,
    /// Opaque bytes.
    Bytes,
}

impl PrimitiveKind {
    /// The Arrow type this kind maps to.
    #[must_use]
    pub fn data_type(self) -> DataType {
        match self {
            PrimitiveKind::Boolean => DataType::Boolean,
            PrimitiveKind::Int8 => DataType::Int8,
            PrimitiveKind::Int16 => DataType::Int16,
            PrimitiveKind::Int32 => DataType::Int32,
            PrimitiveKind::Int64 => DataType::Int64,
            PrimitiveKind::Float => DataType::Float32,
            PrimitiveKind::Double => DataType::Float64,
            PrimitiveKind::String => DataType::Utf8,
            PrimitiveKind::Bytes => DataType::Binary,
        }
    }

    /// The kind an Arrow type maps back to, if any.
    #[must_use]
    pub fn from_data_type(dt: &DataType) -> Option<Self> {
        match dt {
            DataType::Boolean => Some(PrimitiveKind::Boolean),
            DataType::Int8 => Some(PrimitiveKind::Int8),
            DataType::Int16 => Some(PrimitiveKind::Int16),
            DataType::Int32 => Some(PrimitiveKind::Int32),
            DataType::Int64 => Some(PrimitiveKind::Int64),
            DataType::Float32 => Some(PrimitiveKind::Float),
            DataType::Float64 => Some(PrimitiveKind::Double),
            DataType::Utf8 => Some(PrimitiveKind::String),
            DataType::Binary => Some(PrimitiveKind::Bytes),
            _ => None,
        }
    }
}

/// One field of a structured topic schema.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    /// Field name.
    pub name: String,
    /// Arrow type of the field.
    pub data_type: DataType,
    /// Whether the field admits nulls.
    pub nullable: bool,
}

impl FieldDef {
    /// Creates a field definition.
    #[must_use]
    pub fn new(name: impl Into<String>, data_type: DataType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable,
        }
    }
}

/// Structured wire format of a topic schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructFormat {
    /// Avro binary records.
    Avro,
    /// JSON objects.
    Json,
}

/// What a topic declares about its payload.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaDescriptor {
    /// A single scalar per message.
    Primitive(PrimitiveKind),
    /// A record per message, fields in declaration order.
    Structured {
        /// Wire format of the record.
        format: StructFormat,
        /// Fields in declaration order.
        fields: Vec<FieldDef>,
    },
    /// No declared schema; payload is opaque bytes.
    Raw,
}

/// How a table column relates to the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// Stored in the message payload (or key).
    Physical,
    /// Derived from the message envelope; writable on the sink side.
    Metadata,
    /// Derived from the message envelope; read-only.
    MetadataVirtual,
}

/// One column of a table schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    /// Arrow field carrying name, type, and nullability.
    pub field: Field,
    /// Relation of the column to the message.
    pub kind: ColumnKind,
    /// Whether the column belongs to the message key.
    pub is_key: bool,
}

impl Column {
    fn physical(field: Field) -> Self {
        Self {
            field,
            kind: ColumnKind::Physical,
            is_key: false,
        }
    }

    /// Column name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.field.name()
    }
}

/// Arrow type of the `properties` metadata column.
#[must_use]
pub fn properties_data_type() -> DataType {
    let entries = Field::new(
        "entries",
        DataType::Struct(Fields::from(vec![
            Field::new("keys", DataType::Utf8, false),
            Field::new("values", DataType::Utf8, true),
        ])),
        false,
    );
    DataType::Map(Arc::new(entries), false)
}

fn metadata_columns() -> Vec<Column> {
    vec![
        Column {
            field: Field::new(
                EVENT_TIME_COLUMN,
                DataType::Timestamp(TimeUnit::Millisecond, None),
                true,
            ),
            kind: ColumnKind::Metadata,
            is_key: false,
        },
        Column {
            field: Field::new(PROPERTIES_COLUMN, properties_data_type(), true),
            kind: ColumnKind::Metadata,
            is_key: false,
        },
        Column {
            field: Field::new(TOPIC_COLUMN, DataType::Utf8, false),
            kind: ColumnKind::MetadataVirtual,
            is_key: false,
        },
        Column {
            field: Field::new(SEQUENCE_ID_COLUMN, DataType::Int64, false),
            kind: ColumnKind::MetadataVirtual,
            is_key: false,
        },
    ]
}

/// Column layout of a table, metadata columns included.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    columns: Vec<Column>,
}

impl TableSchema {
    /// Translates a topic schema descriptor into a table schema.
    ///
    /// Physical columns come first in descriptor order, the four metadata
    /// columns are appended after.
    #[must_use]
    pub fn from_descriptor(descriptor: &SchemaDescriptor) -> Self {
        let mut columns = match descriptor {
            SchemaDescriptor::Primitive(kind) => vec![Column::physical(Field::new(
                PRIMITIVE_VALUE_COLUMN,
                kind.data_type(),
                true,
            ))],
            SchemaDescriptor::Structured { fields, .. } => fields
                .iter()
                .map(|f| {
                    Column::physical(Field::new(f.name.clone(), f.data_type.clone(), f.nullable))
                })
                .collect(),
            SchemaDescriptor::Raw => vec![Column::physical(Field::new(
                PRIMITIVE_VALUE_COLUMN,
                DataType::Binary,
                true,
            ))],
        };
        columns.extend(metadata_columns());
        Self { columns }
    }

    /// Builds a table schema from user-declared physical columns.
    ///
    /// Used by `create_table`; metadata columns are appended the same way
    /// as for discovered topics.
    #[must_use]
    pub fn from_physical_fields(fields: Vec<Field>) -> Self {
        let mut columns: Vec<Column> = fields.into_iter().map(Column::physical).collect();
        columns.extend(metadata_columns());
        Self { columns }
    }

    /// Marks the named columns as key columns, in the given order.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::SchemaMismatch` if a named column is missing
    /// or is not a physical column.
    pub fn with_key_fields(mut self, key_fields: &[String]) -> Result<Self, BridgeError> {
        for name in key_fields {
            let col = self
                .columns
                .iter_mut()
                .find(|c| c.field.name() == name)
                .ok_or_else(|| {
                    BridgeError::SchemaMismatch(format!("declared key field '{name}' not found"))
                })?;
            if col.kind != ColumnKind::Physical {
                return Err(BridgeError::SchemaMismatch(format!(
                    "declared key field '{name}' is a metadata column"
                )));
            }
            col.is_key = true;
        }
        Ok(self)
    }

    /// All columns in table order.
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Physical columns only, in table order.
    #[must_use]
    pub fn physical_columns(&self) -> Vec<&Column> {
        self.columns
            .iter()
            .filter(|c| c.kind == ColumnKind::Physical)
            .collect()
    }

    /// Physical columns carried in the value payload under the given policy.
    #[must_use]
    pub fn value_columns(&self, include: FieldsInclude) -> Vec<&Column> {
        self.columns
            .iter()
            .filter(|c| c.kind == ColumnKind::Physical)
            .filter(|c| include == FieldsInclude::All || !c.is_key)
            .collect()
    }

    /// Key columns in table order.
    #[must_use]
    pub fn key_columns(&self) -> Vec<&Column> {
        self.columns.iter().filter(|c| c.is_key).collect()
    }

    /// Full Arrow schema, metadata columns included.
    #[must_use]
    pub fn to_arrow(&self) -> Arc<Schema> {
        Arc::new(Schema::new(
            self.columns
                .iter()
                .map(|c| c.field.clone())
                .collect::<Vec<_>>(),
        ))
    }

    /// Arrow schema of the value payload under the given policy.
    #[must_use]
    pub fn value_arrow(&self, include: FieldsInclude) -> Arc<Schema> {
        Arc::new(Schema::new(
            self.value_columns(include)
                .iter()
                .map(|c| c.field.clone())
                .collect::<Vec<_>>(),
        ))
    }

    /// Maps the table schema back to a topic schema descriptor.
    ///
    /// Metadata columns are excluded; a single `value` column of a scalar
    /// type maps back to a primitive descriptor, anything else becomes a
    /// structured descriptor in the given format.
    #[must_use]
    pub fn to_descriptor(&self, format: StructFormat) -> SchemaDescriptor {
        let physical = self.physical_columns();
        if physical.len() == 1 && physical[0].name() == PRIMITIVE_VALUE_COLUMN {
            if physical[0].field.data_type() == &DataType::Binary {
                return SchemaDescriptor::Raw;
            }
            if let Some(kind) = PrimitiveKind::from_data_type(physical[0].field.data_type()) {
                return SchemaDescriptor::Primitive(kind);
            }
        }
        SchemaDescriptor::Structured {
            format,
            fields: physical
                .iter()
                .map(|c| {
                    FieldDef::new(
                        c.field.name().clone(),
                        c.field.data_type().clone(),
                        c.field.is_nullable(),
                    )
                })
                .collect(),
        }
    }

    /// Structural equality on physical columns: same names, types, and
    /// nullability in the same order. Ignores key flags and format.
    #[must_use]
    pub fn is_compatible_with(&self, other: &TableSchema) -> bool {
        let a = self.physical_columns();
        let b = other.physical_columns();
        a.len() == b.len()
            && a.iter().zip(b.iter()).all(|(x, y)| {
                x.field.name() == y.field.name()
                    && x.field.data_type() == y.field.data_type()
                    && x.field.is_nullable() == y.field.is_nullable()
            })
    }
}

/// The descriptor the value payload actually carries.
///
/// Under `EXCEPT_KEY`, key fields travel in the message key, so they are
/// stripped from the value-side descriptor.
#[must_use]
pub fn value_descriptor_for(
    descriptor: &SchemaDescriptor,
    key_fields: &[String],
    include: FieldsInclude,
) -> SchemaDescriptor {
    match descriptor {
        SchemaDescriptor::Structured { format, fields }
            if include == FieldsInclude::ExceptKey && !key_fields.is_empty() =>
        {
            SchemaDescriptor::Structured {
                format: *format,
                fields: fields
                    .iter()
                    .filter(|f| !key_fields.contains(&f.name))
                    .cloned()
                    .collect(),
            }
        }
        other => other.clone(),
    }
}

/// The descriptor of the serialized message key, when a key/value split is
/// configured. `None` when there are no key fields or the topic schema is
/// not structured.
#[must_use]
pub fn key_descriptor_for(
    descriptor: &SchemaDescriptor,
    key_fields: &[String],
    key_format: Option<StructFormat>,
) -> Option<SchemaDescriptor> {
    if key_fields.is_empty() {
        return None;
    }
    let SchemaDescriptor::Structured { format, fields } = descriptor else {
        return None;
    };
    Some(SchemaDescriptor::Structured {
        format: key_format.unwrap_or(*format),
        fields: fields
            .iter()
            .filter(|f| key_fields.contains(&f.name))
            .cloned()
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn structured() -> SchemaDescriptor {
        SchemaDescriptor::Structured {
            format: StructFormat::Json,
            fields: vec![
                FieldDef::new("oid", DataType::Int32, false),
                FieldDef::new("cid", DataType::Int64, true),
                FieldDef::new("ts", DataType::Utf8, true),
            ],
        }
    }

    #[test]
    fn test_primitive_maps_to_single_value_column() {
        let schema = TableSchema::from_descriptor(&SchemaDescriptor::Primitive(
            PrimitiveKind::Int32,
        ));
        let physical = schema.physical_columns();
        assert_eq!(physical.len(), 1);
        assert_eq!(physical[0].name(), "value");
        assert_eq!(physical[0].field.data_type(), &DataType::Int32);
    }

    #[test]
    fn test_metadata_columns_always_appended() {
        let schema = TableSchema::from_descriptor(&structured());
        let names: Vec<_> = schema.columns().iter().map(Column::name).collect();
        assert_eq!(
            names,
            vec!["oid", "cid", "ts", "eventTime", "properties", "topic", "sequenceId"]
        );
        let topic_col = &schema.columns()[5];
        assert_eq!(topic_col.kind, ColumnKind::MetadataVirtual);
        let event_time = &schema.columns()[3];
        assert_eq!(event_time.kind, ColumnKind::Metadata);
        assert_eq!(
            event_time.field.data_type(),
            &DataType::Timestamp(TimeUnit::Millisecond, None)
        );
    }

    #[test]
    fn test_field_order_and_nullability_preserved() {
        let schema = TableSchema::from_descriptor(&structured());
        let physical = schema.physical_columns();
        assert!(!physical[0].field.is_nullable());
        assert!(physical[1].field.is_nullable());
    }

    #[test]
    fn test_key_fields_marked() {
        let schema = TableSchema::from_descriptor(&structured())
            .with_key_fields(&["oid".to_string()])
            .unwrap();
        let keys = schema.key_columns();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].name(), "oid");
    }

    #[test]
    fn test_missing_key_field_is_schema_mismatch() {
        let err = TableSchema::from_descriptor(&structured())
            .with_key_fields(&["nope".to_string()])
            .unwrap_err();
        assert!(matches!(err, BridgeError::SchemaMismatch(_)));
    }

    #[test]
    fn test_metadata_key_field_rejected() {
        let err = TableSchema::from_descriptor(&structured())
            .with_key_fields(&["topic".to_string()])
            .unwrap_err();
        assert!(matches!(err, BridgeError::SchemaMismatch(_)));
    }

    #[test]
    fn test_value_columns_except_key() {
        let schema = TableSchema::from_descriptor(&structured())
            .with_key_fields(&["oid".to_string()])
            .unwrap();
        let all: Vec<_> = schema
            .value_columns(FieldsInclude::All)
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        assert_eq!(all, vec!["oid", "cid", "ts"]);
        let except: Vec<_> = schema
            .value_columns(FieldsInclude::ExceptKey)
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        assert_eq!(except, vec!["cid", "ts"]);
    }

    #[test]
    fn test_descriptor_round_trip_structured() {
        let descriptor = structured();
        let schema = TableSchema::from_descriptor(&descriptor);
        assert_eq!(schema.to_descriptor(StructFormat::Json), descriptor);
    }

    #[test]
    fn test_descriptor_round_trip_primitive() {
        let descriptor = SchemaDescriptor::Primitive(PrimitiveKind::String);
        let schema = TableSchema::from_descriptor(&descriptor);
        assert_eq!(schema.to_descriptor(StructFormat::Json), descriptor);
    }

    #[test]
    fn test_raw_round_trip() {
        let schema = TableSchema::from_descriptor(&SchemaDescriptor::Raw);
        assert_eq!(
            schema.to_descriptor(StructFormat::Json),
            SchemaDescriptor::Raw
        );
    }

    #[test]
    fn test_value_descriptor_except_key() {
        let descriptor = structured();
        let keys = vec!["oid".to_string()];

        let all = value_descriptor_for(&descriptor, &keys, FieldsInclude::All);
        assert_eq!(all, descriptor);

        let except = value_descriptor_for(&descriptor, &keys, FieldsInclude::ExceptKey);
        let SchemaDescriptor::Structured { fields, .. } = except else {
            panic!("expected structured descriptor");
        };
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].name, "cid");
    }

    #[test]
    fn test_key_descriptor_selects_key_fields() {
        let descriptor = structured();
        let keys = vec!["oid".to_string()];
        let key_desc = key_descriptor_for(&descriptor, &keys, Some(StructFormat::Avro)).unwrap();
        let SchemaDescriptor::Structured { format, fields } = key_desc else {
            panic!("expected structured descriptor");
        };
        assert_eq!(format, StructFormat::Avro);
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].name, "oid");

        assert!(key_descriptor_for(&descriptor, &[], None).is_none());
        assert!(key_descriptor_for(
            &SchemaDescriptor::Primitive(PrimitiveKind::Int32),
            &keys,
            None
        )
        .is_none());
    }

    #[test]
    fn test_structural_compatibility() {
        let a = TableSchema::from_descriptor(&structured());
        let b = TableSchema::from_descriptor(&structured());
        assert!(a.is_compatible_with(&b));

        let different = TableSchema::from_descriptor(&SchemaDescriptor::Structured {
            format: StructFormat::Avro,
            fields: vec![FieldDef::new("oid", DataType::Int64, false)],
        });
        assert!(!a.is_compatible_with(&different));
    }
}
