//! Catalog mapping over the in-memory backend.

use std::sync::Arc;

use arrow_schema::{DataType, Field};
use pulsar_bridge::catalog::PulsarCatalog;
use pulsar_bridge::config::{BridgeOptions, CatalogConfig, ADMIN_URL, DEFAULT_DATABASE, SERVICE_URL};
use pulsar_bridge::error::{BridgeError, CatalogError};
use pulsar_bridge::schema::{
    Column, FieldDef, PrimitiveKind, SchemaDescriptor, StructFormat,
};
use pulsar_bridge::testing::MemoryBackend;
use pulsar_bridge::topic::TopicName;

fn config(overrides: &[(&str, &str)]) -> CatalogConfig {
    let mut opts = BridgeOptions::new();
    opts.set(SERVICE_URL, "pulsar://localhost:6650");
    opts.set(ADMIN_URL, "http://localhost:8080");
    opts.set(DEFAULT_DATABASE, "tn1/ns1");
    for (key, value) in overrides {
        opts.set(*key, *value);
    }
    CatalogConfig::from_options(&opts).unwrap()
}

fn catalog_over(backend: &MemoryBackend, overrides: &[(&str, &str)]) -> PulsarCatalog {
    PulsarCatalog::new(Arc::new(backend.clone()), config(overrides))
}

fn orders_descriptor() -> SchemaDescriptor {
    SchemaDescriptor::Structured {
        format: StructFormat::Json,
        fields: vec![
            FieldDef::new("oid", DataType::Int32, false),
            FieldDef::new("amount", DataType::Float64, true),
        ],
    }
}

fn topic(name: &str) -> TopicName {
    TopicName::parse(name).unwrap()
}

#[tokio::test]
async fn test_databases_and_current_database() {
    let backend = MemoryBackend::new();
    backend.add_namespace("tn1/ns1");
    backend.add_namespace("tn1/ns2");
    backend.add_namespace("tn2/ns1");
    let catalog = catalog_over(&backend, &[]);

    let mut databases = catalog.list_databases().await.unwrap();
    databases.sort();
    assert_eq!(databases, vec!["tn1/ns1", "tn1/ns2", "tn2/ns1"]);

    assert_eq!(catalog.current_database(), "tn1/ns1");
    catalog.use_database("tn2/ns1").await.unwrap();
    assert_eq!(catalog.current_database(), "tn2/ns1");

    let err = catalog.use_database("tn9/ns9").await.unwrap_err();
    assert!(matches!(
        err,
        BridgeError::Catalog(CatalogError::DatabaseNotFound(_))
    ));
}

#[tokio::test]
async fn test_table_listing_collapses_partitions() {
    let backend = MemoryBackend::new();
    backend.add_namespace("tn1/ns1");
    backend.add_topic(&topic("persistent://tn1/ns1/tp1"), None);
    backend.add_topic(&topic("persistent://tn1/ns1/ptp1"), Some(3));
    let catalog = catalog_over(&backend, &[]);

    let tables = catalog.list_tables("tn1/ns1").await.unwrap();
    assert_eq!(tables.len(), 2);
    assert!(tables.contains(&"tp1".to_string()));
    assert!(tables.contains(&"ptp1".to_string()));

    let err = catalog.list_tables("tn1/missing").await.unwrap_err();
    assert!(matches!(
        err,
        BridgeError::Catalog(CatalogError::DatabaseNotFound(_))
    ));
}

#[tokio::test]
async fn test_get_table_translates_schema() {
    let backend = MemoryBackend::new();
    backend.add_namespace("tn1/ns1");
    let t = topic("persistent://tn1/ns1/orders");
    backend.add_topic(&t, None);
    backend.set_schema(&t, orders_descriptor());
    let catalog = catalog_over(&backend, &[]);

    let info = catalog.get_table("tn1/ns1", "orders").await.unwrap();
    assert_eq!(info.topic, t);
    assert_eq!(info.partitions, None);
    let names: Vec<_> = info.schema.columns().iter().map(Column::name).collect();
    assert_eq!(
        names,
        vec!["oid", "amount", "eventTime", "properties", "topic", "sequenceId"]
    );

    let err = catalog.get_table("tn1/ns1", "missing").await.unwrap_err();
    assert!(matches!(
        err,
        BridgeError::Catalog(CatalogError::TableNotFound(_))
    ));
}

#[tokio::test]
async fn test_get_table_is_stable_across_sessions() {
    let backend = MemoryBackend::new();
    backend.add_namespace("tn1/ns1");
    let t = topic("persistent://tn1/ns1/orders");
    backend.add_topic(&t, None);
    backend.set_schema(&t, orders_descriptor());

    let first = catalog_over(&backend, &[])
        .get_table("tn1/ns1", "orders")
        .await
        .unwrap();
    let second = catalog_over(&backend, &[])
        .get_table("tn1/ns1", "orders")
        .await
        .unwrap();
    assert!(first.schema.is_compatible_with(&second.schema));
    assert_eq!(first.schema.to_arrow(), second.schema.to_arrow());
}

#[tokio::test]
async fn test_schemaless_topic_reads_as_raw_table() {
    let backend = MemoryBackend::new();
    backend.add_namespace("tn1/ns1");
    backend.add_topic(&topic("persistent://tn1/ns1/blob"), None);
    let catalog = catalog_over(&backend, &[]);

    let info = catalog.get_table("tn1/ns1", "blob").await.unwrap();
    assert_eq!(info.descriptor, SchemaDescriptor::Raw);
    let physical = info.schema.physical_columns();
    assert_eq!(physical.len(), 1);
    assert_eq!(physical[0].name(), "value");
    assert_eq!(physical[0].field.data_type(), &DataType::Binary);
}

#[tokio::test]
async fn test_primitive_topic_reads_as_value_column() {
    let backend = MemoryBackend::new();
    backend.add_namespace("tn1/ns1");
    let t = topic("persistent://tn1/ns1/counts");
    backend.add_topic(&t, None);
    backend.set_schema(&t, SchemaDescriptor::Primitive(PrimitiveKind::Int64));
    let catalog = catalog_over(&backend, &[]);

    let info = catalog.get_table("tn1/ns1", "counts").await.unwrap();
    let physical = info.schema.physical_columns();
    assert_eq!(physical.len(), 1);
    assert_eq!(physical[0].name(), "value");
    assert_eq!(physical[0].field.data_type(), &DataType::Int64);
}

#[tokio::test]
async fn test_create_table_declares_schema() {
    let backend = MemoryBackend::new();
    backend.add_namespace("tn1/ns1");
    let catalog = catalog_over(&backend, &[("value.format", "json")]);

    let fields = vec![
        Field::new("oid", DataType::Int32, false),
        Field::new("amount", DataType::Float64, true),
    ];
    let info = catalog
        .create_table("tn1/ns1", "orders", fields, 0, false)
        .await
        .unwrap();
    assert_eq!(info.partitions, None);
    assert_eq!(info.descriptor, orders_descriptor());

    assert!(catalog.table_exists("tn1/ns1", "orders").await.unwrap());
    let fetched = catalog.get_table("tn1/ns1", "orders").await.unwrap();
    assert_eq!(fetched.descriptor, orders_descriptor());
}

#[tokio::test]
async fn test_create_table_partitioned() {
    let backend = MemoryBackend::new();
    backend.add_namespace("tn1/ns1");
    let catalog = catalog_over(&backend, &[]);

    let fields = vec![Field::new("oid", DataType::Int32, false)];
    let info = catalog
        .create_table("tn1/ns1", "ptp1", fields, 4, false)
        .await
        .unwrap();
    assert_eq!(info.partitions, Some(4));

    let tables = catalog.list_tables("tn1/ns1").await.unwrap();
    assert_eq!(tables, vec!["ptp1"]);
}

#[tokio::test]
async fn test_create_table_existing() {
    let backend = MemoryBackend::new();
    backend.add_namespace("tn1/ns1");
    let catalog = catalog_over(&backend, &[]);
    let fields = || {
        vec![
            Field::new("oid", DataType::Int32, false),
            Field::new("amount", DataType::Float64, true),
        ]
    };
    catalog
        .create_table("tn1/ns1", "orders", fields(), 0, false)
        .await
        .unwrap();

    // Same layout with if-not-exists is accepted silently
    let again = catalog
        .create_table("tn1/ns1", "orders", fields(), 0, true)
        .await
        .unwrap();
    assert_eq!(again.descriptor, orders_descriptor());

    // Without if-not-exists it is a conflict
    let err = catalog
        .create_table("tn1/ns1", "orders", fields(), 0, false)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BridgeError::Catalog(CatalogError::TableAlreadyExists(_))
    ));

    // A divergent layout is a schema mismatch even with if-not-exists
    let divergent = vec![Field::new("oid", DataType::Int64, false)];
    let err = catalog
        .create_table("tn1/ns1", "orders", divergent, 0, true)
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::SchemaMismatch(_)));
}

#[tokio::test]
async fn test_create_table_idempotent_for_narrow_ints() {
    let backend = MemoryBackend::new();
    backend.add_namespace("tn1/ns1");
    // The topic exists with the schema as the registry reports it after a
    // round trip: Int8/Int16 columns come back widened to Int32
    let t = topic("persistent://tn1/ns1/orders");
    backend.add_topic(&t, None);
    backend.set_schema(
        &t,
        SchemaDescriptor::Structured {
            format: StructFormat::Json,
            fields: vec![
                FieldDef::new("flag", DataType::Int32, false),
                FieldDef::new("code", DataType::Int32, true),
            ],
        },
    );
    let catalog = catalog_over(&backend, &[]);

    // Repeating the original narrow-int DDL stays a no-op
    let fields = vec![
        Field::new("flag", DataType::Int8, false),
        Field::new("code", DataType::Int16, true),
    ];
    let info = catalog
        .create_table("tn1/ns1", "orders", fields, 0, true)
        .await
        .unwrap();
    assert_eq!(info.topic, t);

    // A genuinely different layout still mismatches
    let divergent = vec![Field::new("flag", DataType::Int64, false)];
    let err = catalog
        .create_table("tn1/ns1", "orders", divergent, 0, true)
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::SchemaMismatch(_)));
}

#[tokio::test]
async fn test_drop_table() {
    let backend = MemoryBackend::new();
    backend.add_namespace("tn1/ns1");
    backend.add_topic(&topic("persistent://tn1/ns1/orders"), None);
    let catalog = catalog_over(&backend, &[]);

    catalog.drop_table("tn1/ns1", "orders", false).await.unwrap();
    assert!(!catalog.table_exists("tn1/ns1", "orders").await.unwrap());

    let err = catalog.drop_table("tn1/ns1", "orders", false).await.unwrap_err();
    assert!(matches!(
        err,
        BridgeError::Catalog(CatalogError::TableNotFound(_))
    ));
}
