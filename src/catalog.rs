//! Catalog mapper.
//!
//! [`PulsarCatalog`] projects the backend's resource tree onto the query
//! engine's catalog model: tenants and namespaces become `tenant/namespace`
//! databases, topics become tables. Listings are live; nothing is cached,
//! so a topic created by another client is visible on the next call.

use std::sync::Arc;

use arrow_schema::Field;
use parking_lot::Mutex;
use tracing::info;

use crate::admin::AdminGateway;
use crate::config::CatalogConfig;
use crate::error::{BridgeError, CatalogError};
use crate::admin::registry_widened;
use crate::schema::{SchemaDescriptor, TableSchema};
use crate::topic::{logical_table_names, TopicName};

/// Everything the adapters need to know about one table.
#[derive(Debug, Clone)]
pub struct TableInfo {
    /// Fully qualified base topic name.
    pub topic: TopicName,
    /// Translated column layout, metadata columns included.
    pub schema: TableSchema,
    /// Partition count, `None` for non-partitioned topics.
    pub partitions: Option<u32>,
    /// The topic's declared schema.
    pub descriptor: SchemaDescriptor,
}

/// Maps the backend resource tree to catalogs, databases, and tables.
pub struct PulsarCatalog {
    gateway: Arc<dyn AdminGateway>,
    config: CatalogConfig,
    current_database: Mutex<String>,
}

impl PulsarCatalog {
    /// Creates a catalog over the given gateway.
    #[must_use]
    pub fn new(gateway: Arc<dyn AdminGateway>, config: CatalogConfig) -> Self {
        let current_database = Mutex::new(config.default_database.clone());
        Self {
            gateway,
            config,
            current_database,
        }
    }

    /// The catalog configuration.
    #[must_use]
    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    /// The gateway this catalog talks to.
    #[must_use]
    pub fn gateway(&self) -> Arc<dyn AdminGateway> {
        Arc::clone(&self.gateway)
    }

    /// The database unqualified table names resolve against.
    #[must_use]
    pub fn current_database(&self) -> String {
        self.current_database.lock().clone()
    }

    /// Switches the current database.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::DatabaseNotFound` if the database does not
    /// exist.
    pub async fn use_database(&self, database: &str) -> Result<(), BridgeError> {
        if !self.database_exists(database).await? {
            return Err(CatalogError::DatabaseNotFound(database.to_string()).into());
        }
        *self.current_database.lock() = database.to_string();
        Ok(())
    }

    /// Lists every database as `tenant/namespace`.
    ///
    /// # Errors
    ///
    /// Propagates admin failures.
    pub async fn list_databases(&self) -> Result<Vec<String>, BridgeError> {
        let tenants = self.gateway.list_tenants().await?;
        let mut databases = Vec::new();
        for tenant in tenants {
            databases.extend(self.gateway.list_namespaces(&tenant).await?);
        }
        Ok(databases)
    }

    /// Returns `true` if the database exists.
    ///
    /// # Errors
    ///
    /// Propagates admin failures other than "not found".
    pub async fn database_exists(&self, database: &str) -> Result<bool, BridgeError> {
        let Some((tenant, _)) = database.split_once('/') else {
            return Ok(false);
        };
        match self.gateway.list_namespaces(tenant).await {
            Ok(namespaces) => Ok(namespaces.iter().any(|ns| ns == database)),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Lists the logical table names of a database.
    ///
    /// Partitions of a partitioned topic collapse to one entry; a topic
    /// that is both listed raw and partitioned appears once.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::DatabaseNotFound` if the database does not
    /// exist.
    pub async fn list_tables(&self, database: &str) -> Result<Vec<String>, BridgeError> {
        if !self.database_exists(database).await? {
            return Err(CatalogError::DatabaseNotFound(database.to_string()).into());
        }
        let topics = self.gateway.list_topics(database).await?;
        Ok(logical_table_names(&topics))
    }

    /// Returns `true` if the table exists.
    ///
    /// # Errors
    ///
    /// Propagates admin failures other than "not found".
    pub async fn table_exists(&self, database: &str, table: &str) -> Result<bool, BridgeError> {
        let topic = TopicName::in_database(database, table)?;
        match self.gateway.topic_exists(&topic).await {
            Ok(exists) => Ok(exists),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Resolves a table to its topic, schema, and partition layout.
    ///
    /// A topic with no declared schema surfaces as a raw-bytes table.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::TableNotFound` if the table does not exist.
    pub async fn get_table(&self, database: &str, table: &str) -> Result<TableInfo, BridgeError> {
        let topic = TopicName::in_database(database, table)?;
        if !self.table_exists(database, table).await? {
            return Err(CatalogError::TableNotFound(format!("{database}.{table}")).into());
        }
        let partitions = self.gateway.partitioned_topic_partitions(&topic).await?;
        let descriptor = match self.gateway.get_schema(&topic).await {
            Ok(Some(descriptor)) => descriptor,
            Ok(None) => SchemaDescriptor::Raw,
            Err(e) if e.is_not_found() => SchemaDescriptor::Raw,
            Err(e) => return Err(e.into()),
        };
        let schema =
            TableSchema::from_descriptor(&descriptor).with_key_fields(&self.config.key_fields)?;
        Ok(TableInfo {
            topic,
            schema,
            partitions,
            descriptor,
        })
    }

    /// Creates a table as a topic with a declared schema.
    ///
    /// With `if_not_exists`, an existing topic whose schema is structurally
    /// compatible is accepted silently; a divergent schema is a
    /// `SchemaMismatch`. Without it, an existing topic is
    /// `TableAlreadyExists`.
    ///
    /// # Errors
    ///
    /// See above, plus propagated admin failures.
    pub async fn create_table(
        &self,
        database: &str,
        table: &str,
        fields: Vec<Field>,
        partitions: u32,
        if_not_exists: bool,
    ) -> Result<TableInfo, BridgeError> {
        let topic = TopicName::in_database(database, table)?;
        let schema = TableSchema::from_physical_fields(fields)
            .with_key_fields(&self.config.key_fields)?;

        if self.table_exists(database, table).await? {
            if !if_not_exists {
                return Err(
                    CatalogError::TableAlreadyExists(format!("{database}.{table}")).into(),
                );
            }
            let existing = self.get_table(database, table).await?;
            // Compare registry views on both sides: the registry widens
            // Int8/Int16 to Int32, so the raw DDL fields would spuriously
            // mismatch a round-tripped schema.
            let current = TableSchema::from_descriptor(&registry_widened(&existing.descriptor));
            let candidate = TableSchema::from_descriptor(&registry_widened(
                &schema.to_descriptor(self.declared_format()),
            ));
            if !current.is_compatible_with(&candidate) {
                return Err(BridgeError::SchemaMismatch(format!(
                    "existing topic {topic} has an incompatible schema"
                )));
            }
            return Ok(existing);
        }

        let descriptor = schema.to_descriptor(self.declared_format());
        self.gateway.create_topic(&topic, partitions).await?;
        if descriptor != SchemaDescriptor::Raw {
            self.gateway.declare_schema(&topic, &descriptor).await?;
        }
        info!(topic = %topic, partitions, "created table");

        Ok(TableInfo {
            topic,
            schema,
            partitions: (partitions > 0).then_some(partitions),
            descriptor,
        })
    }

    /// Drops a table.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::TableNotFound` if the table does not exist.
    pub async fn drop_table(
        &self,
        database: &str,
        table: &str,
        force: bool,
    ) -> Result<(), BridgeError> {
        let topic = TopicName::in_database(database, table)?;
        match self.gateway.delete_topic(&topic, force).await {
            Ok(()) => {
                info!(topic = %topic, "dropped table");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                Err(CatalogError::TableNotFound(format!("{database}.{table}")).into())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn declared_format(&self) -> crate::schema::StructFormat {
        self.config
            .value_format
            .and_then(|f| f.struct_format())
            .unwrap_or(crate::schema::StructFormat::Json)
    }
}
