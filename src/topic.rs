//! Topic-name parsing and partition normalization.
//!
//! Topic names are fully qualified as
//! `persistent://tenant/namespace/local-name`; partitions of a partitioned
//! topic materialize as `<name>-partition-<n>` and must collapse back to a
//! single logical name in listings.

use std::fmt;

use crate::error::BridgeError;

/// Suffix marking a single partition of a partitioned topic.
pub const PARTITION_SUFFIX: &str = "-partition-";

/// A parsed, fully qualified topic name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicName {
    /// Persistence domain, "persistent" or "non-persistent".
    pub domain: String,
    /// Owning tenant.
    pub tenant: String,
    /// Namespace within the tenant.
    pub namespace: String,
    /// Local topic name, partition suffix included if present.
    pub local: String,
}

impl TopicName {
    /// Parses a topic name.
    ///
    /// Bare names like `ns-local` are not accepted; callers qualify with
    /// [`TopicName::in_database`] first.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Configuration` if the name is malformed.
    pub fn parse(s: &str) -> Result<Self, BridgeError> {
        let (domain, rest) = s.split_once("://").ok_or_else(|| {
            BridgeError::Configuration(format!("topic name missing domain: '{s}'"))
        })?;
        if domain != "persistent" && domain != "non-persistent" {
            return Err(BridgeError::Configuration(format!(
                "unknown topic domain '{domain}' in '{s}'"
            )));
        }
        let mut parts = rest.splitn(3, '/');
        let (tenant, namespace, local) = match (parts.next(), parts.next(), parts.next()) {
            (Some(t), Some(n), Some(l)) if !t.is_empty() && !n.is_empty() && !l.is_empty() => {
                (t, n, l)
            }
            _ => {
                return Err(BridgeError::Configuration(format!(
                    "topic name must be '<domain>://tenant/namespace/local': '{s}'"
                )))
            }
        };
        Ok(Self {
            domain: domain.to_string(),
            tenant: tenant.to_string(),
            namespace: namespace.to_string(),
            local: local.to_string(),
        })
    }

    /// Qualifies a local table name within a `tenant/namespace` database.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Configuration` if the database name is not
    /// `tenant/namespace`.
    pub fn in_database(database: &str, table: &str) -> Result<Self, BridgeError> {
        let (tenant, namespace) = database.split_once('/').ok_or_else(|| {
            BridgeError::Configuration(format!(
                "database must be 'tenant/namespace', got '{database}'"
            ))
        })?;
        Ok(Self {
            domain: "persistent".to_string(),
            tenant: tenant.to_string(),
            namespace: namespace.to_string(),
            local: table.to_string(),
        })
    }

    /// Returns the `tenant/namespace` database this topic belongs to.
    #[must_use]
    pub fn database(&self) -> String {
        format!("{}/{}", self.tenant, self.namespace)
    }

    /// Returns the partition index if this names a single partition.
    #[must_use]
    pub fn partition_index(&self) -> Option<i32> {
        let idx = self.local.rfind(PARTITION_SUFFIX)?;
        self.local[idx + PARTITION_SUFFIX.len()..].parse().ok()
    }

    /// Returns the logical name with any partition suffix stripped.
    #[must_use]
    pub fn logical_local(&self) -> &str {
        match self.local.rfind(PARTITION_SUFFIX) {
            Some(idx) if self.partition_index().is_some() => &self.local[..idx],
            _ => &self.local,
        }
    }

    /// Returns the name of a specific partition of this topic.
    #[must_use]
    pub fn partition(&self, index: i32) -> TopicName {
        TopicName {
            domain: self.domain.clone(),
            tenant: self.tenant.clone(),
            namespace: self.namespace.clone(),
            local: format!("{}{PARTITION_SUFFIX}{index}", self.logical_local()),
        }
    }
}

impl fmt::Display for TopicName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}/{}/{}",
            self.domain, self.tenant, self.namespace, self.local
        )
    }
}

/// Collapses a raw topic listing to unique logical local names.
///
/// Partitions of the same topic appear once; non-partitioned topics pass
/// through. Order of first appearance is preserved.
#[must_use]
pub fn logical_table_names(topics: &[TopicName]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for t in topics {
        let name = t.logical_local().to_string();
        if seen.insert(name.clone()) {
            out.push(name);
        }
    }
    out
}
