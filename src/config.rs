//! Catalog configuration.
//!
//! Provides the option model for the bridge:
//! - [`BridgeOptions`]: key-value options as delivered by `WITH (...)` clauses
//! - [`CatalogConfig`]: validated, parsed configuration
//! - [`RoutingMode`]: sink partition-routing policy

use std::collections::HashMap;
use std::fmt;

use crate::error::BridgeError;
use crate::position::StartupMode;
use crate::serde::Format;

/// Option key for the broker service URL.
pub const SERVICE_URL: &str = "service-url";
/// Option key for the admin REST URL.
pub const ADMIN_URL: &str = "admin-url";
/// Option key for the default database (`tenant/namespace`).
pub const DEFAULT_DATABASE: &str = "default-database";
/// Option key for the source startup mode.
pub const SCAN_STARTUP_MODE: &str = "scan.startup.mode";
/// Option key for the value wire format.
pub const VALUE_FORMAT: &str = "value.format";
/// Option key for the key wire format.
pub const KEY_FORMAT: &str = "key.format";
/// Option key for value-column inclusion policy.
pub const VALUE_FIELDS_INCLUDE: &str = "value.fields-include";
/// Option key for the semicolon-separated key field list.
pub const KEY_FIELDS: &str = "key.fields";
/// Option key for the receive timeout in milliseconds.
pub const SCAN_POLL_TIMEOUT_MS: &str = "scan.poll-timeout-ms";
/// Option key for the per-poll row cap.
pub const SCAN_MAX_POLL_RECORDS: &str = "scan.max-poll-records";
/// Option key for the subscription-name collision retry limit.
pub const SCAN_SUBSCRIPTION_RETRY_LIMIT: &str = "scan.subscription-retry-limit";
/// Option key for the transient send retry limit.
pub const SINK_SEND_RETRY_LIMIT: &str = "sink.send-retry-limit";
/// Option key for the sink partition-routing mode.
pub const SINK_ROUTING_MODE: &str = "sink.routing-mode";
/// Option key prefix for authentication properties passed through verbatim.
pub const AUTH_PREFIX: &str = "properties.";

/// Key-value options for a catalog instance.
///
/// Options arrive as a string map, typically parsed from SQL
/// `CREATE CATALOG ... WITH (...)` clauses or programmatic config.
#[derive(Debug, Clone, Default)]
pub struct BridgeOptions {
    properties: HashMap<String, String>,
}

impl BridgeOptions {
    /// Creates an empty option set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            properties: HashMap::new(),
        }
    }

    /// Creates an option set from existing properties.
    #[must_use]
    pub fn with_properties(properties: HashMap<String, String>) -> Self {
        Self { properties }
    }

    /// Sets an option.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    /// Gets an option.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Gets a required option, returning an error if missing.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::MissingConfig` if the key is not set.
    pub fn require(&self, key: &str) -> Result<&str, BridgeError> {
        self.get(key)
            .ok_or_else(|| BridgeError::MissingConfig(key.to_string()))
    }

    /// Gets an option parsed as the given type.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Configuration` if the value cannot be parsed.
    pub fn get_parsed<T: std::str::FromStr>(&self, key: &str) -> Result<Option<T>, BridgeError>
    where
        T::Err: fmt::Display,
    {
        match self.get(key) {
            Some(v) => v.parse::<T>().map(Some).map_err(|e| {
                BridgeError::Configuration(format!("invalid value for '{key}': {e}"))
            }),
            None => Ok(None),
        }
    }

    /// Returns all options as a reference.
    #[must_use]
    pub fn properties(&self) -> &HashMap<String, String> {
        &self.properties
    }

    /// Returns options with a given prefix, with the prefix stripped.
    #[must_use]
    pub fn properties_with_prefix(&self, prefix: &str) -> HashMap<String, String> {
        self.properties
            .iter()
            .filter_map(|(k, v)| {
                k.strip_prefix(prefix)
                    .map(|stripped| (stripped.to_string(), v.clone()))
            })
            .collect()
    }
}

/// Sink partition-routing policy for partitioned topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoutingMode {
    /// Hash the message key; keyless rows fall back to round-robin.
    #[default]
    KeyHash,
    /// Rotate through partitions regardless of key.
    RoundRobin,
}

impl std::str::FromStr for RoutingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "key-hash" => Ok(RoutingMode::KeyHash),
            "round-robin" => Ok(RoutingMode::RoundRobin),
            other => Err(format!(
                "unknown routing mode '{other}' (expected 'key-hash' or 'round-robin')"
            )),
        }
    }
}

/// Value-column inclusion policy for key/value split tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldsInclude {
    /// The value payload carries every physical column, key fields included.
    #[default]
    All,
    /// Key fields are carried only in the message key, not the value payload.
    ExceptKey,
}

impl std::str::FromStr for FieldsInclude {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ALL" | "all" => Ok(FieldsInclude::All),
            "EXCEPT_KEY" | "except-key" => Ok(FieldsInclude::ExceptKey),
            other => Err(format!(
                "unknown fields-include policy '{other}' (expected 'ALL' or 'EXCEPT_KEY')"
            )),
        }
    }
}

/// Validated catalog configuration.
#[derive(Debug, Clone)]
pub struct CatalogConfig {
    /// Broker service URL (`pulsar://host:6650`).
    pub service_url: String,
    /// Admin REST URL (`http://host:8080`).
    pub admin_url: String,
    /// Default database as `tenant/namespace`.
    pub default_database: String,
    /// Source startup position policy.
    pub startup_mode: StartupMode,
    /// Value wire format, when declared explicitly.
    pub value_format: Option<Format>,
    /// Key wire format, when a key/value split is configured.
    pub key_format: Option<Format>,
    /// Value-column inclusion policy.
    pub value_fields_include: FieldsInclude,
    /// Declared key field names, in declaration order.
    pub key_fields: Vec<String>,
    /// Receive timeout per bounded wait, in milliseconds.
    pub poll_timeout_ms: u64,
    /// Maximum rows returned by a single poll.
    pub max_poll_records: usize,
    /// Retries on subscription-name collision before giving up.
    pub subscription_retry_limit: u32,
    /// Retries on transient send failure before giving up.
    pub send_retry_limit: u32,
    /// Sink partition-routing policy.
    pub routing_mode: RoutingMode,
    /// Authentication properties passed through to the backend verbatim.
    pub auth_properties: HashMap<String, String>,
}

fn parse_format(options: &BridgeOptions, key: &str) -> Result<Option<Format>, BridgeError> {
    match options.get(key) {
        Some(s) => s.parse::<Format>().map(Some).map_err(|e| {
            BridgeError::Configuration(format!("invalid value for '{key}': {e}"))
        }),
        None => Ok(None),
    }
}

impl CatalogConfig {
    /// Parses and validates catalog options.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::MissingConfig` if a required option is absent,
    /// or `BridgeError::Configuration` if a value is malformed.
    pub fn from_options(options: &BridgeOptions) -> Result<Self, BridgeError> {
        let service_url = options.require(SERVICE_URL)?.to_string();
        let admin_url = options.require(ADMIN_URL)?.to_string();

        let default_database = options
            .get(DEFAULT_DATABASE)
            .unwrap_or("public/default")
            .to_string();
        if default_database.split('/').count() != 2 {
            return Err(BridgeError::Configuration(format!(
                "'{DEFAULT_DATABASE}' must be 'tenant/namespace', got '{default_database}'"
            )));
        }

        let startup_mode = match options.get(SCAN_STARTUP_MODE) {
            Some(s) => s
                .parse::<StartupMode>()
                .map_err(BridgeError::Configuration)?,
            None => StartupMode::Latest,
        };

        let key_fields = options
            .get(KEY_FIELDS)
            .map(|s| {
                s.split(';')
                    .map(str::trim)
                    .filter(|f| !f.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let value_fields_include = match options.get(VALUE_FIELDS_INCLUDE) {
            Some(s) => s
                .parse::<FieldsInclude>()
                .map_err(BridgeError::Configuration)?,
            None => FieldsInclude::All,
        };

        let routing_mode = match options.get(SINK_ROUTING_MODE) {
            Some(s) => s
                .parse::<RoutingMode>()
                .map_err(BridgeError::Configuration)?,
            None => RoutingMode::KeyHash,
        };

        Ok(Self {
            service_url,
            admin_url,
            default_database,
            startup_mode,
            value_format: parse_format(options, VALUE_FORMAT)?,
            key_format: parse_format(options, KEY_FORMAT)?,
            value_fields_include,
            key_fields,
            poll_timeout_ms: options.get_parsed(SCAN_POLL_TIMEOUT_MS)?.unwrap_or(100),
            max_poll_records: options.get_parsed(SCAN_MAX_POLL_RECORDS)?.unwrap_or(1000),
            subscription_retry_limit: options
                .get_parsed(SCAN_SUBSCRIPTION_RETRY_LIMIT)?
                .unwrap_or(3),
            send_retry_limit: options.get_parsed(SINK_SEND_RETRY_LIMIT)?.unwrap_or(3),
            routing_mode,
            auth_properties: options.properties_with_prefix(AUTH_PREFIX),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_options() -> BridgeOptions {
        let mut opts = BridgeOptions::new();
        opts.set(SERVICE_URL, "pulsar://localhost:6650");
        opts.set(ADMIN_URL, "http://localhost:8080");
        opts
    }

    #[test]
    fn test_options_basic_operations() {
        let mut opts = BridgeOptions::new();
        opts.set("service-url", "pulsar://localhost:6650");
        assert_eq!(opts.get("service-url"), Some("pulsar://localhost:6650"));
        assert_eq!(opts.get("missing"), None);
        assert!(opts.require("missing").is_err());
    }

    #[test]
    fn test_options_prefix_extraction() {
        let mut opts = BridgeOptions::new();
        opts.set("properties.auth-plugin-classname", "TokenAuth");
        opts.set("properties.auth-params", "token:abc");
        opts.set("service-url", "pulsar://localhost:6650");

        let auth = opts.properties_with_prefix("properties.");
        assert_eq!(auth.len(), 2);
        assert_eq!(
            auth.get("auth-plugin-classname"),
            Some(&"TokenAuth".to_string())
        );
    }

    #[test]
    fn test_config_defaults() {
        let config = CatalogConfig::from_options(&minimal_options()).unwrap();
        assert_eq!(config.default_database, "public/default");
        assert_eq!(config.startup_mode, StartupMode::Latest);
        assert_eq!(config.poll_timeout_ms, 100);
        assert_eq!(config.max_poll_records, 1000);
        assert_eq!(config.subscription_retry_limit, 3);
        assert_eq!(config.send_retry_limit, 3);
        assert_eq!(config.routing_mode, RoutingMode::KeyHash);
        assert!(config.key_fields.is_empty());
        assert_eq!(config.value_fields_include, FieldsInclude::All);
    }

    #[test]
    fn test_config_missing_required() {
        let opts = BridgeOptions::new();
        assert!(matches!(
            CatalogConfig::from_options(&opts),
            Err(BridgeError::MissingConfig(_))
        ));
    }

    #[test]
    fn test_config_startup_modes() {
        let mut opts = minimal_options();
        opts.set(SCAN_STARTUP_MODE, "earliest");
        let config = CatalogConfig::from_options(&opts).unwrap();
        assert_eq!(config.startup_mode, StartupMode::Earliest);

        opts.set(SCAN_STARTUP_MODE, "timestamp:1700000000000");
        let config = CatalogConfig::from_options(&opts).unwrap();
        assert_eq!(
            config.startup_mode,
            StartupMode::Timestamp(1_700_000_000_000)
        );

        opts.set(SCAN_STARTUP_MODE, "bogus");
        assert!(CatalogConfig::from_options(&opts).is_err());
    }

    #[test]
    fn test_config_key_fields_split() {
        let mut opts = minimal_options();
        opts.set(KEY_FIELDS, "oid; cid");
        opts.set(VALUE_FIELDS_INCLUDE, "EXCEPT_KEY");
        let config = CatalogConfig::from_options(&opts).unwrap();
        assert_eq!(config.key_fields, vec!["oid", "cid"]);
        assert_eq!(config.value_fields_include, FieldsInclude::ExceptKey);
    }

    #[test]
    fn test_config_formats_parsed() {
        let mut opts = minimal_options();
        opts.set(VALUE_FORMAT, "avro");
        opts.set(KEY_FORMAT, "json");
        let config = CatalogConfig::from_options(&opts).unwrap();
        assert_eq!(config.value_format, Some(Format::Avro));
        assert_eq!(config.key_format, Some(Format::Json));
    }

    #[test]
    fn test_config_rejects_unknown_format() {
        // A typoed format must fail fast, not degrade to a default
        let mut opts = minimal_options();
        opts.set(VALUE_FORMAT, "arvo");
        assert!(matches!(
            CatalogConfig::from_options(&opts),
            Err(BridgeError::Configuration(_))
        ));

        opts.set(VALUE_FORMAT, "json");
        opts.set(KEY_FORMAT, "cvs");
        assert!(matches!(
            CatalogConfig::from_options(&opts),
            Err(BridgeError::Configuration(_))
        ));
    }

    #[test]
    fn test_config_bad_default_database() {
        let mut opts = minimal_options();
        opts.set(DEFAULT_DATABASE, "no-slash");
        assert!(CatalogConfig::from_options(&opts).is_err());
    }

    #[test]
    fn test_routing_mode_parse() {
        assert_eq!(
            "round-robin".parse::<RoutingMode>().unwrap(),
            RoutingMode::RoundRobin
        );
        assert!("random".parse::<RoutingMode>().is_err());
    }
}
