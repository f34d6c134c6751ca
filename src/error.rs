//! Bridge error types.
//!
//! A unified error hierarchy for all bridge operations:
//! - `BridgeError`: top-level error for catalog, source, and sink operations
//! - `AdminError`: administrative call failures with a classified kind
//! - `CatalogError`: user-facing catalog errors surfaced to the query layer
//! - `SerdeError`: wire-format serialization/deserialization errors

use thiserror::Error;

/// Classification of an administrative failure.
///
/// `NotFound` is load-bearing: catalog operations that depend on absence
/// (e.g. `create_table` with IF-NOT-EXISTS semantics) treat it as a normal
/// negative result rather than an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminErrorKind {
    /// The addressed tenant, namespace, topic, or schema does not exist.
    NotFound,
    /// The caller is not authorized for the operation.
    Unauthorized,
    /// The resource already exists or is in a conflicting state.
    Conflict,
    /// The request could not reach the backend.
    Network,
    /// Any other backend-reported failure.
    Backend,
}

impl std::fmt::Display for AdminErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdminErrorKind::NotFound => write!(f, "not found"),
            AdminErrorKind::Unauthorized => write!(f, "unauthorized"),
            AdminErrorKind::Conflict => write!(f, "conflict"),
            AdminErrorKind::Network => write!(f, "network"),
            AdminErrorKind::Backend => write!(f, "backend"),
        }
    }
}

/// An administrative call failed.
///
/// Never retried by the gateway itself; retry policy belongs to callers.
#[derive(Debug, Clone, Error)]
#[error("admin failure ({kind}): {message}")]
pub struct AdminError {
    /// Failure classification.
    pub kind: AdminErrorKind,
    /// Backend-provided detail.
    pub message: String,
}

impl AdminError {
    /// Creates a new admin error.
    #[must_use]
    pub fn new(kind: AdminErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Shorthand for a `NotFound` error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(AdminErrorKind::NotFound, message)
    }

    /// Returns `true` if this error reports absence of the addressed object.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.kind == AdminErrorKind::NotFound
    }
}

/// User-facing catalog errors surfaced to the query layer.
#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    /// The database (namespace) does not exist.
    #[error("database not found: {0}")]
    DatabaseNotFound(String),

    /// The table (topic) does not exist.
    #[error("table not found: {0}")]
    TableNotFound(String),

    /// The table (topic) already exists and IF-NOT-EXISTS was not requested.
    #[error("table already exists: {0}")]
    TableAlreadyExists(String),
}

/// Errors that occur during wire-format serialization or deserialization.
#[derive(Debug, Error)]
pub enum SerdeError {
    /// JSON parsing or encoding error.
    #[error("JSON error: {0}")]
    Json(String),

    /// Avro parsing or encoding error.
    #[error("Avro error: {0}")]
    Avro(String),

    /// The data format is not supported for the requested operation.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// A required field is missing from the input.
    #[error("missing field: {0}")]
    MissingField(String),

    /// A field value could not be converted to the target Arrow type.
    #[error("type conversion error: field '{field}', expected {expected}: {message}")]
    TypeConversion {
        /// The field name.
        field: String,
        /// The expected Arrow data type.
        expected: String,
        /// Details about the conversion failure.
        message: String,
    },

    /// The input payload is malformed.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

impl From<serde_json::Error> for SerdeError {
    fn from(e: serde_json::Error) -> Self {
        SerdeError::Json(e.to_string())
    }
}

/// Data-plane failures reported by readers and writers.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The exclusive subscription name is already held by another consumer.
    #[error("subscription name already in use: {0}")]
    SubscriptionInUse(String),

    /// The addressed topic or partition does not exist.
    #[error("topic not found: {0}")]
    TopicNotFound(String),

    /// A failure that may clear on retry (broker restart, reconnect).
    #[error("transient transport error: {0}")]
    Transient(String),

    /// A failure that will not clear on retry.
    #[error("fatal transport error: {0}")]
    Fatal(String),
}

impl TransportError {
    /// Returns `true` if retrying the operation may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Transient(_))
    }
}

/// Errors that can occur during bridge operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Administrative call failure, propagated from the gateway.
    #[error(transparent)]
    Admin(#[from] AdminError),

    /// User-facing catalog error.
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Requested table schema is incompatible with the existing topic schema.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// A partition's subscription entered an unrecoverable backend error.
    ///
    /// Fails the entire source; partial-partition loss would silently
    /// corrupt result correctness.
    #[error("source partition failure: {topic} partition {partition}: {message}")]
    SourcePartitionFailure {
        /// The topic being read.
        topic: String,
        /// The failed partition index.
        partition: i32,
        /// Failure detail.
        message: String,
    },

    /// A row failed to persist after bounded transport-level retries.
    #[error("sink write failure: {topic}: {message} ({pending} writes pending)")]
    SinkWriteFailure {
        /// The target topic.
        topic: String,
        /// Failure detail.
        message: String,
        /// Number of unacknowledged writes at failure time.
        pending: usize,
    },

    /// Wire-format serialization or deserialization error.
    #[error("serde error: {0}")]
    Serde(#[from] SerdeError),

    /// Invalid bridge configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Required configuration key is missing.
    #[error("missing required config: {0}")]
    MissingConfig(String),

    /// The component is not in the expected lifecycle state.
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// The expected state.
        expected: String,
        /// The actual state.
        actual: String,
    },

    /// The data-plane connection failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The component has been closed.
    #[error("closed")]
    Closed,
}
