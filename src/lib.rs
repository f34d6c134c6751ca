//! # Pulsar Bridge
//!
//! Exposes a multi-tenant Pulsar deployment to a relational query engine:
//! tenants become catalogs, namespaces become databases, and topics become
//! tables that can be read as ordered row streams and written back to.
//!
//! ## Architecture
//!
//! ```text
//! query layer
//!   CatalogMapper  -- resolves table identity + schema (admin round-trips)
//!   PositionResolver -- computes per-partition start cursors
//!   PulsarSource   -- partition readers -> Arrow RecordBatch rows
//!   PulsarSink     -- Arrow RecordBatch rows -> topic messages
//! backend
//!   AdminGateway   -- tenant/namespace/topic/schema administration
//!   MessageTransport -- per-partition readers and writers
//! ```
//!
//! The schema translator ([`schema`] + [`serde`]) sits between both
//! adapters and the catalog: topic schema descriptors map to Arrow column
//! lists with synthesized metadata columns (`eventTime`, `properties`,
//! `topic`, `sequenceId`), and rows round-trip through the topic's wire
//! format.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
// Common test patterns that are acceptable
#![cfg_attr(
    test,
    allow(
        clippy::field_reassign_with_default,
        clippy::float_cmp,
        clippy::unreadable_literal,
        clippy::cast_possible_truncation,
        clippy::cast_possible_wrap,
        clippy::cast_sign_loss
    )
)]

/// Bridge error types.
pub mod error;

/// Catalog option parsing and validated configuration.
pub mod config;

/// Topic-name parsing and partition normalization.
pub mod topic;

/// Schema descriptors, table schemas, and metadata columns.
pub mod schema;

/// Wire-format serialization between payload bytes and Arrow rows.
pub mod serde;

/// Administrative gateway trait and HTTP implementation.
pub mod admin;

/// Catalog mapper: tenant/namespace/topic to catalog/database/table.
pub mod catalog;

/// Starting-position policies and per-partition cursor resolution.
pub mod position;

/// Per-partition cursor tracking and source checkpoints.
pub mod cursor;

/// Narrow data-plane traits for readers and writers.
pub mod transport;

/// Streaming source adapter.
pub mod source;

/// Streaming sink adapter.
pub mod sink;

/// Partition routing for sink writes.
pub mod router;

/// In-memory backend and helpers for tests.
pub mod testing;

/// Production transport backed by the `pulsar` client crate.
#[cfg(feature = "pulsar-client")]
pub mod pulsar_io;
