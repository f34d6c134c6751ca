//! Starting-position policies and per-partition cursor resolution.
//!
//! A source resolves one cursor per partition exactly once, at
//! instantiation. `Latest` snapshots the tail position at resolution time;
//! messages published between resolution and the first receive are
//! delivered, messages published before resolution are not.

use std::fmt;

use tracing::debug;

use crate::admin::AdminGateway;
use crate::error::BridgeError;
use crate::topic::TopicName;

/// Startup position policy for a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupMode {
    /// Begin at the oldest retained message of every partition.
    Earliest,
    /// Begin after the tail position snapshotted at resolution time.
    Latest,
    /// Begin at the first message with publish time at or after the
    /// given epoch milliseconds.
    Timestamp(u64),
}

impl std::str::FromStr for StartupMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "earliest" => Ok(StartupMode::Earliest),
            "latest" => Ok(StartupMode::Latest),
            other => match other.strip_prefix("timestamp:") {
                Some(millis) => millis
                    .parse::<u64>()
                    .map(StartupMode::Timestamp)
                    .map_err(|e| format!("invalid startup timestamp '{millis}': {e}")),
                None => Err(format!(
                    "unknown startup mode '{other}' (expected 'earliest', 'latest', or 'timestamp:<millis>')"
                )),
            },
        }
    }
}

/// Position of a single message within a partition.
///
/// Ordering follows storage order: ledger, then entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId {
    /// Ledger holding the entry.
    pub ledger_id: u64,
    /// Entry index within the ledger.
    pub entry_id: u64,
}

impl MessageId {
    /// Creates a message id.
    #[must_use]
    pub fn new(ledger_id: u64, entry_id: u64) -> Self {
        Self {
            ledger_id,
            entry_id,
        }
    }

    /// Parses the `ledger:entry` checkpoint encoding.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Configuration` on a malformed encoding.
    pub fn parse(s: &str) -> Result<Self, BridgeError> {
        let (ledger, entry) = s.split_once(':').ok_or_else(|| {
            BridgeError::Configuration(format!("message id must be 'ledger:entry': '{s}'"))
        })?;
        let parse = |v: &str| {
            v.parse::<u64>().map_err(|e| {
                BridgeError::Configuration(format!("invalid message id component '{v}': {e}"))
            })
        };
        Ok(Self {
            ledger_id: parse(ledger)?,
            entry_id: parse(entry)?,
        })
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ledger_id, self.entry_id)
    }
}

/// Resolved start cursor for one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cursor {
    /// Deliver everything the partition retains.
    Earliest,
    /// Deliver starting at this message, inclusive.
    At(MessageId),
    /// Deliver starting strictly after this message.
    After(MessageId),
}

impl Cursor {
    /// Returns `true` if a message at `id` falls within this cursor.
    #[must_use]
    pub fn admits(&self, id: MessageId) -> bool {
        match self {
            Cursor::Earliest => true,
            Cursor::At(start) => id >= *start,
            Cursor::After(start) => id > *start,
        }
    }
}

/// Resolves per-partition start cursors through the admin gateway.
pub struct PositionResolver<'a> {
    gateway: &'a dyn AdminGateway,
}

impl<'a> PositionResolver<'a> {
    /// Creates a resolver over the given gateway.
    #[must_use]
    pub fn new(gateway: &'a dyn AdminGateway) -> Self {
        Self { gateway }
    }

    /// Resolves the start cursor for one partition of `topic`.
    ///
    /// # Errors
    ///
    /// Propagates admin failures from position lookups.
    pub async fn resolve(
        &self,
        topic: &TopicName,
        partition: i32,
        mode: StartupMode,
    ) -> Result<Cursor, BridgeError> {
        let cursor = match mode {
            StartupMode::Earliest => Cursor::Earliest,
            StartupMode::Latest => match self.gateway.latest_position(topic, partition).await? {
                Some(tail) => Cursor::After(tail),
                // Empty partition: everything published later is new.
                None => Cursor::Earliest,
            },
            StartupMode::Timestamp(millis) => {
                match self
                    .gateway
                    .position_for_time(topic, partition, millis)
                    .await?
                {
                    Some(id) => Cursor::At(id),
                    // Nothing at or after the timestamp yet; behave as latest.
                    None => match self.gateway.latest_position(topic, partition).await? {
                        Some(tail) => Cursor::After(tail),
                        None => Cursor::Earliest,
                    },
                }
            }
        };
        debug!(topic = %topic, partition, ?mode, ?cursor, "resolved start cursor");
        Ok(cursor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_mode_parse() {
        assert_eq!("earliest".parse::<StartupMode>().unwrap(), StartupMode::Earliest);
        assert_eq!("latest".parse::<StartupMode>().unwrap(), StartupMode::Latest);
        assert_eq!(
            "timestamp:1700000000000".parse::<StartupMode>().unwrap(),
            StartupMode::Timestamp(1_700_000_000_000)
        );
        assert!("timestamp:soon".parse::<StartupMode>().is_err());
        assert!("middle".parse::<StartupMode>().is_err());
    }

    #[test]
    fn test_message_id_ordering() {
        let a = MessageId::new(1, 5);
        let b = MessageId::new(1, 6);
        let c = MessageId::new(2, 0);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_message_id_encoding_round_trip() {
        let id = MessageId::new(42, 7);
        assert_eq!(id.to_string(), "42:7");
        assert_eq!(MessageId::parse("42:7").unwrap(), id);
        assert!(MessageId::parse("42").is_err());
        assert!(MessageId::parse("a:b").is_err());
    }

    #[test]
    fn test_cursor_admits() {
        let id = MessageId::new(1, 5);
        assert!(Cursor::Earliest.admits(id));
        assert!(Cursor::At(id).admits(id));
        assert!(!Cursor::After(id).admits(id));
        assert!(Cursor::After(id).admits(MessageId::new(1, 6)));
        assert!(!Cursor::At(id).admits(MessageId::new(1, 4)));
    }
}
