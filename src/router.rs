//! Partition routing for sink writes.
//!
//! Partitioned topics need a partition per outgoing row. Keyed rows hash
//! their key the way the backend's default router does, so bridge-written
//! and natively-written messages with the same key land on the same
//! partition. Keyless rows rotate round-robin.

use crate::config::RoutingMode;

/// Chooses a partition for each outgoing message.
pub trait PartitionRouter: Send {
    /// Returns the partition for a message. `partitions` is at least 1.
    fn route(&mut self, key: Option<&str>, partitions: u32) -> u32;
}

/// 31-based string hash, matching the backend's default key router.
#[must_use]
pub fn java_string_hash(key: &str) -> i32 {
    let mut hash: i32 = 0;
    for b in key.bytes() {
        hash = hash.wrapping_mul(31).wrapping_add(i32::from(b));
    }
    hash
}

/// Routes keyed rows by key hash, keyless rows round-robin.
#[derive(Debug, Default)]
pub struct KeyHashRouter {
    fallback: RoundRobinRouter,
}

impl KeyHashRouter {
    /// Creates a key-hash router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl PartitionRouter for KeyHashRouter {
    fn route(&mut self, key: Option<&str>, partitions: u32) -> u32 {
        match key {
            Some(key) if !key.is_empty() => {
                let hash = java_string_hash(key);
                #[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
                {
                    hash.rem_euclid(partitions as i32) as u32
                }
            }
            _ => self.fallback.route(None, partitions),
        }
    }
}

/// Rotates through partitions regardless of key.
#[derive(Debug, Default)]
pub struct RoundRobinRouter {
    next: u32,
}

impl RoundRobinRouter {
    /// Creates a round-robin router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl PartitionRouter for RoundRobinRouter {
    fn route(&mut self, _key: Option<&str>, partitions: u32) -> u32 {
        let partition = self.next % partitions;
        self.next = self.next.wrapping_add(1);
        partition
    }
}

/// Creates the router for a configured routing mode.
#[must_use]
pub fn router_for(mode: RoutingMode) -> Box<dyn PartitionRouter> {
    match mode {
        RoutingMode::KeyHash => Box::new(KeyHashRouter::new()),
        RoutingMode::RoundRobin => Box::new(RoundRobinRouter::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_hash_stable() {
        let mut router = KeyHashRouter::new();
        let p1 = router.route(Some("order-42"), 5);
        let p2 = router.route(Some("order-42"), 5);
        assert_eq!(p1, p2);
        assert!(p1 < 5);
    }

    #[test]
    fn test_key_hash_negative_hash_wraps() {
        // A key whose 31-based hash is negative must still land in range
        let key = "\u{7f}\u{7f}\u{7f}\u{7f}\u{7f}\u{7f}\u{7f}";
        let mut router = KeyHashRouter::new();
        let p = router.route(Some(key), 3);
        assert!(p < 3);
    }

    #[test]
    fn test_keyless_falls_back_to_round_robin() {
        let mut router = KeyHashRouter::new();
        let picks: Vec<u32> = (0..4).map(|_| router.route(None, 2)).collect();
        assert_eq!(picks, vec![0, 1, 0, 1]);
    }

    #[test]
    fn test_round_robin_rotation() {
        let mut router = RoundRobinRouter::new();
        let picks: Vec<u32> = (0..6).map(|_| router.route(Some("k"), 3)).collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn test_java_string_hash_known_values() {
        // Same recurrence as the JVM's String.hashCode for ASCII input
        assert_eq!(java_string_hash(""), 0);
        assert_eq!(java_string_hash("a"), 97);
        assert_eq!(java_string_hash("ab"), 97 * 31 + 98);
    }
}
