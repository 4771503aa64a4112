//! Keyspace derivation for the sharded storage substrate
//!
//! Keys render as `{scope}:resource-path`. Only the brace-wrapped scope token
//! participates in shard-slot hashing, so every resource belonging to one
//! scope lands on the same shard and multi-key operations within a scope
//! stay atomic.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Number of hash slots the keyspace is divided into
pub const SLOT_COUNT: u16 = 1024;

/// A storage key bound to a colocation scope
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopedKey {
    scope: String,
    path: String,
}

impl ScopedKey {
    /// Create a key for `path` under the given scope
    pub fn new(scope: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            path: path.into(),
        }
    }

    /// The colocation scope (e.g., a session id)
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// The resource path within the scope
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Shard slot for this key. Derived from the scope token alone, so all
    /// keys of one scope map to the same slot.
    pub fn slot(&self) -> u16 {
        hash_slot(&self.render())
    }

    /// Render the full key string: `{scope}:path`
    pub fn render(&self) -> String {
        format!("{{{}}}:{}", self.scope, self.path)
    }
}

impl fmt::Display for ScopedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

/// Compute the hash slot for a rendered key.
///
/// If the key contains a `{...}` hash tag, only the tag content is hashed;
/// otherwise the whole key is. An empty tag (`{}`) falls back to the whole
/// key, matching the hash-tag convention of clustered key-value stores.
pub fn hash_slot(key: &str) -> u16 {
    let hashed = match extract_hash_tag(key) {
        Some(tag) if !tag.is_empty() => tag,
        _ => key,
    };

    let mut hasher = DefaultHasher::new();
    hashed.hash(&mut hasher);
    (hasher.finish() % SLOT_COUNT as u64) as u16
}

/// Extract the content of the first `{...}` segment, if any
fn extract_hash_tag(key: &str) -> Option<&str> {
    let start = key.find('{')?;
    let rest = &key[start + 1..];
    let end = rest.find('}')?;
    Some(&rest[..end])
}
