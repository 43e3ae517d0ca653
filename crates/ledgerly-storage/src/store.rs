//! Key-value store abstraction

use crate::Result;

/// Durable client storage.
///
/// Access is synchronous and cheap; callers treat it as always available.
/// `set_many` and `remove_many` apply all entries or none.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    fn set_many(&self, entries: &[(&str, &str)]) -> Result<()>;

    fn remove_many(&self, keys: &[&str]) -> Result<()>;
}
