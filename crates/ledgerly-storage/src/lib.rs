//! Ledgerly Storage Layer
//!
//! Durable key-value storage for client-side session state.
//! Entries survive process restarts; multi-key writes are transactional
//! on backends that support it.

mod database;
mod error;
mod memory;
mod migrations;
mod store;

pub use database::Database;
pub use error::StorageError;
pub use memory::MemoryStore;
pub use store::KeyValueStore;

pub type Result<T> = std::result::Result<T, StorageError>;
