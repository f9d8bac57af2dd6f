//! Durable storage: object stores, deterministic keys and partial results.

pub mod fs;
pub mod keys;
pub mod object_store;
pub mod partial;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use fs::FsObjectStore;
pub use keys::StorageKeys;
pub use object_store::{InMemoryObjectStore, ObjectStore, StoreError};
pub use partial::{PartialResultStore, DEFAULT_COLLECTION_FIELD};
#[cfg(feature = "postgres")]
pub use postgres::PostgresObjectStore;
