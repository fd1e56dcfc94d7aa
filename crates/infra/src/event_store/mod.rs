//! Append-only event store boundary.
//!
//! Clinic-scoped event streams behind a storage-agnostic trait, plus the
//! in-memory implementation the server runs on.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
