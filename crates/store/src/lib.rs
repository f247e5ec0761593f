//! `store` crate: the persistence boundary for node declarations and events.
//!
//! Provides the stored row shapes, the `NodeStore`/`EventStore` traits the
//! engine reads through, an in-memory implementation and a JSON fixture
//! loader. No evaluation logic lives here.

pub mod error;
pub mod fixture;
pub mod memory;
pub mod models;
pub mod traits;

pub use error::StoreError;
pub use fixture::Fixture;
pub use memory::InMemoryStore;
pub use models::{EventRow, NodeRow, RowStatus, EVENT_TYPES};
pub use traits::{EventStore, NodeStore};
