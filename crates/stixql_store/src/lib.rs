//! Graph store abstraction.
//!
//! The engine talks to the database exclusively through [`GraphStore`]:
//! finished query text in, typed result trees out. Shipped backends are
//! [`NullStore`] (no-op, for running the pipeline without a database) and
//! [`MemoryStore`] (a behavioural double for tests that tracks inserted and
//! deleted identities).

mod error;
mod memory;
mod store;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use store::{GraphStore, NullStore, StoreResult};
