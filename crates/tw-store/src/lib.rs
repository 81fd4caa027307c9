//! Tidewire document store
//!
//! Repository traits for the collaborator store plus two backends:
//! - [`MemoryStore`]: DashMap-backed, used in tests and local development
//! - [`MongoStore`]: MongoDB collections (feature `mongo`)
//!
//! Delivery transitions are conditional single-document writes so concurrent
//! dispatchers cannot both win a claim or both record the same attempt number.

pub mod error;
pub mod memory;
#[cfg(feature = "mongo")]
pub mod mongo;
pub mod repository;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
#[cfg(feature = "mongo")]
pub use mongo::MongoStore;
pub use repository::{
    ConversationRepository, DeliveryRepository, EventRepository, ProcessorConfigRepository, Store,
};
