//! Preheat: bulk-load everything a bundle commit will read

pub mod cache;
pub mod orchestrator;
pub mod relationship_key;
pub mod supplier;
pub mod suppliers;

pub use cache::PreheatCache;
pub use orchestrator::PreheatOrchestrator;
pub use relationship_key::RelationshipKey;
pub use supplier::PreheatSupplier;
