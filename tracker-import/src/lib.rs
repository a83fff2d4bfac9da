//! tracker-import library
//!
//! Bulk import of tracker data: identifier resolution, preheat, bundle
//! commit and post-commit side effects.
//!
//! ```text
//! payload ─▶ PreheatOrchestrator ─▶ PreheatCache
//!                                      │
//!              TrackerBundle ◀─────────┘
//!                   │ validators
//!                   ▼
//!            BundleCommitEngine ─▶ StoreTransaction
//!                   │
//!                   └─▶ SideEffectDispatcher
//! ```

pub mod bundle;
pub mod db;
pub mod error;
pub mod identifier;
pub mod importer;
pub mod models;
pub mod preheat;
pub mod side_effect;
pub mod store;
pub mod utils;
pub mod validation;

pub use crate::error::{ImportError, Result};
pub use crate::importer::TrackerImporter;
