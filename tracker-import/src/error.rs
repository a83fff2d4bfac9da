//! Error types for tracker-import
//!
//! Preheat failures either abort the pipeline or leave gaps that validation
//! reports as unresolved references. Persistence failures always abort the
//! enclosing transaction.

use crate::models::{MetadataType, TrackerType};
use thiserror::Error;

/// Import pipeline error
#[derive(Debug, Error)]
pub enum ImportError {
    /// A preheat supplier could not load the data it is responsible for
    #[error("Preheat supplier '{supplier}' failed: {source}")]
    Preheat {
        supplier: &'static str,
        #[source]
        source: Box<ImportError>,
    },

    /// An identifier in the payload resolves to nothing in the preheat cache
    #[error("Unresolved {kind} reference: {identifier}")]
    UnresolvedReference { kind: String, identifier: String },

    /// Relationship key or inverse key already present
    #[error("Duplicate relationship: {relationship}")]
    DuplicateRelationship { relationship: String },

    /// Storage rejected a write; the commit transaction was rolled back
    #[error("Persistence failure{}: {source}", uid.as_ref().map(|u| format!(" for {}", u)).unwrap_or_default())]
    Persistence {
        uid: Option<String>,
        #[source]
        source: tracker_common::Error,
    },

    /// Malformed identifier object
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Backing store error outside a commit transaction
    #[error("Store error: {0}")]
    Store(#[from] tracker_common::Error),
}

impl ImportError {
    /// Unresolved metadata reference
    pub fn unresolved_metadata(kind: MetadataType, identifier: impl ToString) -> Self {
        ImportError::UnresolvedReference {
            kind: kind.to_string(),
            identifier: identifier.to_string(),
        }
    }

    /// Unresolved reference to another tracker object
    pub fn unresolved_tracker(tracker_type: TrackerType, uid: impl Into<String>) -> Self {
        ImportError::UnresolvedReference {
            kind: tracker_type.to_string(),
            identifier: uid.into(),
        }
    }

    /// Persistence failure for a single object
    pub fn persistence(uid: Option<&str>, source: tracker_common::Error) -> Self {
        ImportError::Persistence {
            uid: uid.map(str::to_string),
            source,
        }
    }
}

/// Result type for import operations
pub type Result<T> = std::result::Result<T, ImportError>;
