//! Relationship duplicate-detection keys
//!
//! A relationship is identified by its type and its two ends. For
//! bidirectional types the inverse key (ends swapped) denotes the same
//! relationship.

use crate::models::RelationshipItem;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelationshipKey {
    relationship_type: String,
    from: String,
    to: String,
}

impl RelationshipKey {
    pub fn new(relationship_type: impl Into<String>, from: &RelationshipItem, to: &RelationshipItem) -> Self {
        Self {
            relationship_type: relationship_type.into(),
            from: from.uid().to_string(),
            to: to.uid().to_string(),
        }
    }

    pub fn inverse(&self) -> Self {
        Self {
            relationship_type: self.relationship_type.clone(),
            from: self.to.clone(),
            to: self.from.clone(),
        }
    }

    pub fn as_string(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for RelationshipKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.relationship_type, self.from, self.to)
    }
}
