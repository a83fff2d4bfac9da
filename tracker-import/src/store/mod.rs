//! Backing store abstraction
//!
//! Preheat suppliers read through [`TrackerStore`]; the commit engine writes
//! through a [`StoreTransaction`]. Writes are buffered until `flush`, and
//! nothing is visible outside the transaction until `commit`.

pub mod memory;

use crate::identifier::IdSchemeParam;
use crate::models::{
    CategoryOptionCombo, EnrollmentRecord, EventRecord, Metadata, MetadataType, ProgramOwner,
    RelationshipRecord, TrackedEntityRecord, TrackerType, User,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use tracker_common::Result;

pub use memory::{InMemoryStore, StoreStats};

#[async_trait]
pub trait TrackerStore: Send + Sync {
    /// Default category combo, category option and option combo
    async fn find_defaults(&self) -> Result<Vec<Metadata>>;

    /// Metadata of one kind whose identifier under `scheme` is in `values`
    async fn find_metadata(
        &self,
        kind: MetadataType,
        scheme: &IdSchemeParam,
        values: &[String],
    ) -> Result<Vec<Metadata>>;

    /// The option combo of `category_combo` (UID) made of exactly `options` (UIDs)
    async fn find_category_option_combo(
        &self,
        category_combo: &str,
        options: &BTreeSet<String>,
    ) -> Result<Option<CategoryOptionCombo>>;

    async fn find_users(&self, usernames: &[String]) -> Result<Vec<User>>;

    async fn find_tracked_entities(&self, uids: &[String]) -> Result<Vec<TrackedEntityRecord>>;

    async fn find_enrollments(&self, uids: &[String]) -> Result<Vec<EnrollmentRecord>>;

    async fn find_events(&self, uids: &[String]) -> Result<Vec<EventRecord>>;

    async fn find_relationships(&self, uids: &[String]) -> Result<Vec<RelationshipRecord>>;

    /// Relationships whose key or inverted key is in `keys`
    async fn find_relationships_by_keys(&self, keys: &[String]) -> Result<Vec<RelationshipRecord>>;

    async fn find_program_owners(&self, tracked_entities: &[String]) -> Result<Vec<ProgramOwner>>;

    /// The single enrollment of each program without registration
    async fn find_enrollments_without_registration(&self, program_ids: &[i64]) -> Result<Vec<EnrollmentRecord>>;

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>>;
}

/// A write buffered in a [`StoreTransaction`]
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    /// Insert or replace by UID
    TrackedEntity(TrackedEntityRecord),
    Enrollment(EnrollmentRecord),
    Event(EventRecord),
    Relationship(RelationshipRecord),
    /// Insert; an existing owner for the same tracked entity and program wins
    ProgramOwner(ProgramOwner),
    /// Soft delete
    Delete {
        tracker_type: TrackerType,
        uid: String,
        at: DateTime<Utc>,
        by: Option<String>,
    },
    /// Refresh the update stamps of a tracked entity
    TouchTrackedEntity {
        uid: String,
        at: DateTime<Utc>,
        by: Option<String>,
    },
}

impl Write {
    /// UID of the object written
    pub fn uid(&self) -> &str {
        match self {
            Write::TrackedEntity(r) => &r.uid,
            Write::Enrollment(r) => &r.uid,
            Write::Event(r) => &r.uid,
            Write::Relationship(r) => &r.uid,
            Write::ProgramOwner(o) => &o.tracked_entity,
            Write::Delete { uid, .. } | Write::TouchTrackedEntity { uid, .. } => uid,
        }
    }
}

#[async_trait]
pub trait StoreTransaction: Send {
    /// Buffer a write
    ///
    /// Errors reported here mean the write can never succeed.
    async fn persist(&mut self, write: Write) -> Result<()>;

    /// Push buffered writes to storage
    async fn flush(&mut self) -> Result<()>;

    /// Flush remaining writes and make everything durable
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discard every write of this transaction
    async fn rollback(self: Box<Self>) -> Result<()>;
}
