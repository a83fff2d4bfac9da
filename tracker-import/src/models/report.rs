//! Persistence and import reports

use super::payload::TrackerType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::AddAssign;
use uuid::Uuid;

/// Why an object was not persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    UnresolvedReference,
    DuplicateRelationship,
    InvalidIdentifier,
    /// CREATE strategy, object already exists
    AlreadyExists,
    /// UPDATE or DELETE strategy, object does not exist
    NotFound,
    /// Existing relationships cannot be updated
    NotUpdatable,
    /// Removed because an object it depends on failed
    DependencyFailed,
    Persistence,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rejection {
    pub tracker_type: TrackerType,
    pub uid: String,
    /// Position of the object in its payload list
    pub index: Option<usize>,
    pub kind: FailureKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub ignored: usize,
}

impl Stats {
    pub fn total(&self) -> usize {
        self.created + self.updated + self.deleted + self.ignored
    }
}

impl AddAssign for Stats {
    fn add_assign(&mut self, other: Self) {
        self.created += other.created;
        self.updated += other.updated;
        self.deleted += other.deleted;
        self.ignored += other.ignored;
    }
}

/// Outcome of one persisted object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReport {
    pub tracker_type: TrackerType,
    pub uid: String,
    pub index: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeReport {
    pub tracker_type: TrackerType,
    pub stats: Stats,
    pub object_reports: Vec<ObjectReport>,
}

impl TypeReport {
    pub fn new(tracker_type: TrackerType) -> Self {
        Self {
            tracker_type,
            stats: Stats::default(),
            object_reports: Vec::new(),
        }
    }
}

/// Per-type results of a bundle commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistenceReport {
    pub type_reports: BTreeMap<TrackerType, TypeReport>,
    /// Objects skipped during commit
    pub rejections: Vec<Rejection>,
}

impl Default for PersistenceReport {
    fn default() -> Self {
        Self::empty()
    }
}

impl PersistenceReport {
    /// A report with a zeroed entry for every tracker type
    pub fn empty() -> Self {
        Self {
            type_reports: TrackerType::COMMIT_ORDER
                .into_iter()
                .map(|t| (t, TypeReport::new(t)))
                .collect(),
            rejections: Vec::new(),
        }
    }

    pub fn type_report(&self, tracker_type: TrackerType) -> Option<&TypeReport> {
        self.type_reports.get(&tracker_type)
    }

    pub fn stats(&self, tracker_type: TrackerType) -> Stats {
        self.type_report(tracker_type).map(|r| r.stats).unwrap_or_default()
    }

    pub fn type_report_mut(&mut self, tracker_type: TrackerType) -> &mut TypeReport {
        self.type_reports
            .entry(tracker_type)
            .or_insert_with(|| TypeReport::new(tracker_type))
    }

    pub fn insert(&mut self, report: TypeReport) {
        self.type_reports.insert(report.tracker_type, report);
    }

    /// Sum over all tracker types
    pub fn total(&self) -> Stats {
        let mut total = Stats::default();
        for report in self.type_reports.values() {
            total += report.stats;
        }
        total
    }

    pub fn is_empty(&self) -> bool {
        self.total().total() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImportStatus {
    Ok,
    /// Committed, but some objects were rejected
    Warning,
    Error,
}

/// Wall-clock time per pipeline phase
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timings {
    pub preheat_ms: u64,
    pub validation_ms: u64,
    pub commit_ms: u64,
}

/// Structured outcome of an import
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub import_id: Uuid,
    pub status: ImportStatus,
    pub stats: Stats,
    pub persistence_report: PersistenceReport,
    /// Validation and commit rejections
    pub rejections: Vec<Rejection>,
    pub timings: Timings,
    /// Fatal error message when status is ERROR
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
