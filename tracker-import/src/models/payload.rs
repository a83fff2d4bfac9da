//! Transport representation of tracker objects
//!
//! Objects arrive deserialized and reference metadata through
//! [`MetadataIdentifier`]s. Tracker-to-tracker references (an enrollment's
//! tracked entity, an event's enrollment) are plain UIDs.

use crate::identifier::MetadataIdentifier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// The four tracker object types, in commit order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrackerType {
    TrackedEntity,
    Enrollment,
    Event,
    Relationship,
}

impl TrackerType {
    /// Commit order: dependencies before dependents
    pub const COMMIT_ORDER: [TrackerType; 4] = [
        TrackerType::TrackedEntity,
        TrackerType::Enrollment,
        TrackerType::Event,
        TrackerType::Relationship,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TrackerType::TrackedEntity => "TRACKED_ENTITY",
            TrackerType::Enrollment => "ENROLLMENT",
            TrackerType::Event => "EVENT",
            TrackerType::Relationship => "RELATIONSHIP",
        }
    }
}

impl fmt::Display for TrackerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attribute {
    pub attribute: MetadataIdentifier,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedEntity {
    /// UID
    pub tracked_entity: String,
    pub tracked_entity_type: MetadataIdentifier,
    pub org_unit: MetadataIdentifier,
    #[serde(default)]
    pub inactive: bool,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
    #[serde(default)]
    pub created_at_client: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at_client: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnrollmentStatus {
    #[default]
    Active,
    Completed,
    Cancelled,
}

impl EnrollmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrollmentStatus::Active => "ACTIVE",
            EnrollmentStatus::Completed => "COMPLETED",
            EnrollmentStatus::Cancelled => "CANCELLED",
        }
    }
}

impl FromStr for EnrollmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(EnrollmentStatus::Active),
            "COMPLETED" => Ok(EnrollmentStatus::Completed),
            "CANCELLED" => Ok(EnrollmentStatus::Cancelled),
            other => Err(format!("unknown enrollment status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Enrollment {
    /// UID
    pub enrollment: String,
    /// UID of the enrolled tracked entity
    pub tracked_entity: String,
    pub program: MetadataIdentifier,
    pub org_unit: MetadataIdentifier,
    #[serde(default)]
    pub status: EnrollmentStatus,
    #[serde(default)]
    pub enrolled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub occurred_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_at_client: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at_client: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    #[default]
    Active,
    Completed,
    Scheduled,
    Skipped,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Active => "ACTIVE",
            EventStatus::Completed => "COMPLETED",
            EventStatus::Scheduled => "SCHEDULED",
            EventStatus::Skipped => "SKIPPED",
        }
    }
}

impl FromStr for EventStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(EventStatus::Active),
            "COMPLETED" => Ok(EventStatus::Completed),
            "SCHEDULED" => Ok(EventStatus::Scheduled),
            "SKIPPED" => Ok(EventStatus::Skipped),
            other => Err(format!("unknown event status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataValue {
    pub data_element: MetadataIdentifier,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// UID
    pub event: String,
    /// Absent for events in programs without registration
    #[serde(default)]
    pub enrollment: Option<String>,
    /// Derived from the program stage when absent
    #[serde(default)]
    pub program: Option<MetadataIdentifier>,
    pub program_stage: MetadataIdentifier,
    pub org_unit: MetadataIdentifier,
    #[serde(default)]
    pub status: EventStatus,
    #[serde(default)]
    pub occurred_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Explicit attribute option combo; takes precedence over the options
    #[serde(default)]
    pub attribute_option_combo: Option<MetadataIdentifier>,
    /// Category options to resolve an attribute option combo from
    #[serde(default)]
    pub attribute_category_options: BTreeSet<MetadataIdentifier>,
    /// Username of the assigned user
    #[serde(default)]
    pub assigned_user: Option<String>,
    #[serde(default)]
    pub data_values: Vec<DataValue>,
    #[serde(default)]
    pub created_at_client: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at_client: Option<DateTime<Utc>>,
}

/// One end of a relationship
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelationshipItem {
    TrackedEntity(String),
    Enrollment(String),
    Event(String),
}

impl RelationshipItem {
    pub fn tracker_type(&self) -> TrackerType {
        match self {
            RelationshipItem::TrackedEntity(_) => TrackerType::TrackedEntity,
            RelationshipItem::Enrollment(_) => TrackerType::Enrollment,
            RelationshipItem::Event(_) => TrackerType::Event,
        }
    }

    pub fn uid(&self) -> &str {
        match self {
            RelationshipItem::TrackedEntity(uid)
            | RelationshipItem::Enrollment(uid)
            | RelationshipItem::Event(uid) => uid,
        }
    }

    /// UID of the tracked entity, if this end is one
    pub fn tracked_entity(&self) -> Option<&str> {
        match self {
            RelationshipItem::TrackedEntity(uid) => Some(uid),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    /// UID
    pub relationship: String,
    pub relationship_type: MetadataIdentifier,
    pub from: RelationshipItem,
    pub to: RelationshipItem,
    #[serde(default)]
    pub created_at_client: Option<DateTime<Utc>>,
}

/// A batch of tracker objects submitted for import
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TrackerPayload {
    pub tracked_entities: Vec<TrackedEntity>,
    pub enrollments: Vec<Enrollment>,
    pub events: Vec<Event>,
    pub relationships: Vec<Relationship>,
}

impl TrackerPayload {
    pub fn is_empty(&self) -> bool {
        self.tracked_entities.is_empty()
            && self.enrollments.is_empty()
            && self.events.is_empty()
            && self.relationships.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tracked_entities.len() + self.enrollments.len() + self.events.len() + self.relationships.len()
    }

    /// UIDs of the objects of one type, in payload order
    pub fn uids(&self, tracker_type: TrackerType) -> Vec<&str> {
        match tracker_type {
            TrackerType::TrackedEntity => self.tracked_entities.iter().map(|o| o.tracked_entity.as_str()).collect(),
            TrackerType::Enrollment => self.enrollments.iter().map(|o| o.enrollment.as_str()).collect(),
            TrackerType::Event => self.events.iter().map(|o| o.event.as_str()).collect(),
            TrackerType::Relationship => self.relationships.iter().map(|o| o.relationship.as_str()).collect(),
        }
    }

    pub fn contains(&self, tracker_type: TrackerType, uid: &str) -> bool {
        self.uids(tracker_type).contains(&uid)
    }
}

/// A borrowed tracker object of any type
#[derive(Debug, Clone, Copy)]
pub enum TrackerObject<'a> {
    TrackedEntity(&'a TrackedEntity),
    Enrollment(&'a Enrollment),
    Event(&'a Event),
    Relationship(&'a Relationship),
}

impl TrackerObject<'_> {
    pub fn tracker_type(&self) -> TrackerType {
        match self {
            TrackerObject::TrackedEntity(_) => TrackerType::TrackedEntity,
            TrackerObject::Enrollment(_) => TrackerType::Enrollment,
            TrackerObject::Event(_) => TrackerType::Event,
            TrackerObject::Relationship(_) => TrackerType::Relationship,
        }
    }

    pub fn uid(&self) -> &str {
        match self {
            TrackerObject::TrackedEntity(o) => &o.tracked_entity,
            TrackerObject::Enrollment(o) => &o.enrollment,
            TrackerObject::Event(o) => &o.event,
            TrackerObject::Relationship(o) => &o.relationship,
        }
    }
}
