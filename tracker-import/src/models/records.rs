//! Storage representation of tracker objects
//!
//! Metadata references are resolved to storage ids. Tracker references stay
//! UIDs so a record can point at objects persisted earlier in the same
//! transaction.

use super::payload::{EnrollmentStatus, EventStatus, RelationshipItem, TrackerType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Audit stamps carried by every record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditFields {
    pub created: DateTime<Utc>,
    pub created_at_client: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
    pub last_updated_at_client: Option<DateTime<Utc>>,
    /// Username
    pub created_by: Option<String>,
    /// Username
    pub last_updated_by: Option<String>,
}

impl AuditFields {
    /// Stamps for a freshly created record
    pub fn created(now: DateTime<Utc>, at_client: Option<DateTime<Utc>>, username: Option<&str>) -> Self {
        Self {
            created: now,
            created_at_client: at_client,
            last_updated: now,
            last_updated_at_client: at_client,
            created_by: username.map(str::to_string),
            last_updated_by: username.map(str::to_string),
        }
    }

    /// Keep the creation stamps of `self`, refresh the update stamps
    pub fn updated(&self, now: DateTime<Utc>, at_client: Option<DateTime<Utc>>, username: Option<&str>) -> Self {
        Self {
            created: self.created,
            created_at_client: self.created_at_client,
            last_updated: now,
            last_updated_at_client: at_client,
            created_by: self.created_by.clone(),
            last_updated_by: username.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeValueRecord {
    pub attribute_id: i64,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataValueRecord {
    pub data_element_id: i64,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackedEntityRecord {
    pub uid: String,
    pub tracked_entity_type_id: i64,
    pub org_unit_id: i64,
    pub inactive: bool,
    pub deleted: bool,
    pub attributes: Vec<AttributeValueRecord>,
    pub audit: AuditFields,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnrollmentRecord {
    pub uid: String,
    pub tracked_entity: String,
    pub program_id: i64,
    pub org_unit_id: i64,
    pub status: EnrollmentStatus,
    pub enrolled_at: Option<DateTime<Utc>>,
    pub occurred_at: Option<DateTime<Utc>>,
    pub deleted: bool,
    pub audit: AuditFields,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub uid: String,
    pub enrollment: Option<String>,
    pub program_id: i64,
    pub program_stage_id: i64,
    pub org_unit_id: i64,
    pub attribute_option_combo_id: i64,
    pub status: EventStatus,
    pub occurred_at: Option<DateTime<Utc>>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub assigned_user_id: Option<i64>,
    pub data_values: Vec<DataValueRecord>,
    pub deleted: bool,
    pub audit: AuditFields,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipRecord {
    pub uid: String,
    pub relationship_type_id: i64,
    pub relationship_type: String,
    pub bidirectional: bool,
    pub from: RelationshipItem,
    pub to: RelationshipItem,
    /// Duplicate-detection key, see [`crate::preheat::RelationshipKey`]
    pub key: String,
    pub inverted_key: String,
    pub deleted: bool,
    pub audit: AuditFields,
}

/// Owning org unit of a tracked entity within a program
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramOwner {
    pub tracked_entity: String,
    /// Program UID
    pub program: String,
    /// Org unit UID
    pub org_unit: String,
}

/// Any stored tracker record
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerRecord {
    TrackedEntity(TrackedEntityRecord),
    Enrollment(EnrollmentRecord),
    Event(EventRecord),
    Relationship(RelationshipRecord),
}

impl TrackerRecord {
    pub fn tracker_type(&self) -> TrackerType {
        match self {
            TrackerRecord::TrackedEntity(_) => TrackerType::TrackedEntity,
            TrackerRecord::Enrollment(_) => TrackerType::Enrollment,
            TrackerRecord::Event(_) => TrackerType::Event,
            TrackerRecord::Relationship(_) => TrackerType::Relationship,
        }
    }

    pub fn uid(&self) -> &str {
        match self {
            TrackerRecord::TrackedEntity(r) => &r.uid,
            TrackerRecord::Enrollment(r) => &r.uid,
            TrackerRecord::Event(r) => &r.uid,
            TrackerRecord::Relationship(r) => &r.uid,
        }
    }

    pub fn audit(&self) -> &AuditFields {
        match self {
            TrackerRecord::TrackedEntity(r) => &r.audit,
            TrackerRecord::Enrollment(r) => &r.audit,
            TrackerRecord::Event(r) => &r.audit,
            TrackerRecord::Relationship(r) => &r.audit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_updated_keeps_creation_stamps() {
        let t0 = Utc::now();
        let client = t0 - Duration::minutes(5);
        let created = AuditFields::created(t0, Some(client), Some("admin"));
        assert_eq!(created.created, created.last_updated);

        let t1 = t0 + Duration::seconds(30);
        let updated = created.updated(t1, None, Some("tracker"));
        assert_eq!(updated.created, t0);
        assert_eq!(updated.created_at_client, Some(client));
        assert_eq!(updated.created_by.as_deref(), Some("admin"));
        assert_eq!(updated.last_updated, t1);
        assert_eq!(updated.last_updated_at_client, None);
        assert_eq!(updated.last_updated_by.as_deref(), Some("tracker"));
    }
}
