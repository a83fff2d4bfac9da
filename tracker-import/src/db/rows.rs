//! Row mapping between tracker tables and records

use crate::models::{
    AuditFields, EnrollmentRecord, EnrollmentStatus, EventRecord, EventStatus, Metadata, ProgramOwner,
    RelationshipRecord, TrackedEntityRecord, TrackerType, User,
};
use crate::store::Write;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use tracker_common::{Error, Result};

pub(crate) const TRACKED_ENTITY_COLUMNS: &str = "uid, tracked_entity_type_id, org_unit_id, inactive, deleted, attributes, \
     created, created_at_client, last_updated, last_updated_at_client, created_by, last_updated_by";

pub(crate) const ENROLLMENT_COLUMNS: &str = "uid, tracked_entity, program_id, org_unit_id, status, enrolled_at, occurred_at, \
     deleted, created, created_at_client, last_updated, last_updated_at_client, created_by, last_updated_by";

pub(crate) const EVENT_COLUMNS: &str = "uid, enrollment, program_id, program_stage_id, org_unit_id, attribute_option_combo_id, \
     status, occurred_at, scheduled_at, assigned_user_id, data_values, deleted, \
     created, created_at_client, last_updated, last_updated_at_client, created_by, last_updated_by";

pub(crate) const RELATIONSHIP_COLUMNS: &str = "uid, relationship_type_id, relationship_type, bidirectional, from_item, to_item, \
     key, inverted_key, deleted, \
     created, created_at_client, last_updated, last_updated_at_client, created_by, last_updated_by";

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Invalid timestamp '{}': {}", value, e)))
}

fn parse_optional_time(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.as_deref().map(parse_time).transpose()
}

fn audit_from_row(row: &SqliteRow) -> Result<AuditFields> {
    let created: String = row.get("created");
    let last_updated: String = row.get("last_updated");
    Ok(AuditFields {
        created: parse_time(&created)?,
        created_at_client: parse_optional_time(row.get("created_at_client"))?,
        last_updated: parse_time(&last_updated)?,
        last_updated_at_client: parse_optional_time(row.get("last_updated_at_client"))?,
        created_by: row.get("created_by"),
        last_updated_by: row.get("last_updated_by"),
    })
}

pub(crate) fn metadata_from_row(row: &SqliteRow) -> Result<Metadata> {
    let body: String = row.get("body");
    Ok(serde_json::from_str(&body)?)
}

pub(crate) fn user_from_row(row: &SqliteRow) -> User {
    User {
        id: row.get("id"),
        uid: row.get("uid"),
        username: row.get("username"),
    }
}

pub(crate) fn tracked_entity_from_row(row: &SqliteRow) -> Result<TrackedEntityRecord> {
    let attributes: String = row.get("attributes");
    Ok(TrackedEntityRecord {
        uid: row.get("uid"),
        tracked_entity_type_id: row.get("tracked_entity_type_id"),
        org_unit_id: row.get("org_unit_id"),
        inactive: row.get("inactive"),
        deleted: row.get("deleted"),
        attributes: serde_json::from_str(&attributes)?,
        audit: audit_from_row(row)?,
    })
}

pub(crate) fn enrollment_from_row(row: &SqliteRow) -> Result<EnrollmentRecord> {
    let status: String = row.get("status");
    Ok(EnrollmentRecord {
        uid: row.get("uid"),
        tracked_entity: row.get("tracked_entity"),
        program_id: row.get("program_id"),
        org_unit_id: row.get("org_unit_id"),
        status: status.parse::<EnrollmentStatus>().map_err(Error::Internal)?,
        enrolled_at: parse_optional_time(row.get("enrolled_at"))?,
        occurred_at: parse_optional_time(row.get("occurred_at"))?,
        deleted: row.get("deleted"),
        audit: audit_from_row(row)?,
    })
}

pub(crate) fn event_from_row(row: &SqliteRow) -> Result<EventRecord> {
    let status: String = row.get("status");
    let data_values: String = row.get("data_values");
    Ok(EventRecord {
        uid: row.get("uid"),
        enrollment: row.get("enrollment"),
        program_id: row.get("program_id"),
        program_stage_id: row.get("program_stage_id"),
        org_unit_id: row.get("org_unit_id"),
        attribute_option_combo_id: row.get("attribute_option_combo_id"),
        status: status.parse::<EventStatus>().map_err(Error::Internal)?,
        occurred_at: parse_optional_time(row.get("occurred_at"))?,
        scheduled_at: parse_optional_time(row.get("scheduled_at"))?,
        assigned_user_id: row.get("assigned_user_id"),
        data_values: serde_json::from_str(&data_values)?,
        deleted: row.get("deleted"),
        audit: audit_from_row(row)?,
    })
}

pub(crate) fn relationship_from_row(row: &SqliteRow) -> Result<RelationshipRecord> {
    let from: String = row.get("from_item");
    let to: String = row.get("to_item");
    Ok(RelationshipRecord {
        uid: row.get("uid"),
        relationship_type_id: row.get("relationship_type_id"),
        relationship_type: row.get("relationship_type"),
        bidirectional: row.get("bidirectional"),
        from: serde_json::from_str(&from)?,
        to: serde_json::from_str(&to)?,
        key: row.get("key"),
        inverted_key: row.get("inverted_key"),
        deleted: row.get("deleted"),
        audit: audit_from_row(row)?,
    })
}

pub(crate) fn program_owner_from_row(row: &SqliteRow) -> ProgramOwner {
    ProgramOwner {
        tracked_entity: row.get("tracked_entity"),
        program: row.get("program"),
        org_unit: row.get("org_unit"),
    }
}

fn table_of(tracker_type: TrackerType) -> &'static str {
    match tracker_type {
        TrackerType::TrackedEntity => "tracked_entities",
        TrackerType::Enrollment => "enrollments",
        TrackerType::Event => "events",
        TrackerType::Relationship => "relationships",
    }
}

/// Execute one buffered write on the transaction connection
pub(crate) async fn execute_write(conn: &mut SqliteConnection, write: &Write) -> Result<()> {
    match write {
        Write::TrackedEntity(r) => {
            sqlx::query(
                r#"
                INSERT INTO tracked_entities (
                    uid, tracked_entity_type_id, org_unit_id, inactive, deleted, attributes,
                    created, created_at_client, last_updated, last_updated_at_client, created_by, last_updated_by
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(uid) DO UPDATE SET
                    tracked_entity_type_id = excluded.tracked_entity_type_id,
                    org_unit_id = excluded.org_unit_id,
                    inactive = excluded.inactive,
                    deleted = excluded.deleted,
                    attributes = excluded.attributes,
                    last_updated = excluded.last_updated,
                    last_updated_at_client = excluded.last_updated_at_client,
                    last_updated_by = excluded.last_updated_by
                "#,
            )
            .bind(&r.uid)
            .bind(r.tracked_entity_type_id)
            .bind(r.org_unit_id)
            .bind(r.inactive)
            .bind(r.deleted)
            .bind(serde_json::to_string(&r.attributes)?)
            .bind(r.audit.created.to_rfc3339())
            .bind(r.audit.created_at_client.map(|t| t.to_rfc3339()))
            .bind(r.audit.last_updated.to_rfc3339())
            .bind(r.audit.last_updated_at_client.map(|t| t.to_rfc3339()))
            .bind(&r.audit.created_by)
            .bind(&r.audit.last_updated_by)
            .execute(&mut *conn)
            .await?;
        }
        Write::Enrollment(r) => {
            sqlx::query(
                r#"
                INSERT INTO enrollments (
                    uid, tracked_entity, program_id, org_unit_id, status, enrolled_at, occurred_at, deleted,
                    created, created_at_client, last_updated, last_updated_at_client, created_by, last_updated_by
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(uid) DO UPDATE SET
                    tracked_entity = excluded.tracked_entity,
                    program_id = excluded.program_id,
                    org_unit_id = excluded.org_unit_id,
                    status = excluded.status,
                    enrolled_at = excluded.enrolled_at,
                    occurred_at = excluded.occurred_at,
                    deleted = excluded.deleted,
                    last_updated = excluded.last_updated,
                    last_updated_at_client = excluded.last_updated_at_client,
                    last_updated_by = excluded.last_updated_by
                "#,
            )
            .bind(&r.uid)
            .bind(&r.tracked_entity)
            .bind(r.program_id)
            .bind(r.org_unit_id)
            .bind(r.status.as_str())
            .bind(r.enrolled_at.map(|t| t.to_rfc3339()))
            .bind(r.occurred_at.map(|t| t.to_rfc3339()))
            .bind(r.deleted)
            .bind(r.audit.created.to_rfc3339())
            .bind(r.audit.created_at_client.map(|t| t.to_rfc3339()))
            .bind(r.audit.last_updated.to_rfc3339())
            .bind(r.audit.last_updated_at_client.map(|t| t.to_rfc3339()))
            .bind(&r.audit.created_by)
            .bind(&r.audit.last_updated_by)
            .execute(&mut *conn)
            .await?;
        }
        Write::Event(r) => {
            sqlx::query(
                r#"
                INSERT INTO events (
                    uid, enrollment, program_id, program_stage_id, org_unit_id, attribute_option_combo_id,
                    status, occurred_at, scheduled_at, assigned_user_id, data_values, deleted,
                    created, created_at_client, last_updated, last_updated_at_client, created_by, last_updated_by
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(uid) DO UPDATE SET
                    enrollment = excluded.enrollment,
                    program_id = excluded.program_id,
                    program_stage_id = excluded.program_stage_id,
                    org_unit_id = excluded.org_unit_id,
                    attribute_option_combo_id = excluded.attribute_option_combo_id,
                    status = excluded.status,
                    occurred_at = excluded.occurred_at,
                    scheduled_at = excluded.scheduled_at,
                    assigned_user_id = excluded.assigned_user_id,
                    data_values = excluded.data_values,
                    deleted = excluded.deleted,
                    last_updated = excluded.last_updated,
                    last_updated_at_client = excluded.last_updated_at_client,
                    last_updated_by = excluded.last_updated_by
                "#,
            )
            .bind(&r.uid)
            .bind(&r.enrollment)
            .bind(r.program_id)
            .bind(r.program_stage_id)
            .bind(r.org_unit_id)
            .bind(r.attribute_option_combo_id)
            .bind(r.status.as_str())
            .bind(r.occurred_at.map(|t| t.to_rfc3339()))
            .bind(r.scheduled_at.map(|t| t.to_rfc3339()))
            .bind(r.assigned_user_id)
            .bind(serde_json::to_string(&r.data_values)?)
            .bind(r.deleted)
            .bind(r.audit.created.to_rfc3339())
            .bind(r.audit.created_at_client.map(|t| t.to_rfc3339()))
            .bind(r.audit.last_updated.to_rfc3339())
            .bind(r.audit.last_updated_at_client.map(|t| t.to_rfc3339()))
            .bind(&r.audit.created_by)
            .bind(&r.audit.last_updated_by)
            .execute(&mut *conn)
            .await?;
        }
        Write::Relationship(r) => {
            sqlx::query(
                r#"
                INSERT INTO relationships (
                    uid, relationship_type_id, relationship_type, bidirectional, from_item, to_item,
                    key, inverted_key, deleted,
                    created, created_at_client, last_updated, last_updated_at_client, created_by, last_updated_by
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(uid) DO UPDATE SET
                    deleted = excluded.deleted,
                    last_updated = excluded.last_updated,
                    last_updated_at_client = excluded.last_updated_at_client,
                    last_updated_by = excluded.last_updated_by
                "#,
            )
            .bind(&r.uid)
            .bind(r.relationship_type_id)
            .bind(&r.relationship_type)
            .bind(r.bidirectional)
            .bind(serde_json::to_string(&r.from)?)
            .bind(serde_json::to_string(&r.to)?)
            .bind(&r.key)
            .bind(&r.inverted_key)
            .bind(r.deleted)
            .bind(r.audit.created.to_rfc3339())
            .bind(r.audit.created_at_client.map(|t| t.to_rfc3339()))
            .bind(r.audit.last_updated.to_rfc3339())
            .bind(r.audit.last_updated_at_client.map(|t| t.to_rfc3339()))
            .bind(&r.audit.created_by)
            .bind(&r.audit.last_updated_by)
            .execute(&mut *conn)
            .await?;
        }
        Write::ProgramOwner(o) => {
            sqlx::query(
                r#"
                INSERT INTO program_owners (tracked_entity, program, org_unit)
                VALUES (?, ?, ?)
                ON CONFLICT(tracked_entity, program) DO NOTHING
                "#,
            )
            .bind(&o.tracked_entity)
            .bind(&o.program)
            .bind(&o.org_unit)
            .execute(&mut *conn)
            .await?;
        }
        Write::Delete {
            tracker_type,
            uid,
            at,
            by,
        } => {
            let sql = format!(
                "UPDATE {} SET deleted = 1, last_updated = ?, last_updated_by = ? WHERE uid = ?",
                table_of(*tracker_type)
            );
            sqlx::query(&sql)
                .bind(at.to_rfc3339())
                .bind(by)
                .bind(uid)
                .execute(&mut *conn)
                .await?;
        }
        Write::TouchTrackedEntity { uid, at, by } => {
            sqlx::query("UPDATE tracked_entities SET last_updated = ?, last_updated_by = ? WHERE uid = ?")
                .bind(at.to_rfc3339())
                .bind(by)
                .bind(uid)
                .execute(&mut *conn)
                .await?;
        }
    }
    Ok(())
}
