//! Transport → storage conversion
//!
//! Every metadata reference is resolved through the preheat cache. Audit
//! stamps follow the per-object strategy: `created` and `createdAtClient` are
//! set only for objects being created, update stamps always.

use super::ObjectStrategy;
use crate::error::{ImportError, Result};
use crate::models::{
    AttributeValueRecord, AuditFields, CategoryOptionCombo, DataElement, DataValueRecord, Enrollment,
    EnrollmentRecord, Event, EventRecord, MetadataType, OrganisationUnit, Program, ProgramStage,
    Relationship, RelationshipRecord, RelationshipType, TrackedEntity, TrackedEntityAttribute,
    TrackedEntityRecord, TrackedEntityType, TrackerType,
};
use crate::preheat::{PreheatCache, RelationshipKey};
use crate::identifier::MetadataIdentifier;
use crate::models::MetadataObject;
use chrono::{DateTime, Utc};

/// Commit-wide stamping inputs
#[derive(Debug, Clone)]
pub struct AuditContext {
    pub now: DateTime<Utc>,
    /// Username of the importing user
    pub username: Option<String>,
}

impl AuditContext {
    pub fn new(username: Option<String>) -> Self {
        Self {
            now: Utc::now(),
            username,
        }
    }

    fn stamp(
        &self,
        strategy: ObjectStrategy,
        existing: Option<&AuditFields>,
        created_at_client: Option<DateTime<Utc>>,
        updated_at_client: Option<DateTime<Utc>>,
    ) -> AuditFields {
        let username = self.username.as_deref();
        match (strategy, existing) {
            (ObjectStrategy::Create, _) | (_, None) => AuditFields {
                last_updated_at_client: updated_at_client.or(created_at_client),
                ..AuditFields::created(self.now, created_at_client, username)
            },
            (_, Some(existing)) => existing.updated(self.now, updated_at_client, username),
        }
    }
}

fn metadata<'a, T: MetadataObject>(cache: &'a PreheatCache, id: &MetadataIdentifier) -> Result<&'a T> {
    cache
        .get_as::<T>(id)
        .ok_or_else(|| ImportError::unresolved_metadata(T::KIND, id))
}

pub fn convert_tracked_entity(
    te: &TrackedEntity,
    cache: &PreheatCache,
    strategy: ObjectStrategy,
    ctx: &AuditContext,
) -> Result<TrackedEntityRecord> {
    let tracked_entity_type = metadata::<TrackedEntityType>(cache, &te.tracked_entity_type)?;
    let org_unit = metadata::<OrganisationUnit>(cache, &te.org_unit)?;

    let attributes = te
        .attributes
        .iter()
        .map(|a| {
            metadata::<TrackedEntityAttribute>(cache, &a.attribute).map(|attribute| AttributeValueRecord {
                attribute_id: attribute.base.id,
                value: a.value.clone(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let existing = cache.tracked_entity(&te.tracked_entity);
    Ok(TrackedEntityRecord {
        uid: te.tracked_entity.clone(),
        tracked_entity_type_id: tracked_entity_type.base.id,
        org_unit_id: org_unit.base.id,
        inactive: te.inactive,
        deleted: false,
        attributes,
        audit: ctx.stamp(
            strategy,
            existing.map(|r| &r.audit),
            te.created_at_client,
            te.updated_at_client,
        ),
    })
}

pub fn convert_enrollment(
    en: &Enrollment,
    cache: &PreheatCache,
    strategy: ObjectStrategy,
    ctx: &AuditContext,
) -> Result<EnrollmentRecord> {
    if cache.tracked_entity(&en.tracked_entity).is_none() {
        return Err(ImportError::unresolved_tracker(TrackerType::TrackedEntity, &en.tracked_entity));
    }
    let program = metadata::<Program>(cache, &en.program)?;
    let org_unit = metadata::<OrganisationUnit>(cache, &en.org_unit)?;

    let existing = cache.enrollment(&en.enrollment);
    Ok(EnrollmentRecord {
        uid: en.enrollment.clone(),
        tracked_entity: en.tracked_entity.clone(),
        program_id: program.base.id,
        org_unit_id: org_unit.base.id,
        status: en.status,
        enrolled_at: en.enrolled_at,
        occurred_at: en.occurred_at,
        deleted: false,
        audit: ctx.stamp(
            strategy,
            existing.map(|r| &r.audit),
            en.created_at_client,
            en.updated_at_client,
        ),
    })
}

/// Convert an event whose attribute option combo is already resolved
pub fn convert_event(
    ev: &Event,
    cache: &PreheatCache,
    attribute_option_combo: &CategoryOptionCombo,
    strategy: ObjectStrategy,
    ctx: &AuditContext,
) -> Result<EventRecord> {
    let program_stage = metadata::<ProgramStage>(cache, &ev.program_stage)?;
    let program = cache.program_of_event(ev).ok_or_else(|| {
        ImportError::unresolved_metadata(
            MetadataType::Program,
            ev.program.as_ref().unwrap_or(&ev.program_stage),
        )
    })?;
    let org_unit = metadata::<OrganisationUnit>(cache, &ev.org_unit)?;

    let enrollment = match &ev.enrollment {
        Some(uid) => {
            if cache.enrollment(uid).is_none() {
                return Err(ImportError::unresolved_tracker(TrackerType::Enrollment, uid));
            }
            Some(uid.clone())
        }
        None if program.registration => {
            return Err(ImportError::UnresolvedReference {
                kind: TrackerType::Enrollment.to_string(),
                identifier: format!("event {} in program {} has no enrollment", ev.event, program.base.uid),
            });
        }
        None => {
            let enrollment = cache
                .enrollment_without_registration(&program.base.uid)
                .ok_or_else(|| ImportError::UnresolvedReference {
                    kind: TrackerType::Enrollment.to_string(),
                    identifier: format!("program {} has no enrollment", program.base.uid),
                })?;
            Some(enrollment.uid.clone())
        }
    };

    let assigned_user_id = match &ev.assigned_user {
        Some(username) => Some(
            cache
                .user(username)
                .ok_or_else(|| ImportError::UnresolvedReference {
                    kind: "USER".to_string(),
                    identifier: username.clone(),
                })?
                .id,
        ),
        None => None,
    };

    let data_values = ev
        .data_values
        .iter()
        .map(|dv| {
            metadata::<DataElement>(cache, &dv.data_element).map(|element| DataValueRecord {
                data_element_id: element.base.id,
                value: dv.value.clone(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let existing = cache.event(&ev.event);
    Ok(EventRecord {
        uid: ev.event.clone(),
        enrollment,
        program_id: program.base.id,
        program_stage_id: program_stage.base.id,
        org_unit_id: org_unit.base.id,
        attribute_option_combo_id: attribute_option_combo.base.id,
        status: ev.status,
        occurred_at: ev.occurred_at,
        scheduled_at: ev.scheduled_at,
        assigned_user_id,
        data_values,
        deleted: false,
        audit: ctx.stamp(
            strategy,
            existing.map(|r| &r.audit),
            ev.created_at_client,
            ev.updated_at_client,
        ),
    })
}

pub fn convert_relationship(
    rel: &Relationship,
    cache: &PreheatCache,
    strategy: ObjectStrategy,
    ctx: &AuditContext,
) -> Result<RelationshipRecord> {
    let relationship_type = metadata::<RelationshipType>(cache, &rel.relationship_type)?;
    for item in [&rel.from, &rel.to] {
        if !cache.exists(item.tracker_type(), item.uid()) {
            return Err(ImportError::unresolved_tracker(item.tracker_type(), item.uid()));
        }
    }

    let key = RelationshipKey::new(relationship_type.base.uid.clone(), &rel.from, &rel.to);
    Ok(RelationshipRecord {
        uid: rel.relationship.clone(),
        relationship_type_id: relationship_type.base.id,
        relationship_type: relationship_type.base.uid.clone(),
        bidirectional: relationship_type.bidirectional,
        from: rel.from.clone(),
        to: rel.to.clone(),
        key: key.as_string(),
        inverted_key: key.inverse().as_string(),
        deleted: false,
        audit: ctx.stamp(strategy, None, rel.created_at_client, None),
    })
}
