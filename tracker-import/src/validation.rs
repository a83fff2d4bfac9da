//! Bundle validation
//!
//! Validators run after preheat and before commit, against the cache only.
//! Under atomic mode ALL any failure stops the commit; under OBJECT the
//! failed objects, and everything depending on them, are removed from the
//! payload.

use crate::bundle::TrackerBundle;
use crate::identifier::{resolve, MetadataIdentifier};
use crate::models::{
    CategoryOptionCombo, DataElement, Enrollment, Event, FailureKind, MetadataObject,
    OrganisationUnit, Program, ProgramStage, Rejection, Relationship, RelationshipType,
    TrackedEntity, TrackedEntityAttribute, TrackedEntityType, TrackerType,
};
use crate::preheat::suppliers::category_combo_of_event;
use crate::preheat::{PreheatCache, RelationshipKey};
use std::collections::HashSet;
use tracker_common::uid;

pub trait Validator: Send + Sync {
    fn name(&self) -> &'static str;

    fn validate(&self, bundle: &TrackerBundle) -> Vec<Rejection>;
}

type Failure = (FailureKind, String);

fn check_uid(tracker_type: TrackerType, value: &str) -> Option<Failure> {
    if uid::is_valid(value) {
        None
    } else {
        Some((
            FailureKind::InvalidIdentifier,
            format!("{} uid '{}' is not a valid uid", tracker_type, value),
        ))
    }
}

fn check_metadata<T: MetadataObject>(cache: &PreheatCache, id: &MetadataIdentifier) -> Option<Failure> {
    if let Err(e) = resolve(id, T::KIND) {
        return Some((FailureKind::InvalidIdentifier, e.to_string()));
    }
    if cache.get_as::<T>(id).is_none() {
        return Some((
            FailureKind::UnresolvedReference,
            format!("{} {} not found", T::KIND, id),
        ));
    }
    None
}

/// Every reference in the payload resolves, and no relationship duplicates a stored one
pub struct ReferenceValidator;

impl ReferenceValidator {
    fn in_payload_or_store(&self, bundle: &TrackerBundle, tracker_type: TrackerType, uid: &str) -> bool {
        bundle.preheat.exists(tracker_type, uid) || bundle.payload.contains(tracker_type, uid)
    }

    fn tracked_entity(&self, bundle: &TrackerBundle, te: &TrackedEntity) -> Option<Failure> {
        let cache = &bundle.preheat;
        check_metadata::<TrackedEntityType>(cache, &te.tracked_entity_type)
            .or_else(|| check_metadata::<OrganisationUnit>(cache, &te.org_unit))
            .or_else(|| {
                te.attributes
                    .iter()
                    .find_map(|a| check_metadata::<TrackedEntityAttribute>(cache, &a.attribute))
            })
    }

    fn enrollment(&self, bundle: &TrackerBundle, en: &Enrollment) -> Option<Failure> {
        let cache = &bundle.preheat;
        if !self.in_payload_or_store(bundle, TrackerType::TrackedEntity, &en.tracked_entity) {
            return Some((
                FailureKind::UnresolvedReference,
                format!("tracked entity {} not found", en.tracked_entity),
            ));
        }
        check_metadata::<Program>(cache, &en.program).or_else(|| check_metadata::<OrganisationUnit>(cache, &en.org_unit))
    }

    fn event(&self, bundle: &TrackerBundle, ev: &Event) -> Option<Failure> {
        let cache = &bundle.preheat;
        if let Some(failure) = check_metadata::<ProgramStage>(cache, &ev.program_stage)
            .or_else(|| ev.program.as_ref().and_then(|p| check_metadata::<Program>(cache, p)))
            .or_else(|| check_metadata::<OrganisationUnit>(cache, &ev.org_unit))
        {
            return Some(failure);
        }
        let Some(program) = cache.program_of_event(ev) else {
            return Some((
                FailureKind::UnresolvedReference,
                format!("program of stage {} not found", ev.program_stage),
            ));
        };

        match &ev.enrollment {
            Some(uid) if !self.in_payload_or_store(bundle, TrackerType::Enrollment, uid) => {
                return Some((FailureKind::UnresolvedReference, format!("enrollment {} not found", uid)));
            }
            Some(_) => {}
            None if program.registration => {
                return Some((
                    FailureKind::UnresolvedReference,
                    format!("program {} requires an enrollment", program.base.uid),
                ));
            }
            None if cache.enrollment_without_registration(&program.base.uid).is_none() => {
                return Some((
                    FailureKind::UnresolvedReference,
                    format!("program {} has no enrollment", program.base.uid),
                ));
            }
            None => {}
        }

        if let Some(aoc) = &ev.attribute_option_combo {
            if let Some(failure) = check_metadata::<CategoryOptionCombo>(cache, aoc) {
                return Some(failure);
            }
        } else if !ev.attribute_category_options.is_empty() {
            let resolved = category_combo_of_event(cache, ev)
                .and_then(|combo| cache.cached_category_option_combo(&combo, &ev.attribute_category_options));
            if resolved.is_none() {
                return Some((
                    FailureKind::UnresolvedReference,
                    format!("no attribute option combo for the category options of event {}", ev.event),
                ));
            }
        } else if cache.default_of::<CategoryOptionCombo>().is_none() {
            return Some((
                FailureKind::UnresolvedReference,
                "default attribute option combo not found".to_string(),
            ));
        }

        if let Some(username) = &ev.assigned_user {
            if cache.user(username).is_none() {
                return Some((FailureKind::UnresolvedReference, format!("user {} not found", username)));
            }
        }

        ev.data_values
            .iter()
            .find_map(|dv| check_metadata::<DataElement>(cache, &dv.data_element))
    }

    fn relationship(&self, bundle: &TrackerBundle, rel: &Relationship) -> Option<Failure> {
        let cache = &bundle.preheat;
        if let Some(failure) = check_metadata::<RelationshipType>(cache, &rel.relationship_type) {
            return Some(failure);
        }
        for item in [&rel.from, &rel.to] {
            if !self.in_payload_or_store(bundle, item.tracker_type(), item.uid()) {
                return Some((
                    FailureKind::UnresolvedReference,
                    format!("{} {} not found", item.tracker_type(), item.uid()),
                ));
            }
        }
        // Re-imports of a stored relationship are rejected as not updatable at commit
        if cache.exists(TrackerType::Relationship, &rel.relationship) {
            return None;
        }
        let relationship_type = cache.get_as::<RelationshipType>(&rel.relationship_type)?;
        let key = RelationshipKey::new(relationship_type.base.uid.clone(), &rel.from, &rel.to);
        if cache.is_duplicate_relationship(&key, relationship_type.bidirectional) {
            return Some((
                FailureKind::DuplicateRelationship,
                format!("relationship {} already exists", key),
            ));
        }
        None
    }
}

impl Validator for ReferenceValidator {
    fn name(&self) -> &'static str {
        "references"
    }

    fn validate(&self, bundle: &TrackerBundle) -> Vec<Rejection> {
        let payload = &bundle.payload;
        let mut failures = Vec::new();
        let mut reject = |tracker_type: TrackerType, current: usize, uid: &str, failure: Option<Failure>| {
            if let Some((kind, message)) = failure {
                failures.push(Rejection {
                    tracker_type,
                    uid: uid.to_string(),
                    index: bundle.position(tracker_type, current),
                    kind,
                    message,
                });
            }
        };

        for (i, te) in payload.tracked_entities.iter().enumerate() {
            let failure = check_uid(TrackerType::TrackedEntity, &te.tracked_entity)
                .or_else(|| self.tracked_entity(bundle, te));
            reject(TrackerType::TrackedEntity, i, &te.tracked_entity, failure);
        }
        for (i, en) in payload.enrollments.iter().enumerate() {
            let failure = check_uid(TrackerType::Enrollment, &en.enrollment).or_else(|| self.enrollment(bundle, en));
            reject(TrackerType::Enrollment, i, &en.enrollment, failure);
        }
        for (i, ev) in payload.events.iter().enumerate() {
            let failure = check_uid(TrackerType::Event, &ev.event).or_else(|| self.event(bundle, ev));
            reject(TrackerType::Event, i, &ev.event, failure);
        }
        for (i, rel) in payload.relationships.iter().enumerate() {
            let failure =
                check_uid(TrackerType::Relationship, &rel.relationship).or_else(|| self.relationship(bundle, rel));
            reject(TrackerType::Relationship, i, &rel.relationship, failure);
        }
        failures
    }
}

/// Remove failed objects and their dependents from the bundle payload
///
/// Enrollments of a failed tracked entity, events of a failed enrollment and
/// relationships with a failed end go too. Returns a DependencyFailed
/// rejection for every dependent removed.
pub fn remove_failed(bundle: &mut TrackerBundle, failures: &[Rejection]) -> Vec<Rejection> {
    let mut removed: HashSet<(TrackerType, String)> = failures
        .iter()
        .map(|f| (f.tracker_type, f.uid.clone()))
        .collect();
    let mut cascaded = Vec::new();

    {
        let bundle = &*bundle;
        let payload = &bundle.payload;
        let mut cascade =
            |removed: &mut HashSet<(TrackerType, String)>, tracker_type: TrackerType, current: usize, uid: &str, cause: String| {
                if removed.insert((tracker_type, uid.to_string())) {
                    cascaded.push(Rejection {
                        tracker_type,
                        uid: uid.to_string(),
                        index: bundle.position(tracker_type, current),
                        kind: FailureKind::DependencyFailed,
                        message: cause,
                    });
                }
            };
        let is_removed = |removed: &HashSet<(TrackerType, String)>, tracker_type: TrackerType, uid: &str| {
            removed.contains(&(tracker_type, uid.to_string()))
        };

        for (i, en) in payload.enrollments.iter().enumerate() {
            if is_removed(&removed, TrackerType::TrackedEntity, &en.tracked_entity) {
                let cause = format!("tracked entity {} failed", en.tracked_entity);
                cascade(&mut removed, TrackerType::Enrollment, i, &en.enrollment, cause);
            }
        }
        for (i, ev) in payload.events.iter().enumerate() {
            if let Some(enrollment) = &ev.enrollment {
                if is_removed(&removed, TrackerType::Enrollment, enrollment) {
                    let cause = format!("enrollment {} failed", enrollment);
                    cascade(&mut removed, TrackerType::Event, i, &ev.event, cause);
                }
            }
        }
        for (i, rel) in payload.relationships.iter().enumerate() {
            let failed_end = [&rel.from, &rel.to]
                .into_iter()
                .find(|item| is_removed(&removed, item.tracker_type(), item.uid()));
            if let Some(item) = failed_end {
                let cause = format!("{} {} failed", item.tracker_type(), item.uid());
                cascade(&mut removed, TrackerType::Relationship, i, &rel.relationship, cause);
            }
        }
    }

    for tracker_type in TrackerType::COMMIT_ORDER {
        let keep: Vec<bool> = bundle
            .payload
            .uids(tracker_type)
            .into_iter()
            .map(|uid| !removed.contains(&(tracker_type, uid.to_string())))
            .collect();
        bundle.retain(tracker_type, &keep);
    }

    cascaded
}
