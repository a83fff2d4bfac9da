//! Tracker object suppliers

use crate::error::Result;
use crate::models::{ImportParams, Program, RelationshipType, TrackerPayload, TrackerType};
use crate::preheat::{PreheatCache, PreheatSupplier, RelationshipKey};
use crate::store::TrackerStore;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// UIDs of one tracker type that the payload contains or points at
pub fn referenced_uids(tracker_type: TrackerType, payload: &TrackerPayload) -> Vec<String> {
    let mut uids: BTreeSet<&str> = payload.uids(tracker_type).into_iter().collect();
    match tracker_type {
        TrackerType::TrackedEntity => {
            uids.extend(payload.enrollments.iter().map(|en| en.tracked_entity.as_str()));
        }
        TrackerType::Enrollment => {
            uids.extend(payload.events.iter().filter_map(|ev| ev.enrollment.as_deref()));
        }
        TrackerType::Event | TrackerType::Relationship => {}
    }
    if tracker_type != TrackerType::Relationship {
        uids.extend(
            payload
                .relationships
                .iter()
                .flat_map(|r| [&r.from, &r.to])
                .filter(|item| item.tracker_type() == tracker_type)
                .map(|item| item.uid()),
        );
    }
    uids.into_iter().map(str::to_string).collect()
}

/// Loads stored objects of one tracker type, which makes `exists` answerable
pub struct TrackerObjectSupplier {
    tracker_type: TrackerType,
}

impl TrackerObjectSupplier {
    pub fn new(tracker_type: TrackerType) -> Self {
        Self { tracker_type }
    }
}

#[async_trait]
impl PreheatSupplier for TrackerObjectSupplier {
    fn name(&self) -> &'static str {
        match self.tracker_type {
            TrackerType::TrackedEntity => "tracked_entities",
            TrackerType::Enrollment => "enrollments",
            TrackerType::Event => "events",
            TrackerType::Relationship => "relationships",
        }
    }

    async fn add(
        &self,
        store: &dyn TrackerStore,
        _params: &ImportParams,
        payload: &TrackerPayload,
        cache: &mut PreheatCache,
    ) -> Result<()> {
        let uids = referenced_uids(self.tracker_type, payload);
        if uids.is_empty() {
            return Ok(());
        }

        let found = match self.tracker_type {
            TrackerType::TrackedEntity => {
                let records = store.find_tracked_entities(&uids).await?;
                let n = records.len();
                records.into_iter().for_each(|r| cache.put_tracked_entity(r));
                n
            }
            TrackerType::Enrollment => {
                let records = store.find_enrollments(&uids).await?;
                let n = records.len();
                records.into_iter().for_each(|r| cache.put_enrollment(r));
                n
            }
            TrackerType::Event => {
                let records = store.find_events(&uids).await?;
                let n = records.len();
                records.into_iter().for_each(|r| cache.put_event(r));
                n
            }
            TrackerType::Relationship => {
                let records = store.find_relationships(&uids).await?;
                let n = records.len();
                records.into_iter().for_each(|r| cache.put_relationship(r));
                n
            }
        };

        debug!(
            tracker_type = %self.tracker_type,
            requested = uids.len(),
            found,
            "Preheated tracker objects"
        );
        Ok(())
    }
}

/// Keys of stored relationships that payload relationships could duplicate
///
/// Needs relationship types in the cache.
pub struct ExistingRelationshipSupplier;

#[async_trait]
impl PreheatSupplier for ExistingRelationshipSupplier {
    fn name(&self) -> &'static str {
        "existing_relationships"
    }

    async fn add(
        &self,
        store: &dyn TrackerStore,
        _params: &ImportParams,
        payload: &TrackerPayload,
        cache: &mut PreheatCache,
    ) -> Result<()> {
        let mut keys = BTreeSet::new();
        for relationship in &payload.relationships {
            let Some(relationship_type) = cache.get_as::<RelationshipType>(&relationship.relationship_type) else {
                continue;
            };
            let key = RelationshipKey::new(relationship_type.base.uid.clone(), &relationship.from, &relationship.to);
            if relationship_type.bidirectional {
                keys.insert(key.inverse().as_string());
            }
            keys.insert(key.as_string());
        }
        if keys.is_empty() {
            return Ok(());
        }

        let keys: Vec<String> = keys.into_iter().collect();
        for record in store.find_relationships_by_keys(&keys).await? {
            if record.bidirectional {
                cache.add_existing_relationship(record.inverted_key);
            }
            cache.add_existing_relationship(record.key);
        }
        Ok(())
    }
}

/// Current owners of tracked entities in the payload
pub struct ProgramOwnerSupplier;

#[async_trait]
impl PreheatSupplier for ProgramOwnerSupplier {
    fn name(&self) -> &'static str {
        "program_owners"
    }

    async fn add(
        &self,
        store: &dyn TrackerStore,
        _params: &ImportParams,
        payload: &TrackerPayload,
        cache: &mut PreheatCache,
    ) -> Result<()> {
        let tracked_entities = referenced_uids(TrackerType::TrackedEntity, payload);
        if tracked_entities.is_empty() {
            return Ok(());
        }
        for owner in store.find_program_owners(&tracked_entities).await? {
            cache.add_program_owner(&owner.tracked_entity, &owner.program, &owner.org_unit);
        }
        Ok(())
    }
}

/// The single enrollment of each cached program without registration
///
/// Needs programs in the cache.
pub struct EnrollmentWithoutRegistrationSupplier;

#[async_trait]
impl PreheatSupplier for EnrollmentWithoutRegistrationSupplier {
    fn name(&self) -> &'static str {
        "enrollments_without_registration"
    }

    async fn add(
        &self,
        store: &dyn TrackerStore,
        _params: &ImportParams,
        _payload: &TrackerPayload,
        cache: &mut PreheatCache,
    ) -> Result<()> {
        let programs: HashMap<i64, String> = cache
            .all::<Program>()
            .into_iter()
            .filter(|p| !p.registration)
            .map(|p| (p.base.id, p.base.uid.clone()))
            .collect();
        if programs.is_empty() {
            return Ok(());
        }

        let ids: Vec<i64> = programs.keys().copied().collect();
        for record in store.find_enrollments_without_registration(&ids).await? {
            if let Some(program) = programs.get(&record.program_id) {
                cache.put_enrollment_without_registration(program, record);
            }
        }
        Ok(())
    }
}
