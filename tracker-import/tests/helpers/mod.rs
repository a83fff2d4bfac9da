//! Test helper utilities
//!
//! A small tracker metadata universe, payload builders and recording hooks
//! shared by the integration tests.

#![allow(dead_code)]

use chrono::Utc;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracker_common::config::PreheatFailurePolicy;
use tracker_common::db::init_database;
use tracker_import::bundle::{CacheInvalidator, CommitHook, HookContext, TrackerBundle};
use tracker_import::db::SqliteStore;
use tracker_import::identifier::MetadataIdentifier;
use tracker_import::models::{
    AuditFields, CategoryCombo, CategoryOption, CategoryOptionCombo, DataElement, DataValue, Enrollment,
    EnrollmentRecord, EnrollmentStatus, Event, EventStatus, Identifiable, ImportParams, Metadata,
    OrganisationUnit, PersistenceReport, Program, ProgramStage, Relationship, RelationshipItem,
    RelationshipRecord, RelationshipType, RuleActionType, RuleEffect, RuleEffects, TrackedEntity,
    TrackedEntityAttribute, TrackedEntityRecord, TrackedEntityType, TrackerObject, TrackerPayload, User,
};
use tracker_import::preheat::{PreheatOrchestrator, RelationshipKey};
use tracker_import::side_effect::{SideEffectDescriptor, SideEffectHandler};
use tracker_import::store::{InMemoryStore, TrackerStore, Write};

pub const ORG_UNIT: &str = "DiszpKrYNg8";
pub const PERSON: &str = "nEenWmSyUEp";
pub const FIRST_NAME: &str = "w75KJ2mc4zz";
pub const PROGRAM: &str = "IpHINAT79UW";
pub const STAGE: &str = "A03MvHHogjR";
pub const EVENT_PROGRAM: &str = "eBAyeGv0exc";
pub const EVENT_STAGE: &str = "Zj7UnCAulEk";
pub const DATA_ELEMENT: &str = "a3kGcGDCuk6";
pub const BIDIRECTIONAL: &str = "xLmPUYJX8Ks";
pub const UNIDIRECTIONAL: &str = "WTTYiPQDqh1";
pub const DEFAULT_COMBO: &str = "bjDvmb4bfuf";
pub const DEFAULT_OPTION: &str = "xYerKDKCefk";
pub const DEFAULT_COC: &str = "HllvX50cXC0";
pub const ATTRIBUTE_COMBO: &str = "O4VaNks6tta";
pub const OPTION_A: &str = "Fp4gVHbRvEV";
pub const OPTION_B: &str = "uZUnebiT5DI";
pub const COC_AB: &str = "S34ULMcHMca";
pub const ADMIN: &str = "admin";

/// Stored tracked entity owning the single enrollment of EVENT_PROGRAM
pub const EVENT_PROGRAM_TE: &str = "xcaxNpuYrWH";
pub const EVENT_PROGRAM_ENROLLMENT: &str = "QsAhMiZtnl2";

pub const EVENT_PROGRAM_ID: i64 = 6;

pub fn uid(value: &str) -> MetadataIdentifier {
    MetadataIdentifier::of_uid(value)
}

/// Every metadata object of the test universe
pub fn metadata() -> Vec<Metadata> {
    vec![
        OrganisationUnit {
            base: Identifiable::new(1, ORG_UNIT, "Ngelehun CHC").with_code("OU_559"),
            path: format!("/{}", ORG_UNIT),
        }
        .into(),
        TrackedEntityType {
            base: Identifiable::new(2, PERSON, "Person"),
        }
        .into(),
        TrackedEntityAttribute {
            base: Identifiable::new(3, FIRST_NAME, "First name").with_code("FIRST_NAME"),
            unique: false,
        }
        .into(),
        Program {
            base: Identifiable::new(4, PROGRAM, "Child Programme"),
            registration: true,
            category_combo: None,
            tracked_entity_type: Some(PERSON.to_string()),
        }
        .into(),
        ProgramStage {
            base: Identifiable::new(5, STAGE, "Birth"),
            program: PROGRAM.to_string(),
            repeatable: false,
        }
        .into(),
        Program {
            base: Identifiable::new(EVENT_PROGRAM_ID, EVENT_PROGRAM, "Inpatient morbidity"),
            registration: false,
            category_combo: Some(ATTRIBUTE_COMBO.to_string()),
            tracked_entity_type: None,
        }
        .into(),
        ProgramStage {
            base: Identifiable::new(7, EVENT_STAGE, "Inpatient morbidity stage"),
            program: EVENT_PROGRAM.to_string(),
            repeatable: true,
        }
        .into(),
        DataElement {
            base: Identifiable::new(8, DATA_ELEMENT, "Weight (g)").with_code("DE_WEIGHT"),
        }
        .into(),
        RelationshipType {
            base: Identifiable::new(9, BIDIRECTIONAL, "Sibling"),
            bidirectional: true,
        }
        .into(),
        RelationshipType {
            base: Identifiable::new(10, UNIDIRECTIONAL, "Mother to child"),
            bidirectional: false,
        }
        .into(),
        CategoryCombo {
            base: Identifiable::new(11, DEFAULT_COMBO, "default"),
            is_default: true,
        }
        .into(),
        CategoryOption {
            base: Identifiable::new(12, DEFAULT_OPTION, "default"),
        }
        .into(),
        CategoryOptionCombo {
            base: Identifiable::new(13, DEFAULT_COC, "default"),
            category_combo: DEFAULT_COMBO.to_string(),
            category_options: BTreeSet::from([DEFAULT_OPTION.to_string()]),
        }
        .into(),
        CategoryCombo {
            base: Identifiable::new(14, ATTRIBUTE_COMBO, "Funding"),
            is_default: false,
        }
        .into(),
        CategoryOption {
            base: Identifiable::new(15, OPTION_A, "Donor A"),
        }
        .into(),
        CategoryOption {
            base: Identifiable::new(16, OPTION_B, "Donor B"),
        }
        .into(),
        CategoryOptionCombo {
            base: Identifiable::new(17, COC_AB, "Donor A, Donor B"),
            category_combo: ATTRIBUTE_COMBO.to_string(),
            category_options: BTreeSet::from([OPTION_A.to_string(), OPTION_B.to_string()]),
        }
        .into(),
    ]
}

pub fn admin() -> User {
    User {
        id: 1,
        uid: "M5zQapPyTZI".to_string(),
        username: ADMIN.to_string(),
    }
}

pub fn tracked_entity_record(uid: &str) -> TrackedEntityRecord {
    TrackedEntityRecord {
        uid: uid.to_string(),
        tracked_entity_type_id: 2,
        org_unit_id: 1,
        inactive: false,
        deleted: false,
        attributes: Vec::new(),
        audit: AuditFields::created(Utc::now(), None, Some(ADMIN)),
    }
}

pub fn enrollment_record(uid: &str, tracked_entity: &str, program_id: i64) -> EnrollmentRecord {
    EnrollmentRecord {
        uid: uid.to_string(),
        tracked_entity: tracked_entity.to_string(),
        program_id,
        org_unit_id: 1,
        status: EnrollmentStatus::Active,
        enrolled_at: None,
        occurred_at: None,
        deleted: false,
        audit: AuditFields::created(Utc::now(), None, Some(ADMIN)),
    }
}

/// Stored relationship between two tracked entities
pub fn relationship_record(uid: &str, bidirectional: bool, from: &str, to: &str) -> RelationshipRecord {
    let (type_id, type_uid) = if bidirectional { (9, BIDIRECTIONAL) } else { (10, UNIDIRECTIONAL) };
    let from = RelationshipItem::TrackedEntity(from.to_string());
    let to = RelationshipItem::TrackedEntity(to.to_string());
    let key = RelationshipKey::new(type_uid, &from, &to);
    RelationshipRecord {
        uid: uid.to_string(),
        relationship_type_id: type_id,
        relationship_type: type_uid.to_string(),
        bidirectional,
        from,
        to,
        key: key.as_string(),
        inverted_key: key.inverse().as_string(),
        deleted: false,
        audit: AuditFields::created(Utc::now(), None, Some(ADMIN)),
    }
}

/// In-memory store holding the metadata universe, the admin user and the
/// enrollment of the program without registration
pub fn seeded_store() -> InMemoryStore {
    let store = InMemoryStore::new();
    for m in metadata() {
        store.add_metadata(m);
    }
    store.add_user(admin());
    store.add_tracked_entity(tracked_entity_record(EVENT_PROGRAM_TE));
    store.add_enrollment(enrollment_record(EVENT_PROGRAM_ENROLLMENT, EVENT_PROGRAM_TE, EVENT_PROGRAM_ID));
    store
}

/// SQLite store at `path` holding the same data as [`seeded_store`]
pub async fn seeded_sqlite_store(path: &Path) -> SqliteStore {
    let pool = init_database(path, 4).await.unwrap();
    let store = SqliteStore::open(pool, 1000).await.unwrap();
    for m in metadata() {
        store.save_metadata(&m).await.unwrap();
    }
    store.save_user(&admin()).await.unwrap();

    let mut tx = store.begin().await.unwrap();
    tx.persist(Write::TrackedEntity(tracked_entity_record(EVENT_PROGRAM_TE)))
        .await
        .unwrap();
    tx.persist(Write::Enrollment(enrollment_record(
        EVENT_PROGRAM_ENROLLMENT,
        EVENT_PROGRAM_TE,
        EVENT_PROGRAM_ID,
    )))
    .await
    .unwrap();
    tx.commit().await.unwrap();
    store
}

pub fn params() -> ImportParams {
    ImportParams {
        user: Some(ADMIN.to_string()),
        ..ImportParams::default()
    }
}

pub fn tracked_entity(uid_value: &str) -> TrackedEntity {
    TrackedEntity {
        tracked_entity: uid_value.to_string(),
        tracked_entity_type: uid(PERSON),
        org_unit: uid(ORG_UNIT),
        inactive: false,
        attributes: Vec::new(),
        created_at_client: None,
        updated_at_client: None,
    }
}

pub fn enrollment(uid_value: &str, tracked_entity: &str) -> Enrollment {
    Enrollment {
        enrollment: uid_value.to_string(),
        tracked_entity: tracked_entity.to_string(),
        program: uid(PROGRAM),
        org_unit: uid(ORG_UNIT),
        status: EnrollmentStatus::Active,
        enrolled_at: Some(Utc::now()),
        occurred_at: None,
        created_at_client: None,
        updated_at_client: None,
    }
}

/// Event in the registration program under `enrollment`
pub fn event(uid_value: &str, enrollment: &str) -> Event {
    Event {
        event: uid_value.to_string(),
        enrollment: Some(enrollment.to_string()),
        program: None,
        program_stage: uid(STAGE),
        org_unit: uid(ORG_UNIT),
        status: EventStatus::Active,
        occurred_at: Some(Utc::now()),
        scheduled_at: None,
        attribute_option_combo: None,
        attribute_category_options: BTreeSet::new(),
        assigned_user: None,
        data_values: vec![DataValue {
            data_element: uid(DATA_ELEMENT),
            value: "3200".to_string(),
        }],
        created_at_client: None,
        updated_at_client: None,
    }
}

/// Event in the program without registration, attributed by category options
pub fn single_event(uid_value: &str) -> Event {
    Event {
        enrollment: None,
        program_stage: uid(EVENT_STAGE),
        attribute_category_options: BTreeSet::from([uid(OPTION_A), uid(OPTION_B)]),
        ..event(uid_value, "")
    }
}

pub fn relationship(uid_value: &str, relationship_type: &str, from: &str, to: &str) -> Relationship {
    Relationship {
        relationship: uid_value.to_string(),
        relationship_type: uid(relationship_type),
        from: RelationshipItem::TrackedEntity(from.to_string()),
        to: RelationshipItem::TrackedEntity(to.to_string()),
        created_at_client: None,
    }
}

pub fn send_message(rule: &str) -> RuleEffect {
    RuleEffect {
        rule: rule.to_string(),
        action: RuleActionType::SendMessage,
        template: Some("Zp268JB6Ne5".to_string()),
        scheduled_at: None,
        data: serde_json::Value::Null,
    }
}

/// TE1 → EN1 → EV1
pub fn chain_payload() -> TrackerPayload {
    TrackerPayload {
        tracked_entities: vec![tracked_entity("TE1aaaaaaaa")],
        enrollments: vec![enrollment("EN1aaaaaaaa", "TE1aaaaaaaa")],
        events: vec![event("EV1aaaaaaaa", "EN1aaaaaaaa")],
        relationships: Vec::new(),
    }
}

/// Preheat with the standard suppliers and wrap everything in a bundle
pub async fn bundle(
    store: &dyn TrackerStore,
    params: ImportParams,
    payload: TrackerPayload,
    rule_effects: RuleEffects,
) -> TrackerBundle {
    let preheat = PreheatOrchestrator::new(PreheatFailurePolicy::FailFast)
        .preheat(store, &params, &payload)
        .await
        .unwrap();
    TrackerBundle::new(params, payload, preheat, rule_effects)
}

/// Shared, ordered log of everything the recording hooks saw
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, entry: String) {
        self.0.lock().unwrap().push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.entries().iter().filter(|e| e.starts_with(prefix)).count()
    }
}

pub struct RecordingHook(pub CallLog);

impl CommitHook for RecordingHook {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn pre_create(&self, object: TrackerObject<'_>, _ctx: &HookContext<'_>) {
        self.0.push(format!("pre {} {}", object.tracker_type(), object.uid()));
    }

    fn post_create(&self, object: TrackerObject<'_>, _ctx: &HookContext<'_>) {
        self.0.push(format!("post {} {}", object.tracker_type(), object.uid()));
    }

    fn post_commit(&self, _report: &PersistenceReport, _params: &ImportParams) {
        self.0.push("post_commit".to_string());
    }
}

pub struct RecordingInvalidator(pub CallLog);

impl CacheInvalidator for RecordingInvalidator {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn invalidate(&self, _report: &PersistenceReport) {
        self.0.push("invalidate".to_string());
    }
}

/// Side-effect handler keeping every descriptor it receives
#[derive(Clone, Default)]
pub struct RecordingHandler(pub Arc<Mutex<Vec<SideEffectDescriptor>>>);

impl RecordingHandler {
    pub fn descriptors(&self) -> Vec<SideEffectDescriptor> {
        self.0.lock().unwrap().clone()
    }
}

impl SideEffectHandler for RecordingHandler {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn handle(&self, descriptor: &SideEffectDescriptor) {
        self.0.lock().unwrap().push(descriptor.clone());
    }
}
