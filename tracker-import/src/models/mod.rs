//! Data models for tracker-import

pub mod metadata;
pub mod params;
pub mod payload;
pub mod records;
pub mod report;
pub mod rule_effect;

pub use metadata::{
    CategoryCombo, CategoryOption, CategoryOptionCombo, DataElement, Identifiable, Metadata,
    MetadataObject, MetadataType, OrganisationUnit, Program, ProgramStage, RelationshipType,
    TrackedEntityAttribute, TrackedEntityType, User,
};
pub use params::{AtomicMode, FlushMode, ImportMode, ImportParams, ImportStrategy};
pub use payload::{
    Attribute, DataValue, Enrollment, EnrollmentStatus, Event, EventStatus, Relationship,
    RelationshipItem, TrackedEntity, TrackerObject, TrackerPayload, TrackerType,
};
pub use records::{
    AttributeValueRecord, AuditFields, DataValueRecord, EnrollmentRecord, EventRecord,
    ProgramOwner, RelationshipRecord, TrackedEntityRecord, TrackerRecord,
};
pub use report::{
    FailureKind, ImportReport, ImportStatus, ObjectReport, PersistenceReport, Rejection, Stats,
    Timings, TypeReport,
};
pub use rule_effect::{RuleActionType, RuleEffect, RuleEffects};
