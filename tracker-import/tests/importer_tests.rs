//! End-to-end imports through TrackerImporter
//!
//! Validation, atomic modes, report folding and published events.

mod helpers;

use helpers::*;
use std::collections::HashMap;
use std::sync::Arc;
use tracker_common::config::PreheatFailurePolicy;
use tracker_common::events::{EventBus, ImportEvent};
use tracker_import::bundle::BundleCommitEngine;
use tracker_import::models::{
    AtomicMode, FailureKind, ImportMode, ImportParams, ImportStatus, RuleEffects, TrackerPayload, TrackerType,
};
use tracker_import::preheat::PreheatOrchestrator;
use tracker_import::side_effect::{NotificationHandler, SideEffectDispatcher};
use tracker_import::store::InMemoryStore;
use tracker_import::{ImportError, TrackerImporter};

fn importer(store: &InMemoryStore) -> TrackerImporter {
    TrackerImporter::new(
        Arc::new(store.clone()),
        PreheatOrchestrator::new(PreheatFailurePolicy::BestEffort),
    )
}

/// The chain plus TE2 → EN2 → EV2, where TE2 has an unknown type
fn payload_with_broken_chain() -> TrackerPayload {
    let mut payload = chain_payload();
    let mut broken = tracked_entity("TE2aaaaaaaa");
    broken.tracked_entity_type = uid("Unknown0000");
    payload.tracked_entities.push(broken);
    payload.enrollments.push(enrollment("EN2aaaaaaaa", "TE2aaaaaaaa"));
    payload.events.push(event("EV2aaaaaaaa", "EN2aaaaaaaa"));
    payload
}

#[tokio::test]
async fn test_clean_import_reports_ok() {
    let store = seeded_store();

    let report = importer(&store)
        .import(params(), chain_payload(), RuleEffects::default())
        .await
        .unwrap();

    assert_eq!(report.status, ImportStatus::Ok);
    assert_eq!(report.stats.created, 3);
    assert_eq!(report.stats.ignored, 0);
    assert!(report.rejections.is_empty());
    assert!(store.event("EV1aaaaaaaa").is_some());
}

#[tokio::test]
async fn test_atomic_all_commits_nothing_on_validation_failure() {
    let store = seeded_store();

    let report = importer(&store)
        .import(params(), payload_with_broken_chain(), RuleEffects::default())
        .await
        .unwrap();

    assert_eq!(report.status, ImportStatus::Error);
    assert_eq!(report.stats.ignored, 6);
    assert_eq!(report.stats.created, 0);
    assert!(report.persistence_report.is_empty());
    assert_eq!(report.rejections.len(), 1);
    assert_eq!(report.rejections[0].uid, "TE2aaaaaaaa");
    assert_eq!(report.rejections[0].index, Some(1));
    assert_eq!(store.stats().persists(), 0);
    assert_eq!(store.stats().commits(), 0);
}

#[tokio::test]
async fn test_atomic_object_removes_failed_objects_and_dependents() {
    // Given
    let store = seeded_store();
    let params = ImportParams {
        atomic_mode: AtomicMode::Object,
        ..params()
    };

    // When
    let report = importer(&store)
        .import(params, payload_with_broken_chain(), RuleEffects::default())
        .await
        .unwrap();

    // Then: the good chain commits, the broken one is reported object by object
    assert_eq!(report.status, ImportStatus::Warning);
    assert_eq!(report.stats.created, 3);
    assert_eq!(report.stats.ignored, 3);

    let kinds: Vec<(TrackerType, &str, FailureKind)> = report
        .rejections
        .iter()
        .map(|r| (r.tracker_type, r.uid.as_str(), r.kind))
        .collect();
    assert_eq!(
        kinds,
        vec![
            (TrackerType::TrackedEntity, "TE2aaaaaaaa", FailureKind::UnresolvedReference),
            (TrackerType::Enrollment, "EN2aaaaaaaa", FailureKind::DependencyFailed),
            (TrackerType::Event, "EV2aaaaaaaa", FailureKind::DependencyFailed),
        ]
    );
    assert_eq!(report.rejections[2].index, Some(1));

    assert!(store.tracked_entity("TE1aaaaaaaa").is_some());
    assert!(store.tracked_entity("TE2aaaaaaaa").is_none());
    assert!(store.enrollment("EN2aaaaaaaa").is_none());
}

#[tokio::test]
async fn test_persistence_failure_reports_error_with_empty_persistence_report() {
    let store = seeded_store();
    store.fail_writes_for("EV1aaaaaaaa");

    let report = importer(&store)
        .import(params(), chain_payload(), RuleEffects::default())
        .await
        .unwrap();

    assert_eq!(report.status, ImportStatus::Error);
    assert!(report.persistence_report.is_empty());
    assert_eq!(report.stats.created, 0);
    let rejection = report.rejections.last().unwrap();
    assert_eq!(rejection.tracker_type, TrackerType::Event);
    assert_eq!(rejection.uid, "EV1aaaaaaaa");
    assert_eq!(rejection.index, Some(0));
    assert_eq!(rejection.kind, FailureKind::Persistence);
    assert!(report.message.unwrap().contains("EV1aaaaaaaa"));
    assert!(store.tracked_entity("TE1aaaaaaaa").is_none());
}

#[tokio::test]
async fn test_duplicate_of_stored_relationship_is_rejected_in_validation() {
    let store = seeded_store();
    store.add_tracked_entity(tracked_entity_record("PQfMcpmXeFE"));
    store.add_relationship(relationship_record("RL0aaaaaaaa", true, EVENT_PROGRAM_TE, "PQfMcpmXeFE"));
    let payload = TrackerPayload {
        relationships: vec![relationship("RL1aaaaaaaa", BIDIRECTIONAL, "PQfMcpmXeFE", EVENT_PROGRAM_TE)],
        ..TrackerPayload::default()
    };

    let report = importer(&store)
        .import(params(), payload, RuleEffects::default())
        .await
        .unwrap();

    assert_eq!(report.status, ImportStatus::Error);
    assert_eq!(report.rejections[0].kind, FailureKind::DuplicateRelationship);
    assert_eq!(store.relationship_count(), 1);
}

#[tokio::test]
async fn test_validate_mode_reports_without_writing() {
    let store = seeded_store();
    let params = ImportParams {
        import_mode: ImportMode::Validate,
        ..params()
    };

    let report = importer(&store)
        .import(params, chain_payload(), RuleEffects::default())
        .await
        .unwrap();

    assert_eq!(report.status, ImportStatus::Ok);
    assert_eq!(report.stats.total(), 0);
    assert_eq!(store.stats().persists(), 0);
    assert_eq!(store.stats().flushes(), 0);
}

#[tokio::test]
async fn test_fail_fast_preheat_error_is_returned() {
    let store = seeded_store();
    store.fail_query("metadata");
    let importer = TrackerImporter::new(
        Arc::new(store.clone()),
        PreheatOrchestrator::new(PreheatFailurePolicy::FailFast),
    );

    let err = importer
        .import(params(), chain_payload(), RuleEffects::default())
        .await
        .unwrap_err();

    assert!(matches!(err, ImportError::Preheat { .. }));
}

#[tokio::test]
async fn test_best_effort_preheat_gap_surfaces_as_rejection() {
    let store = seeded_store();
    store.fail_query("metadata");

    let report = importer(&store)
        .import(params(), chain_payload(), RuleEffects::default())
        .await
        .unwrap();

    assert_eq!(report.status, ImportStatus::Error);
    assert!(report
        .rejections
        .iter()
        .all(|r| r.kind == FailureKind::UnresolvedReference));
}

#[tokio::test]
async fn test_events_published_for_notifications_and_commit() {
    // Given: a notification rule on the enrollment
    let store = seeded_store();
    let bus = EventBus::new(16);
    let mut rx = bus.subscribe();
    let dispatcher = SideEffectDispatcher::new().with_handler(Arc::new(NotificationHandler::new(bus.clone())));
    let importer = importer(&store)
        .with_engine(BundleCommitEngine::new(Arc::new(store.clone())).with_dispatcher(dispatcher))
        .with_event_bus(bus);
    let rule_effects = RuleEffects {
        enrollments: HashMap::from([("EN1aaaaaaaa".to_string(), vec![send_message("NAlVHb8cqBd")])]),
        events: HashMap::new(),
    };

    // When
    let report = importer.import(params(), chain_payload(), rule_effects).await.unwrap();

    // Then
    match rx.recv().await.unwrap() {
        ImportEvent::NotificationRequested { tracker_type, uid, rule, program, .. } => {
            assert_eq!(tracker_type, "ENROLLMENT");
            assert_eq!(uid, "EN1aaaaaaaa");
            assert_eq!(rule, "NAlVHb8cqBd");
            assert_eq!(program.as_deref(), Some(PROGRAM));
        }
        other => panic!("unexpected event {:?}", other),
    }
    match rx.recv().await.unwrap() {
        ImportEvent::ImportCommitted { import_id, created, .. } => {
            assert_eq!(import_id, report.import_id.to_string());
            assert_eq!(created, 3);
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_malformed_uid_is_rejected_as_invalid_identifier() {
    let store = seeded_store();
    let payload = TrackerPayload {
        tracked_entities: vec![tracked_entity("te-1")],
        ..TrackerPayload::default()
    };

    let report = importer(&store)
        .import(params(), payload, RuleEffects::default())
        .await
        .unwrap();

    assert_eq!(report.status, ImportStatus::Error);
    assert_eq!(report.rejections[0].kind, FailureKind::InvalidIdentifier);
    assert!(store.tracked_entity("te-1").is_none());
}

#[tokio::test]
async fn test_atomic_object_reports_submitted_index_after_removal() {
    // Given: a broken tracked entity ahead of a good one
    let store = seeded_store();
    let mut broken = tracked_entity("TE2aaaaaaaa");
    broken.tracked_entity_type = uid("Unknown0000");
    let payload = TrackerPayload {
        tracked_entities: vec![broken, tracked_entity("TE1aaaaaaaa")],
        ..TrackerPayload::default()
    };
    let params = ImportParams {
        atomic_mode: AtomicMode::Object,
        ..params()
    };

    // When
    let report = importer(&store)
        .import(params, payload, RuleEffects::default())
        .await
        .unwrap();

    // Then
    assert_eq!(report.rejections[0].index, Some(0));
    let type_report = report.persistence_report.type_report(TrackerType::TrackedEntity).unwrap();
    assert_eq!(type_report.object_reports[0].uid, "TE1aaaaaaaa");
    assert_eq!(type_report.object_reports[0].index, Some(1));
}
