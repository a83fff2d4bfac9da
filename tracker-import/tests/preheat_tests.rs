//! Preheat against a seeded store
//!
//! Tests the supplier chain end to end: what lands in the cache, how often
//! the store is asked, and how supplier failures are handled per policy.

mod helpers;

use helpers::*;
use tracker_common::config::PreheatFailurePolicy;
use tracker_import::identifier::{IdScheme, IdSchemeParam, IdSchemeParams, MetadataIdentifier};
use tracker_import::models::{
    CategoryOptionCombo, ImportParams, MetadataType, OrganisationUnit, Program, TrackerPayload, TrackerType,
};
use tracker_import::preheat::PreheatOrchestrator;
use tracker_import::ImportError;

#[tokio::test]
async fn test_preheat_loads_everything_the_payload_references() {
    let store = seeded_store();
    let orchestrator = PreheatOrchestrator::new(PreheatFailurePolicy::FailFast);

    let cache = orchestrator.preheat(&store, &params(), &chain_payload()).await.unwrap();

    assert!(cache.get_as::<Program>(&uid(PROGRAM)).is_some());
    assert!(cache.get_as::<OrganisationUnit>(&uid(ORG_UNIT)).is_some());
    assert!(cache.user(ADMIN).is_some());
    assert_eq!(cache.user_by_uid(&admin().uid).map(|u| u.username.as_str()), Some(ADMIN));
    assert_eq!(cache.default_of::<CategoryOptionCombo>().map(|c| c.base.uid.as_str()), Some(DEFAULT_COC));

    // Nothing in the payload is stored yet
    assert!(!cache.exists(TrackerType::TrackedEntity, "TE1aaaaaaaa"));
    assert!(!cache.exists(TrackerType::Enrollment, "EN1aaaaaaaa"));
}

#[tokio::test]
async fn test_existing_objects_are_found() {
    let store = seeded_store();
    let payload = TrackerPayload {
        enrollments: vec![enrollment(EVENT_PROGRAM_ENROLLMENT, EVENT_PROGRAM_TE)],
        ..TrackerPayload::default()
    };

    let cache = PreheatOrchestrator::new(PreheatFailurePolicy::FailFast)
        .preheat(&store, &params(), &payload)
        .await
        .unwrap();

    assert!(cache.exists(TrackerType::TrackedEntity, EVENT_PROGRAM_TE));
    assert!(cache.exists(TrackerType::Enrollment, EVENT_PROGRAM_ENROLLMENT));
}

#[tokio::test]
async fn test_program_of_stage_is_loaded_without_explicit_reference() {
    // Given: an event that names only its stage
    let store = seeded_store();
    let payload = TrackerPayload {
        events: vec![single_event("EV2aaaaaaaa")],
        ..TrackerPayload::default()
    };

    // When
    let cache = PreheatOrchestrator::new(PreheatFailurePolicy::FailFast)
        .preheat(&store, &params(), &payload)
        .await
        .unwrap();

    // Then: the program, its category combo and its single enrollment are cached
    let program = cache.program_of_event(&payload.events[0]).unwrap();
    assert_eq!(program.base.uid, EVENT_PROGRAM);
    assert!(cache.get_as::<Program>(&uid(EVENT_PROGRAM)).is_some());
    assert_eq!(
        cache.enrollment_without_registration(EVENT_PROGRAM).map(|e| e.uid.as_str()),
        Some(EVENT_PROGRAM_ENROLLMENT)
    );
}

#[tokio::test]
async fn test_option_combo_is_queried_once_per_combination() {
    let store = seeded_store();
    let stats = store.stats();
    let payload = TrackerPayload {
        events: vec![single_event("EV2aaaaaaaa"), single_event("EV3aaaaaaaa"), single_event("EV4aaaaaaaa")],
        ..TrackerPayload::default()
    };

    let cache = PreheatOrchestrator::new(PreheatFailurePolicy::FailFast)
        .preheat(&store, &params(), &payload)
        .await
        .unwrap();

    assert_eq!(stats.category_option_combo_queries(), 1);
    let coc = cache
        .cached_category_option_combo(ATTRIBUTE_COMBO, &payload.events[0].attribute_category_options)
        .unwrap();
    assert_eq!(coc.base.uid, COC_AB);
}

#[tokio::test]
async fn test_unknown_option_combination_is_memoised_as_missing() {
    let store = seeded_store();
    let stats = store.stats();
    let mut event = single_event("EV2aaaaaaaa");
    event.attribute_category_options.remove(&uid(OPTION_B));
    let payload = TrackerPayload {
        events: vec![event.clone(), event],
        ..TrackerPayload::default()
    };

    let cache = PreheatOrchestrator::new(PreheatFailurePolicy::FailFast)
        .preheat(&store, &params(), &payload)
        .await
        .unwrap();

    assert_eq!(stats.category_option_combo_queries(), 1);
    assert!(cache
        .cached_category_option_combo(ATTRIBUTE_COMBO, &payload.events[0].attribute_category_options)
        .is_none());
}

#[tokio::test]
async fn test_fail_fast_aborts_on_supplier_failure() {
    let store = seeded_store();
    store.fail_query("users");

    let err = PreheatOrchestrator::new(PreheatFailurePolicy::FailFast)
        .preheat(&store, &params(), &chain_payload())
        .await
        .unwrap_err();

    assert!(matches!(err, ImportError::Preheat { supplier: "users", .. }));
}

#[tokio::test]
async fn test_best_effort_leaves_a_gap() {
    let store = seeded_store();
    store.fail_query("users");

    let cache = PreheatOrchestrator::new(PreheatFailurePolicy::BestEffort)
        .preheat(&store, &params(), &chain_payload())
        .await
        .unwrap();

    assert!(cache.user(ADMIN).is_none());
    assert!(cache.get_as::<Program>(&uid(PROGRAM)).is_some());
}

#[tokio::test]
async fn test_attribute_scheme_without_attribute_is_rejected_before_any_query() {
    let store = seeded_store();
    let stats = store.stats();
    let params = ImportParams {
        id_schemes: IdSchemeParams::all(IdSchemeParam::of(IdScheme::Attribute)),
        ..params()
    };

    let err = PreheatOrchestrator::new(PreheatFailurePolicy::BestEffort)
        .preheat(&store, &params, &chain_payload())
        .await
        .unwrap_err();

    assert!(matches!(err, ImportError::InvalidIdentifier(_)));
    assert_eq!(stats.queries(), 0);
}

#[tokio::test]
async fn test_org_unit_resolved_by_code() {
    let store = seeded_store();
    let params = ImportParams {
        id_schemes: IdSchemeParams {
            org_unit_id_scheme: IdSchemeParam::of(IdScheme::Code),
            ..IdSchemeParams::default()
        },
        ..params()
    };
    let mut te = tracked_entity("TE1aaaaaaaa");
    te.org_unit = MetadataIdentifier::of_code("OU_559");
    let payload = TrackerPayload {
        tracked_entities: vec![te],
        ..TrackerPayload::default()
    };

    let cache = PreheatOrchestrator::new(PreheatFailurePolicy::FailFast)
        .preheat(&store, &params, &payload)
        .await
        .unwrap();

    let org_unit = cache.get_as::<OrganisationUnit>(&MetadataIdentifier::of_code("OU_559")).unwrap();
    assert_eq!(org_unit.base.uid, ORG_UNIT);
    assert!(cache.get(MetadataType::OrganisationUnit, &uid(ORG_UNIT)).is_none());
}
