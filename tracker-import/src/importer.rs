//! End-to-end tracker import
//!
//! Runs preheat, validation and commit for one payload and folds the outcome
//! into an [`ImportReport`].

use crate::bundle::{BundleCommitEngine, TrackerBundle};
use crate::error::{ImportError, Result};
use crate::models::{
    AtomicMode, FailureKind, ImportParams, ImportReport, ImportStatus, PersistenceReport, Rejection,
    RuleEffects, Stats, Timings, TrackerPayload, TrackerType,
};
use crate::preheat::PreheatOrchestrator;
use crate::store::TrackerStore;
use crate::validation::{remove_failed, ReferenceValidator, Validator};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use tracker_common::events::{EventBus, ImportEvent};
use uuid::Uuid;

pub struct TrackerImporter {
    store: Arc<dyn TrackerStore>,
    orchestrator: PreheatOrchestrator,
    validators: Vec<Arc<dyn Validator>>,
    engine: BundleCommitEngine,
    event_bus: Option<EventBus>,
}

impl TrackerImporter {
    /// Importer with the standard suppliers, the reference validator and a bare engine
    pub fn new(store: Arc<dyn TrackerStore>, orchestrator: PreheatOrchestrator) -> Self {
        let engine = BundleCommitEngine::new(store.clone());
        Self {
            store,
            orchestrator,
            validators: vec![Arc::new(ReferenceValidator)],
            engine,
            event_bus: None,
        }
    }

    /// Replace the commit engine (hooks, dispatcher, invalidators)
    pub fn with_engine(mut self, engine: BundleCommitEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validators.push(validator);
        self
    }

    /// Publish an `ImportCommitted` event after every successful commit
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Import `payload`
    ///
    /// # Returns
    /// * `Ok(report)` - Import ran to completion; a rolled back commit is
    ///   reported with status ERROR
    /// * `Err(ImportError::Preheat)` - A supplier failed under the fail-fast policy
    pub async fn import(
        &self,
        params: ImportParams,
        payload: TrackerPayload,
        rule_effects: RuleEffects,
    ) -> Result<ImportReport> {
        let import_id = Uuid::new_v4();
        let mut timings = Timings::default();
        info!(
            %import_id,
            objects = payload.len(),
            mode = ?params.import_mode,
            strategy = ?params.import_strategy,
            "Starting import"
        );

        let start = Instant::now();
        let preheat = self.orchestrator.preheat(self.store.as_ref(), &params, &payload).await?;
        timings.preheat_ms = start.elapsed().as_millis() as u64;

        let mut bundle = TrackerBundle::new(params, payload, preheat, rule_effects);

        let start = Instant::now();
        let mut rejections = self.validate(&bundle);
        timings.validation_ms = start.elapsed().as_millis() as u64;

        if !rejections.is_empty() {
            match bundle.params.atomic_mode {
                AtomicMode::All => {
                    warn!(%import_id, failures = rejections.len(), "Validation failed, nothing committed");
                    let stats = Stats {
                        ignored: bundle.payload.len(),
                        ..Stats::default()
                    };
                    return Ok(ImportReport {
                        import_id,
                        status: ImportStatus::Error,
                        stats,
                        persistence_report: PersistenceReport::empty(),
                        rejections,
                        timings,
                        message: Some("validation failed".to_string()),
                    });
                }
                AtomicMode::Object => {
                    let cascaded = remove_failed(&mut bundle, &rejections);
                    rejections.extend(cascaded);
                    warn!(
                        %import_id,
                        removed = rejections.len(),
                        remaining = bundle.payload.len(),
                        "Removed invalid objects before commit"
                    );
                }
            }
        }

        let start = Instant::now();
        let outcome = self.engine.commit(&mut bundle).await;
        timings.commit_ms = start.elapsed().as_millis() as u64;

        let persistence_report = match outcome {
            Ok(report) => report,
            Err(e) => {
                error!(%import_id, error = %e, "Import failed");
                rejections.extend(persistence_rejection(&bundle, &e));
                return Ok(ImportReport {
                    import_id,
                    status: ImportStatus::Error,
                    stats: Stats::default(),
                    persistence_report: PersistenceReport::empty(),
                    rejections,
                    timings,
                    message: Some(e.to_string()),
                });
            }
        };

        let validation_ignored = rejections
            .iter()
            .map(|r| (r.tracker_type, r.uid.as_str()))
            .collect::<HashSet<_>>()
            .len();
        rejections.extend(persistence_report.rejections.iter().cloned());
        let mut stats = persistence_report.total();
        stats.ignored += validation_ignored;

        let status = if rejections.is_empty() {
            ImportStatus::Ok
        } else {
            ImportStatus::Warning
        };

        if let Some(bus) = &self.event_bus {
            bus.emit_lossy(ImportEvent::ImportCommitted {
                import_id: import_id.to_string(),
                created: stats.created,
                updated: stats.updated,
                deleted: stats.deleted,
                ignored: stats.ignored,
                timestamp: Utc::now(),
            });
        }

        info!(
            %import_id,
            status = ?status,
            created = stats.created,
            updated = stats.updated,
            deleted = stats.deleted,
            ignored = stats.ignored,
            preheat_ms = timings.preheat_ms,
            validation_ms = timings.validation_ms,
            commit_ms = timings.commit_ms,
            "Import finished"
        );

        Ok(ImportReport {
            import_id,
            status,
            stats,
            persistence_report,
            rejections,
            timings,
            message: None,
        })
    }

    fn validate(&self, bundle: &TrackerBundle) -> Vec<Rejection> {
        let mut rejections = Vec::new();
        for validator in &self.validators {
            let failures = validator.validate(bundle);
            if !failures.is_empty() {
                warn!(validator = validator.name(), failures = failures.len(), "Validation failures");
            }
            rejections.extend(failures);
        }
        rejections
    }
}

/// Rejection naming the object whose write failed, when known
fn persistence_rejection(bundle: &TrackerBundle, e: &ImportError) -> Option<Rejection> {
    let ImportError::Persistence { uid: Some(uid), .. } = e else {
        return None;
    };
    let tracker_type = TrackerType::COMMIT_ORDER
        .into_iter()
        .find(|t| bundle.payload.contains(*t, uid))?;
    Some(Rejection {
        tracker_type,
        uid: uid.clone(),
        index: bundle.index_of(tracker_type, uid),
        kind: FailureKind::Persistence,
        message: e.to_string(),
    })
}
