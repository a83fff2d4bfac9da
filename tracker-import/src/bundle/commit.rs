//! Bundle commit engine
//!
//! Persists a bundle in one transaction, tracked entities first, then
//! enrollments, events and relationships, so every object can reference the
//! ones committed before it. DELETE runs the reverse order.
//!
//! Per object:
//! 1. resolve the object strategy (CREATE_AND_UPDATE resolves per object)
//! 2. pre-create hooks
//! 3. convert and stamp
//! 4. persist
//! 5. record in the persistence report
//! 6. flush, in OBJECT flush mode
//! 7. dispatch side effects (enrollments and events)
//! 8. post-create hooks
//!
//! Objects whose strategy does not apply, duplicate relationships and objects
//! with unresolvable references are ignored and reported. A storage error
//! rolls back the whole transaction.

use super::converter::{
    convert_enrollment, convert_event, convert_relationship, convert_tracked_entity, AuditContext,
};
use super::hooks::{CacheInvalidator, CommitHook, HookContext};
use super::{resolve_strategy, ObjectStrategy, TrackerBundle};
use crate::error::{ImportError, Result};
use crate::models::{
    CategoryOptionCombo, EnrollmentRecord, Event, EventRecord, FailureKind, FlushMode, ImportMode,
    ImportParams, ImportStrategy, MetadataType, ObjectReport, OrganisationUnit, PersistenceReport,
    Program, ProgramOwner, Rejection, RelationshipRecord, RelationshipType, RuleEffects,
    TrackedEntityRecord, TrackerObject, TrackerPayload, TrackerType,
};
use crate::preheat::suppliers::category_combo_of_event;
use crate::preheat::{PreheatCache, RelationshipKey};
use crate::side_effect::{SideEffectDescriptor, SideEffectDispatcher};
use crate::store::{StoreTransaction, TrackerStore, Write};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

pub struct BundleCommitEngine {
    store: Arc<dyn TrackerStore>,
    hooks: Vec<Arc<dyn CommitHook>>,
    dispatcher: SideEffectDispatcher,
    invalidators: Vec<Arc<dyn CacheInvalidator>>,
}

impl BundleCommitEngine {
    pub fn new(store: Arc<dyn TrackerStore>) -> Self {
        Self {
            store,
            hooks: Vec::new(),
            dispatcher: SideEffectDispatcher::new(),
            invalidators: Vec::new(),
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn CommitHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: SideEffectDispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn with_invalidator(mut self, invalidator: Arc<dyn CacheInvalidator>) -> Self {
        self.invalidators.push(invalidator);
        self
    }

    pub fn store(&self) -> &Arc<dyn TrackerStore> {
        &self.store
    }

    /// Persist `bundle`
    ///
    /// VALIDATE mode returns an empty report without touching storage.
    ///
    /// # Returns
    /// * `Ok(report)` - Transaction committed
    /// * `Err(ImportError::Persistence)` - Transaction rolled back, nothing written
    pub async fn commit(&self, bundle: &mut TrackerBundle) -> Result<PersistenceReport> {
        if bundle.params.import_mode == ImportMode::Validate {
            debug!("Validate mode, skipping commit");
            return Ok(PersistenceReport::empty());
        }

        let start = Instant::now();
        let mut tx = self
            .store
            .begin()
            .await
            .map_err(|e| ImportError::persistence(None, e))?;

        let TrackerBundle {
            params,
            payload,
            preheat,
            rule_effects,
            positions,
        } = bundle;

        let mut run = CommitRun {
            engine: self,
            tx: tx.as_mut(),
            params,
            preheat,
            rule_effects,
            positions,
            audit: AuditContext::new(params.user.clone()),
            report: PersistenceReport::empty(),
        };
        let outcome = if params.import_strategy == ImportStrategy::Delete {
            run.delete_all(payload).await
        } else {
            run.persist_all(payload).await
        };
        let report = run.report;

        match outcome {
            Ok(()) => {
                tx.commit().await.map_err(|e| ImportError::persistence(None, e))?;

                for hook in &self.hooks {
                    hook.post_commit(&report, params);
                }
                for invalidator in &self.invalidators {
                    debug!(invalidator = invalidator.name(), "Invalidating caches");
                    invalidator.invalidate(&report);
                }

                let total = report.total();
                info!(
                    created = total.created,
                    updated = total.updated,
                    deleted = total.deleted,
                    ignored = total.ignored,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Bundle committed"
                );
                Ok(report)
            }
            Err(e) => {
                error!(error = %e, "Bundle commit failed, rolling back");
                if let Err(rollback_error) = tx.rollback().await {
                    error!(error = %rollback_error, "Rollback failed");
                }
                Err(e)
            }
        }
    }
}

/// State of one commit, borrowed out of the bundle
struct CommitRun<'a> {
    engine: &'a BundleCommitEngine,
    tx: &'a mut dyn StoreTransaction,
    params: &'a ImportParams,
    preheat: &'a mut PreheatCache,
    rule_effects: &'a RuleEffects,
    positions: &'a HashMap<TrackerType, Vec<usize>>,
    audit: AuditContext,
    report: PersistenceReport,
}

/// Conversion failures reject the object; anything else aborts the commit
fn object_failure_kind(e: &ImportError) -> Option<FailureKind> {
    match e {
        ImportError::UnresolvedReference { .. } => Some(FailureKind::UnresolvedReference),
        ImportError::InvalidIdentifier(_) => Some(FailureKind::InvalidIdentifier),
        ImportError::DuplicateRelationship { .. } => Some(FailureKind::DuplicateRelationship),
        _ => None,
    }
}

impl CommitRun<'_> {
    async fn persist_all(&mut self, payload: &TrackerPayload) -> Result<()> {
        for (i, te) in payload.tracked_entities.iter().enumerate() {
            self.persist_object(TrackerObject::TrackedEntity(te), i).await?;
        }
        self.finish_type(payload.tracked_entities.len()).await?;

        for (i, en) in payload.enrollments.iter().enumerate() {
            self.persist_object(TrackerObject::Enrollment(en), i).await?;
        }
        self.finish_type(payload.enrollments.len()).await?;

        for (i, ev) in payload.events.iter().enumerate() {
            self.persist_object(TrackerObject::Event(ev), i).await?;
        }
        self.finish_type(payload.events.len()).await?;

        for (i, rel) in payload.relationships.iter().enumerate() {
            self.persist_object(TrackerObject::Relationship(rel), i).await?;
        }
        self.finish_type(payload.relationships.len()).await
    }

    async fn delete_all(&mut self, payload: &TrackerPayload) -> Result<()> {
        for tracker_type in TrackerType::COMMIT_ORDER.into_iter().rev() {
            let uids = payload.uids(tracker_type);
            for (i, uid) in uids.iter().enumerate() {
                self.delete_object(tracker_type, uid, i).await?;
            }
            self.finish_type(uids.len()).await?;
        }
        Ok(())
    }

    /// One flush per tracker type in AUTO mode
    async fn finish_type(&mut self, count: usize) -> Result<()> {
        if self.params.flush_mode == FlushMode::Auto && count > 0 {
            self.tx.flush().await.map_err(|e| ImportError::persistence(None, e))?;
        }
        Ok(())
    }

    async fn flush_object(&mut self, uid: &str) -> Result<()> {
        if self.params.flush_mode == FlushMode::Object {
            self.tx
                .flush()
                .await
                .map_err(|e| ImportError::persistence(Some(uid), e))?;
        }
        Ok(())
    }

    async fn write(&mut self, write: Write) -> Result<()> {
        let uid = write.uid().to_string();
        self.tx
            .persist(write)
            .await
            .map_err(|e| ImportError::persistence(Some(&uid), e))
    }

    /// Submitted payload position of the object at `current` in its list
    fn position(&self, tracker_type: TrackerType, current: usize) -> Option<usize> {
        self.positions.get(&tracker_type).and_then(|p| p.get(current)).copied()
    }

    fn ignore(&mut self, tracker_type: TrackerType, current: usize, uid: &str, kind: FailureKind, message: String) {
        let index = self.position(tracker_type, current);
        warn!(tracker_type = %tracker_type, uid, kind = ?kind, %message, "Object ignored");
        self.report.type_report_mut(tracker_type).stats.ignored += 1;
        self.report.rejections.push(Rejection {
            tracker_type,
            uid: uid.to_string(),
            index,
            kind,
            message,
        });
    }

    fn record(&mut self, tracker_type: TrackerType, current: usize, uid: &str, strategy: ObjectStrategy) {
        let index = self.position(tracker_type, current);
        let type_report = self.report.type_report_mut(tracker_type);
        match strategy {
            ObjectStrategy::Create => type_report.stats.created += 1,
            ObjectStrategy::Update => type_report.stats.updated += 1,
            ObjectStrategy::Delete => type_report.stats.deleted += 1,
        }
        type_report.object_reports.push(ObjectReport {
            tracker_type,
            uid: uid.to_string(),
            index,
        });
    }

    fn hook_context(&self, strategy: ObjectStrategy) -> HookContext<'_> {
        HookContext {
            params: self.params,
            preheat: &*self.preheat,
            strategy,
        }
    }

    async fn persist_object(&mut self, object: TrackerObject<'_>, current: usize) -> Result<()> {
        let tracker_type = object.tracker_type();
        let uid = object.uid();

        // 1. strategy
        let exists = self.preheat.exists(tracker_type, uid);
        let strategy = match resolve_strategy(self.params.import_strategy, exists) {
            Ok(strategy) => strategy,
            Err(kind) => {
                let message = match kind {
                    FailureKind::AlreadyExists => format!("{} {} already exists", tracker_type, uid),
                    _ => format!("{} {} does not exist", tracker_type, uid),
                };
                self.ignore(tracker_type, current, uid, kind, message);
                return Ok(());
            }
        };
        if tracker_type == TrackerType::Relationship && strategy == ObjectStrategy::Update {
            self.ignore(
                tracker_type,
                current,
                uid,
                FailureKind::NotUpdatable,
                format!("relationship {} already exists and cannot be updated", uid),
            );
            return Ok(());
        }
        if let TrackerObject::Relationship(rel) = object {
            if let Some(relationship_type) = self.preheat.get_as::<RelationshipType>(&rel.relationship_type) {
                let key = RelationshipKey::new(relationship_type.base.uid.clone(), &rel.from, &rel.to);
                if self.preheat.is_duplicate_relationship(&key, relationship_type.bidirectional) {
                    self.ignore(
                        tracker_type,
                        current,
                        uid,
                        FailureKind::DuplicateRelationship,
                        ImportError::DuplicateRelationship {
                            relationship: key.as_string(),
                        }
                        .to_string(),
                    );
                    return Ok(());
                }
            }
        }

        // 2. pre-create hooks
        {
            let ctx = self.hook_context(strategy);
            for hook in &self.engine.hooks {
                hook.pre_create(object, &ctx);
            }
        }

        // 3-4. convert, stamp, persist
        let written = match self.convert(object, strategy).await {
            Ok(written) => written,
            Err(e) => match object_failure_kind(&e) {
                Some(kind) => {
                    self.ignore(tracker_type, current, uid, kind, e.to_string());
                    return Ok(());
                }
                None => return Err(e),
            },
        };
        self.persist_converted(written, strategy).await?;

        // 5-6. report, flush
        self.record(tracker_type, current, uid, strategy);
        self.flush_object(uid).await?;

        // 7. side effects
        if let Some(descriptor) = self.side_effect_descriptor(object) {
            self.engine.dispatcher.dispatch(&descriptor);
        }

        // 8. post-create hooks
        let ctx = self.hook_context(strategy);
        for hook in &self.engine.hooks {
            hook.post_create(object, &ctx);
        }
        Ok(())
    }

    async fn convert(&mut self, object: TrackerObject<'_>, strategy: ObjectStrategy) -> Result<Converted> {
        Ok(match object {
            TrackerObject::TrackedEntity(te) => {
                Converted::TrackedEntity(convert_tracked_entity(te, self.preheat, strategy, &self.audit)?)
            }
            TrackerObject::Enrollment(en) => {
                let record = convert_enrollment(en, self.preheat, strategy, &self.audit)?;
                let owner = self
                    .preheat
                    .get_as::<Program>(&en.program)
                    .map(|p| p.base.uid.clone())
                    .zip(
                        self.preheat
                            .get_as::<OrganisationUnit>(&en.org_unit)
                            .map(|o| o.base.uid.clone()),
                    );
                Converted::Enrollment(record, owner)
            }
            TrackerObject::Event(ev) => {
                let attribute_option_combo = self.attribute_option_combo(ev).await?;
                Converted::Event(convert_event(
                    ev,
                    self.preheat,
                    &attribute_option_combo,
                    strategy,
                    &self.audit,
                )?)
            }
            TrackerObject::Relationship(rel) => {
                Converted::Relationship(convert_relationship(rel, self.preheat, strategy, &self.audit)?)
            }
        })
    }

    async fn persist_converted(&mut self, converted: Converted, strategy: ObjectStrategy) -> Result<()> {
        match converted {
            Converted::TrackedEntity(record) => {
                self.write(Write::TrackedEntity(record.clone())).await?;
                self.preheat.put_tracked_entity(record);
            }
            Converted::Enrollment(record, owner) => {
                self.write(Write::Enrollment(record.clone())).await?;
                if strategy == ObjectStrategy::Create {
                    if let Some((program, org_unit)) = owner {
                        if self.preheat.add_program_owner(&record.tracked_entity, &program, &org_unit) {
                            self.write(Write::ProgramOwner(ProgramOwner {
                                tracked_entity: record.tracked_entity.clone(),
                                program,
                                org_unit,
                            }))
                            .await?;
                        }
                    }
                }
                self.preheat.put_enrollment(record);
            }
            Converted::Event(record) => {
                self.write(Write::Event(record.clone())).await?;
                self.preheat.put_event(record);
            }
            Converted::Relationship(record) => {
                self.write(Write::Relationship(record.clone())).await?;
                self.touch_relationship_ends(&record).await?;
                self.preheat.add_existing_relationship(record.key.clone());
                if record.bidirectional {
                    self.preheat.add_existing_relationship(record.inverted_key.clone());
                }
                self.preheat.put_relationship(record);
            }
        }
        Ok(())
    }

    /// Bump the update stamps of the tracked entities a relationship connects
    ///
    /// The `to` end is touched only for bidirectional types.
    async fn touch_relationship_ends(&mut self, record: &RelationshipRecord) -> Result<()> {
        let mut ends = vec![record.from.tracked_entity()];
        if record.bidirectional {
            ends.push(record.to.tracked_entity());
        }
        for uid in ends.into_iter().flatten() {
            self.write(Write::TouchTrackedEntity {
                uid: uid.to_string(),
                at: self.audit.now,
                by: self.audit.username.clone(),
            })
            .await?;
        }
        Ok(())
    }

    /// Explicit combo, else resolved from the category options, else the default
    async fn attribute_option_combo(&mut self, ev: &Event) -> Result<CategoryOptionCombo> {
        if let Some(id) = &ev.attribute_option_combo {
            return self
                .preheat
                .get_as::<CategoryOptionCombo>(id)
                .cloned()
                .ok_or_else(|| ImportError::unresolved_metadata(MetadataType::CategoryOptionCombo, id));
        }

        if !ev.attribute_category_options.is_empty() {
            let options: Vec<String> = ev.attribute_category_options.iter().map(|o| o.to_string()).collect();
            let unresolved = || {
                ImportError::unresolved_metadata(
                    MetadataType::CategoryOptionCombo,
                    format!("options [{}]", options.join(", ")),
                )
            };
            let combo = category_combo_of_event(self.preheat, ev).ok_or_else(unresolved)?;
            let id = self
                .preheat
                .resolve_category_option_combo(self.engine.store.as_ref(), &combo, &ev.attribute_category_options)
                .await?
                .ok_or_else(unresolved)?;
            return self
                .preheat
                .get_as::<CategoryOptionCombo>(&id)
                .cloned()
                .ok_or_else(unresolved);
        }

        self.preheat
            .default_of::<CategoryOptionCombo>()
            .cloned()
            .ok_or_else(|| ImportError::unresolved_metadata(MetadataType::CategoryOptionCombo, "default"))
    }

    fn side_effect_descriptor(&self, object: TrackerObject<'_>) -> Option<SideEffectDescriptor> {
        let (rule_effects, program) = match object {
            TrackerObject::Enrollment(en) => (
                self.rule_effects.for_enrollment(&en.enrollment),
                self.preheat.get_as::<Program>(&en.program),
            ),
            TrackerObject::Event(ev) => (self.rule_effects.for_event(&ev.event), self.preheat.program_of_event(ev)),
            TrackerObject::TrackedEntity(_) | TrackerObject::Relationship(_) => return None,
        };
        Some(SideEffectDescriptor {
            tracker_type: object.tracker_type(),
            uid: object.uid().to_string(),
            program: program.map(|p| p.base.uid.clone()),
            rule_effects: rule_effects.to_vec(),
            username: self.audit.username.clone(),
            import_strategy: self.params.import_strategy,
        })
    }

    async fn delete_object(&mut self, tracker_type: TrackerType, uid: &str, current: usize) -> Result<()> {
        if !self.preheat.exists(tracker_type, uid) {
            self.ignore(
                tracker_type,
                current,
                uid,
                FailureKind::NotFound,
                format!("{} {} does not exist", tracker_type, uid),
            );
            return Ok(());
        }

        self.write(Write::Delete {
            tracker_type,
            uid: uid.to_string(),
            at: self.audit.now,
            by: self.audit.username.clone(),
        })
        .await?;
        if tracker_type == TrackerType::Relationship {
            if let Some(record) = self.preheat.relationship(uid).cloned() {
                self.touch_relationship_ends(&record).await?;
            }
        }

        self.record(tracker_type, current, uid, ObjectStrategy::Delete);
        self.flush_object(uid).await
    }
}

enum Converted {
    TrackedEntity(TrackedEntityRecord),
    /// Record and (program UID, org unit UID) for ownership
    Enrollment(EnrollmentRecord, Option<(String, String)>),
    Event(EventRecord),
    Relationship(RelationshipRecord),
}
