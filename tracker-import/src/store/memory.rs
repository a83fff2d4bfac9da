//! In-memory [`TrackerStore`]
//!
//! Keeps everything behind a mutex and counts every query and write, which
//! lets tests assert on how the pipeline talks to storage. Writes for a
//! configured UID can be made to fail to exercise rollback.

use super::{StoreTransaction, TrackerStore, Write};
use crate::identifier::{IdSchemeParam, LookupKey};
use crate::models::{
    CategoryOptionCombo, EnrollmentRecord, EventRecord, Metadata, MetadataType, ProgramOwner,
    RelationshipRecord, TrackedEntityRecord, TrackerType, User,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracker_common::{Error, Result};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Query and write counters
#[derive(Debug, Default)]
pub struct StoreStats {
    queries: AtomicUsize,
    category_option_combo_queries: AtomicUsize,
    persists: AtomicUsize,
    flushes: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
    writes: Mutex<Vec<Write>>,
}

impl StoreStats {
    /// Read queries of any kind, including option combo lookups
    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn category_option_combo_queries(&self) -> usize {
        self.category_option_combo_queries.load(Ordering::SeqCst)
    }

    pub fn persists(&self) -> usize {
        self.persists.load(Ordering::SeqCst)
    }

    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }

    /// Every accepted write in persist order, committed or not
    pub fn writes(&self) -> Vec<Write> {
        lock(&self.writes).clone()
    }

    fn query(&self) {
        self.queries.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    metadata: Vec<Metadata>,
    users: Vec<User>,
    tracked_entities: BTreeMap<String, TrackedEntityRecord>,
    enrollments: BTreeMap<String, EnrollmentRecord>,
    events: BTreeMap<String, EventRecord>,
    relationships: BTreeMap<String, RelationshipRecord>,
    program_owners: BTreeMap<(String, String), ProgramOwner>,
    failing_writes: HashSet<String>,
    failing_queries: HashSet<&'static str>,
}

impl MemoryState {
    fn check_query(&self, name: &'static str) -> Result<()> {
        if self.failing_queries.contains(name) {
            return Err(Error::Internal(format!("query '{}' failed", name)));
        }
        Ok(())
    }

    fn has_tracked_entity(&self, uid: &str) -> bool {
        self.tracked_entities.get(uid).is_some_and(|r| !r.deleted)
    }

    fn apply(&mut self, write: Write) {
        match write {
            Write::TrackedEntity(r) => {
                self.tracked_entities.insert(r.uid.clone(), r);
            }
            Write::Enrollment(r) => {
                self.enrollments.insert(r.uid.clone(), r);
            }
            Write::Event(r) => {
                self.events.insert(r.uid.clone(), r);
            }
            Write::Relationship(r) => {
                self.relationships.insert(r.uid.clone(), r);
            }
            Write::ProgramOwner(o) => {
                self.program_owners
                    .entry((o.tracked_entity.clone(), o.program.clone()))
                    .or_insert(o);
            }
            Write::Delete { tracker_type, uid, at, by } => {
                let audit = match tracker_type {
                    TrackerType::TrackedEntity => self.tracked_entities.get_mut(&uid).map(|r| {
                        r.deleted = true;
                        &mut r.audit
                    }),
                    TrackerType::Enrollment => self.enrollments.get_mut(&uid).map(|r| {
                        r.deleted = true;
                        &mut r.audit
                    }),
                    TrackerType::Event => self.events.get_mut(&uid).map(|r| {
                        r.deleted = true;
                        &mut r.audit
                    }),
                    TrackerType::Relationship => self.relationships.get_mut(&uid).map(|r| {
                        r.deleted = true;
                        &mut r.audit
                    }),
                };
                if let Some(audit) = audit {
                    audit.last_updated = at;
                    audit.last_updated_by = by;
                }
            }
            Write::TouchTrackedEntity { uid, at, by } => {
                if let Some(r) = self.tracked_entities.get_mut(&uid) {
                    r.audit.last_updated = at;
                    r.audit.last_updated_by = by;
                }
            }
        }
    }
}

fn live<'a, R: 'a>(
    map: &'a BTreeMap<String, R>,
    uids: &'a [String],
    deleted: fn(&R) -> bool,
) -> impl Iterator<Item = &'a R> {
    uids.iter()
        .filter_map(move |uid| map.get(uid))
        .filter(move |r| !deleted(r))
}

/// Mutex-backed store for tests and dry runs
#[derive(Debug, Default, Clone)]
pub struct InMemoryStore {
    state: Arc<Mutex<MemoryState>>,
    stats: Arc<StoreStats>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> Arc<StoreStats> {
        Arc::clone(&self.stats)
    }

    pub fn add_metadata(&self, metadata: impl Into<Metadata>) {
        lock(&self.state).metadata.push(metadata.into());
    }

    pub fn add_user(&self, user: User) {
        lock(&self.state).users.push(user);
    }

    pub fn add_tracked_entity(&self, record: TrackedEntityRecord) {
        lock(&self.state).apply(Write::TrackedEntity(record));
    }

    pub fn add_enrollment(&self, record: EnrollmentRecord) {
        lock(&self.state).apply(Write::Enrollment(record));
    }

    pub fn add_event(&self, record: EventRecord) {
        lock(&self.state).apply(Write::Event(record));
    }

    pub fn add_relationship(&self, record: RelationshipRecord) {
        lock(&self.state).apply(Write::Relationship(record));
    }

    pub fn add_program_owner(&self, owner: ProgramOwner) {
        lock(&self.state).apply(Write::ProgramOwner(owner));
    }

    /// Make every write of `uid` fail
    pub fn fail_writes_for(&self, uid: impl Into<String>) {
        lock(&self.state).failing_writes.insert(uid.into());
    }

    /// Make a read query fail; names match the `find_*` method without the prefix
    pub fn fail_query(&self, name: &'static str) {
        lock(&self.state).failing_queries.insert(name);
    }

    pub fn tracked_entity(&self, uid: &str) -> Option<TrackedEntityRecord> {
        lock(&self.state).tracked_entities.get(uid).cloned()
    }

    pub fn enrollment(&self, uid: &str) -> Option<EnrollmentRecord> {
        lock(&self.state).enrollments.get(uid).cloned()
    }

    pub fn event(&self, uid: &str) -> Option<EventRecord> {
        lock(&self.state).events.get(uid).cloned()
    }

    pub fn relationship(&self, uid: &str) -> Option<RelationshipRecord> {
        lock(&self.state).relationships.get(uid).cloned()
    }

    pub fn relationship_count(&self) -> usize {
        lock(&self.state).relationships.values().filter(|r| !r.deleted).count()
    }

    pub fn program_owner(&self, tracked_entity: &str, program: &str) -> Option<ProgramOwner> {
        lock(&self.state)
            .program_owners
            .get(&(tracked_entity.to_string(), program.to_string()))
            .cloned()
    }
}

#[async_trait]
impl TrackerStore for InMemoryStore {
    async fn find_defaults(&self) -> Result<Vec<Metadata>> {
        self.stats.query();
        let state = lock(&self.state);
        state.check_query("defaults")?;
        Ok(state
            .metadata
            .iter()
            .filter(|m| {
                matches!(
                    m.kind(),
                    MetadataType::CategoryCombo | MetadataType::CategoryOption | MetadataType::CategoryOptionCombo
                ) && m.base().name == "default"
            })
            .cloned()
            .collect())
    }

    async fn find_metadata(
        &self,
        kind: MetadataType,
        scheme: &IdSchemeParam,
        values: &[String],
    ) -> Result<Vec<Metadata>> {
        self.stats.query();
        let state = lock(&self.state);
        state.check_query("metadata")?;
        Ok(state
            .metadata
            .iter()
            .filter(|m| m.kind() == kind)
            .filter(|m| match scheme.identifier_of(m.base()) {
                Some(LookupKey::Identifier(v)) | Some(LookupKey::AttributeValue { value: v, .. }) => {
                    values.contains(&v)
                }
                None => false,
            })
            .cloned()
            .collect())
    }

    async fn find_category_option_combo(
        &self,
        category_combo: &str,
        options: &BTreeSet<String>,
    ) -> Result<Option<CategoryOptionCombo>> {
        self.stats.query();
        self.stats
            .category_option_combo_queries
            .fetch_add(1, Ordering::SeqCst);
        let state = lock(&self.state);
        state.check_query("category_option_combo")?;
        Ok(state.metadata.iter().find_map(|m| match m {
            Metadata::CategoryOptionCombo(coc)
                if coc.category_combo == category_combo && &coc.category_options == options =>
            {
                Some(coc.clone())
            }
            _ => None,
        }))
    }

    async fn find_users(&self, usernames: &[String]) -> Result<Vec<User>> {
        self.stats.query();
        let state = lock(&self.state);
        state.check_query("users")?;
        Ok(state
            .users
            .iter()
            .filter(|u| usernames.contains(&u.username))
            .cloned()
            .collect())
    }

    async fn find_tracked_entities(&self, uids: &[String]) -> Result<Vec<TrackedEntityRecord>> {
        self.stats.query();
        let state = lock(&self.state);
        state.check_query("tracked_entities")?;
        Ok(live(&state.tracked_entities, uids, |r| r.deleted).cloned().collect())
    }

    async fn find_enrollments(&self, uids: &[String]) -> Result<Vec<EnrollmentRecord>> {
        self.stats.query();
        let state = lock(&self.state);
        state.check_query("enrollments")?;
        Ok(live(&state.enrollments, uids, |r| r.deleted).cloned().collect())
    }

    async fn find_events(&self, uids: &[String]) -> Result<Vec<EventRecord>> {
        self.stats.query();
        let state = lock(&self.state);
        state.check_query("events")?;
        Ok(live(&state.events, uids, |r| r.deleted).cloned().collect())
    }

    async fn find_relationships(&self, uids: &[String]) -> Result<Vec<RelationshipRecord>> {
        self.stats.query();
        let state = lock(&self.state);
        state.check_query("relationships")?;
        Ok(live(&state.relationships, uids, |r| r.deleted).cloned().collect())
    }

    async fn find_relationships_by_keys(&self, keys: &[String]) -> Result<Vec<RelationshipRecord>> {
        self.stats.query();
        let state = lock(&self.state);
        state.check_query("relationships_by_keys")?;
        Ok(state
            .relationships
            .values()
            .filter(|r| !r.deleted && (keys.contains(&r.key) || keys.contains(&r.inverted_key)))
            .cloned()
            .collect())
    }

    async fn find_program_owners(&self, tracked_entities: &[String]) -> Result<Vec<ProgramOwner>> {
        self.stats.query();
        let state = lock(&self.state);
        state.check_query("program_owners")?;
        Ok(state
            .program_owners
            .values()
            .filter(|o| tracked_entities.contains(&o.tracked_entity))
            .cloned()
            .collect())
    }

    async fn find_enrollments_without_registration(&self, program_ids: &[i64]) -> Result<Vec<EnrollmentRecord>> {
        self.stats.query();
        let state = lock(&self.state);
        state.check_query("enrollments_without_registration")?;
        let mut seen = HashSet::new();
        Ok(state
            .enrollments
            .values()
            .filter(|r| !r.deleted && program_ids.contains(&r.program_id))
            .filter(|r| seen.insert(r.program_id))
            .cloned()
            .collect())
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        Ok(Box::new(InMemoryTransaction {
            state: Arc::clone(&self.state),
            stats: Arc::clone(&self.stats),
            pending: Vec::new(),
            flushed: Vec::new(),
        }))
    }
}

struct InMemoryTransaction {
    state: Arc<Mutex<MemoryState>>,
    stats: Arc<StoreStats>,
    pending: Vec<Write>,
    flushed: Vec<Write>,
}

impl InMemoryTransaction {
    fn writes_tracked_entity(&self, uid: &str) -> bool {
        self.flushed
            .iter()
            .chain(self.pending.iter())
            .any(|w| matches!(w, Write::TrackedEntity(r) if r.uid == uid))
    }

    fn check(&self, write: &Write) -> Result<()> {
        let state = lock(&self.state);
        if state.failing_writes.contains(write.uid()) {
            return Err(Error::Internal(format!("write rejected for {}", write.uid())));
        }
        if let Write::Enrollment(r) = write {
            if !state.has_tracked_entity(&r.tracked_entity) && !self.writes_tracked_entity(&r.tracked_entity) {
                return Err(Error::InvalidInput(format!(
                    "enrollment {} references missing tracked entity {}",
                    r.uid, r.tracked_entity
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn persist(&mut self, write: Write) -> Result<()> {
        self.check(&write)?;
        self.stats.persists.fetch_add(1, Ordering::SeqCst);
        lock(&self.stats.writes).push(write.clone());
        self.pending.push(write);
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        self.stats.flushes.fetch_add(1, Ordering::SeqCst);
        self.flushed.append(&mut self.pending);
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        self.flushed.append(&mut self.pending);
        let mut state = lock(&self.state);
        for write in self.flushed.drain(..) {
            state.apply(write);
        }
        self.stats.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.stats.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
