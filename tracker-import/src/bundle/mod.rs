//! Tracker bundle and its commit engine
//!
//! A bundle is the unit of work of one import: parameters, payload, preheat
//! cache and precomputed rule effects. The [`BundleCommitEngine`] persists it
//! in one transaction.

pub mod commit;
pub mod converter;
pub mod hooks;

use crate::models::{
    FailureKind, ImportParams, ImportStrategy, RuleEffects, TrackerPayload, TrackerType, User,
};
use crate::preheat::PreheatCache;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub use commit::BundleCommitEngine;
pub use hooks::{CacheInvalidator, CommitHook, HookContext};

/// What happens to one object under the bundle's import strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObjectStrategy {
    Create,
    Update,
    Delete,
}

/// Decide the per-object strategy from the import strategy and existence
///
/// CREATE_AND_UPDATE resolves per object. Inapplicable combinations return
/// the failure the object is rejected with.
pub fn resolve_strategy(strategy: ImportStrategy, exists: bool) -> Result<ObjectStrategy, FailureKind> {
    match (strategy, exists) {
        (ImportStrategy::Create, false) | (ImportStrategy::CreateAndUpdate, false) => Ok(ObjectStrategy::Create),
        (ImportStrategy::Create, true) => Err(FailureKind::AlreadyExists),
        (ImportStrategy::Update, true) | (ImportStrategy::CreateAndUpdate, true) => Ok(ObjectStrategy::Update),
        (ImportStrategy::Delete, true) => Ok(ObjectStrategy::Delete),
        (ImportStrategy::Update, false) | (ImportStrategy::Delete, false) => Err(FailureKind::NotFound),
    }
}

#[derive(Debug)]
pub struct TrackerBundle {
    pub params: ImportParams,
    pub payload: TrackerPayload,
    pub preheat: PreheatCache,
    pub rule_effects: RuleEffects,
    /// Submitted payload position of every object still in `payload`, per type
    positions: HashMap<TrackerType, Vec<usize>>,
}

impl TrackerBundle {
    pub fn new(params: ImportParams, payload: TrackerPayload, preheat: PreheatCache, rule_effects: RuleEffects) -> Self {
        let positions = TrackerType::COMMIT_ORDER
            .into_iter()
            .map(|tracker_type| (tracker_type, (0..payload.uids(tracker_type).len()).collect()))
            .collect();
        Self {
            params,
            payload,
            preheat,
            rule_effects,
            positions,
        }
    }

    /// Submitted position of the object currently at `current` in its payload list
    pub fn position(&self, tracker_type: TrackerType, current: usize) -> Option<usize> {
        self.positions.get(&tracker_type).and_then(|p| p.get(current)).copied()
    }

    /// Submitted position of the first object with `uid`
    pub fn index_of(&self, tracker_type: TrackerType, uid: &str) -> Option<usize> {
        let current = self.payload.uids(tracker_type).iter().position(|u| *u == uid)?;
        self.position(tracker_type, current)
    }

    /// Keep the objects of one type for which `keep` says true, in order
    pub(crate) fn retain(&mut self, tracker_type: TrackerType, keep: &[bool]) {
        let kept = |i: usize| keep.get(i).copied().unwrap_or(true);
        let mut i = 0;
        let mut next = move || {
            let k = kept(i);
            i += 1;
            k
        };
        if let Some(positions) = self.positions.get_mut(&tracker_type) {
            let mut next = next.clone();
            positions.retain(|_| next());
        }
        let payload = &mut self.payload;
        match tracker_type {
            TrackerType::TrackedEntity => payload.tracked_entities.retain(|_| next()),
            TrackerType::Enrollment => payload.enrollments.retain(|_| next()),
            TrackerType::Event => payload.events.retain(|_| next()),
            TrackerType::Relationship => payload.relationships.retain(|_| next()),
        }
    }

    pub fn username(&self) -> Option<&str> {
        self.params.user.as_deref()
    }

    /// The importing user, if preheat found it
    pub fn user(&self) -> Option<&User> {
        self.username().and_then(|u| self.preheat.user(u))
    }
}
