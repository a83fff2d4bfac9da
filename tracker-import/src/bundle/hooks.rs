//! Commit hooks and cache invalidation
//!
//! Hooks observe the commit; they cannot veto it. Pre-create hooks run for
//! every object whose strategy applies, before conversion; an object that
//! then fails conversion is ignored and gets no post-create call.
//! Post-create hooks run only for persisted objects, post-commit hooks once
//! after the transaction commits.

use super::ObjectStrategy;
use crate::models::{ImportParams, PersistenceReport, TrackerObject};
use crate::preheat::PreheatCache;

pub struct HookContext<'a> {
    pub params: &'a ImportParams,
    pub preheat: &'a PreheatCache,
    pub strategy: ObjectStrategy,
}

pub trait CommitHook: Send + Sync {
    fn name(&self) -> &'static str;

    /// Before the object is converted and persisted
    fn pre_create(&self, _object: TrackerObject<'_>, _ctx: &HookContext<'_>) {}

    /// After the object is persisted and its side effects dispatched
    fn post_create(&self, _object: TrackerObject<'_>, _ctx: &HookContext<'_>) {}

    /// After the transaction committed
    fn post_commit(&self, _report: &PersistenceReport, _params: &ImportParams) {}
}

/// Drops application caches that may hold data the commit changed
///
/// Invoked exactly once per successful commit, after post-commit hooks.
pub trait CacheInvalidator: Send + Sync {
    fn name(&self) -> &'static str;

    fn invalidate(&self, report: &PersistenceReport);
}
