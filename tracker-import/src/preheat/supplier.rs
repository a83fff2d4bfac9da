//! Preheat supplier trait

use super::cache::PreheatCache;
use crate::error::Result;
use crate::models::{ImportParams, TrackerPayload};
use crate::store::TrackerStore;
use async_trait::async_trait;

/// Loads one slice of the data a commit needs into the preheat cache
///
/// Suppliers run one after another in registration order. A supplier may read
/// what earlier suppliers put in the cache, never what later ones will.
#[async_trait]
pub trait PreheatSupplier: Send + Sync {
    /// Supplier name for logging and error attribution
    fn name(&self) -> &'static str;

    /// Populate `cache` with the data `payload` refers to
    ///
    /// # Returns
    /// * `Ok(())` - Data loaded; entries absent from storage are simply not cached
    /// * `Err(_)` - Loading failed; the orchestrator applies its failure policy
    async fn add(
        &self,
        store: &dyn TrackerStore,
        params: &ImportParams,
        payload: &TrackerPayload,
        cache: &mut PreheatCache,
    ) -> Result<()>;
}
