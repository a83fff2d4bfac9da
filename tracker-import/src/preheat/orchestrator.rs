//! Preheat orchestrator
//!
//! Runs every registered supplier against a fresh cache, in order. Under
//! `fail-fast` the first failing supplier aborts the preheat; under
//! `best-effort` the failure is logged and the gaps surface later as
//! unresolved references.

use super::cache::PreheatCache;
use super::supplier::PreheatSupplier;
use super::suppliers::standard_suppliers;
use crate::error::{ImportError, Result};
use crate::models::{ImportParams, TrackerPayload};
use crate::store::TrackerStore;
use std::time::Instant;
use tracing::{debug, info, warn};
use tracker_common::config::PreheatFailurePolicy;

pub struct PreheatOrchestrator {
    suppliers: Vec<Box<dyn PreheatSupplier>>,
    policy: PreheatFailurePolicy,
}

impl PreheatOrchestrator {
    /// Orchestrator with the standard supplier chain
    pub fn new(policy: PreheatFailurePolicy) -> Self {
        Self::with_suppliers(standard_suppliers(), policy)
    }

    pub fn with_suppliers(suppliers: Vec<Box<dyn PreheatSupplier>>, policy: PreheatFailurePolicy) -> Self {
        Self { suppliers, policy }
    }

    pub fn policy(&self) -> PreheatFailurePolicy {
        self.policy
    }

    pub fn supplier_names(&self) -> Vec<&'static str> {
        self.suppliers.iter().map(|s| s.name()).collect()
    }

    /// Build the preheat cache for `payload`
    pub async fn preheat(
        &self,
        store: &dyn TrackerStore,
        params: &ImportParams,
        payload: &TrackerPayload,
    ) -> Result<PreheatCache> {
        params.id_schemes.validate()?;

        let start = Instant::now();
        let mut cache = PreheatCache::new(params.id_schemes.clone());
        let mut failed = 0usize;

        for supplier in &self.suppliers {
            let supplier_start = Instant::now();
            match supplier.add(store, params, payload, &mut cache).await {
                Ok(()) => {
                    debug!(
                        supplier = supplier.name(),
                        elapsed_ms = supplier_start.elapsed().as_millis() as u64,
                        "Supplier finished"
                    );
                }
                Err(e) => match self.policy {
                    PreheatFailurePolicy::FailFast => {
                        return Err(ImportError::Preheat {
                            supplier: supplier.name(),
                            source: Box::new(e),
                        });
                    }
                    PreheatFailurePolicy::BestEffort => {
                        failed += 1;
                        warn!(
                            supplier = supplier.name(),
                            error = %e,
                            "Preheat supplier failed, continuing with partial cache"
                        );
                    }
                },
            }
        }

        info!(
            suppliers = self.suppliers.len(),
            failed,
            objects = payload.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Preheat complete"
        );
        Ok(cache)
    }
}
