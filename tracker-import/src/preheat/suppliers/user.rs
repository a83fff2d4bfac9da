//! User supplier

use crate::error::Result;
use crate::models::{ImportParams, TrackerPayload};
use crate::preheat::{PreheatCache, PreheatSupplier};
use crate::store::TrackerStore;
use async_trait::async_trait;
use std::collections::BTreeSet;

/// The importing user and every user assigned to a payload event
pub struct UserSupplier;

#[async_trait]
impl PreheatSupplier for UserSupplier {
    fn name(&self) -> &'static str {
        "users"
    }

    async fn add(
        &self,
        store: &dyn TrackerStore,
        params: &ImportParams,
        payload: &TrackerPayload,
        cache: &mut PreheatCache,
    ) -> Result<()> {
        let usernames: BTreeSet<String> = params
            .user
            .iter()
            .cloned()
            .chain(payload.events.iter().filter_map(|ev| ev.assigned_user.clone()))
            .collect();
        if usernames.is_empty() {
            return Ok(());
        }

        let usernames: Vec<String> = usernames.into_iter().collect();
        for user in store.find_users(&usernames).await? {
            cache.put_user(user);
        }
        Ok(())
    }
}
