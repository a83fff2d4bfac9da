//! Metadata suppliers

use crate::error::Result;
use crate::identifier::{IdSchemeParam, MetadataIdentifier};
use crate::models::{
    CategoryCombo, Event, ImportParams, MetadataType, Program, ProgramStage, TrackerPayload,
};
use crate::preheat::{PreheatCache, PreheatSupplier};
use crate::store::TrackerStore;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// Default category combo, option and option combo
pub struct DefaultsSupplier;

#[async_trait]
impl PreheatSupplier for DefaultsSupplier {
    fn name(&self) -> &'static str {
        "defaults"
    }

    async fn add(
        &self,
        store: &dyn TrackerStore,
        _params: &ImportParams,
        _payload: &TrackerPayload,
        cache: &mut PreheatCache,
    ) -> Result<()> {
        for metadata in store.find_defaults().await? {
            cache.put_by_uid(metadata.clone());
            cache.put_default(metadata);
        }
        Ok(())
    }
}

/// Identifiers of one metadata kind referenced anywhere in the payload
pub fn referenced_identifiers(kind: MetadataType, payload: &TrackerPayload) -> BTreeSet<&MetadataIdentifier> {
    let mut ids = BTreeSet::new();
    match kind {
        MetadataType::OrganisationUnit => {
            ids.extend(payload.tracked_entities.iter().map(|te| &te.org_unit));
            ids.extend(payload.enrollments.iter().map(|en| &en.org_unit));
            ids.extend(payload.events.iter().map(|ev| &ev.org_unit));
        }
        MetadataType::Program => {
            ids.extend(payload.enrollments.iter().map(|en| &en.program));
            ids.extend(payload.events.iter().filter_map(|ev| ev.program.as_ref()));
        }
        MetadataType::ProgramStage => {
            ids.extend(payload.events.iter().map(|ev| &ev.program_stage));
        }
        MetadataType::TrackedEntityType => {
            ids.extend(payload.tracked_entities.iter().map(|te| &te.tracked_entity_type));
        }
        MetadataType::TrackedEntityAttribute => {
            ids.extend(
                payload
                    .tracked_entities
                    .iter()
                    .flat_map(|te| te.attributes.iter().map(|a| &a.attribute)),
            );
        }
        MetadataType::DataElement => {
            ids.extend(
                payload
                    .events
                    .iter()
                    .flat_map(|ev| ev.data_values.iter().map(|dv| &dv.data_element)),
            );
        }
        MetadataType::RelationshipType => {
            ids.extend(payload.relationships.iter().map(|r| &r.relationship_type));
        }
        MetadataType::CategoryOption => {
            ids.extend(payload.events.iter().flat_map(|ev| ev.attribute_category_options.iter()));
        }
        MetadataType::CategoryOptionCombo => {
            ids.extend(payload.events.iter().filter_map(|ev| ev.attribute_option_combo.as_ref()));
        }
        // Reached through programs, never referenced directly
        MetadataType::CategoryCombo => {}
    }
    ids
}

/// Loads every object of one kind the payload references
///
/// Identifiers are grouped by the scheme they are expressed in and each group
/// is fetched with one bulk query.
pub struct MetadataSupplier {
    kind: MetadataType,
}

impl MetadataSupplier {
    pub fn new(kind: MetadataType) -> Self {
        Self { kind }
    }

    /// One supplier per kind referenced by payloads
    pub fn all() -> Vec<Self> {
        MetadataType::ALL
            .into_iter()
            .filter(|kind| *kind != MetadataType::CategoryCombo)
            .map(Self::new)
            .collect()
    }
}

#[async_trait]
impl PreheatSupplier for MetadataSupplier {
    fn name(&self) -> &'static str {
        self.kind.as_str()
    }

    async fn add(
        &self,
        store: &dyn TrackerStore,
        _params: &ImportParams,
        payload: &TrackerPayload,
        cache: &mut PreheatCache,
    ) -> Result<()> {
        let mut groups: HashMap<IdSchemeParam, BTreeSet<String>> = HashMap::new();
        for id in referenced_identifiers(self.kind, payload) {
            // Malformed identifiers are reported by validation
            if let Some(value) = id.lookup_value() {
                groups.entry(id.scheme_param()).or_default().insert(value.to_string());
            }
        }

        for (scheme, values) in groups {
            let values: Vec<String> = values.into_iter().collect();
            let found = store.find_metadata(self.kind, &scheme, &values).await?;
            debug!(
                kind = %self.kind,
                scheme = ?scheme.id_scheme,
                requested = values.len(),
                found = found.len(),
                "Preheated metadata"
            );
            cache.put_all(&scheme, found);
        }
        Ok(())
    }
}

/// Programs of referenced program stages, and category combos of all cached programs
pub struct ProgramDependencySupplier;

#[async_trait]
impl PreheatSupplier for ProgramDependencySupplier {
    fn name(&self) -> &'static str {
        "program_dependencies"
    }

    async fn add(
        &self,
        store: &dyn TrackerStore,
        _params: &ImportParams,
        _payload: &TrackerPayload,
        cache: &mut PreheatCache,
    ) -> Result<()> {
        let uid = IdSchemeParam::default();

        let programs: Vec<String> = cache
            .all::<ProgramStage>()
            .into_iter()
            .map(|stage| stage.program.clone())
            .filter(|program| cache.get_by_uid::<Program>(program).is_none())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if !programs.is_empty() {
            let found = store.find_metadata(MetadataType::Program, &uid, &programs).await?;
            let scheme = cache.id_schemes().for_kind(MetadataType::Program).clone();
            cache.put_all(&scheme, found);
        }

        let combos: Vec<String> = cache
            .all::<Program>()
            .into_iter()
            .filter_map(|program| program.category_combo.clone())
            .filter(|combo| cache.get_by_uid::<CategoryCombo>(combo).is_none())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if !combos.is_empty() {
            let found = store.find_metadata(MetadataType::CategoryCombo, &uid, &combos).await?;
            let scheme = cache.id_schemes().for_kind(MetadataType::CategoryCombo).clone();
            cache.put_all(&scheme, found);
        }
        Ok(())
    }
}

/// Resolves attribute option combos of events that only carry category options
pub struct CategoryOptionComboSupplier;

#[async_trait]
impl PreheatSupplier for CategoryOptionComboSupplier {
    fn name(&self) -> &'static str {
        "category_option_combos"
    }

    async fn add(
        &self,
        store: &dyn TrackerStore,
        _params: &ImportParams,
        payload: &TrackerPayload,
        cache: &mut PreheatCache,
    ) -> Result<()> {
        for event in payload
            .events
            .iter()
            .filter(|ev| ev.attribute_option_combo.is_none() && !ev.attribute_category_options.is_empty())
        {
            let Some(combo) = category_combo_of_event(cache, event) else {
                continue;
            };
            cache
                .resolve_category_option_combo(store, &combo, &event.attribute_category_options)
                .await?;
        }
        Ok(())
    }
}

/// Attribute category combo UID for an event: its program's, else the default
pub fn category_combo_of_event(cache: &PreheatCache, event: &Event) -> Option<String> {
    cache
        .program_of_event(event)
        .and_then(|program| program.category_combo.clone())
        .or_else(|| cache.default_of::<CategoryCombo>().map(|c| c.base.uid.clone()))
}
