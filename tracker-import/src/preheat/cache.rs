//! Preheat cache
//!
//! Everything a bundle commit reads, loaded up front. Metadata is partitioned
//! by kind and keyed by the lookup key of the configured id scheme; objects
//! keyed by attribute value live in their own sub-store. Suppliers populate
//! the cache before validation starts, after which only the commit engine
//! writes to it (records it persisted, relationship keys, ownership).

use super::relationship_key::RelationshipKey;
use crate::error::Result;
use crate::identifier::{resolve, IdSchemeParam, IdSchemeParams, LookupKey, MetadataIdentifier};
use crate::models::{
    CategoryOption, CategoryOptionCombo, EnrollmentRecord, Event, EventRecord, Metadata,
    MetadataObject, MetadataType, Program, ProgramOwner, ProgramStage, RelationshipRecord,
    TrackedEntityRecord, TrackerType, User,
};
use crate::store::TrackerStore;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct KindStore {
    by_identifier: HashMap<String, Arc<Metadata>>,
    by_attribute_value: HashMap<(String, String), Arc<Metadata>>,
    by_uid: HashMap<String, Arc<Metadata>>,
}

type OptionComboKey = (String, BTreeSet<MetadataIdentifier>);

#[derive(Debug, Default)]
pub struct PreheatCache {
    id_schemes: IdSchemeParams,
    metadata: HashMap<MetadataType, KindStore>,
    defaults: HashMap<MetadataType, Arc<Metadata>>,
    /// Memoised option combo lookups, misses included
    option_combos: HashMap<OptionComboKey, Option<MetadataIdentifier>>,
    tracked_entities: HashMap<String, TrackedEntityRecord>,
    enrollments: HashMap<String, EnrollmentRecord>,
    events: HashMap<String, EventRecord>,
    relationships: HashMap<String, RelationshipRecord>,
    existing_relationships: HashSet<String>,
    /// tracked entity → program → owner
    program_owners: HashMap<String, HashMap<String, ProgramOwner>>,
    /// program UID → its single enrollment
    enrollments_without_registration: HashMap<String, EnrollmentRecord>,
    /// username → user
    users: HashMap<String, User>,
    /// user UID → username
    usernames_by_uid: HashMap<String, String>,
    rewrites: usize,
}

impl PreheatCache {
    pub fn new(id_schemes: IdSchemeParams) -> Self {
        Self {
            id_schemes,
            ..Default::default()
        }
    }

    pub fn id_schemes(&self) -> &IdSchemeParams {
        &self.id_schemes
    }

    // ------------------------------------------------------------------
    // Metadata
    // ------------------------------------------------------------------

    /// Store `metadata` under the key `scheme` derives for it
    ///
    /// The object is also indexed by UID for internal references. A key that
    /// already maps to a different object is overwritten and counted in
    /// [`PreheatCache::rewrites`].
    pub fn put(&mut self, scheme: &IdSchemeParam, metadata: Metadata) {
        let kind = metadata.kind();
        let key = scheme.identifier_of(metadata.base());
        let metadata = Arc::new(metadata);
        let store = self.metadata.entry(kind).or_default();

        let previous = match key {
            Some(LookupKey::Identifier(value)) => store.by_identifier.insert(value, Arc::clone(&metadata)),
            Some(LookupKey::AttributeValue { attribute, value }) => store
                .by_attribute_value
                .insert((attribute, value), Arc::clone(&metadata)),
            None => None,
        };
        if let Some(previous) = previous {
            if previous.uid() != metadata.uid() {
                self.rewrites += 1;
                warn!(
                    kind = %kind,
                    previous = previous.uid(),
                    uid = metadata.uid(),
                    "Preheat key rewritten with a different object"
                );
            }
        }
        store.by_uid.insert(metadata.uid().to_string(), metadata);
    }

    /// Index `metadata` by UID only, for objects referenced internally
    pub fn put_by_uid(&mut self, metadata: Metadata) {
        self.metadata
            .entry(metadata.kind())
            .or_default()
            .by_uid
            .entry(metadata.uid().to_string())
            .or_insert_with(|| Arc::new(metadata));
    }

    pub fn put_all(&mut self, scheme: &IdSchemeParam, metadata: impl IntoIterator<Item = Metadata>) {
        for m in metadata {
            self.put(scheme, m);
        }
    }

    /// Look up metadata by a payload identifier; malformed identifiers find nothing
    pub fn get(&self, kind: MetadataType, identifier: &MetadataIdentifier) -> Option<&Metadata> {
        let store = self.metadata.get(&kind)?;
        let found = match resolve(identifier, kind).ok()? {
            LookupKey::Identifier(value) => store.by_identifier.get(&value),
            LookupKey::AttributeValue { attribute, value } => store.by_attribute_value.get(&(attribute, value)),
        };
        found.map(Arc::as_ref)
    }

    pub fn get_as<T: MetadataObject>(&self, identifier: &MetadataIdentifier) -> Option<&T> {
        self.get(T::KIND, identifier).and_then(T::from_metadata)
    }

    /// Look up metadata by UID regardless of the configured scheme
    pub fn get_by_uid<T: MetadataObject>(&self, uid: &str) -> Option<&T> {
        self.metadata
            .get(&T::KIND)?
            .by_uid
            .get(uid)
            .and_then(|m| T::from_metadata(m))
    }

    /// Every cached object of one kind
    pub fn all<T: MetadataObject>(&self) -> Vec<&T> {
        self.metadata
            .get(&T::KIND)
            .map(|store| store.by_uid.values().filter_map(|m| T::from_metadata(m)).collect())
            .unwrap_or_default()
    }

    /// Number of keys that were overwritten with a different object
    pub fn rewrites(&self) -> usize {
        self.rewrites
    }

    pub fn put_default(&mut self, metadata: Metadata) {
        self.defaults.insert(metadata.kind(), Arc::new(metadata));
    }

    pub fn default_of<T: MetadataObject>(&self) -> Option<&T> {
        self.defaults.get(&T::KIND).and_then(|m| T::from_metadata(m))
    }

    /// Resolve the attribute option combo of `category_combo` (UID) made of `options`
    ///
    /// The first call for a given combo and option set queries the store; the
    /// result, found or not, is memoised and later calls are served from the
    /// cache.
    pub async fn resolve_category_option_combo(
        &mut self,
        store: &dyn TrackerStore,
        category_combo: &str,
        options: &BTreeSet<MetadataIdentifier>,
    ) -> Result<Option<MetadataIdentifier>> {
        let key = (category_combo.to_string(), options.clone());
        if let Some(cached) = self.option_combos.get(&key) {
            return Ok(cached.clone());
        }

        let mut option_uids = BTreeSet::new();
        for option in options {
            match self.get_as::<CategoryOption>(option) {
                Some(o) => {
                    option_uids.insert(o.base.uid.clone());
                }
                None => {
                    debug!(category_combo, option = %option, "Unknown category option, option combo not resolvable");
                    self.option_combos.insert(key, None);
                    return Ok(None);
                }
            }
        }

        let found = store.find_category_option_combo(category_combo, &option_uids).await?;
        let identifier = found.map(|coc| {
            let scheme = self.id_schemes.for_kind(MetadataType::CategoryOptionCombo).clone();
            let identifier = scheme.to_metadata_identifier(&coc.base);
            self.put(&scheme, Metadata::CategoryOptionCombo(coc));
            identifier
        });
        self.option_combos.insert(key, identifier.clone());
        Ok(identifier)
    }

    /// Program of an event: the explicit reference, else the program of its stage
    pub fn program_of_event(&self, event: &Event) -> Option<&Program> {
        match &event.program {
            Some(program) => self.get_as::<Program>(program),
            None => {
                let stage = self.get_as::<ProgramStage>(&event.program_stage)?;
                self.get_by_uid::<Program>(&stage.program)
            }
        }
    }

    /// Memoised option combo, if the combination was resolved before
    pub fn cached_category_option_combo(
        &self,
        category_combo: &str,
        options: &BTreeSet<MetadataIdentifier>,
    ) -> Option<&CategoryOptionCombo> {
        let identifier = self
            .option_combos
            .get(&(category_combo.to_string(), options.clone()))?
            .as_ref()?;
        self.get_as(identifier)
    }

    // ------------------------------------------------------------------
    // Tracker objects
    // ------------------------------------------------------------------

    pub fn put_tracked_entity(&mut self, record: TrackedEntityRecord) {
        self.tracked_entities.insert(record.uid.clone(), record);
    }

    pub fn put_enrollment(&mut self, record: EnrollmentRecord) {
        self.enrollments.insert(record.uid.clone(), record);
    }

    pub fn put_event(&mut self, record: EventRecord) {
        self.events.insert(record.uid.clone(), record);
    }

    pub fn put_relationship(&mut self, record: RelationshipRecord) {
        self.relationships.insert(record.uid.clone(), record);
    }

    pub fn tracked_entity(&self, uid: &str) -> Option<&TrackedEntityRecord> {
        self.tracked_entities.get(uid)
    }

    pub fn enrollment(&self, uid: &str) -> Option<&EnrollmentRecord> {
        self.enrollments.get(uid)
    }

    pub fn event(&self, uid: &str) -> Option<&EventRecord> {
        self.events.get(uid)
    }

    pub fn relationship(&self, uid: &str) -> Option<&RelationshipRecord> {
        self.relationships.get(uid)
    }

    /// Whether an object of `tracker_type` with `uid` already exists in storage
    pub fn exists(&self, tracker_type: TrackerType, uid: &str) -> bool {
        match tracker_type {
            TrackerType::TrackedEntity => self.tracked_entities.contains_key(uid),
            TrackerType::Enrollment => self.enrollments.contains_key(uid),
            TrackerType::Event => self.events.contains_key(uid),
            TrackerType::Relationship => self.relationships.contains_key(uid),
        }
    }

    // ------------------------------------------------------------------
    // Relationships
    // ------------------------------------------------------------------

    pub fn add_existing_relationship(&mut self, key: impl Into<String>) {
        self.existing_relationships.insert(key.into());
    }

    /// Whether `key`, or its inverse for bidirectional types, is already taken
    pub fn is_duplicate_relationship(&self, key: &RelationshipKey, bidirectional: bool) -> bool {
        self.existing_relationships.contains(&key.as_string())
            || (bidirectional && self.existing_relationships.contains(&key.inverse().as_string()))
    }

    // ------------------------------------------------------------------
    // Ownership
    // ------------------------------------------------------------------

    /// Record the owner of `tracked_entity` in `program`
    ///
    /// The first owner recorded wins. Returns whether this call recorded it.
    pub fn add_program_owner(&mut self, tracked_entity: &str, program: &str, org_unit: &str) -> bool {
        let owners = self.program_owners.entry(tracked_entity.to_string()).or_default();
        if owners.contains_key(program) {
            return false;
        }
        owners.insert(
            program.to_string(),
            ProgramOwner {
                tracked_entity: tracked_entity.to_string(),
                program: program.to_string(),
                org_unit: org_unit.to_string(),
            },
        );
        true
    }

    pub fn program_owner(&self, tracked_entity: &str, program: &str) -> Option<&ProgramOwner> {
        self.program_owners.get(tracked_entity)?.get(program)
    }

    // ------------------------------------------------------------------
    // Programs without registration
    // ------------------------------------------------------------------

    pub fn put_enrollment_without_registration(&mut self, program: &str, record: EnrollmentRecord) {
        self.enrollments_without_registration.insert(program.to_string(), record);
    }

    pub fn enrollment_without_registration(&self, program: &str) -> Option<&EnrollmentRecord> {
        self.enrollments_without_registration.get(program)
    }

    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    pub fn put_user(&mut self, user: User) {
        self.usernames_by_uid.insert(user.uid.clone(), user.username.clone());
        self.users.insert(user.username.clone(), user);
    }

    pub fn user(&self, username: &str) -> Option<&User> {
        self.users.get(username)
    }

    pub fn user_by_uid(&self, uid: &str) -> Option<&User> {
        self.usernames_by_uid.get(uid).and_then(|username| self.users.get(username))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::IdScheme;
    use crate::models::{CategoryCombo, Identifiable, OrganisationUnit, RelationshipItem};
    use crate::store::InMemoryStore;

    fn org_unit(id: i64, uid: &str, code: &str) -> Metadata {
        Metadata::OrganisationUnit(OrganisationUnit {
            base: Identifiable::new(id, uid, format!("Unit {}", id))
                .with_code(code)
                .with_attribute_value("ExtRefAttr1", format!("EXT-{}", id)),
            path: format!("/{}", uid),
        })
    }

    #[test]
    fn test_get_uses_same_key_derivation_as_put() {
        let code = IdSchemeParam::of(IdScheme::Code);
        let attribute = IdSchemeParam::attribute("ExtRefAttr1");

        let mut cache = PreheatCache::default();
        cache.put(&code, org_unit(1, "DiszpKrYNg8", "OU_1"));
        cache.put(&attribute, org_unit(2, "g8upMTyEZGZ", "OU_2"));

        let by_code = cache.get_as::<OrganisationUnit>(&MetadataIdentifier::of_code("OU_1"));
        assert_eq!(by_code.map(|o| o.base.uid.as_str()), Some("DiszpKrYNg8"));

        let by_attr = cache.get_as::<OrganisationUnit>(&MetadataIdentifier::of_attribute("ExtRefAttr1", "EXT-2"));
        assert_eq!(by_attr.map(|o| o.base.uid.as_str()), Some("g8upMTyEZGZ"));

        // Stored by code, so a UID lookup through the configured scheme misses
        assert!(cache.get(MetadataType::OrganisationUnit, &MetadataIdentifier::of_uid("DiszpKrYNg8")).is_none());
        // but internal references by UID still resolve
        assert!(cache.get_by_uid::<OrganisationUnit>("DiszpKrYNg8").is_some());
    }

    #[test]
    fn test_attribute_values_do_not_collide_with_identifiers() {
        let uid = IdSchemeParam::default();
        let mut cache = PreheatCache::default();
        cache.put(&uid, org_unit(1, "EXT-2", "OU_1"));
        cache.put(&IdSchemeParam::attribute("ExtRefAttr1"), org_unit(2, "g8upMTyEZGZ", "OU_2"));

        let by_uid = cache.get_as::<OrganisationUnit>(&MetadataIdentifier::of_uid("EXT-2")).unwrap();
        assert_eq!(by_uid.base.id, 1);
        let by_attr = cache
            .get_as::<OrganisationUnit>(&MetadataIdentifier::of_attribute("ExtRefAttr1", "EXT-2"))
            .unwrap();
        assert_eq!(by_attr.base.id, 2);
        assert_eq!(cache.rewrites(), 0);
    }

    #[test]
    fn test_malformed_identifier_finds_nothing() {
        let mut cache = PreheatCache::default();
        cache.put(&IdSchemeParam::default(), org_unit(1, "DiszpKrYNg8", "OU_1"));
        let broken = MetadataIdentifier {
            id_scheme: IdScheme::Attribute,
            identifier: None,
            attribute_value: None,
        };
        assert!(cache.get(MetadataType::OrganisationUnit, &broken).is_none());
    }

    #[test]
    fn test_rewrite_with_different_object_is_counted() {
        let name = IdSchemeParam::of(IdScheme::Name);
        let mut cache = PreheatCache::default();
        cache.put(&name, org_unit(1, "DiszpKrYNg8", "OU_1"));
        cache.put(&name, org_unit(1, "DiszpKrYNg8", "OU_1"));
        assert_eq!(cache.rewrites(), 0);

        let mut clash = org_unit(2, "g8upMTyEZGZ", "OU_2");
        if let Metadata::OrganisationUnit(ou) = &mut clash {
            ou.base.name = "Unit 1".to_string();
        }
        cache.put(&name, clash);
        assert_eq!(cache.rewrites(), 1);
    }

    #[test]
    fn test_program_owner_first_write_wins() {
        let mut cache = PreheatCache::default();
        assert!(cache.add_program_owner("PQfMcpmXeFE", "IpHINAT79UW", "DiszpKrYNg8"));
        assert!(!cache.add_program_owner("PQfMcpmXeFE", "IpHINAT79UW", "g8upMTyEZGZ"));
        assert_eq!(
            cache.program_owner("PQfMcpmXeFE", "IpHINAT79UW").map(|o| o.org_unit.as_str()),
            Some("DiszpKrYNg8")
        );
        assert!(cache.add_program_owner("PQfMcpmXeFE", "ur1Edk5Oe2n", "g8upMTyEZGZ"));
    }

    #[test]
    fn test_duplicate_relationship_checks_inverse_only_when_bidirectional() {
        let a = RelationshipItem::TrackedEntity("PQfMcpmXeFE".to_string());
        let b = RelationshipItem::TrackedEntity("dNpxRu1mWG5".to_string());
        let key = RelationshipKey::new("XdP5nwlEGiH", &a, &b);

        let mut cache = PreheatCache::default();
        cache.add_existing_relationship(key.as_string());

        let reversed = RelationshipKey::new("XdP5nwlEGiH", &b, &a);
        assert!(cache.is_duplicate_relationship(&key, false));
        assert!(cache.is_duplicate_relationship(&reversed, true));
        assert!(!cache.is_duplicate_relationship(&reversed, false));
    }

    fn option_combo_store() -> InMemoryStore {
        let store = InMemoryStore::new();
        store.add_metadata(CategoryOption {
            base: Identifiable::new(20, "xYerKDKCefk", "Donor A"),
        });
        store.add_metadata(CategoryOption {
            base: Identifiable::new(21, "yMj2MnmNI8L", "Donor B"),
        });
        store.add_metadata(CategoryCombo {
            base: Identifiable::new(30, "bjDvmb4bfuf", "Funding"),
            is_default: false,
        });
        store.add_metadata(CategoryOptionCombo {
            base: Identifiable::new(40, "HllvX50cXC0", "Donor A, Donor B"),
            category_combo: "bjDvmb4bfuf".to_string(),
            category_options: BTreeSet::from(["xYerKDKCefk".to_string(), "yMj2MnmNI8L".to_string()]),
        });
        store
    }

    fn cache_with_options() -> PreheatCache {
        let mut cache = PreheatCache::default();
        let uid = IdSchemeParam::default();
        cache.put(
            &uid,
            Metadata::CategoryOption(CategoryOption {
                base: Identifiable::new(20, "xYerKDKCefk", "Donor A"),
            }),
        );
        cache.put(
            &uid,
            Metadata::CategoryOption(CategoryOption {
                base: Identifiable::new(21, "yMj2MnmNI8L", "Donor B"),
            }),
        );
        cache
    }

    #[tokio::test]
    async fn test_option_combo_lookup_is_memoised() {
        let store = option_combo_store();
        let stats = store.stats();
        let mut cache = cache_with_options();
        let options = BTreeSet::from([
            MetadataIdentifier::of_uid("xYerKDKCefk"),
            MetadataIdentifier::of_uid("yMj2MnmNI8L"),
        ]);

        let first = cache
            .resolve_category_option_combo(&store, "bjDvmb4bfuf", &options)
            .await
            .unwrap();
        let second = cache
            .resolve_category_option_combo(&store, "bjDvmb4bfuf", &options)
            .await
            .unwrap();

        assert_eq!(first, Some(MetadataIdentifier::of_uid("HllvX50cXC0")));
        assert_eq!(first, second);
        assert_eq!(stats.category_option_combo_queries(), 1);
        assert_eq!(
            cache
                .cached_category_option_combo("bjDvmb4bfuf", &options)
                .map(|c| c.base.id),
            Some(40)
        );
    }

    #[tokio::test]
    async fn test_option_combo_miss_is_memoised() {
        let store = option_combo_store();
        let stats = store.stats();
        let mut cache = cache_with_options();
        let options = BTreeSet::from([MetadataIdentifier::of_uid("xYerKDKCefk")]);

        for _ in 0..3 {
            let found = cache
                .resolve_category_option_combo(&store, "bjDvmb4bfuf", &options)
                .await
                .unwrap();
            assert_eq!(found, None);
        }
        assert_eq!(stats.category_option_combo_queries(), 1);
    }

    #[tokio::test]
    async fn test_option_combo_with_unknown_option_skips_store() {
        let store = option_combo_store();
        let stats = store.stats();
        let mut cache = cache_with_options();
        let options = BTreeSet::from([MetadataIdentifier::of_uid("NotAnOption")]);

        let found = cache
            .resolve_category_option_combo(&store, "bjDvmb4bfuf", &options)
            .await
            .unwrap();
        assert_eq!(found, None);
        assert_eq!(stats.category_option_combo_queries(), 0);
    }

    #[test]
    fn test_users_found_by_username_and_uid() {
        let mut cache = PreheatCache::default();
        let user = User {
            id: 7,
            uid: "M5zQapPyTZI".to_string(),
            username: "admin".to_string(),
        };

        cache.put_user(user.clone());

        assert_eq!(cache.user("admin"), Some(&user));
        assert_eq!(cache.user_by_uid("M5zQapPyTZI"), Some(&user));
        assert!(cache.user_by_uid("admin").is_none());
        assert!(cache.user("M5zQapPyTZI").is_none());
    }
}
