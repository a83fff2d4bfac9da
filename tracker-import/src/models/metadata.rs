//! Metadata objects referenced by tracker payloads
//!
//! Metadata is read-only during an import. Every object shares the
//! [`Identifiable`] core so the identifier resolver can derive its cache key
//! under any id scheme.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Metadata kinds the preheat cache is partitioned by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MetadataType {
    OrganisationUnit,
    Program,
    ProgramStage,
    TrackedEntityType,
    TrackedEntityAttribute,
    DataElement,
    RelationshipType,
    CategoryCombo,
    CategoryOption,
    CategoryOptionCombo,
}

impl MetadataType {
    pub const ALL: [MetadataType; 10] = [
        MetadataType::OrganisationUnit,
        MetadataType::Program,
        MetadataType::ProgramStage,
        MetadataType::TrackedEntityType,
        MetadataType::TrackedEntityAttribute,
        MetadataType::DataElement,
        MetadataType::RelationshipType,
        MetadataType::CategoryCombo,
        MetadataType::CategoryOption,
        MetadataType::CategoryOptionCombo,
    ];

    /// Value of the `kind` column in storage
    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataType::OrganisationUnit => "ORGANISATION_UNIT",
            MetadataType::Program => "PROGRAM",
            MetadataType::ProgramStage => "PROGRAM_STAGE",
            MetadataType::TrackedEntityType => "TRACKED_ENTITY_TYPE",
            MetadataType::TrackedEntityAttribute => "TRACKED_ENTITY_ATTRIBUTE",
            MetadataType::DataElement => "DATA_ELEMENT",
            MetadataType::RelationshipType => "RELATIONSHIP_TYPE",
            MetadataType::CategoryCombo => "CATEGORY_COMBO",
            MetadataType::CategoryOption => "CATEGORY_OPTION",
            MetadataType::CategoryOptionCombo => "CATEGORY_OPTION_COMBO",
        }
    }
}

impl fmt::Display for MetadataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetadataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MetadataType::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown metadata type '{}'", s))
    }
}

/// Fields shared by every metadata object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identifiable {
    /// Storage primary key
    pub id: i64,
    pub uid: String,
    #[serde(default)]
    pub code: Option<String>,
    pub name: String,
    /// Attribute UID → value
    #[serde(default)]
    pub attribute_values: BTreeMap<String, String>,
}

impl Identifiable {
    pub fn new(id: i64, uid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id,
            uid: uid.into(),
            code: None,
            name: name.into(),
            attribute_values: BTreeMap::new(),
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_attribute_value(mut self, attribute: impl Into<String>, value: impl Into<String>) -> Self {
        self.attribute_values.insert(attribute.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganisationUnit {
    #[serde(flatten)]
    pub base: Identifiable,
    /// Materialised hierarchy path, e.g. `/ImspTQPwCqd/O6uvpzGd5pu`
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Program {
    #[serde(flatten)]
    pub base: Identifiable,
    /// False for event programs, whose events carry no enrollment
    pub registration: bool,
    /// UID of the attribute category combo
    #[serde(default)]
    pub category_combo: Option<String>,
    #[serde(default)]
    pub tracked_entity_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramStage {
    #[serde(flatten)]
    pub base: Identifiable,
    /// UID of the owning program
    pub program: String,
    #[serde(default)]
    pub repeatable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedEntityType {
    #[serde(flatten)]
    pub base: Identifiable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedEntityAttribute {
    #[serde(flatten)]
    pub base: Identifiable,
    #[serde(default)]
    pub unique: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataElement {
    #[serde(flatten)]
    pub base: Identifiable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipType {
    #[serde(flatten)]
    pub base: Identifiable,
    #[serde(default)]
    pub bidirectional: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryCombo {
    #[serde(flatten)]
    pub base: Identifiable,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryOption {
    #[serde(flatten)]
    pub base: Identifiable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryOptionCombo {
    #[serde(flatten)]
    pub base: Identifiable,
    /// UID of the category combo this combination belongs to
    pub category_combo: String,
    /// UIDs of the category options forming this combination
    #[serde(default)]
    pub category_options: BTreeSet<String>,
}

/// Any metadata object, tagged with its kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Metadata {
    OrganisationUnit(OrganisationUnit),
    Program(Program),
    ProgramStage(ProgramStage),
    TrackedEntityType(TrackedEntityType),
    TrackedEntityAttribute(TrackedEntityAttribute),
    DataElement(DataElement),
    RelationshipType(RelationshipType),
    CategoryCombo(CategoryCombo),
    CategoryOption(CategoryOption),
    CategoryOptionCombo(CategoryOptionCombo),
}

impl Metadata {
    pub fn kind(&self) -> MetadataType {
        match self {
            Metadata::OrganisationUnit(_) => MetadataType::OrganisationUnit,
            Metadata::Program(_) => MetadataType::Program,
            Metadata::ProgramStage(_) => MetadataType::ProgramStage,
            Metadata::TrackedEntityType(_) => MetadataType::TrackedEntityType,
            Metadata::TrackedEntityAttribute(_) => MetadataType::TrackedEntityAttribute,
            Metadata::DataElement(_) => MetadataType::DataElement,
            Metadata::RelationshipType(_) => MetadataType::RelationshipType,
            Metadata::CategoryCombo(_) => MetadataType::CategoryCombo,
            Metadata::CategoryOption(_) => MetadataType::CategoryOption,
            Metadata::CategoryOptionCombo(_) => MetadataType::CategoryOptionCombo,
        }
    }

    pub fn base(&self) -> &Identifiable {
        match self {
            Metadata::OrganisationUnit(m) => &m.base,
            Metadata::Program(m) => &m.base,
            Metadata::ProgramStage(m) => &m.base,
            Metadata::TrackedEntityType(m) => &m.base,
            Metadata::TrackedEntityAttribute(m) => &m.base,
            Metadata::DataElement(m) => &m.base,
            Metadata::RelationshipType(m) => &m.base,
            Metadata::CategoryCombo(m) => &m.base,
            Metadata::CategoryOption(m) => &m.base,
            Metadata::CategoryOptionCombo(m) => &m.base,
        }
    }

    pub fn uid(&self) -> &str {
        &self.base().uid
    }
}

/// Typed view into a [`Metadata`] value
pub trait MetadataObject: Sized {
    const KIND: MetadataType;

    fn from_metadata(metadata: &Metadata) -> Option<&Self>;
}

macro_rules! metadata_object {
    ($($variant:ident),* $(,)?) => {
        $(
            impl MetadataObject for $variant {
                const KIND: MetadataType = MetadataType::$variant;

                fn from_metadata(metadata: &Metadata) -> Option<&Self> {
                    match metadata {
                        Metadata::$variant(m) => Some(m),
                        _ => None,
                    }
                }
            }

            impl From<$variant> for Metadata {
                fn from(m: $variant) -> Self {
                    Metadata::$variant(m)
                }
            }
        )*
    };
}

metadata_object!(
    OrganisationUnit,
    Program,
    ProgramStage,
    TrackedEntityType,
    TrackedEntityAttribute,
    DataElement,
    RelationshipType,
    CategoryCombo,
    CategoryOption,
    CategoryOptionCombo,
);

/// An importing or assigned user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub uid: String,
    pub username: String,
}
