//! Identifier schemes and resolution
//!
//! Payload references to metadata are scheme-tagged identifiers. Every call
//! site derives cache keys through [`resolve`], so an identifier always maps to
//! the same key. Attribute identifiers key on the attribute *value* and are
//! looked up in a separate attribute-value sub-store.

use crate::error::{ImportError, Result};
use crate::models::{Identifiable, MetadataType};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a metadata reference is expressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdScheme {
    #[default]
    Uid,
    Code,
    Name,
    Attribute,
}

impl FromStr for IdScheme {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "UID" => Ok(IdScheme::Uid),
            "CODE" => Ok(IdScheme::Code),
            "NAME" => Ok(IdScheme::Name),
            "ATTRIBUTE" => Ok(IdScheme::Attribute),
            other => Err(format!("unknown id scheme '{}'", other)),
        }
    }
}

/// A scheme-tagged reference to a metadata object
///
/// For [`IdScheme::Attribute`], `identifier` is the attribute UID and
/// `attribute_value` the value the object carries for that attribute.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "IdentifierRepr", rename_all = "camelCase")]
pub struct MetadataIdentifier {
    pub id_scheme: IdScheme,
    pub identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribute_value: Option<String>,
}

/// Accepts either a bare string (a UID) or the full object form
#[derive(Deserialize)]
#[serde(untagged)]
enum IdentifierRepr {
    Uid(String),
    #[serde(rename_all = "camelCase")]
    Full {
        #[serde(default)]
        id_scheme: IdScheme,
        identifier: Option<String>,
        attribute_value: Option<String>,
    },
}

impl From<IdentifierRepr> for MetadataIdentifier {
    fn from(repr: IdentifierRepr) -> Self {
        match repr {
            IdentifierRepr::Uid(uid) => MetadataIdentifier::of_uid(uid),
            IdentifierRepr::Full {
                id_scheme,
                identifier,
                attribute_value,
            } => MetadataIdentifier {
                id_scheme,
                identifier,
                attribute_value,
            },
        }
    }
}

impl MetadataIdentifier {
    pub fn of_uid(uid: impl Into<String>) -> Self {
        Self::simple(IdScheme::Uid, uid)
    }

    pub fn of_code(code: impl Into<String>) -> Self {
        Self::simple(IdScheme::Code, code)
    }

    pub fn of_name(name: impl Into<String>) -> Self {
        Self::simple(IdScheme::Name, name)
    }

    pub fn of_attribute(attribute_uid: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id_scheme: IdScheme::Attribute,
            identifier: Some(attribute_uid.into()),
            attribute_value: Some(value.into()),
        }
    }

    fn simple(id_scheme: IdScheme, identifier: impl Into<String>) -> Self {
        Self {
            id_scheme,
            identifier: Some(identifier.into()),
            attribute_value: None,
        }
    }

    /// The value used to query the backing store under this identifier's scheme
    pub fn lookup_value(&self) -> Option<&str> {
        match self.id_scheme {
            IdScheme::Attribute => self.attribute_value.as_deref(),
            _ => self.identifier.as_deref(),
        }
    }

    /// The scheme parameter this identifier was expressed in
    pub fn scheme_param(&self) -> IdSchemeParam {
        match self.id_scheme {
            IdScheme::Attribute => IdSchemeParam::attribute(self.identifier.clone().unwrap_or_default()),
            scheme => IdSchemeParam::of(scheme),
        }
    }
}

impl fmt::Display for MetadataIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id_scheme {
            IdScheme::Attribute => write!(
                f,
                "ATTRIBUTE:{}={}",
                self.identifier.as_deref().unwrap_or(""),
                self.attribute_value.as_deref().unwrap_or("")
            ),
            scheme => write!(f, "{:?}:{}", scheme, self.identifier.as_deref().unwrap_or("")),
        }
    }
}

/// Cache lookup key derived from a [`MetadataIdentifier`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LookupKey {
    /// UID, code or name value
    Identifier(String),
    /// Value of an attribute, routed to the attribute-value sub-store
    AttributeValue { attribute: String, value: String },
}

/// Translate an identifier into its cache lookup key
///
/// Deterministic and side-effect free. Fails only for malformed identifiers.
pub fn resolve(identifier: &MetadataIdentifier, kind: MetadataType) -> Result<LookupKey> {
    let non_empty = |v: &Option<String>| v.as_deref().filter(|s| !s.trim().is_empty()).map(str::to_string);

    match identifier.id_scheme {
        IdScheme::Uid | IdScheme::Code | IdScheme::Name => non_empty(&identifier.identifier)
            .map(LookupKey::Identifier)
            .ok_or_else(|| {
                ImportError::InvalidIdentifier(format!("{} identifier without a value", kind))
            }),
        IdScheme::Attribute => {
            let attribute = non_empty(&identifier.identifier).ok_or_else(|| {
                ImportError::InvalidIdentifier(format!(
                    "{} attribute identifier without an attribute uid",
                    kind
                ))
            })?;
            let value = non_empty(&identifier.attribute_value).ok_or_else(|| {
                ImportError::InvalidIdentifier(format!(
                    "{} attribute identifier without an attribute value",
                    kind
                ))
            })?;
            Ok(LookupKey::AttributeValue { attribute, value })
        }
    }
}

/// Id scheme configuration for one metadata kind
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdSchemeParam {
    pub id_scheme: IdScheme,
    /// Attribute UID, required for [`IdScheme::Attribute`]
    pub attribute: Option<String>,
}

impl IdSchemeParam {
    pub fn of(id_scheme: IdScheme) -> Self {
        Self {
            id_scheme,
            attribute: None,
        }
    }

    pub fn attribute(attribute_uid: impl Into<String>) -> Self {
        Self {
            id_scheme: IdScheme::Attribute,
            attribute: Some(attribute_uid.into()),
        }
    }

    /// Reject attribute schemes without an attribute
    pub fn validate(&self) -> Result<()> {
        if self.id_scheme == IdScheme::Attribute
            && self.attribute.as_deref().map_or(true, |a| a.trim().is_empty())
        {
            return Err(ImportError::InvalidIdentifier(
                "ATTRIBUTE id scheme requires an attribute uid".to_string(),
            ));
        }
        Ok(())
    }

    /// The cache key an object is stored under with this scheme
    ///
    /// None when the object has no value for the scheme (no code, no value for
    /// the configured attribute).
    pub fn identifier_of(&self, object: &Identifiable) -> Option<LookupKey> {
        match self.id_scheme {
            IdScheme::Uid => Some(LookupKey::Identifier(object.uid.clone())),
            IdScheme::Code => object.code.clone().map(LookupKey::Identifier),
            IdScheme::Name => Some(LookupKey::Identifier(object.name.clone())),
            IdScheme::Attribute => {
                let attribute = self.attribute.as_ref()?;
                object
                    .attribute_values
                    .get(attribute)
                    .map(|value| LookupKey::AttributeValue {
                        attribute: attribute.clone(),
                        value: value.clone(),
                    })
            }
        }
    }

    /// The identifier a payload would use to reference `object` under this scheme
    pub fn to_metadata_identifier(&self, object: &Identifiable) -> MetadataIdentifier {
        match self.id_scheme {
            IdScheme::Uid => MetadataIdentifier::of_uid(object.uid.clone()),
            IdScheme::Code => MetadataIdentifier {
                id_scheme: IdScheme::Code,
                identifier: object.code.clone(),
                attribute_value: None,
            },
            IdScheme::Name => MetadataIdentifier::of_name(object.name.clone()),
            IdScheme::Attribute => {
                let attribute = self.attribute.clone().unwrap_or_default();
                let value = object.attribute_values.get(&attribute).cloned();
                MetadataIdentifier {
                    id_scheme: IdScheme::Attribute,
                    identifier: Some(attribute),
                    attribute_value: value,
                }
            }
        }
    }
}

/// Id scheme configuration for a whole import
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IdSchemeParams {
    /// Scheme for every kind without a dedicated setting
    pub id_scheme: IdSchemeParam,
    pub org_unit_id_scheme: IdSchemeParam,
    pub program_id_scheme: IdSchemeParam,
    pub program_stage_id_scheme: IdSchemeParam,
    pub data_element_id_scheme: IdSchemeParam,
    pub category_option_combo_id_scheme: IdSchemeParam,
    pub category_option_id_scheme: IdSchemeParam,
}

impl IdSchemeParams {
    /// The same scheme for every kind
    pub fn all(param: IdSchemeParam) -> Self {
        Self {
            id_scheme: param.clone(),
            org_unit_id_scheme: param.clone(),
            program_id_scheme: param.clone(),
            program_stage_id_scheme: param.clone(),
            data_element_id_scheme: param.clone(),
            category_option_combo_id_scheme: param.clone(),
            category_option_id_scheme: param,
        }
    }

    pub fn for_kind(&self, kind: MetadataType) -> &IdSchemeParam {
        match kind {
            MetadataType::OrganisationUnit => &self.org_unit_id_scheme,
            MetadataType::Program => &self.program_id_scheme,
            MetadataType::ProgramStage => &self.program_stage_id_scheme,
            MetadataType::DataElement => &self.data_element_id_scheme,
            MetadataType::CategoryOptionCombo => &self.category_option_combo_id_scheme,
            MetadataType::CategoryOption => &self.category_option_id_scheme,
            _ => &self.id_scheme,
        }
    }

    pub fn to_metadata_identifier(&self, kind: MetadataType, object: &Identifiable) -> MetadataIdentifier {
        self.for_kind(kind).to_metadata_identifier(object)
    }

    pub fn validate(&self) -> Result<()> {
        for param in [
            &self.id_scheme,
            &self.org_unit_id_scheme,
            &self.program_id_scheme,
            &self.program_stage_id_scheme,
            &self.data_element_id_scheme,
            &self.category_option_combo_id_scheme,
            &self.category_option_id_scheme,
        ] {
            param.validate()?;
        }
        Ok(())
    }
}
