//! Import parameters

use crate::identifier::IdSchemeParams;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// VALIDATE runs preheat and validation only; nothing is written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImportMode {
    Validate,
    #[default]
    Commit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImportStrategy {
    Create,
    Update,
    #[default]
    CreateAndUpdate,
    Delete,
}

/// AUTO flushes once per tracker type, OBJECT after every object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlushMode {
    #[default]
    Auto,
    Object,
}

/// ALL commits nothing when any object fails validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AtomicMode {
    #[default]
    All,
    Object,
}

fn normalise(s: &str) -> String {
    s.trim().to_ascii_uppercase().replace('-', "_")
}

impl FromStr for ImportMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalise(s).as_str() {
            "VALIDATE" => Ok(ImportMode::Validate),
            "COMMIT" => Ok(ImportMode::Commit),
            other => Err(format!("unknown import mode '{}'", other)),
        }
    }
}

impl FromStr for ImportStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalise(s).as_str() {
            "CREATE" => Ok(ImportStrategy::Create),
            "UPDATE" => Ok(ImportStrategy::Update),
            "CREATE_AND_UPDATE" => Ok(ImportStrategy::CreateAndUpdate),
            "DELETE" => Ok(ImportStrategy::Delete),
            other => Err(format!("unknown import strategy '{}'", other)),
        }
    }
}

impl FromStr for FlushMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalise(s).as_str() {
            "AUTO" => Ok(FlushMode::Auto),
            "OBJECT" => Ok(FlushMode::Object),
            other => Err(format!("unknown flush mode '{}'", other)),
        }
    }
}

impl FromStr for AtomicMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalise(s).as_str() {
            "ALL" => Ok(AtomicMode::All),
            "OBJECT" => Ok(AtomicMode::Object),
            other => Err(format!("unknown atomic mode '{}'", other)),
        }
    }
}

/// Parameters controlling a single import
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ImportParams {
    pub import_mode: ImportMode,
    pub import_strategy: ImportStrategy,
    pub flush_mode: FlushMode,
    pub atomic_mode: AtomicMode,
    pub id_schemes: IdSchemeParams,
    /// Username of the importing user
    pub user: Option<String>,
}
