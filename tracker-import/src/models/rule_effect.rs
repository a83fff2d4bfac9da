//! Program rule effects
//!
//! Computed by the rule engine before commit and attached to the bundle,
//! keyed by the UID of the enrollment or event they apply to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleActionType {
    SendMessage,
    ScheduleMessage,
    AssignValue,
    ShowWarning,
    ShowError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleEffect {
    /// UID of the program rule
    pub rule: String,
    pub action: RuleActionType,
    /// Notification template UID for message actions
    #[serde(default)]
    pub template: Option<String>,
    /// Delivery time for ScheduleMessage
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl RuleEffect {
    pub fn is_notification(&self) -> bool {
        matches!(self.action, RuleActionType::SendMessage | RuleActionType::ScheduleMessage)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RuleEffects {
    pub enrollments: HashMap<String, Vec<RuleEffect>>,
    pub events: HashMap<String, Vec<RuleEffect>>,
}

impl RuleEffects {
    pub fn for_enrollment(&self, uid: &str) -> &[RuleEffect] {
        self.enrollments.get(uid).map_or(&[], Vec::as_slice)
    }

    pub fn for_event(&self, uid: &str) -> &[RuleEffect] {
        self.events.get(uid).map_or(&[], Vec::as_slice)
    }
}
