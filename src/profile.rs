//! Profile types
//!
//! A profile bundles strategies, rules and schedules into a named set that
//! can be made active in one step. Application itself lives in the catalog.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CacheError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheProfile {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub strategy_ids: Vec<String>,
    /// Evaluation order of the rules while this profile is active
    pub rule_ids: Vec<String>,
    pub schedule_ids: Vec<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub applied_at: Option<DateTime<Utc>>,
}

/// Input for creating a profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileSpec {
    pub name: String,
    pub description: Option<String>,
    pub strategy_ids: Vec<String>,
    pub rule_ids: Vec<String>,
    pub schedule_ids: Vec<String>,
    pub enabled: Option<bool>,
}

impl CacheProfile {
    pub fn from_spec(spec: ProfileSpec, now: DateTime<Utc>) -> Result<Self> {
        if spec.name.trim().is_empty() {
            return Err(CacheError::Validation("Profile name cannot be empty".to_string()));
        }
        for (field, ids) in [
            ("strategy_ids", &spec.strategy_ids),
            ("rule_ids", &spec.rule_ids),
            ("schedule_ids", &spec.schedule_ids),
        ] {
            if let Some(dup) = first_duplicate(ids) {
                return Err(CacheError::Validation(format!(
                    "Profile {} lists '{}' more than once",
                    field, dup
                )));
            }
        }

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            name: spec.name,
            description: spec.description,
            strategy_ids: spec.strategy_ids,
            rule_ids: spec.rule_ids,
            schedule_ids: spec.schedule_ids,
            enabled: spec.enabled.unwrap_or(true),
            created_at: now,
            applied_at: None,
        })
    }
}

fn first_duplicate(ids: &[String]) -> Option<&String> {
    ids.iter()
        .enumerate()
        .find(|(i, id)| ids[..*i].contains(id))
        .map(|(_, id)| id)
}
