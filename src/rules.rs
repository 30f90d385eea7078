//! Rule Engine
//!
//! Classifies entries at write time by evaluating an ordered list of rules.
//! The first enabled rule whose condition matches decides; rules never stack.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cache::{checked_duration, EntryType, Priority};
use crate::error::{CacheError, Result};

// == Ranges ==
/// Inclusive numeric range; either bound may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub min: Option<u64>,
    pub max: Option<u64>,
}

impl Range {
    pub fn contains(&self, value: u64) -> bool {
        self.min.map_or(true, |min| value >= min) && self.max.map_or(true, |max| value <= max)
    }

    fn validate(&self, field: &str) -> Result<()> {
        if let (Some(min), Some(max)) = (self.min, self.max) {
            if min > max {
                return Err(CacheError::Validation(format!(
                    "{} range has min {} greater than max {}",
                    field, min, max
                )));
            }
        }
        Ok(())
    }
}

// == Condition ==
/// Matchers that must all hold. Unset matchers are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleCondition {
    /// Entry type must be one of these
    pub types: Vec<EntryType>,
    /// Entry must carry at least one of these tags
    pub tags: Vec<String>,
    /// Payload size in bytes
    pub size: Option<Range>,
    /// Seconds since the entry was created
    pub age: Option<Range>,
    pub min_access_count: Option<u64>,
}

impl RuleCondition {
    pub fn matches(&self, draft: &EntryDraft) -> bool {
        if !self.types.is_empty() && !self.types.contains(&draft.entry_type) {
            return false;
        }
        if !self.tags.is_empty() && !self.tags.iter().any(|t| draft.tags.contains(t)) {
            return false;
        }
        if let Some(size) = &self.size {
            if !size.contains(draft.size) {
                return false;
            }
        }
        if let Some(age) = &self.age {
            if !age.contains(draft.age_secs) {
                return false;
            }
        }
        if let Some(min) = self.min_access_count {
            if draft.access_count < min {
                return false;
            }
        }
        true
    }

    fn validate(&self) -> Result<()> {
        if let Some(size) = &self.size {
            size.validate("size")?;
        }
        if let Some(age) = &self.age {
            age.validate("age")?;
        }
        if self.tags.iter().any(|t| t.trim().is_empty()) {
            return Err(CacheError::Validation("Rule tags must not be blank".to_string()));
        }
        Ok(())
    }
}

// == Action ==
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleAction {
    /// Seconds
    pub ttl: Option<i64>,
    pub priority: Option<Priority>,
    pub compression: Option<bool>,
    pub strategy_id: Option<String>,
}

// == Rule ==
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRule {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub condition: RuleCondition,
    pub action: RuleAction,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSpec {
    pub name: String,
    pub enabled: Option<bool>,
    pub condition: RuleCondition,
    pub action: RuleAction,
}

impl CacheRule {
    /// Validates a spec and builds a rule with a fresh id.
    pub fn from_spec(spec: RuleSpec, now: DateTime<Utc>) -> Result<Self> {
        if spec.name.trim().is_empty() {
            return Err(CacheError::Validation("Rule name cannot be empty".to_string()));
        }
        spec.condition.validate()?;
        if let Some(ttl) = spec.action.ttl {
            checked_duration("Rule TTL", ttl)?;
        }

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            name: spec.name,
            enabled: spec.enabled.unwrap_or(true),
            condition: spec.condition,
            action: spec.action,
            created_at: now,
        })
    }
}

// == Entry Draft ==
/// The attributes of a pending write that rules can match on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryDraft {
    pub entry_type: EntryType,
    pub tags: Vec<String>,
    pub size: u64,
    pub age_secs: u64,
    pub access_count: u64,
}

// == Classification ==
/// Write-time decisions for an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// Seconds
    pub ttl: u64,
    pub priority: Priority,
    pub compression: bool,
    pub strategy_id: String,
    /// Id of the rule that produced this, if any matched
    pub matched_rule: Option<String>,
}

/// Fallbacks used when no rule matches or a matching rule leaves a field unset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationDefaults {
    pub ttl: u64,
    pub priority: Priority,
    pub compression: bool,
    pub strategy_id: String,
}

// == Classify ==
/// Returns the first enabled matching rule's action, filled out with defaults.
pub fn classify<'a, I>(rules: I, draft: &EntryDraft, defaults: &ClassificationDefaults) -> Classification
where
    I: IntoIterator<Item = &'a CacheRule>,
{
    let matched = rules
        .into_iter()
        .filter(|rule| rule.enabled)
        .find(|rule| rule.condition.matches(draft));

    match matched {
        Some(rule) => Classification {
            ttl: rule
                .action
                .ttl
                .map(|t| t.max(0) as u64)
                .unwrap_or(defaults.ttl),
            priority: rule.action.priority.unwrap_or(defaults.priority),
            compression: rule.action.compression.unwrap_or(defaults.compression),
            strategy_id: rule
                .action
                .strategy_id
                .clone()
                .unwrap_or_else(|| defaults.strategy_id.clone()),
            matched_rule: Some(rule.id.clone()),
        },
        None => Classification {
            ttl: defaults.ttl,
            priority: defaults.priority,
            compression: defaults.compression,
            strategy_id: defaults.strategy_id.clone(),
            matched_rule: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> ClassificationDefaults {
        ClassificationDefaults {
            ttl: 300,
            priority: Priority::Medium,
            compression: false,
            strategy_id: "default".to_string(),
        }
    }

    fn rule(name: &str, condition: RuleCondition, action: RuleAction) -> CacheRule {
        CacheRule::from_spec(
            RuleSpec {
                name: name.to_string(),
                enabled: None,
                condition,
                action,
            },
            Utc::now(),
        )
        .unwrap()
    }

    fn api_draft() -> EntryDraft {
        EntryDraft {
            entry_type: EntryType::Api,
            tags: vec!["users".to_string()],
            size: 512,
            age_secs: 0,
            access_count: 0,
        }
    }

    #[test]
    fn test_no_rules_yields_defaults() {
        let result = classify(std::iter::empty(), &api_draft(), &defaults());
        assert_eq!(result.ttl, 300);
        assert_eq!(result.priority, Priority::Medium);
        assert!(result.matched_rule.is_none());
    }

    #[test]
    fn test_first_match_wins() {
        let first = rule(
            "api-short",
            RuleCondition {
                types: vec![EntryType::Api],
                ..Default::default()
            },
            RuleAction {
                ttl: Some(30),
                ..Default::default()
            },
        );
        let second = rule(
            "tagged-long",
            RuleCondition {
                tags: vec!["users".to_string()],
                ..Default::default()
            },
            RuleAction {
                ttl: Some(3600),
                priority: Some(Priority::High),
                ..Default::default()
            },
        );

        let result = classify([&first, &second], &api_draft(), &defaults());
        assert_eq!(result.ttl, 30);
        // No merging with the second rule's priority
        assert_eq!(result.priority, Priority::Medium);
        assert_eq!(result.matched_rule, Some(first.id.clone()));
    }

    #[test]
    fn test_disabled_rule_is_skipped() {
        let mut disabled = rule(
            "disabled",
            RuleCondition::default(),
            RuleAction {
                ttl: Some(1),
                ..Default::default()
            },
        );
        disabled.enabled = false;
        let fallback = rule(
            "fallback",
            RuleCondition::default(),
            RuleAction {
                ttl: Some(2),
                ..Default::default()
            },
        );

        let result = classify([&disabled, &fallback], &api_draft(), &defaults());
        assert_eq!(result.ttl, 2);
    }

    #[test]
    fn test_conditions_are_conjunctive() {
        let condition = RuleCondition {
            types: vec![EntryType::Api],
            size: Some(Range {
                min: Some(1024),
                max: None,
            }),
            ..Default::default()
        };

        let mut draft = api_draft();
        assert!(!condition.matches(&draft));
        draft.size = 2048;
        assert!(condition.matches(&draft));
        draft.entry_type = EntryType::Image;
        assert!(!condition.matches(&draft));
    }

    #[test]
    fn test_age_and_access_conditions() {
        let condition = RuleCondition {
            age: Some(Range {
                min: Some(60),
                max: Some(120),
            }),
            min_access_count: Some(3),
            ..Default::default()
        };

        let mut draft = api_draft();
        draft.age_secs = 90;
        draft.access_count = 2;
        assert!(!condition.matches(&draft));
        draft.access_count = 3;
        assert!(condition.matches(&draft));
        draft.age_secs = 121;
        assert!(!condition.matches(&draft));
    }

    #[test]
    fn test_malformed_range_rejected() {
        let spec = RuleSpec {
            name: "bad".to_string(),
            condition: RuleCondition {
                size: Some(Range {
                    min: Some(10),
                    max: Some(5),
                }),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(
            CacheRule::from_spec(spec, Utc::now()),
            Err(CacheError::Validation(_))
        ));
    }

    #[test]
    fn test_negative_rule_ttl_rejected() {
        let spec = RuleSpec {
            name: "neg".to_string(),
            action: RuleAction {
                ttl: Some(-1),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(CacheRule::from_spec(spec, Utc::now()).is_err());
    }

    #[test]
    fn test_unbounded_rule_ttl_rejected() {
        let spec = RuleSpec {
            name: "forever".to_string(),
            action: RuleAction {
                ttl: Some(i64::MAX),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(
            CacheRule::from_spec(spec, Utc::now()),
            Err(CacheError::Validation(_))
        ));
    }
}
