//! Catalog Module
//!
//! Strategies, rules, profiles and schedules, together with the active
//! working set. Everything here sits behind one lock so that applying a
//! profile swaps strategies, rules and schedules in a single step.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{CacheError, Result};
use crate::optimization::TaskSchedule;
use crate::profile::{CacheProfile, ProfileSpec};
use crate::rules::{CacheRule, RuleSpec};
use crate::strategy::{
    CacheStrategy, StrategyHealth, StrategyPerformance, StrategySpec, StrategyUpdate,
    DEFAULT_STRATEGY_ID,
};

// == Active Set ==
/// The working set. `None` means "everything registered".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActiveSet {
    pub profile_id: Option<String>,
    pub strategy_ids: Option<Vec<String>>,
    pub rule_ids: Option<Vec<String>>,
    pub schedule_ids: Option<Vec<String>>,
}

/// Persisted form of the profile records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileRecords {
    pub profiles: Vec<CacheProfile>,
    pub active: ActiveSet,
}

// == Catalog ==
#[derive(Debug)]
pub struct Catalog {
    strategies: BTreeMap<String, CacheStrategy>,
    /// Registration order is evaluation order when no profile is active
    rules: Vec<CacheRule>,
    profiles: BTreeMap<String, CacheProfile>,
    schedules: BTreeMap<String, TaskSchedule>,
    active: ActiveSet,
}

impl Catalog {
    pub fn new(default_strategy: CacheStrategy) -> Self {
        let mut strategies = BTreeMap::new();
        strategies.insert(default_strategy.id.clone(), default_strategy);
        Self {
            strategies,
            rules: Vec::new(),
            profiles: BTreeMap::new(),
            schedules: BTreeMap::new(),
            active: ActiveSet::default(),
        }
    }

    /// Rebuilds a catalog from persisted records. The default strategy is
    /// kept from `default_strategy` only when the records lack one.
    pub fn from_records(
        default_strategy: CacheStrategy,
        strategies: Vec<CacheStrategy>,
        rules: Vec<CacheRule>,
        profiles: ProfileRecords,
        schedules: Vec<TaskSchedule>,
    ) -> Self {
        let mut catalog = Self::new(default_strategy);
        for strategy in strategies {
            catalog.strategies.insert(strategy.id.clone(), strategy);
        }
        catalog.rules = rules;
        catalog.profiles = profiles
            .profiles
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();
        catalog.schedules = schedules.into_iter().map(|s| (s.id.clone(), s)).collect();
        catalog.active = profiles.active;
        catalog
    }

    // == Strategies ==
    pub fn create_strategy(&mut self, spec: StrategySpec, now: DateTime<Utc>) -> Result<CacheStrategy> {
        let strategy = CacheStrategy::from_spec(spec, now)?;
        if self.strategies.contains_key(&strategy.id) {
            return Err(CacheError::Validation(format!(
                "Strategy '{}' already exists",
                strategy.id
            )));
        }
        info!(id = %strategy.id, name = %strategy.name, policy = %strategy.eviction_policy, "Strategy created");
        self.strategies.insert(strategy.id.clone(), strategy.clone());
        Ok(strategy)
    }

    pub fn update_strategy(
        &mut self,
        id: &str,
        update: StrategyUpdate,
        now: DateTime<Utc>,
    ) -> Result<CacheStrategy> {
        let strategy = self
            .strategies
            .get_mut(id)
            .ok_or_else(|| CacheError::NotFound(format!("strategy '{}'", id)))?;
        strategy.apply_update(update, now)?;
        Ok(strategy.clone())
    }

    pub fn strategy(&self, id: &str) -> Result<&CacheStrategy> {
        self.strategies
            .get(id)
            .ok_or_else(|| CacheError::NotFound(format!("strategy '{}'", id)))
    }

    pub fn list_strategies(&self) -> Vec<CacheStrategy> {
        let mut strategies: Vec<CacheStrategy> = self.strategies.values().cloned().collect();
        strategies.sort_by_key(|s| s.created_at);
        strategies
    }

    /// Removes a strategy. `in_use` tells whether entries still reference it.
    pub fn delete_strategy(&mut self, id: &str, in_use: bool) -> Result<()> {
        if id == DEFAULT_STRATEGY_ID {
            return Err(CacheError::Validation(
                "The default strategy cannot be deleted".to_string(),
            ));
        }
        self.strategy(id)?;
        if in_use {
            return Err(CacheError::Validation(format!(
                "Strategy '{}' still has entries",
                id
            )));
        }
        if let Some(rule) = self
            .rules
            .iter()
            .find(|r| r.action.strategy_id.as_deref() == Some(id))
        {
            return Err(CacheError::Validation(format!(
                "Strategy '{}' is targeted by rule '{}'",
                id, rule.id
            )));
        }
        if let Some(profile) = self.profiles.values().find(|p| p.strategy_ids.iter().any(|s| s == id)) {
            return Err(CacheError::Validation(format!(
                "Strategy '{}' is part of profile '{}'",
                id, profile.id
            )));
        }
        self.strategies.remove(id);
        Ok(())
    }

    /// Whether entries may be written to this strategy under the active set.
    pub fn is_strategy_active(&self, id: &str) -> bool {
        id == DEFAULT_STRATEGY_ID
            || self
                .active
                .strategy_ids
                .as_ref()
                .map_or(self.strategies.contains_key(id), |ids| ids.iter().any(|s| s == id))
    }

    pub fn record_health(&mut self, id: &str, health: StrategyHealth, performance: StrategyPerformance) {
        if let Some(strategy) = self.strategies.get_mut(id) {
            strategy.health = health;
            strategy.performance = performance;
        }
    }

    // == Rules ==
    pub fn create_rule(&mut self, spec: RuleSpec, now: DateTime<Utc>) -> Result<CacheRule> {
        let rule = CacheRule::from_spec(spec, now)?;
        if let Some(target) = &rule.action.strategy_id {
            self.strategy(target)?;
        }
        info!(id = %rule.id, name = %rule.name, "Rule created");
        self.rules.push(rule.clone());
        Ok(rule)
    }

    pub fn list_rules(&self) -> Vec<CacheRule> {
        self.rules.clone()
    }

    pub fn rule(&self, id: &str) -> Result<&CacheRule> {
        self.rules
            .iter()
            .find(|r| r.id == id)
            .ok_or_else(|| CacheError::NotFound(format!("rule '{}'", id)))
    }

    pub fn set_rule_enabled(&mut self, id: &str, enabled: bool) -> Result<CacheRule> {
        let rule = self
            .rules
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| CacheError::NotFound(format!("rule '{}'", id)))?;
        rule.enabled = enabled;
        Ok(rule.clone())
    }

    pub fn delete_rule(&mut self, id: &str) -> Result<()> {
        self.rule(id)?;
        if let Some(profile) = self.profiles.values().find(|p| p.rule_ids.iter().any(|r| r == id)) {
            return Err(CacheError::Validation(format!(
                "Rule '{}' is part of profile '{}'",
                id, profile.id
            )));
        }
        self.rules.retain(|r| r.id != id);
        Ok(())
    }

    /// Rules in evaluation order under the active set.
    pub fn active_rules(&self) -> Vec<&CacheRule> {
        match &self.active.rule_ids {
            Some(ids) => ids.iter().filter_map(|id| self.rule(id).ok()).collect(),
            None => self.rules.iter().collect(),
        }
    }

    // == Profiles ==
    /// Registers a profile after checking that everything it names exists
    /// and that its rules only target strategies it also activates.
    pub fn create_profile(&mut self, spec: ProfileSpec, now: DateTime<Utc>) -> Result<CacheProfile> {
        let profile = CacheProfile::from_spec(spec, now)?;
        self.check_profile(&profile)?;
        info!(id = %profile.id, name = %profile.name, "Profile created");
        self.profiles.insert(profile.id.clone(), profile.clone());
        Ok(profile)
    }

    fn check_profile(&self, profile: &CacheProfile) -> Result<()> {
        for id in &profile.strategy_ids {
            self.strategy(id)?;
        }
        for id in &profile.schedule_ids {
            self.schedule(id)?;
        }
        for id in &profile.rule_ids {
            let rule = self.rule(id)?;
            if let Some(target) = &rule.action.strategy_id {
                if target != DEFAULT_STRATEGY_ID && !profile.strategy_ids.contains(target) {
                    return Err(CacheError::Validation(format!(
                        "Rule '{}' targets strategy '{}' which profile '{}' does not include",
                        id, target, profile.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Makes a profile's strategies, rules and schedules the active set.
    ///
    /// Validation happens before anything is touched, so a failed apply
    /// leaves the previous working set in place.
    pub fn apply_profile(&mut self, id: &str, now: DateTime<Utc>) -> Result<CacheProfile> {
        let profile = self
            .profiles
            .get(id)
            .ok_or_else(|| CacheError::NotFound(format!("profile '{}'", id)))?;
        if !profile.enabled {
            return Err(CacheError::Validation(format!(
                "Profile '{}' is disabled",
                profile.name
            )));
        }
        self.check_profile(profile)?;

        let active = ActiveSet {
            profile_id: Some(profile.id.clone()),
            strategy_ids: Some(profile.strategy_ids.clone()),
            rule_ids: Some(profile.rule_ids.clone()),
            schedule_ids: Some(profile.schedule_ids.clone()),
        };
        self.active = active;

        let profile = self
            .profiles
            .get_mut(id)
            .ok_or_else(|| CacheError::NotFound(format!("profile '{}'", id)))?;
        profile.applied_at = Some(now);
        info!(id = %profile.id, name = %profile.name, "Profile applied");
        Ok(profile.clone())
    }

    pub fn list_profiles(&self) -> Vec<CacheProfile> {
        let mut profiles: Vec<CacheProfile> = self.profiles.values().cloned().collect();
        profiles.sort_by_key(|p| p.created_at);
        profiles
    }

    pub fn profile(&self, id: &str) -> Result<&CacheProfile> {
        self.profiles
            .get(id)
            .ok_or_else(|| CacheError::NotFound(format!("profile '{}'", id)))
    }

    pub fn active(&self) -> &ActiveSet {
        &self.active
    }

    // == Schedules ==
    pub fn create_schedule(&mut self, schedule: TaskSchedule) -> Result<TaskSchedule> {
        if let Some(target) = &schedule.task.target.target_strategy_id {
            self.strategy(target)?;
        }
        info!(id = %schedule.id, name = %schedule.name, every_secs = schedule.interval_secs, "Schedule created");
        self.schedules.insert(schedule.id.clone(), schedule.clone());
        Ok(schedule)
    }

    pub fn schedule(&self, id: &str) -> Result<&TaskSchedule> {
        self.schedules
            .get(id)
            .ok_or_else(|| CacheError::NotFound(format!("schedule '{}'", id)))
    }

    pub fn list_schedules(&self) -> Vec<TaskSchedule> {
        self.schedules.values().cloned().collect()
    }

    /// Active schedules that are due, marked as run.
    pub fn take_due_schedules(&mut self, now: DateTime<Utc>) -> Vec<TaskSchedule> {
        let active = self.active.schedule_ids.clone();
        let mut due = Vec::new();
        for schedule in self.schedules.values_mut() {
            let is_active = active
                .as_ref()
                .map_or(true, |ids| ids.iter().any(|id| id == &schedule.id));
            if is_active && schedule.is_due(now) {
                schedule.mark_run(now);
                due.push(schedule.clone());
            }
        }
        due
    }

    // == Persistence ==
    pub fn rules_record(&self) -> &[CacheRule] {
        &self.rules
    }

    pub fn profile_records(&self) -> ProfileRecords {
        ProfileRecords {
            profiles: self.list_profiles(),
            active: self.active.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::EvictionPolicy;
    use crate::optimization::{ScheduleSpec, TaskSpec, TaskType};
    use crate::rules::RuleAction;
    use chrono::Duration;

    fn catalog() -> Catalog {
        Catalog::new(CacheStrategy::default_strategy(
            1 << 20,
            100,
            300,
            EvictionPolicy::Lru,
            Utc::now(),
        ))
    }

    fn strategy_spec(id: &str) -> StrategySpec {
        StrategySpec {
            id: Some(id.to_string()),
            name: id.to_string(),
            max_size: 1024,
            max_entries: 10,
            default_ttl: 60,
            ..Default::default()
        }
    }

    fn rule_targeting(catalog: &mut Catalog, strategy: &str) -> CacheRule {
        catalog
            .create_rule(
                RuleSpec {
                    name: format!("to-{}", strategy),
                    action: RuleAction {
                        strategy_id: Some(strategy.to_string()),
                        ..Default::default()
                    },
                    ..Default::default()
                },
                Utc::now(),
            )
            .unwrap()
    }

    #[test]
    fn test_duplicate_strategy_rejected() {
        let mut catalog = catalog();
        catalog.create_strategy(strategy_spec("hot"), Utc::now()).unwrap();
        assert!(catalog.create_strategy(strategy_spec("hot"), Utc::now()).is_err());
        assert_eq!(catalog.list_strategies().len(), 2);
    }

    #[test]
    fn test_rule_must_target_known_strategy() {
        let mut catalog = catalog();
        let spec = RuleSpec {
            name: "r".to_string(),
            action: RuleAction {
                strategy_id: Some("nowhere".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(
            catalog.create_rule(spec, Utc::now()),
            Err(CacheError::NotFound(_))
        ));
    }

    #[test]
    fn test_apply_profile_swaps_working_set() {
        let mut catalog = catalog();
        catalog.create_strategy(strategy_spec("hot"), Utc::now()).unwrap();
        let first = rule_targeting(&mut catalog, "hot");
        let second = rule_targeting(&mut catalog, "default");

        let profile = catalog
            .create_profile(
                ProfileSpec {
                    name: "reversed".to_string(),
                    strategy_ids: vec!["hot".to_string()],
                    rule_ids: vec![second.id.clone(), first.id.clone()],
                    ..Default::default()
                },
                Utc::now(),
            )
            .unwrap();

        assert_eq!(catalog.active_rules()[0].id, first.id);
        let applied = catalog.apply_profile(&profile.id, Utc::now()).unwrap();

        assert!(applied.applied_at.is_some());
        assert_eq!(catalog.active().profile_id.as_deref(), Some(profile.id.as_str()));
        let order: Vec<&str> = catalog.active_rules().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(order, vec![second.id.as_str(), first.id.as_str()]);
        assert!(catalog.is_strategy_active("hot"));
        assert!(catalog.is_strategy_active(DEFAULT_STRATEGY_ID));
    }

    #[test]
    fn test_profile_rule_outside_strategy_set_rejected() {
        let mut catalog = catalog();
        catalog.create_strategy(strategy_spec("hot"), Utc::now()).unwrap();
        let rule = rule_targeting(&mut catalog, "hot");

        let result = catalog.create_profile(
            ProfileSpec {
                name: "broken".to_string(),
                rule_ids: vec![rule.id],
                ..Default::default()
            },
            Utc::now(),
        );
        assert!(matches!(result, Err(CacheError::Validation(_))));
    }

    #[test]
    fn test_failed_apply_keeps_previous_set() {
        let mut catalog = catalog();
        catalog.create_strategy(strategy_spec("hot"), Utc::now()).unwrap();
        let profile = catalog
            .create_profile(
                ProfileSpec {
                    name: "p".to_string(),
                    strategy_ids: vec!["hot".to_string()],
                    enabled: Some(false),
                    ..Default::default()
                },
                Utc::now(),
            )
            .unwrap();

        assert!(catalog.apply_profile(&profile.id, Utc::now()).is_err());
        assert_eq!(catalog.active(), &ActiveSet::default());
        assert!(matches!(
            catalog.apply_profile("missing", Utc::now()),
            Err(CacheError::NotFound(_))
        ));
    }

    #[test]
    fn test_delete_strategy_guards() {
        let mut catalog = catalog();
        catalog.create_strategy(strategy_spec("hot"), Utc::now()).unwrap();
        catalog.create_strategy(strategy_spec("cold"), Utc::now()).unwrap();
        rule_targeting(&mut catalog, "hot");

        assert!(catalog.delete_strategy(DEFAULT_STRATEGY_ID, false).is_err());
        assert!(catalog.delete_strategy("hot", false).is_err());
        assert!(catalog.delete_strategy("cold", true).is_err());
        catalog.delete_strategy("cold", false).unwrap();
        assert!(catalog.strategy("cold").is_err());
    }

    #[test]
    fn test_due_schedules_follow_active_set() {
        let now = Utc::now();
        let mut catalog = catalog();
        let schedule = TaskSchedule::from_spec(
            ScheduleSpec {
                name: "sweep".to_string(),
                task: TaskSpec::new(TaskType::Cleanup),
                interval_secs: 10,
                enabled: None,
            },
            now,
        )
        .unwrap();
        catalog.create_schedule(schedule).unwrap();

        let later = now + Duration::seconds(10);
        assert_eq!(catalog.take_due_schedules(later).len(), 1);
        // Marked as run, so not due again right away
        assert!(catalog.take_due_schedules(later).is_empty());

        let profile = catalog
            .create_profile(
                ProfileSpec {
                    name: "no-schedules".to_string(),
                    ..Default::default()
                },
                now,
            )
            .unwrap();
        catalog.apply_profile(&profile.id, now).unwrap();
        assert!(catalog
            .take_due_schedules(later + Duration::seconds(60))
            .is_empty());
    }
}
