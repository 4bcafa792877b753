//! Workload catalog: behaviors, patterns and load profiles.
//!
//! Like the topology registry this is an explicitly owned store, created once
//! and shared behind an `Arc`. Runs copy whatever they resolve from it, so
//! later additions never affect a run in flight.

use crate::behavior::{builtin_behaviors, UserBehavior};
use crate::error::HarnessError;
use crate::pattern::{builtin_patterns, TransactionPattern};
use crate::profile::{builtin_profiles, LoadProfile, LoadProfileSpec};
use crate::synthesizer::BehaviorMix;
use std::sync::{PoisonError, RwLock};
use uuid::Uuid;

/// Pattern used when nothing else selects a mix.
pub const DEFAULT_PATTERN_ID: &str = "retail-mix";

/// Store of workload definitions.
pub struct WorkloadCatalog {
    behaviors: RwLock<Vec<UserBehavior>>,
    patterns: RwLock<Vec<TransactionPattern>>,
    profiles: RwLock<Vec<LoadProfile>>,
}

impl WorkloadCatalog {
    /// Creates a catalog seeded with the built-in definitions.
    pub fn with_builtins() -> Self {
        Self {
            behaviors: RwLock::new(builtin_behaviors()),
            patterns: RwLock::new(builtin_patterns()),
            profiles: RwLock::new(builtin_profiles()),
        }
    }

    pub fn list_user_behaviors(&self) -> Vec<UserBehavior> {
        self.behaviors.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn get_user_behavior(&self, id: &str) -> Option<UserBehavior> {
        self.behaviors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|b| b.id == id)
            .cloned()
    }

    pub fn list_patterns(&self) -> Vec<TransactionPattern> {
        self.patterns.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn get_pattern(&self, id: &str) -> Option<TransactionPattern> {
        self.patterns
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|p| p.id == id)
            .cloned()
    }

    pub fn list_profiles(&self) -> Vec<LoadProfile> {
        self.profiles.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn get_profile(&self, id: &str) -> Option<LoadProfile> {
        self.profiles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|p| p.id == id)
            .cloned()
    }

    /// Validates and registers a custom load profile.
    ///
    /// Rejects a `patternId` the catalog does not know. Nothing is registered
    /// on failure.
    pub fn create_custom_load_profile(&self, spec: LoadProfileSpec) -> Result<LoadProfile, HarnessError> {
        spec.validate()?;
        if let Some(pattern_id) = &spec.pattern_id {
            if self.get_pattern(pattern_id).is_none() {
                return Err(HarnessError::InvalidLoadProfile(format!(
                    "unknown pattern '{}'",
                    pattern_id
                )));
            }
        }

        let profile = spec.into_profile(format!("custom-{}", Uuid::new_v4()), DEFAULT_PATTERN_ID);
        self.profiles
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(profile.clone());
        Ok(profile)
    }

    /// Resolves a pattern into a synthesizer-ready mix.
    ///
    /// Behaviors are copied out of the catalog (copy-on-use).
    pub fn resolve_pattern(&self, pattern: &TransactionPattern) -> Result<BehaviorMix, HarnessError> {
        let normalized = pattern.normalized()?;
        let behaviors = self.behaviors.read().unwrap_or_else(PoisonError::into_inner);

        let mut entries = Vec::with_capacity(normalized.components.len());
        for component in &normalized.components {
            let behavior = behaviors
                .iter()
                .find(|b| b.id == component.behavior_id)
                .ok_or_else(|| {
                    HarnessError::InvalidPattern(format!("unknown user behavior '{}'", component.behavior_id))
                })?;
            entries.push((behavior.clone(), component.weight));
        }
        BehaviorMix::new(entries)
    }

    /// Builds the effective mix for a run.
    ///
    /// * `base_pattern` - named pattern (typically the profile's own)
    /// * `user_behaviors` - when non-empty, replaces the base pattern with an
    ///   equal-weight mix of these behaviors
    /// * `custom_patterns` - merged with the base at equal share
    pub fn resolve_mix(
        &self,
        base_pattern: Option<&str>,
        user_behaviors: &[String],
        custom_patterns: &[TransactionPattern],
    ) -> Result<BehaviorMix, HarnessError> {
        let base = if !user_behaviors.is_empty() {
            TransactionPattern::uniform("user-behaviors", user_behaviors)
        } else {
            let id = base_pattern.unwrap_or(DEFAULT_PATTERN_ID);
            self.get_pattern(id)
                .ok_or_else(|| HarnessError::InvalidPattern(format!("unknown pattern '{}'", id)))?
        };

        if custom_patterns.is_empty() {
            return self.resolve_pattern(&base);
        }

        let mut all = Vec::with_capacity(custom_patterns.len() + 1);
        all.push(base);
        all.extend(custom_patterns.iter().cloned());
        let merged = TransactionPattern::merge("merged", &all)?;
        self.resolve_pattern(&merged)
    }

    /// The mix used when nothing else is selected.
    pub fn default_mix(&self) -> Result<BehaviorMix, HarnessError> {
        self.resolve_mix(None, &[], &[])
    }
}

impl Default for WorkloadCatalog {
    fn default() -> Self {
        Self::with_builtins()
    }
}
