//! Scenario descriptors for network tests.

use crate::catalog::WorkloadCatalog;
use crate::error::HarnessError;
use crate::pattern::TransactionPattern;
use crate::profile::{validate_phases, Phase};
use crate::synthesizer::BehaviorMix;
use crate::topology::{NodeStatus, Topology};
use serde::{Deserialize, Serialize};

/// A scheduled status change for one node, scoped to a single run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaultDirective {
    pub node_id: String,
    pub status: NodeStatus,
    /// Simulated seconds after run start
    #[serde(default)]
    pub at_secs: f64,
    /// Reverts to `up` after this long; `None` holds until run end
    #[serde(default)]
    pub duration_secs: Option<f64>,
}

impl FaultDirective {
    pub fn new(node_id: &str, status: NodeStatus, at_secs: f64) -> Self {
        Self {
            node_id: node_id.to_string(),
            status,
            at_secs,
            duration_secs: None,
        }
    }

    pub fn for_secs(mut self, duration_secs: f64) -> Self {
        self.duration_secs = Some(duration_secs);
        self
    }
}

/// What to run against a topology.
///
/// Exactly one of `profile_id` or `phases` selects the schedule. The mix
/// defaults to the profile's pattern (or the catalog default for inline
/// phases) and can be overridden the same way as for a generation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub profile_id: Option<String>,
    #[serde(default)]
    pub phases: Option<Vec<Phase>>,
    #[serde(default)]
    pub pattern_id: Option<String>,
    #[serde(default)]
    pub user_behaviors: Vec<String>,
    #[serde(default)]
    pub custom_patterns: Vec<TransactionPattern>,
    /// Regions to generate traffic in; empty means every topology region
    #[serde(default)]
    pub regions: Vec<String>,
    #[serde(default)]
    pub faults: Vec<FaultDirective>,
    /// Overrides the harness seed for this run
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Scenario {
    /// Scenario driven by a named profile.
    pub fn from_profile(profile_id: &str) -> Self {
        Self {
            profile_id: Some(profile_id.to_string()),
            ..Default::default()
        }
    }

    /// Scenario driven by inline phases.
    pub fn from_phases(phases: Vec<Phase>) -> Self {
        Self {
            phases: Some(phases),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn with_pattern(mut self, pattern_id: &str) -> Self {
        self.pattern_id = Some(pattern_id.to_string());
        self
    }

    pub fn with_fault(mut self, fault: FaultDirective) -> Self {
        self.faults.push(fault);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Resolves the scenario against the catalog and the bound topology.
    ///
    /// Every reference (profile, pattern, behavior, region, fault node) is
    /// checked here, before any run state exists.
    pub fn resolve(&self, catalog: &WorkloadCatalog, topology: &Topology) -> Result<ResolvedScenario, HarnessError> {
        let invalid = |msg: String| HarnessError::InvalidScenario(msg);

        let (phases, profile_pattern, default_name) = match (&self.profile_id, &self.phases) {
            (Some(_), Some(_)) => return Err(invalid("give either profileId or phases, not both".into())),
            (None, None) => return Err(invalid("scenario needs a profileId or phases".into())),
            (Some(id), None) => {
                let profile = catalog
                    .get_profile(id)
                    .ok_or_else(|| invalid(format!("unknown load profile '{}'", id)))?;
                (profile.phases, Some(profile.pattern_id), profile.name)
            }
            (None, Some(phases)) => (phases.clone(), None, "inline".to_string()),
        };
        validate_phases(&phases).map_err(invalid)?;

        let base_pattern = self.pattern_id.as_deref().or(profile_pattern.as_deref());
        let mix = catalog
            .resolve_mix(base_pattern, &self.user_behaviors, &self.custom_patterns)
            .map_err(|e| invalid(e.to_string()))?;

        let topology_regions = topology.regions();
        for region in &self.regions {
            if !topology_regions.contains(region) {
                return Err(invalid(format!("topology has no region '{}'", region)));
            }
        }
        let regions = if self.regions.is_empty() {
            topology_regions
        } else {
            self.regions.clone()
        };

        for fault in &self.faults {
            if topology.node(&fault.node_id).is_none() {
                return Err(invalid(format!("fault targets unknown node '{}'", fault.node_id)));
            }
            if !(fault.at_secs.is_finite() && fault.at_secs >= 0.0) {
                return Err(invalid(format!("fault on '{}' has a negative start", fault.node_id)));
            }
            if let Some(d) = fault.duration_secs {
                if !(d.is_finite() && d > 0.0) {
                    return Err(invalid(format!("fault on '{}' needs a positive duration", fault.node_id)));
                }
            }
        }

        Ok(ResolvedScenario {
            name: self.name.clone().unwrap_or(default_name),
            phases,
            mix,
            regions,
            faults: self.faults.clone(),
        })
    }
}

/// A scenario with every reference resolved, ready to drive a run.
#[derive(Debug, Clone)]
pub struct ResolvedScenario {
    pub name: String,
    pub phases: Vec<Phase>,
    pub mix: BehaviorMix,
    pub regions: Vec<String>,
    pub faults: Vec<FaultDirective>,
}
