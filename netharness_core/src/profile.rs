//! Load profiles: time-phased target-throughput schedules.

use crate::error::HarnessError;
use serde::{Deserialize, Serialize};

/// Tolerance when comparing declared and summed durations (seconds).
pub const DURATION_EPSILON: f64 = 1e-6;

/// Highest accepted phase target (transactions per second).
pub const MAX_TARGET_TPS: f64 = 100_000.0;

/// One ramp/sustain segment of a load profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Phase {
    pub name: String,
    /// Phase length in seconds
    #[serde(rename = "duration")]
    pub duration_secs: f64,
    /// Ramp slope in TPS per second; zero or less means an immediate step
    #[serde(default)]
    pub ramp_rate: f64,
    #[serde(rename = "targetTPS")]
    pub target_tps: f64,
}

impl Phase {
    pub fn new(name: &str, duration_secs: f64, ramp_rate: f64, target_tps: f64) -> Self {
        Self {
            name: name.to_string(),
            duration_secs,
            ramp_rate,
            target_tps,
        }
    }

    /// Target throughput `elapsed` seconds into this phase.
    ///
    /// Ramps linearly from `entry_tps` towards `target_tps` at `ramp_rate`,
    /// then holds at `target_tps`.
    pub fn rate_at(&self, entry_tps: f64, elapsed: f64) -> f64 {
        if self.ramp_rate <= 0.0 {
            return self.target_tps;
        }
        let delta = self.target_tps - entry_tps;
        let step = self.ramp_rate * elapsed.max(0.0);
        if step >= delta.abs() {
            self.target_tps
        } else {
            entry_tps + delta.signum() * step
        }
    }

    /// Seconds needed to reach the target from `entry_tps`.
    pub fn time_to_target(&self, entry_tps: f64) -> f64 {
        if self.ramp_rate <= 0.0 {
            0.0
        } else {
            ((self.target_tps - entry_tps).abs() / self.ramp_rate).min(self.duration_secs)
        }
    }
}

/// Summary of a profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverallSummary {
    #[serde(rename = "totalDuration")]
    pub total_duration_secs: f64,
    #[serde(rename = "peakTPS")]
    pub peak_tps: f64,
}

/// A time-phased throughput schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadProfile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub custom: bool,
    #[serde(rename = "duration")]
    pub duration_secs: f64,
    pub phases: Vec<Phase>,
    pub overall: OverallSummary,
    /// Pattern used when a run does not override the mix
    pub pattern_id: String,
}

impl LoadProfile {
    /// Sum of phase durations.
    pub fn phase_duration_sum(&self) -> f64 {
        self.phases.iter().map(|p| p.duration_secs).sum()
    }

    /// Highest phase target.
    pub fn max_phase_tps(&self) -> f64 {
        max_target(&self.phases)
    }

    /// Total transactions an ideal tick-accurate run would request.
    ///
    /// Mirrors the engine's per-tick `ceil(rate × slice)` accounting.
    pub fn expected_transactions(&self, tick_secs: f64) -> u64 {
        expected_transactions(&self.phases, tick_secs)
    }
}

fn max_target(phases: &[Phase]) -> f64 {
    phases.iter().map(|p| p.target_tps).fold(0.0, f64::max)
}

/// Transactions requested by a tick-driven walk over `phases`.
pub fn expected_transactions(phases: &[Phase], tick_secs: f64) -> u64 {
    if tick_secs <= 0.0 {
        return 0;
    }
    let mut total = 0u64;
    let mut entry = 0.0;
    for phase in phases {
        let mut elapsed = 0.0;
        while phase.duration_secs - elapsed > DURATION_EPSILON {
            let slice = tick_secs.min(phase.duration_secs - elapsed);
            elapsed += slice;
            total += (phase.rate_at(entry, elapsed) * slice - DURATION_EPSILON).ceil().max(0.0) as u64;
        }
        entry = phase.target_tps;
    }
    total
}

/// Caller-supplied definition for a custom load profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadProfileSpec {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "duration")]
    pub duration_secs: f64,
    pub phases: Vec<Phase>,
    pub overall: OverallSummary,
    #[serde(default)]
    pub pattern_id: Option<String>,
}

/// Validates a phase list on its own.
pub fn validate_phases(phases: &[Phase]) -> Result<(), String> {
    if phases.is_empty() {
        return Err("profile needs at least one phase".into());
    }
    for phase in phases {
        if !(phase.duration_secs.is_finite() && phase.duration_secs >= 0.0) {
            return Err(format!("phase '{}' duration must be non-negative", phase.name));
        }
        if !(phase.target_tps.is_finite() && phase.target_tps >= 0.0) {
            return Err(format!("phase '{}' targetTPS must be non-negative", phase.name));
        }
        if phase.target_tps > MAX_TARGET_TPS {
            return Err(format!(
                "phase '{}' targetTPS {} exceeds the maximum of {}",
                phase.name, phase.target_tps, MAX_TARGET_TPS
            ));
        }
        if !phase.ramp_rate.is_finite() {
            return Err(format!("phase '{}' rampRate must be finite", phase.name));
        }
    }
    Ok(())
}

impl LoadProfileSpec {
    /// Checks durations and that `overall` agrees with the phase list.
    pub fn validate(&self) -> Result<(), HarnessError> {
        let invalid = |msg: String| Err(HarnessError::InvalidLoadProfile(msg));

        if self.name.trim().is_empty() {
            return invalid("name must not be empty".into());
        }
        if let Err(msg) = validate_phases(&self.phases) {
            return invalid(msg);
        }

        let sum: f64 = self.phases.iter().map(|p| p.duration_secs).sum();
        if (sum - self.duration_secs).abs() > DURATION_EPSILON {
            return invalid(format!(
                "phase durations sum to {}s but duration is {}s",
                sum, self.duration_secs
            ));
        }
        if (sum - self.overall.total_duration_secs).abs() > DURATION_EPSILON {
            return invalid(format!(
                "overall.totalDuration {}s does not match phase sum {}s",
                self.overall.total_duration_secs, sum
            ));
        }
        let max = max_target(&self.phases);
        if self.overall.peak_tps + DURATION_EPSILON < max {
            return invalid(format!(
                "overall.peakTPS {} is below the highest phase target {}",
                self.overall.peak_tps, max
            ));
        }
        Ok(())
    }

    /// Builds the profile, marking it custom.
    pub fn into_profile(self, id: String, default_pattern: &str) -> LoadProfile {
        LoadProfile {
            id,
            name: self.name,
            description: self.description.unwrap_or_default(),
            custom: true,
            duration_secs: self.duration_secs,
            phases: self.phases,
            overall: self.overall,
            pattern_id: self.pattern_id.unwrap_or_else(|| default_pattern.to_string()),
        }
    }
}

fn builtin(id: &str, name: &str, description: &str, pattern_id: &str, phases: Vec<Phase>) -> LoadProfile {
    let total: f64 = phases.iter().map(|p| p.duration_secs).sum();
    LoadProfile {
        id: id.into(),
        name: name.into(),
        description: description.into(),
        custom: false,
        duration_secs: total,
        overall: OverallSummary {
            total_duration_secs: total,
            peak_tps: max_target(&phases),
        },
        phases,
        pattern_id: pattern_id.into(),
    }
}

/// The built-in profile catalog.
pub fn builtin_profiles() -> Vec<LoadProfile> {
    vec![
        builtin(
            "steady-state",
            "Steady State",
            "Gentle warm-up then a long constant plateau",
            "retail-mix",
            vec![
                Phase::new("warmup", 25.0, 2.0, 50.0),
                Phase::new("sustain", 120.0, 0.0, 50.0),
            ],
        ),
        builtin(
            "ramp-up",
            "Ramp Up",
            "Staged climb to a high plateau",
            "defi-heavy",
            vec![
                Phase::new("ramp-100", 50.0, 2.0, 100.0),
                Phase::new("ramp-250", 75.0, 2.0, 250.0),
                Phase::new("hold", 60.0, 0.0, 250.0),
            ],
        ),
        builtin(
            "spike",
            "Spike",
            "Baseline traffic with a sudden burst",
            "nft-drop",
            vec![
                Phase::new("baseline", 60.0, 0.0, 50.0),
                Phase::new("spike", 15.0, 100.0, 500.0),
                Phase::new("recovery", 45.0, 50.0, 50.0),
            ],
        ),
        builtin(
            "stress",
            "Stress",
            "Climb to saturation, hold, and cool down",
            "defi-heavy",
            vec![
                Phase::new("ramp", 120.0, 10.0, 1000.0),
                Phase::new("sustain", 180.0, 0.0, 1000.0),
                Phase::new("cooldown", 60.0, 20.0, 0.0),
            ],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn spec(phases: Vec<Phase>, duration: f64, total: f64, peak: f64) -> LoadProfileSpec {
        LoadProfileSpec {
            name: "custom".into(),
            description: None,
            duration_secs: duration,
            phases,
            overall: OverallSummary {
                total_duration_secs: total,
                peak_tps: peak,
            },
            pattern_id: None,
        }
    }

    #[test]
    fn test_builtin_durations_sum() {
        for profile in builtin_profiles() {
            assert_relative_eq!(profile.phase_duration_sum(), profile.duration_secs);
            assert_relative_eq!(profile.overall.total_duration_secs, profile.duration_secs);
            assert!(profile.overall.peak_tps >= profile.max_phase_tps());
        }
    }

    #[test]
    fn test_rate_at_ramps_then_holds() {
        let phase = Phase::new("ramp", 10.0, 5.0, 50.0);
        assert_relative_eq!(phase.rate_at(0.0, 0.0), 0.0);
        assert_relative_eq!(phase.rate_at(0.0, 4.0), 20.0);
        assert_relative_eq!(phase.rate_at(0.0, 10.0), 50.0);
        assert_relative_eq!(phase.rate_at(0.0, 30.0), 50.0);
        assert_relative_eq!(phase.time_to_target(0.0), 10.0);
    }

    #[test]
    fn test_rate_at_ramps_down() {
        let phase = Phase::new("cooldown", 10.0, 20.0, 0.0);
        assert_relative_eq!(phase.rate_at(100.0, 1.0), 80.0);
        assert_relative_eq!(phase.rate_at(100.0, 5.0), 0.0);
    }

    #[test]
    fn test_immediate_step() {
        let phase = Phase::new("step", 10.0, 0.0, 70.0);
        assert_relative_eq!(phase.rate_at(0.0, 0.0), 70.0);
        assert_relative_eq!(phase.time_to_target(0.0), 0.0);
    }

    #[test]
    fn test_expected_transactions_ramp_sustain() {
        let phases = vec![Phase::new("ramp", 10.0, 5.0, 50.0), Phase::new("sustain", 20.0, 0.0, 50.0)];
        // 5 + 10 + ... + 50 during the ramp, then 20 × 50
        assert_eq!(expected_transactions(&phases, 1.0), 275 + 1000);
    }

    #[test]
    fn test_spec_validation() {
        let phases = vec![Phase::new("a", 10.0, 0.0, 10.0), Phase::new("b", 5.0, 0.0, 20.0)];
        spec(phases.clone(), 15.0, 15.0, 20.0).validate().unwrap();

        assert!(spec(phases.clone(), 14.0, 15.0, 20.0).validate().is_err());
        assert!(spec(phases.clone(), 15.0, 16.0, 20.0).validate().is_err());
        assert!(spec(phases.clone(), 15.0, 15.0, 19.0).validate().is_err());
        assert!(spec(vec![], 0.0, 0.0, 0.0).validate().is_err());
        assert!(spec(vec![Phase::new("neg", -1.0, 0.0, 1.0)], -1.0, -1.0, 1.0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_absurd_target_rate_is_rejected() {
        let at_cap = vec![Phase::new("max", 1.0, 0.0, MAX_TARGET_TPS)];
        spec(at_cap, 1.0, 1.0, MAX_TARGET_TPS).validate().unwrap();

        let huge = vec![Phase::new("huge", 1.0, 0.0, 1e18)];
        assert!(matches!(
            spec(huge.clone(), 1.0, 1.0, 1e18).validate(),
            Err(HarnessError::InvalidLoadProfile(_))
        ));
        assert!(validate_phases(&huge).unwrap_err().contains("huge"));
    }

    #[test]
    fn test_zero_length_phase_is_allowed() {
        let phases = vec![Phase::new("noop", 0.0, 0.0, 10.0), Phase::new("b", 5.0, 0.0, 20.0)];
        spec(phases, 5.0, 5.0, 20.0).validate().unwrap();
    }

    #[test]
    fn test_phase_json_field_names() {
        let json = serde_json::json!({"name": "p", "duration": 10, "rampRate": 2, "targetTPS": 40});
        let phase: Phase = serde_json::from_value(json).unwrap();
        assert_eq!(phase, Phase::new("p", 10.0, 2.0, 40.0));
    }
}
