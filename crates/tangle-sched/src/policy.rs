//! Collection policy and scheduler configuration.
//!
//! Both types load from partial JSON: missing fields take their defaults.
//!
//! ```
//! use tangle_sched::policy::GcPolicy;
//!
//! let policy = GcPolicy::from_json_str(r#"{ "require_oversight": false }"#).unwrap();
//! assert!(!policy.require_oversight);
//! assert_eq!(policy.memory_threshold, 0.8);
//! ```

use serde::{Deserialize, Serialize};

use crate::SchedError;

// ---------------------------------------------------------------------------
// GcPolicy
// ---------------------------------------------------------------------------

/// Knobs for one GC run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GcPolicy {
    /// Memory pressure (0..=1) at which a tick forces a GC run and armed
    /// timers become eligible early.
    pub memory_threshold: f64,
    /// Under pressure, armed resources this close (ms) to their deadline
    /// are collected early.
    pub coherence_threshold_ms: u64,
    /// Under pressure, armed resources untouched for this long (ms) are
    /// collected early.
    pub idle_threshold_ms: u64,
    /// Never reclaim part of a live group.
    pub respect_entanglement: bool,
    /// Withhold critical resources until approved.
    pub require_oversight: bool,
    /// Soft limit; exceeding it only produces a warning.
    pub max_gc_duration_ms: u64,
    /// Hand collectable resources to the provider as one batch.
    pub parallel_collection: bool,
}

impl Default for GcPolicy {
    fn default() -> Self {
        Self {
            memory_threshold: 0.8,
            coherence_threshold_ms: 5_000,
            idle_threshold_ms: 30_000,
            respect_entanglement: true,
            require_oversight: true,
            max_gc_duration_ms: 10_000,
            parallel_collection: true,
        }
    }
}

impl GcPolicy {
    pub fn validate(&self) -> Result<(), SchedError> {
        if !(0.0..=1.0).contains(&self.memory_threshold) {
            return Err(SchedError::InvalidPolicy {
                field: "memory_threshold",
                reason: format!("{} is outside 0..=1", self.memory_threshold),
            });
        }
        if self.max_gc_duration_ms == 0 {
            return Err(SchedError::InvalidPolicy {
                field: "max_gc_duration_ms",
                reason: "must be positive".to_owned(),
            });
        }
        Ok(())
    }

    /// Parse and validate a (possibly partial) JSON policy.
    pub fn from_json_str(json: &str) -> Result<Self, SchedError> {
        let policy: Self = serde_json::from_str(json)?;
        policy.validate()?;
        Ok(policy)
    }

    /// Selection criteria for a run observing `memory_pressure`.
    pub fn criteria(&self, memory_pressure: f64) -> GcCriteria {
        GcCriteria {
            under_pressure: memory_pressure >= self.memory_threshold,
            coherence_threshold_ms: self.coherence_threshold_ms,
            idle_threshold_ms: self.idle_threshold_ms,
        }
    }
}

// ---------------------------------------------------------------------------
// GcCriteria
// ---------------------------------------------------------------------------

/// What makes a resource eligible in one run. Resources whose deadline has
/// passed are always eligible; the thresholds only apply `under_pressure`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GcCriteria {
    pub under_pressure: bool,
    pub coherence_threshold_ms: u64,
    pub idle_threshold_ms: u64,
}

// ---------------------------------------------------------------------------
// SchedulerConfig
// ---------------------------------------------------------------------------

/// How `reset_activity` re-arms a deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode", content = "ms")]
pub enum ResetWindow {
    /// `now + the duration the timer was scheduled with`.
    #[default]
    OriginalDuration,
    /// `now + a fixed window`.
    Fixed(u64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Candidate count above which queue processing forces a GC run.
    pub candidate_watermark: usize,
    pub reset_window: ResetWindow,
    /// Candidates examined per reference-counting pass.
    pub refcount_budget: usize,
    pub policy: GcPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            candidate_watermark: 100,
            reset_window: ResetWindow::OriginalDuration,
            refcount_budget: 1_000,
            policy: GcPolicy::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<(), SchedError> {
        if self.refcount_budget == 0 {
            return Err(SchedError::InvalidPolicy {
                field: "refcount_budget",
                reason: "must be positive".to_owned(),
            });
        }
        self.policy.validate()
    }

    pub fn from_json_str(json: &str) -> Result<Self, SchedError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let p = GcPolicy::default();
        assert_eq!(p.memory_threshold, 0.8);
        assert_eq!(p.coherence_threshold_ms, 5_000);
        assert_eq!(p.idle_threshold_ms, 30_000);
        assert!(p.respect_entanglement);
        assert!(p.require_oversight);
        assert_eq!(p.max_gc_duration_ms, 10_000);
        assert!(p.parallel_collection);

        let c = SchedulerConfig::default();
        assert_eq!(c.candidate_watermark, 100);
        assert_eq!(c.refcount_budget, 1_000);
        assert_eq!(c.reset_window, ResetWindow::OriginalDuration);
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        let err = GcPolicy::from_json_str(r#"{ "memory_threshold": 1.5 }"#).unwrap_err();
        assert!(matches!(err, SchedError::InvalidPolicy { field: "memory_threshold", .. }));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = GcPolicy::from_json_str("{ nope").unwrap_err();
        assert!(matches!(err, SchedError::PolicyParse(_)));
    }

    #[test]
    fn nested_partial_config_loads() {
        let json = r#"{
            "candidate_watermark": 10,
            "reset_window": { "mode": "fixed", "ms": 2500 },
            "policy": { "parallel_collection": false }
        }"#;
        let c = SchedulerConfig::from_json_str(json).unwrap();
        assert_eq!(c.candidate_watermark, 10);
        assert_eq!(c.reset_window, ResetWindow::Fixed(2_500));
        assert!(!c.policy.parallel_collection);
        assert!(c.policy.require_oversight);
    }

    #[test]
    fn criteria_reflect_pressure() {
        let p = GcPolicy::default();
        assert!(!p.criteria(0.5).under_pressure);
        assert!(p.criteria(0.8).under_pressure);
    }
}
