//! Testing configuration.
//!
//! Loaded from JSON or built in code. Every field has a default, so a
//! config file only needs the fields it changes.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Which base exploration strategy drives the search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyKind {
    /// Uniformly random among enabled entities.
    Random,
    /// Probabilistic priority scheduling with a bounded number of
    /// priority change points.
    Pct { priority_switch_bound: usize },
    /// Systematic dynamic partial-order reduction.
    Dpor,
    /// Exhaustive depth-first enumeration of every schedule and every
    /// nondeterministic value.
    Dfs,
    /// Round-robin scheduling that skips ahead at up to `max_delays`
    /// randomly placed delay points per run.
    DelayBounding { max_delays: usize },
    /// Reproduce the schedule stored at `replay_trace_path`.
    Replay,
}

/// Reduction applied around the base strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReductionKind {
    None,
    OmitSchedulingPoints,
    ForceSchedule,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Number of runs (iterations) to explore.
    pub iterations: u32,
    /// Step bound for unfair strategies (PCT, DPOR, DFS, delay bounding).
    pub max_unfair_steps: u64,
    /// Step bound for fair strategies (random).
    pub max_fair_steps: u64,
    pub strategy: StrategyKind,
    pub reduction: ReductionKind,
    /// Wrap the strategy in a liveness checker.
    pub liveness_checking: bool,
    /// Use cycle detection instead of temperature checking.
    pub cycle_detection: bool,
    /// 0 means half of `max_fair_steps`.
    pub liveness_temperature_threshold: u64,
    /// Steps to run before cycle detection starts caching states.
    pub safety_prefix_bound: u64,
    /// Only report cycles in which every enabled entity was scheduled.
    pub fair_cycles_only: bool,
    /// Seed for every random generator the strategies use.
    pub seed: u64,
    pub replay_trace_path: Option<PathBuf>,
    /// Report hitting the step bound as a bug instead of ending the run.
    pub consider_depth_bound_hit_as_bug: bool,
    pub stop_on_first_bug: bool,
    /// Where bug traces are written. Nothing is written when unset.
    pub output_dir: Option<PathBuf>,
    /// Engines run side by side by the portfolio runner.
    pub parallel_workers: usize,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            iterations: 100,
            max_unfair_steps: 10_000,
            max_fair_steps: 100_000,
            strategy: StrategyKind::Random,
            reduction: ReductionKind::None,
            liveness_checking: false,
            cycle_detection: false,
            liveness_temperature_threshold: 0,
            safety_prefix_bound: 0,
            fair_cycles_only: false,
            seed: 42,
            replay_trace_path: None,
            consider_depth_bound_hit_as_bug: false,
            stop_on_first_bug: true,
            output_dir: None,
            parallel_workers: 1,
        }
    }
}

impl Configuration {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Configuration = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Check for settings that cannot work together.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.iterations == 0 {
            return Err(ConfigError::Invalid("iterations must be at least 1".into()));
        }
        if self.max_fair_steps == 0 || self.max_unfair_steps == 0 {
            return Err(ConfigError::Invalid("step bounds must be positive".into()));
        }
        if self.parallel_workers == 0 {
            return Err(ConfigError::Invalid(
                "parallel_workers must be at least 1".into(),
            ));
        }
        if self.cycle_detection && !self.liveness_checking {
            return Err(ConfigError::Invalid(
                "cycle_detection requires liveness_checking".into(),
            ));
        }
        if let StrategyKind::Pct {
            priority_switch_bound,
        } = self.strategy
        {
            if priority_switch_bound == 0 {
                return Err(ConfigError::Invalid(
                    "priority_switch_bound must be at least 1".into(),
                ));
            }
        }
        if self.strategy == (StrategyKind::DelayBounding { max_delays: 0 }) {
            return Err(ConfigError::Invalid("max_delays must be at least 1".into()));
        }
        if self.strategy == StrategyKind::Replay && self.replay_trace_path.is_none() {
            return Err(ConfigError::Invalid(
                "replay strategy requires replay_trace_path".into(),
            ));
        }
        Ok(())
    }

    pub fn liveness_temperature_threshold(&self) -> u64 {
        if self.liveness_temperature_threshold == 0 {
            (self.max_fair_steps / 2).max(1)
        } else {
            self.liveness_temperature_threshold
        }
    }

    pub fn is_replay(&self) -> bool {
        self.strategy == StrategyKind::Replay
    }
}
