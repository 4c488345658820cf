//! Exploration strategies: the policies that pick which entity runs at
//! each scheduling point, plus the state cache used for cycle detection.

pub mod builder;
pub mod delay_bounding;
pub mod dfs;
pub mod dpor;
pub mod liveness;
pub mod pct;
pub mod random;
pub mod reduction;
pub mod replay;
pub mod rng;
pub mod state_cache;
pub mod strategy;

pub use builder::build_strategy;
pub use delay_bounding::DelayBoundingStrategy;
pub use dfs::DfsStrategy;
pub use dpor::DporStrategy;
pub use liveness::{CycleDetectionStrategy, TemperatureCheckingStrategy};
pub use pct::PctStrategy;
pub use random::RandomStrategy;
pub use reduction::BasicReductionStrategy;
pub use replay::ReplayStrategy;
pub use state_cache::{CachedState, StateCache};
pub use strategy::{LivenessViolation, SchedulingStrategy};
