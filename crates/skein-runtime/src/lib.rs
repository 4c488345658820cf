//! Controlled execution of actor programs: the operation scheduler, the
//! machine and monitor model, the per-run testing runtime and the engine
//! that drives it over many iterations.

pub mod bridge;
pub mod context;
pub mod engine;
pub mod machine;
pub mod monitor;
pub mod report;
pub mod runtime;
pub mod scheduler;

pub use bridge::TaskBridge;
pub use context::Context;
pub use engine::{run_portfolio, TestingEngine};
pub use machine::{Handling, Machine};
pub use monitor::{Monitor, MonitorContext};
pub use report::{BugKind, BugReport, EngineError, StopReason, TestReport};
pub use runtime::{TestEntry, TestingRuntime};
pub use scheduler::{FoundBug, OperationScheduler, RunOutcome, SharedStrategy};
