//! Trace recorders: the replayable schedule trace, the human-readable bug
//! trace, and the observer interface the runtime reports through.

pub mod bug;
pub mod observer;
pub mod schedule;

pub use bug::{Actor, BugStepKind, BugTrace, BugTraceStep, RandomValue};
pub use observer::{BugTraceRecorder, LogObserver, RuntimeEvent, RuntimeObserver};
pub use schedule::{ScheduleStep, ScheduleTrace};

#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("Trace I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Trace format error: {0}")]
    Json(#[from] serde_json::Error),
}
