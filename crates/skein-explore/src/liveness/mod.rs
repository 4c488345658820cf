//! Liveness checking wrappers.
//!
//! Both wrappers see a program snapshot before every scheduling decision
//! and otherwise delegate to the strategy they wrap.

pub mod cycle;
pub mod temperature;

pub use cycle::CycleDetectionStrategy;
pub use temperature::TemperatureCheckingStrategy;

use skein_core::EntityState;
use skein_trace::ScheduleTrace;

use crate::strategy::LivenessViolation;

fn violation(monitor: &EntityState, message: String, witness: Option<ScheduleTrace>) -> LivenessViolation {
    LivenessViolation {
        monitor: monitor.id,
        monitor_name: monitor.name.clone(),
        state: monitor.state.clone(),
        message,
        witness,
    }
}
