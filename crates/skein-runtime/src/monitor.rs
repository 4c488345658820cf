//! Specification monitors.
//!
//! A monitor observes events the program sends it explicitly and runs
//! synchronously on the caller's thread. Hot states mark obligations that
//! must eventually be discharged; a monitor that stays hot is a liveness
//! bug.

use skein_core::{Event, Temperature};

use crate::machine::Handling;

pub trait Monitor: Send + 'static {
    fn name(&self) -> &str;

    fn start_state(&self) -> &str;

    fn on_entry(&mut self, _state: &str, _ctx: &mut MonitorContext) {}

    fn on_event(&mut self, state: &str, event: &Event, ctx: &mut MonitorContext) -> Handling;

    fn temperature(&self, _state: &str) -> Temperature {
        Temperature::Neutral
    }

    fn state_hash(&self) -> u64 {
        0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum MonitorStep {
    Goto(String),
    Raise(Event),
}

/// Handle passed to monitor actions. Requests are applied after the
/// action returns; only the first transition of an action counts.
#[derive(Debug, Default)]
pub struct MonitorContext {
    step: Option<MonitorStep>,
    failure: Option<String>,
}

impl MonitorContext {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub fn goto(&mut self, state: impl Into<String>) {
        self.step.get_or_insert(MonitorStep::Goto(state.into()));
    }

    pub fn raise(&mut self, event: Event) {
        self.step.get_or_insert(MonitorStep::Raise(event));
    }

    /// Record a safety violation. The first failure of a call wins.
    pub fn assert(&mut self, predicate: bool, message: impl Into<String>) {
        if !predicate && self.failure.is_none() {
            self.failure = Some(message.into());
        }
    }

    pub(crate) fn take_step(&mut self) -> Option<MonitorStep> {
        self.step.take()
    }

    pub(crate) fn take_failure(&mut self) -> Option<String> {
        self.failure.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_transition_wins() {
        let mut ctx = MonitorContext::new();
        ctx.goto("Hot");
        ctx.raise(Event::new("Again"));
        assert_eq!(ctx.take_step(), Some(MonitorStep::Goto("Hot".into())));
        assert_eq!(ctx.take_step(), None);
    }

    #[test]
    fn test_failed_assert_is_kept() {
        let mut ctx = MonitorContext::new();
        ctx.assert(true, "fine");
        ctx.assert(false, "first");
        ctx.assert(false, "second");
        assert_eq!(ctx.take_failure().as_deref(), Some("first"));
    }
}
