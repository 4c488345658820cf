use skein_core::{ActionResult, Event};

use crate::context::Context;

/// Whether a state had a handler for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handling {
    Handled,
    /// Pops pushed states and retries; in the bottom state this is a bug.
    Unhandled,
}

/// A communicating state machine.
///
/// States are named by strings. The runtime keeps the state stack and
/// calls into the machine for every action; transitions are requested
/// through the `Context` (`goto`, `push`, `pop`, `raise`, `halt`) and take
/// effect once the action returns.
pub trait Machine: Send + 'static {
    /// Type name; the runtime displays instances as `Name(id)`.
    fn name(&self) -> &str;

    fn start_state(&self) -> &str;

    fn on_entry(&mut self, _state: &str, _ctx: &Context) -> ActionResult {
        Ok(())
    }

    fn on_exit(&mut self, _state: &str, _ctx: &Context) -> ActionResult {
        Ok(())
    }

    fn on_event(&mut self, state: &str, event: &Event, ctx: &Context) -> ActionResult<Handling>;

    /// Deferred events stay queued while the machine is in `state`.
    fn defers(&self, _state: &str, _event: &Event) -> bool {
        false
    }

    /// Whether `state` handles the built-in `default` event, which fires
    /// when nothing can be dequeued.
    fn has_default_handler(&self, _state: &str) -> bool {
        false
    }

    /// Hash of user fields that distinguish otherwise equal states.
    fn state_hash(&self) -> u64 {
        0
    }
}
