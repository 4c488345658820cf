//! Delay-bounded scheduling.
//!
//! Without delays the schedule is deterministic round-robin: the current
//! entity keeps running while it is enabled, otherwise the next enabled
//! entity after it takes over. Each run draws `max_delays` delay points
//! from the length of the longest schedule seen so far; at a delay point
//! the scheduler skips over one more entity than it otherwise would.

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use skein_core::{EntityId, SchedulableInfo};
use tracing::debug;

use crate::rng::seeded_rng;
use crate::strategy::SchedulingStrategy;

pub struct DelayBoundingStrategy {
    rng: ChaCha8Rng,
    seed: u64,
    stream: u64,
    max_steps: u64,
    scheduled_steps: u64,
    schedule_length: u64,
    max_delays: usize,
    /// Ascending; a step may carry more than one delay.
    remaining_delays: Vec<u64>,
}

impl DelayBoundingStrategy {
    pub fn new(seed: u64, max_steps: u64, max_delays: usize) -> Self {
        Self::with_stream(seed, 0, max_steps, max_delays)
    }

    pub fn with_stream(seed: u64, stream: u64, max_steps: u64, max_delays: usize) -> Self {
        Self {
            rng: seeded_rng(seed, stream),
            seed,
            stream,
            max_steps,
            scheduled_steps: 0,
            schedule_length: 0,
            max_delays,
            remaining_delays: Vec::new(),
        }
    }

    pub fn remaining_delays(&self) -> &[u64] {
        &self.remaining_delays
    }

    /// Consume every delay placed on the current step.
    fn take_delays(&mut self) -> usize {
        let due = self
            .remaining_delays
            .iter()
            .take_while(|point| **point == self.scheduled_steps)
            .count();
        self.remaining_delays.drain(..due);
        due
    }
}

impl SchedulingStrategy for DelayBoundingStrategy {
    fn next(&mut self, choices: &[SchedulableInfo], current: EntityId) -> Option<EntityId> {
        let start = choices.iter().position(|c| c.id == current).unwrap_or(0);
        let ordered: Vec<EntityId> = choices[start..]
            .iter()
            .chain(&choices[..start])
            .filter(|c| c.enabled)
            .map(|c| c.id)
            .collect();
        if ordered.is_empty() {
            return None;
        }

        let delays = self.take_delays();
        if delays > 0 {
            debug!(step = self.scheduled_steps, delays, "delaying scheduled entity");
        }
        let next = ordered[delays % ordered.len()];
        self.scheduled_steps += 1;
        Some(next)
    }

    fn next_boolean_choice(&mut self, _max_value: u64) -> Option<bool> {
        let delayed = self.take_delays() > 0;
        self.scheduled_steps += 1;
        Some(delayed)
    }

    fn next_integer_choice(&mut self, max_value: u64) -> Option<u64> {
        self.scheduled_steps += 1;
        Some(self.rng.gen_range(0..max_value.max(1)))
    }

    fn prepare_for_next_iteration(&mut self) -> bool {
        self.schedule_length = self.schedule_length.max(self.scheduled_steps);
        self.scheduled_steps = 0;

        let length = self.schedule_length;
        let rng = &mut self.rng;
        self.remaining_delays = (0..self.max_delays)
            .map(|_| rng.gen_range(0..=length))
            .collect();
        self.remaining_delays.sort_unstable();
        true
    }

    fn reset(&mut self) {
        self.rng = seeded_rng(self.seed, self.stream);
        self.scheduled_steps = 0;
        self.schedule_length = 0;
        self.remaining_delays.clear();
    }

    fn scheduled_steps(&self) -> u64 {
        self.scheduled_steps
    }

    fn has_reached_max_scheduling_steps(&self) -> bool {
        self.scheduled_steps >= self.max_steps
    }

    fn is_fair(&self) -> bool {
        false
    }

    fn description(&self) -> String {
        let points: Vec<String> = self.remaining_delays.iter().map(u64::to_string).collect();
        format!(
            "delay-bounding[delays '{}' [{}], seed '{}']",
            self.max_delays,
            points.join(", "),
            self.seed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_core::EntityKind;

    fn all_enabled(n: u64) -> Vec<SchedulableInfo> {
        (0..n)
            .map(|id| SchedulableInfo::new(EntityId(id), format!("M({id})"), EntityKind::Machine))
            .collect()
    }

    #[test]
    fn test_no_delays_keeps_current_running() {
        let mut strategy = DelayBoundingStrategy::new(3, 100, 2);
        let choices = all_enabled(3);
        for _ in 0..5 {
            assert_eq!(strategy.next(&choices, EntityId(1)), Some(EntityId(1)));
        }
    }

    #[test]
    fn test_round_robin_after_disabled_current() {
        let mut strategy = DelayBoundingStrategy::new(3, 100, 2);
        let mut choices = all_enabled(3);
        choices[2].enabled = false;
        assert_eq!(strategy.next(&choices, EntityId(2)), Some(EntityId(0)));
    }

    #[test]
    fn test_first_run_delays_the_first_step() {
        let mut strategy = DelayBoundingStrategy::new(3, 100, 1);
        assert!(strategy.prepare_for_next_iteration());
        // nothing has been scheduled yet, so every delay lands on step 0
        assert_eq!(strategy.remaining_delays(), &[0]);

        let choices = all_enabled(3);
        assert_eq!(strategy.next(&choices, EntityId(1)), Some(EntityId(2)));
        assert_eq!(strategy.next(&choices, EntityId(2)), Some(EntityId(2)));
        assert!(strategy.remaining_delays().is_empty());
    }

    #[test]
    fn test_delays_drawn_from_schedule_length() {
        let mut strategy = DelayBoundingStrategy::new(11, 1000, 4);
        let choices = all_enabled(2);
        for _ in 0..30 {
            strategy.next(&choices, EntityId(0));
        }
        strategy.prepare_for_next_iteration();
        let delays = strategy.remaining_delays().to_vec();
        assert_eq!(delays.len(), 4);
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert!(delays.iter().all(|d| *d <= 30));
        assert!(strategy.description().starts_with("delay-bounding[delays '4' ["));
    }

    #[test]
    fn test_boolean_choice_true_only_at_delay() {
        let mut strategy = DelayBoundingStrategy::new(3, 100, 1);
        strategy.prepare_for_next_iteration();
        assert_eq!(strategy.next_boolean_choice(2), Some(true));
        assert_eq!(strategy.next_boolean_choice(2), Some(false));
    }

    #[test]
    fn test_reset_replays_the_same_delays() {
        let mut strategy = DelayBoundingStrategy::new(5, 1000, 3);
        let choices = all_enabled(2);
        for _ in 0..40 {
            strategy.next(&choices, EntityId(0));
        }
        strategy.prepare_for_next_iteration();
        let first = strategy.remaining_delays().to_vec();

        strategy.reset();
        for _ in 0..40 {
            strategy.next(&choices, EntityId(0));
        }
        strategy.prepare_for_next_iteration();
        assert_eq!(strategy.remaining_delays(), first.as_slice());
        assert!(!strategy.is_fair());
    }
}
