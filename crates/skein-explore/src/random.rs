use rand::Rng;
use rand_chacha::ChaCha8Rng;
use skein_core::{EntityId, SchedulableInfo};

use crate::rng::seeded_rng;
use crate::strategy::{enabled, SchedulingStrategy};

/// Uniformly random scheduling, the default strategy.
///
/// Picks among enabled entities with a seeded generator that keeps running
/// across iterations, so iteration `n` of seed `s` is always the same
/// schedule.
pub struct RandomStrategy {
    rng: ChaCha8Rng,
    seed: u64,
    stream: u64,
    max_steps: u64,
    scheduled_steps: u64,
}

impl RandomStrategy {
    pub fn new(seed: u64, max_steps: u64) -> Self {
        Self::with_stream(seed, 0, max_steps)
    }

    pub fn with_stream(seed: u64, stream: u64, max_steps: u64) -> Self {
        Self {
            rng: seeded_rng(seed, stream),
            seed,
            stream,
            max_steps,
            scheduled_steps: 0,
        }
    }
}

impl SchedulingStrategy for RandomStrategy {
    fn next(&mut self, choices: &[SchedulableInfo], _current: EntityId) -> Option<EntityId> {
        let candidates: Vec<EntityId> = enabled(choices).map(|c| c.id).collect();
        if candidates.is_empty() {
            return None;
        }
        let index = self.rng.gen_range(0..candidates.len());
        self.scheduled_steps += 1;
        Some(candidates[index])
    }

    fn next_boolean_choice(&mut self, max_value: u64) -> Option<bool> {
        self.scheduled_steps += 1;
        Some(self.rng.gen_range(0..max_value.max(1)) == 0)
    }

    fn next_integer_choice(&mut self, max_value: u64) -> Option<u64> {
        self.scheduled_steps += 1;
        Some(self.rng.gen_range(0..max_value.max(1)))
    }

    fn prepare_for_next_iteration(&mut self) -> bool {
        self.scheduled_steps = 0;
        true
    }

    fn reset(&mut self) {
        self.rng = seeded_rng(self.seed, self.stream);
        self.scheduled_steps = 0;
    }

    fn scheduled_steps(&self) -> u64 {
        self.scheduled_steps
    }

    fn has_reached_max_scheduling_steps(&self) -> bool {
        self.scheduled_steps >= self.max_steps
    }

    fn is_fair(&self) -> bool {
        true
    }

    fn description(&self) -> String {
        format!("random[seed '{}']", self.seed)
    }
}
