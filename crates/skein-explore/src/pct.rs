//! Probabilistic concurrency testing (PCT).
//!
//! Entities get random priorities and the highest-priority enabled entity
//! always runs. At a few randomly placed change points the running
//! entity is demoted to the lowest priority. Change points are drawn from
//! the length of the longest schedule seen so far.

use std::collections::BTreeSet;

use rand::seq::SliceRandom;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use skein_core::{EntityId, SchedulableInfo};
use tracing::debug;

use crate::rng::seeded_rng;
use crate::strategy::{enabled, SchedulingStrategy};

pub struct PctStrategy {
    rng: ChaCha8Rng,
    seed: u64,
    stream: u64,
    max_steps: u64,
    scheduled_steps: u64,
    /// Longest schedule observed, bounds where change points may land.
    schedule_length: u64,
    priority_switch_bound: usize,
    /// Highest priority first.
    prioritized: Vec<EntityId>,
    change_points: BTreeSet<u64>,
}

impl PctStrategy {
    pub fn new(seed: u64, max_steps: u64, priority_switch_bound: usize) -> Self {
        Self::with_stream(seed, 0, max_steps, priority_switch_bound)
    }

    pub fn with_stream(seed: u64, stream: u64, max_steps: u64, priority_switch_bound: usize) -> Self {
        Self {
            rng: seeded_rng(seed, stream),
            seed,
            stream,
            max_steps,
            scheduled_steps: 0,
            schedule_length: 0,
            priority_switch_bound,
            prioritized: Vec::new(),
            change_points: BTreeSet::new(),
        }
    }

    pub fn change_points(&self) -> &BTreeSet<u64> {
        &self.change_points
    }

    pub fn priorities(&self) -> &[EntityId] {
        &self.prioritized
    }

    fn highest_priority_enabled(&self, enabled: &[EntityId]) -> Option<EntityId> {
        self.prioritized
            .iter()
            .copied()
            .find(|id| enabled.contains(id))
    }

    fn move_change_point_forward(&mut self) {
        self.change_points.remove(&self.scheduled_steps);
        let mut point = self.scheduled_steps + 1;
        while self.change_points.contains(&point) {
            point += 1;
        }
        self.change_points.insert(point);
        debug!(point, "moved priority change point forward");
    }
}

impl SchedulingStrategy for PctStrategy {
    fn next(&mut self, choices: &[SchedulableInfo], current: EntityId) -> Option<EntityId> {
        let enabled_ids: Vec<EntityId> = enabled(choices).map(|c| c.id).collect();
        if enabled_ids.is_empty() {
            return None;
        }

        if self.prioritized.is_empty() {
            self.prioritized.push(current);
        }
        for choice in choices {
            if !self.prioritized.contains(&choice.id) {
                // never above the current head
                let index = self.rng.gen_range(0..self.prioritized.len()) + 1;
                self.prioritized.insert(index, choice.id);
            }
        }

        if self.change_points.contains(&self.scheduled_steps) {
            if enabled_ids.len() == 1 {
                self.move_change_point_forward();
            } else if let Some(top) = self.highest_priority_enabled(&enabled_ids) {
                self.prioritized.retain(|id| *id != top);
                self.prioritized.push(top);
                debug!(entity = %top, step = self.scheduled_steps, "demoted highest priority entity");
            }
        }

        let next = self.highest_priority_enabled(&enabled_ids)?;
        self.scheduled_steps += 1;
        Some(next)
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
        self.schedule_length = self.schedule_length.max(self.scheduled_steps);
        self.scheduled_steps = 0;
        self.prioritized.clear();
        self.change_points.clear();

        let mut points: Vec<u64> = (0..self.schedule_length).collect();
        points.shuffle(&mut self.rng);
        self.change_points
            .extend(points.into_iter().take(self.priority_switch_bound));
        true
    }

    fn reset(&mut self) {
        self.rng = seeded_rng(self.seed, self.stream);
        self.scheduled_steps = 0;
        self.schedule_length = 0;
        self.prioritized.clear();
        self.change_points.clear();
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
        let points: Vec<String> = self.change_points.iter().map(u64::to_string).collect();
        format!(
            "pct[priority change points '{}' [{}], seed '{}']",
            self.priority_switch_bound,
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
    fn test_current_keeps_top_priority_without_change_points() {
        let mut strategy = PctStrategy::new(5, 1000, 2);
        let choices = all_enabled(4);
        for _ in 0..10 {
            assert_eq!(strategy.next(&choices, EntityId(2)), Some(EntityId(2)));
        }
        assert_eq!(strategy.priorities()[0], EntityId(2));
        assert_eq!(strategy.priorities().len(), 4);
    }

    #[test]
    fn test_change_points_drawn_from_schedule_length() {
        let mut strategy = PctStrategy::new(5, 1000, 3);
        let choices = all_enabled(3);
        for _ in 0..20 {
            strategy.next(&choices, EntityId(0));
        }
        assert!(strategy.prepare_for_next_iteration());
        assert_eq!(strategy.change_points().len(), 3);
        assert!(strategy.change_points().iter().all(|p| *p < 20));
    }

    #[test]
    fn test_change_point_demotes_running_entity() {
        let mut strategy = PctStrategy::new(9, 1000, 1);
        let choices = all_enabled(2);
        strategy.next(&choices, EntityId(0));
        strategy.prepare_for_next_iteration();
        let point = *strategy.change_points().iter().next().unwrap();
        assert_eq!(point, 0);

        // the demotion happens on the very first decision
        let first = strategy.next(&choices, EntityId(0)).unwrap();
        assert_eq!(first, EntityId(1));
        assert_eq!(strategy.priorities().last(), Some(&EntityId(0)));
    }

    #[test]
    fn test_single_enabled_moves_change_point() {
        let mut strategy = PctStrategy::new(9, 1000, 1);
        let mut choices = all_enabled(2);
        strategy.next(&choices, EntityId(0));
        strategy.prepare_for_next_iteration();

        choices[1].enabled = false;
        assert_eq!(strategy.next(&choices, EntityId(0)), Some(EntityId(0)));
        assert!(strategy.change_points().contains(&1));
        assert!(!strategy.change_points().contains(&0));
    }

    #[test]
    fn test_unfair() {
        assert!(!PctStrategy::new(1, 10, 1).is_fair());
    }
}
