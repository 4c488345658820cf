//! Happens-before race analysis over one executed schedule.

use rustc_hash::FxHashMap;
use skein_core::{EntityId, OperationType};
use tracing::debug;

use super::stack::Level;

/// Vector clock indexed by entity id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorClock(Vec<u64>);

impl VectorClock {
    pub fn new(dimension: usize) -> Self {
        Self(vec![0; dimension])
    }

    pub fn get(&self, entity: EntityId) -> u64 {
        self.0.get(entity.index()).copied().unwrap_or(0)
    }

    pub fn set(&mut self, entity: EntityId, value: u64) {
        let index = entity.index();
        if index >= self.0.len() {
            self.0.resize(index + 1, 0);
        }
        self.0[index] = value;
    }

    pub fn join(&mut self, other: &VectorClock) {
        if other.0.len() > self.0.len() {
            self.0.resize(other.0.len(), 0);
        }
        for (mine, theirs) in self.0.iter_mut().zip(&other.0) {
            *mine = (*mine).max(*theirs);
        }
    }
}

/// A pair of conflicting steps (1-based) not ordered by happens-before.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Race {
    pub earlier: usize,
    pub later: usize,
}

/// Result of analysing one schedule.
#[derive(Debug, Default)]
pub struct RaceReport {
    pub races: Vec<Race>,
    /// Backtrack points added, as (level index, entity).
    pub added: Vec<(usize, EntityId)>,
}

/// Find the races of the schedule described by `levels` (step `i` is
/// `levels[i - 1]`) and add a backtrack point for each.
pub fn analyse(levels: &mut [Level]) -> RaceReport {
    let dimension = levels
        .iter()
        .flat_map(|l| l.entries.iter().map(|e| e.id.index() + 1))
        .max()
        .unwrap_or(0);
    let mut clocks: Vec<VectorClock> = Vec::with_capacity(levels.len());
    let mut last_step_of: FxHashMap<EntityId, usize> = FxHashMap::default();
    let mut created_at: FxHashMap<EntityId, usize> = FxHashMap::default();
    let mut last_write: FxHashMap<EntityId, usize> = FxHashMap::default();
    let mut report = RaceReport::default();
    let mut pending: Vec<(usize, Vec<EntityId>)> = Vec::new();

    for step in 1..=levels.len() {
        let level = &levels[step - 1];
        let entry = level.selected_entry();
        let entity = entry.id;

        let mut clock = if let Some(prev) = last_step_of.get(&entity) {
            clocks[prev - 1].clone()
        } else if let Some(creator) = created_at.get(&entity) {
            clocks[creator - 1].clone()
        } else {
            VectorClock::new(dimension)
        };
        clock.set(entity, step as u64);

        match entry.operation.kind {
            OperationType::Create => {
                created_at.insert(EntityId(level.entries.len() as u64), step);
            }
            OperationType::Send | OperationType::DefaultEvent => {
                let inbox = entry.operation.target;
                if let Some(&earlier) = last_write.get(&inbox) {
                    let earlier_entity = levels[earlier - 1].selected_entry().id;
                    if (earlier as u64) > clock.get(earlier_entity) {
                        report.races.push(Race {
                            earlier,
                            later: step,
                        });
                        let candidates = backtrack_candidates(levels, earlier, step, &clock);
                        pending.push((earlier - 1, candidates));
                    }
                    clock.join(&clocks[earlier - 1]);
                }
                last_write.insert(inbox, step);
            }
            OperationType::Receive => {
                let send = entry.send_index as usize;
                if send > 0 && send < step {
                    clock.join(&clocks[send - 1]);
                }
            }
            OperationType::Stop => {}
        }

        last_step_of.insert(entity, step);
        clocks.push(clock);
    }

    for (index, candidates) in pending {
        if let Some(entity) = add_backtrack(&mut levels[index], &candidates) {
            debug!(level = index, entity = %entity, "added backtrack point");
            report.added.push((index, entity));
        }
    }
    report
}

/// Who could run at step `earlier` to reverse the race with `later`,
/// whose clock (before joining the race partner) is `later_clock`.
fn backtrack_candidates(
    levels: &[Level],
    earlier: usize,
    later: usize,
    later_clock: &VectorClock,
) -> Vec<EntityId> {
    let level = &levels[earlier - 1];
    let later_entity = levels[later - 1].selected_entry().id;
    if level.entry(later_entity).is_some_and(|e| e.enabled) {
        return vec![later_entity];
    }

    let mut witnesses: Vec<EntityId> = Vec::new();
    for step in (earlier + 1)..later {
        let entity = levels[step - 1].selected_entry().id;
        let reaches_later = (step as u64) <= later_clock.get(entity);
        if reaches_later
            && level.entry(entity).is_some_and(|e| e.enabled)
            && !witnesses.contains(&entity)
        {
            witnesses.push(entity);
        }
    }
    if !witnesses.is_empty() {
        return witnesses;
    }
    level
        .entries
        .iter()
        .filter(|e| e.enabled)
        .map(|e| e.id)
        .collect()
}

fn add_backtrack(level: &mut Level, candidates: &[EntityId]) -> Option<EntityId> {
    let covered = candidates
        .iter()
        .any(|id| level.entry(*id).is_some_and(|e| e.backtrack));
    if covered {
        return None;
    }
    let chosen = candidates
        .iter()
        .copied()
        .find(|id| level.entry(*id).is_some_and(|e| e.sleep))
        .or_else(|| candidates.first().copied())?;
    let entry = level.entry_mut(chosen)?;
    entry.backtrack = true;
    // a sleeping entity is already covered
    if entry.sleep {
        return None;
    }
    Some(chosen)
}
