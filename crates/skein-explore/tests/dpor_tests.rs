use std::collections::{BTreeSet, VecDeque};

use skein_core::{EntityId, EntityKind, Operation, SchedulableInfo};
use skein_explore::{DporStrategy, SchedulingStrategy};

/// A toy program: each entity runs a fixed list of operations.
struct Script {
    ops: Vec<VecDeque<Operation>>,
}

impl Script {
    fn new(ops: Vec<Vec<Operation>>) -> Self {
        Self {
            ops: ops.into_iter().map(VecDeque::from).collect(),
        }
    }

    fn choices(&self) -> Vec<SchedulableInfo> {
        self.ops
            .iter()
            .enumerate()
            .map(|(id, ops)| {
                let id = EntityId(id as u64);
                let mut info = SchedulableInfo::new(id, format!("M({id})"), EntityKind::Machine);
                info.enabled = !ops.is_empty();
                info.next_operation = ops.front().copied().unwrap_or(Operation::stop(id));
                info
            })
            .collect()
    }

    /// Run to completion and return the order entities ran in.
    fn run(mut self, strategy: &mut dyn SchedulingStrategy, first: EntityId) -> Vec<u64> {
        let mut order = Vec::new();
        let mut current = first;
        while let Some(next) = strategy.next(&self.choices(), current) {
            self.ops[next.index()].pop_front();
            order.push(next.value());
            current = next;
        }
        order
    }
}

fn explore(program: impl Fn() -> Script, first: u64) -> Vec<Vec<u64>> {
    let mut strategy = DporStrategy::new(1000);
    let mut schedules = Vec::new();
    loop {
        schedules.push(program().run(&mut strategy, EntityId(first)));
        if !strategy.prepare_for_next_iteration() {
            break;
        }
        assert!(schedules.len() < 100, "dpor did not terminate");
    }
    schedules
}

fn idle() -> Vec<Operation> {
    Vec::new()
}

#[test]
fn test_two_racing_sends_take_two_iterations() {
    let send = Operation::send(EntityId(3));
    let schedules = explore(|| Script::new(vec![idle(), vec![send], vec![send]]), 1);
    assert_eq!(schedules, vec![vec![1, 2], vec![2, 1]]);
}

#[test]
fn test_independent_sends_take_one_iteration() {
    let schedules = explore(
        || {
            Script::new(vec![
                idle(),
                vec![Operation::send(EntityId(3))],
                vec![Operation::send(EntityId(4))],
            ])
        },
        1,
    );
    assert_eq!(schedules.len(), 1);
}

#[test]
fn test_three_racing_sends_explore_every_order_once() {
    let send = Operation::send(EntityId(9));
    let schedules = explore(
        || Script::new(vec![idle(), vec![send], vec![send], vec![send]]),
        1,
    );
    assert_eq!(schedules.len(), 6);
    let distinct: BTreeSet<Vec<u64>> = schedules.into_iter().collect();
    assert_eq!(distinct.len(), 6);
}

#[test]
fn test_receives_do_not_create_backtrack_points() {
    let schedules = explore(
        || {
            Script::new(vec![
                idle(),
                vec![Operation::receive(EntityId(1)), Operation::receive(EntityId(1))],
                vec![Operation::receive(EntityId(2))],
            ])
        },
        1,
    );
    assert_eq!(schedules.len(), 1);
}

#[test]
fn test_exhausted_search_stays_exhausted_after_reset() {
    let send = Operation::send(EntityId(3));
    let mut strategy = DporStrategy::new(1000);
    Script::new(vec![idle(), vec![send], vec![send]]).run(&mut strategy, EntityId(1));
    assert!(strategy.prepare_for_next_iteration());
    strategy.reset();
    assert!(strategy.stack().is_empty());
    let order = Script::new(vec![idle(), vec![send], vec![send]]).run(&mut strategy, EntityId(1));
    assert_eq!(order, vec![1, 2]);
}
