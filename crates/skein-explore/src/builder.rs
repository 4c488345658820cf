use skein_core::{Configuration, ReductionKind, StrategyKind};
use skein_trace::ScheduleTrace;

use crate::delay_bounding::DelayBoundingStrategy;
use crate::dfs::DfsStrategy;
use crate::dpor::DporStrategy;
use crate::liveness::{CycleDetectionStrategy, TemperatureCheckingStrategy};
use crate::pct::PctStrategy;
use crate::random::RandomStrategy;
use crate::reduction::BasicReductionStrategy;
use crate::replay::ReplayStrategy;
use crate::strategy::SchedulingStrategy;

/// Assemble the strategy stack for `config`.
///
/// `stream` selects an independent random stream of the configured seed;
/// portfolio workers pass their index. `replay` is the trace to replay and
/// must be set when the configuration selects replay.
pub fn build_strategy(
    config: &Configuration,
    stream: u64,
    replay: Option<ScheduleTrace>,
) -> Box<dyn SchedulingStrategy> {
    let replaying = replay.is_some() || config.strategy == StrategyKind::Replay;
    let base: Box<dyn SchedulingStrategy> = match (&config.strategy, replay) {
        (_, Some(trace)) => Box::new(ReplayStrategy::new(trace, true)),
        (StrategyKind::Replay, None) => Box::new(ReplayStrategy::new(ScheduleTrace::new(), true)),
        (StrategyKind::Random, None) => Box::new(RandomStrategy::with_stream(
            config.seed,
            stream,
            config.max_fair_steps,
        )),
        (StrategyKind::Pct { priority_switch_bound }, None) => Box::new(PctStrategy::with_stream(
            config.seed,
            stream,
            config.max_unfair_steps,
            *priority_switch_bound,
        )),
        (StrategyKind::Dpor, None) => Box::new(DporStrategy::new(config.max_unfair_steps)),
        (StrategyKind::Dfs, None) => Box::new(DfsStrategy::new(config.max_unfair_steps)),
        (StrategyKind::DelayBounding { max_delays }, None) => {
            Box::new(DelayBoundingStrategy::with_stream(
                config.seed,
                stream,
                config.max_unfair_steps,
                *max_delays,
            ))
        }
    };

    // the systematic searches enumerate the full choice set themselves
    let systematic = matches!(config.strategy, StrategyKind::Dpor | StrategyKind::Dfs);
    let reducible = !replaying && !systematic;
    let max_steps = if base.is_fair() {
        config.max_fair_steps
    } else {
        config.max_unfair_steps
    };
    let reduced: Box<dyn SchedulingStrategy> = if reducible && config.reduction != ReductionKind::None {
        Box::new(BasicReductionStrategy::new(base, config.reduction, max_steps))
    } else {
        base
    };

    if !config.liveness_checking {
        return reduced;
    }
    if config.cycle_detection {
        Box::new(CycleDetectionStrategy::new(
            reduced,
            config.safety_prefix_bound,
            config.fair_cycles_only,
        ))
    } else {
        Box::new(TemperatureCheckingStrategy::new(
            reduced,
            config.liveness_temperature_threshold(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_plain_random() {
        let strategy = build_strategy(&Configuration::default(), 0, None);
        assert_eq!(strategy.description(), "random[seed '42']");
        assert!(!strategy.observes_program_state());
    }

    #[test]
    fn test_reduction_skipped_for_dpor() {
        let config = Configuration {
            strategy: StrategyKind::Dpor,
            reduction: ReductionKind::ForceSchedule,
            ..Configuration::default()
        };
        assert_eq!(build_strategy(&config, 0, None).description(), "dpor");
    }

    #[test]
    fn test_reduction_skipped_for_dfs_but_not_delay_bounding() {
        let dfs = Configuration {
            strategy: StrategyKind::Dfs,
            reduction: ReductionKind::ForceSchedule,
            ..Configuration::default()
        };
        assert_eq!(build_strategy(&dfs, 0, None).description(), "dfs");

        let delays = Configuration {
            strategy: StrategyKind::DelayBounding { max_delays: 2 },
            ..dfs
        };
        let strategy = build_strategy(&delays, 0, None);
        assert!(!strategy.is_fair());
        assert_eq!(
            strategy.description(),
            "delay-bounding[delays '2' [], seed '42'] w/ force-schedule"
        );
    }

    #[test]
    fn test_liveness_wrappers() {
        let config = Configuration {
            liveness_checking: true,
            liveness_temperature_threshold: 5,
            reduction: ReductionKind::OmitSchedulingPoints,
            ..Configuration::default()
        };
        let strategy = build_strategy(&config, 0, None);
        assert!(strategy.observes_program_state());
        assert_eq!(
            strategy.description(),
            "random[seed '42'] w/ omit-scheduling-points w/ liveness temperature 5"
        );

        let cycles = Configuration {
            cycle_detection: true,
            ..config
        };
        assert!(build_strategy(&cycles, 0, None)
            .description()
            .ends_with("w/ cycle detection"));
    }
}
