//! Shared vocabulary of the skein testing engine: entity ids, the
//! operation triples the scheduler reasons about, the schedulable entity
//! registry, events, fingerprints and configuration.

pub mod config;
pub mod error;
pub mod event;
pub mod fingerprint;
pub mod ids;
pub mod operation;
pub mod schedulable;

pub use config::{Configuration, ReductionKind, StrategyKind};
pub use error::{ActionResult, ConfigError, ExecutionCanceled};
pub use event::{Event, EventInfo};
pub use fingerprint::{
    EntityState, Fingerprint, ProgramSnapshot, ProgramStateSource, Temperature,
};
pub use ids::{EntityId, TaskId};
pub use operation::{Operation, OperationTargetType, OperationType};
pub use schedulable::{EntityKind, SchedulableInfo, SchedulableRegistry};
