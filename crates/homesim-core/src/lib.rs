//! Core types and the schedule execution engine for homesim.
//!
//! A [`Household`] (floor plan, activity catalog, persona) and a [`SimConfig`] are handed to
//! a [`Simulation`], which asks an [`Oracle`] for daily plans and executes them minute by
//! minute, producing one [`DayBatch`] per simulated day.

pub mod catalog;
pub mod config;
pub mod engine;
pub mod interrupts;
pub mod oracle;
pub mod plan;
pub mod records;
pub mod time;

pub use catalog::{
    ActivityCatalog, ActivityDefinition, CatalogError, ConcreteEvent, DurationPolicy, EventClass,
    EventKind, ExecutionMode, MovementMode, VariantWeight,
};
pub use config::{ConfigError, Household, PersonaProfile, SimConfig};
pub use engine::{EngineError, PersonaState, Simulation};
pub use interrupts::{BaseRates, Interrupt, ProbabilityPolicy};
pub use oracle::{
    DailyPlanRequest, Oracle, OracleCalls, OracleError, RevisionRequest, ScriptedOracle,
    StepOutRequest, WaitingRequest,
};
pub use plan::{PlanParseError, PlannedActivity, StepOutDecision};
pub use records::{
    DayBatch, DayKey, DayLog, DayPersistence, EventRecord, MemoryPersistence, NullPersistence,
    SensorRecord,
};
pub use time::{MinuteOfDay, SimClock, Weekday};
