//! Quality-gated execution engine for the multi-stage render pipeline.
//!
//! Drives output units through generate/judge/retry cycles, enforces
//! anchor dependencies and attempt budgets, audits worker jobs before a
//! phase may advance, and bounds concurrent dispatch per step.

pub mod batch;
pub mod budget;
pub mod dependency;
pub mod engine;
pub mod state_machine;
pub mod supervisor;

pub use batch::{group_units, BatchController, UnitGroup};
pub use budget::{BudgetManager, NextAction};
pub use dependency::{AnchorGate, DependencyEnforcer};
pub use engine::{Engine, EngineDeps};
pub use state_machine::{StepOutcome, StepStateMachine};
pub use supervisor::SupervisorGate;
