use uuid::Uuid;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RenderGateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Judgment error: {0}")]
    Judgment(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Conflicting update on {entity}: expected {expected}, found {actual}")]
    CasConflict {
        entity: String,
        expected: String,
        actual: String,
    },

    #[error("Run not found: {0}")]
    RunNotFound(Uuid),

    #[error("Unit not found: {0}")]
    UnitNotFound(Uuid),

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Unit {unit} blocked by dependency: {reason}")]
    DependencyBlocked { unit: Uuid, reason: String },

    #[error("Attempt {attempt} already open or recorded for unit {unit}")]
    DuplicateAttempt { unit: Uuid, attempt: u32 },

    #[error("Unit {0} is locked-approved and immutable")]
    LockedApproved(Uuid),

    #[error("Run {0} is paused")]
    RunPaused(Uuid),

    #[error("Timed out waiting for {0}")]
    Timeout(String),
}

pub type Result<T> = std::result::Result<T, RenderGateError>;
