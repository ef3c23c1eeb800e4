pub mod decisions;
pub mod ledger;
pub mod runs;
pub mod units;

pub use decisions::InMemoryDecisionLog;
pub use ledger::InMemoryAttemptLedger;
pub use runs::InMemoryRunStore;
pub use units::InMemoryUnitStore;
