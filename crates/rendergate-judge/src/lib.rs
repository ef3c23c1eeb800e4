pub mod calibration;
pub mod judge;
pub mod rules;

pub use calibration::CalibrationStore;
pub use judge::{JudgeContext, QaJudge};
pub use rules::rules_for;
