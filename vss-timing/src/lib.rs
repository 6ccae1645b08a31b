pub mod manual;
pub mod refresh;
pub mod timer;

pub use manual::ManualTimer;
pub use refresh::RefreshEstimator;
pub use timer::{CalibrationStats, HighPrecisionTimer, Timer};
