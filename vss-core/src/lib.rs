pub mod noise;
pub mod phase;
pub mod stimulus;
pub mod trial;

pub use noise::{frame_seed, Mulberry32};
pub use phase::{Phase, SessionPhase};
pub use stimulus::{Choice, FrameContent, Interval};
pub use trial::{Direction, QualityMetrics, ResponseStats, StopReason, TrialRecord, TrialState};
