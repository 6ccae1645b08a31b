pub mod config;
pub mod error;
pub mod estimate;
pub mod report;
pub mod sequencer;
pub mod session;
pub mod staircase;
pub mod state;
pub mod trial;

pub use config::{
    EstimateConfig, ExperimentConfig, StaircaseConfig, StepMilestone, StimulusConfig, StopConfig,
    TimingConfig,
};
pub use error::{ConfigError, ReportError};
pub use estimate::{
    estimate_threshold, log_std_dev, rms_percent, std_dev, EstimatorKind, ThresholdEstimate,
};
pub use report::SessionReport;
pub use sequencer::{frames_per_update, CompletedTrial, SequencerEvent, TrialSequencer};
pub use session::Session;
pub use staircase::{ResponseOutcome, Staircase};
pub use state::{Command, ExperimentEvent, ExperimentStateMachine, ExperimentView};
pub use trial::{TrialDurations, TrialPlan, TrialTimestamps};
