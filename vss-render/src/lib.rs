pub mod field;
pub mod render;

pub use field::{FieldStats, NoiseField, MID_GRAY};
pub use render::{FrameStats, NoiseRenderer, StimulusRenderer};
