use serde::{Deserialize, Serialize};

/// One of the two presentation intervals of a 2IFC trial
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    First,
    Second,
}

impl Interval {
    /// 1 or 2, as shown to the observer
    pub fn number(self) -> u8 {
        match self {
            Interval::First => 1,
            Interval::Second => 2,
        }
    }

    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(Interval::First),
            2 => Some(Interval::Second),
            _ => None,
        }
    }
}

/// The observer's answer to "which interval contained noise"
pub type Choice = Interval;

/// What the display must show for the current refresh.
///
/// `Noise` carries everything the renderer needs to rebuild the field, so the
/// engine never touches pixels and keeps running when no surface exists.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum FrameContent {
    /// Uniform mid-gray
    #[default]
    Blank,
    /// Mid-gray with the fixation dot
    Fixation,
    /// Normalised noise field with the fixation dot drawn on top
    Noise { seed: u32, contrast_pct: f64 },
}

impl FrameContent {
    pub fn is_noise(&self) -> bool {
        matches!(self, FrameContent::Noise { .. })
    }
}
