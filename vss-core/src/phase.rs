use serde::{Deserialize, Serialize};

/// Defines session phases and which commands they accept
pub trait Phase: Copy + Clone + PartialEq + Send + Sync + std::fmt::Debug + Default {
    fn allows_response(&self) -> bool;
    fn next(&self) -> Option<Self>;

    fn is_idle(&self) -> bool {
        false
    }
    fn is_instructions(&self) -> bool {
        false
    }
    fn is_running(&self) -> bool {
        false
    }
    fn is_complete(&self) -> bool {
        false
    }
}

#[derive(Copy, Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionPhase {
    #[default]
    Idle,
    Instructions,
    Running,
    Complete,
}

impl Phase for SessionPhase {
    fn allows_response(&self) -> bool {
        matches!(self, Self::Running)
    }

    fn next(&self) -> Option<Self> {
        use SessionPhase::*;
        Some(match self {
            Idle => Instructions,
            Instructions => Running,
            Running => Complete,
            Complete => return None,
        })
    }

    fn is_idle(&self) -> bool {
        matches!(self, SessionPhase::Idle)
    }

    fn is_instructions(&self) -> bool {
        matches!(self, SessionPhase::Instructions)
    }

    fn is_running(&self) -> bool {
        matches!(self, SessionPhase::Running)
    }

    fn is_complete(&self) -> bool {
        matches!(self, SessionPhase::Complete)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_advance_in_order_and_end_at_complete() {
        let mut phase = SessionPhase::default();
        let mut seen = vec![phase];
        while let Some(next) = phase.next() {
            phase = next;
            seen.push(phase);
        }
        assert_eq!(
            seen,
            vec![
                SessionPhase::Idle,
                SessionPhase::Instructions,
                SessionPhase::Running,
                SessionPhase::Complete
            ]
        );
    }

    #[test]
    fn only_running_accepts_responses() {
        assert!(SessionPhase::Running.allows_response());
        assert!(!SessionPhase::Idle.allows_response());
        assert!(!SessionPhase::Instructions.allows_response());
        assert!(!SessionPhase::Complete.allows_response());
    }
}
