use uuid::Uuid;

/// Capture session state machine.
///
/// State transitions:
/// ```text
/// idle → capturing → stopping → idle
///              │                   ↑
///              └───────────────────┘
///           (backend finished on its own)
/// ```
///
/// `Stopping` covers the window between a stop request and the backend's
/// terminal callback. A new run cannot start until the session is idle again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CaptureState {
    #[default]
    Idle,
    Capturing { run_id: Uuid },
    Stopping { run_id: Uuid },
}

impl CaptureState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_capturing(&self) -> bool {
        matches!(self, Self::Capturing { .. })
    }

    pub fn is_stopping(&self) -> bool {
        matches!(self, Self::Stopping { .. })
    }

    /// The run this state belongs to, if any.
    pub fn run_id(&self) -> Option<Uuid> {
        match self {
            Self::Capturing { run_id } | Self::Stopping { run_id } => Some(*run_id),
            Self::Idle => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_follows_state() {
        let run_id = Uuid::new_v4();

        assert_eq!(CaptureState::default(), CaptureState::Idle);
        assert_eq!(CaptureState::Idle.run_id(), None);
        assert_eq!(CaptureState::Capturing { run_id }.run_id(), Some(run_id));
        assert!(CaptureState::Stopping { run_id }.is_stopping());
        assert!(!CaptureState::Stopping { run_id }.is_capturing());
    }
}
