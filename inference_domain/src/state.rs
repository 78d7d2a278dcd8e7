//! Pipeline state machine, grounded on the `hva::hvaState`
//! transition table: `idle -> configured -> prepared -> running <-> paused
//! -> depleting -> stop`.

use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum PipelineState {
    Idle,
    Configured,
    Prepared,
    Running,
    Paused,
    Depleting,
    Stop,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PipelineState::Idle => "idle",
            PipelineState::Configured => "configured",
            PipelineState::Prepared => "prepared",
            PipelineState::Running => "running",
            PipelineState::Paused => "paused",
            PipelineState::Depleting => "depleting",
            PipelineState::Stop => "stop",
        };
        write!(f, "{s}")
    }
}

impl PipelineState {
    /// The legal transition table:
    ///
    /// ```text
    /// idle -> configured -> prepared -> running <-> paused -> depleting -> stop
    /// ```
    fn allows(self, to: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, to),
            (Idle, Configured)
                | (Configured, Prepared)
                | (Prepared, Running)
                | (Running, Paused)
                | (Paused, Running)
                | (Running, Depleting)
                | (Depleting, Stop)
        )
    }

    /// Attempts the transition, failing with `InvalidTransition` for any
    /// edge not in the table.
    pub fn transit_to(self, to: PipelineState) -> Result<PipelineState, PipelineError> {
        if self.allows(to) {
            Ok(to)
        } else {
            Err(PipelineError::InvalidTransition {
                from: self.to_string(),
                to: to.to_string(),
            })
        }
    }

    /// Overrides the transition table; reserved for fatal shutdown.
    pub fn transit_to_forced(self, to: PipelineState) -> PipelineState {
        let _ = self;
        to
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PipelineState::*;

    #[test]
    fn idle_to_configured_is_legal() {
        assert_eq!(Idle.transit_to(Configured).unwrap(), Configured);
    }

    #[test]
    fn skipping_a_stage_is_invalid() {
        assert!(Idle.transit_to(Running).is_err());
    }

    #[test]
    fn running_can_pause_and_resume() {
        assert_eq!(Running.transit_to(Paused).unwrap(), Paused);
        assert_eq!(Paused.transit_to(Running).unwrap(), Running);
    }

    #[test]
    fn stop_is_terminal_via_depleting_only() {
        assert!(Running.transit_to(Stop).is_err());
        assert_eq!(Depleting.transit_to(Stop).unwrap(), Stop);
    }

    #[test]
    fn forced_transition_always_succeeds() {
        assert_eq!(Running.transit_to_forced(Stop), Stop);
    }
}
