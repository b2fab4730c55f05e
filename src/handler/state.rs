/// Lifecycle of the child owned by a [`HandlerRunner`](super::HandlerRunner)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    /// No invocation has started yet
    Idle,
    /// `run` was entered and the child is being spawned
    Spawned,
    /// Watchers are attached and the payload is on its way
    AwaitingResult,
    /// The last invocation produced a result; its child has been killed
    Resolved,
    /// The last invocation ended with an error; its child has been killed
    Failed,
    /// `cleanup` was called
    Killed,
}

impl RunnerState {
    pub fn is_in_flight(&self) -> bool {
        matches!(self, RunnerState::Spawned | RunnerState::AwaitingResult)
    }

    pub fn can_transition_to(&self, next: RunnerState) -> bool {
        use RunnerState::*;
        match (self, next) {
            (_, Killed) => true,
            (Idle | Resolved | Failed | Killed, Spawned) => true,
            (Spawned, AwaitingResult | Failed) => true,
            (AwaitingResult, Resolved | Failed) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::RunnerState::*;

    #[test]
    fn test_happy_path_transitions() {
        assert!(Idle.can_transition_to(Spawned));
        assert!(Spawned.can_transition_to(AwaitingResult));
        assert!(AwaitingResult.can_transition_to(Resolved));
        assert!(Resolved.can_transition_to(Spawned));
    }

    #[test]
    fn test_killed_is_reachable_from_everywhere() {
        for state in [Idle, Spawned, AwaitingResult, Resolved, Failed, Killed] {
            assert!(state.can_transition_to(Killed), "{state:?} -> Killed");
        }
    }

    #[test]
    fn test_killed_run_does_not_become_failed() {
        assert!(!Killed.can_transition_to(Failed));
        assert!(!Killed.can_transition_to(Resolved));
        assert!(!Idle.can_transition_to(AwaitingResult));
    }

    #[test]
    fn test_in_flight() {
        assert!(Spawned.is_in_flight());
        assert!(AwaitingResult.is_in_flight());
        assert!(!Resolved.is_in_flight());
        assert!(!Killed.is_in_flight());
    }
}
