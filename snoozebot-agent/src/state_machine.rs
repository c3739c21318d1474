//! Instance state transition graph. `unknown -> anything`
//! is always permitted; every other edge must appear in the table below.
//! Illegal transitions are rejected with `InvalidTransition` and the
//! caller is expected to emit a `warning` event.

use crate::model::InstanceState as S;

/// Returns `Ok(())` if `from -> to` is a legal edge, `Err(reason)` otherwise.
pub fn check_transition(from: S, to: S) -> Result<(), String> {
    if from == to {
        // A report that reaffirms the current state is not a transition.
        return Ok(());
    }

    let legal = match (from, to) {
        (S::Unknown, _) => true,
        (_, S::Unknown) => true, // heartbeat timeout: any -> unknown
        (S::Stopped, S::Running) | (S::Starting, S::Running) | (S::Idle, S::Running) => true,
        (S::Running, S::Idle) => true,
        (S::Running, S::Stopping) | (S::Idle, S::Stopping) => true,
        (S::Stopping, S::Stopped) => true,
        (S::Stopped, S::Starting) => true,
        _ => false,
    };

    if legal {
        Ok(())
    } else {
        Err(format!(
            "illegal transition {} -> {}",
            from.as_str(),
            to.as_str()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_to_anything_is_always_legal() {
        for to in [S::Unknown, S::Running, S::Idle, S::Stopping, S::Stopped, S::Starting] {
            assert!(check_transition(S::Unknown, to).is_ok());
        }
    }

    #[test]
    fn any_to_unknown_is_always_legal() {
        for from in [S::Running, S::Idle, S::Stopping, S::Stopped, S::Starting] {
            assert!(check_transition(from, S::Unknown).is_ok());
        }
    }

    #[test]
    fn stopped_to_idle_is_illegal() {
        assert!(check_transition(S::Stopped, S::Idle).is_err());
    }

    #[test]
    fn stopped_to_running_requires_starting_semantics_but_is_accepted_as_heartbeat() {
        // heartbeat with running: unknown|stopped|starting|idle -> running
        assert!(check_transition(S::Stopped, S::Running).is_ok());
    }

    #[test]
    fn full_happy_path() {
        assert!(check_transition(S::Unknown, S::Running).is_ok());
        assert!(check_transition(S::Running, S::Idle).is_ok());
        assert!(check_transition(S::Idle, S::Stopping).is_ok());
        assert!(check_transition(S::Stopping, S::Stopped).is_ok());
        assert!(check_transition(S::Stopped, S::Starting).is_ok());
        assert!(check_transition(S::Starting, S::Running).is_ok());
    }

    #[test]
    fn self_transition_is_a_noop_not_illegal() {
        assert!(check_transition(S::Running, S::Running).is_ok());
    }
}
