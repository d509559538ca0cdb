//! Command Status State Machine
//!
//! `Pending -> Processing -> {Completed, Failed}`, strictly forward-only.
//! Repeated `Processing` reports (progress messages) are allowed.

use crate::CommandStatus;
use thiserror::Error;

/// Events the dispatcher feeds into a command's lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Picked up from the pending list, about to run
    Dispatched,
    /// Handler reported intermediate progress
    Progress,
    /// Handler returned success
    Succeeded,
    /// Handler returned failure, or no handler exists
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition for command {command_id}: {from} -> {to}")]
pub struct TransitionError {
    pub command_id: u64,
    pub from: CommandStatus,
    pub to: CommandStatus,
}

/// Tracks the locally observed status of one command
#[derive(Debug, Clone)]
pub struct CommandLifecycle {
    command_id: u64,
    current: CommandStatus,
}

impl CommandLifecycle {
    /// Start tracking a command in the state the server reported
    pub fn new(command_id: u64, initial: CommandStatus) -> Self {
        Self {
            command_id,
            current: initial,
        }
    }

    pub fn command_id(&self) -> u64 {
        self.command_id
    }

    /// Get current status
    pub fn status(&self) -> CommandStatus {
        self.current
    }

    pub fn is_finished(&self) -> bool {
        self.current.is_terminal()
    }

    /// Process an event and return the new status
    pub fn process_event(&mut self, event: LifecycleEvent) -> Result<CommandStatus, TransitionError> {
        let to = match event {
            LifecycleEvent::Dispatched | LifecycleEvent::Progress => CommandStatus::Processing,
            LifecycleEvent::Succeeded => CommandStatus::Completed,
            LifecycleEvent::Failed => CommandStatus::Failed,
        };

        // Progress is only meaningful while processing
        if event == LifecycleEvent::Progress && self.current != CommandStatus::Processing {
            return Err(self.reject(to));
        }
        // A second dispatch would re-run the handler
        if event == LifecycleEvent::Dispatched && self.current != CommandStatus::Pending {
            return Err(self.reject(to));
        }

        if !is_valid_transition(self.current, to) {
            return Err(self.reject(to));
        }
        self.current = to;
        Ok(to)
    }

    fn reject(&self, to: CommandStatus) -> TransitionError {
        TransitionError {
            command_id: self.command_id,
            from: self.current,
            to,
        }
    }
}

/// Check if a status change is allowed
pub fn is_valid_transition(from: CommandStatus, to: CommandStatus) -> bool {
    use CommandStatus::*;

    match (from, to) {
        (Processing, Processing) => true,
        (Pending, Processing) => true,
        (Processing, Completed) => true,
        (Processing, Failed) => true,
        _ => false,
    }
}

/// Check that an observed sequence of statuses only ever moves forward
pub fn is_monotonic(observed: &[CommandStatus]) -> bool {
    observed.windows(2).all(|w| is_valid_transition(w[0], w[1]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use CommandStatus::*;

    #[test]
    fn test_initial_state() {
        let lc = CommandLifecycle::new(1, Pending);
        assert_eq!(lc.status(), Pending);
        assert!(!lc.is_finished());
    }

    #[test]
    fn test_normal_flow() {
        let mut lc = CommandLifecycle::new(1, Pending);
        assert_eq!(lc.process_event(LifecycleEvent::Dispatched), Ok(Processing));
        assert_eq!(lc.process_event(LifecycleEvent::Progress), Ok(Processing));
        assert_eq!(lc.process_event(LifecycleEvent::Succeeded), Ok(Completed));
        assert!(lc.is_finished());
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut lc = CommandLifecycle::new(9, Pending);
        lc.process_event(LifecycleEvent::Dispatched).unwrap();
        lc.process_event(LifecycleEvent::Failed).unwrap();

        let err = lc.process_event(LifecycleEvent::Succeeded).unwrap_err();
        assert_eq!(err.from, Failed);
        assert_eq!(err.to, Completed);
        assert!(lc.process_event(LifecycleEvent::Progress).is_err());
        assert_eq!(lc.status(), Failed);
    }

    #[test]
    fn test_cannot_finish_without_processing() {
        let mut lc = CommandLifecycle::new(2, Pending);
        assert!(lc.process_event(LifecycleEvent::Succeeded).is_err());
        assert!(lc.process_event(LifecycleEvent::Progress).is_err());
        assert_eq!(lc.status(), Pending);
    }

    #[test]
    fn test_double_dispatch_rejected() {
        let mut lc = CommandLifecycle::new(3, Pending);
        lc.process_event(LifecycleEvent::Dispatched).unwrap();
        assert!(lc.process_event(LifecycleEvent::Dispatched).is_err());
    }

    #[test]
    fn test_monotonic_sequences() {
        assert!(is_monotonic(&[Pending, Processing, Completed]));
        assert!(is_monotonic(&[Pending, Processing, Processing, Failed]));
        assert!(!is_monotonic(&[Pending, Completed]));
        assert!(!is_monotonic(&[Processing, Completed, Processing]));
    }
}
