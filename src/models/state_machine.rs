// Generation phase state machine with validation

use super::GenerationPhase;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateTransitionError {
    #[error("Invalid phase transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: GenerationPhase,
        to: GenerationPhase,
    },
}

/// Validates if a job can move from one phase to another
pub fn can_transition(from: GenerationPhase, to: GenerationPhase) -> bool {
    use GenerationPhase::*;

    match (from, to) {
        // Stop or supersede resets from anywhere
        (_, Idle) => true,

        // A new start/refresh
        (Idle, Analyzing) => true,
        (Complete, Analyzing) => true,
        (Error, Analyzing) => true,

        (Analyzing, Generating) => true,
        (Generating, Complete) => true,

        // Failing to resolve the project happens before analysis begins
        (Idle, Error) => true,
        (Analyzing, Error) => true,
        (Generating, Error) => true,

        // Progress updates within a running phase
        (Analyzing, Analyzing) => true,
        (Generating, Generating) => true,

        _ => false,
    }
}

/// Validates and performs a phase transition
pub fn transition_phase(
    current: GenerationPhase,
    target: GenerationPhase,
) -> Result<GenerationPhase, StateTransitionError> {
    if !can_transition(current, target) {
        return Err(StateTransitionError::InvalidTransition {
            from: current,
            to: target,
        });
    }

    Ok(target)
}

/// Complete and error are left only through a new start/refresh (or a stop)
pub fn is_terminal_phase(phase: GenerationPhase) -> bool {
    matches!(phase, GenerationPhase::Complete | GenerationPhase::Error)
}

pub fn is_active_phase(phase: GenerationPhase) -> bool {
    matches!(phase, GenerationPhase::Analyzing | GenerationPhase::Generating)
}

pub fn valid_next_phases(current: GenerationPhase) -> Vec<GenerationPhase> {
    [
        GenerationPhase::Idle,
        GenerationPhase::Analyzing,
        GenerationPhase::Generating,
        GenerationPhase::Complete,
        GenerationPhase::Error,
    ]
    .into_iter()
    .filter(|&phase| can_transition(current, phase))
    .collect()
}
