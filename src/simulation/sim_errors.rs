use thiserror::Error;

/// Reasons for a command to be rejected. None of these are fatal: a rejected command leaves the
///  simulation's state unchanged.
///
/// NB: Broken ledger invariants are not represented here - they are bugs and cause a panic
#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum CommandError {
    #[error("window is full: base is #{base}, next frame would be #{next}")]
    WindowFull { base: usize, next: usize },
    #[error("frame #{actual} is not the next frame in sequence, expected #{expected}")]
    SequenceMismatch { expected: usize, actual: usize },
    #[error("frame #{0} is not a valid selection")]
    InvalidSelection(usize),
    #[error("frame #{0} is not in flight")]
    NotInFlight(usize),
    #[error("simulation is paused")]
    Paused,
    #[error("simulation is already paused")]
    AlreadyPaused,
    #[error("simulation is not paused")]
    NotPaused,
    #[error("simulation driver has stopped")]
    SimulationStopped,
}
