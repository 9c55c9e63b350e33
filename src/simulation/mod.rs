pub mod aggregate;
pub mod cascade;
pub mod feeder;
pub mod moves;
pub mod rules;
pub mod scripted;

use crate::board::{BoardError, TeamError};

pub use aggregate::{Aggregator, RunningStat, SimulationResult};
pub use cascade::{CascadeSimulator, CascadeState, TrialOutcome, combo_multiplier};
pub use feeder::{FeederSource, FixedFeeder, NoRefill, RandomFeeder};
pub use moves::{Move, enumerate_moves};
pub use rules::{RuleTable, StandardRules};

/// Reasons a simulation cannot produce a result.
#[derive(Debug, Clone, PartialEq)]
pub enum SimulationError {
    CorruptBoard(BoardError),
    InvalidTeam(TeamError),
    InvalidPreferences(String),
    /// Aggregation needs at least one trial.
    ZeroTrials,
    Cancelled,
}

impl std::fmt::Display for SimulationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SimulationError::CorruptBoard(e) => write!(f, "Corrupt board: {}", e),
            SimulationError::InvalidTeam(e) => write!(f, "Invalid team: {}", e),
            SimulationError::InvalidPreferences(msg) => write!(f, "Invalid preferences: {}", msg),
            SimulationError::ZeroTrials => write!(f, "Trial count must be at least 1"),
            SimulationError::Cancelled => write!(f, "Run was cancelled"),
        }
    }
}

impl std::error::Error for SimulationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SimulationError::CorruptBoard(e) => Some(e),
            SimulationError::InvalidTeam(e) => Some(e),
            _ => None,
        }
    }
}

impl From<BoardError> for SimulationError {
    fn from(e: BoardError) -> Self {
        SimulationError::CorruptBoard(e)
    }
}

impl From<TeamError> for SimulationError {
    fn from(e: TeamError) -> Self {
        SimulationError::InvalidTeam(e)
    }
}
