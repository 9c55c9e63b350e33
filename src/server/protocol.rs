use serde::{Deserialize, Serialize};

use crate::board::Team;
use crate::config::preferences::Preferences;
use crate::ranking::RunId;
use crate::simulation::aggregate::SimulationResult;
use crate::simulation::moves::Move;

/// Messages a client may send.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// "Compute now": rank every move on this board. Supersedes any run in flight.
    Compute(ComputeRequest),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ComputeRequest {
    /// Board rows in the text board format.
    pub board: Vec<String>,
    pub team: Team,
    /// Server defaults when absent.
    #[serde(default)]
    pub preferences: Option<Preferences>,
    #[serde(default)]
    pub grading_mode: Option<String>,
}

/// Messages the server sends.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Results {
        run_id: RunId,
        grading_mode: String,
        results: Vec<ResultReport>,
    },
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// One ranked move with its averaged metrics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultReport {
    pub rank: usize,
    #[serde(rename = "move")]
    pub mv: Option<[usize; 4]>,
    pub net_score: f64,
    pub net_gold: f64,
    pub combos: f64,
    pub blocks: f64,
    pub disruptions: f64,
    pub progress: f64,
    pub trials: u32,
}

impl ResultReport {
    pub fn from_result(rank: usize, result: &SimulationResult) -> Self {
        ResultReport {
            rank,
            mv: result.mv.as_ref().map(Move::sequence),
            net_score: result.net_score.mean(),
            net_gold: result.net_gold.mean(),
            combos: result.combos.mean(),
            blocks: result.blocks.mean(),
            disruptions: result.disruptions.mean(),
            progress: result.progress.mean(),
            trials: result.net_score.count(),
        }
    }
}

/// Reports for a ranked list; ranks start at 1.
pub fn reports(results: &[SimulationResult]) -> Vec<ResultReport> {
    results
        .iter()
        .enumerate()
        .map(|(i, r)| ResultReport::from_result(i + 1, r))
        .collect()
}
