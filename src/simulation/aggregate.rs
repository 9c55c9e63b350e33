use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::board::{Board, Team};
use crate::config::preferences::Preferences;
use crate::ranking::RunId;
use crate::simulation::SimulationError;
use crate::simulation::cascade::{CascadeSimulator, TrialOutcome};
use crate::simulation::feeder::feeder_for;
use crate::simulation::moves::Move;
use crate::simulation::rules::RuleTable;

/// Count, sum and range of one metric across trials.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RunningStat {
    count: u32,
    sum: f64,
    min: f64,
    max: f64,
}

impl RunningStat {
    pub fn push(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.sum += value;
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}

/// Averaged outcome of every trial of one move.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationResult {
    pub run_id: RunId,
    #[serde(rename = "move")]
    pub mv: Option<Move>,
    pub net_score: RunningStat,
    pub net_gold: RunningStat,
    pub combos: RunningStat,
    pub blocks: RunningStat,
    pub disruptions: RunningStat,
    pub progress: RunningStat,
}

/// Reduce trial outcomes to one result. The order of `outcomes` does not matter.
pub fn aggregate(
    run_id: RunId,
    mv: Option<Move>,
    outcomes: &[TrialOutcome],
) -> Result<SimulationResult, SimulationError> {
    if outcomes.is_empty() {
        return Err(SimulationError::ZeroTrials);
    }

    let mut result = SimulationResult {
        run_id,
        mv,
        net_score: RunningStat::default(),
        net_gold: RunningStat::default(),
        combos: RunningStat::default(),
        blocks: RunningStat::default(),
        disruptions: RunningStat::default(),
        progress: RunningStat::default(),
    };
    for o in outcomes {
        result.net_score.push(o.score);
        result.net_gold.push(o.gold);
        result.combos.push(o.combos as f64);
        result.blocks.push(o.blocks as f64);
        result.disruptions.push(o.disruptions as f64);
        result.progress.push(o.progress as f64);
    }
    Ok(result)
}

/// Deterministic feeder seed for one trial of one move.
pub fn trial_seed(base_seed: u64, move_index: u64, trial: u64) -> u64 {
    base_seed
        .wrapping_mul(6364136223846793005)
        .wrapping_add(move_index)
        .wrapping_mul(1442695040888963407)
        .wrapping_add(trial)
}

/// Runs the configured number of trials for a move and averages them.
pub struct Aggregator<'a> {
    rules: &'a dyn RuleTable,
    team: &'a Team,
    preferences: &'a Preferences,
    run_id: RunId,
    base_seed: u64,
}

impl<'a> Aggregator<'a> {
    pub fn new(
        rules: &'a dyn RuleTable,
        team: &'a Team,
        preferences: &'a Preferences,
        run_id: RunId,
        base_seed: u64,
    ) -> Self {
        Aggregator {
            rules,
            team,
            preferences,
            run_id,
            base_seed,
        }
    }

    /// Simulate `mv` once per trial. The cancel flag is checked before each trial.
    pub fn simulate_move(
        &self,
        board: &Board,
        mv: Move,
        move_index: usize,
        cancel: Option<&AtomicBool>,
    ) -> Result<SimulationResult, SimulationError> {
        let trials = self.preferences.trial_count();
        if trials == 0 {
            return Err(SimulationError::ZeroTrials);
        }

        let simulator = CascadeSimulator::new(self.rules, self.team, self.preferences);
        let mut outcomes = Vec::with_capacity(trials as usize);
        for trial in 0..trials {
            if cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
                return Err(SimulationError::Cancelled);
            }
            let seed = trial_seed(self.base_seed, move_index as u64, trial as u64);
            let mut feeder = feeder_for(self.preferences, self.team, board.width(), seed);
            outcomes.push(simulator.run(board, mv, feeder.as_mut())?);
        }

        aggregate(self.run_id, Some(mv), &outcomes)
    }
}
