use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::board::{Board, Team};
use crate::config::preferences::Preferences;
use crate::grading::GradingMode;
use crate::simulation::SimulationError;
use crate::simulation::aggregate::{Aggregator, SimulationResult};
use crate::simulation::moves::enumerate_moves;
use crate::simulation::rules::RuleTable;

/// Identifies one computation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        RunId(Uuid::new_v4())
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything one run needs, owned so the run outlives the caller's state.
#[derive(Debug, Clone)]
pub struct RankingRequest {
    pub board: Board,
    pub team: Team,
    pub preferences: Preferences,
    pub grading_mode: GradingMode,
}

impl RankingRequest {
    fn check(&self) -> Result<(), SimulationError> {
        self.board.validate()?;
        self.team.validate()?;
        if self.preferences.trial_count() == 0 {
            return Err(SimulationError::ZeroTrials);
        }
        self.preferences
            .validate()
            .map_err(SimulationError::InvalidPreferences)
    }
}

/// A finished run's ranked results, best first.
#[derive(Debug, Clone)]
pub struct RankedRun {
    pub run_id: RunId,
    pub results: Vec<SimulationResult>,
}

/// Receives ranked results and drops deliveries from superseded runs.
pub trait ResultAcceptor: Send + Sync {
    /// Make `run_id` the only run whose results are accepted.
    fn begin_run(&self, run_id: RunId);

    fn accepted_id(&self) -> Option<RunId>;

    /// Returns false, discarding the results, when `run_id` is stale.
    fn accept_results(&self, run_id: RunId, results: Vec<SimulationResult>) -> bool;

    /// Told when a run stops with an error instead of results.
    fn reject_run(&self, _run_id: RunId, _message: &str) {}
}

#[derive(Default)]
struct LatestState {
    accepted: Option<RunId>,
    delivered: Option<RankedRun>,
}

/// Keeps the results of the latest accepted run in memory.
#[derive(Default)]
pub struct LatestResults {
    state: Mutex<LatestState>,
    ready: Condvar,
}

impl LatestResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> Option<RankedRun> {
        self.state.lock().ok()?.delivered.clone()
    }

    /// Block until `run_id` has delivered, or the timeout passes.
    pub fn wait_for(&self, run_id: RunId, timeout: Duration) -> Option<Vec<SimulationResult>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().ok()?;
        loop {
            if let Some(run) = &state.delivered {
                if run.run_id == run_id {
                    return Some(run.results.clone());
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            state = self.ready.wait_timeout(state, deadline - now).ok()?.0;
        }
    }
}

impl ResultAcceptor for LatestResults {
    fn begin_run(&self, run_id: RunId) {
        if let Ok(mut state) = self.state.lock() {
            state.accepted = Some(run_id);
        }
    }

    fn accepted_id(&self) -> Option<RunId> {
        self.state.lock().ok()?.accepted
    }

    fn accept_results(&self, run_id: RunId, results: Vec<SimulationResult>) -> bool {
        let Ok(mut state) = self.state.lock() else {
            return false;
        };
        if state.accepted != Some(run_id) {
            debug!(%run_id, "Stale results discarded");
            return false;
        }
        state.delivered = Some(RankedRun { run_id, results });
        self.ready.notify_all();
        true
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunStatus {
    /// Delivered this many ranked results.
    Completed(usize),
    Cancelled,
    Failed(String),
}

/// A run executing in the background.
pub struct RunHandle {
    run_id: RunId,
    cancel: Arc<AtomicBool>,
    status: mpsc::Receiver<RunStatus>,
}

impl RunHandle {
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn wait(self) -> RunStatus {
        self.status
            .recv()
            .unwrap_or_else(|_| RunStatus::Failed("run worker exited without a status".to_string()))
    }
}

/// Enumerates, simulates and ranks moves; starting a run cancels the previous one.
pub struct RankingDriver {
    rules: Arc<dyn RuleTable>,
    current: Mutex<Option<Arc<AtomicBool>>>,
}

impl RankingDriver {
    pub fn new(rules: Arc<dyn RuleTable>) -> Self {
        RankingDriver {
            rules,
            current: Mutex::new(None),
        }
    }

    /// Rank on the calling thread. The moves themselves still fan out over rayon.
    pub fn rank(
        &self,
        request: &RankingRequest,
        cancel: &AtomicBool,
    ) -> Result<RankedRun, SimulationError> {
        let run_id = RunId::new();
        let results = execute_run(self.rules.as_ref(), request, run_id, cancel)?;
        Ok(RankedRun { run_id, results })
    }

    /// Start a run on the rayon pool and report its results to `acceptor`.
    pub fn start_run(
        &self,
        request: RankingRequest,
        acceptor: Arc<dyn ResultAcceptor>,
    ) -> RunHandle {
        let run_id = RunId::new();
        let cancel = Arc::new(AtomicBool::new(false));

        match self.current.lock() {
            Ok(mut current) => {
                if let Some(previous) = current.replace(Arc::clone(&cancel)) {
                    previous.store(true, Ordering::Relaxed);
                    debug!(%run_id, "Previous run cancelled");
                }
            }
            Err(_) => warn!(%run_id, "Run registry poisoned, previous run not cancelled"),
        }
        acceptor.begin_run(run_id);

        let (tx, rx) = mpsc::channel();
        let rules = Arc::clone(&self.rules);
        let flag = Arc::clone(&cancel);
        rayon::spawn(move || {
            let status = match execute_run(rules.as_ref(), &request, run_id, &flag) {
                Ok(results) => {
                    let count = results.len();
                    if flag.load(Ordering::Relaxed) {
                        RunStatus::Cancelled
                    } else if acceptor.accept_results(run_id, results) {
                        RunStatus::Completed(count)
                    } else {
                        RunStatus::Cancelled
                    }
                }
                Err(SimulationError::Cancelled) => {
                    debug!(%run_id, "Run stopped after cancellation");
                    RunStatus::Cancelled
                }
                Err(e) => {
                    warn!(%run_id, error = %e, "Run failed");
                    let message = e.to_string();
                    acceptor.reject_run(run_id, &message);
                    RunStatus::Failed(message)
                }
            };
            let _ = tx.send(status);
        });

        RunHandle {
            run_id,
            cancel,
            status: rx,
        }
    }
}

/// Simulate every legal move and return the results sorted by the request's grading mode.
fn execute_run(
    rules: &dyn RuleTable,
    request: &RankingRequest,
    run_id: RunId,
    cancel: &AtomicBool,
) -> Result<Vec<SimulationResult>, SimulationError> {
    request.check()?;

    let start = Instant::now();
    let prefs = &request.preferences;
    let base_seed = if prefs.seed == 0 {
        rand::thread_rng().r#gen()
    } else {
        prefs.seed
    };
    let moves = enumerate_moves(&request.board, rules);
    info!(
        %run_id,
        moves = moves.len(),
        trials = prefs.trial_count(),
        mode = %request.grading_mode.key,
        "Ranking run started"
    );

    let aggregator = Aggregator::new(rules, &request.team, prefs, run_id, base_seed);
    let mut results = moves
        .par_iter()
        .enumerate()
        .map(|(i, mv)| aggregator.simulate_move(&request.board, *mv, i, Some(cancel)))
        .collect::<Result<Vec<_>, _>>()?;

    if cancel.load(Ordering::Relaxed) {
        return Err(SimulationError::Cancelled);
    }

    request.grading_mode.grading.sort(&mut results);
    info!(
        %run_id,
        results = results.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Ranking run finished"
    );
    Ok(results)
}
