use std::collections::HashSet;
use tracing::trace;

use crate::board::{Board, Cell, Coord, SpeciesId, Team, Tile};
use crate::config::preferences::Preferences;
use crate::simulation::SimulationError;
use crate::simulation::feeder::FeederSource;
use crate::simulation::moves::Move;
use crate::simulation::rules::{GroupContext, MatchGroup, RuleTable};

/// Score multiplier for the cumulative chain index.
///
/// Indices above 210 stay at the last tier.
pub fn combo_multiplier(chain: u32) -> f64 {
    match chain {
        0..=1 => 1.0,
        2..=4 => 1.1,
        5..=9 => 1.15,
        10..=24 => 1.2,
        25..=49 => 1.3,
        50..=74 => 1.4,
        75..=99 => 1.5,
        100..=199 => 2.0,
        _ => 2.5,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeState {
    Idle,
    Resolving,
    Cascading,
    Settled,
}

/// Raw metrics of one trial.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TrialOutcome {
    pub score: f64,
    pub gold: f64,
    pub blocks: u32,
    pub disruptions: u32,
    pub combos: u32,
    pub progress: u32,
}

/// Resolves one move on a board copy until nothing more matches.
pub struct CascadeSimulator<'a> {
    rules: &'a dyn RuleTable,
    team: &'a Team,
    preferences: &'a Preferences,
}

impl<'a> CascadeSimulator<'a> {
    pub fn new(rules: &'a dyn RuleTable, team: &'a Team, preferences: &'a Preferences) -> Self {
        CascadeSimulator {
            rules,
            team,
            preferences,
        }
    }

    /// Run one trial. The caller's board is not touched.
    pub fn run(
        &self,
        board: &Board,
        mv: Move,
        feeder: &mut dyn FeederSource,
    ) -> Result<TrialOutcome, SimulationError> {
        board.validate()?;
        debug_assert!(board.contains(mv.from) && board.contains(mv.to) && mv.is_adjacent());

        let mut board = board.clone();
        let mut outcome = TrialOutcome::default();
        let mut mega = MegaTracker::new(self.team);
        let mut groups = Vec::new();
        let mut state = CascadeState::Idle;

        while state != CascadeState::Settled {
            state = match state {
                CascadeState::Idle => {
                    board.swap(mv.from, mv.to);
                    CascadeState::Resolving
                }
                CascadeState::Resolving => {
                    groups = find_groups(&board, self.rules);
                    if groups.is_empty() {
                        CascadeState::Settled
                    } else {
                        CascadeState::Cascading
                    }
                }
                CascadeState::Cascading => {
                    self.clear_groups(&mut board, &groups, &mut outcome, &mut mega);
                    settle(&mut board, feeder);
                    CascadeState::Resolving
                }
                CascadeState::Settled => CascadeState::Settled,
            };
        }

        if let Some(cap) = self.preferences.remaining_health {
            outcome.score = outcome.score.min(cap as f64);
        }
        outcome.progress = mega.gained;
        trace!(
            %mv,
            combos = outcome.combos,
            score = outcome.score,
            "Trial settled"
        );
        Ok(outcome)
    }

    fn clear_groups(
        &self,
        board: &mut Board,
        groups: &[MatchGroup],
        outcome: &mut TrialOutcome,
        mega: &mut MegaTracker,
    ) {
        let mut cleared: Vec<Coord> = Vec::new();
        let mut obstacle_clears = 0;

        for group in groups {
            let ctx = GroupContext {
                team: self.team,
                preferences: self.preferences,
                chain: outcome.combos,
            };
            let payout = self.rules.resolve_group(group, &ctx);

            let mut group_cleared = 0;
            for &coord in &group.cells {
                let cell = board.get(coord);
                if cell.frozen {
                    board.set(coord, Cell::new(cell.tile));
                    outcome.disruptions += 1;
                } else {
                    cleared.push(coord);
                    group_cleared += 1;
                }
            }

            outcome.score += payout.score;
            outcome.gold += payout.gold;
            outcome.blocks += group_cleared;
            outcome.combos += 1;
            obstacle_clears += payout.clear_disruptions;
            if let Tile::Species(id) = group.tile {
                mega.record(id, group_cleared);
            }
        }

        for &coord in &cleared {
            board.set(coord, Cell::default());
        }

        let cleared_set: HashSet<Coord> = cleared.iter().copied().collect();
        for &coord in &cleared {
            for n in board.neighbors(coord) {
                if cleared_set.contains(&n) {
                    continue;
                }
                if self.rules.breaks_beside_clear(board.tile(n), self.preferences) {
                    board.set(n, Cell::default());
                    outcome.disruptions += 1;
                }
            }
        }

        if obstacle_clears > 0 {
            let targets: Vec<Coord> = board
                .coords()
                .filter(|&c| self.rules.is_clearable_obstacle(board.tile(c)))
                .take(obstacle_clears as usize)
                .collect();
            for coord in targets {
                board.set(coord, Cell::default());
                outcome.disruptions += 1;
            }
        }
    }
}

/// Mega progress gained within one trial, bounded by what the slot can still take.
struct MegaTracker {
    species: Option<SpeciesId>,
    headroom: u32,
    gained: u32,
}

impl MegaTracker {
    fn new(team: &Team) -> Self {
        MegaTracker {
            species: team.mega_species(),
            headroom: team.mega_headroom(),
            gained: 0,
        }
    }

    fn record(&mut self, species: SpeciesId, cleared: u32) {
        if self.species != Some(species) {
            return;
        }
        let add = cleared.min(self.headroom);
        self.headroom -= add;
        self.gained += add;
    }
}

/// Find every matched group, in reading order of each group's first cell.
pub fn find_groups(board: &Board, rules: &dyn RuleTable) -> Vec<MatchGroup> {
    let (width, height) = (board.width(), board.height());
    let mut marked = vec![false; width * height];

    let mut mark_runs = |line: &[Coord]| {
        let mut start = 0;
        while start < line.len() {
            let tile = board.tile(line[start]);
            let mut end = start + 1;
            while end < line.len() && board.tile(line[end]) == tile {
                end += 1;
            }
            if end - start >= 3 && rules.is_matchable(tile) {
                for c in &line[start..end] {
                    marked[c.row * width + c.col] = true;
                }
            }
            start = end;
        }
    };

    for row in 0..height {
        let line: Vec<Coord> = (0..width).map(|col| Coord::new(row, col)).collect();
        mark_runs(&line);
    }
    for col in 0..width {
        let line: Vec<Coord> = (0..height).map(|row| Coord::new(row, col)).collect();
        mark_runs(&line);
    }

    let mut visited = vec![false; width * height];
    let mut groups = Vec::new();
    for start in board.coords() {
        let idx = start.row * width + start.col;
        if !marked[idx] || visited[idx] {
            continue;
        }
        let tile = board.tile(start);
        visited[idx] = true;
        let mut cells = vec![start];
        let mut stack = vec![start];
        while let Some(c) = stack.pop() {
            for n in board.neighbors(c) {
                let ni = n.row * width + n.col;
                if marked[ni] && !visited[ni] && board.tile(n) == tile {
                    visited[ni] = true;
                    cells.push(n);
                    stack.push(n);
                }
            }
        }
        cells.sort();
        groups.push(MatchGroup { tile, cells });
    }
    groups
}

/// Drop tiles within each column and refill the top segment from the feeder.
///
/// Frozen cells stay put and split a column into independent segments.
pub fn settle(board: &mut Board, feeder: &mut dyn FeederSource) {
    for col in 0..board.width() {
        let mut bottom = board.height();
        while bottom > 0 {
            // Skip frozen anchors.
            if board.is_frozen(Coord::new(bottom - 1, col)) {
                bottom -= 1;
                continue;
            }
            let mut top = bottom;
            while top > 0 && !board.is_frozen(Coord::new(top - 1, col)) {
                top -= 1;
            }
            compact_segment(board, col, top, bottom);
            if top == 0 {
                refill_segment(board, col, bottom, feeder);
            }
            bottom = top;
        }
    }
}

fn compact_segment(board: &mut Board, col: usize, top: usize, bottom: usize) {
    let tiles: Vec<Cell> = (top..bottom)
        .rev()
        .map(|row| board.get(Coord::new(row, col)))
        .filter(|cell| !cell.is_empty())
        .collect();
    let mut row = bottom;
    for cell in tiles {
        row -= 1;
        board.set(Coord::new(row, col), cell);
    }
    for r in top..row {
        board.set(Coord::new(r, col), Cell::default());
    }
}

fn refill_segment(board: &mut Board, col: usize, bottom: usize, feeder: &mut dyn FeederSource) {
    for row in (0..bottom).rev() {
        let coord = Coord::new(row, col);
        if !board.get(coord).is_empty() {
            continue;
        }
        match feeder.next(col) {
            Some(tile) => board.set_tile(coord, tile),
            None => break,
        }
    }
}
