use serde::{Deserialize, Serialize};

use crate::board::{Board, Coord};
use crate::simulation::rules::RuleTable;

/// A swap between two board cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Move {
    pub from: Coord,
    pub to: Coord,
}

impl Move {
    pub const fn new(from: Coord, to: Coord) -> Self {
        Move { from, to }
    }

    /// 1-based `[row, col, row, col]`, the form used for tie-break ordering.
    pub fn sequence(&self) -> [usize; 4] {
        [
            self.from.row + 1,
            self.from.col + 1,
            self.to.row + 1,
            self.to.col + 1,
        ]
    }

    pub fn is_adjacent(&self) -> bool {
        self.from.row.abs_diff(self.to.row) + self.from.col.abs_diff(self.to.col) == 1
    }
}

impl std::fmt::Display for Move {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} <-> {}", self.from, self.to)
    }
}

/// Every swap worth simulating: orthogonally adjacent, both ends movable, contents differ.
///
/// Moves come out in reading order of their first cell, rightward swap before downward.
pub fn enumerate_moves(board: &Board, rules: &dyn RuleTable) -> Vec<Move> {
    let mut moves = Vec::new();
    for from in board.coords() {
        let a = board.get(from);
        if !rules.is_movable(a) {
            continue;
        }
        let candidates = [
            Coord::new(from.row, from.col + 1),
            Coord::new(from.row + 1, from.col),
        ];
        for to in candidates {
            if !board.contains(to) {
                continue;
            }
            let b = board.get(to);
            if rules.is_movable(b) && a.tile != b.tile {
                moves.push(Move::new(from, to));
            }
        }
    }
    moves
}
