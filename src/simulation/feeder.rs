use rand::Rng;
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use std::collections::VecDeque;

use crate::board::{Team, Tile};
use crate::config::preferences::Preferences;

/// Supplies tiles for vacated cells at the top of a column.
pub trait FeederSource {
    /// Next tile dropping into `col`, or `None` when the column has run dry.
    fn next(&mut self, col: usize) -> Option<Tile>;
}

/// Draws uniformly from a tile pool, with a fixed number of drops per column.
pub struct RandomFeeder<R: Rng> {
    rng: R,
    pool: Vec<Tile>,
    remaining: Vec<u32>,
}

impl<R: Rng> RandomFeeder<R> {
    pub fn new(rng: R, pool: Vec<Tile>, columns: usize, height: u32) -> Self {
        RandomFeeder {
            rng,
            pool,
            remaining: vec![height; columns],
        }
    }
}

impl RandomFeeder<ChaCha8Rng> {
    /// Feeder over the team's species, seeded for one trial.
    pub fn for_team(team: &Team, columns: usize, height: u32, seed: u64) -> Self {
        let pool = team.species_ids().map(Tile::Species).collect();
        RandomFeeder::new(ChaCha8Rng::seed_from_u64(seed), pool, columns, height)
    }
}

impl<R: Rng> FeederSource for RandomFeeder<R> {
    fn next(&mut self, col: usize) -> Option<Tile> {
        let left = self.remaining.get_mut(col)?;
        if *left == 0 {
            return None;
        }
        let tile = *self.pool.choose(&mut self.rng)?;
        *left -= 1;
        Some(tile)
    }
}

/// Never refills.
pub struct NoRefill;

impl FeederSource for NoRefill {
    fn next(&mut self, _col: usize) -> Option<Tile> {
        None
    }
}

/// Replays predetermined tiles per column.
#[derive(Debug, Clone, Default)]
pub struct FixedFeeder {
    columns: Vec<VecDeque<Tile>>,
}

impl FixedFeeder {
    pub fn from_columns(columns: Vec<Vec<Tile>>) -> Self {
        FixedFeeder {
            columns: columns.into_iter().map(VecDeque::from).collect(),
        }
    }
}

impl FeederSource for FixedFeeder {
    fn next(&mut self, col: usize) -> Option<Tile> {
        self.columns.get_mut(col)?.pop_front()
    }
}

/// The feeder a trial should use under these preferences.
pub fn feeder_for(
    preferences: &Preferences,
    team: &Team,
    columns: usize,
    seed: u64,
) -> Box<dyn FeederSource> {
    if preferences.refills() {
        Box::new(RandomFeeder::for_team(
            team,
            columns,
            preferences.feeder_height,
            seed,
        ))
    } else {
        Box::new(NoRefill)
    }
}
