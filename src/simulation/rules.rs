use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::board::{Cell, Coord, Team, Tile};
use crate::config::preferences::Preferences;
use crate::simulation::cascade::combo_multiplier;

/// Gold paid per cleared coin.
pub const COIN_GOLD: f64 = 100.0;

/// One connected set of matched cells of a single tile kind.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchGroup {
    pub tile: Tile,
    /// Cells in reading order.
    pub cells: Vec<Coord>,
}

impl MatchGroup {
    pub fn size(&self) -> u32 {
        self.cells.len() as u32
    }
}

/// What a rule table sees when it scores a group.
pub struct GroupContext<'a> {
    pub team: &'a Team,
    pub preferences: &'a Preferences,
    /// Groups already cleared earlier in this trial.
    pub chain: u32,
}

/// Metrics a cleared group contributes before obstacle clean-up.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GroupPayout {
    pub score: f64,
    pub gold: f64,
    /// Wood or rock cells the group's effect removes elsewhere on the board.
    pub clear_disruptions: u32,
}

/// Game-rule hooks the cascade consults.
pub trait RuleTable: Send + Sync {
    /// Whether a cell may be an endpoint of a swap.
    fn is_movable(&self, cell: Cell) -> bool;

    /// Whether a tile takes part in runs of three.
    fn is_matchable(&self, tile: Tile) -> bool;

    /// Whether a tile breaks when a neighbouring cell is cleared.
    fn breaks_beside_clear(&self, tile: Tile, preferences: &Preferences) -> bool;

    /// Whether effects that remove disruptions may target this tile.
    fn is_clearable_obstacle(&self, tile: Tile) -> bool;

    fn resolve_group(&self, group: &MatchGroup, ctx: &GroupContext) -> GroupPayout;
}

/// Input to a species effect when its group clears.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectActivation {
    pub species: String,
    pub size: u32,
    pub chain: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EffectOutcome {
    pub score_multiplier: f64,
    pub bonus_gold: f64,
    pub clear_disruptions: u32,
}

impl Default for EffectOutcome {
    fn default() -> Self {
        EffectOutcome {
            score_multiplier: 1.0,
            bonus_gold: 0.0,
            clear_disruptions: 0,
        }
    }
}

/// A species skill that may fire when a group of that species clears.
pub trait SpeciesEffect: Send + Sync {
    /// Activation odds in percent for a group of `size` tiles.
    fn odds(&self, size: u32) -> u32;

    /// `None` cancels the activation.
    fn activate(&self, activation: &EffectActivation) -> Option<EffectOutcome>;
}

/// Effects implemented natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeEffect {
    PowerBoost,
    PowerOfFour,
    PowerOfFive,
    RockBreak,
    PayDay,
}

impl NativeEffect {
    pub fn all() -> &'static [NativeEffect] {
        &[
            NativeEffect::PowerBoost,
            NativeEffect::PowerOfFour,
            NativeEffect::PowerOfFive,
            NativeEffect::RockBreak,
            NativeEffect::PayDay,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            NativeEffect::PowerBoost => "power_boost",
            NativeEffect::PowerOfFour => "power_of_four",
            NativeEffect::PowerOfFive => "power_of_five",
            NativeEffect::RockBreak => "rock_break",
            NativeEffect::PayDay => "pay_day",
        }
    }
}

impl SpeciesEffect for NativeEffect {
    fn odds(&self, size: u32) -> u32 {
        // [3, 4, 5+]
        let table = match self {
            NativeEffect::PowerBoost | NativeEffect::RockBreak | NativeEffect::PayDay => {
                [50, 70, 100]
            }
            NativeEffect::PowerOfFour => [0, 100, 100],
            NativeEffect::PowerOfFive => [0, 0, 100],
        };
        match size {
            0..=2 => 0,
            3 => table[0],
            4 => table[1],
            _ => table[2],
        }
    }

    fn activate(&self, activation: &EffectActivation) -> Option<EffectOutcome> {
        let mut outcome = EffectOutcome::default();
        match self {
            NativeEffect::PowerBoost | NativeEffect::PowerOfFour => outcome.score_multiplier = 1.5,
            NativeEffect::PowerOfFive => outcome.score_multiplier = 2.0,
            NativeEffect::RockBreak => outcome.clear_disruptions = 2,
            NativeEffect::PayDay => outcome.bonus_gold = 100.0 * activation.size as f64,
        }
        Some(outcome)
    }
}

/// Score multiplier for the size of a species group.
pub fn size_multiplier(size: u32) -> f64 {
    match size {
        0..=3 => 1.0,
        4 => 1.5,
        _ => 2.0,
    }
}

/// The standard rule table: species, coins and metal match; wood and rock break beside
/// clears; species effects resolved by name.
pub struct StandardRules {
    effects: HashMap<String, Arc<dyn SpeciesEffect>>,
}

impl Default for StandardRules {
    fn default() -> Self {
        Self::new()
    }
}

impl StandardRules {
    pub fn new() -> Self {
        let mut effects: HashMap<String, Arc<dyn SpeciesEffect>> = HashMap::new();
        for effect in NativeEffect::all() {
            effects.insert(effect.name().to_string(), Arc::new(*effect));
        }
        StandardRules { effects }
    }

    /// Register an effect, replacing any effect with the same name.
    pub fn with_effect(mut self, name: impl Into<String>, effect: Arc<dyn SpeciesEffect>) -> Self {
        self.effects.insert(name.into(), effect);
        self
    }

    pub fn effect(&self, name: &str) -> Option<&dyn SpeciesEffect> {
        self.effects.get(name).map(|e| e.as_ref())
    }

    pub fn effect_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.effects.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Fire the named effect if it is enabled and its odds clear the threshold.
    fn trigger(
        &self,
        name: &str,
        activation: &EffectActivation,
        preferences: &Preferences,
    ) -> Option<EffectOutcome> {
        if preferences.is_effect_disabled(name) {
            return None;
        }
        let Some(effect) = self.effect(name) else {
            debug!(effect = name, "Unknown species effect ignored");
            return None;
        };
        let odds = effect.odds(activation.size);
        if odds == 0 || odds < preferences.effect_threshold {
            return None;
        }
        effect.activate(activation)
    }
}

impl RuleTable for StandardRules {
    fn is_movable(&self, cell: Cell) -> bool {
        !cell.frozen && matches!(cell.tile, Tile::Species(_) | Tile::Coin | Tile::Empty)
    }

    fn is_matchable(&self, tile: Tile) -> bool {
        matches!(tile, Tile::Species(_) | Tile::Coin | Tile::Metal)
    }

    fn breaks_beside_clear(&self, tile: Tile, preferences: &Preferences) -> bool {
        match tile {
            Tile::Wood | Tile::Rock => true,
            Tile::Metal => preferences.extended_metal,
            _ => false,
        }
    }

    fn is_clearable_obstacle(&self, tile: Tile) -> bool {
        matches!(tile, Tile::Wood | Tile::Rock)
    }

    fn resolve_group(&self, group: &MatchGroup, ctx: &GroupContext) -> GroupPayout {
        let size = group.size();
        match group.tile {
            Tile::Coin => GroupPayout {
                gold: COIN_GOLD * size as f64,
                ..GroupPayout::default()
            },
            Tile::Species(id) => {
                let Some(binding) = ctx.team.binding(id) else {
                    return GroupPayout::default();
                };
                let power_up = if ctx.preferences.attack_power_up { 2.0 } else { 1.0 };
                let mut payout = GroupPayout {
                    score: binding.attack as f64
                        * size_multiplier(size)
                        * combo_multiplier(ctx.chain)
                        * power_up,
                    ..GroupPayout::default()
                };
                if let Some(name) = &binding.effect {
                    let activation = EffectActivation {
                        species: binding.name.clone(),
                        size,
                        chain: ctx.chain,
                    };
                    if let Some(outcome) = self.trigger(name, &activation, ctx.preferences) {
                        payout.score *= outcome.score_multiplier;
                        payout.gold += outcome.bonus_gold;
                        payout.clear_disruptions += outcome.clear_disruptions;
                    }
                }
                payout
            }
            _ => GroupPayout::default(),
        }
    }
}
