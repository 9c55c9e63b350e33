use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::config::app::GradingModeConfig;
use crate::simulation::aggregate::SimulationResult;
use crate::simulation::moves::Move;

/// A metric results can be ranked on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GradingKey {
    Gold,
    Score,
    Combos,
    Disruptions,
    Blocks,
    Progress,
    Move,
    NoCoin,
}

impl GradingKey {
    /// Canonical priority order, used for every key a description leaves out.
    pub const ALL: [GradingKey; 8] = [
        GradingKey::Gold,
        GradingKey::Score,
        GradingKey::Combos,
        GradingKey::Disruptions,
        GradingKey::Blocks,
        GradingKey::Progress,
        GradingKey::Move,
        GradingKey::NoCoin,
    ];

    pub fn token(&self) -> &'static str {
        match self {
            GradingKey::Gold => "GOLD",
            GradingKey::Score => "SCORE",
            GradingKey::Combos => "COMBOS",
            GradingKey::Disruptions => "DISRUPTIONS",
            GradingKey::Blocks => "BLOCKS",
            GradingKey::Progress => "PROGRESS",
            GradingKey::Move => "MOVE",
            GradingKey::NoCoin => "NOCOIN",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        GradingKey::ALL.into_iter().find(|k| k.token() == token)
    }

    /// `Less` when `a` ranks ahead of `b`.
    pub fn compare(&self, a: &SimulationResult, b: &SimulationResult) -> Ordering {
        match self {
            GradingKey::Gold => descending(a.net_gold.mean(), b.net_gold.mean()),
            GradingKey::Score => descending(a.net_score.mean(), b.net_score.mean()),
            GradingKey::Combos => descending(a.combos.mean(), b.combos.mean()),
            GradingKey::Disruptions => descending(a.disruptions.mean(), b.disruptions.mean()),
            GradingKey::Blocks => descending(a.blocks.mean(), b.blocks.mean()),
            GradingKey::Progress => descending(a.progress.mean(), b.progress.mean()),
            GradingKey::Move => compare_moves(a.mv.as_ref(), b.mv.as_ref()),
            GradingKey::NoCoin => {
                let (ga, gb) = (a.net_gold.mean(), b.net_gold.mean());
                // Positive gold always ranks ahead.
                (gb > 0.0)
                    .cmp(&(ga > 0.0))
                    .then_with(|| descending(ga, gb))
            }
        }
    }
}

fn descending(a: f64, b: f64) -> Ordering {
    b.total_cmp(&a)
}

fn compare_moves(a: Option<&Move>, b: Option<&Move>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (Some(a), Some(b)) if a == b => Ordering::Equal,
        (Some(a), Some(b)) => {
            let (sa, sb) = (a.sequence(), b.sequence());
            sa.iter()
                .zip(sb.iter())
                .map(|(x, y)| x.cmp(y))
                .find(|o| o.is_ne())
                .unwrap_or(Ordering::Equal)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradingCriterion {
    pub key: GradingKey,
    pub reversed: bool,
}

impl GradingCriterion {
    pub fn compare(&self, a: &SimulationResult, b: &SimulationResult) -> Ordering {
        let ordering = self.key.compare(a, b);
        if self.reversed {
            ordering.reverse()
        } else {
            ordering
        }
    }
}

/// Split off an optional sign and the leading run of uppercase letters.
fn parse_token(token: &str) -> Option<GradingCriterion> {
    let (reversed, rest) = match *token.as_bytes().first()? {
        b'-' => (true, &token[1..]),
        b'+' => (false, &token[1..]),
        _ => (false, token),
    };
    let end = rest
        .find(|c: char| !c.is_ascii_uppercase())
        .unwrap_or(rest.len());
    if end == 0 {
        return None;
    }
    let key = GradingKey::from_token(&rest[..end])?;
    Some(GradingCriterion { key, reversed })
}

/// An ordered list of criteria; the first one that tells two results apart decides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grading {
    criteria: Vec<GradingCriterion>,
}

impl Default for Grading {
    fn default() -> Self {
        Grading::parse(None)
    }
}

impl Grading {
    /// Build from a description such as `"-SCORE, GOLD"`.
    ///
    /// Keys appear in the order written; unrecognised tokens and repeats are skipped. Every
    /// key not mentioned follows in canonical order, unreversed.
    pub fn parse(description: Option<&str>) -> Self {
        let mut criteria: Vec<GradingCriterion> = Vec::with_capacity(GradingKey::ALL.len());

        let tokens = description
            .unwrap_or("")
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|t| !t.is_empty());
        for token in tokens {
            if let Some(criterion) = parse_token(token) {
                if !criteria.iter().any(|c| c.key == criterion.key) {
                    criteria.push(criterion);
                }
            }
        }

        for key in GradingKey::ALL {
            if !criteria.iter().any(|c| c.key == key) {
                criteria.push(GradingCriterion {
                    key,
                    reversed: false,
                });
            }
        }

        Grading { criteria }
    }

    pub fn criteria(&self) -> &[GradingCriterion] {
        &self.criteria
    }

    pub fn compare(&self, a: &SimulationResult, b: &SimulationResult) -> Ordering {
        self.criteria
            .iter()
            .fold(Ordering::Equal, |acc, c| acc.then_with(|| c.compare(a, b)))
    }

    /// Stable sort, best result first.
    pub fn sort(&self, results: &mut [SimulationResult]) {
        results.sort_by(|a, b| self.compare(a, b));
    }
}

impl std::fmt::Display for Grading {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .criteria
            .iter()
            .map(|c| format!("{}{}", if c.reversed { "-" } else { "" }, c.key.token()))
            .collect();
        write!(f, "{}", parts.join(","))
    }
}

/// A named ranking policy.
#[derive(Debug, Clone, PartialEq)]
pub struct GradingMode {
    pub key: String,
    pub description: String,
    pub grading: Grading,
    /// User-defined rather than built in.
    pub custom: bool,
}

impl GradingMode {
    pub fn new(key: impl Into<String>, description: impl Into<String>, custom: bool) -> Self {
        let description = description.into();
        let grading = Grading::parse(Some(&description));
        GradingMode {
            key: key.into(),
            description,
            grading,
            custom,
        }
    }

    pub fn display_name(&self) -> String {
        if self.custom {
            return self.key.clone();
        }
        self.key
            .split('_')
            .filter(|w| !w.is_empty())
            .map(|w| {
                let mut chars = w.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn compare(&self, a: &SimulationResult, b: &SimulationResult) -> Ordering {
        self.grading.compare(a, b)
    }
}

pub const DEFAULT_MODE: &str = "default";

const BUILTIN_MODES: [(&str, &str); 8] = [
    ("score", "SCORE"),
    ("gold", "GOLD"),
    ("combos", "COMBOS"),
    ("disruptions", "DISRUPTIONS"),
    ("blocks", "BLOCKS"),
    ("progress", "PROGRESS"),
    ("no_coin", "NOCOIN"),
    (DEFAULT_MODE, ""),
];

pub fn builtin_modes() -> Vec<GradingMode> {
    BUILTIN_MODES
        .iter()
        .map(|(key, description)| GradingMode::new(*key, *description, false))
        .collect()
}

pub fn is_builtin(key: &str) -> bool {
    BUILTIN_MODES.iter().any(|(k, _)| *k == key)
}

/// Built-in modes plus configured ones; a configured mode replaces a built-in of the same key.
#[derive(Debug, Clone)]
pub struct ModeCatalog {
    modes: Vec<GradingMode>,
}

impl Default for ModeCatalog {
    fn default() -> Self {
        ModeCatalog {
            modes: builtin_modes(),
        }
    }
}

impl ModeCatalog {
    pub fn with_custom(custom: &[GradingModeConfig]) -> Self {
        let mut catalog = ModeCatalog::default();
        for config in custom {
            let mode = GradingMode::new(config.name.clone(), config.description.clone(), true);
            match catalog.modes.iter_mut().find(|m| m.key == mode.key) {
                Some(existing) => *existing = mode,
                None => catalog.modes.push(mode),
            }
        }
        catalog
    }

    pub fn get(&self, key: &str) -> Option<&GradingMode> {
        self.modes.iter().find(|m| m.key == key)
    }

    pub fn modes(&self) -> &[GradingMode] {
        &self.modes
    }
}
