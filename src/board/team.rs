use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use super::{RESERVED_TOKENS, SpeciesId};

/// Errors raised while validating a team roster.
#[derive(Debug, Clone, PartialEq)]
pub enum TeamError {
    Empty,
    TooManySpecies(usize),
    DuplicateKey(String),
    ReservedKey(String),
    InvalidKey(String),
    UnknownMegaSpecies(String),
}

impl std::fmt::Display for TeamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TeamError::Empty => write!(f, "Team has no species"),
            TeamError::TooManySpecies(n) => {
                write!(f, "Team has {} species, at most {} are supported", n, u8::MAX)
            }
            TeamError::DuplicateKey(key) => write!(f, "Species key '{}' is used twice", key),
            TeamError::ReservedKey(key) => {
                write!(f, "Species key '{}' collides with a board token", key)
            }
            TeamError::InvalidKey(key) => write!(
                f,
                "Species key '{}' must be non-empty, contain no whitespace and not end in '*'",
                key
            ),
            TeamError::UnknownMegaSpecies(name) => {
                write!(f, "Mega species '{}' is not on the team", name)
            }
        }
    }
}

impl std::error::Error for TeamError {}

/// One roster entry: a species, the board token bound to it, and its game stats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeciesBinding {
    pub name: String,
    /// Token used for this species in board text.
    pub key: String,
    #[serde(default = "default_attack")]
    pub attack: u32,
    #[serde(default)]
    pub effect: Option<String>,
}

fn default_attack() -> u32 {
    60
}

/// Mega activation threshold. `None` is the "unreachable" sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MegaThreshold(pub Option<u32>);

impl MegaThreshold {
    pub const UNREACHABLE: MegaThreshold = MegaThreshold(None);

    /// Progress still needed before activation, or `None` when activation can never happen.
    pub fn remaining(&self, progress: u32) -> Option<u32> {
        self.0.map(|t| t.saturating_sub(progress))
    }
}

/// The team's single mega slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MegaSlot {
    pub species: String,
    #[serde(default)]
    pub threshold: MegaThreshold,
    #[serde(default)]
    pub progress: u32,
    #[serde(default)]
    pub active: bool,
}

/// An ordered roster of species bindings plus an optional mega slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Team {
    pub species: Vec<SpeciesBinding>,
    #[serde(default)]
    pub mega: Option<MegaSlot>,
}

impl Team {
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Cannot read {}: {}", path.display(), e))?;
        let team: Team = toml::from_str(&content)
            .map_err(|e| format!("Invalid TOML in {}: {}", path.display(), e))?;
        team.validate()
            .map_err(|e| format!("{}: {}", path.display(), e))?;
        Ok(team)
    }

    pub fn validate(&self) -> Result<(), TeamError> {
        if self.species.is_empty() {
            return Err(TeamError::Empty);
        }
        if self.species.len() > u8::MAX as usize {
            return Err(TeamError::TooManySpecies(self.species.len()));
        }

        let mut seen = HashSet::new();
        for binding in &self.species {
            let key = binding.key.as_str();
            if key.is_empty() || key.ends_with('*') || key.chars().any(char::is_whitespace) {
                return Err(TeamError::InvalidKey(key.to_string()));
            }
            if RESERVED_TOKENS.contains(&key) {
                return Err(TeamError::ReservedKey(key.to_string()));
            }
            if !seen.insert(key) {
                return Err(TeamError::DuplicateKey(key.to_string()));
            }
        }

        if let Some(mega) = &self.mega {
            if !self.species.iter().any(|s| s.name == mega.species) {
                return Err(TeamError::UnknownMegaSpecies(mega.species.clone()));
            }
        }
        Ok(())
    }

    /// Look up the species bound to a board token.
    pub fn species_for_key(&self, key: &str) -> Option<SpeciesId> {
        self.species
            .iter()
            .position(|s| s.key == key)
            .map(|i| SpeciesId(i as u8))
    }

    pub fn binding(&self, id: SpeciesId) -> Option<&SpeciesBinding> {
        self.species.get(id.0 as usize)
    }

    pub fn species_ids(&self) -> impl Iterator<Item = SpeciesId> + '_ {
        (0..self.species.len()).map(|i| SpeciesId(i as u8))
    }

    /// The roster id of the mega slot's species.
    pub fn mega_species(&self) -> Option<SpeciesId> {
        let mega = self.mega.as_ref()?;
        self.species
            .iter()
            .position(|s| s.name == mega.species)
            .map(|i| SpeciesId(i as u8))
    }

    /// Mega progress a trial may still add. Zero when the slot is active or unreachable.
    pub fn mega_headroom(&self) -> u32 {
        match &self.mega {
            Some(mega) if !mega.active => mega.threshold.remaining(mega.progress).unwrap_or(0),
            _ => 0,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn binding(name: &str, key: &str, attack: u32) -> SpeciesBinding {
        SpeciesBinding {
            name: name.to_string(),
            key: key.to_string(),
            attack,
            effect: None,
        }
    }

    pub(crate) fn sample_team() -> Team {
        Team {
            species: vec![
                binding("Ember", "A", 60),
                binding("Brook", "B", 50),
                binding("Fern", "C", 70),
                binding("Spark", "D", 40),
            ],
            mega: None,
        }
    }

    #[test]
    fn team_toml_parses_with_defaults() {
        let toml = r#"
            [[species]]
            name = "Ember"
            key = "A"

            [[species]]
            name = "Brook"
            key = "B"
            attack = 90
            effect = "power_boost"

            [mega]
            species = "Brook"
            threshold = 12
        "#;
        let team: Team = toml::from_str(toml).unwrap();
        team.validate().unwrap();
        assert_eq!(team.species[0].attack, 60);
        assert_eq!(team.species[1].effect.as_deref(), Some("power_boost"));
        let mega = team.mega.as_ref().unwrap();
        assert_eq!(mega.threshold, MegaThreshold(Some(12)));
        assert_eq!(mega.progress, 0);
        assert!(!mega.active);
        assert_eq!(team.mega_species(), Some(SpeciesId(1)));
    }

    #[test]
    fn missing_threshold_is_unreachable() {
        let toml = r#"
            [[species]]
            name = "Ember"
            key = "A"

            [mega]
            species = "Ember"
        "#;
        let team: Team = toml::from_str(toml).unwrap();
        assert_eq!(team.mega.as_ref().unwrap().threshold, MegaThreshold::UNREACHABLE);
        assert_eq!(team.mega_headroom(), 0);
    }

    #[test]
    fn headroom_respects_progress_and_activity() {
        let mut team = sample_team();
        team.mega = Some(MegaSlot {
            species: "Ember".to_string(),
            threshold: MegaThreshold(Some(10)),
            progress: 7,
            active: false,
        });
        assert_eq!(team.mega_headroom(), 3);
        team.mega.as_mut().unwrap().active = true;
        assert_eq!(team.mega_headroom(), 0);
    }

    #[test]
    fn duplicate_keys_rejected() {
        let mut team = sample_team();
        team.species.push(binding("Copy", "A", 10));
        assert_eq!(team.validate(), Err(TeamError::DuplicateKey("A".to_string())));
    }

    #[test]
    fn reserved_keys_rejected() {
        let mut team = sample_team();
        team.species[0].key = "$".to_string();
        assert_eq!(team.validate(), Err(TeamError::ReservedKey("$".to_string())));
    }

    #[test]
    fn frozen_marker_not_allowed_in_key() {
        let mut team = sample_team();
        team.species[0].key = "A*".to_string();
        assert!(matches!(team.validate(), Err(TeamError::InvalidKey(_))));
    }

    #[test]
    fn unknown_mega_species_rejected() {
        let mut team = sample_team();
        team.mega = Some(MegaSlot {
            species: "Nobody".to_string(),
            threshold: MegaThreshold(Some(5)),
            progress: 0,
            active: false,
        });
        assert!(matches!(team.validate(), Err(TeamError::UnknownMegaSpecies(_))));
    }

    #[test]
    fn empty_team_rejected() {
        let team = Team { species: vec![], mega: None };
        assert_eq!(team.validate(), Err(TeamError::Empty));
    }

    #[test]
    fn species_lookup_by_key() {
        let team = sample_team();
        assert_eq!(team.species_for_key("C"), Some(SpeciesId(2)));
        assert_eq!(team.species_for_key("Z"), None);
        assert_eq!(team.binding(SpeciesId(3)).unwrap().name, "Spark");
    }
}
