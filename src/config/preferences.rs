use serde::{Deserialize, Serialize};

/// Player preferences that shape every simulated trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default = "default_num_feeders")]
    pub num_feeders: u32,
    /// Refill tiles available per column per trial.
    #[serde(default = "default_feeder_height")]
    pub feeder_height: u32,
    /// Trials per move. Falls back to `num_feeders` when unset.
    #[serde(default)]
    pub trials: Option<u32>,
    #[serde(default)]
    pub disabled_effects: Vec<String>,
    /// Minimum activation odds (0-100) an effect needs to fire.
    #[serde(default = "default_effect_threshold")]
    pub effect_threshold: u32,
    /// Deterministic play: vacated cells stay empty.
    #[serde(default)]
    pub mobile_mode: bool,
    #[serde(default)]
    pub extended_metal: bool,
    #[serde(default)]
    pub attack_power_up: bool,
    /// Caps net score per trial. Unset in survival stages.
    #[serde(default)]
    pub remaining_health: Option<u32>,
    /// Base seed for feeder draws; 0 picks a fresh seed per run.
    #[serde(default)]
    pub seed: u64,
}

fn default_num_feeders() -> u32 {
    20
}
fn default_feeder_height() -> u32 {
    6
}
fn default_effect_threshold() -> u32 {
    50
}

impl Default for Preferences {
    fn default() -> Self {
        Preferences {
            num_feeders: default_num_feeders(),
            feeder_height: default_feeder_height(),
            trials: None,
            disabled_effects: Vec::new(),
            effect_threshold: default_effect_threshold(),
            mobile_mode: false,
            extended_metal: false,
            attack_power_up: false,
            remaining_health: None,
            seed: 0,
        }
    }
}

impl Preferences {
    pub fn trial_count(&self) -> u32 {
        self.trials.unwrap_or(self.num_feeders)
    }

    pub fn is_effect_disabled(&self, name: &str) -> bool {
        self.disabled_effects.iter().any(|d| d == name)
    }

    /// Refill happens only outside mobile mode and with a non-zero feeder height.
    pub fn refills(&self) -> bool {
        !self.mobile_mode && self.feeder_height > 0
    }

    /// Collect every problem, one line each.
    pub fn validation_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.trial_count() == 0 {
            errors.push(format!(
                "preferences.trials must be >= 1, got {} (num_feeders = {}). Example: trials = 20",
                self.trial_count(),
                self.num_feeders
            ));
        }

        if self.effect_threshold > 100 {
            errors.push(format!(
                "preferences.effect_threshold must be 0-100, got {}. Example: effect_threshold = 50",
                self.effect_threshold
            ));
        }

        if self.remaining_health == Some(0) {
            errors.push(
                "preferences.remaining_health must be > 0 when set, got 0. Example: remaining_health = 5000"
                    .to_string(),
            );
        }

        errors
    }

    pub fn validate(&self) -> Result<(), String> {
        let errors = self.validation_errors();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.join("\n"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_table_uses_defaults() {
        let prefs: Preferences = toml::from_str("").unwrap();
        assert_eq!(prefs, Preferences::default());
        assert_eq!(prefs.trial_count(), 20);
        assert!(prefs.refills());
    }

    #[test]
    fn explicit_trials_override_feeder_count() {
        let prefs: Preferences = toml::from_str("num_feeders = 8\ntrials = 3").unwrap();
        assert_eq!(prefs.trial_count(), 3);
    }

    #[test]
    fn mobile_mode_disables_refill() {
        let prefs = Preferences {
            mobile_mode: true,
            ..Preferences::default()
        };
        assert!(!prefs.refills());
        let prefs = Preferences {
            feeder_height: 0,
            ..Preferences::default()
        };
        assert!(!prefs.refills());
    }

    #[test]
    fn zero_trials_rejected() {
        let prefs: Preferences = toml::from_str("num_feeders = 0").unwrap();
        let err = prefs.validate().unwrap_err();
        assert!(err.contains("preferences.trials"));
    }

    #[test]
    fn all_problems_reported_together() {
        let prefs: Preferences =
            toml::from_str("trials = 0\neffect_threshold = 150\nremaining_health = 0").unwrap();
        let err = prefs.validate().unwrap_err();
        assert_eq!(err.lines().count(), 3);
        assert!(err.contains("effect_threshold"));
        assert!(err.contains("remaining_health"));
    }

    #[test]
    fn disabled_effects_lookup() {
        let prefs = Preferences {
            disabled_effects: vec!["pay_day".to_string()],
            ..Preferences::default()
        };
        assert!(prefs.is_effect_disabled("pay_day"));
        assert!(!prefs.is_effect_disabled("rock_break"));
    }
}
