use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::preferences::Preferences;
use crate::grading::{DEFAULT_MODE, is_builtin};

/// A user-defined grading mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradingModeConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Directory holding `effects/*.rhai`. Native effects only when unset.
    #[serde(default)]
    pub rule_directory: Option<String>,
    /// Rayon worker threads; 0 keeps rayon's default.
    #[serde(default)]
    pub worker_threads: usize,
    #[serde(default = "default_websocket_bind")]
    pub websocket_bind: String,
    #[serde(default = "default_websocket_port")]
    pub websocket_port: u16,
    /// Key of the mode used when a request names none.
    #[serde(default = "default_grading_mode")]
    pub grading_mode: String,
    #[serde(default)]
    pub preferences: Preferences,
    #[serde(default)]
    pub grading_modes: Vec<GradingModeConfig>,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_websocket_bind() -> String {
    "127.0.0.1".to_string()
}
fn default_websocket_port() -> u16 {
    8119
}
fn default_grading_mode() -> String {
    DEFAULT_MODE.to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            log_level: default_log_level(),
            rule_directory: None,
            worker_threads: 0,
            websocket_bind: default_websocket_bind(),
            websocket_port: default_websocket_port(),
            grading_mode: default_grading_mode(),
            preferences: Preferences::default(),
            grading_modes: Vec::new(),
        }
    }
}

impl AppConfig {
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Cannot read {}: {}", path.display(), e))?;
        Self::from_toml_str(&content, path)
    }

    pub fn from_toml_str(content: &str, source_path: &Path) -> Result<Self, String> {
        let config: AppConfig =
            toml::from_str(content).map_err(|e| format!("{}: {}", source_path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        let mut errors = Vec::new();

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            errors.push(format!(
                "log_level must be one of {:?}, got '{}'. Example: log_level = \"info\"",
                valid_levels, self.log_level
            ));
        }

        if !(1024..=65535).contains(&self.websocket_port) {
            errors.push(format!(
                "websocket_port must be 1024-65535, got {}. Example: websocket_port = 8119",
                self.websocket_port
            ));
        }

        if self.worker_threads > 1024 {
            errors.push(format!(
                "worker_threads must be 0-1024, got {}. Example: worker_threads = 0",
                self.worker_threads
            ));
        }

        for (i, mode) in self.grading_modes.iter().enumerate() {
            if mode.name.trim().is_empty() {
                errors.push(format!(
                    "grading_modes[{}].name must not be empty. Example: name = \"speedrun\"",
                    i
                ));
            }
            if self.grading_modes[..i].iter().any(|m| m.name == mode.name) {
                errors.push(format!(
                    "grading_modes[{}].name '{}' is defined twice. Example: name = \"speedrun\"",
                    i, mode.name
                ));
            }
        }

        let known = is_builtin(&self.grading_mode)
            || self.grading_modes.iter().any(|m| m.name == self.grading_mode);
        if !known {
            errors.push(format!(
                "grading_mode '{}' is neither built in nor defined in [[grading_modes]]. Example: grading_mode = \"score\"",
                self.grading_mode
            ));
        }

        errors.extend(self.preferences.validation_errors());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.join("\n"))
        }
    }
}
