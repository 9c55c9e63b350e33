pub mod app;
pub mod preferences;

pub use app::{AppConfig, GradingModeConfig};
pub use preferences::Preferences;
