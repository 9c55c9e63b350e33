use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use tracing::info;

use crate::board::{Board, Team};
use crate::config::AppConfig;
use crate::grading::{GradingMode, ModeCatalog};
use crate::ranking::{RankedRun, RankingDriver, RankingRequest};
use crate::server::protocol::{ResultReport, reports};
use crate::server::{self, ServerState};
use crate::simulation::rules::RuleTable;
use crate::simulation::scripted::standard_rules_with_scripts;

/// Native rules plus any scripted effects under the configured rule directory.
pub fn load_rules(config: &AppConfig) -> Result<Arc<dyn RuleTable>, String> {
    let rule_dir = config.rule_directory.as_deref().map(Path::new);
    let rules = standard_rules_with_scripts(rule_dir)
        .map_err(|e| format!("Failed to load rules: {}", e))?;
    if let Some(dir) = rule_dir {
        info!(dir = %dir.display(), effects = rules.effect_names().len(), "Rules loaded");
    }
    Ok(Arc::new(rules))
}

fn resolve_mode(config: &AppConfig, mode: Option<&str>) -> Result<GradingMode, String> {
    let key = mode.unwrap_or(&config.grading_mode);
    ModeCatalog::with_custom(&config.grading_modes)
        .get(key)
        .cloned()
        .ok_or_else(|| format!("Unknown grading mode '{}'. Run `matchsim modes` to list them", key))
}

/// Load a board and team from files and rank every move on the calling thread.
pub fn rank_files(
    config: &AppConfig,
    board_path: &Path,
    team_path: &Path,
    mode: Option<&str>,
) -> Result<(GradingMode, RankedRun), String> {
    let team = Team::from_file(team_path)?;
    let board = Board::from_file(board_path, &team)?;
    let grading_mode = resolve_mode(config, mode)?;
    let rules = load_rules(config)?;

    let request = RankingRequest {
        board,
        team,
        preferences: config.preferences.clone(),
        grading_mode: grading_mode.clone(),
    };
    let run = RankingDriver::new(rules)
        .rank(&request, &AtomicBool::new(false))
        .map_err(|e| format!("Ranking failed: {}", e))?;
    Ok((grading_mode, run))
}

/// Rank and print the results as a table or JSON.
pub fn rank(
    config: &AppConfig,
    board_path: &Path,
    team_path: &Path,
    mode: Option<&str>,
    top: Option<usize>,
    json: bool,
) -> Result<(), String> {
    let (grading_mode, run) = rank_files(config, board_path, team_path, mode)?;
    let mut rows = reports(&run.results);
    if let Some(n) = top {
        rows.truncate(n);
    }

    if json {
        let body = serde_json::json!({
            "run_id": run.run_id,
            "grading_mode": grading_mode.key,
            "results": rows,
        });
        let text = serde_json::to_string_pretty(&body)
            .map_err(|e| format!("Cannot serialize results: {}", e))?;
        println!("{}", text);
    } else {
        println!(
            "Mode: {} ({})  Run: {}",
            grading_mode.display_name(),
            grading_mode.grading,
            run.run_id
        );
        print!("{}", format_table(&rows));
        println!("\n{} of {} move(s) shown", rows.len(), run.results.len());
    }
    Ok(())
}

pub fn format_table(rows: &[ResultReport]) -> String {
    let mut out = format!(
        "{:>4}  {:<16} {:>10} {:>10} {:>7} {:>7} {:>11} {:>9}\n",
        "Rank", "Move", "Score", "Gold", "Combos", "Blocks", "Disruptions", "Progress"
    );
    out.push_str(&"-".repeat(82));
    out.push('\n');
    for row in rows {
        let mv = match row.mv {
            Some([r1, c1, r2, c2]) => format!("({},{})<->({},{})", r1, c1, r2, c2),
            None => "-".to_string(),
        };
        out.push_str(&format!(
            "{:>4}  {:<16} {:>10.1} {:>10.1} {:>7.2} {:>7.2} {:>11.2} {:>9.2}\n",
            row.rank,
            mv,
            row.net_score,
            row.net_gold,
            row.combos,
            row.blocks,
            row.disruptions,
            row.progress
        ));
    }
    out
}

/// One line per grading mode: key, label, description and the full key order.
pub fn format_modes(config: &AppConfig) -> String {
    let catalog = ModeCatalog::with_custom(&config.grading_modes);
    let mut out = format!("{:<14} {:<14} {:<22} {}\n", "Key", "Name", "Description", "Order");
    out.push_str(&"-".repeat(100));
    out.push('\n');
    for mode in catalog.modes() {
        let marker = if mode.key == config.grading_mode { "*" } else { "" };
        let description = if mode.description.is_empty() {
            "(canonical)"
        } else {
            mode.description.as_str()
        };
        out.push_str(&format!(
            "{:<14} {:<14} {:<22} {}\n",
            format!("{}{}", mode.key, marker),
            mode.display_name(),
            description,
            mode.grading
        ));
    }
    out
}

pub fn list_modes(config: &AppConfig) {
    print!("{}", format_modes(config));
    println!("\n* default mode");
}

/// Start the websocket server and run until Ctrl-C.
pub async fn serve(config: &AppConfig) -> Result<(), String> {
    let rules = load_rules(config)?;
    let state = Arc::new(ServerState::new(config, rules));

    let addr: SocketAddr = format!("{}:{}", config.websocket_bind, config.websocket_port)
        .parse()
        .map_err(|e| format!("Invalid bind address: {}", e))?;

    tokio::select! {
        result = server::start_server(state, addr) => {
            result.map_err(|e| format!("Server error: {}", e))
        }
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\nShutdown signal received");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GradingModeConfig;
    use crate::config::preferences::Preferences;
    use std::fs;
    use tempfile::TempDir;

    const TEAM_TOML: &str = r#"
        [[species]]
        name = "Ember"
        key = "A"
        attack = 60

        [[species]]
        name = "Brook"
        key = "B"
        attack = 50

        [[species]]
        name = "Fern"
        key = "C"
        attack = 70

        [[species]]
        name = "Spark"
        key = "D"
        attack = 40
    "#;

    const BOARD_TOML: &str = r#"
        rows = [
            "B C D X A D",
            "C C A A C B",
            "B B X B C A",
            "D X C X D D",
            "C A C D X C",
            "B A X B D A",
        ]
    "#;

    fn write_inputs(dir: &TempDir) -> (std::path::PathBuf, std::path::PathBuf) {
        let board = dir.path().join("board.toml");
        let team = dir.path().join("team.toml");
        fs::write(&board, BOARD_TOML).unwrap();
        fs::write(&team, TEAM_TOML).unwrap();
        (board, team)
    }

    fn deterministic_config() -> AppConfig {
        AppConfig {
            preferences: Preferences {
                trials: Some(1),
                mobile_mode: true,
                ..Preferences::default()
            },
            ..AppConfig::default()
        }
    }

    #[test]
    fn rank_files_ranks_board_from_disk() {
        let dir = TempDir::new().unwrap();
        let (board, team) = write_inputs(&dir);
        let (mode, run) =
            rank_files(&deterministic_config(), &board, &team, Some("score")).unwrap();
        assert_eq!(mode.key, "score");
        let best = ResultReport::from_result(1, &run.results[0]);
        assert_eq!(best.mv, Some([1, 5, 2, 5]));
        assert_eq!(best.net_score, 60.0);
    }

    #[test]
    fn rank_files_rejects_unknown_mode() {
        let dir = TempDir::new().unwrap();
        let (board, team) = write_inputs(&dir);
        let err = rank_files(&deterministic_config(), &board, &team, Some("fastest")).unwrap_err();
        assert!(err.contains("Unknown grading mode 'fastest'"));
    }

    #[test]
    fn rank_files_reports_missing_team_file() {
        let dir = TempDir::new().unwrap();
        let (board, _) = write_inputs(&dir);
        let err = rank_files(
            &deterministic_config(),
            &board,
            &dir.path().join("missing.toml"),
            None,
        )
        .unwrap_err();
        assert!(err.contains("missing.toml"));
    }

    #[test]
    fn rank_files_uses_scripted_effects_from_rule_directory() {
        let dir = TempDir::new().unwrap();
        let (board, _) = write_inputs(&dir);
        let team = dir.path().join("boosted.toml");
        fs::write(
            &team,
            TEAM_TOML.replacen("attack = 60", "attack = 60\neffect = \"triple\"", 1),
        )
        .unwrap();
        let effects = dir.path().join("rules").join("effects");
        fs::create_dir_all(&effects).unwrap();
        fs::write(effects.join("triple.rhai"), "score_multiplier(3.0);").unwrap();

        let config = AppConfig {
            rule_directory: Some(dir.path().join("rules").to_string_lossy().into_owned()),
            ..deterministic_config()
        };
        let (_, run) = rank_files(&config, &board, &team, Some("score")).unwrap();
        assert_eq!(run.results[0].net_score.mean(), 180.0);
    }

    #[test]
    fn rank_files_fires_scripted_effect_with_odds_function() {
        let dir = TempDir::new().unwrap();
        let (board, _) = write_inputs(&dir);
        let team = dir.path().join("surging.toml");
        fs::write(
            &team,
            TEAM_TOML.replacen("attack = 60", "attack = 60\neffect = \"surge\"", 1),
        )
        .unwrap();
        let effects = dir.path().join("rules").join("effects");
        fs::create_dir_all(&effects).unwrap();
        fs::write(
            effects.join("surge.rhai"),
            "fn odds(size) { if size >= 4 { 100 } else { 60 } }\n\
             if chain >= 2 { score_multiplier(2.0); } else { score_multiplier(1.5); }",
        )
        .unwrap();

        let config = AppConfig {
            rule_directory: Some(dir.path().join("rules").to_string_lossy().into_owned()),
            ..deterministic_config()
        };
        let (_, run) = rank_files(&config, &board, &team, Some("score")).unwrap();
        assert_eq!(run.results[0].net_score.mean(), 90.0);
    }

    #[test]
    fn table_lists_one_row_per_result() {
        let rows = vec![ResultReport {
            rank: 1,
            mv: Some([1, 5, 2, 5]),
            net_score: 60.0,
            net_gold: 0.0,
            combos: 1.0,
            blocks: 3.0,
            disruptions: 0.0,
            progress: 0.0,
            trials: 1,
        }];
        let table = format_table(&rows);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("Disruptions"));
        assert!(lines[2].contains("(1,5)<->(2,5)"));
        assert!(lines[2].contains("60.0"));
    }

    #[test]
    fn modes_listing_includes_custom_and_marks_default() {
        let config = AppConfig {
            grading_mode: "speedrun".to_string(),
            grading_modes: vec![GradingModeConfig {
                name: "speedrun".to_string(),
                description: "COMBOS,-BLOCKS".to_string(),
            }],
            ..AppConfig::default()
        };
        let listing = format_modes(&config);
        assert!(listing.contains("No Coin"));
        assert!(listing.contains("(canonical)"));
        let custom = listing
            .lines()
            .find(|l| l.starts_with("speedrun*"))
            .unwrap();
        assert!(custom.contains("COMBOS,-BLOCKS,GOLD,SCORE"));
    }
}
