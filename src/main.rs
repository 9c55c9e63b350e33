use clap::{Parser, Subcommand};
use std::path::Path;

use matchsim::cli::commands;
use matchsim::config::AppConfig;

const DEFAULT_CONFIG: &str = "config.toml";

#[derive(Parser)]
#[command(name = "matchsim")]
#[command(about = "Simulates every legal swap on a tile-matching board and ranks the outcomes")]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG)]
    config: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rank every move on a board
    Rank {
        /// Board file (TOML with `rows = [...]`)
        #[arg(short, long)]
        board: String,

        /// Team file (TOML with `[[species]]` entries)
        #[arg(short, long)]
        team: String,

        /// Grading mode key; defaults to the configured mode
        #[arg(short, long)]
        mode: Option<String>,

        /// Show only the best N moves
        #[arg(long)]
        top: Option<usize>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// List grading modes
    Modes,

    /// Start the websocket server
    Serve,
}

fn load_config(path: &str) -> Result<AppConfig, String> {
    let path = Path::new(path);
    if !path.exists() && path == Path::new(DEFAULT_CONFIG) {
        return Ok(AppConfig::default());
    }
    AppConfig::from_file(path)
}

fn init_tracing(config: &AppConfig, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

fn init_workers(config: &AppConfig) -> Result<(), String> {
    if config.worker_threads == 0 {
        return Ok(());
    }
    rayon::ThreadPoolBuilder::new()
        .num_threads(config.worker_threads)
        .build_global()
        .map_err(|e| format!("Cannot start {} worker threads: {}", config.worker_threads, e))
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            std::process::exit(1);
        }
    };
    init_tracing(&config, cli.json_logs);
    if let Err(e) = init_workers(&config) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    match cli.command {
        Commands::Rank {
            board,
            team,
            mode,
            top,
            json,
        } => {
            if let Err(e) = commands::rank(
                &config,
                Path::new(&board),
                Path::new(&team),
                mode.as_deref(),
                top,
                json,
            ) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }

        Commands::Modes => commands::list_modes(&config),

        Commands::Serve => {
            if let Err(e) = commands::serve(&config).await {
                eprintln!("Server error: {}", e);
                std::process::exit(1);
            }
        }
    }
}
