//! Kindred CLI: the main entry point.
//!
//! Commands:
//! - `serve`: Start the HTTP gateway
//! - `persona`: Inspect personas and try style shaping
//! - `config`: Print the effective configuration (secrets redacted)
//! - `doctor`: Diagnose config, storage and provider

use clap::{Parser, Subcommand};
use kindred_config::AppConfig;
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "kindred",
    about = "Kindred: conversational companion backend",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Config file to use instead of ~/.kindred/config.toml
    #[arg(long, global = true, env = "KINDRED_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Inspect personas
    Persona {
        #[command(subcommand)]
        action: PersonaAction,
    },

    /// Print the effective configuration with secrets redacted
    Config,

    /// Diagnose system health
    Doctor,
}

#[derive(Subcommand)]
enum PersonaAction {
    /// List available personas
    List,

    /// Show a persona and the prompt text it resolves to
    Show { id: String },

    /// Apply a persona's language style to some text
    Shape { id: String, text: String },
}

fn load_config(path: Option<&PathBuf>) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let config = match path {
        Some(path) => AppConfig::load_with_env(path),
        None => AppConfig::load(),
    };
    config.map_err(|e| format!("Failed to load config: {e}").into())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }

    let config = load_config(cli.config.as_ref());

    match cli.command {
        Commands::Serve { port } => commands::serve::run(config?, port).await?,
        Commands::Persona { action } => match action {
            PersonaAction::List => commands::persona::list(&config?)?,
            PersonaAction::Show { id } => commands::persona::show(&config?, &id)?,
            PersonaAction::Shape { id, text } => commands::persona::shape(&config?, &id, &text)?,
        },
        Commands::Config => commands::config_cmd::show(&config?),
        Commands::Doctor => commands::doctor::run(config).await?,
    }

    Ok(())
}
