use std::path::PathBuf;

use airwatch_brain::brain::Brain;
use airwatch_core::config::Config;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tokio::io::AsyncReadExt;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "airwatch")]
#[command(about = "Indoor air sensor chatbot and setpoint recommender")]
struct Cli {
    /// Config file (TOML)
    #[arg(long, env = "AIRWATCH_CONFIG", default_value = "airwatch.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Answer a question about indoor sensor readings
    Chat {
        /// Query words; read from stdin when omitted
        query: Vec<String>,
    },
    /// Recommend indoor setpoints, optionally given external conditions
    Recommend {
        /// Query words; read from stdin when omitted
        query: Vec<String>,
    },
}

#[derive(Debug, Default, Deserialize)]
struct StdinRequest {
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
}

/// Query words win; otherwise stdin is read once, as a JSON request or plain
/// text.
async fn read_request(words: Vec<String>) -> StdinRequest {
    if !words.is_empty() {
        return StdinRequest {
            query: Some(words.join(" ")),
            session_id: None,
        };
    }

    let mut input = String::new();
    if let Err(e) = tokio::io::stdin().read_to_string(&mut input).await {
        warn!("[cli] failed to read stdin: {e}");
        return StdinRequest::default();
    }
    match serde_json::from_str::<StdinRequest>(&input) {
        Ok(request) => request,
        Err(_) => StdinRequest {
            query: Some(input.trim().to_string()),
            session_id: None,
        },
    }
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("fatal: failed to serialize response: {e}");
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("airwatch=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = Config::load(&cli.config).unwrap_or_else(|e| {
        eprintln!("fatal: failed to load config: {e}");
        std::process::exit(1);
    });

    let brain = Brain::new(config).unwrap_or_else(|e| {
        eprintln!("fatal: failed to initialize brain: {e}");
        std::process::exit(1);
    });

    match cli.command {
        Command::Chat { query } => {
            if let Err(e) = brain.purge_expired_sessions().await {
                warn!("[session] purge failed: {e}");
            }

            let request = read_request(query).await;
            let query = request.query.unwrap_or_default();
            if query.trim().is_empty() {
                let (session_id, turn_id) =
                    brain.session_identity(request.session_id.as_deref()).await;
                print_json(&serde_json::json!({
                    "error": "No query provided",
                    "session_id": session_id,
                    "turn_id": turn_id,
                }));
                std::process::exit(1);
            }
            let envelope = brain
                .process_query(&query, request.session_id.as_deref())
                .await;
            print_json(&envelope);
        }
        Command::Recommend { query } => {
            let request = read_request(query).await;
            let query = request.query.unwrap_or_default();
            if query.trim().is_empty() {
                print_json(&serde_json::json!({
                    "error": "No query provided",
                    "status": "error",
                }));
                std::process::exit(1);
            }
            let envelope = brain.process_recommendation(&query).await;
            print_json(&envelope);
        }
    }
}
