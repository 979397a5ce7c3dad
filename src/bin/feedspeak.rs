//! CLI binary for feedspeak.

use clap::{Parser, Subcommand};
use feedspeak::config::DEFAULT_CONFIG_FILE;
use feedspeak::participants::load_store;
use feedspeak::{FeedSpeakConfig, FeedSpeakRuntime};
use std::path::{Path, PathBuf};
use tracing::info;

/// Speak a filtered social-media firehose through an LLM.
#[derive(Parser)]
#[command(name = "feedspeak", version, about)]
struct Cli {
    /// Path to TOML configuration file (default: ./feedspeak.toml if present).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Option<Command>,
}

/// Available commands.
#[derive(Subcommand)]
enum Command {
    /// Listen to the feed and speak replies (default).
    Run,

    /// Validate configuration and participants without connecting.
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // A missing .env is fine; variables may come from the real environment.
    let dotenv = dotenvy::dotenv().ok();

    let mut config = load_config(cli.config.as_deref())?;
    config.apply_env_overlay();

    let _log_guard = feedspeak::diagnostics::init_logging(&config.logging)?;
    if let Some(path) = dotenv {
        info!(path = %path.display(), "loaded environment file");
    }

    config.validate()?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(&config).await,
        Command::Check => check(&config),
    }
}

fn load_config(explicit: Option<&Path>) -> anyhow::Result<FeedSpeakConfig> {
    if let Some(path) = explicit {
        return FeedSpeakConfig::from_file(path)
            .map_err(|e| anyhow::anyhow!("cannot load {}: {e}", path.display()));
    }
    let default_path = Path::new(DEFAULT_CONFIG_FILE);
    if default_path.is_file() {
        return Ok(FeedSpeakConfig::from_file(default_path)?);
    }
    Ok(FeedSpeakConfig::default())
}

async fn run(config: &FeedSpeakConfig) -> anyhow::Result<()> {
    info!("feedspeak v{}", env!("CARGO_PKG_VERSION"));

    let runtime = FeedSpeakRuntime::from_config(config)?;

    let cancel = runtime.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C, shutting down...");
            cancel.cancel();
        }
    });

    let summary = runtime.run().await.map_err(|e| {
        tracing::error!(error = %e, "feedspeak exited with error");
        anyhow::anyhow!("feedspeak failed: {e}")
    })?;
    info!(exit = ?summary.listener, "feedspeak shut down cleanly");
    Ok(())
}

fn check(config: &FeedSpeakConfig) -> anyhow::Result<()> {
    let store = load_store(config)?;

    println!("feed:      {}", config.feed.url);
    println!(
        "filter:    language={} keyword={}",
        config.filter.language.as_deref().unwrap_or("-"),
        config.filter.keyword.as_deref().unwrap_or("-"),
    );
    println!("model:     {}", config.llm.model);
    println!("lock:      {}", config.lock.path.display());
    println!("sound dir: {}", config.speech.sound_dir.display());
    println!(
        "variant:   {}",
        if config.is_rotating() { "rotating" } else { "single" }
    );
    for id in store.ids() {
        let participant = store.get(&id)?;
        println!(
            "  - {id}: voice={} prompt_chars={}",
            participant.voice,
            participant.buffer.seed().chars().count()
        );
    }
    println!("configuration OK");
    Ok(())
}
