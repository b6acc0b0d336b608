//! # Board Game Buddy CLI (`buddy`)
//!
//! ## Usage
//!
//! ```bash
//! buddy [--config ./buddy.toml] [command]
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `buddy` / `buddy chat` | Load or build the index, then start the conversation |
//! | `buddy index` | Load or build the index, print its statistics, keep it |
//! | `buddy reset` | Delete the persisted index |
//!
//! Logging goes to stderr and is controlled by `RUST_LOG` (default `warn`).
//! A `.env` file in the working directory is loaded before anything else.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use boardgame_buddy::agent::{Agent, AgentPolicy};
use boardgame_buddy::config::{load_config_or_default, Config};
use boardgame_buddy::index::{
    destroy_index, CorruptIndexPolicy, IndexOrigin, IndexStore, VectorIndex,
};
use boardgame_buddy::loader::DirectorySource;
use boardgame_buddy::progress;
use boardgame_buddy::retrieval::RetrievalEngine;
use boardgame_buddy::session::{run_guarded, Session, StdinLines, TeardownGuard};
use boardgame_buddy::settings::Settings;
use boardgame_buddy::tools::{SearchDocumentsTool, ToolRegistry};

/// Board Game Buddy: a board game assistant grounded in your own documents.
#[derive(Parser)]
#[command(
    name = "buddy",
    about = "Board Game Buddy: a board game assistant grounded in your own documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// A missing file means built-in defaults: documents in `data/`, index in
    /// `storage/`, Ollama `mistral`, local `bge-base-en-v1.5` embeddings.
    #[arg(long, global = true, default_value = "./buddy.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the conversation (default).
    ///
    /// The index is deleted when the session ends unless
    /// `index.keep_after_session = true`.
    Chat,

    /// Build or load the index and print its statistics.
    ///
    /// The index is kept, so the next `buddy chat` loads it.
    Index,

    /// Delete the persisted index.
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config_or_default(&cli.config)?;

    match cli.command.unwrap_or(Commands::Chat) {
        Commands::Chat => run_chat(&config).await,
        Commands::Index => run_index(&config).await,
        Commands::Reset => {
            if destroy_index(&config.index.dir)? {
                println!("Index supprimé : {}", config.index.dir.display());
            } else {
                println!("Aucun index à supprimer.");
            }
            Ok(())
        }
    }
}

async fn run_chat(config: &Config) -> Result<()> {
    let guard = TeardownGuard::new(&config.index.dir, !config.index.keep_after_session);
    let interrupt = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    let run = run_guarded(guard, chat(config), interrupt)
        .await
        .context("Failed to delete the index")?;

    if run.interrupted {
        println!("\n\nInterruption détectée (Ctrl+C)...");
    }
    if run.torn_down {
        println!("\nNettoyage de l'index...");
        println!("Nettoyage terminé !");
    }

    // A blocking model load or directory scan may still be running; the
    // runtime would wait for it on shutdown.
    if run.interrupted {
        let _ = std::io::stdout().flush();
        std::process::exit(0);
    }
    run.outcome
}

async fn chat(config: &Config) -> Result<()> {
    let settings = Settings::from_config(config)?;
    let index = open_index(config, &settings).await?;

    let engine = Arc::new(RetrievalEngine::new(
        Arc::new(index),
        settings.clone(),
        config.retrieval.clone(),
    ));
    let tools = ToolRegistry::with_retrieval(engine);
    let policy = AgentPolicy::from_config(&config.agent, SearchDocumentsTool::NAME);
    let agent = Agent::new(&settings, tools, policy);

    let mut session = Session::new(agent, config.ui.clone(), std::io::stdout());
    let mut lines = StdinLines::spawn();
    session.run(&mut lines).await?;
    Ok(())
}

async fn run_index(config: &Config) -> Result<()> {
    let settings = Settings::from_config(config)?;
    let index = open_index(config, &settings).await?;

    let meta = index.meta();
    let built_at = Utc
        .timestamp_opt(meta.built_at, 0)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| meta.built_at.to_string());

    println!("Index : {}", config.index.dir.display());
    println!("  documents : {}", index.documents().len());
    println!("  chunks    : {}", index.len());
    println!(
        "  embedding : {} ({} dims)",
        meta.embedding_model, meta.embedding_dims
    );
    println!("  built at  : {}", built_at);
    for doc in index.documents() {
        println!("  - {}", doc.source_id);
    }
    Ok(())
}

async fn open_index(config: &Config, settings: &Settings) -> Result<VectorIndex> {
    let store =
        IndexStore::from_config(config, settings).with_progress(progress::default_reporter());
    let dir = store.location().display().to_string();

    if store.exists() {
        println!("Chargement de l'index depuis {}...", dir);
    } else {
        println!("Création d'un nouvel index...");
    }

    let source = DirectorySource::new(config.documents.clone());
    let (index, origin) = store
        .open_or_build(&source, CorruptIndexPolicy::from_config(config))
        .await?;

    match origin {
        IndexOrigin::Loaded => println!("Index chargé avec succès !"),
        IndexOrigin::Built => println!("Index sauvegardé dans {}", dir),
        IndexOrigin::Rebuilt => println!("Index reconstruit et sauvegardé dans {}", dir),
    }
    Ok(index)
}
