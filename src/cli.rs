//! Command-line interface for voxlog.
//!
//! Provides commands for running the journal server, initializing the
//! state directory, and working with entries from the terminal.

use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use crate::config;
use crate::http::{self, AppState};
use crate::segment::RuleSegmenter;
use crate::store::EntryStore;
use crate::stt::WhisperTranscriber;
use crate::voice::VoicePipeline;

/// voxlog - Voice-first personal journal
#[derive(Parser, Debug)]
#[command(name = "voxlog")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the journal web server
    Serve {
        /// Address to bind to (overrides config)
        #[arg(short, long)]
        address: Option<String>,

        /// Database file (overrides config)
        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// Create the voxlog home directory and a default config
    Init,

    /// Save an entry from the terminal (reads stdin if no content given)
    Add {
        /// Entry text
        content: Option<String>,

        /// Tags to apply (comma-separated)
        #[arg(short, long)]
        tags: Option<String>,
    },

    /// Print entries, newest first
    List {
        /// Only entries whose tags contain this substring
        #[arg(short, long)]
        tag: Option<String>,

        /// Maximum number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Serve { address, db } => serve(address, db).await,
            Commands::Init => init(),
            Commands::Add { content, tags } => add(content, tags).await,
            Commands::List { tag, limit } => list(tag, limit).await,
        }
    }
}

async fn open_store(db_override: Option<PathBuf>) -> Result<Arc<EntryStore>> {
    let path = match db_override {
        Some(path) => path,
        None => config::db_path()?,
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let store = EntryStore::open(&path)
        .with_context(|| format!("Failed to open database at {}", path.display()))?;
    Ok(Arc::new(store))
}

async fn serve(address: Option<String>, db: Option<PathBuf>) -> Result<()> {
    let cfg = config::config()?;
    let listen = address.unwrap_or_else(|| cfg.listen.clone());

    let store = open_store(db).await?;
    let transcriber = Arc::new(WhisperTranscriber::from_env(cfg.voice.model.clone()));
    let pipeline = Arc::new(VoicePipeline {
        store: store.clone(),
        transcriber,
        segmenter: Arc::new(RuleSegmenter::default()),
    });

    let state = AppState {
        store: Arc::clone(&store),
        pipeline,
        voice: cfg.voice.clone(),
    };

    let app = http::router(state);

    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .with_context(|| format!("Failed to bind {}", listen))?;
    let actual = listener
        .local_addr()
        .context("Failed to read local listener address")?;

    info!(address = %actual, db = ?store.path(), "journal server listening");
    axum::serve(listener, app.into_make_service())
        .await
        .context("server error")?;

    Ok(())
}

const DEFAULT_CONFIG: &str = "\
version: \"1\"
paths:
  home: ../
  database: journal.db
server:
  listen: 127.0.0.1:8080
voice:
  model: base
  window_secs: 5
";

fn init() -> Result<()> {
    // Config discovery walks the current directory's ancestors, so the
    // file goes into ./.voxlog where a later `serve` run will find it.
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    let config_dir = cwd.join(".voxlog");
    std::fs::create_dir_all(&config_dir)
        .with_context(|| format!("Failed to create {}", config_dir.display()))?;

    let config_path = config_dir.join("config.yaml");
    if config_path.exists() {
        println!("Config already exists at {}", config_path.display());
        return Ok(());
    }

    std::fs::write(&config_path, DEFAULT_CONFIG)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;

    // Resolve through the file just written and create the database so the
    // first `serve` finds it ready.
    let cfg = config::reload_config()?;
    EntryStore::open(&cfg.db_path)
        .with_context(|| format!("Failed to create {}", cfg.db_path.display()))?;

    println!("Initialized voxlog in {}", cwd.display());
    Ok(())
}

async fn add(content: Option<String>, tags: Option<String>) -> Result<()> {
    let content = match content {
        Some(content) => content,
        None => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .context("Failed to read from stdin")?;
            buffer
        }
    };

    let store = open_store(None).await?;
    let entry = store
        .create(&content, tags.as_deref())
        .await
        .context("Failed to save entry")?;

    println!("Saved entry {}", entry.id);
    Ok(())
}

async fn list(tag: Option<String>, limit: usize) -> Result<()> {
    let store = open_store(None).await?;
    let entries = store
        .list(tag.as_deref())
        .await
        .context("Failed to list entries")?;

    if entries.is_empty() {
        println!("No entries.");
        return Ok(());
    }

    for entry in entries.iter().take(limit) {
        let tags = entry
            .tags
            .as_deref()
            .map(|t| format!(" [{}]", t))
            .unwrap_or_default();
        println!(
            "{}  {}{}",
            entry.created_at.format("%Y-%m-%d %H:%M"),
            entry.content,
            tags
        );
    }

    Ok(())
}
