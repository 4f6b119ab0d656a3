mod logging;
mod settings;

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use engine::{GitHubTransport, StaticToken, Syncer};
use store::{is_dirty, Content, FileKind, FileStore, LocalStore, RepoFile, Tombstone};

use settings::Settings;

#[derive(Parser)]
#[command(name = "notesync")]
#[command(about = "Keep a local notes store in sync with a Git-hosted repository")]
#[command(version)]
struct Cli {
    /// Settings file (default: ./notesync.toml when present)
    #[arg(long, global = true, env = "NOTESYNC_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one bidirectional sync pass
    Sync,
    /// List local files and pending deletes/renames
    Status,
    /// Create or replace a file in the local store
    Write {
        /// Path relative to the notes root
        path: String,
        /// Read content from this file instead of stdin
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Delete a file from the local store
    Rm { path: String },
    /// Rename a file in the local store
    Mv { from: String, to: String },
    /// Three-way merge three text files and print the result
    Merge {
        #[arg(long)]
        base: PathBuf,
        #[arg(long)]
        ours: PathBuf,
        #[arg(long)]
        theirs: PathBuf,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let settings = Settings::load(cli.config.as_deref()).context("failed to load settings")?;
    logging::init_tracing(&settings.logging.level, &settings.logging.format)?;

    match cli.command {
        Commands::Merge { base, ours, theirs } => {
            let merged = engine::merge(&read_text(&base)?, &read_text(&ours)?, &read_text(&theirs)?);
            print!("{merged}");
        }
        Commands::Sync => sync(&settings).await?,
        Commands::Status => status(&open_store(&settings)?).await?,
        Commands::Write { path, file } => {
            let store = open_store(&settings)?;
            let kind = settings
                .tracking
                .kind_for(&path)
                .with_context(|| format!("{path} is not a tracked path"))?;
            let bytes = match file {
                Some(src) => {
                    std::fs::read(&src).with_context(|| format!("failed to read {}", src.display()))?
                }
                None => {
                    let mut buf = Vec::new();
                    std::io::stdin()
                        .read_to_end(&mut buf)
                        .context("failed to read stdin")?;
                    buf
                }
            };
            let content = match kind {
                FileKind::Markdown => Content::text(
                    String::from_utf8(bytes).with_context(|| format!("{path} is not UTF-8"))?,
                ),
                _ => Content::binary(bytes),
            };
            let id = store.write_file(&path, content)?;
            tracing::debug!(%id, path = %path, "wrote file");
        }
        Commands::Rm { path } => {
            let store = open_store(&settings)?;
            let file = require_file(&store, &path).await?;
            store.delete_file(file.id)?;
        }
        Commands::Mv { from, to } => {
            let store = open_store(&settings)?;
            if settings.tracking.kind_for(&to).is_none() {
                bail!("{to} is not a tracked path");
            }
            let file = require_file(&store, &from).await?;
            store.rename_file(file.id, &to)?;
        }
    }

    Ok(())
}

fn open_store(settings: &Settings) -> Result<FileStore> {
    let dir = &settings.local.data_dir;
    let store = FileStore::open(dir)
        .with_context(|| format!("failed to open store at {}", dir.display()))?;
    tracing::debug!(dir = %store.base().display(), "opened local store");
    Ok(store)
}

fn read_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

async fn require_file(store: &FileStore, path: &str) -> Result<RepoFile> {
    store
        .find_file_by_path(path)
        .await?
        .with_context(|| format!("no file at {path}"))
}

async fn sync(settings: &Settings) -> Result<()> {
    let (owner, repo) = settings
        .repository()
        .context("remote.owner and remote.repo must be set")?;
    let store = open_store(settings)?;
    let transport = GitHubTransport::new(owner, repo, StaticToken::new(settings.remote.token.clone()))
        .with_api_base(&settings.remote.api_base);
    let syncer = Syncer::new(transport, &settings.remote.branch, settings.tracking.clone());

    let summary = syncer
        .sync_bidirectional(&store)
        .await
        .with_context(|| format!("sync with {owner}/{repo} failed"))?;
    if summary.is_noop() {
        println!("up to date");
    } else {
        println!("{summary}");
    }
    Ok(())
}

async fn status(store: &FileStore) -> Result<()> {
    for file in store.list_files().await? {
        let flag = if is_dirty(store, &file) { "M" } else { " " };
        println!("{flag} {}", file.path);
    }
    for tombstone in store.list_tombstones().await? {
        match tombstone {
            Tombstone::Delete { path, .. } => println!("D {path}"),
            Tombstone::Rename { from, to, .. } => println!("R {from} -> {to}"),
        }
    }
    Ok(())
}
