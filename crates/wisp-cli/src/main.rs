//! wisp CLI - read objects from a remote git repository without cloning it.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wisp_git::{Auth, Client, HttpTransport, ListCommitsOptions};
use wisp_storage::StorageMode;

mod commands;
mod logging;
mod settings;

/// wisp - stateless git object fetcher
#[derive(Parser, Debug)]
#[command(name = "wisp")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Repository URL, e.g. https://github.com/org/repo.git
    #[arg(short, long)]
    repo: String,

    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bearer token
    #[arg(long, conflicts_with = "username")]
    token: Option<String>,

    /// Basic auth user name
    #[arg(long, requires = "password")]
    username: Option<String>,

    /// Basic auth password
    #[arg(long)]
    password: Option<String>,

    /// Request timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    /// Storage backend for fetched objects
    #[arg(long, value_enum)]
    storage: Option<StorageArg>,

    /// Missing subtrees requested per round trip
    #[arg(long)]
    batch_size: Option<usize>,

    /// Log level (overridden by RUST_LOG)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check that the repository exists and the credentials work
    Check,

    /// List remote refs
    LsRefs {
        /// Only refs starting with this prefix
        prefix: Option<String>,
    },

    /// List first-parent history
    Log {
        /// Commit id, ref, branch or tag
        #[arg(default_value = "HEAD")]
        rev: String,
        /// Commits per page (max 100)
        #[arg(short = 'n', long, default_value_t = wisp_git::DEFAULT_PER_PAGE)]
        per_page: usize,
        /// Page number, starting at 1
        #[arg(long, default_value_t = 1)]
        page: usize,
        /// Only commits that change this path
        #[arg(long)]
        path: Option<String>,
        /// Only commits authored at or after this time (RFC 3339 or YYYY-MM-DD)
        #[arg(long)]
        since: Option<String>,
        /// Only commits authored at or before this time (RFC 3339 or YYYY-MM-DD)
        #[arg(long)]
        until: Option<String>,
    },

    /// List every file of a commit, or one directory with --path
    LsTree {
        /// Commit id, ref, branch or tag
        commit: String,
        /// Directory to list instead of the whole tree
        #[arg(short, long)]
        path: Option<String>,
    },

    /// Print an object
    CatFile {
        /// Object id, or a ref, branch or tag naming a commit
        id: String,
    },

    /// Print a file from a commit
    Show {
        /// Commit id, ref, branch or tag
        commit: String,
        /// File path
        path: String,
    },

    /// List files changed between two commits
    Diff {
        /// Base commit id, ref, branch or tag
        base: String,
        /// Head commit id, ref, branch or tag
        head: String,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum StorageArg {
    Memory,
    Disk,
    Auto,
}

impl From<StorageArg> for StorageMode {
    fn from(arg: StorageArg) -> Self {
        match arg {
            StorageArg::Memory => StorageMode::Memory,
            StorageArg::Disk => StorageMode::Disk,
            StorageArg::Auto => StorageMode::Auto,
        }
    }
}

fn build_client(cli: &Cli) -> Result<commands::HttpClient> {
    let mut config = settings::load(cli.config.as_deref())?;
    if let Some(storage) = cli.storage {
        config.storage.mode = storage.into();
    }
    if let Some(batch_size) = cli.batch_size {
        config.batch_size = batch_size;
    }

    let mut transport = HttpTransport::with_timeout(&cli.repo, Duration::from_secs(cli.timeout))
        .context("failed to create HTTP transport")?;
    if let Some(token) = &cli.token {
        transport = transport.with_auth(Auth::Token(token.clone()));
    } else if let (Some(username), Some(password)) = (&cli.username, &cli.password) {
        transport = transport.with_auth(Auth::Basic {
            username: username.clone(),
            password: password.clone(),
        });
    }

    tracing::debug!(endpoint = transport.endpoint(), "client ready");
    Ok(Client::new(transport, config))
}

async fn run(cli: Cli, cancel: CancellationToken) -> Result<()> {
    let client = build_client(&cli)?;

    match &cli.command {
        Commands::Check => commands::check(&client, &cancel, cli.json).await,
        Commands::LsRefs { prefix } => {
            commands::ls_refs(&client, &cancel, prefix.as_deref(), cli.json).await
        }
        Commands::Log {
            rev,
            per_page,
            page,
            path,
            since,
            until,
        } => {
            let options = ListCommitsOptions {
                per_page: *per_page,
                page: *page,
                path: path.clone(),
                since: since.as_deref().map(commands::parse_time).transpose()?,
                until: until.as_deref().map(commands::parse_time).transpose()?,
            };
            let start = commands::resolve(&client, &cancel, rev).await?;
            commands::log(&client, &cancel, start, &options, cli.json).await
        }
        Commands::LsTree { commit, path } => {
            let commit = commands::resolve(&client, &cancel, commit).await?;
            commands::ls_tree(&client, &cancel, commit, path.as_deref(), cli.json).await
        }
        Commands::CatFile { id } => {
            let id = commands::resolve(&client, &cancel, id).await?;
            commands::cat_file(&client, &cancel, id, cli.json).await
        }
        Commands::Show { commit, path } => {
            let commit = commands::resolve(&client, &cancel, commit).await?;
            commands::show(&client, &cancel, commit, path).await
        }
        Commands::Diff { base, head } => {
            let base = commands::resolve(&client, &cancel, base).await?;
            let head = commands::resolve(&client, &cancel, head).await?;
            commands::diff(&client, &cancel, base, head, cli.json).await
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init_logging(&cli.log_level, cli.log_json);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, cancelling");
            on_interrupt.cancel();
        }
    });

    if let Err(e) = run(cli, cancel).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
