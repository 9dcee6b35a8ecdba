//! # swimstats CLI (`swim`)
//!
//! The `swim` binary drives the whole pipeline: database initialization,
//! sync-scope management, remote browsing, incremental sync, local parse
//! debugging and reports.
//!
//! ## Usage
//!
//! ```bash
//! swim --config ./config/swim.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `swim init` | Create the SQLite database and run schema migrations |
//! | `swim categories <action>` | List, add, remove, enable or disable sync scopes |
//! | `swim dirs` | Browse directories on the remote share |
//! | `swim sync --tag <tag>` | Ingest new or changed result PDFs |
//! | `swim parse <path>` | Classify and parse local files without storing |
//! | `swim report` | Per-event report for one swimmer |
//! | `swim stats` | Database overview |
//!
//! ## Examples
//!
//! ```bash
//! # Register two scopes and sync them into the 2024-25 dataset
//! swim categories add "2. TENERIFE" "3. GRAN CANARIA"
//! swim sync --tag 2024-25
//!
//! # Sync a single directory, ignoring registered scopes
//! swim sync --tag 2024-25 "2. TENERIFE/Benjamin"
//!
//! # See what the parser makes of a downloaded file
//! swim parse ./liga-r1.pdf --json
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use swimstats::config::{self, Config};
use swimstats::progress::ProgressMode;
use swimstats::query::ResultFilter;
use swimstats::report::{ReportRequest, DEFAULT_MIN_N};
use swimstats::webdav::{self, WebDavClient, DEFAULT_DIR_DEPTH};
use swimstats::{db, ingest, migrate, report, stats, store};

/// swimstats: incremental ingestion of swim-meet result PDFs.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/swim.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "swim",
    about = "Ingest swim-meet result PDFs from a WebDAV share into SQLite",
    version,
    long_about = "swimstats lists result PDFs on an ownCloud/Nextcloud public share, \
    downloads only new or changed documents, extracts one row per swimmer result \
    and stores them in SQLite for percentile and ranking reports."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/swim.toml`. Database, remote share, detection
    /// and sync settings are read from this file.
    #[arg(long, global = true, default_value = "./config/swim.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the `files`, `results` and
    /// `included_categories` tables. Safe to run repeatedly; older stores
    /// gain any missing columns.
    Init,

    /// Manage the remote directories synced by default.
    Categories {
        #[command(subcommand)]
        action: CategoryAction,
    },

    /// List directories on the remote share.
    Dirs {
        /// Directory to list, relative to the share root.
        #[arg(long, default_value = "")]
        base: String,

        /// Descend into sub-directories.
        #[arg(long)]
        recursive: bool,

        /// Maximum depth for `--recursive`.
        #[arg(long, default_value_t = DEFAULT_DIR_DEPTH)]
        depth: usize,
    },

    /// Ingest new or changed result PDFs.
    ///
    /// Without explicit scopes, every enabled category is synced. Unchanged
    /// documents (same etag and size) are never downloaded.
    Sync {
        /// Dataset tag stamped on every written row (e.g. a season).
        #[arg(long)]
        tag: String,

        /// Remote directories to sync instead of the enabled categories.
        scopes: Vec<String>,

        /// Count download failures and continue instead of aborting.
        #[arg(long)]
        keep_going: bool,

        /// Print the final counters as JSON.
        #[arg(long)]
        json: bool,

        /// Progress on stderr. Defaults to `human` on a terminal, else `off`.
        #[arg(long, value_enum)]
        progress: Option<ProgressArg>,
    },

    /// Classify and parse local files without touching the database.
    ///
    /// Accepts a `.pdf` or `.txt` file (pages separated by form feeds), or a
    /// directory searched recursively for both.
    Parse {
        path: PathBuf,

        /// One JSON object per file.
        #[arg(long)]
        json: bool,
    },

    /// Per-event report for one swimmer within a `(sex, YY)` group.
    Report {
        /// Sex label as printed in event headers (e.g. `FEM`, `MASC`).
        #[arg(long)]
        sex: String,

        /// Two-digit birth year.
        #[arg(long)]
        yy: i64,

        /// Swimmer name or key; normalized before lookup.
        #[arg(long)]
        swimmer_key: String,

        /// Restrict to these dataset tags (repeatable).
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Only results on or after this date (YYYY-MM-DD).
        #[arg(long)]
        from: Option<String>,

        /// Only results on or before this date (YYYY-MM-DD).
        #[arg(long)]
        to: Option<String>,

        /// Minimum number of times in the group before percentiles are shown.
        #[arg(long, default_value_t = DEFAULT_MIN_N)]
        min_n: usize,

        #[arg(long)]
        json: bool,
    },

    /// Show what the database holds.
    Stats {
        #[arg(long)]
        json: bool,
    },
}

/// Included-category subcommands.
#[derive(Subcommand)]
enum CategoryAction {
    /// List registered categories.
    List {
        /// Include disabled categories.
        #[arg(long)]
        all: bool,
    },
    /// Register directories (re-adding enables them again).
    Add {
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Forget directories.
    Remove {
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Include a category in default syncs.
    Enable { path: String },
    /// Exclude a category from default syncs without forgetting it.
    Disable { path: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    Off,
    Human,
    Json,
}

impl From<ProgressArg> for ProgressMode {
    fn from(arg: ProgressArg) -> Self {
        match arg {
            ProgressArg::Off => ProgressMode::Off,
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
        }
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("swimstats=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let mut cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Categories { action } => {
            run_categories(&cfg, action).await?;
        }
        Commands::Dirs {
            base,
            recursive,
            depth,
        } => {
            let client = WebDavClient::new(cfg.remote()?)?;
            let dirs = if recursive {
                webdav::list_directories_recursive(&client, &base, depth).await
            } else {
                webdav::list_directories(&client, &base).await?
            };
            for dir in dirs {
                println!("{}", dir);
            }
        }
        Commands::Sync {
            tag,
            scopes,
            keep_going,
            json,
            progress,
        } => {
            cfg.sync.keep_going |= keep_going;
            let mode = progress
                .map(ProgressMode::from)
                .unwrap_or_else(ProgressMode::default_for_tty);
            ingest::run_sync(&cfg, &scopes, &tag, mode, json).await?;
        }
        Commands::Parse { path, json } => {
            ingest::run_parse(&cfg, &path, json)?;
        }
        Commands::Report {
            sex,
            yy,
            swimmer_key,
            tags,
            from,
            to,
            min_n,
            json,
        } => {
            let req = ReportRequest {
                sex,
                yy,
                swimmer_key,
                filter: ResultFilter {
                    tags,
                    date_from: from,
                    date_to: to,
                },
                min_n,
            };
            report::run_report(&cfg, &req, json).await?;
        }
        Commands::Stats { json } => {
            stats::run_stats(&cfg, json).await?;
        }
    }

    Ok(())
}

async fn run_categories(cfg: &Config, action: CategoryAction) -> Result<()> {
    let pool = db::connect(cfg).await?;
    migrate::apply(&pool).await?;

    match action {
        CategoryAction::List { all } => {
            let categories = store::list_included_categories(&pool, !all).await?;
            if categories.is_empty() {
                println!("No categories registered.");
            }
            for c in categories {
                let state = if c.enabled { "enabled " } else { "disabled" };
                let added = c.added_at_iso.as_deref().unwrap_or("-");
                if c.note.is_empty() {
                    println!("{}  {}  {}", state, added, c.path);
                } else {
                    println!("{}  {}  {}  ({})", state, added, c.path, c.note);
                }
            }
        }
        CategoryAction::Add { paths } => {
            let added = store::add_included_categories(&pool, &paths).await?;
            for path in &added {
                println!("added {}", path);
            }
        }
        CategoryAction::Remove { paths } => {
            let removed = store::remove_included_categories(&pool, &paths).await?;
            println!("removed {}", removed);
        }
        CategoryAction::Enable { path } => {
            set_enabled(&pool, &path, true).await?;
        }
        CategoryAction::Disable { path } => {
            set_enabled(&pool, &path, false).await?;
        }
    }

    pool.close().await;
    Ok(())
}

async fn set_enabled(pool: &sqlx::SqlitePool, path: &str, enabled: bool) -> Result<()> {
    if !store::set_category_enabled(pool, path, enabled).await? {
        anyhow::bail!("category '{}' is not registered", path);
    }
    println!(
        "{} {}",
        if enabled { "enabled" } else { "disabled" },
        path.trim_matches('/')
    );
    Ok(())
}
