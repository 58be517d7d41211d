//! Burrow - Content-Addressed File Storage
//!
//! Program entry: configuration discovery, logging setup and the
//! `serve` / `migrate` / `create-app` toolkit commands.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use burrow::config::Config;
use burrow::db::{self, migrate, Database};
use burrow::error::Result;
use burrow::http::HttpServer;
use burrow::models::app;

/// Burrow - Content-Addressed File Storage
#[derive(Parser)]
#[command(name = "burrow")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (search: ./burrow.toml, $HOME/burrow.toml,
    /// /etc/burrow/burrow.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP storage service
    Serve,

    /// Apply pending schema migrations
    Migrate {
        /// Roll back this many batches instead of upgrading
        #[arg(long)]
        rollback: Option<i64>,
    },

    /// Register a new application and print its credentials
    CreateApp {
        /// Application name
        name: String,

        /// Optional note
        #[arg(long)]
        note: Option<String>,
    },

    /// Write a default configuration file
    Init {
        /// Output path
        #[arg(short, long, default_value = "burrow.toml")]
        output: PathBuf,
    },

    /// Validate the configuration file
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    init_logging(&cli.log_level, &config);

    match cli.command {
        Commands::Serve => run_serve(config).await?,
        Commands::Migrate { rollback } => run_migrate(config, rollback).await?,
        Commands::CreateApp { name, note } => run_create_app(config, name, note).await?,
        Commands::Init { output } => {
            Config::default().save(&output)?;
            println!("wrote {}", output.display());
        }
        Commands::Validate => {
            config.validate()?;
            println!("configuration is valid");
        }
    }
    Ok(())
}

fn load_config(explicit: Option<&std::path::Path>) -> Result<Config> {
    match Config::discover(explicit) {
        Some(path) => {
            let config = Config::load(&path)?;
            tracing::debug!("loaded configuration from {}", path.display());
            Ok(config)
        }
        None => Ok(Config::default()),
    }
}

/// Initialize logging: console layer plus optional file and access-log layers
fn init_logging(level: &str, config: &Config) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let console_layer = config
        .log
        .console
        .enable
        .then(|| tracing_subscriber::fmt::layer());

    let file_layer = if config.log.file.enable {
        open_log_file(&config.log.file.path).map(|file| {
            let level = config
                .log
                .file
                .level
                .parse::<LevelFilter>()
                .unwrap_or(LevelFilter::WARN);
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .with_filter(level)
        })
    } else {
        None
    };

    let access_layer = if config.http.access_log_file.is_empty() {
        None
    } else {
        open_log_file(std::path::Path::new(&config.http.access_log_file)).map(|file| {
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .with_filter(Targets::new().with_target("burrow::access", LevelFilter::INFO))
        })
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .with(access_layer)
        .init();
}

fn open_log_file(path: &std::path::Path) -> Option<std::fs::File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(err) = std::fs::create_dir_all(parent) {
                eprintln!("cannot create log directory {}: {}", parent.display(), err);
                return None;
            }
        }
    }
    match std::fs::OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => Some(file),
        Err(err) => {
            eprintln!("cannot open log file {}: {}", path.display(), err);
            None
        }
    }
}

async fn run_serve(config: Config) -> Result<()> {
    config.validate()?;

    std::fs::create_dir_all(&config.chunk.root_path)?;
    let db = Database::open(&config.database)?;

    {
        let conn = db.lock().await;
        let applied = migrate::upgrade(&conn)?;
        if !applied.is_empty() {
            tracing::info!("applied {} migrations", applied.len());
        }
    }

    let server = HttpServer::new(db, Arc::new(config));
    server.serve().await
}

async fn run_migrate(config: Config, rollback: Option<i64>) -> Result<()> {
    let db = Database::open(&config.database)?;
    let conn = db.lock().await;

    match rollback {
        Some(steps) => {
            for name in migrate::rollback(&conn, steps)? {
                println!("rolled back: {}", name);
            }
        }
        None => {
            let applied = migrate::upgrade(&conn)?;
            if applied.is_empty() {
                println!("nothing to migrate");
            }
            for name in applied {
                println!("migrated: {}", name);
            }
        }
    }
    Ok(())
}

async fn run_create_app(config: Config, name: String, note: Option<String>) -> Result<()> {
    let db = Database::open(&config.database)?;
    let mut conn = db.lock().await;
    migrate::upgrade(&conn)?;

    // The app row and its root directory land together or not at all.
    let app = db::with_transaction(&mut conn, |tx| app::create_app(&name, note.as_deref(), tx))?;
    println!("appUid: {}", app.uid);
    println!("secret: {}", app.secret);
    Ok(())
}
