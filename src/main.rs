use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use straw_backup::models::backup_directory::{BackupDirectorySettings, DEFAULT_EXCLUDE_FILTER};
use straw_backup::models::config::{setup_config, Config};
use straw_backup::models::config_validator::validate_config;
use straw_backup::models::error::BackupError;
use straw_backup::repo::queries;
use straw_backup::repo::sqlite::Database;
use straw_backup::service::backup::BackupManager;
use straw_backup::service::directories::{self, DirectoryChanges};
use straw_backup::service::scheduler::BackupScheduler;
use straw_backup::utils::cancel::CancellationToken;
use straw_backup::utils::duration::parse_duration;
use straw_backup::utils::engine_lock::EngineLock;
use straw_backup::utils::log_sink::LogCrateSink;

#[derive(Parser)]
#[command(name = "StrawBackup")]
#[command(about = "Scheduled, versioned one-way backup of directory trees", long_about = None)]
struct Cli {
    #[arg(short = 'c', long = "config", env = "STRAW_BACKUP_CONFIG")]
    config_file: Option<String>,

    /// Overrides the database file of the configuration.
    #[arg(short = 'd', long = "database")]
    database_file: Option<String>,

    #[arg(
        short = 'l',
        long = "log-level",
        default_value = "info",
        env = "LOG_LEVEL"
    )]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run backups on schedule until interrupted (default)
    Daemon,
    /// Run a single pass over the due directories
    Once,
    /// Register a new backup directory
    Add {
        #[arg(short = 's', long = "source")]
        source: String,
        #[arg(short = 'r', long = "remote")]
        remote: String,
        #[arg(short = 'i', long = "interval", default_value = "1h", value_parser = duration_arg)]
        interval: i64,
        #[arg(short = 'k', long = "keep", default_value = "7d", value_parser = duration_arg)]
        keep: i64,
        /// Glob to skip, may be repeated. Replaces the default filter.
        #[arg(short = 'e', long = "exclude")]
        exclude: Vec<String>,
    },
    /// Change the schedule, retention or filter of a backup directory
    Edit {
        id: i64,
        #[arg(short = 'i', long = "interval", value_parser = duration_arg)]
        interval: Option<i64>,
        #[arg(short = 'k', long = "keep", value_parser = duration_arg)]
        keep: Option<i64>,
        #[arg(short = 'e', long = "exclude")]
        exclude: Vec<String>,
    },
    /// Show every backup directory
    List,
    /// Forget a backup directory; the backed up files stay on disk
    Remove { id: i64 },
    /// Make one directory, or all of them, due and run a pass (or let the running daemon run it)
    BackupNow {
        #[arg(long = "id")]
        id: Option<i64>,
    },
    /// Show the archived versions of a directory
    History { id: i64 },
}

fn duration_arg(text: &str) -> std::result::Result<i64, String> {
    parse_duration(text).map_err(|e| e.to_string())
}

fn main() -> Result<()> {
    let args = Cli::parse();

    let log_level = match args.log_level.to_lowercase().as_str() {
        "trace" => log::LevelFilter::Trace,
        "debug" => log::LevelFilter::Debug,
        "info" => log::LevelFilter::Info,
        "warn" => log::LevelFilter::Warn,
        "error" => log::LevelFilter::Error,
        _ => log::LevelFilter::Info,
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .format_timestamp_secs()
        .init();

    info!("StrawBackup starting...");
    let config = load_config(&args).context("Failed to load configuration")?;
    debug!("Loaded config: {:?}", &config);

    let db = Database::open(&config.database_file).context("Failed to open the database")?;

    match args.command.unwrap_or(Command::Daemon) {
        Command::Daemon => run_scheduled(db, config),
        Command::Once => {
            let _lock = lock_engine(&config).context("Failed to lock the database")?;
            run_once(db, config, None)
        }
        Command::BackupNow { id } => backup_now(db, config, id),
        Command::Add {
            source,
            remote,
            interval,
            keep,
            exclude,
        } => {
            let exclude_filter = if exclude.is_empty() {
                DEFAULT_EXCLUDE_FILTER.to_string()
            } else {
                exclude.join("\n")
            };
            let id = directories::add_directory(
                &db,
                BackupDirectorySettings {
                    source_dir: source,
                    remote_dir: remote,
                    backup_interval: interval,
                    keep_history_duration: keep,
                    exclude_filter,
                },
            )
            .context("Failed to add backup directory")?;
            println!("Added backup directory {}", id);
            Ok(())
        }
        Command::Edit {
            id,
            interval,
            keep,
            exclude,
        } => {
            let changes = DirectoryChanges {
                backup_interval: interval,
                keep_history_duration: keep,
                exclude_filter: (!exclude.is_empty()).then(|| exclude.join("\n")),
            };
            let directory = directories::edit_directory(&db, id, changes)
                .context("Failed to edit backup directory")?;
            println!("{}", directories::describe_directory(&directory));
            Ok(())
        }
        Command::List => {
            let listed =
                directories::list_directories(&db).context("Failed to list backup directories")?;
            if listed.is_empty() {
                println!("No backup directories configured");
            }
            for directory in &listed {
                println!("{}", directories::describe_directory(directory));
            }
            Ok(())
        }
        Command::Remove { id } => {
            directories::remove_directory(&db, id)
                .context("Failed to remove backup directory")?;
            println!("Removed backup directory {}", id);
            Ok(())
        }
        Command::History { id } => {
            let entries =
                directories::directory_history(&db, id).context("Failed to read history")?;
            if entries.is_empty() {
                println!("No archived versions");
            }
            for entry in &entries {
                println!("{}", directories::describe_history(entry));
            }
            Ok(())
        }
    }
}

fn load_config(args: &Cli) -> Result<Config> {
    let mut config = match &args.config_file {
        Some(file) => {
            let file = file.trim_matches(|c| c == '"' || c == '\'').to_string();
            setup_config(file)?
        }
        None => {
            info!("No config file given, using defaults");
            Config::default()
        }
    };

    if let Some(database_file) = &args.database_file {
        config.database_file = database_file.clone();
    }
    validate_config(&config)?;
    Ok(config)
}

fn manager(db: Database, config: Config) -> Arc<BackupManager> {
    Arc::new(BackupManager::new(db, config, Arc::new(LogCrateSink)))
}

fn lock_engine(config: &Config) -> Result<EngineLock> {
    let lock = EngineLock::acquire(&config.database_file)?;
    if let Some(path) = lock.path() {
        debug!("Holding engine lock {}", path.display());
    }
    Ok(lock)
}

/// Makes directories due. A running daemon picks them up on its next check,
/// otherwise the pass runs here.
fn backup_now(db: Database, config: Config, directory_id: Option<i64>) -> Result<()> {
    match EngineLock::acquire(&config.database_file) {
        Ok(_lock) => run_once(db, config, Some(directory_id)),
        Err(BackupError::EngineLocked { .. }) => {
            let cleared = queries::clear_last_finished_backup(&db, directory_id)
                .context("Failed to request backup")?;
            if cleared == 0 {
                warn!("No backup directory matched the request");
            }
            info!(
                "Backup requested; the running daemon starts it within {} seconds",
                config.min_check_interval_secs
            );
            db.wait_job_done()?;
            Ok(())
        }
        Err(e) => Err(e).context("Failed to lock the database"),
    }
}

/// One pass. `request` makes directories due first: `Some(None)` means all of them.
/// The caller holds the engine lock.
fn run_once(db: Database, config: Config, request: Option<Option<i64>>) -> Result<()> {
    let manager = manager(db, config);
    let token = CancellationToken::new();

    let handler_token = token.clone();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal, interrupting backup...");
        handler_token.cancel();
    })
    .context("Failed to set Ctrl+C handler")?;

    if let Some(directory_id) = request {
        let cleared = manager
            .request_backup(directory_id)
            .context("Failed to request backup")?;
        if cleared == 0 {
            warn!("No backup directory matched the request");
        }
    }

    let summary = manager
        .check_for_backups(&token)
        .context("Backup pass failed")?;
    info!("{}", summary);
    manager.database().wait_job_done()?;
    Ok(())
}

fn run_scheduled(db: Database, config: Config) -> Result<()> {
    let _lock = lock_engine(&config).context("Failed to lock the database")?;
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    ctrlc::set_handler(move || {
        info!("Received shutdown signal, stopping scheduler...");
        r.store(false, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;

    let scheduler =
        BackupScheduler::start(manager(db, config)).context("Failed to start the scheduler")?;

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_secs(1));
    }

    scheduler.shutdown();
    info!("Scheduler stopped");
    Ok(())
}
