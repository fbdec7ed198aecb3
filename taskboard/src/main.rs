//! `taskboard` — command-line task board.
//!
//! Reads and writes one board (collection) through the task synchronizer.
//! The board lives in a local JSON file by default, or on a
//! `taskboard-store` server. Configuration via CLI flags, environment
//! variables, or config file (`~/.config/taskboard/config.toml`).
//!
//! ```bash
//! # Local file board
//! cargo run --bin taskboard -- add "Write report" --creator alice --assignee bob
//! cargo run --bin taskboard -- list --status active
//!
//! # Shared board on a store server
//! cargo run --bin taskboard -- --backend remote \
//!     --store-url ws://127.0.0.1:9000/ws watch
//! ```

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_appender::non_blocking::WorkerGuard;

use taskboard::config::{BackendKind, CliArgs, ClientConfig, ConfigError};
use taskboard::store::local::LocalStore;
use taskboard::store::memory::MemoryStore;
use taskboard::store::remote::WsStore;
use taskboard::store::{RemoteStore, StoreError};
use taskboard::sync::{ReorderOutcome, SyncError, SyncEvent, TaskSynchronizer};
use taskboard::view::render::{self, IdLookupError};
use taskboard::view::{StatusFilter, TaskQuery};
use taskboard_proto::task::{Priority, TaskDraft};

#[derive(Parser, Debug)]
#[command(name = "taskboard", version, about = "Task board with live sync")]
struct Cli {
    #[command(flatten)]
    args: CliArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List tasks in display order.
    List {
        /// Show all, active, or completed tasks.
        #[arg(long, default_value_t)]
        status: StatusFilter,
        /// Case-insensitive text to look for in title, description, and people.
        #[arg(long, default_value = "")]
        search: String,
    },
    /// Add a task at the end of the board.
    Add {
        title: String,
        /// Who is adding the task (default: `[tasks] creator` from config).
        #[arg(long)]
        creator: Option<String>,
        /// Who the task is for (default: the creator).
        #[arg(long)]
        assignee: Option<String>,
        #[arg(short, long)]
        description: Option<String>,
        /// Due date as YYYY-MM-DD.
        #[arg(long)]
        due: Option<NaiveDate>,
        #[arg(long, default_value_t)]
        priority: Priority,
    },
    /// Flip a task between active and completed.
    Toggle {
        /// Task id or unique id prefix.
        id: String,
    },
    /// Give a task a new title.
    Rename { id: String, title: String },
    /// Delete a task.
    Delete { id: String },
    /// Move task FROM to the position currently held by task TO.
    Move { from: String, to: String },
    /// Print the board and reprint it on every change until interrupted.
    Watch {
        #[arg(long, default_value_t)]
        status: StatusFilter,
        #[arg(long, default_value = "")]
        search: String,
    },
}

/// Failures reported by the command-line front end.
#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Lookup(#[from] IdLookupError),
    #[error("no creator given (use --creator or set [tasks] creator in the config file)")]
    MissingCreator,
    #[error("listener failed: {0}")]
    Listener(String),
    #[error("timed out waiting for the first snapshot")]
    SnapshotTimeout,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match ClientConfig::load(&cli.args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let _log_guard = init_logging(&config.log_level, config.log_file.as_deref());

    tracing::debug!(
        backend = ?config.backend,
        collection = %config.collection,
        "taskboard starting"
    );

    match dispatch(&config, cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::debug!(error = %e, "command failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize logging.
///
/// Logs go to stderr unless a log file is configured, so stdout only carries
/// command output. Returns a [`WorkerGuard`] for the file writer that must
/// be held until shutdown to flush buffered lines.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let file = file_path.and_then(|path| Some((path.parent()?, path.file_name()?)));
    let Some((log_dir, file_name)) = file else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(env_filter)
            .init();
        return None;
    };

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

/// Opens the configured backend and runs the command against it.
async fn dispatch(config: &ClientConfig, command: Command) -> Result<(), CliError> {
    match config.backend {
        BackendKind::Memory => run(Arc::new(MemoryStore::new()), config, command).await,
        BackendKind::Local => {
            let store = LocalStore::open(&config.data_file)?;
            run(Arc::new(store), config, command).await
        }
        BackendKind::Remote => {
            let url = config
                .store_url
                .as_deref()
                .ok_or(ConfigError::MissingStoreUrl)?;
            let store =
                WsStore::connect_with_timeouts(url, config.connect_timeout, config.request_timeout)
                    .await?;
            run(Arc::new(store), config, command).await
        }
    }
}

async fn run<S: RemoteStore>(
    store: Arc<S>,
    config: &ClientConfig,
    command: Command,
) -> Result<(), CliError> {
    let (sync, mut events) = TaskSynchronizer::new(store, config.collection.clone());
    let sync = sync.with_max_title_length(config.max_title_length);
    let _handle = sync.subscribe().await?;
    wait_for_snapshot(&mut events, config.connect_timeout).await?;

    match command {
        Command::List { status, search } => {
            print_board(&sync, &TaskQuery::new(status, search));
        }
        Command::Add {
            title,
            creator,
            assignee,
            description,
            due,
            priority,
        } => {
            let creator = creator
                .or_else(|| config.default_creator.clone())
                .ok_or(CliError::MissingCreator)?;
            let assignee = assignee.unwrap_or_else(|| creator.clone());
            let mut draft = TaskDraft::new(title, creator, assignee);
            draft.description = description.unwrap_or_default();
            draft.due_date = due;
            draft.priority = priority;
            let id = sync.add_task(draft).await?;
            println!("{id}");
        }
        Command::Toggle { id } => {
            let id = render::resolve_id(&sync.tasks(), &id)?;
            sync.toggle_completion(&id).await?;
        }
        Command::Rename { id, title } => {
            let id = render::resolve_id(&sync.tasks(), &id)?;
            sync.rename_task(&id, &title).await?;
        }
        Command::Delete { id } => {
            let id = render::resolve_id(&sync.tasks(), &id)?;
            sync.delete_task(&id).await?;
        }
        Command::Move { from, to } => {
            let tasks = sync.tasks();
            let from = render::resolve_id(&tasks, &from)?;
            let to = render::resolve_id(&tasks, &to)?;
            match sync.reorder(&from, &to).await? {
                ReorderOutcome::Skipped => println!("nothing to move"),
                ReorderOutcome::Applied { writes } => println!("moved ({writes} order updates)"),
            }
        }
        Command::Watch { status, search } => {
            watch(&sync, &mut events, &TaskQuery::new(status, search)).await?;
        }
    }
    Ok(())
}

/// Blocks until the listener delivers its first snapshot.
async fn wait_for_snapshot(
    events: &mut mpsc::UnboundedReceiver<SyncEvent>,
    timeout: Duration,
) -> Result<(), CliError> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match tokio::time::timeout_at(deadline, events.recv()).await {
            Err(_) => return Err(CliError::SnapshotTimeout),
            Ok(None) => return Err(CliError::Listener("event channel closed".to_string())),
            Ok(Some(SyncEvent::Snapshot { .. })) => return Ok(()),
            Ok(Some(SyncEvent::ListenerFailed { reason })) => {
                return Err(CliError::Listener(reason));
            }
            Ok(Some(SyncEvent::Drift { .. })) => {}
        }
    }
}

async fn watch<S: RemoteStore>(
    sync: &TaskSynchronizer<S>,
    events: &mut mpsc::UnboundedReceiver<SyncEvent>,
    query: &TaskQuery,
) -> Result<(), CliError> {
    print_board(sync, query);
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(SyncEvent::Snapshot { .. }) => {
                    println!();
                    print_board(sync, query);
                }
                Some(SyncEvent::Drift { reason }) => eprintln!("local order is stale: {reason}"),
                Some(SyncEvent::ListenerFailed { reason }) => return Err(CliError::Listener(reason)),
                None => return Ok(()),
            },
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}

fn print_board<S: RemoteStore>(sync: &TaskSynchronizer<S>, query: &TaskQuery) {
    let today = chrono::Local::now().date_naive();
    let visible = sync.visible(query);
    if visible.is_empty() {
        println!("(no tasks)");
    }
    for task in &visible {
        println!("{}", render::task_line(task, today));
    }
    println!("{}", render::footer(sync.active_count()));
}
