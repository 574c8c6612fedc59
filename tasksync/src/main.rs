//! `tasksync`: command-line client for the shared task list.
//!
//! One-shot subcommands talk to the REST API directly; `watch` keeps a
//! synchronized view open over the push channel and reprints it on every
//! change. Configuration via CLI flags, environment variables, or config
//! file (`~/.config/tasksync/config.toml`).
//!
//! ```bash
//! # List everything in progress
//! cargo run --bin tasksync -- list --status in-progress
//!
//! # Follow the "To Do" column live
//! cargo run --bin tasksync -- --api-url http://127.0.0.1:8000 \
//!     --ws-url ws://127.0.0.1:8000/ws watch --status todo
//! ```

use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;

use tasksync::api::{ApiError, HttpTaskClient, TaskApi};
use tasksync::config::{CliArgs, ClientConfig, Command, FilterArgs};
use tasksync::connection::{ConnectionManager, ConnectionStatus};
use tasksync::sync::TaskSync;
use tasksync::transport::websocket::WebSocketConnector;
use tasksync_proto::task::{NewTask, Task, TaskFilter, TaskId, TaskStatus};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    // Load and resolve configuration (CLI args > env > config file > defaults).
    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());
    tracing::debug!(api_url = %config.api_url, ws_url = %config.ws_url, "tasksync starting");

    let command = cli
        .command
        .unwrap_or_else(|| Command::List(FilterArgs::default()));

    match run(command, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(err = %e, "command failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize logging.
///
/// Logs go to stderr so they never mix with command output, or to
/// `file_path` when given. Returns a [`WorkerGuard`] for the file writer
/// that must be held until shutdown to ensure buffered entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let Some(log_path) = file_path else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(env_filter)
            .init();
        return None;
    };

    let log_dir = log_path.parent().filter(|p| !p.as_os_str().is_empty());
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender =
        tracing_appender::rolling::never(log_dir.unwrap_or_else(|| Path::new(".")), file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

async fn run(command: Command, config: &ClientConfig) -> Result<(), ApiError> {
    let api = HttpTaskClient::new(&config.api_url)?;

    match command {
        Command::List(args) => {
            let filter = args.to_filter();
            print_view(&filter, &api.list(&filter).await?, None);
        }
        Command::Get { id } => {
            let task = api.get(id).await?;
            println!("{}", format_task(&task));
            if !task.description.is_empty() {
                println!();
                println!("{}", task.description);
            }
        }
        Command::Create {
            title,
            description,
            assignee,
        } => {
            let task = api
                .create(&NewTask::new(title, description, assignee))
                .await?;
            println!("created {}", format_task(&task));
        }
        Command::Claim { id } => set_status(&api, id, TaskStatus::InProgress).await?,
        Command::Complete { id } => set_status(&api, id, TaskStatus::Done).await?,
        Command::Status { id, status } => set_status(&api, id, status).await?,
        Command::Delete { id } => {
            api.delete(id).await?;
            println!("deleted task {id}");
        }
        Command::Watch(args) => watch(api, config, &args.to_filter()).await?,
    }
    Ok(())
}

async fn set_status(
    api: &HttpTaskClient,
    id: TaskId,
    status: TaskStatus,
) -> Result<(), ApiError> {
    let task = api.update_status(id, status).await?;
    println!("updated {}", format_task(&task));
    Ok(())
}

/// Keep `filter`'s view synchronized and reprint it on every change.
async fn watch(
    api: HttpTaskClient,
    config: &ClientConfig,
    filter: &TaskFilter,
) -> Result<(), ApiError> {
    let connection = ConnectionManager::new(
        WebSocketConnector::new(config.connect_timeout),
        config.ws_url.clone(),
        config.reconnect,
    );
    let sync = TaskSync::new(api, connection.clone());
    sync.start();

    let mut changes = sync.changes();
    let mut status = sync.watch_connection();
    let tasks = sync.view(filter).await?;
    print_view(filter, &tasks, Some(sync.connection_status()));

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
        if let Some(tasks) = sync.read(filter) {
            print_view(filter, &tasks, Some(sync.connection_status()));
        }
    }

    sync.stop();
    connection.disconnect();
    tracing::info!("watch stopped");
    Ok(())
}

fn print_view(filter: &TaskFilter, tasks: &[Task], status: Option<ConnectionStatus>) {
    match status {
        Some(status) if status.is_connected() => println!("== {filter} (live) =="),
        Some(status) => println!(
            "== {filter} ({}, reconnect attempts: {}) ==",
            status.state, status.reconnect_attempts
        ),
        None => {}
    }
    if tasks.is_empty() {
        println!("no tasks");
    }
    for task in tasks {
        println!("{}", format_task(task));
    }
}

fn format_task(task: &Task) -> String {
    let assignee = if task.assignee.is_empty() {
        "unassigned"
    } else {
        task.assignee.as_str()
    };
    format!(
        "#{:<5} {:<11} {}  [{assignee}]",
        task.id.get(),
        task.status.as_str(),
        task.title
    )
}
