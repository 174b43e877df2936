//! taskboard - command-line client for the taskboard API.
//!
//! Credentials persist between runs; an expired access token is refreshed
//! transparently, and a dead session asks the user to log in again.

mod commands;
mod format;

use std::io;

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use taskboard_core::models::{TaskPriority, TaskStatus};
use taskboard_core::ApiError;

#[derive(Debug, Parser)]
#[command(name = "taskboard", version, about = "Manage taskboard boards and tasks")]
struct Cli {
    /// API base URL, overriding the config file and TASKBOARD_API_URL
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Log in and store the session
    Login {
        #[arg(long)]
        email: Option<String>,
    },
    /// Create an account
    Signup {
        #[arg(long)]
        email: Option<String>,
    },
    /// End the session and forget stored credentials
    Logout,
    /// Show who is logged in
    Whoami,
    /// Board operations
    #[command(subcommand)]
    Boards(BoardsCommand),
    /// Task operations
    #[command(subcommand)]
    Tasks(TasksCommand),
}

#[derive(Debug, Subcommand)]
enum BoardsCommand {
    List {
        #[arg(long)]
        search: Option<String>,
    },
    Create {
        name: String,
    },
    Rename {
        id: i64,
        name: String,
    },
    Delete {
        id: i64,
    },
}

#[derive(Debug, Subcommand)]
enum TasksCommand {
    List(TaskListArgs),
    Add(TaskAddArgs),
    Update(TaskUpdateArgs),
    Delete {
        board: i64,
        task: i64,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DeadlineArg {
    With,
    Without,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SortArg {
    Created,
    Deadline,
}

#[derive(Debug, Args)]
struct TaskListArgs {
    board: i64,
    #[arg(long)]
    search: Option<String>,
    /// todo, in_progress, need_review or done
    #[arg(long)]
    status: Option<TaskStatus>,
    /// low, medium or high
    #[arg(long)]
    priority: Option<TaskPriority>,
    #[arg(long, value_enum)]
    deadline: Option<DeadlineArg>,
    #[arg(long, value_enum)]
    sort_by: Option<SortArg>,
    /// Oldest first instead of newest first
    #[arg(long)]
    asc: bool,
}

#[derive(Debug, Args)]
struct TaskAddArgs {
    board: i64,
    title: String,
    #[arg(long, default_value = "")]
    description: String,
    #[arg(long)]
    status: Option<TaskStatus>,
    #[arg(long)]
    priority: Option<TaskPriority>,
    /// YYYY-MM-DD or RFC 3339
    #[arg(long, value_parser = format::parse_deadline)]
    deadline: Option<DateTime<Utc>>,
}

#[derive(Debug, Args)]
struct TaskUpdateArgs {
    board: i64,
    task: i64,
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    status: Option<TaskStatus>,
    #[arg(long)]
    priority: Option<TaskPriority>,
    #[arg(long, value_parser = format::parse_deadline)]
    deadline: Option<DateTime<Utc>>,
}

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // RUST_LOG controls the level (e.g., RUST_LOG=taskboard_core=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing();
    info!(command = ?cli.command, "taskboard starting");

    if let Err(e) = commands::run(cli).await {
        match e.downcast_ref::<ApiError>() {
            Some(api_err) if api_err.is_unauthorized() => {
                eprintln!("Not logged in. Run `taskboard login` first.");
            }
            _ => eprintln!("Error: {:#}", e),
        }
        std::process::exit(1);
    }
    Ok(())
}
