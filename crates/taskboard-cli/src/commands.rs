use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use tracing::warn;

use taskboard_core::api::Navigator;
use taskboard_core::models::{
    BoardUpdate, DeadlineFilter, NewTask, SignupResponse, SortBy, SortDir, TaskQuery, TaskUpdate,
};
use taskboard_core::{ApiClient, Config, CredentialStore};

use crate::format::{board_table, task_table};
use crate::{BoardsCommand, Cli, Command, DeadlineArg, SortArg, TaskListArgs, TasksCommand};

/// Tells the user the session is gone. The redirect target only matters to
/// front ends with views, so it is just logged.
struct CliNavigator;

impl Navigator for CliNavigator {
    fn redirect(&self, destination: &str) {
        warn!(destination = destination, "Session could not be refreshed");
        eprintln!("Your session has expired. Run `taskboard login` to sign in again.");
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load()?;
    if let Some(url) = cli.api_url {
        config.api_base_url = url;
    }

    let store = Arc::new(CredentialStore::open(config.token_persistence()?));
    let api = ApiClient::from_config(&config, store, Arc::new(CliNavigator))?;

    match cli.command {
        Command::Login { email } => login(&api, &mut config, email).await,
        Command::Signup { email } => signup(&api, &mut config, email).await,
        Command::Logout => {
            if !api.is_authenticated() {
                println!("Not logged in.");
                return Ok(());
            }
            api.logout().await?;
            println!("Logged out.");
            Ok(())
        }
        Command::Whoami => whoami(&api, &config).await,
        Command::Boards(cmd) => boards(&api, cmd).await,
        Command::Tasks(cmd) => tasks(&api, cmd).await,
    }
}

// ===== Auth =====

fn prompt_email(flag: Option<String>, remembered: Option<&str>) -> Result<String> {
    if let Some(email) = flag {
        return Ok(email);
    }
    match remembered {
        Some(last) => print!("Email [{}]: ", last),
        None => print!("Email: "),
    }
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read email")?;
    let line = line.trim();

    match (line.is_empty(), remembered) {
        (false, _) => Ok(line.to_string()),
        (true, Some(last)) => Ok(last.to_string()),
        (true, None) => bail!("Email is required"),
    }
}

fn prompt_password() -> Result<String> {
    let password = rpassword::prompt_password("Password: ").context("Failed to read password")?;
    if password.is_empty() {
        bail!("Password is required");
    }
    Ok(password)
}

fn remember_email(config: &mut Config, email: &str) {
    config.last_email = Some(email.trim().to_string());
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }
}

async fn login(api: &ApiClient, config: &mut Config, email: Option<String>) -> Result<()> {
    let email = prompt_email(email, config.last_email.as_deref())?;
    let password = prompt_password()?;

    api.login(&email, &password).await?;
    remember_email(config, &email);
    println!("Logged in as {}.", email.trim());
    Ok(())
}

async fn signup(api: &ApiClient, config: &mut Config, email: Option<String>) -> Result<()> {
    let email = prompt_email(email, None)?;
    let password = prompt_password()?;

    match api.signup(&email, &password).await? {
        SignupResponse::Tokens(_) => {}
        SignupResponse::Account(user) => {
            println!("Created account {} (id {}).", user.email, user.id);
            api.login(&email, &password)
                .await
                .context("Account created, but logging in failed")?;
        }
    }
    remember_email(config, &email);
    println!("Logged in as {}.", email.trim());
    Ok(())
}

async fn whoami(api: &ApiClient, config: &Config) -> Result<()> {
    if !api.is_authenticated() {
        println!("Not logged in.");
        return Ok(());
    }
    let me = api.me().await?;
    match config.last_email.as_deref() {
        Some(email) => println!("{} (user {})", email, me.user_id),
        None => println!("user {}", me.user_id),
    }
    Ok(())
}

// ===== Boards =====

async fn boards(api: &ApiClient, cmd: BoardsCommand) -> Result<()> {
    match cmd {
        BoardsCommand::List { search } => {
            let boards = api.list_boards(search.as_deref()).await?;
            println!("{}", board_table(&boards));
        }
        BoardsCommand::Create { name } => {
            let board = api.create_board(&name).await?;
            println!("Created board {} ({}).", board.id, board.name);
        }
        BoardsCommand::Rename { id, name } => {
            let board = api.update_board(id, &BoardUpdate::rename(name)).await?;
            println!("Renamed board {} to {}.", board.id, board.name);
        }
        BoardsCommand::Delete { id } => {
            api.delete_board(id).await?;
            println!("Deleted board {}.", id);
        }
    }
    Ok(())
}

// ===== Tasks =====

fn task_query(args: &TaskListArgs) -> TaskQuery {
    TaskQuery {
        search: args.search.clone().filter(|s| !s.trim().is_empty()),
        status: args.status,
        priority: args.priority,
        deadline: args.deadline.map(|d| match d {
            DeadlineArg::With => DeadlineFilter::With,
            DeadlineArg::Without => DeadlineFilter::Without,
        }),
        sort_by: args.sort_by.map(|s| match s {
            SortArg::Created => SortBy::Created,
            SortArg::Deadline => SortBy::Deadline,
        }),
        sort_dir: args.asc.then_some(SortDir::Asc),
    }
}

async fn tasks(api: &ApiClient, cmd: TasksCommand) -> Result<()> {
    match cmd {
        TasksCommand::List(args) => {
            let tasks = api.list_tasks(args.board, &task_query(&args)).await?;
            println!("{}", task_table(&tasks, Utc::now()));
        }
        TasksCommand::Add(args) => {
            let new_task = NewTask {
                title: args.title,
                description: args.description,
                status: args.status,
                priority: args.priority,
                deadline: args.deadline,
            };
            let task = api.create_task(args.board, &new_task).await?;
            println!("Created task {} on board {}.", task.id, task.board_id);
        }
        TasksCommand::Update(args) => {
            let update = TaskUpdate {
                title: args.title,
                description: args.description,
                status: args.status,
                priority: args.priority,
                deadline: args.deadline,
            };
            if update.is_empty() {
                bail!("Nothing to update; pass at least one of --title, --description, --status, --priority, --deadline");
            }
            let task = api.update_task(args.board, args.task, &update).await?;
            println!("Updated task {} ({}).", task.id, task.status);
        }
        TasksCommand::Delete { board, task } => {
            api.delete_task(board, task).await?;
            println!("Deleted task {} from board {}.", task, board);
        }
    }
    Ok(())
}
