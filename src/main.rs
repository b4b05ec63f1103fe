/*!
 * Roster CLI - Command Line Interface
 *
 * Bulk team membership and team maintenance against the directory service.
 * Exit codes: 0 success, 1 partial success, 2 failure.
 */

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use roster::{
    cli_progress::CliProgressRenderer,
    cli_style::{
        self, batch_summary_table, failures_table, health_table, history_table, section_header,
    },
    config::{LogLevel, RosterConfig},
    error::{exit_code_for, RosterError, EXIT_FATAL, EXIT_SUCCESS},
    input::{parse_properties, read_targets},
    logging, App, AppParts, BatchJob, CancellationToken, MemberRole,
};
use roster_core_audit::{parse_journal, summarize};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Failed targets listed after a batch
const FAILURE_ROWS: usize = 25;

#[derive(Parser)]
#[command(name = "roster")]
#[command(version, about = "Resilient bulk team and membership management", long_about = None)]
struct Cli {
    /// Configuration file (default: ~/.roster/roster.toml when present)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long, value_enum, global = true)]
    log_level: Option<LogLevelArg>,

    /// Verbose output (debug logging, connection milestones)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and show connection health
    Health,

    /// Add users to a team
    AddMembers {
        /// Team (group) id
        #[arg(long)]
        team: String,

        #[command(flatten)]
        targets: TargetArgs,

        /// Role granted to the added users
        #[arg(long, value_enum, default_value = "member")]
        role: RoleArg,
    },

    /// Remove users from a team
    RemoveMembers {
        /// Team (group) id
        #[arg(long)]
        team: String,

        #[command(flatten)]
        targets: TargetArgs,
    },

    /// Archive teams
    ArchiveTeams {
        #[command(flatten)]
        targets: TargetArgs,

        /// Unarchive instead
        #[arg(long)]
        unarchive: bool,
    },

    /// Set properties on many teams
    UpdateTeam {
        #[command(flatten)]
        targets: TargetArgs,

        /// Property assignment, repeatable: --set Visibility=Private
        #[arg(long = "set", value_name = "KEY=VALUE", required = true)]
        properties: Vec<String>,
    },

    /// Show audited operations from the journal
    History {
        /// Journal file (default: the configured journal)
        #[arg(long)]
        journal: Option<PathBuf>,

        /// Only the most recent N operations
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Configuration management
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Args)]
struct TargetArgs {
    /// File with one target per line
    #[arg(short, long, value_name = "FILE")]
    file: PathBuf,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Write a configuration file with every default spelled out
    Init {
        /// Where to write (default: ~/.roster/roster.toml)
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Load, validate and print the effective configuration
    Show,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevelArg> for LogLevel {
    fn from(level: LogLevelArg) -> Self {
        match level {
            LogLevelArg::Error => LogLevel::Error,
            LogLevelArg::Warn => LogLevel::Warn,
            LogLevelArg::Info => LogLevel::Info,
            LogLevelArg::Debug => LogLevel::Debug,
            LogLevelArg::Trace => LogLevel::Trace,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum RoleArg {
    Member,
    Owner,
}

impl From<RoleArg> for MemberRole {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Member => MemberRole::Member,
            RoleArg::Owner => MemberRole::Owner,
        }
    }
}

fn main() {
    let code = match run() {
        Ok(code) => code,
        Err(e) => {
            let roster_err = e.downcast_ref::<RosterError>();
            let hint = roster_err.and_then(hint_for);
            cli_style::print_error(&format!("{:#}", e), hint);
            roster_err.map(RosterError::exit_code).unwrap_or(EXIT_FATAL)
        }
    };
    std::process::exit(code);
}

fn hint_for(err: &RosterError) -> Option<&'static str> {
    match err {
        RosterError::Config(_) => {
            Some("Run `roster config init` to write a starting configuration")
        }
        RosterError::Token(_) => {
            Some("Export the access token in the variable named by connection.token_env")
        }
        RosterError::Connect(e) if e.is_circuit_open() => {
            Some("The service has been failing; wait for the circuit to close and retry")
        }
        _ => None,
    }
}

fn run() -> anyhow::Result<i32> {
    let cli = Cli::parse();

    if let Commands::Config(ConfigCommands::Init { path, force }) = &cli.command {
        return config_init(path.as_deref(), *force);
    }

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(level) = cli.log_level {
        config.logging.level = level.into();
    }
    logging::init_logging(&config.logging, cli.verbose)?;

    match cli.command {
        Commands::Config(ConfigCommands::Show) => {
            config.validate()?;
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(EXIT_SUCCESS)
        }
        Commands::History { journal, limit } => {
            let path = journal.unwrap_or_else(|| config.audit.journal_path.clone());
            history(&path, limit)
        }
        Commands::Health => with_app(config, cli.verbose, |app| async move {
            let health = app.service().health();
            section_header("Connection");
            println!("{}", health_table(&health));
            Ok(if health.is_healthy() {
                EXIT_SUCCESS
            } else {
                EXIT_FATAL
            })
        }),
        Commands::AddMembers {
            team,
            targets,
            role,
        } => {
            let items = read_targets(&targets.file)?;
            with_app(config, cli.verbose, |app| async move {
                let cancel = cancel_on_ctrl_c();
                let job = app
                    .service()
                    .add_members(&team, items, role.into(), Some(cancel))
                    .await?;
                Ok(report(&job))
            })
        }
        Commands::RemoveMembers { team, targets } => {
            let items = read_targets(&targets.file)?;
            with_app(config, cli.verbose, |app| async move {
                let cancel = cancel_on_ctrl_c();
                let job = app
                    .service()
                    .remove_members(&team, items, Some(cancel))
                    .await?;
                Ok(report(&job))
            })
        }
        Commands::ArchiveTeams { targets, unarchive } => {
            let items = read_targets(&targets.file)?;
            with_app(config, cli.verbose, |app| async move {
                let cancel = cancel_on_ctrl_c();
                let job = app
                    .service()
                    .archive_teams(items, !unarchive, Some(cancel))
                    .await?;
                Ok(report(&job))
            })
        }
        Commands::UpdateTeam {
            targets,
            properties,
        } => {
            let items = read_targets(&targets.file)?;
            let properties = parse_properties(&properties)?;
            with_app(config, cli.verbose, |app| async move {
                let cancel = cancel_on_ctrl_c();
                let job = app
                    .service()
                    .update_team_properties(items, properties, Some(cancel))
                    .await?;
                Ok(report(&job))
            })
        }
        Commands::Config(ConfigCommands::Init { .. }) => Ok(EXIT_SUCCESS),
    }
}

/// Explicit path, else the default path when it exists, else defaults
fn load_config(path: Option<&Path>) -> anyhow::Result<RosterConfig> {
    if let Some(path) = path {
        return RosterConfig::from_file(path)
            .with_context(|| format!("Failed to load config file {}", path.display()));
    }
    let default_path = RosterConfig::default_path()?;
    if default_path.exists() {
        Ok(RosterConfig::from_file(&default_path)?)
    } else {
        Ok(RosterConfig::default())
    }
}

fn config_init(path: Option<&Path>, force: bool) -> anyhow::Result<i32> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => RosterConfig::default_path()?,
    };
    if path.exists() && !force {
        return Err(RosterError::Config(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        ))
        .into());
    }
    RosterConfig::default().to_file(&path)?;
    cli_style::print_success(&format!("Wrote {}", path.display()));
    Ok(EXIT_SUCCESS)
}

fn history(path: &Path, limit: usize) -> anyhow::Result<i32> {
    if !path.exists() {
        cli_style::print_info(&format!("No audit journal at {}", path.display()));
        return Ok(EXIT_SUCCESS);
    }
    let events = parse_journal(path)?;
    let records = summarize(&events);
    let skip = records.len().saturating_sub(limit);
    section_header("History");
    println!("{}", history_table(&records[skip..]));
    Ok(EXIT_SUCCESS)
}

/// Build the client, connect, run `f`, then shut down
fn with_app<F, Fut>(config: RosterConfig, verbose: bool, f: F) -> anyhow::Result<i32>
where
    F: FnOnce(Arc<App>) -> Fut,
    Fut: Future<Output = anyhow::Result<i32>>,
{
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    runtime.block_on(async move {
        let (notifier, renderer) = CliProgressRenderer::channel(256, verbose);
        let render_task = renderer.spawn();

        let parts = AppParts::from_config(&config)?.with_notifier(Arc::new(notifier));
        let app = Arc::new(App::build(config, parts)?);
        app.connect().await?;

        let result = f(app.clone()).await;

        if let Ok(app) = Arc::try_unwrap(app) {
            app.shutdown().await;
        }
        render_task.abort();
        result
    })
}

/// Token cancelled on the first Ctrl-C
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cli_style::print_warning("Cancelling: no further chunks will be dispatched");
            child.cancel();
        }
    });
    token
}

/// Print the batch summary and return its exit code
fn report(job: &BatchJob) -> i32 {
    println!();
    println!("{}", batch_summary_table(job));
    if !job.errors.is_empty() {
        section_header("Failures");
        println!("{}", failures_table(job, FAILURE_ROWS));
    }
    exit_code_for(job.status)
}
