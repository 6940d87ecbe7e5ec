//! Farebox CLI - Fare collection from the terminal
//!
//! Boarding and top-up capture against the local record store, with explicit
//! sync against the authoritative server when a connection is available.

use std::env;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::aot::Generator;
use clap_complete::{generate, shells};
use farebox_core::{
    AuthSession, AuthoritativeStore, BalanceTier, ConflictPolicy, ConnectivityMonitor, CurrentUser,
    Database, EngineConfig, HttpAuthoritativeStore, OfflineTransaction, PassengerFilter,
    PassengerService, PassengerSnapshot, PassengerSort, RecordStore, Role, SyncEngine, SyncReport,
};
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Parser)]
#[command(name = "farebox")]
#[command(about = "Offline-first fare collection for conductors")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Optional path to local database file
    #[arg(long, value_name = "PATH")]
    db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List cached passengers
    #[command(alias = "ls")]
    Passengers {
        /// Filter by route
        #[arg(long)]
        route: Option<String>,
        /// Filter by ministry
        #[arg(long)]
        ministry: Option<String>,
        /// Filter by name substring
        #[arg(long)]
        name: Option<String>,
        /// Only active accounts
        #[arg(long)]
        active: bool,
        /// Sort order
        #[arg(long, value_enum, default_value_t = SortKey::Name)]
        sort: SortKey,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Record a boarding and deduct the fare
    Board {
        /// Passenger ID
        passenger_id: String,
        /// Fare amount, e.g. 2.50
        fare: String,
    },
    /// Credit a balance top-up
    Topup {
        /// Passenger ID
        passenger_id: String,
        /// Top-up amount, e.g. 10.00
        amount: String,
    },
    /// Push pending transactions and pull fresh snapshots
    Sync {
        /// Re-push the entire log, not just unsynced entries
        #[arg(long)]
        force: bool,
    },
    /// Show connectivity, authentication, and sync state
    Status,
    /// List transactions waiting to be pushed
    Pending {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List pending entries old enough to be in conflict, optionally resolving them
    Conflicts {
        /// Resolution to apply
        #[arg(long, value_enum)]
        resolve: Option<ResolveArg>,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Core(#[from] farebox_core::Error),
    #[error(transparent)]
    Remote(#[from] farebox_core::RemoteError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("FAREBOX_API_URL is not set. Point it at the fare server to enable this command.")]
    ApiUrlNotConfigured,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum SortKey {
    Name,
    Balance,
    Ministry,
    Route,
}

impl From<SortKey> for PassengerSort {
    fn from(key: SortKey) -> Self {
        match key {
            SortKey::Name => Self::Name,
            SortKey::Balance => Self::Balance,
            SortKey::Ministry => Self::Ministry,
            SortKey::Route => Self::Route,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum ResolveArg {
    /// Keep the entries and let the next sync retry them
    Flag,
    /// Drop the entries and roll their amounts back
    Discard,
    /// Keep only entries the cached balance still supports
    Revalidate,
}

impl From<ResolveArg> for ConflictPolicy {
    fn from(arg: ResolveArg) -> Self {
        match arg {
            ResolveArg::Flag => Self::FlagForReview,
            ResolveArg::Discard => Self::Discard,
            ResolveArg::Revalidate => Self::Revalidate,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("farebox=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    if let Commands::Completions { shell, output } = &cli.command {
        return run_completions(*shell, output.as_deref());
    }

    let db_path = resolve_db_path(cli.db_path);
    let app = App::bootstrap(&db_path).await?;

    match cli.command {
        Commands::Passengers {
            route,
            ministry,
            name,
            active,
            sort,
            json,
        } => {
            let filter = PassengerFilter {
                name_contains: name,
                ministry,
                route_id: route,
                balance_tier: None,
                active_only: active,
                sort: sort.into(),
            };
            run_passengers(&app, &filter, json).await?;
        }
        Commands::Board { passenger_id, fare } => {
            run_board(&app, &passenger_id, &fare).await?;
        }
        Commands::Topup {
            passenger_id,
            amount,
        } => {
            run_topup(&app, &passenger_id, &amount).await?;
        }
        Commands::Sync { force } => run_sync(&app, force).await,
        Commands::Status => run_status(&app).await,
        Commands::Pending { json } => run_pending(&app, json).await?,
        Commands::Conflicts { resolve } => run_conflicts(&app, resolve).await,
        Commands::Completions { .. } => unreachable!("handled before bootstrap"),
    }

    Ok(())
}

/// Wired-up engine handles for one CLI invocation
struct App {
    service: PassengerService,
    engine: Arc<SyncEngine>,
}

impl App {
    /// Open the store, probe the server, and resolve the operator session
    async fn bootstrap(db_path: &Path) -> Result<Self, CliError> {
        let base_url = env::var("FAREBOX_API_URL").map_err(|_| CliError::ApiUrlNotConfigured)?;
        let config = EngineConfig::default();
        let sessions = farebox_core::Sessions::new();

        let store = RecordStore::new(Database::open(db_path)?, &config).into_handle();
        let remote: Arc<dyn AuthoritativeStore> =
            Arc::new(HttpAuthoritativeStore::new(base_url, sessions.clone())?);

        if let Some(session) = session_from_env() {
            sessions.set(session);
        }

        let monitor = ConnectivityMonitor::new(false);
        monitor.probe(&*remote).await;

        // Prefer the server's view of who we are over the env fallback.
        if monitor.is_online() && sessions.is_authenticated() {
            if let Ok(Some(user)) = remote.get_current_user().await {
                if let Some(mut session) = sessions.current() {
                    session.user = user;
                    sessions.set(session);
                }
            }
        }

        let engine = Arc::new(SyncEngine::new(
            store.clone(),
            remote.clone(),
            sessions.clone(),
            monitor.clone(),
            config.clone(),
        ));
        let service =
            PassengerService::new(store, engine.clone(), remote, monitor, sessions, config);

        Ok(Self { service, engine })
    }
}

async fn run_passengers(app: &App, filter: &PassengerFilter, as_json: bool) -> Result<(), CliError> {
    let passengers = app.service.passengers(filter).await;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&passengers)?);
    } else {
        for line in format_passenger_lines(app, &passengers) {
            println!("{line}");
        }
    }
    Ok(())
}

async fn run_board(app: &App, passenger_id: &str, fare: &str) -> Result<(), CliError> {
    let fare = parse_amount(fare)?;
    let outcome = app.service.board(passenger_id, fare).await?;

    let mode = if outcome.offline { "offline" } else { "online" };
    println!(
        "{} boarded ({mode}); balance {}",
        outcome.passenger.full_name, outcome.passenger.current_balance
    );
    Ok(())
}

async fn run_topup(app: &App, passenger_id: &str, amount: &str) -> Result<(), CliError> {
    let amount = parse_amount(amount)?;
    let outcome = app.service.topup(passenger_id, amount).await?;

    let mode = if outcome.offline { "offline" } else { "online" };
    println!(
        "{} topped up ({mode}); balance {}",
        outcome.passenger.full_name, outcome.passenger.current_balance
    );
    Ok(())
}

async fn run_sync(app: &App, force: bool) {
    let report = if force {
        app.service.force_sync_all().await
    } else {
        app.service.sync_now().await
    };
    print_report(&report);
}

async fn run_status(app: &App) {
    let status = app.service.sync_status().await;
    let now_ms = Utc::now().timestamp_millis();

    println!("online:        {}", yes_no(status.is_online));
    println!("authenticated: {}", yes_no(status.is_authenticated));
    println!("syncing:       {}", yes_no(status.is_syncing));
    println!("pending:       {}", status.pending_count);
    match status.last_sync_time {
        Some(timestamp) => {
            println!("last sync:     {}", format_relative_time(timestamp, now_ms));
        }
        None => println!("last sync:     never"),
    }
}

async fn run_pending(app: &App, as_json: bool) -> Result<(), CliError> {
    let entries = app.engine.pending_entries().await;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else if entries.is_empty() {
        println!("No pending transactions");
    } else {
        for line in format_transaction_lines(&entries) {
            println!("{line}");
        }
    }
    Ok(())
}

async fn run_conflicts(app: &App, resolve: Option<ResolveArg>) {
    let stale = app.engine.stale_entries().await;
    if stale.is_empty() {
        println!("No conflicted transactions");
        return;
    }

    for line in format_transaction_lines(&stale) {
        println!("{line}");
    }

    if let Some(arg) = resolve {
        let resolved = app.engine.resolve_stale(arg.into()).await;
        println!("{} entries resolved ({arg:?})", resolved.len());
    }
}

fn run_completions(shell: CompletionShell, output_path: Option<&Path>) -> Result<(), CliError> {
    let mut command = Cli::command();
    let mut buffer = Vec::new();

    match shell {
        CompletionShell::Bash => generate_for_shell(shells::Bash, &mut command, &mut buffer),
        CompletionShell::Zsh => generate_for_shell(shells::Zsh, &mut command, &mut buffer),
        CompletionShell::Fish => generate_for_shell(shells::Fish, &mut command, &mut buffer),
    }

    if let Some(path) = output_path {
        std::fs::write(path, &buffer)?;
        println!("{}", path.display());
    } else {
        io::stdout().write_all(&buffer)?;
    }

    Ok(())
}

fn generate_for_shell<G: Generator>(
    generator: G,
    command: &mut clap::Command,
    buffer: &mut Vec<u8>,
) {
    generate(generator, command, "farebox", buffer);
}

fn print_report(report: &SyncReport) {
    if report.success {
        println!(
            "Sync completed: {} transactions pushed, {} passengers pulled",
            report.synced_transactions, report.synced_passengers
        );
    } else {
        println!(
            "Sync finished with errors: {} transactions pushed, {} passengers pulled",
            report.synced_transactions, report.synced_passengers
        );
        for error in &report.errors {
            eprintln!("  {error}");
        }
    }
}

fn format_passenger_lines(app: &App, passengers: &[PassengerSnapshot]) -> Vec<String> {
    passengers
        .iter()
        .map(|p| {
            let marker = match app.service.tier_of(p.current_balance) {
                BalanceTier::Negative => "!!",
                BalanceTier::Low => " !",
                BalanceTier::Healthy => "  ",
            };
            let active = if p.is_active { "" } else { " (inactive)" };
            format!(
                "{marker} {:<12}  {:<30}  {:>10}  {}{active}",
                p.id, p.full_name, p.current_balance, p.route_id
            )
        })
        .collect()
}

fn format_transaction_lines(entries: &[OfflineTransaction]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    entries
        .iter()
        .map(|t| {
            format!(
                "{}  {:<8}  {:<12}  {:>10}  {}",
                t.id,
                t.transaction_type.to_string(),
                t.passenger_id,
                t.amount,
                format_relative_time(t.timestamp, now_ms)
            )
        })
        .collect()
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

fn parse_amount(raw: &str) -> Result<Decimal, CliError> {
    raw.trim()
        .parse::<Decimal>()
        .map_err(|_| CliError::InvalidAmount(raw.to_string()))
}

fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else {
        format!("{}d ago", diff / day)
    }
}

fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("FAREBOX_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("farebox")
        .join("farebox.db")
}

/// Session assembled from the environment, refined against the server later
fn session_from_env() -> Option<AuthSession> {
    let access_token = env::var("FAREBOX_TOKEN").ok().filter(|t| !t.is_empty())?;
    let expires_at = env::var("FAREBOX_TOKEN_EXPIRES")
        .ok()
        .and_then(|raw| raw.parse::<i64>().ok())
        .unwrap_or_else(|| Utc::now().timestamp() + 12 * 3600);

    Some(AuthSession {
        access_token,
        expires_at,
        user: CurrentUser {
            id: env::var("FAREBOX_USER_ID").unwrap_or_else(|_| "cli".to_string()),
            role: Role::Unknown,
            conductor_id: env::var("FAREBOX_CONDUCTOR_ID").ok(),
            assigned_route_id: env::var("FAREBOX_ROUTE_ID").ok(),
        },
    })
}
