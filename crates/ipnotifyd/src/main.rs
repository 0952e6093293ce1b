// # ipnotifyd - IP change notifier
//
// Thin integration layer: reads configuration, wires the HTTP resolver and the
// Discord notifier into the core `CheckEngine`, and runs one of the CLI modes.
// Change detection, policy and history all live in ipnotify-core.
//
// ## Modes
//
// - `--daemon`: scheduled check once a day at `SCHEDULE_TIME`, until SIGINT/SIGTERM
// - `--manual`: one check that always notifies
// - `--test`: one check that neither notifies nor records
// - `--status`: history statistics and the next scheduled run
// - `--check`: effective configuration, secrets masked; `--test-webhook` also
//   posts a test message
//
// ## Configuration
//
// Environment variables, optionally seeded from `--env-file` (default `.env`).
// Variables already set in the environment win over the file.
//
// ```bash
// export DISCORD_WEBHOOK_URL=https://discord.com/api/webhooks/<id>/<token>
// export SCHEDULE_TIME=09:00
// export IP_HISTORY_FILE=/var/lib/ipnotify/ip_history.json
//
// ipnotifyd --daemon
// ```

mod config;
mod scheduler;

use anyhow::Result;
use clap::{ArgGroup, Parser};
use ipnotify_core::{AppConfig, CheckEngine, CheckEvent, CheckMode, CheckResult, HistoryStore};
use ipnotify_notifier_discord::DiscordNotifier;
use ipnotify_resolver_http::HttpIpResolver;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Capacity of the engine event channel
const EVENT_CAPACITY: usize = 64;

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IpnotifyExitCode {
    /// Clean exit
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Check failed or unexpected runtime failure
    RuntimeError = 2,
}

impl From<IpnotifyExitCode> for ExitCode {
    fn from(code: IpnotifyExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "ipnotifyd",
    about = "Watch the public IP and announce changes to a Discord webhook",
    version
)]
#[command(group(
    ArgGroup::new("mode")
        .required(true)
        .args(["daemon", "manual", "test", "status", "check"])
))]
struct Args {
    /// Run the daily scheduler until interrupted
    #[arg(long)]
    daemon: bool,

    /// Run one check and always send a notification
    #[arg(long)]
    manual: bool,

    /// Run one check without notifying or recording
    #[arg(long)]
    test: bool,

    /// Show history statistics
    #[arg(long)]
    status: bool,

    /// Show the effective configuration
    #[arg(long)]
    check: bool,

    /// With --check, also post a test message to the webhook
    #[arg(long, requires = "check")]
    test_webhook: bool,

    /// Debug logging regardless of LOG_LEVEL
    #[arg(long, short)]
    verbose: bool,

    /// Environment file to load before reading configuration
    #[arg(long, value_name = "PATH", default_value = ".env")]
    env_file: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Daemon,
    Manual,
    Test,
    Status,
    Check,
}

impl Mode {
    fn from_args(args: &Args) -> Self {
        if args.daemon {
            Mode::Daemon
        } else if args.manual {
            Mode::Manual
        } else if args.test {
            Mode::Test
        } else if args.status {
            Mode::Status
        } else {
            Mode::Check
        }
    }

    /// Modes that build a notifier need a webhook
    fn requires_webhook(self, test_webhook: bool) -> bool {
        matches!(self, Mode::Daemon | Mode::Manual | Mode::Test) || test_webhook
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    let mode = Mode::from_args(&args);

    // Missing file is fine, the environment may already be complete
    dotenvy::from_path(&args.env_file).ok();

    let loaded = config::from_env();
    let app_config = loaded.config;

    if let Err(e) = config::validate(&app_config, mode.requires_webhook(args.test_webhook)) {
        eprintln!("Configuration validation error: {}", e);
        return IpnotifyExitCode::ConfigError.into();
    }

    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        parse_level(&app_config.log_level)
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return IpnotifyExitCode::ConfigError.into();
    }

    for warning in &loaded.warnings {
        warn!("{}", warning);
    }

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return IpnotifyExitCode::RuntimeError.into();
        }
    };

    let code = rt.block_on(async {
        match run(mode, app_config, args.test_webhook).await {
            Ok(code) => code,
            Err(e) => {
                error!("{:#}", e);
                IpnotifyExitCode::RuntimeError
            }
        }
    });

    code.into()
}

async fn run(mode: Mode, app_config: AppConfig, test_webhook: bool) -> Result<IpnotifyExitCode> {
    match mode {
        Mode::Daemon => run_daemon(app_config).await,
        Mode::Manual => run_once(app_config, CheckMode::Manual).await,
        Mode::Test => run_once(app_config, CheckMode::Test).await,
        Mode::Status => show_status(app_config).await,
        Mode::Check => {
            show_config(&app_config);
            if test_webhook {
                test_webhook_connection(&app_config).await
            } else {
                Ok(IpnotifyExitCode::CleanShutdown)
            }
        }
    }
}

fn parse_level(level: &str) -> Level {
    match level.trim().to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Wire the store, resolver and notifier into an engine
async fn build_engine(app_config: &AppConfig) -> Result<(CheckEngine, mpsc::Receiver<CheckEvent>)> {
    let store = Arc::new(HistoryStore::open(app_config.history.clone()).await?);
    let resolver = HttpIpResolver::new(app_config.resolver.clone())?;
    let notifier = DiscordNotifier::new(app_config.discord.clone())?;

    info!(
        "History at {}, notifying {}",
        store.path().display(),
        notifier.masked_url()
    );

    Ok(CheckEngine::new(
        Box::new(resolver),
        store,
        Box::new(notifier),
        EVENT_CAPACITY,
    ))
}

async fn run_daemon(app_config: AppConfig) -> Result<IpnotifyExitCode> {
    info!("Starting ipnotifyd daemon");

    let (hour, minute) = app_config.scheduler.daily_time_parts()?;
    let schedule = scheduler::Schedule {
        hour,
        minute,
        status_interval: Duration::from_secs(app_config.scheduler.status_update_interval_secs),
        max_execution_history: app_config.scheduler.max_execution_history,
    };

    let (engine, events) = build_engine(&app_config).await?;
    scheduler::run(engine, events, schedule, wait_for_shutdown()).await?;

    info!("Shutting down daemon");
    Ok(IpnotifyExitCode::CleanShutdown)
}

async fn run_once(app_config: AppConfig, mode: CheckMode) -> Result<IpnotifyExitCode> {
    let (engine, _events) = build_engine(&app_config).await?;

    let result = if mode == CheckMode::Test {
        // Decision only: nothing is sent, nothing is recorded
        engine.perform_check(mode).await?
    } else {
        engine.run_check(mode).await?
    };

    print_result(&result);

    Ok(match result.error {
        Some(_) => IpnotifyExitCode::RuntimeError,
        None => IpnotifyExitCode::CleanShutdown,
    })
}

fn print_result(result: &CheckResult) {
    println!("mode:           {}", result.mode);
    println!("public IP:      {}", result.public_ip);
    println!("local IP:       {}", result.local_ip);
    println!("changed:        {}", result.has_changed);
    println!("notify:         {}", result.should_notify);
    println!("duration:       {:.2}s", result.execution_duration);
    for warning in &result.warnings {
        println!("warning:        {}", warning);
    }
    if let Some(error) = &result.error {
        println!("error:          {}", error);
    }
}

async fn show_status(app_config: AppConfig) -> Result<IpnotifyExitCode> {
    let store = HistoryStore::open(app_config.history.clone()).await?;
    let stats = store.get_history_stats().await;

    println!("History file:   {} ({})", store.path().display(), stats.history_file_size);
    println!("Created:        {}", stats.metadata.created_at.to_rfc3339());
    println!(
        "Current IP:     {} (local {})",
        stats.current_status.public_ip.as_deref().unwrap_or("unknown"),
        stats.current_status.local_ip.as_deref().unwrap_or("unknown")
    );
    println!("Total checks:   {}", stats.statistics.total_checks);
    println!("IP changes:     {}", stats.statistics.total_ip_changes);
    println!(
        "Notifications:  {} sent, {} failed",
        stats.statistics.total_notifications_sent, stats.statistics.total_notification_failures
    );
    for (mode, share) in &stats.frequency_percentage {
        println!("  {:<12} {:.1}%", mode, share);
    }
    println!("Records kept:   {}", stats.total_history_records);

    let (hour, minute) = app_config.scheduler.daily_time_parts()?;
    match scheduler::next_run_after(&chrono::Local::now(), hour, minute) {
        Some(next) => println!("Next run:       {}", next.format("%Y-%m-%d %H:%M %Z")),
        None => println!("Next run:       unknown"),
    }

    if !stats.recent_activity.is_empty() {
        println!("Recent activity:");
        for record in &stats.recent_activity {
            println!(
                "  {} {:<9} {:<15} changed={} notified={}",
                record.timestamp.format("%Y-%m-%d %H:%M:%S"),
                record.mode,
                record.public_ip.as_deref().unwrap_or("-"),
                record.ip_changed,
                record.notification_sent
            );
        }
    }

    Ok(IpnotifyExitCode::CleanShutdown)
}

fn show_config(app_config: &AppConfig) {
    for (section, entries) in config::describe(app_config) {
        println!("[{}]", section);
        for (key, value) in entries {
            println!("  {:<28} {}", key, value);
        }
    }
    println!("Configuration OK");
}

/// Post the fixed test message to the configured webhook
async fn test_webhook_connection(app_config: &AppConfig) -> Result<IpnotifyExitCode> {
    let notifier = DiscordNotifier::new(app_config.discord.clone())?;

    match notifier.test_connection().await {
        Ok(()) => {
            println!("Webhook test:   delivered to {}", notifier.masked_url());
            Ok(IpnotifyExitCode::CleanShutdown)
        }
        Err(e) => {
            println!("Webhook test:   failed: {}", e);
            Ok(IpnotifyExitCode::RuntimeError)
        }
    }
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
///
/// # Returns
///
/// Returns the name of the signal received.
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    let received = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };
    Ok(received)
}

/// Wait for Ctrl-C
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
