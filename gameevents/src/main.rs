//! gameevents - command line tools for the GameEvents telemetry client
//!
//! This tool provides commands for:
//! - Checking client configuration and the local event backlog
//! - Manually delivering pending events to the collection endpoint
//! - Running a short sample session through the full pipeline
//!
//! Uses XDG Base Directory specification for file locations:
//! - Events: $XDG_DATA_HOME/gameevents/events.db (~/.local/share/gameevents/events.db)
//! - Config: $XDG_CONFIG_HOME/gameevents/config.toml (~/.config/gameevents/config.toml)

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use gameevents_core::delivery::{CollectorClient, EventSender};
use gameevents_core::logging::LoggingGuard;
use gameevents_core::manager::FLUSH_PERIOD;
use gameevents_core::{
    properties, BatchSource, Config, Database, GameEvents, LocalEventStore, StoreStats,
};

/// Frame time of the demo session's coordination loop
const FRAME: Duration = Duration::from_millis(16);

#[derive(Parser)]
#[command(name = "gameevents")]
#[command(about = "Inspect and drive the GameEvents telemetry client")]
#[command(version)]
struct Args {
    /// Write logs to the XDG state directory
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show configuration and local backlog
    Status {
        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },

    /// Deliver pending events now
    Flush {
        /// Project API key
        #[arg(long, env = "GAMEEVENTS_API_KEY")]
        api_key: String,

        /// Events per request (default: from config)
        #[arg(short, long)]
        batch_size: Option<usize>,
    },

    /// Run a short sample session
    Demo {
        /// Project API key
        #[arg(long, env = "GAMEEVENTS_API_KEY")]
        api_key: String,

        /// Log identifiers and attribution payloads at info level
        #[arg(long)]
        debug: bool,

        /// How long to keep ticking after the sample events
        #[arg(long, default_value_t = 2)]
        seconds: u64,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load().context("failed to load configuration")?;

    let _log_guard: Option<LoggingGuard> = if args.verbose {
        Some(
            gameevents_core::logging::init(&config.logging)
                .context("failed to initialize logging")?,
        )
    } else {
        None
    };

    tracing::info!("gameevents CLI starting");

    match args.command {
        Command::Status { json } => cmd_status(&config, json),
        Command::Flush {
            api_key,
            batch_size,
        } => cmd_flush(&config, &api_key, batch_size),
        Command::Demo {
            api_key,
            debug,
            seconds,
        } => cmd_demo(config, &api_key, debug, seconds),
    }
}

/// Open the local store if one exists.
fn open_existing_store() -> Result<Option<Database>> {
    let db_path = Config::database_path();
    if !db_path.exists() {
        return Ok(None);
    }
    let db = Database::open(&db_path).context("failed to open event store")?;
    db.migrate().context("failed to run database migrations")?;
    Ok(Some(db))
}

fn cmd_status(config: &Config, json: bool) -> Result<()> {
    let db = open_existing_store()?;
    let (user_id, stats) = match &db {
        Some(db) => (
            db.get_user_id().context("failed to read user id")?,
            Some(db.stats().context("failed to read backlog stats")?),
        ),
        None => (None, None),
    };

    if json {
        let stats = stats.unwrap_or_default();
        let value = serde_json::json!({
            "server_url": config.collector.base_url(),
            "batch_size": config.collector.batch_size,
            "send_interval_secs": config.sdk.send_interval_secs,
            "flush_period_secs": FLUSH_PERIOD.as_secs(),
            "database": Config::database_path(),
            "user_id": user_id,
            "pending_events": stats.pending_events,
            "retried_events": stats.retried_events,
            "oldest_event_at": stats.oldest_event_at,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    let collector = &config.collector;
    let sdk = &config.sdk;

    println!("GameEvents Client Status");
    println!("========================");
    println!();
    println!("Server URL:      {}", collector.base_url());
    println!("Batch Size:      {}", collector.batch_size);
    println!("Timeout:         {}s", collector.timeout_secs);
    println!("Max Retries:     {}", collector.max_retries);
    println!(
        "Send Interval:   {}s (recurring flush every {}s)",
        sdk.send_interval_secs,
        FLUSH_PERIOD.as_secs()
    );
    println!("Max Name Length: {}", sdk.max_event_name_length);
    println!("Max Properties:  {}", sdk.max_property_count);

    if let Err(e) = collector.validate() {
        println!();
        println!("Configuration error: {}", e);
    }

    println!();
    println!("Database:        {}", Config::database_path().display());

    let Some(stats) = stats else {
        println!("Local store:     <not created>");
        return Ok(());
    };
    print_backlog(user_id.as_deref(), &stats);

    Ok(())
}

fn print_backlog(user_id: Option<&str>, stats: &StoreStats) {
    println!("User ID:         {}", user_id.unwrap_or("<not assigned>"));
    println!("Pending Events:  {}", stats.pending_events);
    println!("Retried Events:  {}", stats.retried_events);
    if let Some(oldest) = stats.oldest_event_at {
        println!("Oldest Event:    {}", oldest.to_rfc3339());
    }
}

fn cmd_flush(config: &Config, api_key: &str, batch_size_override: Option<usize>) -> Result<()> {
    let Some(db) = open_existing_store()? else {
        println!(
            "Nothing to flush: no local store at {}",
            Config::database_path().display()
        );
        return Ok(());
    };

    let batch_size = batch_size_override.unwrap_or(config.collector.batch_size);
    let store = Arc::new(LocalEventStore::new(db, config.collector.max_buffered_events));
    let pending = store.stats()?.pending_events;
    if pending == 0 {
        println!("No pending events.");
        return Ok(());
    }

    let client = CollectorClient::new(config.collector.clone(), api_key)
        .context("failed to create collector client")?;
    let sender = EventSender::new(
        Arc::clone(&store) as Arc<dyn BatchSource>,
        client,
        store.wake_handle(),
        batch_size,
    );

    println!("Delivering {} pending event(s)...", pending);

    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    let report = runtime.block_on(sender.deliver_pending());
    let remaining = store.stats()?.pending_events;

    println!();
    println!("Delivery Summary:");
    println!("  Batches:    {}", report.batches);
    println!("  Accepted:   {}", report.accepted);
    println!("  Rejected:   {}", report.rejected);
    println!("  Remaining:  {}", remaining);

    if let Some(error) = report.error {
        bail!("delivery stopped: {}", error);
    }
    Ok(())
}

fn cmd_demo(config: Config, api_key: &str, debug: bool, seconds: u64) -> Result<()> {
    let debug_enabled = debug;
    tracing::info!(seconds, debug = debug_enabled, "Running demo session");
    let mut events = GameEvents::with_http(config).context("failed to start telemetry client")?;

    events.on_attribution_data_received(|json| println!("Attribution data: {}", json));
    events.request_tracking_authorization(|status| {
        println!("Tracking authorization: {:?} ({})", status, status.code());
    });

    // Logged before initialize: held in the pre-init queue
    events.log_event("app_open", None);
    println!("Queued before initialize: {}", events.pending_calls());

    events.initialize(api_key, debug);
    if !events.is_initialized() {
        bail!("telemetry client failed to initialize; run with --verbose for details");
    }

    events.set_user_property("user_level", 5);
    events.set_user_property("is_premium", true);
    events.set_user_properties(properties([
        ("cohort", "A".into()),
        ("login_method", "email".into()),
    ]));

    events.log_event("game_started", None);
    events.log_event(
        "level_complete",
        Some(properties([
            ("level_name", "Level 1".into()),
            ("difficulty", "Hard".into()),
            ("score", 100.into()),
        ])),
    );

    let deadline = Instant::now() + Duration::from_secs(seconds);
    loop {
        events.tick();
        if Instant::now() >= deadline {
            break;
        }
        std::thread::sleep(FRAME);
    }

    events.on_quit();
    // Let the sender pick up the final flush before stopping it
    std::thread::sleep(FRAME);
    events.tick();

    if let Some(session) = events.manager().session() {
        println!();
        println!("Session Summary:");
        println!("  Session ID:      {}", session.session_id());
        println!("  User ID:         {}", session.user_id());
        println!("  User Properties: {}", session.user_properties().len());
    }
    let stats = events.delivery_stats();
    println!("  Events Sent:     {}", stats.events_sent);
    println!("  API Failures:    {}", stats.api_failures);

    events.shutdown();
    Ok(())
}
