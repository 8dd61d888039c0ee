use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use dosewatch_core::time::local_date;
use dosewatch_core::{
    AdherenceEngine, Clock, EngineConfig, FileBackend, Schedule, StateStore, SystemClock, TokioScheduler,
    daily_summary, messages, weekly_summary,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

mod config;
mod state;
mod telegram;

use config::Config;

const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("DOSEWATCH_BUILD_SHA"), ")");

#[derive(Parser, Debug)]
#[command(name = "dosewatch", version = VERSION, about = "Medication reminders with escalation to an observer")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the reminder bot until interrupted
    Run,

    /// Show which doses were confirmed on a day (default: today). Read-only;
    /// the running bot is the only writer of the state file.
    Status {
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the 7-day adherence summary ending on a day (default: today)
    Week {
        #[arg(long)]
        end: Option<NaiveDate>,

        #[arg(long)]
        json: bool,
    },

    /// Config file commands
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Write ~/.dosewatch/config.toml with defaults (no-op if present)
    Init,

    /// Validate the config and print the effective schedule
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run => run(config::load_config()?).await?,

        Command::Status { date, json } => {
            let cfg = config::load_config()?;
            let (store, schedule) = open_store(&cfg)?;
            let date = match date {
                Some(d) => d,
                None => today(&cfg)?,
            };
            let summary = daily_summary(store.history(), &schedule, date);
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("{}", messages::daily_report(&summary));
            }
        }

        Command::Week { end, json } => {
            let cfg = config::load_config()?;
            let (store, schedule) = open_store(&cfg)?;
            let end = match end {
                Some(d) => d,
                None => today(&cfg)?,
            };
            let summary = weekly_summary(store.history(), &schedule, end);
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("{}", messages::weekly_report(&summary));
            }
        }

        Command::Config { command } => match command {
            ConfigCommand::Init => config::init_config()?,
            ConfigCommand::Check => check_config()?,
        },
    }

    Ok(())
}

fn today(cfg: &Config) -> Result<NaiveDate> {
    Ok(local_date(SystemClock.now(), cfg.offset()?))
}

fn open_store(cfg: &Config) -> Result<(StateStore<FileBackend>, Schedule)> {
    let schedule = cfg.schedule()?;
    let path = state::state_path(cfg.storage.state_file.as_deref())?;
    Ok((StateStore::open(FileBackend::new(path), &schedule), schedule))
}

fn check_config() -> Result<()> {
    let path = config::config_path()?;
    let cfg = config::load_config()?;
    cfg.validate()?;

    println!("Config: {}", path.display());
    println!("UTC offset: {}", cfg.offset()?);
    for slot in cfg.schedule()?.slots() {
        println!(
            "- {} at {} (escalate after {}m)",
            slot.label,
            slot.time_of_day.format("%H:%M"),
            slot.escalation_delay.as_secs() / 60
        );
    }

    let plan = cfg.report_plan()?;
    match plan.daily_at {
        Some(at) => println!("Daily report: {}", at.format("%H:%M")),
        None => println!("Daily report: off"),
    }
    match plan.weekly {
        Some((day, at)) => println!("Weekly report: {day} {}", at.format("%H:%M")),
        None => println!("Weekly report: off"),
    }

    let access = cfg.access_policy();
    let allowed: Vec<String> = access.allowed().map(|i| i.to_string()).collect();
    println!("Allowed: [{}]", allowed.join(", "));
    match access.observer() {
        Some(o) => println!("Observer: {o}"),
        None => println!("Observer: none (missed doses are only logged)"),
    }
    println!("State file: {}", state::state_path(cfg.storage.state_file.as_deref())?.display());

    if std::env::var(&cfg.telegram.token_env).is_err() {
        println!("Warning: {} is not set; `dosewatch run` will fail", cfg.telegram.token_env);
    }
    Ok(())
}

async fn run(cfg: Config) -> Result<()> {
    cfg.validate()?;
    let token = cfg.bot_token()?;
    let offset = cfg.offset()?;
    let schedule = cfg.schedule()?;
    let engine_config = EngineConfig {
        schedule: schedule.clone(),
        access: cfg.access_policy(),
        offset,
        reports: cfg.report_plan()?,
    };

    let poll_timeout = Duration::from_secs(cfg.telegram.poll_timeout_secs);
    let client = Arc::new(telegram::TelegramClient::new(&cfg.telegram.api_base, &token, poll_timeout)?);

    let path = state::state_path(cfg.storage.state_file.as_deref())?;
    tracing::info!(state = %path.display(), slots = schedule.slots().len(), "starting dosewatch");
    let store = StateStore::open(FileBackend::new(path), &schedule);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (tx, rx) = mpsc::unbounded_channel();
    let scheduler = TokioScheduler::new(tx.clone(), offset, clock.clone());
    let engine = AdherenceEngine::new(engine_config, store, client.clone(), scheduler, clock.clone());
    engine.start().await;

    let poller = tokio::spawn(telegram::poll_updates(client, tx, clock, poll_timeout));

    tokio::select! {
        _ = engine.run(rx) => {}
        res = tokio::signal::ctrl_c() => {
            res.context("listen for ctrl-c")?;
            tracing::info!("interrupted; shutting down");
        }
    }

    poller.abort();
    Ok(())
}
