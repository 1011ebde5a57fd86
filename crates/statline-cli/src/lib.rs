//! Command surface for the stat tracker.
//!
//! Embedders can drive it at three levels:
//! - [`run_cli`] for full parsed CLI execution.
//! - [`run_tracker_with_db`] for direct [`TrackerCommand`] execution against a DB path.
//! - [`run_tracker`] for execution against an existing [`SqliteTrackerStore`].

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::Value;
use statline_core::{
    build_history_view, format_day, parse_day, today_utc, EntryValues, HistoryView, MetricType,
    RatingRuleset, RatingSnapshot,
};
use statline_store_sqlite::{EntryMutation, SqliteTrackerStore};
use time::Date;

#[derive(Debug, Parser)]
#[command(name = "statline")]
#[command(about = "Per-day gaming stat tracker with a replayed skill rating")]
pub struct Cli {
    #[arg(long, env = "STATLINE_DB", default_value = "./statline.sqlite3")]
    db: PathBuf,

    #[command(subcommand)]
    command: TrackerCommand,
}

#[derive(Debug, Subcommand)]
pub enum TrackerCommand {
    Log {
        #[command(subcommand)]
        command: LogCommand,
    },
    Entry {
        #[command(subcommand)]
        command: EntryCommand,
    },
    Day {
        #[command(subcommand)]
        command: DayCommand,
    },
    History(HistoryArgs),
    Rating {
        #[command(subcommand)]
        command: RatingCommand,
    },
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum LogCommand {
    Kda(LogKdaArgs),
    Hsr(LogHsrArgs),
    Adr(LogAdrArgs),
}

#[derive(Debug, Args)]
pub struct LogKdaArgs {
    #[arg(long)]
    kills: i64,
    #[arg(long)]
    deaths: i64,
    #[arg(long)]
    assists: i64,
    #[command(flatten)]
    day: DayArgs,
}

#[derive(Debug, Args)]
pub struct LogHsrArgs {
    #[arg(long)]
    rate: f64,
    #[command(flatten)]
    day: DayArgs,
}

#[derive(Debug, Args)]
pub struct LogAdrArgs {
    #[arg(long)]
    value: f64,
    #[command(flatten)]
    day: DayArgs,
}

/// Date selection shared by commands that write to a day.
#[derive(Debug, Args)]
pub struct DayArgs {
    /// Day to write to, `YYYY-MM-DD`. Defaults to today (UTC).
    #[arg(long)]
    date: Option<String>,
    /// Overrides the "today" used for the rating refresh.
    #[arg(long)]
    today: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum EntryCommand {
    Edit(EntryEditArgs),
    Delete(EntryTargetArgs),
}

#[derive(Debug, Args)]
pub struct EntryTargetArgs {
    #[arg(long)]
    metric: MetricArg,
    #[arg(long)]
    date: String,
    /// Entry id, or `legacy` for days recorded before per-entry ids.
    #[arg(long)]
    entry_id: String,
    #[arg(long)]
    today: Option<String>,
}

#[derive(Debug, Args)]
pub struct EntryEditArgs {
    #[command(flatten)]
    target: EntryTargetArgs,
    #[arg(long)]
    kills: Option<i64>,
    #[arg(long)]
    deaths: Option<i64>,
    #[arg(long)]
    assists: Option<i64>,
    /// New value for hsr or adr entries.
    #[arg(long)]
    value: Option<f64>,
}

#[derive(Debug, Subcommand)]
pub enum DayCommand {
    Show(DayShowArgs),
    Delete(DayDeleteArgs),
}

#[derive(Debug, Args)]
pub struct DayShowArgs {
    #[arg(long)]
    metric: MetricArg,
    #[arg(long)]
    date: String,
}

#[derive(Debug, Args)]
pub struct DayDeleteArgs {
    #[arg(long)]
    metric: MetricArg,
    #[arg(long)]
    date: String,
    #[arg(long)]
    today: Option<String>,
}

#[derive(Debug, Args)]
pub struct HistoryArgs {
    #[arg(long)]
    metric: MetricArg,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Subcommand)]
pub enum RatingCommand {
    Show(RatingShowArgs),
    Refresh(RatingRefreshArgs),
}

#[derive(Debug, Args)]
pub struct RatingShowArgs {
    #[arg(long)]
    metric: MetricArg,
    #[arg(long)]
    today: Option<String>,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
pub struct RatingRefreshArgs {
    #[arg(long)]
    today: Option<String>,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    Show,
    SetMultiplier(SetMultiplierArgs),
    LoadRuleset(LoadRulesetArgs),
}

#[derive(Debug, Args)]
pub struct SetMultiplierArgs {
    #[arg(long)]
    value: f64,
    #[arg(long)]
    today: Option<String>,
}

#[derive(Debug, Args)]
pub struct LoadRulesetArgs {
    #[arg(long)]
    file: PathBuf,
    #[arg(long)]
    today: Option<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum MetricArg {
    Kda,
    Hsr,
    Adr,
}

impl From<MetricArg> for MetricType {
    fn from(value: MetricArg) -> Self {
        match value {
            MetricArg::Kda => Self::Kda,
            MetricArg::Hsr => Self::HeadshotRate,
            MetricArg::Adr => Self::Damage,
        }
    }
}

/// Executes the parsed top-level CLI command graph.
///
/// # Errors
/// Returns an error when store open/migrate fails or the command fails.
pub fn run_cli(cli: Cli) -> Result<()> {
    run_tracker_with_db(&cli.db, cli.command)
}

/// Executes a parsed tracker command using the provided `SQLite` DB path.
///
/// # Errors
/// Returns an error when store open/migrate fails or the requested command fails.
pub fn run_tracker_with_db(db_path: &Path, command: TrackerCommand) -> Result<()> {
    let mut store = SqliteTrackerStore::open(db_path)?;
    store.migrate()?;
    run_tracker(command, &mut store)
}

/// Executes a parsed tracker command against an existing store handle.
///
/// # Errors
/// Returns an error when argument validation, persistence, or rating
/// refresh fails.
pub fn run_tracker(command: TrackerCommand, store: &mut SqliteTrackerStore) -> Result<()> {
    match command {
        TrackerCommand::Log { command } => run_log(command, store),
        TrackerCommand::Entry { command } => run_entry(command, store),
        TrackerCommand::Day { command } => run_day(command, store),
        TrackerCommand::History(args) => {
            let metric = MetricType::from(args.metric);
            let history = store.list_history(metric)?;
            let view = build_history_view(&history, metric);

            if args.json {
                println!("{}", serde_json::to_string_pretty(&view)?);
            } else {
                print_history_table(&view);
            }
            Ok(())
        }
        TrackerCommand::Rating { command } => run_rating(command, store),
        TrackerCommand::Config { command } => run_config(command, store),
    }
}

fn run_log(command: LogCommand, store: &mut SqliteTrackerStore) -> Result<()> {
    let (metric, values, day) = match command {
        LogCommand::Kda(args) => (
            MetricType::Kda,
            EntryValues::kda(args.kills, args.deaths, args.assists),
            args.day,
        ),
        LogCommand::Hsr(args) => (
            MetricType::HeadshotRate,
            EntryValues::rate(MetricType::HeadshotRate, args.rate),
            args.day,
        ),
        LogCommand::Adr(args) => (
            MetricType::Damage,
            EntryValues::rate(MetricType::Damage, args.value),
            args.day,
        ),
    };

    let today = parse_today(day.today.as_deref())?;
    let date = match day.date.as_deref() {
        Some(raw) => parse_date_arg("--date", raw)?,
        None => today,
    };

    let mutation = store.log_entry(metric, date, values, today)?;
    print_mutation(&mutation)
}

fn run_entry(command: EntryCommand, store: &mut SqliteTrackerStore) -> Result<()> {
    match command {
        EntryCommand::Edit(args) => {
            let metric = MetricType::from(args.target.metric);
            let values = edit_values(metric, &args)?;
            let date = parse_date_arg("--date", &args.target.date)?;
            let today = parse_today(args.target.today.as_deref())?;

            let mutation =
                store.edit_entry(metric, date, &args.target.entry_id, values, today)?;
            print_mutation(&mutation)
        }
        EntryCommand::Delete(args) => {
            let metric = MetricType::from(args.metric);
            let date = parse_date_arg("--date", &args.date)?;
            let today = parse_today(args.today.as_deref())?;

            let mutation = store.delete_entry(metric, date, &args.entry_id, today)?;
            print_mutation(&mutation)
        }
    }
}

fn run_day(command: DayCommand, store: &mut SqliteTrackerStore) -> Result<()> {
    match command {
        DayCommand::Show(args) => {
            let metric = MetricType::from(args.metric);
            let date = parse_date_arg("--date", &args.date)?;

            let Some(day) = store.get_day(metric, date)? else {
                return Err(anyhow!(
                    "no {} day logged for {}",
                    metric,
                    format_day(date)
                ));
            };

            println!("{}", serde_json::to_string_pretty(&day)?);
            Ok(())
        }
        DayCommand::Delete(args) => {
            let metric = MetricType::from(args.metric);
            let date = parse_date_arg("--date", &args.date)?;
            let today = parse_today(args.today.as_deref())?;

            let removal = store.delete_day(metric, date, today)?;
            println!("{}", serde_json::to_string_pretty(&removal)?);
            Ok(())
        }
    }
}

fn run_rating(command: RatingCommand, store: &mut SqliteTrackerStore) -> Result<()> {
    match command {
        RatingCommand::Show(args) => {
            let metric = MetricType::from(args.metric);
            let today = parse_today(args.today.as_deref())?;
            let snapshot = store.refresh_rating(metric, today)?;

            if args.json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                print_snapshot(&snapshot);
            }
            Ok(())
        }
        RatingCommand::Refresh(args) => {
            let today = parse_today(args.today.as_deref())?;
            let snapshots = store.refresh_all(today)?;

            if args.json {
                println!("{}", serde_json::to_string_pretty(&snapshots)?);
            } else {
                print_snapshot_table(&snapshots);
            }
            Ok(())
        }
    }
}

fn run_config(command: ConfigCommand, store: &mut SqliteTrackerStore) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            let settings = store.settings()?;
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(())
        }
        ConfigCommand::SetMultiplier(args) => {
            let today = parse_today(args.today.as_deref())?;
            let update = store.set_target_multiplier(args.value, today)?;
            println!("{}", serde_json::to_string_pretty(&update)?);
            Ok(())
        }
        ConfigCommand::LoadRuleset(args) => {
            let ruleset = read_ruleset_file(&args.file)?;
            let today = parse_today(args.today.as_deref())?;

            let active = store.load_ruleset(&ruleset)?;
            store.refresh_all(today)?;

            println!("{}", serde_json::to_string_pretty(&active)?);
            Ok(())
        }
    }
}

fn edit_values(metric: MetricType, args: &EntryEditArgs) -> Result<EntryValues> {
    match metric {
        MetricType::Kda => {
            if args.value.is_some() {
                return Err(anyhow!("--value applies to hsr and adr entries only"));
            }
            let (Some(kills), Some(deaths), Some(assists)) = (args.kills, args.deaths, args.assists)
            else {
                return Err(anyhow!(
                    "--kills, --deaths and --assists are required to edit a kda entry"
                ));
            };
            Ok(EntryValues::kda(kills, deaths, assists))
        }
        MetricType::HeadshotRate | MetricType::Damage => {
            if args.kills.is_some() || args.deaths.is_some() || args.assists.is_some() {
                return Err(anyhow!("--kills/--deaths/--assists apply to kda entries only"));
            }
            let Some(value) = args.value else {
                return Err(anyhow!("--value is required to edit a {metric} entry"));
            };
            Ok(EntryValues::rate(metric, value))
        }
    }
}

fn read_ruleset_file(path: &Path) -> Result<RatingRuleset> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read ruleset file {}", path.display()))?;
    let value: Value = serde_json::from_str(&raw)
        .with_context(|| format!("ruleset file must be valid JSON: {}", path.display()))?;
    RatingRuleset::from_json(&value).map_err(|err| anyhow!("invalid ruleset file: {err}"))
}

fn parse_date_arg(flag: &str, raw: &str) -> Result<Date> {
    parse_day(raw).map_err(|err| anyhow!("invalid {flag} value: {err}"))
}

fn parse_today(raw: Option<&str>) -> Result<Date> {
    match raw {
        Some(value) => parse_date_arg("--today", value),
        None => Ok(today_utc()),
    }
}

fn print_mutation(mutation: &EntryMutation) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(mutation)?);
    Ok(())
}

fn print_history_table(view: &HistoryView) {
    let metric = view.metric;
    if let Some(message) = &view.empty_message {
        println!("{message}");
        return;
    }

    println!(
        "overall {}={} days={} entries={}",
        metric.label(),
        metric.format_value(view.summary.overall),
        view.summary.days_logged,
        view.summary.total_entries
    );
    println!(
        "{:<10} {:<14} {:<10} {:<7} entry_ids",
        "date", "score", "value", "entries"
    );
    println!("{}", "-".repeat(80));

    for row in &view.rows {
        println!(
            "{:<10} {:<14} {:<10} {:<7} {}",
            format_day(row.date),
            row.score,
            row.value_text,
            row.entry_count,
            row.entries
                .iter()
                .map(|entry| entry.key.as_str())
                .collect::<Vec<_>>()
                .join(",")
        );
    }
}

fn print_snapshot(snapshot: &RatingSnapshot) {
    let metric = snapshot.metric;
    println!(
        "metric={} rating={} ruleset={} computed_for={}",
        metric,
        snapshot.rating,
        snapshot.ruleset_version,
        format_day(snapshot.computed_for)
    );
    println!(
        "current={} baseline={} target={} multiplier={:.2} momentum={:+.1}%",
        snapshot.current_label(),
        metric.format_value(snapshot.baseline),
        metric.format_value(snapshot.target),
        snapshot.multiplier,
        snapshot.momentum
    );
    println!(
        "risk={:.1}% level={} days={} entries={} time_invested_minutes={}",
        snapshot.risk,
        snapshot.risk_level.as_str(),
        snapshot.data_points,
        snapshot.total_entries,
        snapshot.time_invested_minutes
    );
}

fn print_snapshot_table(snapshots: &[RatingSnapshot]) {
    println!(
        "{:<6} {:<7} {:<10} {:<10} {:<9} {:<8} entries",
        "metric", "rating", "current", "target", "momentum", "risk"
    );
    println!("{}", "-".repeat(70));
    for snapshot in snapshots {
        let momentum = format!("{:+.1}%", snapshot.momentum);
        let risk = format!("{:.1}%", snapshot.risk);
        println!(
            "{:<6} {:<7} {:<10} {:<10} {:<9} {:<8} {}",
            snapshot.metric.as_str(),
            snapshot.rating,
            snapshot.current_label(),
            snapshot.metric.format_value(snapshot.target),
            momentum,
            risk,
            snapshot.total_entries
        );
    }
}
