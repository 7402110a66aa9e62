//! `schedule` CLI: run the pure scheduling operations over JSON files.
//!
//! ## Usage
//!
//! ```sh
//! # Check a requested interval for conflicts (stdin → stdout)
//! schedule check < request.json
//!
//! # Same, exiting with status 2 when the interval cannot be booked
//! schedule check -i request.json --fail-on-conflict
//!
//! # Expand a recurring series into concrete occurrences
//! schedule expand -i series.json -o occurrences.json
//!
//! # Suggest alternatives for a rejected interval
//! schedule suggest -i request.json --max-results 3
//! ```
//!
//! Limits not given on the command line come from the `SCHEDULE_*`
//! environment variables read by `SchedulingConfig::from_env`.

use std::io::{self, Read};
use std::process;

use anyhow::{Context, Result};
use chrono::Duration;
use chrono_tz::Tz;
use clap::{Parser, Subcommand};
use schedule_engine::conflict::{check_conflicts, CheckOptions};
use schedule_engine::expander::{expand_from, MAX_HORIZON_DAYS};
use schedule_engine::model::{Conflict, ExistingSession, Participant};
use schedule_engine::suggest::{suggest, AlternativeTime, MAX_SEARCH_DAYS, MAX_STEP_MINUTES};
use schedule_engine::zone::parse_timezone;
use schedule_engine::{RecurrenceSpec, SchedulingConfig, TimeInterval};
use serde::{Deserialize, Serialize};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Exit status of `check --fail-on-conflict` when conflicts were found.
const CONFLICT_EXIT_CODE: i32 = 2;

#[derive(Parser)]
#[command(
    name = "schedule",
    version,
    about = "Therapy session scheduling: conflicts, recurrence and alternatives"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Report why an interval cannot be booked (empty list when it can)
    Check {
        /// Input file (reads from stdin if omitted)
        #[arg(short, long)]
        input: Option<String>,
        /// Output file (writes to stdout if omitted)
        #[arg(short, long)]
        output: Option<String>,
        /// Exit with status 2 when any conflict is reported
        #[arg(long)]
        fail_on_conflict: bool,
    },
    /// Expand a recurrence rule from its first occurrence
    Expand {
        #[arg(short, long)]
        input: Option<String>,
        #[arg(short, long)]
        output: Option<String>,
        /// Stop after this many occurrences
        #[arg(long)]
        max: Option<usize>,
        /// Ignore occurrences more than this many days after the first
        #[arg(long, value_parser = clap::value_parser!(i64).range(1..=MAX_HORIZON_DAYS))]
        horizon_days: Option<i64>,
    },
    /// Rank alternative intervals near a rejected one
    Suggest {
        #[arg(short, long)]
        input: Option<String>,
        #[arg(short, long)]
        output: Option<String>,
        /// Days searched on each side of the requested day
        #[arg(long, value_parser = clap::value_parser!(i64).range(0..=MAX_SEARCH_DAYS))]
        search_days: Option<i64>,
        /// Minutes between candidate start times
        #[arg(long, value_parser = clap::value_parser!(i64).range(1..=MAX_STEP_MINUTES))]
        step_minutes: Option<i64>,
        #[arg(long)]
        max_results: Option<usize>,
    },
}

/// Input shared by `check` and `suggest`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SlotInput {
    interval: TimeInterval,
    therapist: Participant,
    client: Participant,
    #[serde(default)]
    existing: Vec<ExistingSession>,
    #[serde(default)]
    time_zone: Option<String>,
    #[serde(default)]
    exclude_session_id: Option<String>,
}

impl SlotInput {
    fn zone(&self) -> Result<Tz> {
        zone_or_utc(self.time_zone.as_deref())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExpandInput {
    /// The first occurrence.
    interval: TimeInterval,
    recurrence: RecurrenceSpec,
    #[serde(default)]
    time_zone: Option<String>,
}

#[derive(Serialize)]
struct CheckOutput {
    bookable: bool,
    conflicts: Vec<Conflict>,
}

#[derive(Serialize)]
struct ExpandOutput {
    count: usize,
    occurrences: Vec<TimeInterval>,
}

#[derive(Serialize)]
struct SuggestOutput {
    conflicts: Vec<Conflict>,
    alternatives: Vec<AlternativeTime>,
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let config = SchedulingConfig::from_env().context("Invalid SCHEDULE_* environment")?;

    match cli.command {
        Commands::Check {
            input,
            output,
            fail_on_conflict,
        } => {
            let request: SlotInput = read_json(input.as_deref())?;
            let conflicts = run_check(&request)?;
            let blocked = !conflicts.is_empty();
            write_json(
                output.as_deref(),
                &CheckOutput {
                    bookable: !blocked,
                    conflicts,
                },
            )?;
            if blocked && fail_on_conflict {
                process::exit(CONFLICT_EXIT_CODE);
            }
        }
        Commands::Expand {
            input,
            output,
            max,
            horizon_days,
        } => {
            let request: ExpandInput = read_json(input.as_deref())?;
            let mut limits = config.expansion;
            if let Some(max) = max {
                limits.max_occurrences = max;
            }
            if let Some(days) = horizon_days {
                limits.horizon = Duration::days(days);
            }

            let tz = zone_or_utc(request.time_zone.as_deref())?;
            let rule = request
                .recurrence
                .to_rule(tz)
                .context("Failed to parse recurrence")?;
            let occurrences = expand_from(&rule, &request.interval, &limits)
                .context("Failed to expand recurrence")?
                .to_vec();
            debug!(rule = %rule, count = occurrences.len(), "expanded");
            write_json(
                output.as_deref(),
                &ExpandOutput {
                    count: occurrences.len(),
                    occurrences,
                },
            )?;
        }
        Commands::Suggest {
            input,
            output,
            search_days,
            step_minutes,
            max_results,
        } => {
            let request: SlotInput = read_json(input.as_deref())?;
            let mut options = config.suggest;
            options.time_zone = request.zone()?;
            options.exclude_session_id = request.exclude_session_id.clone();
            if let Some(days) = search_days {
                options.search_days = days;
            }
            if let Some(step) = step_minutes {
                options.step_minutes = step;
            }
            if let Some(max) = max_results {
                options.max_results = max;
            }

            let conflicts = run_check(&request)?;
            let alternatives = suggest(
                &request.interval,
                &conflicts,
                &request.therapist,
                &request.client,
                &request.existing,
                &options,
            );
            write_json(
                output.as_deref(),
                &SuggestOutput {
                    conflicts,
                    alternatives,
                },
            )?;
        }
    }

    Ok(())
}

fn run_check(request: &SlotInput) -> Result<Vec<Conflict>> {
    let mut options = CheckOptions::in_zone(request.zone()?);
    options.exclude_session_id = request.exclude_session_id.clone();
    Ok(check_conflicts(
        &request.interval,
        &request.therapist,
        &request.client,
        &request.existing,
        &options,
    ))
}

fn zone_or_utc(name: Option<&str>) -> Result<Tz> {
    match name {
        Some(name) => parse_timezone(name).context("Invalid timeZone"),
        None => Ok(Tz::UTC),
    }
}

/// Logs go to stderr so stdout stays valid JSON. `RUST_LOG` overrides the
/// default `warn` level.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .compact()
        .init();
}

fn read_json<T: for<'de> Deserialize<'de>>(path: Option<&str>) -> Result<T> {
    let raw = read_input(path)?;
    serde_json::from_str(&raw).context("Failed to parse input JSON")
}

fn write_json<T: Serialize>(path: Option<&str>, value: &T) -> Result<()> {
    let mut pretty = serde_json::to_string_pretty(value)?;
    pretty.push('\n');
    write_output(path, &pretty)
}

fn read_input(path: Option<&str>) -> Result<String> {
    match path {
        Some(path) => {
            std::fs::read_to_string(path).with_context(|| format!("Failed to read file: {}", path))
        }
        None => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read from stdin")?;
            Ok(buf)
        }
    }
}

fn write_output(path: Option<&str>, content: &str) -> Result<()> {
    match path {
        Some(path) => {
            std::fs::write(path, content)
                .with_context(|| format!("Failed to write file: {}", path))?;
        }
        None => {
            print!("{}", content);
        }
    }
    Ok(())
}
