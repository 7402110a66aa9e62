//! Recurrence expansion -- converts recurrence rules into concrete session intervals.
//!
//! Candidate local start times come from the `rrule` crate (RFC 5545) anchored
//! with `DTSTART;TZID=...`, so each occurrence keeps its wall-clock time and
//! picks up whatever UTC offset is in force on its own date. COUNT, UNTIL and
//! exception dates are applied here rather than inside the rrule set: an
//! excepted occurrence is skipped without consuming the count.
//!
//! An [`Expansion`] is a pure function of its inputs. Every call to
//! [`Expansion::iter`] restarts from the seed and yields the same sequence.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use rrule::RRuleSet;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SchedulingError};
use crate::interval::{parse_instant, TimeInterval};
use crate::zone::{self, DstPolicy};

/// RFC 5545 rule parts forwarded to the rrule crate untouched.
const PASSTHROUGH_KEYS: &[&str] = &["BYSETPOS", "BYMONTHDAY", "BYMONTH", "BYYEARDAY", "BYWEEKNO", "WKST"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Frequency {
    fn as_str(self) -> &'static str {
        match self {
            Frequency::Daily => "DAILY",
            Frequency::Weekly => "WEEKLY",
            Frequency::Monthly => "MONTHLY",
            Frequency::Yearly => "YEARLY",
        }
    }
}

/// A parsed recurrence rule with its exception set and timezone.
///
/// When both `count` and `until` are present, whichever is reached first ends
/// the series.
#[derive(Debug, Clone, PartialEq)]
pub struct RecurrenceRule {
    pub frequency: Frequency,
    pub interval: u32,
    pub by_weekday: Vec<Weekday>,
    pub count: Option<u32>,
    pub until: Option<DateTime<Utc>>,
    pub exceptions: BTreeSet<DateTime<Utc>>,
    pub time_zone: Tz,
    passthrough: Vec<(String, String)>,
}

impl RecurrenceRule {
    /// A plain rule: every `interval` units of `frequency`, unbounded.
    pub fn new(frequency: Frequency, time_zone: Tz) -> Self {
        Self {
            frequency,
            interval: 1,
            by_weekday: Vec::new(),
            count: None,
            until: None,
            exceptions: BTreeSet::new(),
            time_zone,
            passthrough: Vec::new(),
        }
    }

    pub fn with_interval(mut self, interval: u32) -> Self {
        self.interval = interval;
        self
    }

    pub fn on(mut self, weekdays: &[Weekday]) -> Self {
        self.by_weekday = weekdays.to_vec();
        self
    }

    pub fn with_count(mut self, count: u32) -> Self {
        self.count = Some(count);
        self
    }

    pub fn with_until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    pub fn except(mut self, instant: DateTime<Utc>) -> Self {
        self.exceptions.insert(instant);
        self
    }

    /// Parse an RRULE-style string such as `"FREQ=WEEKLY;INTERVAL=2;BYDAY=MO,TH;COUNT=6"`.
    ///
    /// A leading `RRULE:` is tolerated. `UNTIL` accepts iCalendar form
    /// (`20250610T090000Z`, or floating `20250610T090000` read in `time_zone`),
    /// a bare date (`20250610`, inclusive through the end of that local day),
    /// or RFC 3339.
    pub fn parse(rule: &str, time_zone: Tz) -> Result<Self> {
        let body = rule.trim();
        let body = body
            .strip_prefix("RRULE:")
            .or_else(|| body.strip_prefix("rrule:"))
            .unwrap_or(body);
        if body.is_empty() {
            return Err(invalid("empty rule"));
        }

        let mut frequency = None;
        let mut parsed = RecurrenceRule::new(Frequency::Weekly, time_zone);

        for segment in body.split(';').filter(|s| !s.trim().is_empty()) {
            let (key, value) = segment
                .split_once('=')
                .ok_or_else(|| invalid(format!("segment '{}' is not KEY=VALUE", segment)))?;
            let key = key.trim().to_ascii_uppercase();
            let value = value.trim();
            if value.is_empty() {
                return Err(invalid(format!("{} has no value", key)));
            }

            match key.as_str() {
                "FREQ" => frequency = Some(parse_frequency(value)?),
                "INTERVAL" => parsed.interval = parse_positive(&key, value)?,
                "COUNT" => parsed.count = Some(parse_positive(&key, value)?),
                "UNTIL" => parsed.until = Some(parse_until(value, time_zone)?),
                "BYDAY" => {
                    parsed.by_weekday = value
                        .split(',')
                        .map(parse_weekday)
                        .collect::<Result<Vec<_>>>()?;
                }
                passthrough if PASSTHROUGH_KEYS.contains(&passthrough) => {
                    parsed.passthrough.push((key.clone(), value.to_string()));
                }
                other => return Err(invalid(format!("unsupported rule part '{}'", other))),
            }
        }

        parsed.frequency = frequency.ok_or_else(|| invalid("missing FREQ"))?;
        parsed.validate()?;
        Ok(parsed)
    }

    fn validate(&self) -> Result<()> {
        if self.interval == 0 {
            return Err(invalid("INTERVAL must be at least 1"));
        }
        if self.count == Some(0) {
            return Err(invalid("COUNT must be at least 1"));
        }
        Ok(())
    }

    /// RRULE body without COUNT/UNTIL, which the expander enforces itself.
    fn generator_body(&self) -> String {
        let mut parts = vec![
            format!("FREQ={}", self.frequency.as_str()),
            format!("INTERVAL={}", self.interval),
        ];
        if !self.by_weekday.is_empty() {
            let mut days: Vec<Weekday> = self.by_weekday.clone();
            days.sort_by_key(|d| d.num_days_from_monday());
            days.dedup();
            parts.push(format!(
                "BYDAY={}",
                days.iter().map(|d| weekday_code(*d)).collect::<Vec<_>>().join(",")
            ));
        }
        for (key, value) in &self.passthrough {
            parts.push(format!("{}={}", key, value));
        }
        parts.join(";")
    }
}

impl fmt::Display for RecurrenceRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.generator_body())?;
        if let Some(count) = self.count {
            write!(f, ";COUNT={}", count)?;
        }
        if let Some(until) = self.until {
            write!(f, ";UNTIL={}", until.format("%Y%m%dT%H%M%SZ"))?;
        }
        Ok(())
    }
}

/// Longest accepted expansion horizon, about ten years.
pub const MAX_HORIZON_DAYS: i64 = 3650;

/// Hard caps applied when a rule has no bound of its own (or a very loose one).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpansionLimits {
    /// Occurrences starting later than `seed + horizon` are never produced.
    pub horizon: Duration,
    /// Absolute ceiling on the number of occurrences.
    pub max_occurrences: usize,
}

impl Default for ExpansionLimits {
    fn default() -> Self {
        Self {
            horizon: Duration::days(365),
            max_occurrences: 520,
        }
    }
}

/// A validated, ready-to-iterate recurrence series.
#[derive(Debug, Clone)]
pub struct Expansion {
    set: RRuleSet,
    duration: Duration,
    take: usize,
    stop_after: DateTime<Utc>,
    exceptions: BTreeSet<DateTime<Utc>>,
}

impl Expansion {
    /// Lazily yield occurrence intervals in chronological order.
    pub fn iter(&self) -> impl Iterator<Item = TimeInterval> + '_ {
        (&self.set)
            .into_iter()
            .map(|dt| dt.with_timezone(&Utc))
            .take_while(move |start| *start <= self.stop_after)
            .filter(move |start| !self.exceptions.contains(start))
            .take(self.take)
            .filter_map(move |start| {
                let end = start.checked_add_signed(self.duration)?;
                TimeInterval::new(start, end).ok()
            })
    }

    pub fn to_vec(&self) -> Vec<TimeInterval> {
        self.iter().collect()
    }
}

/// Expand `rule` starting at the local wall-clock time `seed_start_local`.
///
/// # Errors
/// Returns `SchedulingError::InvalidRecurrence` for a zero duration, an UNTIL
/// before the seed, or a rule the rrule crate rejects.
pub fn expand(
    rule: &RecurrenceRule,
    seed_start_local: NaiveDateTime,
    seed_duration_minutes: u32,
    limits: &ExpansionLimits,
) -> Result<Expansion> {
    rule.validate()?;
    if seed_duration_minutes == 0 {
        return Err(invalid("occurrence duration must be positive"));
    }

    let tz = rule.time_zone;
    let seed_instant = zone::resolve_local(seed_start_local, tz, DstPolicy::WallClock)
        .ok_or_else(|| invalid(format!("seed {} does not exist in {}", seed_start_local, tz.name())))?;

    if let Some(until) = rule.until {
        if until < seed_instant {
            return Err(invalid(format!(
                "UNTIL {} is before the first occurrence {}",
                until.to_rfc3339(),
                seed_instant.to_rfc3339()
            )));
        }
    }

    // A seed inside a DST gap is written as the reading it resolved to.
    let rrule_text = format!(
        "DTSTART;TZID={}:{}\nRRULE:{}",
        tz.name(),
        zone::localize(seed_instant, tz).format("%Y%m%dT%H%M%S"),
        rule.generator_body()
    );
    let set: RRuleSet = rrule_text
        .parse()
        .map_err(|e| invalid(format!("{}", e)))?;

    let horizon_end = seed_instant.checked_add_signed(limits.horizon).ok_or_else(|| {
        invalid(format!(
            "expansion horizon of {} days is out of range",
            limits.horizon.num_days()
        ))
    })?;
    let stop_after = rule.until.map_or(horizon_end, |until| until.min(horizon_end));
    let take = rule
        .count
        .map_or(limits.max_occurrences, |c| (c as usize).min(limits.max_occurrences));

    debug!(rule = %rule, seed = %seed_instant, take, "expanding recurrence");

    Ok(Expansion {
        set,
        duration: Duration::minutes(seed_duration_minutes as i64),
        take,
        stop_after,
        exceptions: rule.exceptions.clone(),
    })
}

/// Expand a series whose first occurrence is `first`, read in the rule's zone.
pub fn expand_from(
    rule: &RecurrenceRule,
    first: &TimeInterval,
    limits: &ExpansionLimits,
) -> Result<Expansion> {
    let minutes = u32::try_from(first.duration().num_minutes())
        .map_err(|_| invalid("occurrence duration out of range"))?;
    expand(rule, zone::localize(first.start(), rule.time_zone), minutes, limits)
}

// ── Wire form ───────────────────────────────────────────────────────────────

/// Recurrence as it arrives on a booking request.
///
/// `count` and `until` here take precedence over the same parts inside `rule`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurrenceSpec {
    pub rule: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<String>,
    #[serde(default)]
    pub exceptions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

impl RecurrenceSpec {
    pub fn to_rule(&self, default_zone: Tz) -> Result<RecurrenceRule> {
        let tz = match self.time_zone.as_deref() {
            Some(name) => zone::parse_timezone(name)?,
            None => default_zone,
        };
        let mut rule = RecurrenceRule::parse(&self.rule, tz)?;
        if let Some(count) = self.count {
            rule.count = Some(count);
        }
        if let Some(until) = self.until.as_deref() {
            rule.until = Some(parse_until(until, tz)?);
        }
        for exception in &self.exceptions {
            let instant = parse_instant(exception)
                .map_err(|_| invalid(format!("exception '{}' is not an RFC 3339 instant", exception)))?;
            rule.exceptions.insert(instant);
        }
        rule.validate()?;
        Ok(rule)
    }
}

// ── Parsing helpers ─────────────────────────────────────────────────────────

fn invalid(message: impl Into<String>) -> SchedulingError {
    SchedulingError::InvalidRecurrence(message.into())
}

fn parse_frequency(value: &str) -> Result<Frequency> {
    match value.to_ascii_uppercase().as_str() {
        "DAILY" => Ok(Frequency::Daily),
        "WEEKLY" => Ok(Frequency::Weekly),
        "MONTHLY" => Ok(Frequency::Monthly),
        "YEARLY" => Ok(Frequency::Yearly),
        other => Err(invalid(format!("unsupported FREQ '{}'", other))),
    }
}

fn parse_positive(key: &str, value: &str) -> Result<u32> {
    value
        .parse::<u32>()
        .map_err(|_| invalid(format!("{} must be a non-negative integer, got '{}'", key, value)))
}

fn parse_weekday(code: &str) -> Result<Weekday> {
    match code.trim().to_ascii_uppercase().as_str() {
        "MO" | "MON" => Ok(Weekday::Mon),
        "TU" | "TUE" => Ok(Weekday::Tue),
        "WE" | "WED" => Ok(Weekday::Wed),
        "TH" | "THU" => Ok(Weekday::Thu),
        "FR" | "FRI" => Ok(Weekday::Fri),
        "SA" | "SAT" => Ok(Weekday::Sat),
        "SU" | "SUN" => Ok(Weekday::Sun),
        other => Err(invalid(format!("unknown BYDAY code '{}'", other))),
    }
}

fn weekday_code(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "MO",
        Weekday::Tue => "TU",
        Weekday::Wed => "WE",
        Weekday::Thu => "TH",
        Weekday::Fri => "FR",
        Weekday::Sat => "SA",
        Weekday::Sun => "SU",
    }
}

fn parse_until(value: &str, tz: Tz) -> Result<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(instant) = parse_instant(value) {
        return Ok(instant);
    }
    if let Some(utc) = value.strip_suffix('Z') {
        if let Ok(naive) = NaiveDateTime::parse_from_str(utc, "%Y%m%dT%H%M%S") {
            return Ok(naive.and_utc());
        }
    }
    let local = NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y%m%d")
                .or_else(|_| NaiveDate::parse_from_str(value, "%Y-%m-%d"))
                .ok()
                .and_then(|date| date.and_time(NaiveTime::MIN).checked_add_signed(Duration::seconds(86_399)))
        })
        .ok_or_else(|| invalid(format!("cannot parse UNTIL '{}'", value)))?;
    zone::resolve_local(local, tz, DstPolicy::WallClock)
        .ok_or_else(|| invalid(format!("UNTIL '{}' does not exist in {}", value, tz.name())))
}
