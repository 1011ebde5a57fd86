use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::{Date, Month, OffsetDateTime, UtcOffset};
use ulid::Ulid;

/// Entry key reported for entries that predate per-entry ids.
pub const LEGACY_ENTRY_KEY: &str = "legacy";

const HEADSHOT_RATE_MAX: f64 = 100.0;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum TrackerError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("configuration error: {0}")]
    Configuration(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum MetricType {
    #[serde(rename = "kda")]
    Kda,
    #[serde(rename = "hsr")]
    HeadshotRate,
    #[serde(rename = "adr")]
    Damage,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum DailyRollup {
    Sum,
    Mean,
}

impl MetricType {
    pub const ALL: [Self; 3] = [Self::Kda, Self::HeadshotRate, Self::Damage];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Kda => "kda",
            Self::HeadshotRate => "hsr",
            Self::Damage => "adr",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "kda" => Some(Self::Kda),
            "hsr" | "headshot-rate" => Some(Self::HeadshotRate),
            "adr" | "damage" => Some(Self::Damage),
            _ => None,
        }
    }

    /// Collection each metric's day documents were filed under before
    /// metrics had stable codes.
    #[must_use]
    pub fn collection_name(self) -> &'static str {
        match self {
            Self::Kda => "games",
            Self::HeadshotRate => "headshots",
            Self::Damage => "adr",
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Kda => "KDA",
            Self::HeadshotRate => "HSR",
            Self::Damage => "ADR",
        }
    }

    #[must_use]
    pub fn rollup(self) -> DailyRollup {
        match self {
            Self::Kda => DailyRollup::Sum,
            Self::HeadshotRate | Self::Damage => DailyRollup::Mean,
        }
    }

    #[must_use]
    pub fn format_value(self, value: f64) -> String {
        match self {
            Self::Kda => format!("{value:.2}"),
            Self::HeadshotRate => format!("{value:.2}%"),
            Self::Damage => format!("{value:.1}"),
        }
    }
}

impl Display for MetricType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw values of a single logged game or round.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntryValues {
    Kda { kills: u32, deaths: u32, assists: u32 },
    Rate { value: f64 },
}

impl EntryValues {
    /// Builds KDA values from form input, coercing negatives to zero.
    #[must_use]
    pub fn kda(kills: i64, deaths: i64, assists: i64) -> Self {
        Self::Kda {
            kills: coerce_count(kills),
            deaths: coerce_count(deaths),
            assists: coerce_count(assists),
        }
    }

    /// Builds a rate-valued entry for `metric`, coercing invalid numbers.
    #[must_use]
    pub fn rate(metric: MetricType, value: f64) -> Self {
        Self::Rate {
            value: coerce_rate(metric, value),
        }
    }

    #[must_use]
    pub fn sanitized(self, metric: MetricType) -> Self {
        match self {
            Self::Kda { .. } => self,
            Self::Rate { value } => Self::rate(metric, value),
        }
    }

    #[must_use]
    pub fn fits(&self, metric: MetricType) -> bool {
        match self {
            Self::Kda { .. } => metric == MetricType::Kda,
            Self::Rate { .. } => metric != MetricType::Kda,
        }
    }

    /// Rejects values whose shape does not belong to `metric`.
    ///
    /// # Errors
    /// Returns [`TrackerError::Validation`] when KDA values are logged
    /// against a rate metric or the other way round.
    pub fn ensure_fits(&self, metric: MetricType) -> Result<(), TrackerError> {
        if self.fits(metric) {
            return Ok(());
        }

        Err(TrackerError::Validation(format!(
            "entry values do not match metric {metric}"
        )))
    }

    #[must_use]
    pub fn performance(&self) -> f64 {
        match *self {
            Self::Kda {
                kills,
                deaths,
                assists,
            } => kda_ratio(u64::from(kills), u64::from(deaths), u64::from(assists)),
            Self::Rate { value } => value,
        }
    }

    #[must_use]
    pub fn score_text(&self, metric: MetricType) -> String {
        match *self {
            Self::Kda {
                kills,
                deaths,
                assists,
            } => format!("{kills}/{deaths}/{assists}"),
            Self::Rate { value } => metric.format_value(value),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    #[serde(default)]
    pub id: Option<Ulid>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub logged_at: Option<OffsetDateTime>,
    pub values: EntryValues,
}

impl LogEntry {
    #[must_use]
    pub fn new(values: EntryValues, logged_at: OffsetDateTime) -> Self {
        Self {
            id: Some(Ulid::new()),
            logged_at: Some(logged_at),
            values,
        }
    }

    /// Key used to address this entry on edit or delete.
    #[must_use]
    pub fn key(&self) -> String {
        self.id
            .map_or_else(|| LEGACY_ENTRY_KEY.to_string(), |id| id.to_string())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DailyTotals {
    Kda {
        kills: u64,
        deaths: u64,
        assists: u64,
        ratio: f64,
    },
    Rate {
        value: f64,
    },
}

impl DailyTotals {
    #[must_use]
    pub fn zero(metric: MetricType) -> Self {
        match metric.rollup() {
            DailyRollup::Sum => Self::Kda {
                kills: 0,
                deaths: 0,
                assists: 0,
                ratio: 0.0,
            },
            DailyRollup::Mean => Self::Rate { value: 0.0 },
        }
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        match *self {
            Self::Kda {
                kills,
                deaths,
                assists,
                ..
            } => kills == 0 && deaths == 0 && assists == 0,
            Self::Rate { value } => value == 0.0,
        }
    }

    /// Per-day value fed to the rating engine.
    #[must_use]
    pub fn performance(&self) -> f64 {
        match *self {
            Self::Kda {
                kills,
                deaths,
                assists,
                ..
            } => kda_ratio(kills, deaths, assists),
            Self::Rate { value } => value,
        }
    }

    #[must_use]
    pub fn score_text(&self, metric: MetricType) -> String {
        match *self {
            Self::Kda {
                kills,
                deaths,
                assists,
                ..
            } => format!("{kills}/{deaths}/{assists}"),
            Self::Rate { value } => metric.format_value(value),
        }
    }

    fn as_entry_values(&self) -> EntryValues {
        match *self {
            Self::Kda {
                kills,
                deaths,
                assists,
                ..
            } => EntryValues::Kda {
                kills: u32::try_from(kills).unwrap_or(u32::MAX),
                deaths: u32::try_from(deaths).unwrap_or(u32::MAX),
                assists: u32::try_from(assists).unwrap_or(u32::MAX),
            },
            Self::Rate { value } => EntryValues::Rate { value },
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RecomputedTotals {
    pub totals: DailyTotals,
    pub entry_count: u32,
}

/// One calendar day of logged entries for a single metric.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailyAggregate {
    pub metric: MetricType,
    #[serde(with = "day_serde")]
    pub date: Date,
    pub totals: DailyTotals,
    pub entry_count: u32,
    #[serde(default)]
    pub entries: Vec<LogEntry>,
}

impl DailyAggregate {
    #[must_use]
    pub fn empty(metric: MetricType, date: Date) -> Self {
        Self {
            metric,
            date,
            totals: DailyTotals::zero(metric),
            entry_count: 0,
            entries: Vec::new(),
        }
    }

    #[must_use]
    pub fn from_entries(metric: MetricType, date: Date, entries: Vec<LogEntry>) -> Self {
        let mut aggregate = Self::empty(metric, date);
        aggregate.apply_entries(entries);
        aggregate
    }

    /// Replaces the entry list and rederives the day's totals from it.
    pub fn apply_entries(&mut self, entries: Vec<LogEntry>) {
        let recomputed = recompute_daily_totals(&entries, self.metric);
        self.totals = recomputed.totals;
        self.entry_count = recomputed.entry_count;
        self.entries = entries;
    }

    #[must_use]
    pub fn performance(&self) -> f64 {
        finite_or_zero(self.totals.performance())
    }

    /// Days written before per-entry logs existed carry totals only.
    #[must_use]
    pub fn is_legacy(&self) -> bool {
        self.entries.is_empty() && (self.entry_count > 0 || !self.totals.is_zero())
    }

    /// Games counted for the day. A legacy day counts as the one entry
    /// [`Self::effective_entries`] surfaces for it.
    #[must_use]
    pub fn effective_entry_count(&self) -> u32 {
        if self.is_legacy() {
            return self.entry_count.max(1);
        }

        self.entry_count
    }

    /// Entries as the editor sees them. A legacy day surfaces as one
    /// synthetic id-less entry equal to its stored totals.
    #[must_use]
    pub fn effective_entries(&self) -> Vec<LogEntry> {
        if self.is_legacy() {
            return vec![LogEntry {
                id: None,
                logged_at: None,
                values: self.totals.as_entry_values(),
            }];
        }

        self.entries.clone()
    }
}

/// Rederives a day's totals from its entries.
///
/// KDA days sum kills, deaths and assists; rate days average the entry
/// values. An empty list yields zero totals with a zero count.
#[must_use]
pub fn recompute_daily_totals(entries: &[LogEntry], metric: MetricType) -> RecomputedTotals {
    let entry_count = u32::try_from(entries.len()).unwrap_or(u32::MAX);

    let totals = match metric.rollup() {
        DailyRollup::Sum => {
            let (mut kills, mut deaths, mut assists) = (0_u64, 0_u64, 0_u64);
            for entry in entries {
                if let EntryValues::Kda {
                    kills: k,
                    deaths: d,
                    assists: a,
                } = entry.values
                {
                    kills = kills.saturating_add(u64::from(k));
                    deaths = deaths.saturating_add(u64::from(d));
                    assists = assists.saturating_add(u64::from(a));
                }
            }

            DailyTotals::Kda {
                kills,
                deaths,
                assists,
                ratio: round2(kda_ratio(kills, deaths, assists)),
            }
        }
        DailyRollup::Mean => {
            if entries.is_empty() {
                DailyTotals::Rate { value: 0.0 }
            } else {
                let sum: f64 = entries
                    .iter()
                    .map(|entry| match entry.values {
                        EntryValues::Rate { value } => finite_or_zero(value),
                        EntryValues::Kda { .. } => 0.0,
                    })
                    .sum();
                DailyTotals::Rate {
                    value: sum / f64::from(entry_count),
                }
            }
        }
    };

    RecomputedTotals {
        totals,
        entry_count,
    }
}

/// `(kills + assists) / deaths`; a deathless day scores `kills + assists`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn kda_ratio(kills: u64, deaths: u64, assists: u64) -> f64 {
    let contributions = kills.saturating_add(assists) as f64;
    if deaths == 0 {
        return contributions;
    }

    contributions / deaths as f64
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
}

impl RiskLevel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Moderate => "moderate",
            Self::High => "high",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RatingRuleset {
    pub ruleset_version: u32,
    pub base_rating: f64,
    pub conversion_factor: f64,
    pub risk_window: usize,
    pub kda_global_average: f64,
    pub hsr_global_average: f64,
    pub adr_global_average: f64,
    pub default_target_multiplier: f64,
    pub minutes_per_entry: u32,
    pub risk_moderate_threshold: f64,
    pub risk_high_threshold: f64,
}

impl RatingRuleset {
    #[must_use]
    pub fn v1() -> Self {
        Self {
            ruleset_version: 1,
            base_rating: 1500.0,
            conversion_factor: 50.0,
            risk_window: 10,
            kda_global_average: 1.0,
            hsr_global_average: 20.0,
            adr_global_average: 75.0,
            default_target_multiplier: 1.5,
            minutes_per_entry: 35,
            risk_moderate_threshold: 34.0,
            risk_high_threshold: 67.0,
        }
    }

    /// Validates ruleset numeric bounds.
    ///
    /// # Errors
    /// Returns [`TrackerError::Configuration`] when one or more fields are
    /// outside allowed bounds.
    pub fn validate(&self) -> Result<(), TrackerError> {
        if self.ruleset_version == 0 {
            return Err(TrackerError::Configuration(
                "ruleset_version MUST be >= 1".to_string(),
            ));
        }

        if !self.base_rating.is_finite() {
            return Err(TrackerError::Configuration(
                "base_rating MUST be finite".to_string(),
            ));
        }

        if !self.conversion_factor.is_finite() || self.conversion_factor <= 0.0 {
            return Err(TrackerError::Configuration(
                "conversion_factor MUST be > 0".to_string(),
            ));
        }

        if self.risk_window == 0 {
            return Err(TrackerError::Configuration(
                "risk_window MUST be >= 1".to_string(),
            ));
        }

        for (name, value) in [
            ("kda_global_average", self.kda_global_average),
            ("hsr_global_average", self.hsr_global_average),
            ("adr_global_average", self.adr_global_average),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(TrackerError::Configuration(format!(
                    "{name} MUST be a finite value >= 0"
                )));
            }
        }

        if !self.default_target_multiplier.is_finite() || self.default_target_multiplier < 1.0 {
            return Err(TrackerError::Configuration(
                "default_target_multiplier MUST be >= 1.0".to_string(),
            ));
        }

        for (name, value) in [
            ("risk_moderate_threshold", self.risk_moderate_threshold),
            ("risk_high_threshold", self.risk_high_threshold),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(TrackerError::Configuration(format!(
                    "{name} MUST be in [0, 100]"
                )));
            }
        }

        if self.risk_moderate_threshold > self.risk_high_threshold {
            return Err(TrackerError::Configuration(
                "risk_moderate_threshold cannot exceed risk_high_threshold".to_string(),
            ));
        }

        Ok(())
    }

    /// Decodes and validates a ruleset from JSON.
    ///
    /// # Errors
    /// Returns [`TrackerError::Configuration`] when JSON decoding fails
    /// or decoded values violate ruleset constraints.
    pub fn from_json(value: &Value) -> Result<Self, TrackerError> {
        let ruleset: Self = serde_json::from_value(value.clone()).map_err(|err| {
            TrackerError::Configuration(format!("invalid ruleset JSON payload: {err}"))
        })?;
        ruleset.validate()?;
        Ok(ruleset)
    }

    #[must_use]
    pub fn global_average(&self, metric: MetricType) -> f64 {
        match metric {
            MetricType::Kda => self.kda_global_average,
            MetricType::HeadshotRate => self.hsr_global_average,
            MetricType::Damage => self.adr_global_average,
        }
    }

    #[must_use]
    pub fn risk_level(&self, risk: f64) -> RiskLevel {
        if risk >= self.risk_high_threshold {
            RiskLevel::High
        } else if risk >= self.risk_moderate_threshold {
            RiskLevel::Moderate
        } else {
            RiskLevel::Low
        }
    }
}

/// Coerces a user-supplied target multiplier: non-finite input falls back
/// to the ruleset default and anything below 1.0 is raised to 1.0.
#[must_use]
pub fn sanitize_multiplier(value: f64, ruleset: &RatingRuleset) -> f64 {
    if !value.is_finite() {
        return ruleset.default_target_multiplier;
    }

    value.max(1.0)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DayEntryCount {
    #[serde(with = "day_serde")]
    pub date: Date,
    pub entries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RatingSnapshot {
    pub metric: MetricType,
    #[serde(with = "day_serde")]
    pub computed_for: Date,
    pub ruleset_version: u32,
    pub rating: i64,
    pub baseline: f64,
    pub current: Option<f64>,
    pub target: f64,
    pub multiplier: f64,
    pub momentum: f64,
    pub risk: f64,
    pub risk_level: RiskLevel,
    pub data_points: usize,
    pub total_entries: u64,
    pub time_invested_minutes: u64,
    pub games_per_day: Vec<DayEntryCount>,
}

impl RatingSnapshot {
    #[must_use]
    pub fn current_label(&self) -> String {
        self.current.map_or_else(
            || "no data".to_string(),
            |value| self.metric.format_value(value),
        )
    }
}

/// Replays a metric's daily history into a rating snapshot.
///
/// Aggregates dated after `today` and aggregates of other metrics are
/// ignored. The rating starts at the ruleset base and moves by
/// `(value - previous value) * conversion_factor` per day, where the
/// first day is compared against the metric's global average.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn compute_rating(
    series: &[DailyAggregate],
    today: Date,
    multiplier: f64,
    metric: MetricType,
    ruleset: &RatingRuleset,
) -> RatingSnapshot {
    let multiplier = sanitize_multiplier(multiplier, ruleset);

    let mut history: Vec<&DailyAggregate> = series
        .iter()
        .filter(|aggregate| aggregate.metric == metric && aggregate.date <= today)
        .collect();
    history.sort_by_key(|aggregate| aggregate.date);

    let Some(last) = history.last() else {
        return reset_snapshot(metric, today, multiplier, ruleset);
    };

    let values: Vec<f64> = history
        .iter()
        .map(|aggregate| aggregate.performance())
        .collect();
    let global_average = ruleset.global_average(metric);

    let mut running_rating = ruleset.base_rating;
    let mut prior_value = global_average;
    for value in &values {
        running_rating += (value - prior_value) * ruleset.conversion_factor;
        prior_value = *value;
    }

    let last_value = values[values.len() - 1];
    let logged_today = last.date == today;
    let current = logged_today.then_some(last_value);
    let baseline = if values.len() == 1 {
        global_average
    } else if logged_today {
        values[values.len() - 2]
    } else {
        last_value
    };

    let risk = risk_percentage(&values, ruleset.risk_window);
    let games_per_day: Vec<DayEntryCount> = history
        .iter()
        .map(|aggregate| DayEntryCount {
            date: aggregate.date,
            entries: aggregate.effective_entry_count(),
        })
        .collect();
    let total_entries: u64 = games_per_day
        .iter()
        .map(|day| u64::from(day.entries))
        .sum();

    RatingSnapshot {
        metric,
        computed_for: today,
        ruleset_version: ruleset.ruleset_version,
        rating: running_rating.round() as i64,
        baseline,
        current,
        target: baseline * multiplier,
        multiplier,
        momentum: momentum(current, baseline),
        risk,
        risk_level: ruleset.risk_level(risk),
        data_points: values.len(),
        total_entries,
        time_invested_minutes: total_entries.saturating_mul(u64::from(ruleset.minutes_per_entry)),
        games_per_day,
    }
}

#[allow(clippy::cast_possible_truncation)]
fn reset_snapshot(
    metric: MetricType,
    today: Date,
    multiplier: f64,
    ruleset: &RatingRuleset,
) -> RatingSnapshot {
    RatingSnapshot {
        metric,
        computed_for: today,
        ruleset_version: ruleset.ruleset_version,
        rating: ruleset.base_rating.round() as i64,
        baseline: 0.0,
        current: None,
        target: 0.0,
        multiplier,
        momentum: 0.0,
        risk: 0.0,
        risk_level: RiskLevel::Low,
        data_points: 0,
        total_entries: 0,
        time_invested_minutes: 0,
        games_per_day: Vec::new(),
    }
}

fn momentum(current: Option<f64>, baseline: f64) -> f64 {
    let Some(current) = current else {
        return 0.0;
    };

    if baseline == 0.0 || !baseline.is_finite() {
        return 0.0;
    }

    ((current / baseline) - 1.0) * 100.0
}

/// Share of the trailing `window` days that came in under the average of
/// every day before them. The first day of the history has nothing to be
/// compared against and never counts as a risk event.
#[allow(clippy::cast_precision_loss)]
fn risk_percentage(values: &[f64], window: usize) -> f64 {
    if values.is_empty() || window == 0 {
        return 0.0;
    }

    let window_start = values.len().saturating_sub(window);
    let mut prior_sum = 0.0;
    let mut risk_events = 0_usize;

    for (index, value) in values.iter().enumerate() {
        if index >= window_start && index > 0 {
            let historical_average = prior_sum / index as f64;
            if *value < historical_average {
                risk_events += 1;
            }
        }
        prior_sum += value;
    }

    let considered = window.min(values.len());
    (risk_events as f64 / considered as f64) * 100.0
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CareerSummary {
    pub metric: MetricType,
    pub days_logged: usize,
    pub total_entries: u64,
    pub overall: f64,
}

/// Career-wide figure shown above the history list: the KDA of all summed
/// totals, or the mean of the daily rates.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn summarize_history(series: &[DailyAggregate], metric: MetricType) -> CareerSummary {
    let days: Vec<&DailyAggregate> = series
        .iter()
        .filter(|aggregate| aggregate.metric == metric)
        .collect();
    let total_entries = days
        .iter()
        .map(|aggregate| u64::from(aggregate.effective_entry_count()))
        .sum();

    let overall = match metric.rollup() {
        DailyRollup::Sum => {
            let (mut kills, mut deaths, mut assists) = (0_u64, 0_u64, 0_u64);
            for aggregate in &days {
                if let DailyTotals::Kda {
                    kills: k,
                    deaths: d,
                    assists: a,
                    ..
                } = aggregate.totals
                {
                    kills = kills.saturating_add(k);
                    deaths = deaths.saturating_add(d);
                    assists = assists.saturating_add(a);
                }
            }
            round2(kda_ratio(kills, deaths, assists))
        }
        DailyRollup::Mean => {
            if days.is_empty() {
                0.0
            } else {
                let sum: f64 = days.iter().map(|aggregate| aggregate.performance()).sum();
                sum / days.len() as f64
            }
        }
    };

    CareerSummary {
        metric,
        days_logged: days.len(),
        total_entries,
        overall,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntryRow {
    pub key: String,
    pub score: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub logged_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryRow {
    #[serde(with = "day_serde")]
    pub date: Date,
    pub score: String,
    pub value: f64,
    pub value_text: String,
    pub entry_count: u32,
    pub entries: Vec<HistoryEntryRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChartPoint {
    #[serde(with = "day_serde")]
    pub date: Date,
    pub value: f64,
}

/// Everything a renderer needs to draw one metric's history tab.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryView {
    pub metric: MetricType,
    pub rows: Vec<HistoryRow>,
    pub chart: Vec<ChartPoint>,
    pub summary: CareerSummary,
    pub empty_message: Option<String>,
}

/// Builds the history view model. Rows are newest first, chart points
/// oldest first. Future-dated days are shown even though the rating
/// engine skips them.
#[must_use]
pub fn build_history_view(series: &[DailyAggregate], metric: MetricType) -> HistoryView {
    let mut days: Vec<&DailyAggregate> = series
        .iter()
        .filter(|aggregate| aggregate.metric == metric)
        .collect();
    days.sort_by_key(|aggregate| aggregate.date);

    let chart = days
        .iter()
        .map(|aggregate| ChartPoint {
            date: aggregate.date,
            value: aggregate.performance(),
        })
        .collect();

    let rows: Vec<HistoryRow> = days
        .iter()
        .rev()
        .map(|aggregate| {
            let value = aggregate.performance();
            HistoryRow {
                date: aggregate.date,
                score: aggregate.totals.score_text(metric),
                value,
                value_text: metric.format_value(value),
                entry_count: aggregate.effective_entry_count(),
                entries: aggregate
                    .effective_entries()
                    .iter()
                    .map(|entry| HistoryEntryRow {
                        key: entry.key(),
                        score: entry.values.score_text(metric),
                        logged_at: entry.logged_at,
                    })
                    .collect(),
            }
        })
        .collect();

    let empty_message = rows.is_empty().then(|| match metric {
        MetricType::Kda => "No KDA games logged yet.".to_string(),
        MetricType::HeadshotRate => "No HSR rates logged yet.".to_string(),
        MetricType::Damage => "No ADR values logged yet.".to_string(),
    });

    HistoryView {
        metric,
        rows,
        chart,
        summary: summarize_history(series, metric),
        empty_message,
    }
}

/// Parses a `YYYY-MM-DD` calendar date.
///
/// # Errors
/// Returns [`TrackerError::Validation`] when the input is not a valid
/// calendar date in that exact shape.
pub fn parse_day(raw: &str) -> Result<Date, TrackerError> {
    let invalid = || TrackerError::Validation(format!("date MUST be YYYY-MM-DD, got {raw:?}"));

    let trimmed = raw.trim();
    if trimmed.len() != 10 {
        return Err(invalid());
    }

    let mut parts = trimmed.split('-');
    let (Some(year), Some(month), Some(day), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(invalid());
    };

    if year.len() != 4
        || month.len() != 2
        || day.len() != 2
        || ![year, month, day]
            .iter()
            .all(|part| part.chars().all(|c| c.is_ascii_digit()))
    {
        return Err(invalid());
    }

    let year: i32 = year.parse().map_err(|_| invalid())?;
    let month: u8 = month.parse().map_err(|_| invalid())?;
    let day: u8 = day.parse().map_err(|_| invalid())?;
    let month = Month::try_from(month).map_err(|_| invalid())?;

    Date::from_calendar_date(year, month, day)
        .map_err(|err| TrackerError::Validation(format!("invalid calendar date {raw:?}: {err}")))
}

#[must_use]
pub fn format_day(date: Date) -> String {
    format!(
        "{:04}-{:02}-{:02}",
        date.year(),
        u8::from(date.month()),
        date.day()
    )
}

/// Parses an RFC3339 timestamp and requires UTC (`Z`) offset.
///
/// # Errors
/// Returns [`TrackerError::Validation`] when parsing fails or an input
/// timestamp is not UTC.
pub fn parse_rfc3339_utc(value: &str) -> Result<OffsetDateTime, TrackerError> {
    let parsed = OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .map_err(|err| TrackerError::Validation(format!("invalid RFC3339 timestamp: {err}")))?;

    if parsed.offset() != UtcOffset::UTC {
        return Err(TrackerError::Validation(
            "timestamp MUST use UTC offset Z".to_string(),
        ));
    }

    Ok(parsed)
}

/// Formats a timestamp as RFC3339 after normalizing to UTC.
///
/// # Errors
/// Returns [`TrackerError::Validation`] when formatting fails.
pub fn format_rfc3339(value: OffsetDateTime) -> Result<String, TrackerError> {
    value
        .to_offset(UtcOffset::UTC)
        .format(&time::format_description::well_known::Rfc3339)
        .map_err(|err| {
            TrackerError::Validation(format!("failed to format RFC3339 timestamp: {err}"))
        })
}

#[must_use]
pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc().to_offset(UtcOffset::UTC)
}

#[must_use]
pub fn today_utc() -> Date {
    now_utc().date()
}

fn coerce_count(raw: i64) -> u32 {
    u32::try_from(raw.max(0)).unwrap_or(u32::MAX)
}

fn coerce_rate(metric: MetricType, value: f64) -> f64 {
    let value = finite_or_zero(value).max(0.0);
    if metric == MetricType::HeadshotRate {
        return value.min(HEADSHOT_RATE_MAX);
    }
    value
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

mod day_serde {
    #![allow(clippy::trivially_copy_pass_by_ref)]

    use serde::{Deserialize, Deserializer, Serializer};
    use time::Date;

    pub fn serialize<S: Serializer>(date: &Date, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_day(*date))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Date, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_day(&raw).map_err(serde::de::Error::custom)
    }
}
