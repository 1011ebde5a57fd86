#![allow(clippy::missing_errors_doc)]
#![allow(clippy::uninlined_format_args)]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::de::DeserializeOwned;
use serde_json::Value;
use statline_core::{
    compute_rating, format_day, format_rfc3339, now_utc, parse_day, sanitize_multiplier,
    DailyAggregate, DailyTotals, EntryValues, LogEntry, MetricType, RatingRuleset,
    RatingSnapshot, TrackerError,
};
use time::Date;
use tracing::{debug, info, warn};

const TRACKER_MIGRATION_VERSION: i64 = 1;
const TARGET_MULTIPLIER_KEY: &str = "target_multiplier";

const SCHEMA_TRACKER_V1: &str = r"
CREATE TABLE IF NOT EXISTS rating_rulesets (
  ruleset_version INTEGER PRIMARY KEY,
  ruleset_json TEXT NOT NULL,
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS daily_aggregates (
  metric TEXT NOT NULL CHECK (metric IN ('kda', 'hsr', 'adr')),
  day TEXT NOT NULL CHECK (length(day) = 10),
  totals_json TEXT NOT NULL,
  entry_count INTEGER NOT NULL CHECK (entry_count >= 0),
  entries_json TEXT NOT NULL DEFAULT '[]',
  updated_at TEXT NOT NULL,
  PRIMARY KEY (metric, day)
);

CREATE TABLE IF NOT EXISTS rating_snapshots (
  metric TEXT PRIMARY KEY CHECK (metric IN ('kda', 'hsr', 'adr')),
  ruleset_version INTEGER NOT NULL,
  computed_for TEXT NOT NULL,
  rating INTEGER NOT NULL,
  risk REAL NOT NULL CHECK (risk BETWEEN 0.0 AND 100.0),
  snapshot_json TEXT NOT NULL,
  updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS tracker_settings (
  setting_key TEXT PRIMARY KEY,
  setting_value TEXT NOT NULL,
  updated_at TEXT NOT NULL
);
";

pub struct SqliteTrackerStore {
    conn: Connection,
}

/// Result of adding, editing or deleting a single entry.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct EntryMutation {
    pub entry_key: String,
    pub day: DailyAggregate,
    pub snapshot: RatingSnapshot,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct DayRemoval {
    pub metric: MetricType,
    pub date: String,
    pub removed: bool,
    pub snapshot: RatingSnapshot,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct MultiplierUpdate {
    pub target_multiplier: f64,
    pub snapshots: Vec<RatingSnapshot>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct TrackerSettings {
    pub target_multiplier: f64,
    pub ruleset: RatingRuleset,
}

impl SqliteTrackerStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        debug!(path = %path.display(), "opened tracker database");
        Ok(Self { conn })
    }

    pub fn migrate(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS schema_migrations (
                    version INTEGER PRIMARY KEY,
                    applied_at TEXT NOT NULL
                );",
            )
            .context("failed to ensure schema_migrations exists")?;

        self.conn
            .execute_batch(SCHEMA_TRACKER_V1)
            .context("failed to apply tracker schema")?;

        let now = timestamp_now()?;
        self.conn
            .execute(
                "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
                params![TRACKER_MIGRATION_VERSION, now],
            )
            .context("failed to register tracker schema migration")?;

        let default_ruleset = RatingRuleset::v1();
        let payload =
            serde_json::to_string(&default_ruleset).context("failed to serialize ruleset")?;
        self.conn
            .execute(
                "INSERT OR IGNORE INTO rating_rulesets(ruleset_version, ruleset_json, created_at)
                 VALUES (?1, ?2, ?3)",
                params![i64::from(default_ruleset.ruleset_version), payload, now],
            )
            .context("failed to seed default ruleset")?;

        self.conn
            .execute(
                "INSERT OR IGNORE INTO tracker_settings(setting_key, setting_value, updated_at)
                 VALUES (?1, ?2, ?3)",
                params![
                    TARGET_MULTIPLIER_KEY,
                    default_ruleset.default_target_multiplier.to_string(),
                    now
                ],
            )
            .context("failed to seed target multiplier")?;

        Ok(())
    }

    pub fn upsert_ruleset(&self, ruleset: &RatingRuleset) -> Result<()> {
        ruleset
            .validate()
            .map_err(|err| anyhow!("invalid ruleset configuration: {err}"))?;

        let payload = serde_json::to_string(ruleset).context("failed to serialize ruleset")?;
        let now = timestamp_now()?;

        self.conn
            .execute(
                "INSERT INTO rating_rulesets(ruleset_version, ruleset_json, created_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(ruleset_version) DO UPDATE SET
                   ruleset_json = excluded.ruleset_json,
                   created_at = excluded.created_at",
                params![i64::from(ruleset.ruleset_version), payload, now],
            )
            .context("failed to upsert ruleset")?;

        info!(
            ruleset_version = ruleset.ruleset_version,
            "stored rating ruleset"
        );
        Ok(())
    }

    /// Stores `ruleset` and makes it the active one. A version older than
    /// the active ruleset is rejected before anything is written.
    pub fn load_ruleset(&self, ruleset: &RatingRuleset) -> Result<RatingRuleset> {
        let active = self.active_ruleset()?;
        if ruleset.ruleset_version < active.ruleset_version {
            return Err(anyhow!(
                "ruleset version {} is older than active version {}",
                ruleset.ruleset_version,
                active.ruleset_version
            ));
        }

        self.upsert_ruleset(ruleset)?;
        self.active_ruleset()
    }

    /// The highest stored ruleset version drives every rating refresh.
    pub fn active_ruleset(&self) -> Result<RatingRuleset> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT ruleset_json FROM rating_rulesets
                 ORDER BY ruleset_version DESC
                 LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .context("failed to query active ruleset")?;

        let Some(json) = json else {
            return Err(anyhow!(
                "no rating ruleset stored; run migrate before reading configuration"
            ));
        };

        let value: Value = serde_json::from_str(&json).context("invalid stored ruleset JSON")?;
        RatingRuleset::from_json(&value).map_err(|err| anyhow!("failed to parse ruleset: {err}"))
    }

    /// Reads the global target multiplier. Unparseable stored values fall
    /// back to the ruleset default instead of failing the read.
    pub fn target_multiplier(&self) -> Result<f64> {
        let ruleset = self.active_ruleset()?;
        let raw = self.setting(TARGET_MULTIPLIER_KEY)?;

        let value = match raw.as_deref().map(str::parse::<f64>) {
            Some(Ok(value)) => value,
            Some(Err(err)) => {
                warn!(error = %err, "stored target multiplier is not a number; using default");
                ruleset.default_target_multiplier
            }
            None => ruleset.default_target_multiplier,
        };

        Ok(sanitize_multiplier(value, &ruleset))
    }

    pub fn settings(&self) -> Result<TrackerSettings> {
        Ok(TrackerSettings {
            target_multiplier: self.target_multiplier()?,
            ruleset: self.active_ruleset()?,
        })
    }

    /// Persists a new target multiplier and recomputes every metric's
    /// snapshot against it.
    pub fn set_target_multiplier(&mut self, value: f64, today: Date) -> Result<MultiplierUpdate> {
        let ruleset = self.active_ruleset()?;
        let target_multiplier = sanitize_multiplier(value, &ruleset);
        let now = timestamp_now()?;

        self.conn
            .execute(
                "INSERT INTO tracker_settings(setting_key, setting_value, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(setting_key) DO UPDATE SET
                   setting_value = excluded.setting_value,
                   updated_at = excluded.updated_at",
                params![TARGET_MULTIPLIER_KEY, target_multiplier.to_string(), now],
            )
            .context("failed to store target multiplier")?;

        info!(target_multiplier, "updated target multiplier");
        let snapshots = self.refresh_all(today)?;

        Ok(MultiplierUpdate {
            target_multiplier,
            snapshots,
        })
    }

    pub fn get_day(&self, metric: MetricType, date: Date) -> Result<Option<DailyAggregate>> {
        load_day(&self.conn, metric, date)
    }

    /// Full history for one metric, oldest day first.
    pub fn list_history(&self, metric: MetricType) -> Result<Vec<DailyAggregate>> {
        let mut stmt = self.conn.prepare(
            "SELECT metric, day, totals_json, entry_count, entries_json
             FROM daily_aggregates
             WHERE metric = ?1
             ORDER BY day ASC",
        )?;

        let rows = stmt.query_map(params![metric.as_str()], parse_day_row)?;
        let history = collect_rows(rows)?;
        debug!(metric = %metric, days = history.len(), "loaded history");
        Ok(history)
    }

    /// Appends one entry to the day's document, creating the day on its
    /// first entry, and refreshes the metric's rating.
    pub fn log_entry(
        &mut self,
        metric: MetricType,
        date: Date,
        values: EntryValues,
        today: Date,
    ) -> Result<EntryMutation> {
        values
            .ensure_fits(metric)
            .map_err(|err| anyhow!("entry rejected: {err}"))?;

        let entry = LogEntry::new(values.sanitized(metric), now_utc());
        let entry_key = entry.key();

        let day = self.mutate_day(metric, date, true, |entries| {
            entries.push(entry);
            Ok(())
        })?;

        info!(
            metric = %metric,
            day = %format_day(date),
            entry = %entry_key,
            entry_count = day.entry_count,
            "logged entry"
        );

        let snapshot = self.refresh_rating(metric, today)?;
        Ok(EntryMutation {
            entry_key,
            day,
            snapshot,
        })
    }

    /// Replaces the values of one entry, keeping its id and timestamp.
    pub fn edit_entry(
        &mut self,
        metric: MetricType,
        date: Date,
        entry_key: &str,
        values: EntryValues,
        today: Date,
    ) -> Result<EntryMutation> {
        values
            .ensure_fits(metric)
            .map_err(|err| anyhow!("entry rejected: {err}"))?;
        let values = values.sanitized(metric);

        let day = self.mutate_day(metric, date, false, |entries| {
            let entry = entries
                .iter_mut()
                .find(|entry| entry.key() == entry_key)
                .ok_or_else(|| entry_not_found(metric, date, entry_key))?;
            entry.values = values;
            Ok(())
        })?;

        info!(metric = %metric, day = %format_day(date), entry = entry_key, "edited entry");

        let snapshot = self.refresh_rating(metric, today)?;
        Ok(EntryMutation {
            entry_key: entry_key.to_string(),
            day,
            snapshot,
        })
    }

    /// Removes one entry. The day document stays behind with zeroed totals
    /// when its last entry goes.
    pub fn delete_entry(
        &mut self,
        metric: MetricType,
        date: Date,
        entry_key: &str,
        today: Date,
    ) -> Result<EntryMutation> {
        let day = self.mutate_day(metric, date, false, |entries| {
            let before = entries.len();
            entries.retain(|entry| entry.key() != entry_key);
            if entries.len() == before {
                return Err(entry_not_found(metric, date, entry_key));
            }
            Ok(())
        })?;

        info!(
            metric = %metric,
            day = %format_day(date),
            entry = entry_key,
            remaining = day.entry_count,
            "deleted entry"
        );

        let snapshot = self.refresh_rating(metric, today)?;
        Ok(EntryMutation {
            entry_key: entry_key.to_string(),
            day,
            snapshot,
        })
    }

    pub fn delete_day(&mut self, metric: MetricType, date: Date, today: Date) -> Result<DayRemoval> {
        let removed = self
            .conn
            .execute(
                "DELETE FROM daily_aggregates WHERE metric = ?1 AND day = ?2",
                params![metric.as_str(), format_day(date)],
            )
            .context("failed to delete day")?
            > 0;

        info!(metric = %metric, day = %format_day(date), removed, "deleted day");

        let snapshot = self.refresh_rating(metric, today)?;
        Ok(DayRemoval {
            metric,
            date: format_day(date),
            removed,
            snapshot,
        })
    }

    /// Recomputes the metric's snapshot from its full stored history and
    /// caches it.
    pub fn refresh_rating(&self, metric: MetricType, today: Date) -> Result<RatingSnapshot> {
        let ruleset = self.active_ruleset()?;
        let multiplier = self.target_multiplier()?;
        let history = self.list_history(metric)?;

        let snapshot = compute_rating(&history, today, multiplier, metric, &ruleset);
        self.upsert_snapshot(&snapshot)?;

        info!(
            metric = %metric,
            rating = snapshot.rating,
            risk = snapshot.risk,
            data_points = snapshot.data_points,
            "refreshed rating snapshot"
        );
        Ok(snapshot)
    }

    pub fn refresh_all(&self, today: Date) -> Result<Vec<RatingSnapshot>> {
        MetricType::ALL
            .iter()
            .map(|metric| self.refresh_rating(*metric, today))
            .collect()
    }

    /// Last cached snapshot. The cache is never authoritative; callers that
    /// need fresh numbers use [`Self::refresh_rating`].
    pub fn get_snapshot(&self, metric: MetricType) -> Result<Option<RatingSnapshot>> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT snapshot_json FROM rating_snapshots WHERE metric = ?1",
                params![metric.as_str()],
                |row| row.get(0),
            )
            .optional()
            .context("failed to query rating snapshot")?;

        json.map(|raw| serde_json::from_str(&raw).context("invalid stored snapshot JSON"))
            .transpose()
    }

    /// Read-modify-write of one day document inside a single immediate
    /// transaction. Totals are always rederived from the resulting entries.
    fn mutate_day<F>(
        &mut self,
        metric: MetricType,
        date: Date,
        create_missing: bool,
        mutate: F,
    ) -> Result<DailyAggregate>
    where
        F: FnOnce(&mut Vec<LogEntry>) -> Result<()>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to start day transaction")?;

        let mut aggregate = match load_day(&tx, metric, date)? {
            Some(existing) => existing,
            None if create_missing => DailyAggregate::empty(metric, date),
            None => {
                return Err(anyhow!(
                    "no {} day logged for {}",
                    metric,
                    format_day(date)
                ))
            }
        };

        let mut entries = aggregate.effective_entries();
        mutate(&mut entries)?;
        aggregate.apply_entries(entries);

        write_day(&tx, &aggregate)?;
        tx.commit().context("failed to commit day transaction")?;

        Ok(aggregate)
    }

    fn setting(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT setting_value FROM tracker_settings WHERE setting_key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("failed to read setting {key}"))?;
        Ok(value)
    }

    fn upsert_snapshot(&self, snapshot: &RatingSnapshot) -> Result<()> {
        let payload = serde_json::to_string(snapshot).context("failed to serialize snapshot")?;
        let now = timestamp_now()?;

        self.conn
            .execute(
                "INSERT INTO rating_snapshots(
                    metric, ruleset_version, computed_for, rating, risk, snapshot_json, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(metric) DO UPDATE SET
                    ruleset_version = excluded.ruleset_version,
                    computed_for = excluded.computed_for,
                    rating = excluded.rating,
                    risk = excluded.risk,
                    snapshot_json = excluded.snapshot_json,
                    updated_at = excluded.updated_at",
                params![
                    snapshot.metric.as_str(),
                    i64::from(snapshot.ruleset_version),
                    format_day(snapshot.computed_for),
                    snapshot.rating,
                    snapshot.risk,
                    payload,
                    now
                ],
            )
            .context("failed to upsert rating snapshot")?;

        Ok(())
    }

    #[cfg(test)]
    fn connection(&self) -> &Connection {
        &self.conn
    }
}

fn load_day(conn: &Connection, metric: MetricType, date: Date) -> Result<Option<DailyAggregate>> {
    let mut stmt = conn.prepare(
        "SELECT metric, day, totals_json, entry_count, entries_json
         FROM daily_aggregates
         WHERE metric = ?1 AND day = ?2",
    )?;

    let row = stmt
        .query_row(params![metric.as_str(), format_day(date)], parse_day_row)
        .optional()
        .with_context(|| format!("failed to load {} day {}", metric, format_day(date)))?;

    Ok(row)
}

fn write_day(conn: &Connection, aggregate: &DailyAggregate) -> Result<()> {
    let totals = serde_json::to_string(&aggregate.totals).context("failed to serialize totals")?;
    let entries =
        serde_json::to_string(&aggregate.entries).context("failed to serialize entries")?;

    conn.execute(
        "INSERT INTO daily_aggregates(metric, day, totals_json, entry_count, entries_json, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(metric, day) DO UPDATE SET
            totals_json = excluded.totals_json,
            entry_count = excluded.entry_count,
            entries_json = excluded.entries_json,
            updated_at = excluded.updated_at",
        params![
            aggregate.metric.as_str(),
            format_day(aggregate.date),
            totals,
            i64::from(aggregate.entry_count),
            entries,
            timestamp_now()?
        ],
    )
    .context("failed to write day document")?;

    Ok(())
}

fn parse_day_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DailyAggregate> {
    let metric_raw: String = row.get(0)?;
    let metric = MetricType::parse(&metric_raw).ok_or_else(|| {
        invalid_column(0, rusqlite::types::Type::Text, format!("unknown metric: {metric_raw}"))
    })?;

    let date = parse_day(&row.get::<_, String>(1)?).map_err(to_sql_error)?;
    let totals: DailyTotals = json_column(row, 2)?;

    let entry_count_i64: i64 = row.get(3)?;
    let entry_count = u32::try_from(entry_count_i64).map_err(|_| {
        invalid_column(
            3,
            rusqlite::types::Type::Integer,
            format!("invalid entry_count value: {entry_count_i64}"),
        )
    })?;

    let entries: Vec<LogEntry> = json_column(row, 4)?;

    Ok(DailyAggregate {
        metric,
        date,
        totals,
        entry_count,
        entries,
    })
}

fn json_column<T: DeserializeOwned>(row: &rusqlite::Row<'_>, index: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(index)?;
    serde_json::from_str(&raw).map_err(|err| {
        invalid_column(
            index,
            rusqlite::types::Type::Text,
            format!("invalid stored JSON: {err}"),
        )
    })
}

fn invalid_column(index: usize, kind: rusqlite::types::Type, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        index,
        kind,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

fn to_sql_error(err: TrackerError) -> rusqlite::Error {
    invalid_column(0, rusqlite::types::Type::Text, err.to_string())
}

fn entry_not_found(metric: MetricType, date: Date, entry_key: &str) -> anyhow::Error {
    anyhow!(
        "entry {} not found on {} day {}",
        entry_key,
        metric,
        format_day(date)
    )
}

fn timestamp_now() -> Result<String> {
    format_rfc3339(now_utc()).map_err(|err| anyhow!(err.to_string()))
}

fn collect_rows<T>(
    rows: rusqlite::MappedRows<'_, impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>>,
) -> Result<Vec<T>> {
    let mut values = Vec::new();
    for row in rows {
        values.push(row?);
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::float_cmp, clippy::too_many_lines)]

    use super::*;
    use proptest::prelude::*;
    use statline_core::LEGACY_ENTRY_KEY;

    fn must<T>(result: Result<T>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("test failure: {err}"),
        }
    }

    fn fixture_store() -> SqliteTrackerStore {
        let store = must(SqliteTrackerStore::open(Path::new(":memory:")));
        must(store.migrate());
        store
    }

    fn day(raw: &str) -> Date {
        match parse_day(raw) {
            Ok(value) => value,
            Err(err) => panic!("invalid fixture date: {err}"),
        }
    }

    fn table_exists(conn: &Connection, table_name: &str) -> bool {
        match conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1 LIMIT 1",
                params![table_name],
                |_| Ok(()),
            )
            .optional()
        {
            Ok(value) => value.is_some(),
            Err(err) => panic!("failed to query sqlite_master: {err}"),
        }
    }

    #[test]
    fn log_entry_creates_day_and_recomputes_totals() {
        let mut store = fixture_store();
        let today = day("2025-01-02");

        let first = must(store.log_entry(
            MetricType::Kda,
            today,
            EntryValues::kda(10, 5, 2),
            today,
        ));
        assert_eq!(first.day.entry_count, 1);

        let second = must(store.log_entry(
            MetricType::Kda,
            today,
            EntryValues::kda(4, 3, 4),
            today,
        ));
        assert_eq!(second.day.entry_count, 2);
        assert_eq!(
            second.day.totals,
            DailyTotals::Kda {
                kills: 14,
                deaths: 8,
                assists: 6,
                ratio: 2.5,
            }
        );
        assert_ne!(first.entry_key, second.entry_key);
        assert_eq!(second.snapshot.current, Some(2.5));

        let stored = match must(store.get_day(MetricType::Kda, today)) {
            Some(value) => value,
            None => panic!("expected stored day"),
        };
        assert_eq!(stored, second.day);
    }

    #[test]
    fn rate_entries_are_averaged_and_coerced() {
        let mut store = fixture_store();
        let today = day("2025-01-02");

        let _ = must(store.log_entry(
            MetricType::HeadshotRate,
            today,
            EntryValues::Rate { value: 30.0 },
            today,
        ));
        let mutation = must(store.log_entry(
            MetricType::HeadshotRate,
            today,
            EntryValues::Rate { value: 250.0 },
            today,
        ));

        assert_eq!(mutation.day.totals, DailyTotals::Rate { value: 65.0 });
    }

    #[test]
    fn mismatched_entry_values_are_rejected() {
        let mut store = fixture_store();
        let today = day("2025-01-02");

        let result = store.log_entry(
            MetricType::Damage,
            today,
            EntryValues::kda(1, 1, 1),
            today,
        );
        assert!(result.is_err());
        assert!(must(store.get_day(MetricType::Damage, today)).is_none());
    }

    #[test]
    fn edit_entry_keeps_identity_and_recomputes() {
        let mut store = fixture_store();
        let today = day("2025-01-02");

        let logged = must(store.log_entry(
            MetricType::Damage,
            today,
            EntryValues::Rate { value: 80.0 },
            today,
        ));
        let _ = must(store.log_entry(
            MetricType::Damage,
            today,
            EntryValues::Rate { value: 100.0 },
            today,
        ));

        let edited = must(store.edit_entry(
            MetricType::Damage,
            today,
            &logged.entry_key,
            EntryValues::Rate { value: 120.0 },
            today,
        ));

        assert_eq!(edited.day.totals, DailyTotals::Rate { value: 110.0 });
        assert_eq!(edited.day.entries[0].key(), logged.entry_key);
        assert_eq!(
            edited.day.entries[0].logged_at,
            logged.day.entries[0].logged_at
        );
    }

    #[test]
    fn deleting_only_entry_leaves_zeroed_day() {
        let mut store = fixture_store();
        let today = day("2025-01-02");

        let logged = must(store.log_entry(
            MetricType::Kda,
            today,
            EntryValues::kda(3, 1, 0),
            today,
        ));
        let deleted = must(store.delete_entry(MetricType::Kda, today, &logged.entry_key, today));

        assert_eq!(deleted.day.entry_count, 0);
        assert_eq!(deleted.day.totals, DailyTotals::zero(MetricType::Kda));
        assert!(deleted.day.entries.is_empty());
        assert!(must(store.get_day(MetricType::Kda, today)).is_some());
    }

    #[test]
    fn unknown_entry_key_is_reported_without_writing() {
        let mut store = fixture_store();
        let today = day("2025-01-02");

        let logged = must(store.log_entry(
            MetricType::Kda,
            today,
            EntryValues::kda(3, 1, 0),
            today,
        ));

        let missing = store.delete_entry(MetricType::Kda, today, "01JNOTAREALENTRYKEY0000000", today);
        let err = match missing {
            Ok(_) => panic!("expected missing entry failure"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("not found"));

        let stored = match must(store.get_day(MetricType::Kda, today)) {
            Some(value) => value,
            None => panic!("expected stored day"),
        };
        assert_eq!(stored, logged.day);
    }

    #[test]
    fn editing_a_missing_day_fails() {
        let mut store = fixture_store();
        let today = day("2025-01-02");

        let result = store.edit_entry(
            MetricType::Kda,
            today,
            LEGACY_ENTRY_KEY,
            EntryValues::kda(1, 1, 1),
            today,
        );
        assert!(result.is_err());
        assert!(must(store.get_day(MetricType::Kda, today)).is_none());
    }

    #[test]
    fn legacy_day_is_addressable_by_legacy_key() {
        let mut store = fixture_store();
        let today = day("2025-01-02");

        let inserted = store.connection().execute(
            "INSERT INTO daily_aggregates(metric, day, totals_json, entry_count, entries_json, updated_at)
             VALUES ('kda', '2025-01-01', ?1, 0, '[]', '2025-01-01T00:00:00Z')",
            params![r#"{"kind":"kda","kills":12,"deaths":6,"assists":0,"ratio":2.0}"#],
        );
        if let Err(err) = inserted {
            panic!("failed to insert legacy fixture: {err}");
        }

        let edited = must(store.edit_entry(
            MetricType::Kda,
            day("2025-01-01"),
            LEGACY_ENTRY_KEY,
            EntryValues::kda(9, 3, 0),
            today,
        ));

        assert_eq!(edited.day.entry_count, 1);
        assert_eq!(edited.day.entries.len(), 1);
        assert_eq!(edited.day.entries[0].key(), LEGACY_ENTRY_KEY);
        assert_eq!(edited.day.performance(), 3.0);
    }

    #[test]
    fn delete_day_removes_document_and_refreshes_rating() {
        let mut store = fixture_store();
        let today = day("2025-01-02");

        let _ = must(store.log_entry(
            MetricType::Kda,
            today,
            EntryValues::kda(6, 2, 0),
            today,
        ));
        let removal = must(store.delete_day(MetricType::Kda, today, today));

        assert!(removal.removed);
        assert_eq!(removal.snapshot.rating, 1500);
        assert!(must(store.list_history(MetricType::Kda)).is_empty());

        let again = must(store.delete_day(MetricType::Kda, today, today));
        assert!(!again.removed);
    }

    #[test]
    fn history_is_ordered_and_keeps_future_days() {
        let mut store = fixture_store();
        let today = day("2025-01-02");

        for raw in ["2025-01-05", "2025-01-01", "2025-01-02"] {
            let _ = must(store.log_entry(
                MetricType::Kda,
                day(raw),
                EntryValues::kda(2, 2, 0),
                today,
            ));
        }

        let history = must(store.list_history(MetricType::Kda));
        let dates: Vec<String> = history.iter().map(|item| format_day(item.date)).collect();
        assert_eq!(dates, vec!["2025-01-01", "2025-01-02", "2025-01-05"]);

        let snapshot = must(store.refresh_rating(MetricType::Kda, today));
        assert_eq!(snapshot.data_points, 2);
    }

    #[test]
    fn multiplier_is_persisted_sanitized_and_refreshes_all_metrics() {
        let mut store = fixture_store();
        let today = day("2025-01-02");
        assert_eq!(must(store.target_multiplier()), 1.5);

        let _ = must(store.log_entry(
            MetricType::Kda,
            day("2025-01-01"),
            EntryValues::kda(2, 2, 0),
            today,
        ));

        let update = must(store.set_target_multiplier(2.0, today));
        assert_eq!(update.target_multiplier, 2.0);
        assert_eq!(update.snapshots.len(), MetricType::ALL.len());
        assert_eq!(must(store.target_multiplier()), 2.0);

        let kda = match must(store.get_snapshot(MetricType::Kda)) {
            Some(value) => value,
            None => panic!("expected cached kda snapshot"),
        };
        assert_eq!(kda.multiplier, 2.0);
        assert_eq!(kda.target, kda.baseline * 2.0);

        let clamped = must(store.set_target_multiplier(0.2, today));
        assert_eq!(clamped.target_multiplier, 1.0);
    }

    #[test]
    fn corrupt_multiplier_setting_falls_back_to_default() {
        let store = fixture_store();
        let updated = store.connection().execute(
            "UPDATE tracker_settings SET setting_value = 'fast' WHERE setting_key = ?1",
            params![TARGET_MULTIPLIER_KEY],
        );
        if let Err(err) = updated {
            panic!("failed to corrupt setting: {err}");
        }

        assert_eq!(must(store.target_multiplier()), 1.5);
    }

    #[test]
    fn cached_snapshot_matches_fresh_computation() {
        let mut store = fixture_store();
        let today = day("2025-01-03");

        for (raw, kills) in [("2025-01-01", 2), ("2025-01-02", 6), ("2025-01-03", 3)] {
            let _ = must(store.log_entry(
                MetricType::Kda,
                day(raw),
                EntryValues::kda(kills, 2, 0),
                today,
            ));
        }

        let cached = match must(store.get_snapshot(MetricType::Kda)) {
            Some(value) => value,
            None => panic!("expected cached snapshot"),
        };
        let history = must(store.list_history(MetricType::Kda));
        let fresh = compute_rating(
            &history,
            today,
            must(store.target_multiplier()),
            MetricType::Kda,
            &must(store.active_ruleset()),
        );

        assert_eq!(cached, fresh);
        assert_eq!(fresh.rating, 1525);
    }

    #[test]
    fn newer_ruleset_version_becomes_active() {
        let store = fixture_store();
        let mut ruleset = RatingRuleset::v1();
        ruleset.ruleset_version = 2;
        ruleset.conversion_factor = 25.0;

        must(store.upsert_ruleset(&ruleset));
        assert_eq!(must(store.active_ruleset()), ruleset);

        let mut invalid = RatingRuleset::v1();
        invalid.ruleset_version = 3;
        invalid.risk_window = 0;
        assert!(store.upsert_ruleset(&invalid).is_err());
        assert_eq!(must(store.active_ruleset()).ruleset_version, 2);
    }

    #[test]
    fn older_ruleset_is_rejected_without_writing() {
        let store = fixture_store();
        let mut newer = RatingRuleset::v1();
        newer.ruleset_version = 3;
        assert_eq!(must(store.load_ruleset(&newer)), newer);

        let mut older = RatingRuleset::v1();
        older.ruleset_version = 2;
        let err = match store.load_ruleset(&older) {
            Ok(_) => panic!("expected older ruleset to be rejected"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("older than active version 3"));

        let stored: i64 = match store.connection().query_row(
            "SELECT COUNT(*) FROM rating_rulesets WHERE ruleset_version = 2",
            [],
            |row| row.get(0),
        ) {
            Ok(value) => value,
            Err(err) => panic!("failed to count rulesets: {err}"),
        };
        assert_eq!(stored, 0);
        assert_eq!(must(store.active_ruleset()), newer);

        let mut revised = newer.clone();
        revised.conversion_factor = 40.0;
        assert_eq!(must(store.load_ruleset(&revised)), revised);
    }

    #[test]
    fn invalid_ruleset_json_is_reported_clearly() {
        let store = fixture_store();
        let inserted = store.connection().execute(
            "INSERT INTO rating_rulesets(ruleset_version, ruleset_json, created_at)
             VALUES (?1, ?2, ?3)",
            params![99_i64, "not-json", "2025-01-01T00:00:00Z"],
        );
        if let Err(err) = inserted {
            panic!("failed to insert invalid ruleset fixture: {err}");
        }

        let err = match store.active_ruleset() {
            Ok(_) => panic!("expected active_ruleset failure on invalid ruleset JSON"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("invalid stored ruleset JSON"));
    }

    #[test]
    fn invalid_stored_day_is_reported_clearly() {
        let store = fixture_store();
        let inserted = store.connection().execute(
            "INSERT INTO daily_aggregates(metric, day, totals_json, entry_count, entries_json, updated_at)
             VALUES ('adr', '2025-13-01', '{\"kind\":\"rate\",\"value\":1.0}', 1, '[]', '2025-01-01T00:00:00Z')",
            [],
        );
        if let Err(err) = inserted {
            panic!("failed to insert invalid day fixture: {err}");
        }

        let err = match store.list_history(MetricType::Damage) {
            Ok(_) => panic!("expected list_history failure on invalid day"),
            Err(err) => err,
        };
        assert!(format!("{err:#}").contains("2025-13-01"));
    }

    #[test]
    fn schema_contract_contains_expected_tables() {
        let store = fixture_store();
        for table in [
            "schema_migrations",
            "rating_rulesets",
            "daily_aggregates",
            "rating_snapshots",
            "tracker_settings",
        ] {
            assert!(
                table_exists(store.connection(), table),
                "missing table {table}"
            );
        }
    }

    #[test]
    fn migration_is_idempotent_and_preserves_existing_data() {
        let mut store = fixture_store();
        let today = day("2025-01-02");
        let logged = must(store.log_entry(
            MetricType::HeadshotRate,
            today,
            EntryValues::Rate { value: 22.5 },
            today,
        ));
        let _ = must(store.set_target_multiplier(1.8, today));

        must(store.migrate());

        let stored = match must(store.get_day(MetricType::HeadshotRate, today)) {
            Some(value) => value,
            None => panic!("expected day after second migrate"),
        };
        assert_eq!(stored, logged.day);
        assert_eq!(must(store.target_multiplier()), 1.8);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn prop_stored_totals_always_match_entries(
            ops in prop::collection::vec((0u8..3, 0i64..20, 0i64..10, any::<bool>()), 1..30)
        ) {
            let mut store = fixture_store();
            let today = day("2025-01-03");
            let dates = [day("2025-01-01"), day("2025-01-02"), day("2025-01-03")];

            for (slot, kills, deaths, delete_first) in ops {
                let date = dates[usize::from(slot)];
                if delete_first {
                    if let Some(existing) = must(store.get_day(MetricType::Kda, date)) {
                        if let Some(entry) = existing.entries.first() {
                            let _ = must(store.delete_entry(MetricType::Kda, date, &entry.key(), today));
                            continue;
                        }
                    }
                }
                let _ = must(store.log_entry(
                    MetricType::Kda,
                    date,
                    EntryValues::kda(kills, deaths, 1),
                    today,
                ));
            }

            for aggregate in must(store.list_history(MetricType::Kda)) {
                let expected = statline_core::recompute_daily_totals(&aggregate.entries, MetricType::Kda);
                prop_assert_eq!(aggregate.totals, expected.totals);
                prop_assert_eq!(aggregate.entry_count, expected.entry_count);
            }

            let cached = must(store.get_snapshot(MetricType::Kda));
            let fresh = must(store.refresh_rating(MetricType::Kda, today));
            prop_assert_eq!(cached, Some(fresh));
        }
    }
}
