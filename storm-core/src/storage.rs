use crate::{
    Alert, FeatureFrame, FeatureRow, LabelKey, MetricsReport, Outcome, PathsConfig, PriceSeries,
    Result, ScoreRow, StormError, TimeSeries,
};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const FEATURES_FILE: &str = "features_5m.csv";
const MINUTE_FILE: &str = "minute.csv";

const ALERT_COLUMNS: [&str; 5] = ["ts", "symbol", "anomaly_score", "threshold", "leader_state"];
const SCORE_COLUMNS: [&str; 4] = ["ts", "anomaly_score", "leader_state", "threshold"];

/// Owns the on-disk layout. Every path is partitioned by symbol, so
/// concurrent symbol runs never write the same file.
#[derive(Debug, Clone)]
pub struct StorageManager {
    paths: PathsConfig,
}

impl StorageManager {
    pub fn new(paths: PathsConfig) -> Self {
        Self { paths }
    }

    pub fn features_path(&self, symbol: &str) -> PathBuf {
        self.paths.features_dir.join(symbol).join(FEATURES_FILE)
    }

    pub fn minute_path(&self, symbol: &str) -> PathBuf {
        self.paths.processed_dir.join(symbol).join(MINUTE_FILE)
    }

    pub fn alerts_path(&self, symbol: &str) -> PathBuf {
        self.paths.artifacts_dir.join("alerts").join(format!("{}.csv", symbol))
    }

    pub fn scores_path(&self, symbol: &str) -> PathBuf {
        self.paths.artifacts_dir.join("scores").join(format!("{}.csv", symbol))
    }

    pub fn metrics_dir(&self) -> PathBuf {
        self.paths.artifacts_dir.join("metrics")
    }

    pub fn load_features(&self, symbol: &str) -> Result<FeatureFrame> {
        let path = self.features_path(symbol);
        let (columns, rows) = read_numeric_csv(&path)?;
        if rows.is_empty() {
            return Err(StormError::MissingData(format!(
                "{}: no feature rows in {}",
                symbol,
                path.display()
            )));
        }

        let series = TimeSeries::from_pairs(
            rows.into_iter().map(|(ts, values)| (ts, FeatureRow::new(values))),
        )?;
        debug!("Loaded {} feature rows for {}", series.len(), symbol);

        FeatureFrame::new(columns, series)
    }

    /// Loads the fine-grid price column, forward-filling gaps and
    /// back-filling any leading gap.
    pub fn load_prices(&self, symbol: &str, column: &str) -> Result<PriceSeries> {
        let path = self.minute_path(symbol);
        let (columns, rows) = read_numeric_csv(&path)?;
        let idx = columns.iter().position(|c| c == column).ok_or_else(|| {
            StormError::MissingData(format!(
                "{}: column '{}' not found in {}",
                symbol,
                column,
                path.display()
            ))
        })?;

        let raw: Vec<Option<f64>> = rows.iter().map(|(_, values)| values[idx]).collect();
        let filled = fill_prices(&raw).ok_or_else(|| {
            StormError::MissingData(format!("{}: no usable '{}' prices", symbol, column))
        })?;

        let series = TimeSeries::new(rows.into_iter().map(|(ts, _)| ts).collect(), filled)?;
        debug!("Loaded {} price rows for {}", series.len(), symbol);
        Ok(series)
    }

    pub fn load_alerts(&self, symbol: &str) -> Result<Vec<Alert>> {
        let path = self.alerts_path(symbol);
        if !path.exists() {
            return Err(StormError::MissingData(format!(
                "{}: no alerts file at {}",
                symbol,
                path.display()
            )));
        }

        let mut reader = csv::Reader::from_path(&path)?;
        let alerts = reader
            .deserialize::<Alert>()
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(alerts)
    }

    /// Writes a symbol's backtest outputs. Both files are staged before
    /// either is moved into place, and alerts move first: if that rename
    /// fails, neither previous file is touched.
    pub fn write_backtest(&self, symbol: &str, alerts: &[Alert], scores: &[ScoreRow]) -> Result<()> {
        let alerts_path = self.alerts_path(symbol);
        let scores_path = self.scores_path(symbol);

        let alerts_tmp = stage(&alerts_path, &serialize_rows(alerts, &ALERT_COLUMNS)?)?;
        let scores_tmp = match serialize_rows(scores, &SCORE_COLUMNS)
            .and_then(|bytes| stage(&scores_path, &bytes))
        {
            Ok(tmp) => tmp,
            Err(e) => {
                let _ = fs::remove_file(&alerts_tmp);
                return Err(e);
            }
        };

        if let Err(e) = commit(&alerts_tmp, &alerts_path) {
            let _ = fs::remove_file(&scores_tmp);
            return Err(e);
        }
        commit(&scores_tmp, &scores_path)?;

        info!(
            "Saved {} alerts and {} score rows for {}",
            alerts.len(),
            scores.len(),
            symbol
        );
        Ok(())
    }

    pub fn write_evaluation(
        &self,
        alerts: &[Alert],
        outcomes: &[Outcome],
        report: &MetricsReport,
        horizons_min: &[u32],
    ) -> Result<PathBuf> {
        let dir = self.metrics_dir();
        let keys = LabelKey::grid(horizons_min);

        let metrics = serde_json::to_vec_pretty(report)?;
        let alerts_csv = serialize_rows(alerts, &ALERT_COLUMNS)?;
        let outcomes_csv = render_outcomes(outcomes, &keys)?;
        let merged_csv = render_alert_outcomes(alerts, outcomes, &keys)?;

        write_atomic(&dir.join("metrics.json"), &metrics)?;
        write_atomic(&dir.join("alerts_all.csv"), &alerts_csv)?;
        write_atomic(&dir.join("outcomes_all.csv"), &outcomes_csv)?;
        write_atomic(&dir.join("alert_outcomes.csv"), &merged_csv)?;

        info!("Saved metrics and full results to {}", dir.display());
        Ok(dir.join("metrics.json"))
    }
}

type NumericRows = Vec<(DateTime<Utc>, Vec<Option<f64>>)>;

/// Reads a CSV whose first `ts`/`timestamp` column holds timestamps and
/// whose remaining columns are numeric.
fn read_numeric_csv(path: &Path) -> Result<(Vec<String>, NumericRows)> {
    if !path.exists() {
        return Err(StormError::MissingData(format!("missing input {}", path.display())));
    }

    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    let ts_idx = headers
        .iter()
        .position(|h| h == "ts" || h == "timestamp")
        .unwrap_or(0);

    let columns: Vec<String> = headers
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != ts_idx)
        .map(|(_, h)| h.to_string())
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let ts = parse_timestamp(record.get(ts_idx).unwrap_or_default())?;
        let values = record
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != ts_idx)
            .map(|(_, field)| parse_value(field))
            .collect::<Result<Vec<_>>>()?;
        rows.push((ts, values));
    }

    Ok((columns, rows))
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS` (UTC) or epoch milliseconds.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();

    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Ok(naive.and_utc());
    }

    raw.parse::<i64>()
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .ok_or_else(|| StormError::InvalidSeries(format!("unparsable timestamp '{}'", raw)))
}

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_value(raw: &str) -> Result<Option<f64>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }

    let value: f64 = raw
        .parse()
        .map_err(|_| StormError::InvalidSeries(format!("unparsable value '{}'", raw)))?;
    Ok(Some(value).filter(|v| v.is_finite()))
}

/// Forward fill, then back fill the leading gap. `None` when nothing is usable.
fn fill_prices(raw: &[Option<f64>]) -> Option<Vec<f64>> {
    let first = raw.iter().flatten().copied().find(|p| *p > 0.0)?;

    let mut last = first;
    Some(
        raw.iter()
            .map(|value| {
                if let Some(price) = value.filter(|p| *p > 0.0) {
                    last = price;
                }
                last
            })
            .collect(),
    )
}

/// The header is written explicitly so that an empty table still has one.
fn serialize_rows<T: serde::Serialize>(rows: &[T], header: &[&str]) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(header)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.into_inner().map_err(|e| StormError::Io(e.into_error()))
}

fn render_outcomes(outcomes: &[Outcome], keys: &[LabelKey]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    let mut header = vec!["ts".to_string(), "symbol".to_string(), "leader_state".to_string()];
    header.extend(keys.iter().map(LabelKey::column_name));
    writer.write_record(&header)?;

    for outcome in outcomes {
        let mut record = vec![
            format_timestamp(outcome.timestamp),
            outcome.symbol.clone(),
            outcome.leader_state.to_string(),
        ];
        record.extend(keys.iter().map(|k| render_label(outcome.label(k))));
        writer.write_record(&record)?;
    }

    writer.into_inner().map_err(|e| StormError::Io(e.into_error()))
}

fn render_alert_outcomes(alerts: &[Alert], outcomes: &[Outcome], keys: &[LabelKey]) -> Result<Vec<u8>> {
    let by_key: HashMap<(&str, DateTime<Utc>), &Outcome> = outcomes
        .iter()
        .map(|o| ((o.symbol.as_str(), o.timestamp), o))
        .collect();

    let mut writer = csv::Writer::from_writer(Vec::new());

    let mut header = vec![
        "ts".to_string(),
        "symbol".to_string(),
        "anomaly_score".to_string(),
        "threshold".to_string(),
        "leader_state".to_string(),
    ];
    header.extend(keys.iter().map(LabelKey::column_name));
    writer.write_record(&header)?;

    for alert in alerts {
        let outcome = by_key.get(&(alert.symbol.as_str(), alert.timestamp));
        let mut record = vec![
            format_timestamp(alert.timestamp),
            alert.symbol.clone(),
            alert.anomaly_score.to_string(),
            alert.threshold.to_string(),
            alert.leader_state.to_string(),
        ];
        record.extend(
            keys.iter()
                .map(|k| render_label(outcome.and_then(|o| o.label(k)))),
        );
        writer.write_record(&record)?;
    }

    writer.into_inner().map_err(|e| StormError::Io(e.into_error()))
}

fn render_label(label: Option<bool>) -> String {
    label.map(|b| b.to_string()).unwrap_or_default()
}

/// Write to a sibling temp file, then rename over the target.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = stage(path, bytes)?;
    commit(&tmp, path)
}

/// Writes `bytes` next to `path` and returns the temp file.
fn stage(path: &Path, bytes: &[u8]) -> Result<PathBuf> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, bytes)?;
    Ok(tmp)
}

/// Renames a staged file over its target; the temp file is removed on failure.
fn commit(tmp: &Path, path: &Path) -> Result<()> {
    if let Err(e) = fs::rename(tmp, path) {
        let _ = fs::remove_file(tmp);
        return Err(e.into());
    }
    Ok(())
}
