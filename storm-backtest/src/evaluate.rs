use chrono::{DateTime, Utc};
use std::collections::HashMap;
use storm_core::{Alert, LabelKey, Metrics, MetricsReport, Outcome};

/// Precision/recall of alerts against their explosion labels.
///
/// Every alert is a positive prediction and only alerted timestamps are
/// ever labeled, so false negatives are structurally zero and recall is
/// 1.0 whenever any alert hit.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsEvaluator;

impl MetricsEvaluator {
    /// Alerts are left-joined to outcomes on `(symbol, timestamp)`; an alert
    /// without an outcome counts as a miss. No alerts means no rows at all.
    pub fn evaluate(alerts: &[Alert], outcomes: &[Outcome], horizons_min: &[u32]) -> MetricsReport {
        let mut report = MetricsReport::new();
        if alerts.is_empty() {
            return report;
        }

        let by_key: HashMap<(&str, DateTime<Utc>), &Outcome> = outcomes
            .iter()
            .map(|o| ((o.symbol.as_str(), o.timestamp), o))
            .collect();

        for key in LabelKey::grid(horizons_min) {
            let (tp, fp) = alerts.iter().fold((0u64, 0u64), |(tp, fp), alert| {
                let hit = by_key
                    .get(&(alert.symbol.as_str(), alert.timestamp))
                    .and_then(|o| o.label(&key))
                    .unwrap_or(false);
                if hit {
                    (tp + 1, fp)
                } else {
                    (tp, fp + 1)
                }
            });

            report.insert(key.metric_key(), Metrics::from_counts(tp, fp, 0));
        }

        report
    }
}
