use std::path::PathBuf;
use storm_anomaly::build_scorer;
use storm_backtest::{LabelerConfig, MetricsEvaluator, OutcomeLabeler, WalkForwardRunner};
use storm_core::{
    storage::StorageManager, Alert, Outcome, PriceSeries, Result, RunStatus, StormConfig,
    SymbolStatus,
};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Walk-forward scoring and alerting; writes alerts and scores.
    Backtest,
    /// Labels previously written alerts.
    Evaluate,
    /// Backtest and label in one pass.
    Run,
}

impl Stage {
    pub fn labels(&self) -> bool {
        matches!(self, Stage::Evaluate | Stage::Run)
    }
}

/// Result of one symbol's task. Alerts and outcomes are only carried for
/// stages that feed the metrics step.
#[derive(Debug, Clone)]
pub struct SymbolRun {
    pub status: SymbolStatus,
    pub alerts: Vec<Alert>,
    pub outcomes: Vec<Outcome>,
}

impl SymbolRun {
    pub fn failed(status: SymbolStatus) -> Self {
        Self {
            status,
            alerts: Vec::new(),
            outcomes: Vec::new(),
        }
    }
}

/// Per-symbol pipeline shared by all batch tasks.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: StormConfig,
    storage: StorageManager,
}

impl Pipeline {
    pub fn new(config: StormConfig) -> Self {
        let storage = StorageManager::new(config.paths.clone());
        Self { config, storage }
    }

    /// Runs one symbol through `stage`. Errors never escape; they become
    /// the symbol's status.
    pub fn run_symbol(&self, symbol: &str, stage: Stage) -> SymbolRun {
        let result = match stage {
            Stage::Backtest => self.backtest(symbol).map(|(alerts, _)| SymbolRun {
                status: SymbolStatus::ok(symbol, format!("{} alerts", alerts.len())),
                alerts: Vec::new(),
                outcomes: Vec::new(),
            }),
            Stage::Evaluate => self.evaluate(symbol),
            Stage::Run => self.backtest(symbol).map(|(alerts, prices)| {
                let outcomes = self.label(&prices, &alerts);
                SymbolRun {
                    status: SymbolStatus::ok(
                        symbol,
                        format!("{} alerts, {} outcomes", alerts.len(), outcomes.len()),
                    ),
                    alerts,
                    outcomes,
                }
            }),
        };

        result.unwrap_or_else(|e| SymbolRun::failed(SymbolStatus::from_error(symbol, &e)))
    }

    /// Scores a symbol and writes its outputs. Nothing is written unless the
    /// whole walk-forward succeeds.
    fn backtest(&self, symbol: &str) -> Result<(Vec<Alert>, PriceSeries)> {
        let frame = self.storage.load_features(symbol)?;
        let prices = self
            .storage
            .load_prices(symbol, &self.config.evaluation.price_column)?;

        let mut scorer = build_scorer(&self.config.scorer);
        let runner =
            WalkForwardRunner::new(self.config.backtest.clone(), self.config.scorer.features.clone());
        let result = runner.run(symbol, &frame, &prices, scorer.as_mut())?;

        self.storage
            .write_backtest(symbol, &result.alerts, &result.scores)?;
        Ok((result.alerts, prices))
    }

    fn evaluate(&self, symbol: &str) -> Result<SymbolRun> {
        let alerts = self.storage.load_alerts(symbol)?;
        let prices = self
            .storage
            .load_prices(symbol, &self.config.evaluation.price_column)?;
        let outcomes = self.label(&prices, &alerts);

        Ok(SymbolRun {
            status: SymbolStatus::ok(symbol, format!("{} outcomes", outcomes.len())),
            alerts,
            outcomes,
        })
    }

    fn label(&self, prices: &PriceSeries, alerts: &[Alert]) -> Vec<Outcome> {
        let config = LabelerConfig::from_config(&self.config.evaluation, &self.config.backtest);
        OutcomeLabeler::new(prices, self.config.backtest.horizons_min.clone(), config)
            .label_all(alerts)
    }

    /// Pools the alerts and outcomes of every successful symbol and writes
    /// the cross-symbol metrics.
    pub fn write_metrics(&self, runs: &[SymbolRun]) -> Result<PathBuf> {
        let ok = runs.iter().filter(|run| run.status.status == RunStatus::Ok);
        let (alerts, outcomes): (Vec<Alert>, Vec<Outcome>) =
            ok.fold((Vec::new(), Vec::new()), |(mut alerts, mut outcomes), run| {
                alerts.extend(run.alerts.iter().cloned());
                outcomes.extend(run.outcomes.iter().cloned());
                (alerts, outcomes)
            });

        let horizons = &self.config.backtest.horizons_min;
        let report = MetricsEvaluator::evaluate(&alerts, &outcomes, horizons);
        for (key, metrics) in &report {
            debug!(
                "{}: precision {:.3} recall {:.3} f1 {:.3}",
                key, metrics.precision, metrics.recall, metrics.f1
            );
        }
        info!(
            "Metrics over {} alerts from {} symbols",
            alerts.len(),
            runs.len()
        );

        self.storage
            .write_evaluation(&alerts, &outcomes, &report, horizons)
    }
}
