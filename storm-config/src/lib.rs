use config::{Config, Environment, File};
use std::path::{Path, PathBuf};
use storm_core::{Result, StormConfig, StormError};
use tracing::info;

const ENV_PREFIX: &str = "STORM";
/// One day of 5 minute bars.
const MAX_CONFIRM_BARS: u32 = 288;

/// Layered configuration: a YAML file overridden by `STORM_*` variables,
/// where `__` separates nested keys (`STORM_BACKTEST__SCORE_QTILE=0.99`).
pub struct ConfigManager {
    path: PathBuf,
    storm_config: StormConfig,
}

impl ConfigManager {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let storm_config = Self::load(&path)?;

        info!("Configuration loaded from {}", path.display());

        Ok(Self { path, storm_config })
    }

    fn load(path: &Path) -> Result<StormConfig> {
        Config::builder()
            .add_source(File::from(path))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|config| config.try_deserialize())
            .map_err(|e| StormError::Configuration(e.to_string()))
    }

    pub fn get_config(&self) -> &StormConfig {
        &self.storm_config
    }

    pub fn get_config_mut(&mut self) -> &mut StormConfig {
        &mut self.storm_config
    }

    pub fn into_config(self) -> StormConfig {
        self.storm_config
    }

    /// Re-reads the file and environment; the current config is kept on error.
    pub fn reload(&mut self) -> Result<()> {
        self.storm_config = Self::load(&self.path)?;

        info!("Configuration reloaded");
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let config = &self.storm_config;
        let backtest = &config.backtest;

        if config.universe.resolve().is_empty() {
            return Err(StormError::Configuration("No symbols configured".to_string()));
        }

        if !(backtest.score_qtile > 0.0 && backtest.score_qtile < 1.0) {
            return Err(StormError::Configuration(format!(
                "score_qtile must lie in (0, 1), got {}",
                backtest.score_qtile
            )));
        }

        let positive = [
            ("train_window_days", backtest.train_window_days),
            ("retrain_every_hours", backtest.retrain_every_hours),
            ("threshold_window_days", backtest.threshold_window_days),
            ("confirm_bars_5m", backtest.confirm_bars_5m),
            ("coarse_interval_minutes", backtest.coarse_interval_minutes),
            ("fine_interval_minutes", backtest.fine_interval_minutes),
            ("trailing_days", config.evaluation.trailing_days),
            ("rolling_minutes", config.evaluation.rolling_minutes),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(StormError::Configuration(format!("{} must be positive", name)));
        }

        if backtest.confirm_bars_5m > MAX_CONFIRM_BARS {
            return Err(StormError::Configuration(format!(
                "confirm_bars_5m must be at most {}, got {}",
                MAX_CONFIRM_BARS, backtest.confirm_bars_5m
            )));
        }

        if backtest.prealert_consecutive_mins == 0 {
            return Err(StormError::Configuration(
                "prealert_consecutive_mins must be positive".to_string(),
            ));
        }

        if backtest.coarse_interval_minutes % backtest.fine_interval_minutes != 0 {
            return Err(StormError::Configuration(format!(
                "coarse interval {}m is not a multiple of fine interval {}m",
                backtest.coarse_interval_minutes, backtest.fine_interval_minutes
            )));
        }

        if backtest.horizons_min.is_empty() || backtest.horizons_min.contains(&0) {
            return Err(StormError::Configuration(
                "horizons_min must be non-empty and positive".to_string(),
            ));
        }

        if config.runtime.max_parallel == 0 {
            return Err(StormError::Configuration("max_parallel must be positive".to_string()));
        }

        if config.evaluation.price_column.is_empty() {
            return Err(StormError::Configuration("Price column not configured".to_string()));
        }

        info!("Configuration validation passed");
        Ok(())
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(&self.storm_config)
            .map_err(|e| StormError::Configuration(e.to_string()))?;

        std::fs::write(path.as_ref(), yaml)?;

        info!("Configuration saved to {}", path.as_ref().display());
        Ok(())
    }
}
