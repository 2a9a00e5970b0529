pub mod alert;
pub mod evaluate;
pub mod labeling;
pub mod runner;
pub mod threshold;
pub mod window;

pub use alert::{AlertState, AlertStateMachine, AlertTrace};
pub use evaluate::MetricsEvaluator;
pub use labeling::{ExplosionBaseline, LabelerConfig, OutcomeLabeler};
pub use runner::{WalkForwardResult, WalkForwardRunner};
pub use threshold::ThresholdCalibrator;
pub use window::{WindowPair, WindowScheduler};
