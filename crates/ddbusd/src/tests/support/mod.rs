//! Shared harness for the listener's behavioural and unit suites.

mod config_loader;
mod process_world;
mod reporter;
mod world;

pub use config_loader::{FailingConfigLoader, TestConfigLoader};
pub use process_world::{ProcessTestWorld, StepResult, snapshot_status};
pub use reporter::{HealthEvent, RecordingHealthReporter};
pub use world::{TestWorld, world};
