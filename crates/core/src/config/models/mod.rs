pub mod api_observability;
pub mod app_config;
pub mod intake_snapshot;
pub mod orchestration;

pub use api_observability::{ApiConfig, ObservabilityConfig};
pub use app_config::AppConfig;
pub use intake_snapshot::{IntakeConfig, SnapshotConfig};
pub use orchestration::{validate_workers, DispatcherConfig, HealthConfig, WorkerEndpointConfig};
