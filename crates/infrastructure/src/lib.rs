pub mod http_worker_client;
pub mod observability;
pub mod snapshot;
pub mod task_store;
pub mod worker_registry;

pub use http_worker_client::HttpWorkerClient;
pub use observability::{init_metrics, init_structured_logging, LogFormat, LoggingConfig};
pub use snapshot::JsonFileSnapshotSink;
pub use task_store::{TaskStore, TaskTable};
pub use worker_registry::{WorkerRegistry, WorkerTable};
