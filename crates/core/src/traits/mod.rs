pub mod scheduler;
pub mod snapshot;
pub mod worker_client;

pub use scheduler::*;
pub use snapshot::*;
pub use worker_client::*;
