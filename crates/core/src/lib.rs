pub mod cancellation;
pub mod config;
pub mod errors;
pub mod models;
pub mod traits;

pub use cancellation::{ExecutionCancelled, ExecutionContext};
pub use config::AppConfig;
pub use errors::{SchedulerError, SchedulerResult};
pub use models::*;
pub use traits::*;
