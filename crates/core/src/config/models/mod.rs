pub mod app_config;
pub mod database;
pub mod observability;
pub mod scheduler;

// Re-export main types for easier imports
pub use app_config::AppConfig;
pub use database::{DatabaseConfig, MEMORY_DATABASE_URL};
pub use observability::{LogFormat, ObservabilityConfig};
pub use scheduler::{
    bounded_duration, checked_duration, ReaperConfig, SchedulerConfig, MAX_DURATION_SECONDS,
};
