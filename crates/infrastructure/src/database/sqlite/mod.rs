pub mod sqlite_action_log_repository;
pub mod sqlite_execution_repository;
pub mod sqlite_metadata_repository;

pub use sqlite_action_log_repository::SqliteJobActionLogRepository;
pub use sqlite_execution_repository::SqliteExecutionRepository;
pub use sqlite_metadata_repository::SqliteJobMetadataRepository;
