pub mod database;
pub mod memory;
pub mod observability;
pub mod storage;

pub use database::*;
pub use memory::*;
pub use observability::*;
pub use storage::Storage;
