pub mod app;
pub mod handlers;
pub mod shutdown;
pub mod telemetry;

pub use app::Application;
pub use shutdown::ShutdownManager;
