pub mod log_throttle;
pub mod logger;
pub mod task;

pub use log_throttle::LogThrottle;
pub use logger::init_logging;
pub use task::BackgroundTask;
