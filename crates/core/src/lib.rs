pub mod clock;
pub mod config;
pub mod error;
pub mod types;

pub use clock::{Clock, MonotonicClock, SystemClock, TaskHandle};
pub use config::AppConfig;
pub use error::{FaultlineError, FaultlineResult};
