//! Chaos engine: the failure injector and the recovery detector it starts
//! after every executed kill.

pub mod detector;
pub mod injector;

pub use detector::{DetectorInfo, HealthStreak, RecoveryDetector};
pub use injector::{FailureInjector, InjectionReceipt};
