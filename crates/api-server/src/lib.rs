#![warn(clippy::unwrap_used)]

pub mod chaos_rest;
pub mod pipeline_rest;
pub mod recovery_rest;
pub mod rest;
pub mod server;

pub use rest::AppState;
pub use server::{router, ApiServer};
