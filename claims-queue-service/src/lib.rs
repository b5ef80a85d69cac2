pub mod models;
pub mod service;
pub mod telemetry;

pub use service::{AppState, create_app};
pub use telemetry::init_tracing;
