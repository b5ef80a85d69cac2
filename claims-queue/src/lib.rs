pub mod api;
pub mod classify;
pub mod config;
pub mod error;
pub mod export;
pub mod models;
pub mod query;
pub mod view_model;

// Re-export commonly used types
pub use api::{ClaimsApi, Endpoint, HttpClaimsApi, InMemoryClaimsApi};
pub use classify::{bucket, priority, title_case};
pub use config::ClaimsQueueConfig;
pub use error::{ClaimsError, Result};
pub use export::{CsvDialect, UnknownCsvDialect, export_csv, export_csv_with, export_file_name};
pub use models::{
    Bucket, BucketFilter, Claim, ClaimStatusUpdate, Priority, RawClaim, RawProgress,
    StatusCounts, StatusTimestamps, UnknownBucket,
};
pub use query::{filter_claims, status_counts};
pub use view_model::{
    ClaimsViewModel, LoadOutcome, Notification, NotificationLevel, QueueView, RowActivity,
    RowOutcome,
};
