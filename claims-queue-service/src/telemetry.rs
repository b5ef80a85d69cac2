use claims_queue::{ClaimsViewModel, NotificationLevel};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize structured tracing based on environment variables
pub fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "claims_queue_service=debug,claims_queue=debug,tower_http=debug".into()
    });

    match log_format.as_str() {
        "pretty" => {
            // Human-readable logging for development
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_level(true),
                )
                .init();
        }
    }
}

/// Forward view-model notifications to the log until the view-model goes away.
pub fn spawn_notification_logger(view_model: &Arc<ClaimsViewModel>) -> tokio::task::JoinHandle<()> {
    let mut notifications = view_model.subscribe();
    tokio::spawn(async move {
        loop {
            match notifications.recv().await {
                Ok(note) => match note.level {
                    NotificationLevel::Error => {
                        warn!(claim_id = ?note.claim_id, "{}", note.message)
                    }
                    NotificationLevel::Info | NotificationLevel::Success => {
                        info!(claim_id = ?note.claim_id, "{}", note.message)
                    }
                },
                Err(RecvError::Lagged(skipped)) => {
                    error!(skipped, "Notification log fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
