use claims_queue::{ClaimsQueueConfig, ClaimsViewModel, HttpClaimsApi, LoadOutcome};
use claims_queue_service::{create_app, init_tracing, telemetry::spawn_notification_logger};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = ClaimsQueueConfig::from_env()?;
    let api = HttpClaimsApi::new(&config)?;
    info!(api_base_url = %config.api_base_url, page_size = config.page_size, "Claims API configured");

    let view_model = Arc::new(ClaimsViewModel::new(Arc::new(api), config));
    spawn_notification_logger(&view_model);

    match view_model.load_claims(false).await {
        LoadOutcome::Applied { count } => info!(count, "Initial claims load complete"),
        LoadOutcome::Failed(message) => warn!(error = %message, "Initial claims load failed"),
        LoadOutcome::Stale => {}
    }

    let auto_refresh = std::env::var("CLAIMS_AUTO_REFRESH")
        .map(|v| !v.eq_ignore_ascii_case("false"))
        .unwrap_or(true);
    if auto_refresh {
        view_model.start_auto_refresh();
    }

    let port = std::env::var("PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse::<u16>()
        .unwrap_or(8080);

    let app = create_app(view_model.clone());
    let listener = TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    let addr = listener.local_addr()?;

    info!("Claims Queue Service starting on {}", addr);
    info!("Queue endpoint: GET http://{}/queue", addr);

    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    Ok(())
}
