use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::api::handler::{
    get_batch_status, health_check, latest_batch, mark_processed, orders_paid_webhook, AppState,
};

pub async fn create_app(state: AppState) -> Router {
    info!("⚙️ Setting up HTTP routes...");

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/webhooks/orders-paid", post(orders_paid_webhook))
        .route("/payouts/latest", get(latest_batch))
        .route("/payouts/mark-processed", post(mark_processed))
        .route("/payouts/:batch_id", get(get_batch_status))
        .layer(CorsLayer::very_permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("✓ HTTP routes configured");
    app
}

pub async fn run_server(app: Router, bind_address: &str) -> Result<(), Box<dyn std::error::Error>> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!("🌐 Server listening on: {}", bind_address);

    axum::serve(listener, app).await?;
    Ok(())
}
