use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api::handler::{due_payouts, health_check, last_run, trigger_run, AppState};

pub fn create_app(state: AppState) -> Router {
    info!("⚙️ Setting up HTTP routes...");

    let app = Router::new()
        .route("/health", get(health_check))
        .nest(
            "/api/v1",
            Router::new()
                // Distribution runs
                .route("/runs", post(trigger_run))
                .route("/runs/last", get(last_run))
                // Read-only payout view
                .route("/payouts/due", get(due_payouts)),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("✓ HTTP routes configured");
    app
}

pub async fn run_server<F>(app: Router, bind_address: &str, shutdown: F) -> std::io::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!("🌐 Server listening on: {}", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}
