use axum::routing::{delete, get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::trace::TraceLayer;

use crate::config::{create_cors_layer, create_security_headers_layer, Config};
use crate::handlers::{enrollments, health_check, tickets};
use crate::state::AppState;

/// `metrics` is the installed Prometheus recorder; when present its snapshot
/// is served on `/metrics`.
pub fn create_routes(
    state: AppState,
    config: &Config,
    metrics: Option<PrometheusHandle>,
) -> Router {
    let api = Router::new()
        .route("/enrollments", post(enrollments::admit).get(enrollments::list))
        .route("/enrollments/:id", delete(enrollments::cancel))
        .route("/tickets", post(tickets::issue))
        .route("/tickets/validate", post(tickets::validate))
        .route("/tickets/redeem", post(tickets::redeem));

    let mut router = Router::new()
        .route("/health", get(health_check))
        .merge(api);
    if let Some(handle) = metrics {
        router = router.route("/metrics", get(move || async move { handle.render() }));
    }

    router
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(create_security_headers_layer(config))
        .layer(create_cors_layer(&config.cors_allowed_origins))
}
