use axum::{routing::get, Router};
use futures::future::ready;
use metrics_exporter_prometheus::PrometheusBuilder;

pub async fn index() -> &'static str {
    "kafka forwarder service"
}

pub fn liveness_router() -> Router {
    Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(|| ready("ok")))
}

/// Install the Prometheus recorder and mount it at /metrics. Call once, last.
pub fn setup_metrics_routes(router: Router) -> Router {
    let recorder_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus metrics recorder");

    router.route(
        "/metrics",
        get(move || std::future::ready(recorder_handle.render())),
    )
}

pub async fn serve(router: Router, bind: &str) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, router).await?;
    Ok(())
}
