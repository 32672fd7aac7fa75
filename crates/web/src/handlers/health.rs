use std::sync::Arc;

use archiver_github::{ApiMetrics, MetricsSnapshot};
use archiver_pipeline::Registry;
use axum::{Json, extract::State};
use serde::Serialize;

#[derive(Serialize)]
pub struct Health {
    status: &'static str,
    events: Vec<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    github: Option<MetricsSnapshot>,
}

pub async fn healthz(
    State(registry): State<Arc<Registry>>,
    State(metrics): State<Option<Arc<ApiMetrics>>>,
) -> Json<Health> {
    Json(Health {
        status: "ok",
        events: registry.event_types(),
        github: metrics.map(|m| m.snapshot()),
    })
}
