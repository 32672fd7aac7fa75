use std::sync::Arc;

use archiver_core::AppError;
use archiver_github::webhook::GitHubDelivery;
use archiver_pipeline::{ArchiveError, Outcome, Registry};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

pub async fn webhook(
    State(registry): State<Arc<Registry>>,
    State(shutdown): State<CancellationToken>,
    delivery: GitHubDelivery,
) -> Result<Response, AppError> {
    let span = tracing::info_span!(
        "delivery",
        event = %delivery.event,
        id = %delivery.delivery_id,
    );
    handle(&registry, &shutdown, delivery).instrument(span).await
}

async fn handle(
    registry: &Registry,
    shutdown: &CancellationToken,
    delivery: GitHubDelivery,
) -> Result<Response, AppError> {
    if delivery.event == "ping" {
        tracing::info!("Received ping");
        return Ok((StatusCode::OK, "pong").into_response());
    }
    let Some(result) = registry.dispatch(&delivery.event, shutdown, &delivery.body).await else {
        tracing::info!("Ignoring unhandled event {}", delivery.event);
        return Ok((StatusCode::OK, "Event ignored").into_response());
    };
    match result {
        Ok(Outcome::Skipped { action }) => {
            Ok((StatusCode::OK, format!("Skipped action {action}")).into_response())
        }
        Ok(Outcome::Archived { namespace, object_key, .. }) => {
            Ok((StatusCode::OK, format!("Archived {namespace}/{object_key}")).into_response())
        }
        Err(e) => Err(rejection(e)),
    }
}

fn status_for(e: &ArchiveError) -> StatusCode {
    match e {
        ArchiveError::MalformedEvent(_) => StatusCode::BAD_REQUEST,
        ArchiveError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        ArchiveError::AuthResolution { .. }
        | ArchiveError::RunLookup { .. }
        | ArchiveError::LogUrlResolution { .. }
        | ArchiveError::Fetch { .. }
        | ArchiveError::Compression { .. }
        | ArchiveError::Storage { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn rejection(e: ArchiveError) -> AppError {
    let status = status_for(&e);
    let message = format!("{:#}", anyhow::Error::from(e));
    if status.is_server_error() {
        tracing::error!("{message}");
    } else {
        tracing::warn!("{message}");
    }
    AppError::new(status, message)
}
