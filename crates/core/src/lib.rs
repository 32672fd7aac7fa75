pub mod api;
pub mod config;
pub mod models;
pub mod util;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// A delivery the service could not complete, answered with `status` and a plain text
/// description of the failure.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response { (self.status, self.message).into_response() }
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;

    use super::*;

    #[tokio::test]
    async fn test_into_response() {
        let response =
            AppError::new(StatusCode::SERVICE_UNAVAILABLE, "processing cancelled").into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"processing cancelled");
    }
}
