use std::{fmt::Display, sync::Arc};

use anyhow::Result;
use archiver_core::config::Config;
use axum::{
    body::Bytes,
    extract::{FromRef, FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use hmac::{Hmac, Mac};
use sha2::Sha256;

/// A webhook delivery whose signature has been verified. The body is left undecoded so
/// each event handler can deserialize only what it needs.
#[derive(Clone, Debug)]
#[must_use]
pub struct GitHubDelivery {
    pub event: String,
    pub delivery_id: String,
    pub body: Bytes,
}

impl<S> FromRequest<S> for GitHubDelivery
where
    Arc<Config>: FromRef<S>,
    S: Send + Sync + Clone,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        fn err(m: impl Display) -> Response {
            tracing::error!("{m}");
            (StatusCode::BAD_REQUEST, m.to_string()).into_response()
        }
        let event = req
            .headers()
            .get("X-GitHub-Event")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| err("X-GitHub-Event header missing"))?
            .to_string();
        let delivery_id = req
            .headers()
            .get("X-GitHub-Delivery")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("[unknown]")
            .to_string();
        let config = <Arc<Config>>::from_ref(state);
        let signature_sha256 = req
            .headers()
            .get("X-Hub-Signature-256")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| err("X-Hub-Signature-256 missing"))?
            .strip_prefix("sha256=")
            .ok_or_else(|| err("X-Hub-Signature-256 sha256= prefix missing"))?;
        let signature =
            hex::decode(signature_sha256).map_err(|_| err("X-Hub-Signature-256 malformed"))?;
        let body = Bytes::from_request(req, state).await.map_err(|_| err("error reading body"))?;
        let mut mac = Hmac::<Sha256>::new_from_slice(config.github.app.webhook_secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(&body);
        if mac.verify_slice(&signature).is_err() {
            return Err(err("signature mismatch"));
        }
        Ok(GitHubDelivery { event, delivery_id, body })
    }
}
