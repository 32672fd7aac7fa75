pub mod stages;
pub mod webhook;

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result, anyhow, bail};
use archiver_core::{
    api::{InstallationClients, WorkflowApi},
    config::{GitHubAppConfig, GitHubConfig},
    models::WorkflowRun,
};
use async_trait::async_trait;
use http::header::{LOCATION, USER_AGENT};
use moka::future::Cache;
use octocrab::{
    Octocrab,
    models::{InstallationId, RunId},
};
use url::Url;

pub use crate::stages::{ApiMetrics, ClientStage, MetricsSnapshot};

/// GitHub App client. Hands out installation-scoped clients.
pub struct GitHub {
    app_client: Octocrab,
    metrics: Option<Arc<ApiMetrics>>,
    installations: Option<InstallationCache<Octocrab>>,
}

/// Installation tokens are valid for an hour; entries expire well before that.
const INSTALLATION_TTL: Duration = Duration::from_secs(50 * 60);

/// Per-installation values, created at most once at a time per installation id.
///
/// Concurrent callers for the same id wait on one initialization; other ids are never
/// blocked by it. A failed initialization is not cached.
struct InstallationCache<V> {
    entries: Cache<u64, V>,
}

impl<V: Clone + Send + Sync + 'static> InstallationCache<V> {
    fn new(ttl: Duration) -> Self {
        let entries = Cache::builder()
            .max_capacity(1024)
            .time_to_live(ttl)
            .eviction_listener(|id, _v, cause| {
                tracing::debug!("Evicting client for installation {}: {:?}", id, cause);
            })
            .build();
        Self { entries }
    }

    async fn get_or_create<F>(&self, installation_id: u64, init: F) -> Result<V>
    where F: Future<Output = Result<V>> {
        self.entries
            .try_get_with(installation_id, init)
            .await
            .map_err(|e| Arc::try_unwrap(e).unwrap_or_else(|e| anyhow!("{e:#}")))
    }
}

pub struct GitHubBuilder {
    app_id: u64,
    private_key: String,
    base_uri: Option<String>,
    stages: Vec<ClientStage>,
}

impl GitHubBuilder {
    pub fn new(app: &GitHubAppConfig) -> Self {
        Self { app_id: app.id, private_key: app.private_key.clone(), base_uri: None, stages: vec![] }
    }

    pub fn base_uri(mut self, base_uri: impl Into<String>) -> Self {
        self.base_uri = Some(base_uri.into());
        self
    }

    pub fn stage(mut self, stage: ClientStage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn build(self) -> Result<GitHub> {
        let key = jsonwebtoken::EncodingKey::from_rsa_pem(self.private_key.as_bytes())
            .context("Failed to parse GitHub App private key")?;
        let mut builder = Octocrab::builder().app(self.app_id.into(), key);
        if let Some(base_uri) = self.base_uri {
            builder = builder.base_uri(base_uri).context("Invalid GitHub base URI")?;
        }
        let mut metrics = None;
        let mut installations = None;
        for stage in stages::normalize(self.stages) {
            tracing::debug!("GitHub client stage: {}", stage.name());
            match stage {
                ClientStage::UserAgent(user_agent) => {
                    builder = builder.add_header(USER_AGENT, user_agent);
                }
                ClientStage::Timeout(timeout) => {
                    builder = builder
                        .set_connect_timeout(Some(timeout))
                        .set_read_timeout(Some(timeout))
                        .set_write_timeout(Some(timeout));
                }
                ClientStage::Metrics => metrics = Some(Arc::new(ApiMetrics::default())),
                ClientStage::Caching => {
                    installations = Some(InstallationCache::new(INSTALLATION_TTL));
                }
            }
        }
        let app_client = builder.build().context("Failed to create GitHub client")?;
        Ok(GitHub { app_client, metrics, installations })
    }
}

impl GitHub {
    /// Build the app client with the stages enabled in `config`.
    pub fn new(config: &GitHubConfig) -> Result<Arc<Self>> {
        let mut builder = GitHubBuilder::new(&config.app)
            .stage(ClientStage::UserAgent(config.user_agent.clone()))
            .stage(ClientStage::Timeout(config.timeout()));
        if config.metrics {
            builder = builder.stage(ClientStage::Metrics);
        }
        if config.cache_clients {
            builder = builder.stage(ClientStage::Caching);
        }
        if let Some(base_uri) = &config.base_uri {
            builder = builder.base_uri(base_uri.clone());
        }
        let github = builder.build()?;
        tracing::info!("GitHub App {} client ready", config.app.id);
        Ok(Arc::new(github))
    }

    /// API call counters, if the metrics stage is enabled.
    pub fn metrics(&self) -> Option<Arc<ApiMetrics>> { self.metrics.clone() }

    // Exchanges the app JWT for an installation token up front, so credential problems
    // surface here rather than on the first API call.
    async fn new_installation_client(&self, installation_id: InstallationId) -> Result<Octocrab> {
        let exchange = self.app_client.installation_and_token(installation_id);
        let (client, _token) = match &self.metrics {
            Some(metrics) => metrics.observe("installation token", exchange).await,
            None => exchange.await,
        }
        .with_context(|| format!("Failed to create client for installation {installation_id}"))?;
        tracing::info!("Created client for installation {}", installation_id);
        Ok(client)
    }
}

#[async_trait]
impl InstallationClients for GitHub {
    async fn client_for_installation(&self, installation_id: u64) -> Result<Arc<dyn WorkflowApi>> {
        let init = self.new_installation_client(InstallationId(installation_id));
        let client = match &self.installations {
            Some(installations) => installations.get_or_create(installation_id, init).await?,
            None => init.await?,
        };
        Ok(Arc::new(InstallationClient { client, metrics: self.metrics.clone() }))
    }
}

pub struct InstallationClient {
    client: Octocrab,
    metrics: Option<Arc<ApiMetrics>>,
}

impl InstallationClient {
    async fn observe<T, F>(&self, operation: &'static str, fut: F) -> Result<T>
    where F: Future<Output = Result<T>> {
        match &self.metrics {
            Some(metrics) => metrics.observe(operation, fut).await,
            None => fut.await,
        }
    }
}

#[async_trait]
impl WorkflowApi for InstallationClient {
    async fn get_workflow_run(&self, owner: &str, repo: &str, run_id: u64) -> Result<WorkflowRun> {
        self.observe("get workflow run", async {
            let run = self
                .client
                .workflows(owner, repo)
                .get(RunId(run_id))
                .await
                .with_context(|| format!("Failed to fetch workflow run {owner}/{repo}#{run_id}"))?;
            Ok::<_, anyhow::Error>(WorkflowRun {
                id: run.id.into_inner(),
                status: run.status,
                conclusion: run.conclusion,
            })
        })
        .await
    }

    async fn workflow_run_logs_url(&self, owner: &str, repo: &str, run_id: u64) -> Result<Url> {
        self.observe("get workflow run logs url", async {
            let route = format!("/repos/{owner}/{repo}/actions/runs/{run_id}/logs");
            let response = self
                .client
                ._get(route)
                .await
                .with_context(|| format!("Failed to request logs for {owner}/{repo}#{run_id}"))?;
            let status = response.status();
            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(LOCATION)
                    .context("Log redirect has no Location header")?
                    .to_str()
                    .context("Log redirect Location is not valid UTF-8")?;
                return Url::parse(location).context("Log redirect Location is not a valid URL");
            }
            octocrab::map_github_error(response)
                .await
                .with_context(|| format!("Failed to request logs for {owner}/{repo}#{run_id}"))?;
            bail!("Expected a redirect for {owner}/{repo}#{run_id} logs, got {status}")
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::{
        Router,
        extract::Path,
        http::{StatusCode, header},
        response::{IntoResponse, Response},
        routing::get,
    };
    use tokio::sync::oneshot;

    use super::*;

    async fn logs(Path((owner, repo, run_id)): Path<(String, String, u64)>) -> Response {
        match (owner.as_str(), repo.as_str(), run_id) {
            ("acme", "widgets", 42) => (
                StatusCode::FOUND,
                [(header::LOCATION, "https://results.example.com/logs/42.zip?sig=abc")],
            )
                .into_response(),
            ("acme", "widgets", 43) => (StatusCode::OK, "unexpected body").into_response(),
            _ => (
                StatusCode::NOT_FOUND,
                [(header::CONTENT_TYPE, "application/json")],
                r#"{"message":"Not Found","documentation_url":"https://docs.github.com"}"#,
            )
                .into_response(),
        }
    }

    async fn serve() -> String {
        let router =
            Router::new().route("/repos/{owner}/{repo}/actions/runs/{run_id}/logs", get(logs));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
        format!("http://{addr}")
    }

    async fn client(metrics: Option<Arc<ApiMetrics>>) -> InstallationClient {
        let client = Octocrab::builder().base_uri(serve().await).unwrap().build().unwrap();
        InstallationClient { client, metrics }
    }

    #[tokio::test]
    async fn test_logs_url_from_redirect() {
        let metrics = Arc::new(ApiMetrics::default());
        let client = client(Some(metrics.clone())).await;
        let url = client.workflow_run_logs_url("acme", "widgets", 42).await.unwrap();
        assert_eq!(url.as_str(), "https://results.example.com/logs/42.zip?sig=abc");
        assert_eq!(metrics.snapshot(), MetricsSnapshot { requests: 1, failures: 0 });
    }

    #[tokio::test]
    async fn test_logs_url_not_found() {
        let metrics = Arc::new(ApiMetrics::default());
        let client = client(Some(metrics.clone())).await;
        let err = client.workflow_run_logs_url("acme", "widgets", 7).await.unwrap_err();
        assert!(err.to_string().contains("acme/widgets#7"), "{err:#}");
        assert_eq!(metrics.snapshot(), MetricsSnapshot { requests: 1, failures: 1 });
    }

    #[tokio::test]
    async fn test_logs_url_requires_redirect() {
        let client = client(None).await;
        let err = client.workflow_run_logs_url("acme", "widgets", 43).await.unwrap_err();
        assert!(err.to_string().contains("Expected a redirect"), "{err:#}");
    }

    #[tokio::test]
    async fn test_pending_installation_does_not_block_others() {
        let cache = Arc::new(InstallationCache::<u64>::new(INSTALLATION_TTL));
        let (release, released) = oneshot::channel::<()>();
        let slow = tokio::spawn({
            let cache = cache.clone();
            async move {
                cache
                    .get_or_create(1, async move {
                        released.await?;
                        Ok(100)
                    })
                    .await
            }
        });
        tokio::task::yield_now().await;

        let other = tokio::time::timeout(
            Duration::from_secs(1),
            cache.get_or_create(2, async { Ok(200) }),
        )
        .await
        .expect("installation 2 waited on installation 1");
        assert_eq!(other.unwrap(), 200);

        release.send(()).unwrap();
        assert_eq!(slow.await.unwrap().unwrap(), 100);
    }

    #[tokio::test]
    async fn test_installation_created_once() {
        let cache = InstallationCache::<u64>::new(INSTALLATION_TTL);
        let calls = Arc::new(AtomicUsize::new(0));
        let init = || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(100)
            }
        };
        let (a, b) = tokio::join!(cache.get_or_create(1, init()), cache.get_or_create(1, init()));
        assert_eq!((a.unwrap(), b.unwrap()), (100, 100));
        assert_eq!(cache.get_or_create(1, init()).await.unwrap(), 100);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_installation_not_cached() {
        let cache = InstallationCache::<u64>::new(INSTALLATION_TTL);
        let err = cache
            .get_or_create(1, async { Err(anyhow!("token exchange failed")) })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "token exchange failed");
        assert_eq!(cache.get_or_create(1, async { Ok(100) }).await.unwrap(), 100);
    }

    #[test]
    fn test_builder_rejects_bad_key() {
        let app = GitHubAppConfig {
            id: 1,
            webhook_secret: "secret".into(),
            private_key: "not a pem".into(),
        };
        let err = GitHubBuilder::new(&app).stage(ClientStage::Metrics).build().err().unwrap();
        assert!(err.to_string().contains("private key"), "{err:#}");
    }
}
