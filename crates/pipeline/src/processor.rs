use std::sync::Arc;

use anyhow::anyhow;
use archiver_core::{
    api::InstallationClients,
    models::WorkflowCompletionEvent,
    util::{UrlExt, size},
};
use archiver_storage::{ArchiveTarget, ObjectStore};
use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::{
    compress::compress,
    error::{ArchiveError, RunRef},
    fetch::LogFetcher,
    registry::EventHandler,
};

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Outcome {
    /// The event was valid but not a completion.
    Skipped { action: String },
    Archived { namespace: String, object_key: String, raw_size: u64, compressed_size: u64 },
}

/// Archives the log of each completed workflow run it is handed.
///
/// Holds no per-event state; one instance serves all deliveries concurrently.
pub struct EventProcessor {
    clients: Arc<dyn InstallationClients>,
    fetcher: Arc<dyn LogFetcher>,
    store: Arc<dyn ObjectStore>,
}

impl EventProcessor {
    pub fn new(
        clients: Arc<dyn InstallationClients>,
        fetcher: Arc<dyn LogFetcher>,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        Self { clients, fetcher, store }
    }

    /// Run one `workflow_run` payload through the pipeline.
    ///
    /// Stages run in order and the first failure ends the run. The object is written
    /// last, so an error never leaves a partial archive behind. If `cancel` fires, the
    /// in-flight stage is dropped and [`ArchiveError::Cancelled`] is returned.
    pub async fn process(
        &self,
        cancel: &CancellationToken,
        payload: &[u8],
    ) -> Result<Outcome, ArchiveError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ArchiveError::Cancelled),
            result = self.archive(payload) => result,
        }
    }

    async fn archive(&self, payload: &[u8]) -> Result<Outcome, ArchiveError> {
        let event =
            WorkflowCompletionEvent::from_slice(payload).map_err(ArchiveError::MalformedEvent)?;
        let run = RunRef::from(&event);
        if !event.is_completed() {
            tracing::info!("Skipping {} with action {}", run, event.action);
            return Ok(Outcome::Skipped { action: event.action });
        }
        let (owner, repo) = (run.owner.as_str(), run.repo.as_str());

        let client = match event.installation_id {
            Some(installation_id) => self.clients.client_for_installation(installation_id).await,
            None => Err(anyhow!("Event carries no installation")),
        }
        .map_err(|source| ArchiveError::AuthResolution { run: run.clone(), source })?;

        let workflow_run = client
            .get_workflow_run(owner, repo, run.run_id)
            .await
            .map_err(|source| ArchiveError::RunLookup { run: run.clone(), source })?;
        if workflow_run.id != run.run_id {
            return Err(ArchiveError::RunLookup {
                run: run.clone(),
                source: anyhow!("GitHub returned workflow run {} instead", workflow_run.id),
            });
        }
        if !workflow_run.is_success() {
            tracing::warn!(
                "Workflow run {} concluded {}, archiving anyway",
                run,
                workflow_run.conclusion.as_deref().unwrap_or(workflow_run.status.as_str())
            );
        }

        let url = client
            .workflow_run_logs_url(owner, repo, run.run_id)
            .await
            .map_err(|source| ArchiveError::LogUrlResolution { run: run.clone(), source })?;
        tracing::debug!("Downloading logs for {} from {}", run, url.redacted());
        let raw = self
            .fetcher
            .fetch(&url)
            .await
            .map_err(|source| ArchiveError::Fetch { run: run.clone(), source })?;
        let raw_size = raw.len() as u64;
        let compressed =
            compress(&raw).map_err(|source| ArchiveError::Compression { run: run.clone(), source })?;
        drop(raw);
        let compressed_size = compressed.len() as u64;

        let ArchiveTarget { namespace, object_key } = ArchiveTarget::new(owner, repo)
            .map_err(|source| ArchiveError::Storage { run: run.clone(), source })?;
        self.store
            .ensure_namespace(&namespace)
            .await
            .map_err(|source| ArchiveError::Storage { run: run.clone(), source })?;
        self.store
            .put_object(&namespace, &object_key, Bytes::from(compressed))
            .await
            .map_err(|source| ArchiveError::Storage { run: run.clone(), source })?;
        tracing::info!(
            "Archived {} to {}/{} ({} -> {})",
            run,
            namespace,
            object_key,
            size(raw_size),
            size(compressed_size)
        );
        Ok(Outcome::Archived { namespace, object_key, raw_size, compressed_size })
    }
}

#[async_trait]
impl EventHandler for EventProcessor {
    fn event_types(&self) -> &'static [&'static str] { &["workflow_run"] }

    async fn handle(
        &self,
        cancel: &CancellationToken,
        payload: &[u8],
    ) -> Result<Outcome, ArchiveError> {
        self.process(cancel, payload).await
    }
}
