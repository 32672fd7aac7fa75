//! Capabilities the archiver needs from the GitHub API.
//!
//! The processor only sees these traits; the octocrab-backed implementation lives in
//! `archiver-github`.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use url::Url;

use crate::models::WorkflowRun;

/// An API client scoped to a single app installation.
#[async_trait]
pub trait WorkflowApi: Send + Sync {
    async fn get_workflow_run(&self, owner: &str, repo: &str, run_id: u64) -> Result<WorkflowRun>;

    /// Resolve the short-lived download URL for a run's log archive.
    ///
    /// The returned URL embeds its own access token and must not be logged verbatim.
    async fn workflow_run_logs_url(&self, owner: &str, repo: &str, run_id: u64) -> Result<Url>;
}

#[async_trait]
pub trait InstallationClients: Send + Sync {
    async fn client_for_installation(&self, installation_id: u64) -> Result<Arc<dyn WorkflowApi>>;
}
