use std::fmt;

use serde::Deserialize;

/// The only action a workflow run is archived for.
pub const ACTION_COMPLETED: &str = "completed";

/// A `workflow_run` webhook delivery, reduced to the fields the archiver uses.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct WorkflowCompletionEvent {
    pub action: String,
    pub repository: RepositoryRef,
    pub run_id: u64,
    pub conclusion: Option<String>,
    pub installation_id: Option<u64>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RepositoryRef {
    pub owner: String,
    pub name: String,
}

impl fmt::Display for RepositoryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

// Wire shape. Every non-`Option` field is required; serde reports the first missing one.
#[derive(Deserialize)]
struct WorkflowRunPayload {
    action: String,
    repository: RepositoryPayload,
    workflow_run: RunPayload,
    installation: Option<InstallationPayload>,
}

#[derive(Deserialize)]
struct RepositoryPayload {
    name: String,
    owner: OwnerPayload,
}

#[derive(Deserialize)]
struct OwnerPayload {
    login: String,
}

#[derive(Deserialize)]
struct RunPayload {
    id: u64,
    conclusion: Option<String>,
}

#[derive(Deserialize)]
struct InstallationPayload {
    id: u64,
}

impl WorkflowCompletionEvent {
    pub fn from_slice(payload: &[u8]) -> serde_json::Result<Self> {
        let payload: WorkflowRunPayload = serde_json::from_slice(payload)?;
        Ok(Self {
            action: payload.action,
            repository: RepositoryRef {
                owner: payload.repository.owner.login,
                name: payload.repository.name,
            },
            run_id: payload.workflow_run.id,
            conclusion: payload.workflow_run.conclusion,
            installation_id: payload.installation.map(|i| i.id),
        })
    }

    pub fn is_completed(&self) -> bool { self.action == ACTION_COMPLETED }
}

/// The authoritative state of a workflow run, as returned by the API.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct WorkflowRun {
    pub id: u64,
    pub status: String,
    pub conclusion: Option<String>,
}

impl WorkflowRun {
    pub fn is_success(&self) -> bool { self.conclusion.as_deref() == Some("success") }
}
