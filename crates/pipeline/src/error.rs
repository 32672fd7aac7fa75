use std::{fmt, io};

use archiver_core::models::WorkflowCompletionEvent;
use archiver_storage::StorageError;
use thiserror::Error;

use crate::fetch::FetchError;

/// Identifies the run a failure belongs to.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RunRef {
    pub owner: String,
    pub repo: String,
    pub run_id: u64,
}

impl From<&WorkflowCompletionEvent> for RunRef {
    fn from(event: &WorkflowCompletionEvent) -> Self {
        Self {
            owner: event.repository.owner.clone(),
            repo: event.repository.name.clone(),
            run_id: event.run_id,
        }
    }
}

impl fmt::Display for RunRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.owner, self.repo, self.run_id)
    }
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("malformed workflow_run event: {0}")]
    MalformedEvent(#[source] serde_json::Error),
    #[error("{run}: failed to resolve installation client")]
    AuthResolution {
        run: RunRef,
        #[source]
        source: anyhow::Error,
    },
    #[error("{run}: failed to look up workflow run")]
    RunLookup {
        run: RunRef,
        #[source]
        source: anyhow::Error,
    },
    #[error("{run}: failed to resolve log URL")]
    LogUrlResolution {
        run: RunRef,
        #[source]
        source: anyhow::Error,
    },
    #[error("{run}: failed to fetch log")]
    Fetch {
        run: RunRef,
        #[source]
        source: FetchError,
    },
    #[error("{run}: failed to compress log")]
    Compression {
        run: RunRef,
        #[source]
        source: io::Error,
    },
    #[error("{run}: failed to store log")]
    Storage {
        run: RunRef,
        #[source]
        source: StorageError,
    },
    #[error("processing cancelled")]
    Cancelled,
}

impl ArchiveError {
    pub fn run(&self) -> Option<&RunRef> {
        match self {
            Self::AuthResolution { run, .. }
            | Self::RunLookup { run, .. }
            | Self::LogUrlResolution { run, .. }
            | Self::Fetch { run, .. }
            | Self::Compression { run, .. }
            | Self::Storage { run, .. } => Some(run),
            Self::MalformedEvent(_) | Self::Cancelled => None,
        }
    }
}
