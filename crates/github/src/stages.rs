use std::{
    fmt::Display,
    future::Future,
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use serde::Serialize;

/// A named layer of GitHub client construction.
///
/// Stages are applied in the order of the variants below, whatever order they are
/// passed to the builder in. A later stage of the same kind replaces an earlier one.
///
/// 1. `UserAgent`: sent with every request.
/// 2. `Timeout`: connect, read and write timeout of each request.
/// 3. `Metrics`: count calls and failures, log per-call latency.
/// 4. `Caching`: reuse installation clients across deliveries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientStage {
    UserAgent(String),
    Timeout(Duration),
    Metrics,
    Caching,
}

impl ClientStage {
    fn rank(&self) -> u8 {
        match self {
            Self::UserAgent(_) => 0,
            Self::Timeout(_) => 1,
            Self::Metrics => 2,
            Self::Caching => 3,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::UserAgent(_) => "user-agent",
            Self::Timeout(_) => "timeout",
            Self::Metrics => "metrics",
            Self::Caching => "caching",
        }
    }
}

/// Sort stages into application order and drop superseded duplicates.
pub(crate) fn normalize(stages: Vec<ClientStage>) -> Vec<ClientStage> {
    let mut out: Vec<ClientStage> = Vec::with_capacity(stages.len());
    for stage in stages {
        match out.iter_mut().find(|s| s.rank() == stage.rank()) {
            Some(existing) => *existing = stage,
            None => out.push(stage),
        }
    }
    out.sort_by_key(ClientStage::rank);
    out
}

#[derive(Debug, Default)]
pub struct ApiMetrics {
    requests: AtomicU64,
    failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub failures: u64,
}

impl ApiMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    pub(crate) async fn observe<T, E, F>(&self, operation: &'static str, fut: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: Display,
    {
        let start = Instant::now();
        let result = fut.await;
        let elapsed = start.elapsed();
        self.requests.fetch_add(1, Ordering::Relaxed);
        match &result {
            Ok(_) => {
                tracing::debug!("GitHub {} completed in {}ms", operation, elapsed.as_millis());
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    "GitHub {} failed after {}ms: {}",
                    operation,
                    elapsed.as_millis(),
                    e
                );
            }
        }
        result
    }
}
