use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{ArchiveError, Outcome};

/// Handles the deliveries of one or more webhook event types.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Values of `X-GitHub-Event` this handler accepts.
    fn event_types(&self) -> &'static [&'static str];

    async fn handle(
        &self,
        cancel: &CancellationToken,
        payload: &[u8],
    ) -> Result<Outcome, ArchiveError>;
}

/// Maps event types to their handlers. Built once at startup and shared read-only.
#[derive(Default)]
pub struct Registry {
    handlers: HashMap<&'static str, Arc<dyn EventHandler>>,
}

#[derive(Default)]
pub struct RegistryBuilder {
    handlers: HashMap<&'static str, Arc<dyn EventHandler>>,
}

impl RegistryBuilder {
    /// Register `handler` for every event type it names. A later registration for the
    /// same event type replaces the earlier one.
    pub fn register(mut self, handler: Arc<dyn EventHandler>) -> Self {
        for &event in handler.event_types() {
            if self.handlers.insert(event, handler.clone()).is_some() {
                tracing::warn!("Replacing handler for event {}", event);
            }
        }
        self
    }

    pub fn build(self) -> Registry { Registry { handlers: self.handlers } }
}

impl Registry {
    pub fn builder() -> RegistryBuilder { RegistryBuilder::default() }

    pub fn get(&self, event: &str) -> Option<&Arc<dyn EventHandler>> { self.handlers.get(event) }

    /// Registered event types, sorted.
    pub fn event_types(&self) -> Vec<&'static str> {
        let mut events = self.handlers.keys().copied().collect::<Vec<_>>();
        events.sort_unstable();
        events
    }

    /// Hand `payload` to the handler for `event`, or `None` if there is none.
    pub async fn dispatch(
        &self,
        event: &str,
        cancel: &CancellationToken,
        payload: &[u8],
    ) -> Option<Result<Outcome, ArchiveError>> {
        let handler = self.get(event)?;
        Some(handler.handle(cancel, payload).await)
    }
}
