//! The event-to-archive pipeline: parse a `workflow_run` delivery, resolve its log,
//! compress it and store it.

pub mod compress;
mod error;
pub mod fetch;
mod processor;
pub mod registry;

pub use error::{ArchiveError, RunRef};
pub use fetch::{FetchError, HttpLogFetcher, LogFetcher};
pub use processor::{EventProcessor, Outcome};
pub use registry::{EventHandler, Registry};
