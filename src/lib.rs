//! Provider integration and task orchestration for asynchronous AI
//! image/video generation: authenticated transport with retry/backoff,
//! per-model request/response transformation, and detached polling that
//! advances persisted task rows to a terminal state.

pub mod config;
pub mod error;
pub mod provider;
pub mod task;

pub use config::Config;
pub use error::MirageError;
pub use provider::request::GenerationRequest;
pub use provider::{Model, ProviderClient};
pub use task::{TaskRunner, TaskStatus};
