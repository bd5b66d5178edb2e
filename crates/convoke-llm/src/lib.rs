//! Model call boundary for convoke
//!
//! This crate owns everything between a stage and the wire: the
//! [`ModelBackend`] trait, the HTTP and stub implementations behind it,
//! stage-specific schema validation of responses, and the
//! [`CallExecutor`] that routes every call through the credential pool
//! with timeout, retry, and backoff. No retry state escapes the
//! executor; stages only ever see a finished [`CallResult`].

mod executor;
mod http_backend;
pub mod schema;
mod stub_backend;
mod types;

use std::sync::Arc;

use convoke_config::Config;
use convoke_utils::error::ModelError;

pub use executor::CallExecutor;
pub use http_backend::HttpBackend;
pub use schema::{EmailDraft, Plan, PlanAction};
pub use stub_backend::StubBackend;
pub use types::{
    CallOutcome, CallRequest, CallResult, ModelBackend, ModelRequest, ModelResponse, StagePayload,
};

/// BLAKE3 hash of a prompt payload, as recorded on results and traces.
#[must_use]
pub fn prompt_hash(prompt: &str) -> String {
    blake3::hash(prompt.as_bytes()).to_hex().to_string()
}

/// Construct the model backend named by the configuration.
///
/// # Errors
///
/// Returns `ModelError::Unsupported`-style misconfiguration for an
/// unknown provider name, or the backend's own construction error.
pub fn backend_from_config(config: &Config) -> Result<Arc<dyn ModelBackend>, ModelError> {
    match config.provider.provider.as_str() {
        "http" => Ok(Arc::new(HttpBackend::new(config.provider.base_url.clone())?)),
        "stub" => Ok(Arc::new(StubBackend::new())),
        unknown => Err(ModelError::Misconfiguration(format!(
            "Unknown model provider '{unknown}'. Supported providers: http, stub."
        ))),
    }
}
