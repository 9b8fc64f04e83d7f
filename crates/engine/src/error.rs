use thiserror::Error;

use rxdial_call_core::types::{CallId, SearchId};
use rxdial_call_core::CallCoreError;

use crate::providers::ProviderError;

/// Errors raised by the search engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Search {0} not found")]
    SearchNotFound(SearchId),

    #[error("Call {0} not found")]
    CallNotFound(CallId),

    #[error("Call {0} has no external session assigned")]
    MissingExternalSession(CallId),

    #[error("Call {0} is not ready to be joined")]
    NotHumanReady(CallId),

    #[error("Search {0} already has a result")]
    ResultAlreadySet(SearchId),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Core(#[from] CallCoreError),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}
