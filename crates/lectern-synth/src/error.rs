//! Error types for synthesis providers.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SynthError {
    /// Provider binary/service is not installed or reachable.
    #[error("provider not available: {0}")]
    NotAvailable(String),

    /// Operation requested before initialization completed.
    #[error("provider not initialized")]
    NotInitialized,

    /// The provider's backing service died mid-request. Treated as
    /// transient: the engine restarts the provider and retries.
    #[error("provider connection lost: {0}")]
    EngineGone(String),

    /// The provider rejected this particular input; retrying the same
    /// text cannot succeed.
    #[error("synthesis failed: {0}")]
    Synthesis(String),

    #[error("voice not found: {0}")]
    VoiceNotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl SynthError {
    /// Transient failures are recovered by restarting the provider and
    /// re-running the command; everything else surfaces to the host.
    pub fn is_transient(&self) -> bool {
        matches!(self, SynthError::EngineGone(_))
    }
}

pub type SynthResult<T> = Result<T, SynthError>;
