use thiserror::Error;

/// Failures talking to the tax provider or the settings collaborator.
///
/// The calculator absorbs every one of these; they only surface in logs.
#[derive(Debug, Error)]
pub enum TaxError {
    #[error("Tax provider is not configured")]
    NotConfigured,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Upstream returned {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}
