//! Remote diagnostic service contract.
//!
//! The pipeline depends only on the two traits here: [`KeyValidator`] gates a
//! candidate key with a cheap, side-effect-free call, and [`DiagnosticClient`]
//! turns a failed command and its output into diagnosis text.

pub mod openai;

use async_trait::async_trait;

use crate::credentials::Credential;

pub use openai::OpenAIProvider;

/// Outcome of a key validation call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCheck {
    Accepted,
    /// The service refused the key (authentication failure)
    Rejected,
}

/// Error types for diagnostic service calls
#[derive(Debug, thiserror::Error)]
pub enum DiagnosisError {
    /// HTTP error status from the service
    #[error("OpenAI API Error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The request never produced a response (DNS, TLS, timeout, ...)
    #[error("Failed to consult AI: {0}")]
    Network(String),

    /// The call succeeded but carried no usable text
    #[error("OpenAI returned an empty response.")]
    EmptyResponse,
}

impl DiagnosisError {
    /// HTTP status, when the service answered with one
    pub fn status_hint(&self) -> Option<u16> {
        match self {
            DiagnosisError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Validates candidate API keys against the service
#[async_trait]
pub trait KeyValidator: Send + Sync {
    async fn validate_key(&self, key: &str) -> Result<KeyCheck, DiagnosisError>;
}

/// Produces diagnosis text for a failed command
#[async_trait]
pub trait DiagnosticClient: Send + Sync {
    /// Diagnose `output` captured from running `command`.
    ///
    /// The returned text is trimmed and never empty.
    async fn diagnose(
        &self,
        credential: &Credential,
        command: &str,
        output: &str,
    ) -> Result<String, DiagnosisError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnosis_error_messages() {
        let api = DiagnosisError::Api {
            status: 429,
            message: "rate limited".to_string(),
        };
        assert_eq!(api.to_string(), "OpenAI API Error (429): rate limited");
        assert_eq!(api.status_hint(), Some(429));

        let net = DiagnosisError::Network("connection refused".to_string());
        assert_eq!(net.to_string(), "Failed to consult AI: connection refused");
        assert_eq!(net.status_hint(), None);
        assert_eq!(DiagnosisError::EmptyResponse.status_hint(), None);
    }
}
