use thiserror::Error;

use super::provider::Provider;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("domain validation failed: {message}")]
    Validation { message: String },
    #[error("missing API key for {provider}")]
    MissingCredential { provider: Provider },
}

impl DomainError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn missing_credential(provider: Provider) -> Self {
        Self::MissingCredential { provider }
    }
}
