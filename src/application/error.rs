use thiserror::Error;

use crate::{
    application::{
        gateway::GatewayError,
        render::{ExportError, RenderError},
    },
    config::LoadError,
    domain::DomainError,
    infra::{error::InfraError, input::InputError},
};

/// Top-level error for everything the CLI host can run into.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Input(#[from] InputError),
    #[error("failed to export document: {0}")]
    Export(#[from] ExportError),
    #[error("render pipeline unavailable: {0}")]
    Render(#[from] RenderError),
    #[error("failed to load configuration: {0}")]
    Config(#[from] LoadError),
}

impl AppError {
    /// Errors the user can fix by changing their input or keys, as opposed to
    /// environment or provider failures.
    pub fn is_user_error(&self) -> bool {
        matches!(self, AppError::Domain(_) | AppError::Input(_))
    }
}
