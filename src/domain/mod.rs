pub mod document;
pub mod error;
pub mod provider;

pub use document::HtmlDocument;
pub use error::DomainError;
pub use provider::{Credential, Provider, ProviderConfig};
