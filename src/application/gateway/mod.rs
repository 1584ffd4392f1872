//! Provider-polymorphic access to the generation APIs.

mod gemini;
mod openrouter;
mod prompt;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::histogram;
use reqwest::{Client, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    config::GatewaySettings,
    domain::{HtmlDocument, Provider, ProviderConfig},
    infra::telemetry::METRIC_GATEWAY_REQUEST_MS,
};

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 4000;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

const ERROR_BODY_LIMIT: usize = 512;

/// A generation call failed. The message only names the provider; `detail`
/// carries the transport or provider error for logs.
#[derive(Debug, Error)]
#[error("failed to generate HTML from {provider} API")]
pub struct GatewayError {
    pub provider: Provider,
    pub detail: String,
}

#[async_trait]
pub trait NotesGateway: Send + Sync {
    async fn generate(&self, text: &str) -> Result<HtmlDocument, GatewayError>;
}

/// Endpoint and sampling parameters shared by every provider.
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    pub gemini_base_url: Url,
    pub openrouter_base_url: Url,
    pub timeout: Duration,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl GatewayOptions {
    /// Options for the given endpoints with the default timeout and sampling.
    pub fn new(gemini_base_url: Url, openrouter_base_url: Url) -> Self {
        Self {
            gemini_base_url,
            openrouter_base_url,
            timeout: DEFAULT_TIMEOUT,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

impl From<&GatewaySettings> for GatewayOptions {
    fn from(settings: &GatewaySettings) -> Self {
        Self {
            gemini_base_url: settings.gemini_base_url.clone(),
            openrouter_base_url: settings.openrouter_base_url.clone(),
            timeout: settings.timeout,
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
        }
    }
}

#[derive(Debug, Error)]
pub(crate) enum RequestError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid endpoint: {0}")]
    Url(#[from] url::ParseError),
    #[error("provider returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("failed to decode provider response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("provider response contained no text")]
    EmptyResponse,
}

/// One HTTP client per provider configuration.
#[derive(Debug, Clone)]
pub struct ProviderGateway {
    client: Client,
    config: ProviderConfig,
    options: GatewayOptions,
}

impl ProviderGateway {
    pub fn new(config: ProviderConfig, options: GatewayOptions) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .user_agent(concat!("appunti/", env!("CARGO_PKG_VERSION")))
            .timeout(options.timeout)
            .build()
            .map_err(|err| GatewayError {
                provider: config.provider,
                detail: err.to_string(),
            })?;

        Ok(Self {
            client,
            config,
            options,
        })
    }

    pub fn provider(&self) -> Provider {
        self.config.provider
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }
}

#[async_trait]
impl NotesGateway for ProviderGateway {
    async fn generate(&self, text: &str) -> Result<HtmlDocument, GatewayError> {
        let provider = self.config.provider;
        let message = prompt::user_message(text);
        let started_at = Instant::now();

        let result = match provider {
            Provider::Gemini => {
                gemini::generate(
                    &self.client,
                    &self.options.gemini_base_url,
                    &self.config,
                    &message,
                )
                .await
            }
            Provider::OpenRouter => {
                openrouter::generate(&self.client, &self.options, &self.config, &message).await
            }
        };

        let elapsed_ms = started_at.elapsed().as_secs_f64() * 1000.0;
        histogram!(METRIC_GATEWAY_REQUEST_MS, "provider" => provider.as_str()).record(elapsed_ms);

        match result {
            Ok(raw) => {
                info!(
                    target = "application::gateway",
                    provider = %provider,
                    model = %self.config.model,
                    elapsed_ms = elapsed_ms as u64,
                    response_bytes = raw.len(),
                    "Generated notes"
                );
                Ok(HtmlDocument::from_model_output(&raw))
            }
            Err(err) => {
                warn!(
                    target = "application::gateway",
                    provider = %provider,
                    model = %self.config.model,
                    elapsed_ms = elapsed_ms as u64,
                    error = %err,
                    "Generation request failed"
                );
                Err(GatewayError {
                    provider,
                    detail: err.to_string(),
                })
            }
        }
    }
}

/// Send `request` and decode a JSON body, turning non-success statuses into
/// errors that carry a bounded excerpt of the response.
async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, RequestError> {
    let response = request.send().await?;
    let status = response.status();
    let bytes = response.bytes().await?;

    if !status.is_success() {
        let body = String::from_utf8_lossy(&bytes);
        let body: String = body.chars().take(ERROR_BODY_LIMIT).collect();
        return Err(RequestError::Status { status, body });
    }

    Ok(serde_json::from_slice(&bytes)?)
}
