//! Text-to-notes flow: validate input, ask the provider, hand the result to
//! the preview pipeline.

use std::sync::Arc;

use tracing::{debug, info};

use crate::{
    application::{
        error::AppError,
        gateway::NotesGateway,
        render::{RenderPipeline, RenderSession},
    },
    domain::{Credential, DomainError, Provider},
    infra::credentials::CredentialStore,
};

const SOURCE: &str = "application::notes::NotesService";

#[derive(Clone)]
pub struct NotesService {
    gateway: Arc<dyn NotesGateway>,
    pipeline: Arc<RenderPipeline>,
}

impl NotesService {
    pub fn new(gateway: Arc<dyn NotesGateway>, pipeline: Arc<RenderPipeline>) -> Self {
        Self { gateway, pipeline }
    }

    pub fn pipeline(&self) -> &RenderPipeline {
        &self.pipeline
    }

    /// Convert `text` and start rendering it. The returned session settles on
    /// its own; callers that need the final markup await [`RenderSession::settled`].
    pub async fn generate(&self, text: &str) -> Result<RenderSession, AppError> {
        if text.trim().is_empty() {
            return Err(DomainError::validation("input text is empty").into());
        }

        let document = self.gateway.generate(text).await?;
        if document.is_blank() {
            debug!(
                target = SOURCE,
                input_bytes = text.len(),
                "Provider returned an empty document"
            );
        }

        let session = self.pipeline.render(document);
        info!(
            target = SOURCE,
            session = %session.id(),
            input_bytes = text.len(),
            "Notes handed to preview"
        );
        Ok(session)
    }
}

/// Pick the key for `provider`: explicit value, then the store, then the
/// environment.
pub fn resolve_credential(
    provider: Provider,
    explicit: Option<&str>,
    store: &CredentialStore,
) -> Result<Credential, AppError> {
    resolve_with(provider, explicit, store, |name| std::env::var(name).ok())
}

fn resolve_with(
    provider: Provider,
    explicit: Option<&str>,
    store: &CredentialStore,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Credential, AppError> {
    if let Some(credential) = explicit.and_then(Credential::new) {
        return Ok(credential);
    }

    if let Some(credential) = store.get(provider)? {
        return Ok(credential);
    }

    provider
        .credential_env_vars()
        .iter()
        .find_map(|name| env(name).and_then(Credential::new))
        .ok_or_else(|| DomainError::missing_credential(provider).into())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::*;
    use crate::{
        application::{
            gateway::GatewayError,
            render::{
                MathTypesetter, PreviewMount, RenderError, RenderPipelineConfig, SessionState,
            },
        },
        domain::HtmlDocument,
    };

    struct CannedGateway {
        markup: &'static str,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl NotesGateway for CannedGateway {
        async fn generate(&self, _text: &str) -> Result<HtmlDocument, GatewayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(HtmlDocument::new(self.markup))
        }
    }

    struct FailingGateway;

    #[async_trait]
    impl NotesGateway for FailingGateway {
        async fn generate(&self, _text: &str) -> Result<HtmlDocument, GatewayError> {
            Err(GatewayError {
                provider: Provider::OpenRouter,
                detail: "provider returned 429".to_string(),
            })
        }
    }

    struct Literal;

    impl MathTypesetter for Literal {
        fn typeset(&self, literal: &str, _display: bool) -> Result<String, RenderError> {
            Ok(format!("<b>{literal}</b>"))
        }
    }

    fn pipeline() -> Arc<RenderPipeline> {
        let config = RenderPipelineConfig {
            settle_delay: std::time::Duration::from_millis(5),
            ..RenderPipelineConfig::default()
        };
        let pipeline = RenderPipeline::builder(config)
            .math_typesetter(Arc::new(Literal))
            .without_diagram_renderer()
            .build(PreviewMount::new())
            .expect("pipeline");
        Arc::new(pipeline)
    }

    #[tokio::test]
    async fn blank_input_never_reaches_gateway() {
        let gateway = Arc::new(CannedGateway {
            markup: "<p>unused</p>",
            calls: AtomicUsize::new(0),
        });
        let service = NotesService::new(gateway.clone(), pipeline());

        let err = service.generate("  \n ").await.expect_err("blank input");
        assert!(matches!(err, AppError::Domain(DomainError::Validation { .. })));
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 0);
        assert!(service.pipeline().last_document().is_none());
    }

    #[tokio::test]
    async fn generated_document_is_mounted_and_settled() {
        let gateway = Arc::new(CannedGateway {
            markup: "<article><p>Energy $E$</p></article>",
            calls: AtomicUsize::new(0),
        });
        let service = NotesService::new(gateway, pipeline());

        let mut session = service.generate("energy notes").await.expect("session");
        assert_eq!(session.settled().await, SessionState::Applied);

        let mounted = service.pipeline().mount().snapshot();
        assert!(mounted.contains("<b>E</b>"), "{mounted}");
        assert_eq!(
            service.pipeline().export_raw().as_deref(),
            Some("<article><p>Energy $E$</p></article>")
        );
    }

    #[tokio::test]
    async fn gateway_failure_leaves_preview_untouched() {
        let service = NotesService::new(Arc::new(FailingGateway), pipeline());

        let err = service.generate("notes").await.expect_err("gateway error");
        assert_eq!(err.to_string(), "failed to generate HTML from openrouter API");
        assert_eq!(service.pipeline().mount().snapshot(), "");
    }

    #[test]
    fn explicit_key_wins_over_store_and_environment() {
        let dir = TempDir::new().expect("temp dir");
        let store = CredentialStore::new(dir.path().join("credentials.toml"));
        store.set(Provider::Gemini, "stored").expect("set");

        let credential = resolve_with(Provider::Gemini, Some("flag"), &store, |_| {
            Some("env".to_string())
        })
        .expect("credential");
        assert_eq!(credential.expose(), "flag");

        let credential =
            resolve_with(Provider::Gemini, Some("  "), &store, |_| Some("env".to_string()))
                .expect("credential");
        assert_eq!(credential.expose(), "stored");
    }

    #[test]
    fn environment_is_consulted_in_order() {
        let dir = TempDir::new().expect("temp dir");
        let store = CredentialStore::new(dir.path().join("credentials.toml"));

        let credential = resolve_with(Provider::Gemini, None, &store, |name| {
            (name == "API_KEY").then(|| "fallback".to_string())
        })
        .expect("credential");
        assert_eq!(credential.expose(), "fallback");

        let credential = resolve_with(Provider::Gemini, None, &store, |name| {
            Some(format!("{name}-value"))
        })
        .expect("credential");
        assert_eq!(credential.expose(), "GEMINI_API_KEY-value");
    }

    #[test]
    fn missing_everywhere_is_reported_per_provider() {
        let dir = TempDir::new().expect("temp dir");
        let store = CredentialStore::new(dir.path().join("credentials.toml"));

        let err = resolve_with(Provider::OpenRouter, None, &store, |_| None)
            .expect_err("no key anywhere");
        assert!(matches!(
            err,
            AppError::Domain(DomainError::MissingCredential {
                provider: Provider::OpenRouter
            })
        ));
    }
}
