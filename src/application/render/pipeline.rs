use std::{
    path::PathBuf,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use futures::future::join_all;
use lol_html::{RewriteStrSettings, rewrite_str};
use metrics::{counter, histogram};
use tokio::{runtime::Handle, sync::watch, task::JoinHandle};
use tracing::{debug, warn};

use crate::{
    config::{DEFAULT_MERMAID_CACHE_DIR, DEFAULT_MERMAID_CLI_PATH, RenderSettings},
    domain::HtmlDocument,
    infra::{
        lock::mutex_lock,
        telemetry::{
            METRIC_DIAGRAM_FAILURES, METRIC_MATH_FAILURES, METRIC_RENDER_SESSIONS,
            METRIC_RENDER_SETTLE_MS, METRIC_RENDER_SUPERSEDED,
        },
    },
};

use super::{
    export::{ExportError, ExportShell},
    mount::PreviewMount,
    service::{
        KatexTypesetter, MermaidCliRenderer,
        diagram::{DiagramOutcome, DiagramSlot, apply_diagrams, collect_diagram_sources},
        math::typeset_math,
        sanitize::build_notes_sanitizer,
    },
    types::{
        DiagramMarker, DiagramRenderer, MATH_DELIMITERS, MathTypesetter, RenderError, SessionId,
        SessionState,
    },
};

const LOCK_TARGET: &str = "application::render::pipeline";
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct RenderPipelineConfig {
    pub settle_delay: Duration,
    pub diagram_marker: DiagramMarker,
    pub sanitize: bool,
    pub mermaid_cli_path: PathBuf,
    pub mermaid_cache_dir: PathBuf,
    pub mermaid_theme: String,
}

impl Default for RenderPipelineConfig {
    fn default() -> Self {
        Self {
            settle_delay: DEFAULT_SETTLE_DELAY,
            diagram_marker: DiagramMarker::default(),
            sanitize: false,
            mermaid_cli_path: PathBuf::from(DEFAULT_MERMAID_CLI_PATH),
            mermaid_cache_dir: PathBuf::from(DEFAULT_MERMAID_CACHE_DIR),
            mermaid_theme: "dark".to_string(),
        }
    }
}

impl From<&RenderSettings> for RenderPipelineConfig {
    fn from(settings: &RenderSettings) -> Self {
        Self {
            settle_delay: settings.settle_delay,
            diagram_marker: settings.diagram_marker.clone(),
            sanitize: settings.sanitize,
            mermaid_cli_path: settings.mermaid_cli_path.clone(),
            mermaid_cache_dir: settings.mermaid_cache_dir.clone(),
            mermaid_theme: settings.mermaid_theme.clone(),
        }
    }
}

/// Builder for [`RenderPipeline`]; the typesetter and diagram renderer default
/// to KaTeX and the Mermaid CLI.
pub struct RenderPipelineBuilder {
    config: RenderPipelineConfig,
    math: Option<Arc<dyn MathTypesetter>>,
    diagrams: Option<Option<Arc<dyn DiagramRenderer>>>,
}

impl RenderPipelineBuilder {
    pub fn math_typesetter(mut self, typesetter: Arc<dyn MathTypesetter>) -> Self {
        self.math = Some(typesetter);
        self
    }

    pub fn diagram_renderer(mut self, renderer: Arc<dyn DiagramRenderer>) -> Self {
        self.diagrams = Some(Some(renderer));
        self
    }

    /// Leave diagrams as source; every marked element is flagged as failed.
    pub fn without_diagram_renderer(mut self) -> Self {
        self.diagrams = Some(None);
        self
    }

    pub fn build(self, mount: PreviewMount) -> Result<RenderPipeline, RenderError> {
        let RenderPipelineBuilder {
            config,
            math,
            diagrams,
        } = self;

        if config.settle_delay.is_zero() {
            return Err(RenderError::Configuration {
                message: "settle delay must be greater than zero".to_string(),
            });
        }
        let runtime = Handle::try_current().map_err(|err| RenderError::Configuration {
            message: format!("render pipeline requires a Tokio runtime: {err}"),
        })?;

        let math = math.unwrap_or_else(|| Arc::new(KatexTypesetter));
        let diagrams = diagrams.unwrap_or_else(|| default_diagram_renderer(&config));

        Ok(RenderPipeline {
            mount,
            passes: Arc::new(SettlePasses {
                math,
                diagrams,
                marker: config.diagram_marker.clone(),
            }),
            settle_delay: config.settle_delay,
            sanitizer: config.sanitize.then(build_notes_sanitizer),
            export: ExportShell::new(config.diagram_marker.clone(), config.mermaid_theme.clone()),
            runtime,
            next_session: AtomicU64::new(0),
            pending: Mutex::new(None),
            last_document: Mutex::new(None),
        })
    }
}

fn default_diagram_renderer(config: &RenderPipelineConfig) -> Option<Arc<dyn DiagramRenderer>> {
    match MermaidCliRenderer::new(
        config.mermaid_cli_path.clone(),
        config.mermaid_cache_dir.clone(),
        config.mermaid_theme.clone(),
    ) {
        Ok(renderer) => Some(Arc::new(renderer)),
        Err(err) => {
            warn!(
                target = "application::render::mermaid",
                cli_path = %config.mermaid_cli_path.display(),
                cache_dir = %config.mermaid_cache_dir.display(),
                error = %err,
                "Mermaid renderer disabled"
            );
            None
        }
    }
}

struct SettlePasses {
    math: Arc<dyn MathTypesetter>,
    diagrams: Option<Arc<dyn DiagramRenderer>>,
    marker: DiagramMarker,
}

struct PendingSettle {
    id: SessionId,
    task: JoinHandle<()>,
    state: Arc<watch::Sender<SessionState>>,
}

impl PendingSettle {
    fn supersede(self) {
        self.task.abort();
        mark_superseded(self.id, &self.state);
    }
}

/// Renders documents into a [`PreviewMount`], one session at a time.
///
/// `render` mounts the document immediately and schedules the settle step
/// (math then diagrams) after the configured delay. A newer `render`, a call
/// to `release`, or dropping the pipeline supersedes the pending session.
pub struct RenderPipeline {
    mount: PreviewMount,
    passes: Arc<SettlePasses>,
    settle_delay: Duration,
    sanitizer: Option<ammonia::Builder<'static>>,
    export: ExportShell,
    runtime: Handle,
    next_session: AtomicU64,
    pending: Mutex<Option<PendingSettle>>,
    last_document: Mutex<Option<HtmlDocument>>,
}

impl RenderPipeline {
    pub fn builder(config: RenderPipelineConfig) -> RenderPipelineBuilder {
        RenderPipelineBuilder {
            config,
            math: None,
            diagrams: None,
        }
    }

    pub fn new(mount: PreviewMount, config: RenderPipelineConfig) -> Result<Self, RenderError> {
        Self::builder(config).build(mount)
    }

    pub fn mount(&self) -> &PreviewMount {
        &self.mount
    }

    pub fn render(&self, doc: HtmlDocument) -> RenderSession {
        counter!(METRIC_RENDER_SESSIONS).increment(1);

        let (state_tx, state_rx) = watch::channel(SessionState::Pending);
        let state = Arc::new(state_tx);
        let markup = self.mountable_markup(&doc);

        // Ids are issued under the pending lock so mount order follows id order.
        let mut pending = mutex_lock(&self.pending, LOCK_TARGET, "render");
        let id = SessionId(self.next_session.fetch_add(1, Ordering::Relaxed) + 1);
        if let Some(previous) = pending.take() {
            previous.supersede();
        }

        self.mount.mount(id, markup);
        *mutex_lock(&self.last_document, LOCK_TARGET, "render") = Some(doc);

        let job = SettleJob {
            id,
            delay: self.settle_delay,
            mount: self.mount.clone(),
            passes: Arc::clone(&self.passes),
            state: Arc::clone(&state),
        };
        let task = self.runtime.spawn(job.run());
        *pending = Some(PendingSettle { id, task, state });

        debug!(
            target = "application::render::pipeline",
            session = %id,
            delay_ms = self.settle_delay.as_millis() as u64,
            "Document mounted; settle scheduled"
        );

        RenderSession {
            id,
            state: state_rx,
        }
    }

    /// Tear down: the pending session is superseded and the mount detached.
    pub fn release(&self) {
        let previous = mutex_lock(&self.pending, LOCK_TARGET, "release").take();
        if let Some(previous) = previous {
            self.mount.detach(previous.id);
            previous.supersede();
        }
    }

    pub fn last_document(&self) -> Option<HtmlDocument> {
        mutex_lock(&self.last_document, LOCK_TARGET, "last_document").clone()
    }

    pub fn export_raw(&self) -> Option<String> {
        self.last_document()
            .map(|doc| super::export::export_raw(&doc))
    }

    pub fn export_standalone(&self) -> Result<Option<String>, ExportError> {
        self.last_document()
            .map(|doc| self.export.render(&doc))
            .transpose()
    }

    fn mountable_markup(&self, doc: &HtmlDocument) -> String {
        if let Some(sanitizer) = &self.sanitizer {
            return sanitizer.clean(doc.as_str()).to_string();
        }

        rewrite_str(doc.as_str(), RewriteStrSettings::default()).unwrap_or_else(|err| {
            warn!(
                target = "application::render::pipeline",
                error = %err,
                "Markup could not be parsed; mounting it as received"
            );
            doc.as_str().to_owned()
        })
    }
}

impl Drop for RenderPipeline {
    fn drop(&mut self) {
        self.release();
    }
}

/// Handle to one `render` call.
#[derive(Debug, Clone)]
pub struct RenderSession {
    id: SessionId,
    state: watch::Receiver<SessionState>,
}

impl RenderSession {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Wait until the session is `Applied` or `Superseded`.
    pub async fn settled(&mut self) -> SessionState {
        let reached = self
            .state
            .wait_for(|state| state.is_terminal())
            .await
            .map(|state| *state);
        reached.unwrap_or_else(|_| *self.state.borrow())
    }
}

struct SettleJob {
    id: SessionId,
    delay: Duration,
    mount: PreviewMount,
    passes: Arc<SettlePasses>,
    state: Arc<watch::Sender<SessionState>>,
}

impl SettleJob {
    async fn run(self) {
        tokio::time::sleep(self.delay).await;

        let Some(html) = self.mount.read_if_current(self.id) else {
            mark_superseded(self.id, &self.state);
            return;
        };
        if !transition(&self.state, SessionState::Settling) {
            return;
        }
        let started_at = Instant::now();

        let html = match self.math_pass(&html).await {
            Some(typeset) => {
                if !self.mount.apply_if_current(self.id, typeset.clone()) {
                    mark_superseded(self.id, &self.state);
                    return;
                }
                typeset
            }
            None => html,
        };

        if self.mount.session() != Some(self.id) {
            mark_superseded(self.id, &self.state);
            return;
        }

        if let Some(with_diagrams) = self.diagram_pass(&html).await
            && !self.mount.apply_if_current(self.id, with_diagrams)
        {
            mark_superseded(self.id, &self.state);
            return;
        }

        let elapsed_ms = started_at.elapsed().as_secs_f64() * 1000.0;
        histogram!(METRIC_RENDER_SETTLE_MS).record(elapsed_ms);
        if transition(&self.state, SessionState::Applied) {
            debug!(
                target = "application::render::pipeline",
                session = %self.id,
                elapsed_ms = elapsed_ms as u64,
                "Render session applied"
            );
        }
    }

    /// Returns the typeset markup when at least one expression was rendered.
    async fn math_pass(&self, html: &str) -> Option<String> {
        let passes = Arc::clone(&self.passes);
        let source = html.to_owned();
        let result = tokio::task::spawn_blocking(move || {
            typeset_math(&source, &MATH_DELIMITERS, passes.math.as_ref())
        })
        .await;

        match result {
            Ok(Ok(outcome)) => {
                if outcome.failed > 0 {
                    counter!(METRIC_MATH_FAILURES).increment(u64::from(outcome.failed));
                }
                debug!(
                    target = "application::render::math",
                    session = %self.id,
                    rendered = outcome.rendered,
                    failed = outcome.failed,
                    "Math pass finished"
                );
                outcome.changed().then_some(outcome.html)
            }
            Ok(Err(err)) => {
                warn!(
                    target = "application::render::math",
                    session = %self.id,
                    error = %err,
                    "Math pass failed; continuing with diagrams"
                );
                None
            }
            Err(err) => {
                warn!(
                    target = "application::render::math",
                    session = %self.id,
                    error = %err,
                    "Math pass aborted; continuing with diagrams"
                );
                None
            }
        }
    }

    /// Returns the markup with diagram outcomes applied, if any marked element
    /// needed rendering.
    async fn diagram_pass(&self, html: &str) -> Option<String> {
        let marker = &self.passes.marker;
        let slots = match collect_diagram_sources(html, marker) {
            Ok(slots) => slots,
            Err(err) => {
                warn!(
                    target = "application::render::diagram",
                    session = %self.id,
                    error = %err,
                    "Diagram scan failed"
                );
                return None;
            }
        };

        let pending = slots
            .iter()
            .filter(|slot| matches!(slot, DiagramSlot::Pending(_)))
            .count();
        if pending == 0 {
            return None;
        }
        if self.passes.diagrams.is_none() {
            warn!(
                target = "application::render::diagram",
                session = %self.id,
                diagrams = pending,
                "Diagram renderer unavailable; leaving diagrams as source"
            );
        }

        let outcomes = join_all(slots.into_iter().map(|slot| self.render_slot(slot))).await;

        match apply_diagrams(html, marker, &outcomes) {
            Ok(applied) => Some(applied),
            Err(err) => {
                warn!(
                    target = "application::render::diagram",
                    session = %self.id,
                    error = %err,
                    "Failed to apply rendered diagrams"
                );
                None
            }
        }
    }

    async fn render_slot(&self, slot: DiagramSlot) -> DiagramOutcome {
        let DiagramSlot::Pending(source) = slot else {
            return DiagramOutcome::Skipped;
        };
        let Some(renderer) = self.passes.diagrams.clone() else {
            counter!(METRIC_DIAGRAM_FAILURES).increment(1);
            return DiagramOutcome::Failed;
        };
        if source.is_empty() {
            counter!(METRIC_DIAGRAM_FAILURES).increment(1);
            return DiagramOutcome::Failed;
        }

        match tokio::task::spawn_blocking(move || renderer.render_svg(&source)).await {
            Ok(Ok(svg)) => DiagramOutcome::Rendered(svg),
            Ok(Err(err)) => {
                counter!(METRIC_DIAGRAM_FAILURES).increment(1);
                warn!(
                    target = "application::render::diagram",
                    session = %self.id,
                    error = %err,
                    "Diagram left as source"
                );
                DiagramOutcome::Failed
            }
            Err(err) => {
                counter!(METRIC_DIAGRAM_FAILURES).increment(1);
                warn!(
                    target = "application::render::diagram",
                    session = %self.id,
                    error = %err,
                    "Diagram render task aborted"
                );
                DiagramOutcome::Failed
            }
        }
    }
}

/// Move a session to `next` unless it already reached a terminal state.
fn transition(state: &watch::Sender<SessionState>, next: SessionState) -> bool {
    state.send_if_modified(|current| {
        if current.is_terminal() || *current == next {
            return false;
        }
        *current = next;
        true
    })
}

fn mark_superseded(id: SessionId, state: &watch::Sender<SessionState>) {
    if transition(state, SessionState::Superseded) {
        counter!(METRIC_RENDER_SUPERSEDED).increment(1);
        debug!(
            target = "application::render::pipeline",
            session = %id,
            "Render session superseded"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Plain;

    impl MathTypesetter for Plain {
        fn typeset(&self, literal: &str, _display: bool) -> Result<String, RenderError> {
            Ok(format!("<m>{literal}</m>"))
        }
    }

    fn config() -> RenderPipelineConfig {
        RenderPipelineConfig {
            settle_delay: Duration::from_millis(5),
            ..RenderPipelineConfig::default()
        }
    }

    #[test]
    fn building_outside_runtime_fails() {
        let result = RenderPipeline::builder(config())
            .math_typesetter(Arc::new(Plain))
            .without_diagram_renderer()
            .build(PreviewMount::new());
        assert!(matches!(result, Err(RenderError::Configuration { .. })));
    }

    #[tokio::test]
    async fn zero_delay_is_rejected() {
        let result = RenderPipeline::builder(RenderPipelineConfig {
            settle_delay: Duration::ZERO,
            ..config()
        })
        .without_diagram_renderer()
        .build(PreviewMount::new());
        assert!(matches!(result, Err(RenderError::Configuration { .. })));
    }

    #[tokio::test]
    async fn release_supersedes_pending_session() {
        let mount = PreviewMount::new();
        let pipeline = RenderPipeline::builder(RenderPipelineConfig {
            settle_delay: Duration::from_secs(60),
            ..config()
        })
        .math_typesetter(Arc::new(Plain))
        .without_diagram_renderer()
        .build(mount.clone())
        .expect("pipeline");

        let mut session = pipeline.render(HtmlDocument::new("<p>$x$</p>"));
        assert_eq!(session.state(), SessionState::Pending);
        pipeline.release();

        assert_eq!(session.settled().await, SessionState::Superseded);
        assert_eq!(mount.snapshot(), "<p>$x$</p>");
        assert_eq!(mount.session(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_renders_leave_highest_session_mounted() {
        let mount = PreviewMount::new();
        let pipeline = RenderPipeline::builder(config())
            .math_typesetter(Arc::new(Plain))
            .without_diagram_renderer()
            .build(mount.clone())
            .expect("pipeline");

        let mut sessions = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..8)
                .map(|n| {
                    let pipeline = &pipeline;
                    scope.spawn(move || {
                        (0..4)
                            .map(|round| {
                                pipeline.render(HtmlDocument::new(format!("<p>{n}-{round}</p>")))
                            })
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            workers
                .into_iter()
                .flat_map(|worker| worker.join().expect("render thread"))
                .collect::<Vec<_>>()
        });

        let newest = sessions
            .iter()
            .map(RenderSession::id)
            .max()
            .expect("sessions issued");
        assert_eq!(mount.session(), Some(newest));

        for session in &mut sessions {
            let expected = if session.id() == newest {
                SessionState::Applied
            } else {
                SessionState::Superseded
            };
            assert_eq!(session.settled().await, expected, "session {}", session.id());
        }
    }

    #[tokio::test]
    async fn exports_follow_last_document() {
        let pipeline = RenderPipeline::builder(config())
            .math_typesetter(Arc::new(Plain))
            .without_diagram_renderer()
            .build(PreviewMount::new())
            .expect("pipeline");

        assert!(pipeline.export_raw().is_none());
        assert!(pipeline.export_standalone().expect("export").is_none());

        pipeline.render(HtmlDocument::new("<p>one</p>"));
        pipeline.render(HtmlDocument::new("<p>two</p>"));
        assert_eq!(pipeline.export_raw().as_deref(), Some("<p>two</p>"));
        let page = pipeline
            .export_standalone()
            .expect("export")
            .expect("document present");
        assert!(page.contains("<p>two</p>"));
    }

    #[tokio::test]
    async fn sanitizing_pipeline_strips_scripts_before_mounting() {
        let mount = PreviewMount::new();
        let pipeline = RenderPipeline::builder(RenderPipelineConfig {
            sanitize: true,
            ..config()
        })
        .math_typesetter(Arc::new(Plain))
        .without_diagram_renderer()
        .build(mount.clone())
        .expect("pipeline");

        pipeline.render(HtmlDocument::new("<p>ok</p><script>alert(1)</script>"));
        assert_eq!(mount.snapshot(), "<p>ok</p>");
    }
}
