use std::{collections::HashMap, sync::Arc, time::Duration};

use appunti::{
    application::render::{
        DiagramRenderer, MathTypesetter, PreviewMount, RenderError, RenderPipeline,
        RenderPipelineConfig, SessionState,
    },
    domain::HtmlDocument,
    infra::telemetry::{
        METRIC_DIAGRAM_FAILURES, METRIC_MATH_FAILURES, METRIC_RENDER_SESSIONS,
        METRIC_RENDER_SETTLE_MS, METRIC_RENDER_SUPERSEDED, describe_metrics,
    },
};
use metrics_util::debugging::{DebugValue, DebuggingRecorder};

struct RejectBad;

impl MathTypesetter for RejectBad {
    fn typeset(&self, literal: &str, _display: bool) -> Result<String, RenderError> {
        if literal.contains("\\bad") {
            return Err(RenderError::Math {
                message: "Undefined control sequence: \\bad".to_string(),
            });
        }
        Ok(format!("<i>{literal}</i>"))
    }
}

struct AlwaysFails;

impl DiagramRenderer for AlwaysFails {
    fn render_svg(&self, _source: &str) -> Result<String, RenderError> {
        Err(RenderError::Diagram {
            message: "mmdc exited with status 1".to_string(),
        })
    }
}

#[tokio::test]
async fn render_sessions_emit_expected_metrics() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");
    describe_metrics();

    let pipeline = RenderPipeline::builder(RenderPipelineConfig {
        settle_delay: Duration::from_millis(10),
        ..RenderPipelineConfig::default()
    })
    .math_typesetter(Arc::new(RejectBad))
    .diagram_renderer(Arc::new(AlwaysFails))
    .build(PreviewMount::new())
    .expect("pipeline");

    let mut stale = pipeline.render(HtmlDocument::new("<p>$x$</p>"));
    let mut current = pipeline.render(HtmlDocument::new(
        "<p>$\\bad$ and $y$</p><pre class=\"mermaid\">graph TD; A</pre>",
    ));
    assert_eq!(stale.settled().await, SessionState::Superseded);
    assert_eq!(current.settled().await, SessionState::Applied);

    let mounted = pipeline.mount().snapshot();
    assert!(mounted.contains("$\\bad$"), "{mounted}");
    assert!(mounted.contains("<i>y</i>"), "{mounted}");

    let snapshot: HashMap<String, DebugValue> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, value)| (composite_key.key().name().to_string(), value))
        .collect();

    let counter = |name: &str| match snapshot.get(name) {
        Some(DebugValue::Counter(value)) => *value,
        other => panic!("expected counter {name}, got {other:?}"),
    };

    assert_eq!(counter(METRIC_RENDER_SESSIONS), 2);
    assert_eq!(counter(METRIC_RENDER_SUPERSEDED), 1);
    assert_eq!(counter(METRIC_MATH_FAILURES), 1);
    assert_eq!(counter(METRIC_DIAGRAM_FAILURES), 1);
    assert!(
        matches!(snapshot.get(METRIC_RENDER_SETTLE_MS), Some(DebugValue::Histogram(values)) if values.len() == 1),
        "settle histogram missing"
    );
}
