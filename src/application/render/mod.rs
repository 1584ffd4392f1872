//! Preview rendering pipeline.
//!
//! A document is mounted as soon as it arrives; math typesetting and diagram
//! rendering run in a deferred settle step that only the most recent session
//! is allowed to apply. Nothing in here surfaces an error to the caller of
//! `render`: failing fragments stay as source and are logged.

mod export;
mod mount;
mod pipeline;
mod service;
mod types;

pub use export::{
    ExportError, ExportShell, KATEX_AUTO_RENDER_URL, KATEX_SCRIPT_URL, KATEX_STYLESHEET_URL,
    MERMAID_SCRIPT_URL, export_raw, export_standalone,
};
pub use mount::PreviewMount;
pub use pipeline::{
    DEFAULT_SETTLE_DELAY, RenderPipeline, RenderPipelineBuilder, RenderPipelineConfig,
    RenderSession,
};
pub use service::{KatexTypesetter, MermaidCliRenderer, MermaidRenderError};
pub use types::{
    DEFAULT_DIAGRAM_MARKER, DiagramMarker, DiagramRenderer, MATH_DELIMITERS, MathDelimiter,
    MathTypesetter, RenderError, SessionId, SessionState,
};
