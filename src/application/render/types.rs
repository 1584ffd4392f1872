use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Class that marks an element whose text content is diagram source.
pub const DEFAULT_DIAGRAM_MARKER: &str = "mermaid";

/// One math delimiter pair, mirrored verbatim into the standalone export's
/// auto-render configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MathDelimiter {
    pub left: &'static str,
    pub right: &'static str,
    pub display: bool,
}

/// Delimiters scanned by the math pass, in priority order: `$$` must be tried
/// before `$` so display math is not split into two inline spans.
pub const MATH_DELIMITERS: [MathDelimiter; 2] = [
    MathDelimiter {
        left: "$$",
        right: "$$",
        display: true,
    },
    MathDelimiter {
        left: "$",
        right: "$",
        display: false,
    },
];

/// Monotonic identifier assigned to each `render` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub(crate) u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a render session.
///
/// `Pending` until the settle delay elapses, `Settling` while the passes run,
/// then either `Applied` or `Superseded`. Terminal states never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Pending,
    Settling,
    Applied,
    Superseded,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Applied | SessionState::Superseded)
    }
}

/// Validated diagram marker class together with the selector derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagramMarker {
    class: String,
    selector: String,
}

impl DiagramMarker {
    pub fn new(class: &str) -> Result<Self, RenderError> {
        let class = class.trim();
        let valid_start = class
            .chars()
            .next()
            .is_some_and(|ch| ch.is_ascii_alphabetic() || ch == '_' || ch == '-');
        let valid_rest = class
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-');
        if !valid_start || !valid_rest {
            return Err(RenderError::Configuration {
                message: format!("invalid diagram marker class `{class}`"),
            });
        }

        let selector = format!(".{class}");
        selector
            .parse::<lol_html::Selector>()
            .map_err(|err| RenderError::Configuration {
                message: format!("diagram marker `{class}` is not a usable selector: {err}"),
            })?;

        Ok(Self {
            class: class.to_string(),
            selector,
        })
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn selector(&self) -> &str {
        &self.selector
    }
}

impl Default for DiagramMarker {
    fn default() -> Self {
        Self {
            class: DEFAULT_DIAGRAM_MARKER.to_string(),
            selector: format!(".{DEFAULT_DIAGRAM_MARKER}"),
        }
    }
}

/// Errors raised inside the pipeline. None of them cross `render`; they are
/// logged and the affected fragment keeps its source.
#[derive(Debug, Clone, Error)]
pub enum RenderError {
    #[error("markup rewriting failed: {message}")]
    Rewrite { message: String },
    #[error("math typesetting failed: {message}")]
    Math { message: String },
    #[error("diagram rendering failed: {message}")]
    Diagram { message: String },
    #[error("render pipeline misconfigured: {message}")]
    Configuration { message: String },
}

/// Typesets a single math expression into HTML.
pub trait MathTypesetter: Send + Sync {
    fn typeset(&self, literal: &str, display: bool) -> Result<String, RenderError>;
}

/// Renders diagram source text into an inline SVG fragment.
pub trait DiagramRenderer: Send + Sync {
    fn render_svg(&self, source: &str) -> Result<String, RenderError>;
}
