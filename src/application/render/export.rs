use askama::Template;
use thiserror::Error;

use crate::domain::HtmlDocument;

use super::types::{DiagramMarker, MATH_DELIMITERS};

pub const KATEX_STYLESHEET_URL: &str =
    "https://cdn.jsdelivr.net/npm/katex@0.16.9/dist/katex.min.css";
pub const KATEX_SCRIPT_URL: &str = "https://cdn.jsdelivr.net/npm/katex@0.16.9/dist/katex.min.js";
pub const KATEX_AUTO_RENDER_URL: &str =
    "https://cdn.jsdelivr.net/npm/katex@0.16.9/dist/contrib/auto-render.min.js";
pub const MERMAID_SCRIPT_URL: &str = "https://cdn.jsdelivr.net/npm/mermaid@10/dist/mermaid.min.js";
pub const TAILWIND_SCRIPT_URL: &str = "https://cdn.tailwindcss.com";

const DEFAULT_MERMAID_THEME: &str = "dark";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to serialize math delimiters: {0}")]
    Delimiters(#[from] serde_json::Error),
    #[error("failed to render export template: {0}")]
    Template(#[from] askama::Error),
}

#[derive(Template)]
#[template(path = "standalone.html")]
struct StandaloneTemplate<'a> {
    body: &'a str,
    delimiters_json: &'a str,
    diagram_selector: &'a str,
    mermaid_theme: &'a str,
    katex_stylesheet_url: &'a str,
    katex_script_url: &'a str,
    katex_auto_render_url: &'a str,
    mermaid_script_url: &'a str,
    tailwind_script_url: &'a str,
}

/// Document shell used by the standalone export.
///
/// Carries the diagram marker and theme of the pipeline it was taken from so
/// the exported page re-runs the same passes the live preview ran.
#[derive(Debug, Clone)]
pub struct ExportShell {
    diagram_marker: DiagramMarker,
    mermaid_theme: String,
}

impl ExportShell {
    pub fn new(diagram_marker: DiagramMarker, mermaid_theme: impl Into<String>) -> Self {
        Self {
            diagram_marker,
            mermaid_theme: mermaid_theme.into(),
        }
    }

    pub fn render(&self, doc: &HtmlDocument) -> Result<String, ExportError> {
        let delimiters_json = serde_json::to_string(&MATH_DELIMITERS)?;
        let template = StandaloneTemplate {
            body: doc.as_str(),
            delimiters_json: &delimiters_json,
            diagram_selector: self.diagram_marker.selector(),
            mermaid_theme: &self.mermaid_theme,
            katex_stylesheet_url: KATEX_STYLESHEET_URL,
            katex_script_url: KATEX_SCRIPT_URL,
            katex_auto_render_url: KATEX_AUTO_RENDER_URL,
            mermaid_script_url: MERMAID_SCRIPT_URL,
            tailwind_script_url: TAILWIND_SCRIPT_URL,
        };
        Ok(template.render()?)
    }
}

impl Default for ExportShell {
    fn default() -> Self {
        Self::new(DiagramMarker::default(), DEFAULT_MERMAID_THEME)
    }
}

/// The document exactly as received, for clipboard export.
pub fn export_raw(doc: &HtmlDocument) -> String {
    doc.as_str().to_owned()
}

/// Wrap `doc` in a self-contained page that loads KaTeX and Mermaid and runs
/// both passes on load.
pub fn export_standalone(doc: &HtmlDocument) -> Result<String, ExportError> {
    ExportShell::default().render(doc)
}
