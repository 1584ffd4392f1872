use std::{cell::RefCell, fmt, rc::Rc};

use lol_html::{RewriteStrSettings, html_content::ContentType, rewrite_str, text};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Opaque markup returned by a generation call.
///
/// Nothing about the content is verified: it usually holds a root `<article>`,
/// `$...$` / `$$...$$` math and `<pre class="mermaid">` diagram blocks, but the
/// pipeline must cope with anything.
#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HtmlDocument(String);

impl HtmlDocument {
    pub fn new(markup: impl Into<String>) -> Self {
        Self(markup.into())
    }

    /// Normalise raw model output: drop the markdown fences models like to wrap
    /// HTML in, and the fences that leak into diagram blocks.
    pub fn from_model_output(raw: &str) -> Self {
        let unfenced = strip_outer_fence(raw);
        Self(strip_diagram_fences(&unfenced))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for HtmlDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HtmlDocument")
            .field("bytes", &self.0.len())
            .finish()
    }
}

impl From<String> for HtmlDocument {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for HtmlDocument {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl AsRef<str> for HtmlDocument {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn strip_outer_fence(raw: &str) -> String {
    let mut body = raw;
    if let Some(rest) = body.strip_prefix("```html") {
        body = rest.trim_start();
    }
    if let Some(rest) = body.strip_suffix("```") {
        body = rest;
    }
    body.trim().to_string()
}

fn strip_diagram_fences(html: &str) -> String {
    let buffer = Rc::new(RefCell::new(String::new()));

    let rewritten = rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![text!("pre.mermaid", {
                let buffer = Rc::clone(&buffer);
                move |chunk| {
                    buffer.borrow_mut().push_str(chunk.as_str());
                    if chunk.last_in_text_node() {
                        let source = std::mem::take(&mut *buffer.borrow_mut());
                        chunk.replace(&clean_diagram_source(&source), ContentType::Html);
                    } else {
                        chunk.remove();
                    }
                    Ok(())
                }
            })],
            ..RewriteStrSettings::default()
        },
    );

    match rewritten {
        Ok(html) => html,
        Err(err) => {
            debug!(
                target = "domain::document",
                error = %err,
                "Diagram fence cleanup skipped; markup left untouched"
            );
            html.to_string()
        }
    }
}

fn clean_diagram_source(source: &str) -> String {
    let mut body = source.trim_start();
    if let Some(rest) = body.strip_prefix("```mermaid") {
        body = rest.trim_start();
    } else if let Some(rest) = body.strip_prefix("```") {
        body = rest.trim_start();
    }
    let body = body.trim_end();
    let body = body.strip_suffix("```").unwrap_or(body);
    body.trim().to_string()
}
