use std::{cell::RefCell, rc::Rc};

use html_escape::decode_html_entities;
use katex::{OptsBuilder, OutputType};
use lol_html::{RewriteStrSettings, doc_text, element, html_content::ContentType, rewrite_str};
use tracing::warn;

use crate::application::render::types::{MathDelimiter, MathTypesetter, RenderError};

use super::delimiters::{Segment, contains_math, split_at_delimiters};

/// Text inside these elements is never scanned for math.
const IGNORED_TAGS: &str = "script, noscript, style, textarea, pre, code, option";

/// KaTeX-backed typesetter producing HTML-only output.
#[derive(Debug, Clone, Copy, Default)]
pub struct KatexTypesetter;

impl MathTypesetter for KatexTypesetter {
    fn typeset(&self, literal: &str, display: bool) -> Result<String, RenderError> {
        let mut builder = OptsBuilder::default();
        builder.display_mode(display);
        builder.output_type(OutputType::Html);

        let opts = builder.build().map_err(|err| RenderError::Math {
            message: format!("failed to build KaTeX options: {err}"),
        })?;

        katex::render_with_opts(literal, opts).map_err(|err| RenderError::Math {
            message: err.to_string(),
        })
    }
}

#[derive(Debug, Default)]
pub(crate) struct MathPassOutcome {
    pub(crate) html: String,
    pub(crate) rendered: u32,
    pub(crate) failed: u32,
}

impl MathPassOutcome {
    pub(crate) fn changed(&self) -> bool {
        self.rendered > 0
    }
}

#[derive(Default)]
struct MathScan {
    ignored_depth: usize,
    pending: String,
    rendered: u32,
    failed: u32,
}

/// Replace delimited math in every text node with typeset markup.
///
/// Text nodes are buffered across chunk boundaries and rewritten once the
/// final chunk arrives. Expressions that fail to typeset keep their source.
pub(crate) fn typeset_math(
    html: &str,
    delimiters: &[MathDelimiter],
    typesetter: &dyn MathTypesetter,
) -> Result<MathPassOutcome, RenderError> {
    let scan = Rc::new(RefCell::new(MathScan::default()));

    let rewritten = rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![element!(IGNORED_TAGS, {
                let scan = Rc::clone(&scan);
                move |el| {
                    let Some(handlers) = el.end_tag_handlers() else {
                        return Ok(());
                    };
                    scan.borrow_mut().ignored_depth += 1;
                    let scan = Rc::clone(&scan);
                    let handler: lol_html::EndTagHandler<'static> = Box::new(move |_end| {
                        let mut scan = scan.borrow_mut();
                        scan.ignored_depth = scan.ignored_depth.saturating_sub(1);
                        Ok(())
                    });
                    handlers.push(handler);
                    Ok(())
                }
            })],
            document_content_handlers: vec![doc_text!({
                let scan = Rc::clone(&scan);
                move |chunk| {
                    let mut scan = scan.borrow_mut();
                    if scan.ignored_depth > 0 {
                        return Ok(());
                    }

                    scan.pending.push_str(chunk.as_str());
                    if !chunk.last_in_text_node() {
                        chunk.remove();
                        return Ok(());
                    }

                    let text = std::mem::take(&mut scan.pending);
                    let segments = split_at_delimiters(&text, delimiters);
                    if !contains_math(&segments) {
                        chunk.replace(&text, ContentType::Html);
                        return Ok(());
                    }

                    let mut output = String::with_capacity(text.len());
                    for segment in segments {
                        match segment {
                            Segment::Text(literal) => output.push_str(literal),
                            Segment::Math { raw, body, display } => {
                                match typeset_expression(typesetter, body, display) {
                                    Ok(markup) => {
                                        scan.rendered = scan.rendered.saturating_add(1);
                                        output.push_str(&markup);
                                    }
                                    Err(err) => {
                                        scan.failed = scan.failed.saturating_add(1);
                                        let display_mode = display;
                                        warn!(
                                            target = "application::render::math",
                                            display_mode,
                                            error = %err,
                                            "Math expression left as source"
                                        );
                                        output.push_str(raw);
                                    }
                                }
                            }
                        }
                    }
                    chunk.replace(&output, ContentType::Html);
                    Ok(())
                }
            })],
            ..RewriteStrSettings::default()
        },
    )
    .map_err(|err| RenderError::Rewrite {
        message: err.to_string(),
    })?;

    let scan = scan.borrow();
    Ok(MathPassOutcome {
        html: rewritten,
        rendered: scan.rendered,
        failed: scan.failed,
    })
}

fn typeset_expression(
    typesetter: &dyn MathTypesetter,
    body: &str,
    display: bool,
) -> Result<String, RenderError> {
    let literal = decode_html_entities(body);
    let markup = typesetter.typeset(&literal, display)?;
    let (role, style) = if display {
        ("math-block", "display")
    } else {
        ("math-inline", "inline")
    };
    Ok(format!(
        "<span data-role=\"{role}\" data-math-style=\"{style}\">{markup}</span>"
    ))
}
