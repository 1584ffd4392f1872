use std::{cell::RefCell, rc::Rc};

use html_escape::decode_html_entities;
use lol_html::{
    RewriteStrSettings, doc_text, element, html_content::ContentType, rewrite_str,
};

use crate::application::render::types::{DiagramMarker, RenderError};

/// A marked element found by the collection pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DiagramSlot {
    Pending(String),
    /// Already carries rendered output; left as is.
    AlreadyProcessed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DiagramOutcome {
    Rendered(String),
    Failed,
    Skipped,
}

/// Collect the decoded text content of every marked element in document order.
///
/// Text inside a marked element counts towards every marked ancestor that is
/// still open, so a nested marked element contributes to its parent's source.
pub(crate) fn collect_diagram_sources(
    html: &str,
    marker: &DiagramMarker,
) -> Result<Vec<DiagramSlot>, RenderError> {
    let scan = Rc::new(RefCell::new(CollectScan::default()));

    rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![element!(marker.selector(), {
                let scan = Rc::clone(&scan);
                move |el| {
                    let processed = el
                        .get_attribute("data-processed")
                        .is_some_and(|value| value == "true");
                    let index = {
                        let mut scan = scan.borrow_mut();
                        scan.slots.push(if processed {
                            DiagramSlot::AlreadyProcessed
                        } else {
                            DiagramSlot::Pending(String::new())
                        });
                        scan.raw_sources.push(String::new());
                        scan.slots.len() - 1
                    };

                    let Some(handlers) = el.end_tag_handlers() else {
                        return Ok(());
                    };
                    scan.borrow_mut().open.push(index);
                    let scan = Rc::clone(&scan);
                    let handler: lol_html::EndTagHandler<'static> = Box::new(move |_end| {
                        let mut scan = scan.borrow_mut();
                        if let Some(position) = scan.open.iter().rposition(|open| *open == index) {
                            scan.open.remove(position);
                        }
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
                    let CollectScan {
                        raw_sources, open, ..
                    } = &mut *scan;
                    for index in open.iter() {
                        if let Some(raw) = raw_sources.get_mut(*index) {
                            raw.push_str(chunk.as_str());
                        }
                    }
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
    let collected = scan
        .slots
        .iter()
        .zip(scan.raw_sources.iter())
        .map(|(slot, raw)| match slot {
            DiagramSlot::Pending(_) => {
                DiagramSlot::Pending(decode_html_entities(raw).trim().to_string())
            }
            DiagramSlot::AlreadyProcessed => DiagramSlot::AlreadyProcessed,
        })
        .collect();
    Ok(collected)
}

#[derive(Default)]
struct CollectScan {
    slots: Vec<DiagramSlot>,
    raw_sources: Vec<String>,
    /// Indices of marked elements whose end tag has not been seen yet.
    open: Vec<usize>,
}

/// Write rendering outcomes back onto the marked elements, matched by ordinal.
pub(crate) fn apply_diagrams(
    html: &str,
    marker: &DiagramMarker,
    outcomes: &[DiagramOutcome],
) -> Result<String, RenderError> {
    let index = Rc::new(RefCell::new(0usize));

    rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![element!(marker.selector(), {
                let index = Rc::clone(&index);
                move |el| {
                    let mut idx = index.borrow_mut();
                    let outcome = outcomes.get(*idx);
                    *idx += 1;

                    match outcome {
                        Some(DiagramOutcome::Rendered(svg)) => {
                            el.set_inner_content(svg, ContentType::Html);
                            el.set_attribute("data-processed", "true")?;
                        }
                        Some(DiagramOutcome::Failed) => {
                            el.set_attribute("data-diagram-state", "error")?;
                        }
                        Some(DiagramOutcome::Skipped) | None => {}
                    }
                    Ok(())
                }
            })],
            ..RewriteStrSettings::default()
        },
    )
    .map_err(|err| RenderError::Rewrite {
        message: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_sources_in_document_order() {
        let html = r#"<pre class="mermaid">
graph TD; A--&gt;B
</pre><p>between</p><div class="note mermaid">sequenceDiagram</div>"#;
        let slots = collect_diagram_sources(html, &DiagramMarker::default()).expect("collect");
        assert_eq!(
            slots,
            vec![
                DiagramSlot::Pending("graph TD; A-->B".to_string()),
                DiagramSlot::Pending("sequenceDiagram".to_string()),
            ]
        );
    }

    #[test]
    fn named_entities_in_sources_are_decoded() {
        let html = r#"<pre class="mermaid">A[Perch&eacute;] --&gt; B[&rarr; fine &ndash; ok]</pre>"#;
        let slots = collect_diagram_sources(html, &DiagramMarker::default()).expect("collect");
        assert_eq!(
            slots,
            vec![DiagramSlot::Pending("A[Perché] --> B[→ fine – ok]".to_string())]
        );
    }

    #[test]
    fn nested_marked_element_text_counts_for_both() {
        let html = r#"<div class="mermaid">outer<pre class="mermaid">inner</pre></div><pre class="mermaid">after</pre>"#;
        let slots = collect_diagram_sources(html, &DiagramMarker::default()).expect("collect");
        assert_eq!(
            slots,
            vec![
                DiagramSlot::Pending("outerinner".to_string()),
                DiagramSlot::Pending("inner".to_string()),
                DiagramSlot::Pending("after".to_string()),
            ]
        );
    }

    #[test]
    fn processed_elements_are_not_collected_again() {
        let html = r#"<pre class="mermaid" data-processed="true"><svg></svg></pre>"#;
        let slots = collect_diagram_sources(html, &DiagramMarker::default()).expect("collect");
        assert_eq!(slots, vec![DiagramSlot::AlreadyProcessed]);
    }

    #[test]
    fn no_marked_elements_yields_nothing() {
        let slots =
            collect_diagram_sources("<p>plain</p>", &DiagramMarker::default()).expect("collect");
        assert!(slots.is_empty());
    }

    #[test]
    fn applies_outcomes_by_ordinal() {
        let html = r#"<pre class="mermaid">good</pre><pre class="mermaid">bad</pre>"#;
        let outcomes = vec![
            DiagramOutcome::Rendered("<svg id=\"d1\"></svg>".to_string()),
            DiagramOutcome::Failed,
        ];
        let applied =
            apply_diagrams(html, &DiagramMarker::default(), &outcomes).expect("apply");
        assert_eq!(
            applied,
            r#"<pre class="mermaid" data-processed="true"><svg id="d1"></svg></pre><pre class="mermaid" data-diagram-state="error">bad</pre>"#
        );
    }

    #[test]
    fn custom_marker_selects_other_class() {
        let marker = DiagramMarker::new("diagram").expect("marker");
        let html = r#"<pre class="mermaid">ignored</pre><pre class="diagram">flow</pre>"#;
        let slots = collect_diagram_sources(html, &marker).expect("collect");
        assert_eq!(slots, vec![DiagramSlot::Pending("flow".to_string())]);
    }
}
