use crate::application::render::types::MathDelimiter;

/// A piece of a text node: either literal text or a delimited math expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Segment<'a> {
    Text(&'a str),
    Math {
        /// Source including both delimiters, re-emitted when typesetting fails.
        raw: &'a str,
        body: &'a str,
        display: bool,
    },
}

/// Split `text` at math delimiters.
///
/// At each position the delimiters are tried in list order, so `$$` wins over
/// `$` when both match. An opening delimiter without a matching close leaves
/// the remainder of the text untouched.
pub(crate) fn split_at_delimiters<'a>(
    text: &'a str,
    delimiters: &[MathDelimiter],
) -> Vec<Segment<'a>> {
    let mut segments = Vec::new();
    let mut cursor = 0;

    while let Some((start, delimiter)) = find_opening(text, cursor, delimiters) {
        let body_start = start + delimiter.left.len();
        let Some(body_end) = find_end_of_math(text, body_start, delimiter.right) else {
            break;
        };

        if start > cursor {
            segments.push(Segment::Text(&text[cursor..start]));
        }
        let end = body_end + delimiter.right.len();
        segments.push(Segment::Math {
            raw: &text[start..end],
            body: &text[body_start..body_end],
            display: delimiter.display,
        });
        cursor = end;
    }

    if cursor < text.len() {
        segments.push(Segment::Text(&text[cursor..]));
    }
    segments
}

pub(crate) fn contains_math(segments: &[Segment<'_>]) -> bool {
    segments
        .iter()
        .any(|segment| matches!(segment, Segment::Math { .. }))
}

fn find_opening<'d>(
    text: &str,
    from: usize,
    delimiters: &'d [MathDelimiter],
) -> Option<(usize, &'d MathDelimiter)> {
    text[from..].char_indices().find_map(|(offset, _)| {
        let position = from + offset;
        delimiters
            .iter()
            .find(|delimiter| text[position..].starts_with(delimiter.left))
            .map(|delimiter| (position, delimiter))
    })
}

/// Locate the closing delimiter, skipping backslash escapes and anything
/// nested inside braces.
fn find_end_of_math(text: &str, from: usize, right: &str) -> Option<usize> {
    let mut brace_level: i32 = 0;
    let mut chars = text[from..].char_indices();

    while let Some((offset, ch)) = chars.next() {
        let position = from + offset;
        if brace_level <= 0 && text[position..].starts_with(right) {
            return Some(position);
        }
        match ch {
            '\\' => {
                chars.next();
            }
            '{' => brace_level += 1,
            '}' => brace_level -= 1,
            _ => {}
        }
    }

    None
}
