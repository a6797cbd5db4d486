//! Content-aware boundary detection.
//!
//! Finds the byte offsets at which a document may be split without cutting
//! through a structural unit. Each [`ContentType`] has its own strategy:
//!
//! | Content type | Boundary placed before |
//! |--------------|------------------------|
//! | `heading-sectioned` | each heading of the shallowest level that occurs past the start |
//! | `structured-record` | each top-level JSON record after the first, or each member of a lone object |
//! | `timestamped-log` | each line that starts with a timestamp |
//! | `code` | each top-level item after the first (with its attributes/comments) |
//! | `plain-text` | the first line after a run of blank lines |
//!
//! Detection never fails. Text without recognizable structure yields an
//! empty list, and the planner falls back to fixed-size cuts.

use regex::Regex;
use std::sync::OnceLock;

use crate::models::ContentType;

/// Bytes inspected by [`infer_content_type`].
const INFER_SAMPLE_BYTES: usize = 64 * 1024;
/// Lines inspected by [`infer_content_type`].
const INFER_SAMPLE_LINES: usize = 400;

fn timestamp_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?:\[?\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}|\[\d{4}-\d{2}-\d{2}\]|[A-Z][a-z]{2} [ \d]\d \d{2}:\d{2}:\d{2}|\[?\d{2}:\d{2}:\d{2}|\[\d{10}(?:\.\d+)?\])",
        )
        .expect("timestamp pattern is valid")
    })
}

fn code_item_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?:(?:pub(?:\([^)]*\))?|export|default|async|unsafe|const|abstract|public|private|protected|final|static)\s+)*(?:fn|struct|enum|impl|trait|mod|union|class|def|function|interface|type|func)\b",
        )
        .expect("code item pattern is valid")
    })
}

/// Find the split points for `text` interpreted as `content_type`.
///
/// Returned offsets are strictly increasing, lie strictly inside
/// `(0, text.len())`, and fall on UTF-8 character boundaries.
pub fn find_boundaries(text: &str, content_type: ContentType) -> Vec<usize> {
    let mut offsets = match content_type {
        ContentType::HeadingSectioned => heading_boundaries(text),
        ContentType::StructuredRecord => record_boundaries(text),
        ContentType::TimestampedLog => log_boundaries(text),
        ContentType::Code => code_boundaries(text),
        ContentType::PlainText => paragraph_boundaries(text),
    };
    offsets.retain(|&o| o > 0 && o < text.len() && text.is_char_boundary(o));
    offsets.sort_unstable();
    offsets.dedup();
    offsets
}

/// Guess the content type of `text` from a bounded prefix.
pub fn infer_content_type(text: &str) -> ContentType {
    let trimmed = text.trim();
    if ((trimmed.starts_with('{') && trimmed.ends_with('}'))
        || (trimmed.starts_with('[') && trimmed.ends_with(']')))
        && !timestamp_re().is_match(trimmed)
    {
        return ContentType::StructuredRecord;
    }

    let sample = &text[..snap_to_char_boundary(text, INFER_SAMPLE_BYTES)];
    let mut non_empty = 0usize;
    let mut timestamped = 0usize;
    let mut headings = 0usize;
    let mut items = 0usize;
    let mut leading_heading = false;

    for (_, line) in lines_with_offsets(sample).take(INFER_SAMPLE_LINES) {
        if line.trim().is_empty() {
            continue;
        }
        if non_empty == 0 && heading_level(line).is_some() {
            leading_heading = true;
        }
        non_empty += 1;
        if timestamp_re().is_match(line) {
            timestamped += 1;
        }
        if heading_level(line).is_some() {
            headings += 1;
        }
        if code_item_re().is_match(line) {
            items += 1;
        }
    }

    if non_empty == 0 {
        return ContentType::PlainText;
    }
    if timestamped * 10 >= non_empty * 6 {
        return ContentType::TimestampedLog;
    }
    if items >= 3 && items >= headings {
        return ContentType::Code;
    }
    if headings >= 2 || leading_heading {
        return ContentType::HeadingSectioned;
    }
    ContentType::PlainText
}

/// Iterate `(line_start_offset, line_without_terminator)` pairs.
fn lines_with_offsets(text: &str) -> impl Iterator<Item = (usize, &str)> {
    let mut offset = 0;
    text.split_inclusive('\n').map(move |raw| {
        let start = offset;
        offset += raw.len();
        (start, raw.trim_end_matches(|c| c == '\n' || c == '\r'))
    })
}

/// ATX heading level of a line (`#` … `######`), if it is a heading.
fn heading_level(line: &str) -> Option<usize> {
    let hashes = line.bytes().take_while(|&b| b == b'#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    match line.as_bytes().get(hashes) {
        None | Some(b' ') | Some(b'\t') => Some(hashes),
        _ => None,
    }
}

fn heading_boundaries(text: &str) -> Vec<usize> {
    let mut in_fence = false;
    let mut headings = Vec::new();

    for (offset, line) in lines_with_offsets(text) {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        if let Some(level) = heading_level(line) {
            headings.push((offset, level));
        }
    }

    // A lone title at offset 0 splits nothing; descend to the first level
    // that has a heading inside the document.
    (1..=6)
        .map(|level| {
            headings
                .iter()
                .filter(|&&(offset, l)| l == level && offset > 0)
                .map(|&(offset, _)| offset)
                .collect::<Vec<_>>()
        })
        .find(|offsets| !offsets.is_empty())
        .unwrap_or_default()
}

/// Boundaries between top-level JSON records.
///
/// A document that opens with `[` is one array whose elements are the
/// records. Otherwise it is read as a stream of top-level values (JSON
/// Lines); a stream holding a single object is split between that
/// object's members instead. Nesting must balance, otherwise nothing is
/// emitted.
fn record_boundaries(text: &str) -> Vec<usize> {
    let bytes = text.as_bytes();
    let Some(first) = bytes.iter().position(|b| !b.is_ascii_whitespace()) else {
        return Vec::new();
    };
    if bytes[first] == b'[' {
        return member_boundaries(bytes);
    }
    let records = stream_boundaries(bytes);
    if records.is_empty() && bytes[first] == b'{' {
        return member_boundaries(bytes);
    }
    records
}

/// Tracks whether a byte of JSON text sits inside a string literal.
#[derive(Default)]
struct JsonLexer {
    in_string: bool,
    escaped: bool,
}

impl JsonLexer {
    /// Feed one byte. True when it is structural: outside any string and
    /// not whitespace, or the quote that opens a string.
    fn structural(&mut self, b: u8) -> bool {
        if self.in_string {
            if self.escaped {
                self.escaped = false;
            } else if b == b'\\' {
                self.escaped = true;
            } else if b == b'"' {
                self.in_string = false;
            }
            return false;
        }
        if b == b'"' {
            self.in_string = true;
        }
        !b.is_ascii_whitespace()
    }
}

/// Starts of the second and later top-level values.
fn stream_boundaries(bytes: &[u8]) -> Vec<usize> {
    let mut lexer = JsonLexer::default();
    let mut depth = 0usize;
    let mut seen_record = false;
    let mut boundaries = Vec::new();

    for (i, &b) in bytes.iter().enumerate() {
        if !lexer.structural(b) {
            continue;
        }
        if depth == 0 && (b == b'{' || b == b'[') {
            if seen_record {
                boundaries.push(i);
            }
            seen_record = true;
        }
        match b {
            b'{' | b'[' => depth += 1,
            b'}' | b']' => {
                if depth == 0 {
                    return Vec::new();
                }
                depth -= 1;
            }
            _ => {}
        }
    }

    if depth != 0 || lexer.in_string {
        return Vec::new();
    }
    boundaries
}

/// Starts of the second and later members of the outermost container
/// (array elements or object key/value pairs).
fn member_boundaries(bytes: &[u8]) -> Vec<usize> {
    let mut lexer = JsonLexer::default();
    let mut depth = 0usize;
    let mut after_comma = false;
    let mut boundaries = Vec::new();

    for (i, &b) in bytes.iter().enumerate() {
        if !lexer.structural(b) {
            continue;
        }
        if after_comma && depth == 1 && b != b']' && b != b'}' {
            boundaries.push(i);
            after_comma = false;
        }
        match b {
            b'{' | b'[' => depth += 1,
            b'}' | b']' => {
                if depth == 0 {
                    return Vec::new();
                }
                depth -= 1;
                if depth == 0 {
                    after_comma = false;
                }
            }
            b',' if depth == 1 => after_comma = true,
            _ => {}
        }
    }

    if depth != 0 || lexer.in_string {
        return Vec::new();
    }
    boundaries
}

fn log_boundaries(text: &str) -> Vec<usize> {
    lines_with_offsets(text)
        .filter(|(_, line)| timestamp_re().is_match(line))
        .map(|(offset, _)| offset)
        .collect()
}

/// Lines that belong to the item below them (attributes, decorators,
/// comments). Only unindented lines qualify, plus the ` * ` continuation
/// of an unindented block comment; anything deeper is the body above.
fn is_item_preamble(line: &str) -> bool {
    if line.starts_with(" *") {
        return true;
    }
    ["#", "@", "//", "/*"]
        .iter()
        .any(|prefix| line.starts_with(prefix))
}

fn code_boundaries(text: &str) -> Vec<usize> {
    let lines: Vec<(usize, &str)> = lines_with_offsets(text).collect();
    let mut boundaries = Vec::new();
    let mut seen_item = false;

    for (idx, &(offset, line)) in lines.iter().enumerate() {
        if !code_item_re().is_match(line) {
            continue;
        }
        // Header material (imports, module docs) stays with the first item.
        if !seen_item {
            seen_item = true;
            continue;
        }
        let mut start = offset;
        let mut j = idx;
        while j > 0 && is_item_preamble(lines[j - 1].1) {
            j -= 1;
            start = lines[j].0;
        }
        boundaries.push(start);
    }

    boundaries
}

fn paragraph_boundaries(text: &str) -> Vec<usize> {
    let mut boundaries = Vec::new();
    let mut seen_content = false;
    let mut after_blank_run = false;

    for (offset, line) in lines_with_offsets(text) {
        if line.trim().is_empty() {
            after_blank_run = seen_content;
            continue;
        }
        if after_blank_run {
            boundaries.push(offset);
            after_blank_run = false;
        }
        seen_content = true;
    }

    boundaries
}

/// Snap a byte index back to the nearest valid UTF-8 char boundary.
pub(crate) fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heading_boundaries_use_top_level_only() {
        let text = "intro\n# One\nbody\n## Sub\nmore\n# Two\nend\n";
        let b = find_boundaries(text, ContentType::HeadingSectioned);
        assert_eq!(b, vec![text.find("# One").unwrap(), text.find("# Two").unwrap()]);
    }

    #[test]
    fn test_heading_boundaries_fall_back_to_shallowest_level() {
        let text = "## A\nx\n### A.1\ny\n## B\nz\n";
        let b = find_boundaries(text, ContentType::HeadingSectioned);
        assert_eq!(b, vec![text.find("## B").unwrap()]);
    }

    #[test]
    fn test_headings_inside_fences_are_ignored() {
        let text = "# Real\n```sh\n# not a heading\n```\n# Also real\n";
        let b = find_boundaries(text, ContentType::HeadingSectioned);
        assert_eq!(b, vec![text.find("# Also").unwrap()]);
    }

    #[test]
    fn test_hashtag_is_not_a_heading() {
        assert_eq!(heading_level("#rust"), None);
        assert_eq!(heading_level("### x"), Some(3));
        assert_eq!(heading_level("#"), Some(1));
    }

    #[test]
    fn test_record_boundaries_in_array() {
        let text = r#"[{"a": "x,}"}, {"b": [1, 2]}, {"c": {"d": 3}}]"#;
        let b = find_boundaries(text, ContentType::StructuredRecord);
        assert_eq!(b, vec![text.find(r#"{"b""#).unwrap(), text.find(r#"{"c""#).unwrap()]);
    }

    #[test]
    fn test_record_boundaries_in_json_lines() {
        let text = "{\"id\":1}\n{\"id\":2,\"tags\":[\"}\"]}\n{\"id\":3}\n";
        let b = find_boundaries(text, ContentType::StructuredRecord);
        assert_eq!(b, vec![9, text.find("{\"id\":3").unwrap()]);
    }

    #[test]
    fn test_unbalanced_records_yield_nothing() {
        assert!(find_boundaries("[{\"a\":1}, {\"b\":2}", ContentType::StructuredRecord).is_empty());
        assert!(find_boundaries("{\"a\":1}}{", ContentType::StructuredRecord).is_empty());
    }

    #[test]
    fn test_log_boundaries_keep_continuations_attached() {
        let text = "2024-01-02T03:04:05 start\n2024-01-02 03:04:06 boom\n  at frame 1\n  at frame 2\nJan  2 03:04:07 host ok\n";
        let b = find_boundaries(text, ContentType::TimestampedLog);
        assert_eq!(
            b,
            vec![text.find("2024-01-02 03").unwrap(), text.find("Jan").unwrap()]
        );
    }

    #[test]
    fn test_code_boundaries_attach_header_and_attributes() {
        let text = "use std::fmt;\n\nfn first() {\n    let x = 1;\n}\n\n/// Docs.\n#[inline]\npub fn second() {}\n\nimpl Foo {\n    fn method(&self) {}\n}\n";
        let b = find_boundaries(text, ContentType::Code);
        assert_eq!(b, vec![text.find("/// Docs").unwrap(), text.find("impl Foo").unwrap()]);
    }

    #[test]
    fn test_python_decorators_move_with_definition() {
        let text = "import os\n\ndef a():\n    pass\n\n@cached\ndef b():\n    pass\n\nclass C:\n    def m(self):\n        pass\n";
        let b = find_boundaries(text, ContentType::Code);
        assert_eq!(b, vec![text.find("@cached").unwrap(), text.find("class C").unwrap()]);
    }

    #[test]
    fn test_paragraph_boundaries() {
        let text = "\n\nFirst para\nline two\n\n\n  \nSecond\n\nThird";
        let b = find_boundaries(text, ContentType::PlainText);
        assert_eq!(b, vec![text.find("Second").unwrap(), text.find("Third").unwrap()]);
    }

    #[test]
    fn test_dense_text_has_no_boundaries() {
        let text = "x".repeat(10_000);
        for ct in ContentType::ALL {
            assert!(find_boundaries(&text, ct).is_empty(), "{}", ct);
        }
    }

    #[test]
    fn test_infer_content_type() {
        assert_eq!(infer_content_type("[{\"a\":1}]"), ContentType::StructuredRecord);
        assert_eq!(
            infer_content_type("# Title\n\ntext\n\n## Part\n"),
            ContentType::HeadingSectioned
        );
        assert_eq!(
            infer_content_type("2024-01-01 00:00:01 a\n2024-01-01 00:00:02 b\n"),
            ContentType::TimestampedLog
        );
        assert_eq!(
            infer_content_type("fn a() {}\nfn b() {}\nstruct C;\n"),
            ContentType::Code
        );
        assert_eq!(infer_content_type("Just some prose."), ContentType::PlainText);
        assert_eq!(infer_content_type(""), ContentType::PlainText);
    }

    #[test]
    fn test_snap_to_char_boundary() {
        let s = "aé";
        assert_eq!(snap_to_char_boundary(s, 2), 1);
        assert_eq!(snap_to_char_boundary(s, 10), s.len());
    }

    #[test]
    fn test_indented_comment_stays_with_function_body() {
        let text = "import os\n\ndef a():\n    x = 1\n    # trailing note\ndef b():\n    pass\n";
        let b = find_boundaries(text, ContentType::Code);
        assert_eq!(b, vec![text.find("def b").unwrap()]);
    }

    #[test]
    fn test_block_comment_continuation_moves_with_item() {
        let text = "fn a() {}\n\n/**\n * Second.\n */\nfn b() {}\n";
        let b = find_boundaries(text, ContentType::Code);
        assert_eq!(b, vec![text.find("/**").unwrap()]);
    }

    #[test]
    fn test_single_title_descends_to_sections() {
        let mut text = String::from("# Handbook\n\n");
        for i in 0..6 {
            text.push_str(&format!("## Part {}\nlorem ipsum lorem ipsum\n\n", i));
        }
        let b = find_boundaries(&text, ContentType::HeadingSectioned);
        assert_eq!(b.len(), 6);
        assert_eq!(b[0], text.find("## Part 0").unwrap());
        assert!(b.iter().all(|&o| text[o..].starts_with("## Part")));
    }

    #[test]
    fn test_bracketed_date_log_lines() {
        let text = "[2024-01-15] INFO start\n[2024-01-15] ERROR boom\n  at worker\n[2024-01-16] INFO recovered\n";
        let b = find_boundaries(text, ContentType::TimestampedLog);
        assert_eq!(
            b,
            vec![
                text.find("[2024-01-15] ERROR").unwrap(),
                text.find("[2024-01-16]").unwrap()
            ]
        );
        assert_eq!(infer_content_type(text), ContentType::TimestampedLog);
        assert_eq!(
            infer_content_type("[2024-01-15] INFO start\n[2024-01-15] done [ok]"),
            ContentType::TimestampedLog
        );
    }

    #[test]
    fn test_single_object_splits_between_members() {
        let text = r#"{"users": {"a": {"n": 1}}, "orders": [1, 2], "items": {"x": "},"}}"#;
        let b = find_boundaries(text, ContentType::StructuredRecord);
        assert_eq!(
            b,
            vec![text.find(r#""orders""#).unwrap(), text.find(r#""items""#).unwrap()]
        );
    }
}
