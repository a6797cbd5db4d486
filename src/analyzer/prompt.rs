//! Analysis instructions and response parsing shared by the LLM providers.

use anyhow::{anyhow, Context, Result};

use context_sweep_core::models::{AnalysisOutput, ContentType};

const RESPONSE_CONTRACT: &str = r#"You are analyzing ONE chunk of a larger document against a query.
Use only the chunk text. Other chunks are analyzed separately and merged later.

Respond with a single JSON object and nothing else:
{
  "findings": [
    {"point": "<one claim relevant to the query>",
     "evidence": "<short verbatim quote from the chunk>",
     "confidence": "high" | "medium" | "low",
     "location": "<where in the chunk>"}
  ],
  "missing": ["<aspect of the query this chunk does not cover>"],
  "suggested_next_queries": ["<follow-up query>"],
  "answer_if_complete": "<full answer>" | null,
  "answer_confidence": "high" | "medium" | "low"
}

Set answer_if_complete only when this chunk alone fully answers the query.
Return empty lists rather than inventing findings."#;

/// Content-specific hints appended to the response contract.
fn content_hint(content_type: ContentType) -> &'static str {
    match content_type {
        ContentType::StructuredRecord => {
            "The chunk holds whole JSON records. Use record keys or ids as location."
        }
        ContentType::HeadingSectioned => {
            "The chunk holds whole document sections. Use the nearest heading as location."
        }
        ContentType::TimestampedLog => {
            "The chunk holds log entries in time order. Use timestamps as location and keep \
             the order of events in mind."
        }
        ContentType::Code => {
            "The chunk holds whole top-level items of source code. Use function or type names \
             as location."
        }
        ContentType::PlainText => {
            "The chunk holds whole paragraphs of prose. Use a short nearby phrase as location."
        }
    }
}

/// Full analysis instructions for a chunk of `content_type`.
pub fn instructions_for(content_type: ContentType) -> String {
    format!("{}\n\n{}", RESPONSE_CONTRACT, content_hint(content_type))
}

/// Locate the first balanced `{...}` object in a model reply.
///
/// Models wrap JSON in prose or code fences often enough that the reply
/// cannot be parsed as-is. Braces inside string literals are ignored.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse a model reply into an [`AnalysisOutput`].
///
/// Malformed output is an error, which the scheduler treats like a
/// timeout (one retry, then failed-empty).
pub fn parse_analysis_response(reply: &str) -> Result<AnalysisOutput> {
    let json = extract_json_object(reply)
        .ok_or_else(|| anyhow!("Analyzer reply contains no JSON object"))?;
    serde_json::from_str(json).with_context(|| "Analyzer reply is not a valid analysis object")
}

#[cfg(test)]
mod tests {
    use super::*;
    use context_sweep_core::models::Confidence;

    #[test]
    fn test_instructions_mention_content() {
        let text = instructions_for(ContentType::TimestampedLog);
        assert!(text.contains("answer_if_complete"));
        assert!(text.contains("timestamps"));
        assert_ne!(text, instructions_for(ContentType::Code));
    }

    #[test]
    fn test_extract_from_fenced_reply() {
        let reply = "Sure! Here you go:\n```json\n{\"findings\": [], \"note\": \"a } brace\"}\n```";
        assert_eq!(
            extract_json_object(reply),
            Some("{\"findings\": [], \"note\": \"a } brace\"}")
        );
    }

    #[test]
    fn test_extract_nested_and_unbalanced() {
        assert_eq!(extract_json_object("{\"a\": {\"b\": 1}} tail"), Some("{\"a\": {\"b\": 1}}"));
        assert_eq!(extract_json_object("{\"a\": 1"), None);
        assert_eq!(extract_json_object("no json here"), None);
    }

    #[test]
    fn test_parse_full_response() {
        let reply = r###"{
            "findings": [{"point": "Uses TLS 1.3", "evidence": "tls13 = true", "confidence": "High", "location": "## Security"}],
            "missing": ["certificate rotation"],
            "suggested_next_queries": [],
            "answer_if_complete": null
        }"###;
        let output = parse_analysis_response(reply).unwrap();
        assert_eq!(output.findings.len(), 1);
        assert_eq!(output.findings[0].confidence, Confidence::High);
        assert_eq!(output.missing, vec!["certificate rotation"]);
        assert!(output.answer_if_complete.is_none());
    }

    #[test]
    fn test_parse_defaults_missing_lists() {
        let output = parse_analysis_response("{}").unwrap();
        assert!(output.findings.is_empty());
        assert!(output.missing.is_empty());
    }

    #[test]
    fn test_parse_rejects_bad_confidence() {
        let reply = r#"{"findings": [{"point": "x", "confidence": "certain"}]}"#;
        assert!(parse_analysis_response(reply).is_err());
        assert!(parse_analysis_response("I could not find anything.").is_err());
    }
}
