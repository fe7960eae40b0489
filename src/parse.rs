//! Parsing of the dual-segment model response.
//!
//! The model emits a free-text reasoning trace wrapped in think markers,
//! followed by the structured answer as JSON text. Anything that deviates
//! from that contract is a per-item parse failure for the caller to record;
//! nothing here panics on model output.

use anyhow::Context;

use crate::model::{Annotation, AnnotationMessage, SinkRecord};
use crate::prompt::SERVICES_KEY;

const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";

/// Split a raw model response into reasoning and decoded answer.
///
/// The close marker must occur exactly once: zero occurrences means the
/// response never finished its reasoning segment, more than one means the
/// segment boundary is ambiguous.
pub fn parse_response(filename: &str, raw: &str) -> anyhow::Result<Annotation> {
    let parts: Vec<&str> = raw.split(THINK_CLOSE).collect();
    if parts.len() != 2 {
        anyhow::bail!(
            "Expected exactly one {} marker, found {}",
            THINK_CLOSE,
            parts.len().saturating_sub(1)
        );
    }

    let reasoning = parts[0].trim();
    let reasoning = reasoning.strip_prefix(THINK_OPEN).unwrap_or(reasoning).trim();

    let message = decode_answer(parts[1].trim())?;

    Ok(Annotation {
        filename: filename.to_string(),
        message,
        reasoning: reasoning.to_string(),
    })
}

/// Decode the answer segment into the sink-service list.
///
/// The segment is parsed as-is first. If that fails (the model wrapped the
/// object in prose or fences), the first balanced `{...}` region is salvaged
/// and parsed instead. A decodable object without the expected key is still
/// a failure.
fn decode_answer(answer: &str) -> anyhow::Result<AnnotationMessage> {
    let value = match serde_json::from_str::<serde_json::Value>(answer) {
        Ok(value) => value,
        Err(err) => {
            let salvaged = extract_json_fragment(answer, '{', '}')
                .ok_or_else(|| anyhow::anyhow!("Answer segment is not valid JSON: {}", err))?;
            serde_json::from_str(salvaged).context("Salvaged JSON region does not parse")?
        }
    };

    let services = value
        .get(SERVICES_KEY)
        .with_context(|| format!("Answer object lacks the {} key", SERVICES_KEY))?;

    let records: Vec<SinkRecord> = serde_json::from_value(services.clone())
        .with_context(|| format!("{} is not a list of sink records", SERVICES_KEY))?;

    Ok(AnnotationMessage {
        detected_data_sink_services: records,
    })
}

/// Extract a balanced JSON fragment between matching delimiters.
/// Handles nested structures and ignores delimiters inside strings.
fn extract_json_fragment(text: &str, open: char, close: char) -> Option<&str> {
    let mut depth = 0;
    let mut in_string = false;
    let mut escape_next = false;
    let mut start_idx = None;

    for (i, c) in text.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        if c == '\\' && in_string {
            escape_next = true;
            continue;
        }

        if c == '"' {
            in_string = !in_string;
            continue;
        }

        if in_string {
            continue;
        }

        if c == open {
            if depth == 0 {
                start_idx = Some(i);
            }
            depth += 1;
        } else if c == close {
            if depth == 0 {
                return None;
            }
            depth -= 1;
            if depth == 0 {
                if let Some(start) = start_idx {
                    return Some(&text[start..=i]);
                }
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trip() {
        let raw = "<think>R</think>{\"detected_data_sink_services\":[{\"service\":\"S\",\"evidence\":\"E\",\"reasoning\":\"X\"}]}";
        let annotation = parse_response("a.ts", raw).unwrap();
        assert_eq!(annotation.reasoning, "R");
        assert_eq!(annotation.message.detected_data_sink_services.len(), 1);
        let record = &annotation.message.detected_data_sink_services[0];
        assert_eq!(record.service, "S");
        assert_eq!(record.evidence, "E");
        assert_eq!(record.reasoning, "X");
    }

    #[test]
    fn test_missing_close_marker_fails() {
        let raw = "no marker here {\"detected_data_sink_services\":[]}";
        assert!(parse_response("a.ts", raw).is_err());
    }

    #[test]
    fn test_repeated_close_marker_fails() {
        let raw = "<think>R</think>{}</think>";
        assert!(parse_response("a.ts", raw).is_err());
    }

    #[test]
    fn test_missing_open_marker_tolerated() {
        let raw = "just reasoning</think>{\"detected_data_sink_services\":[]}";
        let annotation = parse_response("a.ts", raw).unwrap();
        assert_eq!(annotation.reasoning, "just reasoning");
        assert!(annotation.message.detected_data_sink_services.is_empty());
    }

    #[test]
    fn test_trailing_text_after_json_salvaged() {
        let raw = "<think>R</think>{\"detected_data_sink_services\":[]}\nHope that helps!";
        let annotation = parse_response("a.ts", raw).unwrap();
        assert!(annotation.message.detected_data_sink_services.is_empty());
    }

    #[test]
    fn test_fenced_json_salvaged() {
        let raw = "<think>R</think>```json\n{\"detected_data_sink_services\":[{\"service\":\"log\"}]}\n```";
        let annotation = parse_response("a.ts", raw).unwrap();
        assert_eq!(
            annotation.message.detected_data_sink_services[0].service,
            "log"
        );
    }

    #[test]
    fn test_missing_key_fails() {
        let raw = "<think>R</think>{\"services\":[]}";
        assert!(parse_response("a.ts", raw).is_err());
    }

    #[test]
    fn test_invalid_answer_json_fails() {
        let raw = "<think>R</think>not json at all";
        assert!(parse_response("a.ts", raw).is_err());
    }

    #[test]
    fn test_missing_record_fields_default_to_unknown() {
        let raw = "<think>R</think>{\"detected_data_sink_services\":[{\"service\":\"db\"}]}";
        let annotation = parse_response("a.ts", raw).unwrap();
        let record = &annotation.message.detected_data_sink_services[0];
        assert_eq!(record.service, "db");
        assert_eq!(record.evidence, "Unknown");
        assert_eq!(record.reasoning, "Unknown");
    }

    #[test]
    fn test_braces_inside_strings_do_not_confuse_salvage() {
        let raw = "<think>R</think>Answer: {\"detected_data_sink_services\":[{\"service\":\"s\",\"evidence\":\"write('}')\",\"reasoning\":\"r\"}]} done";
        let annotation = parse_response("a.ts", raw).unwrap();
        assert_eq!(
            annotation.message.detected_data_sink_services[0].evidence,
            "write('}')"
        );
    }
}
