use std::ops::Range;
use std::sync::LazyLock;

use regex_lite::Regex;
use serde_json::{Map, Value};

use super::grammar::{compile, BEGIN_RE, END_RE, RESULT_SPAN_RE};
use crate::json_scan::{balanced_object_end, find_object_start, skip_ws};

static BLANK_RUN_RE: LazyLock<Option<Regex>> = LazyLock::new(|| compile(r"\n{3,}"));

const FENCE: &str = "```";

/// A marker call whose payload parsed and whose tool is declared.
#[derive(Debug)]
pub(super) struct MarkerCall {
    /// Declared spelling of the tool name.
    pub name: String,
    pub input: Map<String, Value>,
    /// Begin marker through end marker (or payload end when the end marker
    /// was omitted).
    pub span: Range<usize>,
}

/// Drop echoed `[Tool Result]` blocks. Backends sometimes replay earlier
/// results from the prompt; parsing calls inside them would loop the client.
pub(super) fn strip_tool_results(text: &str) -> String {
    match RESULT_SPAN_RE.as_ref() {
        Some(re) if re.is_match(text) => re.replace_all(text, "").trim().to_string(),
        _ => text.to_string(),
    }
}

/// Scan `text` for marker calls.
///
/// `resolve` maps a marker name to the declared tool name, or `None` when no
/// such tool exists. Markers whose payload is not a JSON object, or whose
/// tool is not declared, are skipped and left in the text.
pub(super) fn extract_marker_calls<'d>(
    text: &str,
    resolve: impl Fn(&str) -> Option<&'d str>,
) -> Vec<MarkerCall> {
    let (Some(begin_re), Some(end_re)) = (BEGIN_RE.as_ref(), END_RE.as_ref()) else {
        return Vec::new();
    };

    let bytes = text.as_bytes();
    let mut calls = Vec::new();
    let mut cursor = 0usize;

    while let Some(caps) = begin_re.captures_at(text, cursor) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            break;
        };
        let marker_end = whole.end();
        cursor = marker_end;
        let limit = begin_re
            .find_at(text, marker_end)
            .map_or(text.len(), |next| next.start());

        let mut i = skip_ws(bytes, marker_end);
        let fenced = text[i..].starts_with(FENCE);
        if fenced {
            i += FENCE.len();
            while bytes.get(i).is_some_and(u8::is_ascii_alphanumeric) {
                i += 1;
            }
        }

        let Some(obj_start) = find_object_start(bytes, i).filter(|&s| s < limit) else {
            tracing::debug!(tool = name.as_str(), "tool marker without payload");
            continue;
        };
        let Some(obj_end) = balanced_object_end(bytes, obj_start) else {
            tracing::debug!(tool = name.as_str(), "tool marker payload is unterminated");
            continue;
        };

        let input = match serde_json::from_str::<Map<String, Value>>(&text[obj_start..obj_end]) {
            Ok(input) => input,
            Err(err) => {
                tracing::debug!(tool = name.as_str(), "tool marker payload is not an object: {err}");
                continue;
            }
        };
        let Some(declared) = resolve(name.as_str()) else {
            tracing::debug!(tool = name.as_str(), "ignoring call to undeclared tool");
            continue;
        };

        let mut end = obj_end;
        if fenced {
            let j = skip_ws(bytes, end);
            if text[j..].starts_with(FENCE) {
                end = j + FENCE.len();
            }
        }
        if let Some(close) = end_re.find(&text[end..]) {
            end += close.end();
        }

        calls.push(MarkerCall {
            name: declared.to_string(),
            input,
            span: whole.start()..end,
        });
        cursor = end;
    }

    calls
}

/// Remove `spans` (sorted, non-overlapping) and tidy the blank lines left
/// behind.
pub(super) fn remove_spans(text: &str, spans: &[Range<usize>]) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0usize;
    for span in spans {
        if span.start < last {
            continue;
        }
        out.push_str(&text[last..span.start]);
        last = span.end;
    }
    out.push_str(&text[last..]);

    let collapsed = match BLANK_RUN_RE.as_ref() {
        Some(re) => re.replace_all(&out, "\n\n").into_owned(),
        None => out,
    };
    collapsed.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn declared(name: &str) -> Option<&'static str> {
        ["Read", "Bash", "web-fetch"]
            .into_iter()
            .find(|d| d.eq_ignore_ascii_case(name))
    }

    #[test]
    fn fenced_payload_and_end_marker_are_consumed() {
        let text = "Intro\n[Tool Call: Read]\n```json\n{\"file_path\":\"a.py\"}\n```\n[/Tool Call]\nOutro";
        let calls = extract_marker_calls(text, declared);
        assert_eq!(calls.len(), 1);
        assert_eq!(&text[calls[0].span.clone()], &text[6..text.len() - 6]);
        assert_eq!(remove_spans(text, &[calls[0].span.clone()]), "Intro\n\nOutro");
    }

    #[test]
    fn missing_end_marker_still_parses() {
        let text = "[Tool Call: Bash]\n{\"command\":\"ls\"}";
        let calls = extract_marker_calls(text, declared);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].span, 0..text.len());
    }

    #[test]
    fn payload_cannot_come_from_next_marker() {
        let text = "[Tool Call: Bash]\nno json here\n[Tool Call: Read]\n{\"file_path\":\"x.rs\"}\n[/Tool Call]";
        let calls = extract_marker_calls(text, declared);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "Read");
    }

    #[test]
    fn hyphenated_and_lowercase_names_resolve() {
        let text = "[Tool Call: web-fetch]\n{\"url\":\"https://x.test\"}\n[/Tool Call]\n[tool call: read]\n{\"file_path\":\"a.py\"}";
        let calls = extract_marker_calls(text, declared);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "web-fetch");
        assert_eq!(calls[1].name, "Read");
    }

    #[test]
    fn undeclared_marker_stays_in_text() {
        let text = "[Tool Call: Glob]\n{\"pattern\":\"*.rs\"}";
        assert!(extract_marker_calls(text, declared).is_empty());
    }

    #[test]
    fn blank_runs_collapse() {
        let text = "a\n\n\nX\n\n\n\nb";
        let x = text.find('X').unwrap();
        assert_eq!(remove_spans(text, &[x..x + 1]), "a\n\nb");
    }

    #[test]
    fn results_are_stripped() {
        let text = "[Tool Result]\n[Tool Call: Bash]\n{}\n[/Tool Result]\nreal";
        assert_eq!(strip_tool_results(text), "real");
    }
}
