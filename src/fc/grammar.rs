//! The textual marker grammar the backend is asked to emit.
//!
//! Both the instruction text sent upstream and the patterns the parser scans
//! with are derived from [`MARKER_GRAMMAR`], so the two cannot drift apart.
//! The grammar is also used to render tool history back into prose when a
//! conversation is flattened for the backend.

use std::sync::LazyLock;

use regex_lite::Regex;

/// Delimiters of the tool-call marker language.
#[derive(Debug, Clone, Copy)]
pub struct MarkerGrammar {
    /// Opening of a call marker; the tool name follows after one space.
    pub call_open: &'static str,
    /// Closing bracket of the call marker, right after the tool name.
    pub call_open_end: &'static str,
    /// End delimiter placed after the JSON payload.
    pub call_close: &'static str,
    pub result_open: &'static str,
    pub result_close: &'static str,
    pub thinking_open: &'static str,
    pub thinking_close: &'static str,
}

pub static MARKER_GRAMMAR: MarkerGrammar = MarkerGrammar {
    call_open: "[Tool Call:",
    call_open_end: "]",
    call_close: "[/Tool Call]",
    result_open: "[Tool Result]",
    result_close: "[/Tool Result]",
    thinking_open: "[Thinking]",
    thinking_close: "[/Thinking]",
};

impl MarkerGrammar {
    /// `[Tool Call: Name]`
    #[must_use]
    pub fn begin_marker(&self, name: &str) -> String {
        let mut out =
            String::with_capacity(self.call_open.len() + name.len() + self.call_open_end.len() + 1);
        out.push_str(self.call_open);
        out.push(' ');
        out.push_str(name);
        out.push_str(self.call_open_end);
        out
    }

    /// A complete call: begin marker, payload on its own line, end marker.
    #[must_use]
    pub fn render_call(&self, name: &str, payload_json: &str) -> String {
        format!(
            "{}\n{}\n{}",
            self.begin_marker(name),
            payload_json,
            self.call_close
        )
    }

    #[must_use]
    pub fn render_result(&self, content: &str) -> String {
        format!("{}\n{}\n{}", self.result_open, content, self.result_close)
    }

    #[must_use]
    pub fn render_thinking(&self, content: &str) -> String {
        format!("{}\n{}\n{}", self.thinking_open, content, self.thinking_close)
    }

    /// Pattern for a begin marker; group 1 captures the tool name, which may
    /// contain hyphens. The delimiters match case-insensitively.
    #[must_use]
    pub fn begin_pattern(&self) -> String {
        format!(
            r"(?i){}\s*([A-Za-z0-9_-]+)\s*{}",
            regex_lite::escape(self.call_open),
            regex_lite::escape(self.call_open_end)
        )
    }

    /// Pattern for an end marker, allowing surrounding whitespace.
    #[must_use]
    pub fn end_pattern(&self) -> String {
        format!(r"(?i)^\s*{}", regex_lite::escape(self.call_close))
    }

    /// Pattern spanning a whole echoed tool-result block.
    #[must_use]
    pub fn result_span_pattern(&self) -> String {
        format!(
            r"(?is){}.*?{}",
            regex_lite::escape(self.result_open),
            regex_lite::escape(self.result_close)
        )
    }
}

pub(crate) static BEGIN_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| compile(&MARKER_GRAMMAR.begin_pattern()));
pub(crate) static END_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| compile(&MARKER_GRAMMAR.end_pattern()));
pub(crate) static RESULT_SPAN_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| compile(&MARKER_GRAMMAR.result_span_pattern()));

/// Compile a built-in pattern. A failure is logged and the rule is skipped
/// rather than taking the request down.
pub(crate) fn compile(pattern: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(err) => {
            tracing::error!("built-in pattern {pattern:?} failed to compile: {err}");
            None
        }
    }
}
