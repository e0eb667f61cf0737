//! Tool-call simulation.
//!
//! The backend has no native tool calling. It is told to write calls in the
//! marker language from [`grammar`], and [`ToolCallSimulator::parse`] turns
//! whatever it actually produced back into structured invocations. Marker
//! calls are preferred; when none are present the fallback rules look at
//! fenced code blocks and plain-language intent instead.

pub mod grammar;
pub mod prompt;

mod fallback;
mod filter;
mod parser;
mod shell;
mod validator;


use std::ops::Range;

use rustc_hash::FxHashSet;
use serde_json::{Map, Value};

use crate::protocol::canonical::{ConversionContext, ToolDefinition};
use crate::util::next_tool_use_id;

pub use grammar::MARKER_GRAMMAR;
pub use prompt::render_tool_instructions;

/// Tools the simulator knows how to screen. Anything else is passed through
/// after deduplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    Write,
    Edit,
    Bash,
    Read,
    Other,
}

impl ToolKind {
    #[must_use]
    pub fn of(name: &str) -> Self {
        match name {
            "Write" => Self::Write,
            "Edit" => Self::Edit,
            "Bash" => Self::Bash,
            "Read" => Self::Read,
            _ => Self::Other,
        }
    }

    #[inline]
    #[must_use]
    pub fn mutates_file(self) -> bool {
        matches!(self, Self::Write | Self::Edit)
    }
}

/// One structured tool request recovered from backend text.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    /// `toolu_` followed by 24 hex digits.
    pub id: String,
    pub name: String,
    pub input: Map<String, Value>,
    /// Byte range of the text this invocation was recovered from. Synthesized
    /// invocations have none.
    pub span: Option<Range<usize>>,
}

impl ToolInvocation {
    #[must_use]
    pub fn new(name: impl Into<String>, input: Map<String, Value>, span: Option<Range<usize>>) -> Self {
        Self {
            id: next_tool_use_id(),
            name: name.into(),
            input,
            span,
        }
    }

    #[inline]
    #[must_use]
    pub fn kind(&self) -> ToolKind {
        ToolKind::of(&self.name)
    }

    /// String argument by key; missing or non-string yields `""`.
    #[must_use]
    pub fn str_arg(&self, key: &str) -> &str {
        self.input.get(key).and_then(Value::as_str).unwrap_or_default()
    }

    #[must_use]
    pub fn file_path(&self) -> &str {
        self.str_arg("file_path")
    }

    /// Input serialized as a JSON object string.
    #[must_use]
    pub fn input_json(&self) -> String {
        serde_json::to_string(&self.input).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Result of one simulation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Simulation {
    /// Narrative text with consumed marker spans removed.
    pub text: String,
    pub invocations: Vec<ToolInvocation>,
}

/// Parses backend text against the declared tool set of one request.
#[derive(Debug, Clone, Copy)]
pub struct ToolCallSimulator<'a> {
    tools: &'a [ToolDefinition],
}

impl<'a> ToolCallSimulator<'a> {
    #[must_use]
    pub fn new(tools: &'a [ToolDefinition]) -> Self {
        Self { tools }
    }

    #[inline]
    #[must_use]
    pub fn declares(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.name == name)
    }

    /// Declared spelling of `name`. An exact match wins; otherwise names
    /// compare ASCII case-insensitively.
    #[must_use]
    pub fn declared_name(&self, name: &str) -> Option<&'a str> {
        let tools = self.tools;
        tools
            .iter()
            .find(|t| t.name == name)
            .or_else(|| tools.iter().find(|t| t.name.eq_ignore_ascii_case(name)))
            .map(|t| t.name.as_str())
    }

    #[inline]
    pub(crate) fn declares_only(&self, name: &str) -> bool {
        matches!(self.tools, [only] if only.name == name)
    }

    /// Recover tool invocations from `text`.
    ///
    /// `user_context` is the most recent user message; the fallback rules use
    /// it to detect read intent. With no declared tools the text is returned
    /// untouched.
    #[must_use]
    pub fn parse(&self, text: &str, user_context: &str) -> Simulation {
        let mut ctx = ConversionContext::new(!self.tools.is_empty());
        self.parse_with_context(&mut ctx, text, user_context)
    }

    /// Like [`Self::parse`], recording dedup keys in a caller-owned context.
    pub fn parse_with_context(
        &self,
        ctx: &mut ConversionContext,
        text: &str,
        user_context: &str,
    ) -> Simulation {
        if self.tools.is_empty() {
            return Simulation {
                text: text.to_string(),
                invocations: Vec::new(),
            };
        }

        let cleaned = parser::strip_tool_results(text);
        let calls = parser::extract_marker_calls(&cleaned, |name| self.declared_name(name));

        let (narrative, screened) = if calls.is_empty() {
            let recovered = fallback::recover(self, &cleaned, user_context, ctx);
            (cleaned, recovered)
        } else {
            let spans: Vec<Range<usize>> = calls.iter().map(|c| c.span.clone()).collect();
            let screened = calls
                .into_iter()
                .filter_map(|mut call| {
                    if call.name == "Skill" {
                        mirror_skill_command(&mut call.input);
                    }
                    let invocation = ToolInvocation::new(call.name, call.input, Some(call.span));
                    filter::screen(invocation, ctx)
                })
                .collect();
            (parser::remove_spans(&cleaned, &spans), screened)
        };

        let mut invocations = filter::order(screened, self.declares("Read"), ctx);
        ensure_unique_ids(&mut invocations);
        if !invocations.is_empty() {
            tracing::debug!(
                count = invocations.len(),
                tools = ?invocations.iter().map(|i| i.name.as_str()).collect::<Vec<_>>(),
                "simulated tool invocations"
            );
        }

        Simulation {
            text: narrative,
            invocations,
        }
    }
}

/// `Skill` calls name the skill in `command`; some clients read `skill`
/// instead, so both are filled.
fn mirror_skill_command(input: &mut Map<String, Value>) {
    if input.contains_key("skill") {
        return;
    }
    if let Some(command) = input.get("command").cloned() {
        input.insert("skill".to_string(), command);
    }
}

fn ensure_unique_ids(invocations: &mut [ToolInvocation]) {
    let mut seen = FxHashSet::default();
    for invocation in invocations.iter_mut() {
        while !seen.insert(invocation.id.clone()) {
            invocation.id = next_tool_use_id();
        }
    }
}
