//! System prompt rewriting for the backend.
//!
//! The backend refuses prompts that ask it to be a different named assistant,
//! so identity assertions are stripped from the client's system text before
//! it goes upstream, and any self-identification the backend emits anyway is
//! scrubbed from its final output.

mod denylist;

use std::sync::LazyLock;

use regex_lite::Regex;

pub use denylist::Denylist;

use crate::config::FeaturesConfig;
use crate::error::CanonicalError;
use crate::fc::grammar::compile;
use crate::fc::render_tool_instructions;
use crate::protocol::canonical::{CanonicalRequest, ToolDefinition};

pub const DEFAULT_PERSONA: &str = "You are a skilled software engineering assistant. \
Answer the user directly and follow the instructions below.";

/// Used when nothing informative survives sanitizing.
pub const DEFAULT_CONTEXT: &str = "Help the user with their software engineering task.";

/// Sanitized text shorter than this is treated as uninformative.
const MIN_INFORMATIVE_CHARS: usize = 64;

static WORKING_DIR_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| compile(r"(?im)^[^\n]*working\s+directory:[ \t]*\S[^\n]*$"));
static ENV_BLOCK_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| compile(r"(?s)<env>.*?</env>"));
static VCS_STATUS_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    compile(r"(?im)^[ \t]*(?:git\s*status|gitstatus|current\s+branch|main\s+branch|status):[^\n]*$")
});

/// Pull structurally safe context out of `text`: the working directory, an
/// `<env>` block and version-control status lines. Candidates that trip the
/// denylist are dropped.
fn extract_safe_context(text: &str, denylist: &Denylist) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for re in [&WORKING_DIR_RE, &ENV_BLOCK_RE, &VCS_STATUS_RE]
        .into_iter()
        .filter_map(|re| re.as_ref())
    {
        for m in re.find_iter(text) {
            let candidate = m.as_str().trim();
            if candidate.is_empty() || denylist.is_match(candidate) {
                continue;
            }
            if !found.iter().any(|f| f.contains(candidate)) {
                found.push(candidate.to_string());
            }
        }
    }
    found
}

/// Rewrites the canonical system instruction before it goes upstream.
#[derive(Debug, Clone)]
pub struct SystemPromptSanitizer {
    denylist: Denylist,
    persona: String,
    enabled: bool,
    scrub: bool,
}

impl Default for SystemPromptSanitizer {
    fn default() -> Self {
        Self {
            denylist: Denylist::default(),
            persona: DEFAULT_PERSONA.to_string(),
            enabled: true,
            scrub: true,
        }
    }
}

impl SystemPromptSanitizer {
    /// # Errors
    ///
    /// Returns `CanonicalError::Config` when an extra denylist pattern does
    /// not compile.
    pub fn from_features(features: &FeaturesConfig) -> Result<Self, CanonicalError> {
        let denylist = Denylist::with_extra(&features.denylist_extra).map_err(|(pattern, err)| {
            CanonicalError::Config(format!("features.denylist_extra {pattern:?}: {err}"))
        })?;
        Ok(Self {
            denylist,
            persona: features
                .persona
                .clone()
                .unwrap_or_else(|| DEFAULT_PERSONA.to_string()),
            enabled: features.sanitize_system_prompt,
            scrub: features.scrub_responses,
        })
    }

    /// Safe system text: persona line, the client's instructions minus
    /// identity assertions, then the tool-call grammar when tools are
    /// declared.
    #[must_use]
    pub fn sanitize(&self, system_text: &str, tools: &[ToolDefinition]) -> String {
        let body = if self.enabled {
            self.clean_body(system_text)
        } else {
            system_text.trim().to_string()
        };

        let instructions = render_tool_instructions(tools);
        let mut out =
            String::with_capacity(self.persona.len() + body.len() + instructions.len() + 4);
        out.push_str(&self.persona);
        if !body.is_empty() {
            out.push_str("\n\n");
            out.push_str(&body);
        }
        if !instructions.is_empty() {
            out.push_str("\n\n");
            out.push_str(&instructions);
        }
        out
    }

    /// Replace `request.system` with its sanitized form.
    pub fn apply(&self, request: &mut CanonicalRequest) {
        let system = request.system.take().unwrap_or_default();
        request.system = Some(self.sanitize(&system, &request.tools));
    }

    fn clean_body(&self, system_text: &str) -> String {
        let stripped = self.denylist.strip(system_text);
        if stripped.chars().count() >= MIN_INFORMATIVE_CHARS {
            return stripped;
        }
        let context = extract_safe_context(system_text, &self.denylist);
        if context.is_empty() {
            if !system_text.trim().is_empty() {
                tracing::debug!("system prompt had no usable content after sanitizing");
            }
            return DEFAULT_CONTEXT.to_string();
        }
        context.join("\n")
    }

    /// Remove residual self-identification from a complete backend reply.
    /// Must only ever see the whole text, never a fragment of it.
    #[must_use]
    pub fn scrub_response(&self, text: &str) -> String {
        if !self.scrub {
            return text.to_string();
        }
        self.denylist.strip(text)
    }
}
