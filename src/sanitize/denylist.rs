use std::sync::LazyLock;

use regex_lite::Regex;

use crate::fc::grammar::compile;

/// Identity assertions, matched case-insensitively inside one sentence.
/// Product names alone are not enough; a sentence must claim the identity.
const IDENTITY_CORES: &[&str] = &[
    r"\b(?:you\s+are|i\s+am|i'm|this\s+is)\s+(?:anthropic'?s?\s+)?claude\b",
    r"\bas\s+claude\s+code\b",
    r"\b(?:powered\s+by|running\s+on|built\s+(?:on|with)|based\s+on)\s+(?:the\s+)?(?:anthropic'?s?\s+)?claude\b",
    r"\banthropic'?s?\s+official\b",
    r"\b(?:made|created|built|developed|trained)\s+by\s+anthropic\b",
    r"\b(?:i\s+am|i'm)\s+grok\b",
    r"\b(?:made|created|built|developed|trained)\s+by\s+xai\b",
];

static BLANK_RUN_RE: LazyLock<Option<Regex>> = LazyLock::new(|| compile(r"\n{3,}"));

/// Pattern for the whole sentence around `core`.
fn sentence_pattern(core: &str) -> String {
    format!(r"(?i)[^.!?\n]*{core}[^.!?\n]*[.!?]?[ \t]*")
}

/// Sentence-level identity filter shared by the request and response sides.
#[derive(Debug, Clone)]
pub struct Denylist {
    rules: Vec<Regex>,
}

impl Denylist {
    /// Built-in rules plus `extra` cores from configuration.
    ///
    /// # Errors
    ///
    /// Returns the first extra pattern that fails to compile.
    pub fn with_extra(extra: &[String]) -> Result<Self, (String, regex_lite::Error)> {
        let mut rules: Vec<Regex> = IDENTITY_CORES
            .iter()
            .filter_map(|core| compile(&sentence_pattern(core)))
            .collect();
        for core in extra {
            let re = Regex::new(&sentence_pattern(core)).map_err(|e| (core.clone(), e))?;
            rules.push(re);
        }
        Ok(Self { rules })
    }

    #[must_use]
    pub fn is_match(&self, text: &str) -> bool {
        self.rules.iter().any(|re| re.is_match(text))
    }

    /// Remove every matching sentence. Text with no match comes back
    /// byte-for-byte.
    #[must_use]
    pub fn strip(&self, text: &str) -> String {
        if !self.is_match(text) {
            return text.to_string();
        }
        let mut out = text.to_string();
        for re in &self.rules {
            if re.is_match(&out) {
                out = re.replace_all(&out, "").into_owned();
            }
        }
        let tidy: Vec<&str> = out.lines().map(str::trim_end).collect();
        let joined = tidy.join("\n");
        let collapsed = match BLANK_RUN_RE.as_ref() {
            Some(re) => re.replace_all(&joined, "\n\n").into_owned(),
            None => joined,
        };
        collapsed.trim().to_string()
    }
}

impl Default for Denylist {
    fn default() -> Self {
        Self {
            rules: IDENTITY_CORES
                .iter()
                .filter_map(|core| compile(&sentence_pattern(core)))
                .collect(),
        }
    }
}
