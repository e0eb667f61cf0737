//! Recovery when the backend ignored the marker grammar.
//!
//! Fenced code blocks become `Write`/`Edit`/`Bash` invocations, explicit
//! read and search requests become `Read` and `Grep`, and a stated intent to
//! stop a running process becomes `KillShell`. File paths are inferred from
//! the text around a block using [`PATH_RULES`], tried tier by tier.

use std::ops::Range;
use std::sync::LazyLock;

use regex_lite::Regex;
use serde_json::{Map, Value};

use super::grammar::compile;
use super::shell::{command_from_shell_block, SHELL_LANGUAGES};
use super::validator::is_valid_file_path;
use super::{filter, ToolCallSimulator, ToolInvocation};
use crate::protocol::canonical::ConversionContext;

/// Characters of prose before a block searched for its file name.
const LOOKBEHIND_CHARS: usize = 200;

/// Blocks shorter than this are usually sample output.
const MIN_BLOCK_CONTENT: usize = 10;

static CODE_BLOCK_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| compile(r"(?s)```(\w+)?[ \t]*\n(.*?)```"));

static DIFF_PATH_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| compile(r"^---\s+(?:a/)?(\S+)"));

#[derive(Debug)]
pub(super) struct CodeBlock<'t> {
    pub language: String,
    /// Trimmed block body.
    pub content: &'t str,
    /// The whole fenced block, fences included.
    pub span: Range<usize>,
}

pub(super) fn extract_code_blocks(text: &str) -> Vec<CodeBlock<'_>> {
    let Some(re) = CODE_BLOCK_RE.as_ref() else {
        return Vec::new();
    };
    re.captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let content = caps.get(2)?.as_str().trim();
            if content.is_empty() {
                return None;
            }
            Some(CodeBlock {
                language: caps
                    .get(1)
                    .map(|m| m.as_str().to_ascii_lowercase())
                    .unwrap_or_default(),
                content,
                span: whole.range(),
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Path inference rules
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum PathSource {
    /// First line of the block, when it is a comment.
    LeadingComment,
    /// Prose immediately before the block.
    Lookbehind,
}

#[derive(Debug)]
pub(super) struct PathRule {
    pub name: &'static str,
    /// Lower tiers are tried first. Within a tier the match nearest the
    /// block wins.
    pub tier: u8,
    pub source: PathSource,
    /// Group 1 captures the path.
    pub pattern: &'static str,
}

const PATH: &str = r"[A-Za-z0-9_\-./\\]+\.\w+";

pub(super) const PATH_RULES: &[PathRule] = &[
    PathRule {
        name: "leading-comment",
        tier: 0,
        source: PathSource::LeadingComment,
        pattern: r"^(?:#+|//+|<!--)[\s#/!\-]*({PATH})",
    },
    PathRule {
        name: "bold",
        tier: 1,
        source: PathSource::Lookbehind,
        pattern: r"\*\*({PATH})\*\*",
    },
    PathRule {
        name: "heading",
        tier: 2,
        source: PathSource::Lookbehind,
        pattern: r"#{1,6}\s*(?:\d+\.\s*)?({PATH})",
    },
    PathRule {
        name: "backtick",
        tier: 3,
        source: PathSource::Lookbehind,
        pattern: r"`({PATH})`",
    },
    PathRule {
        name: "numbered-item",
        tier: 4,
        source: PathSource::Lookbehind,
        pattern: r"\d+\.\s*([A-Za-z0-9_\-]+(?:/[A-Za-z0-9_\-]+)*\.\w+)",
    },
    PathRule {
        name: "create-phrase",
        tier: 5,
        source: PathSource::Lookbehind,
        pattern: r"(?:创建|新建)(?:文件)?[:：\s]*[`'\x22]?({PATH})",
    },
    PathRule {
        name: "write-phrase",
        tier: 5,
        source: PathSource::Lookbehind,
        pattern: r"(?:写入|保存)(?:到|为)?(?:文件)?[:：\s]*[`'\x22]?({PATH})",
    },
    PathRule {
        name: "file-label",
        tier: 5,
        source: PathSource::Lookbehind,
        pattern: r"(?i)(?:文件|\bfile)[:：\s]+[`'\x22]?({PATH})",
    },
    PathRule {
        name: "english-verb",
        tier: 5,
        source: PathSource::Lookbehind,
        pattern: r"(?i)\b(?:create|write|save|update)\s+(?:it\s+)?(?:to\s+|as\s+|in\s+)?(?:a\s+)?(?:new\s+)?(?:file\s+)?(?:called\s+|named\s+)?[`'\x22]?({PATH})",
    },
    PathRule {
        name: "quoted",
        tier: 5,
        source: PathSource::Lookbehind,
        pattern: r"[\x22']({PATH})[\x22']",
    },
];

static COMPILED_PATH_RULES: LazyLock<Vec<(&'static PathRule, Regex)>> = LazyLock::new(|| {
    PATH_RULES
        .iter()
        .filter_map(|rule| {
            let pattern = rule.pattern.replace("{PATH}", PATH);
            compile(&pattern).map(|re| (rule, re))
        })
        .collect()
});

fn lookbehind(text: &str, block_start: usize) -> &str {
    let before = &text[..block_start];
    let start = before
        .char_indices()
        .rev()
        .nth(LOOKBEHIND_CHARS - 1)
        .map_or(0, |(i, _)| i);
    &before[start..]
}

/// Best file path for `block`, or `None` when no rule yields a plausible one.
pub(super) fn infer_path(text: &str, block: &CodeBlock<'_>) -> Option<String> {
    let first_line = block.content.lines().next().unwrap_or_default().trim();
    let window = lookbehind(text, block.span.start);

    let mut tier = None::<u8>;
    let mut best: Option<(usize, String)> = None;
    for (rule, re) in COMPILED_PATH_RULES.iter() {
        if tier != Some(rule.tier) {
            if best.is_some() {
                break;
            }
            tier = Some(rule.tier);
        }
        let haystack = match rule.source {
            PathSource::LeadingComment => first_line,
            PathSource::Lookbehind => window,
        };
        for caps in re.captures_iter(haystack) {
            let Some(m) = caps.get(1) else { continue };
            let candidate = m.as_str().replace('\\', "/");
            if !is_valid_file_path(&candidate) {
                continue;
            }
            if best.as_ref().map_or(true, |(pos, _)| m.end() >= *pos) {
                tracing::trace!(rule = rule.name, path = candidate.as_str(), "path candidate");
                best = Some((m.end(), candidate));
            }
        }
    }
    best.map(|(_, path)| path)
}

// ---------------------------------------------------------------------------
// Read intent
// ---------------------------------------------------------------------------

static READ_INTENT_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?:读取|查看|打开)(?:文件)?[:：\s]*[`'\x22]?({PATH})",
        r"(?i)\b(?:read|view|open|cat)\s+(?:the\s+)?(?:file\s+)?[`'\x22]?({PATH})",
    ]
    .iter()
    .filter_map(|p| compile(&p.replace("{PATH}", PATH)))
    .collect()
});

/// Path the text (or, failing that, the user) asks to have read.
pub(super) fn detect_read_intent(text: &str, user_context: &str) -> Option<String> {
    [text, user_context].into_iter().find_map(|haystack| {
        READ_INTENT_RES.iter().find_map(|re| {
            re.captures_iter(haystack)
                .filter_map(|caps| caps.get(1))
                .map(|m| m.as_str().replace('\\', "/"))
                .find(|p| is_valid_file_path(p))
        })
    })
}

// ---------------------------------------------------------------------------
// Search and kill intent
// ---------------------------------------------------------------------------

/// Tool sets at most this large let the user's own request drive `Grep`.
const GREP_USER_CONTEXT_MAX_TOOLS: usize = 2;

static GREP_SCOPED_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    compile(r"在\s*[`'\x22]?([A-Za-z0-9_\-./\\*]+)[`'\x22]?\s*中(?:搜索|查找)\s*[`'\x22]?([^`'\x22\n]+)")
});
static GREP_PHRASE_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    compile(r"(?i)(?:搜索|查找|\bsearch(?:\s+for)?)\s+[`'\x22]?([^`'\x22\n,，。]+)")
});
static GREP_COMMAND_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    compile(r#"\bgrep\s+(?:-[a-zA-Z]+\s+)*(?:"([^"\n]+)"|'([^'\n]+)'|([^\s"'|>]+))(?:[ \t]+([^\s|>]+))?"#)
});
static KILL_SHELL_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    compile(r"(?i)(?:终止|停止|\bkill|\bstop)\s*(?:进程|shell\b|运行|process\b)")
});

/// `(pattern, path)` from a search phrase in prose.
fn grep_phrase(haystack: &str) -> Option<(String, String)> {
    if let Some(caps) = GREP_SCOPED_RE.as_ref().and_then(|re| re.captures(haystack)) {
        let pattern = caps.get(2).map_or("", |m| m.as_str().trim());
        if let Some(path) = caps.get(1).filter(|_| !pattern.is_empty()) {
            return Some((pattern.to_string(), path.as_str().to_string()));
        }
    }
    let pattern = GREP_PHRASE_RE
        .as_ref()?
        .captures(haystack)?
        .get(1)?
        .as_str()
        .trim();
    (!pattern.is_empty()).then(|| (pattern.to_string(), ".".to_string()))
}

/// `(pattern, path)` from a `grep` command line.
fn grep_command(command: &str) -> Option<(String, String)> {
    let caps = GREP_COMMAND_RE.as_ref()?.captures(command)?;
    let pattern = caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3))?;
    let path = caps.get(4).map_or(".", |m| m.as_str());
    Some((pattern.as_str().to_string(), path.to_string()))
}

/// What to search for: a search phrase in the text, then in the user's
/// message when `consult_user` is set, then a `grep` in a shell block.
pub(super) fn detect_grep_intent(
    text: &str,
    blocks: &[CodeBlock<'_>],
    user_context: &str,
    consult_user: bool,
) -> Option<(String, String)> {
    grep_phrase(text)
        .or_else(|| consult_user.then(|| grep_phrase(user_context)).flatten())
        .or_else(|| {
            blocks
                .iter()
                .filter(|b| is_shell(b))
                .find_map(|b| grep_command(b.content))
        })
}

pub(super) fn detect_kill_shell_intent(text: &str) -> bool {
    KILL_SHELL_RE.as_ref().is_some_and(|re| re.is_match(text))
}

// ---------------------------------------------------------------------------
// Diff blocks
// ---------------------------------------------------------------------------

/// `(path, old, new)` from a unified diff block.
pub(super) fn diff_to_edit(content: &str) -> Option<(String, String, String)> {
    let path_re = DIFF_PATH_RE.as_ref()?;
    let mut path = None;
    let mut old_lines = Vec::new();
    let mut new_lines = Vec::new();

    for line in content.lines() {
        if line.starts_with("---") {
            if let Some(caps) = path_re.captures(line) {
                path = caps.get(1).map(|m| m.as_str().to_string());
            }
        } else if line.starts_with("+++") {
            continue;
        } else if let Some(rest) = line.strip_prefix('-') {
            old_lines.push(rest);
        } else if let Some(rest) = line.strip_prefix('+') {
            new_lines.push(rest);
        }
    }

    let path = path?;
    if old_lines.is_empty() && new_lines.is_empty() {
        return None;
    }
    Some((path, old_lines.join("\n"), new_lines.join("\n")))
}

// ---------------------------------------------------------------------------
// Recovery
// ---------------------------------------------------------------------------

fn input_of(pairs: &[(&str, &str)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), Value::String((*v).to_string())))
        .collect()
}

fn is_diff(block: &CodeBlock<'_>) -> bool {
    matches!(block.language.as_str(), "diff" | "patch")
}

fn is_shell(block: &CodeBlock<'_>) -> bool {
    SHELL_LANGUAGES.contains(&block.language.as_str())
}

/// Candidate invocations from `text`, in emission order, already screened.
pub(super) fn recover(
    sim: &ToolCallSimulator<'_>,
    text: &str,
    user_context: &str,
    ctx: &mut ConversionContext,
) -> Vec<ToolInvocation> {
    let blocks = extract_code_blocks(text);
    let mut candidates = Vec::new();

    if sim.declares("Read") {
        if let Some(path) = detect_read_intent(text, user_context) {
            candidates.push(ToolInvocation::new("Read", input_of(&[("file_path", path.as_str())]), None));
        } else if sim.declares_only("Read") {
            if let Some((block, path)) = blocks
                .iter()
                .find_map(|b| infer_path(text, b).map(|p| (b, p)))
            {
                candidates.push(ToolInvocation::new(
                    "Read",
                    input_of(&[("file_path", path.as_str())]),
                    Some(block.span.clone()),
                ));
            }
        }
    }

    if sim.declares("Edit") {
        if let Some((block, (path, old, new))) = blocks
            .iter()
            .filter(|b| is_diff(b))
            .find_map(|b| diff_to_edit(b.content).map(|edit| (b, edit)))
        {
            candidates.push(ToolInvocation::new(
                "Edit",
                input_of(&[("file_path", path.as_str()), ("old_string", old.as_str()), ("new_string", new.as_str())]),
                Some(block.span.clone()),
            ));
        }
    }

    if sim.declares("Bash") {
        for block in blocks.iter().filter(|b| is_shell(b)) {
            if let Some(command) = command_from_shell_block(block.content) {
                candidates.push(ToolInvocation::new(
                    "Bash",
                    input_of(&[("command", command.as_str())]),
                    Some(block.span.clone()),
                ));
            }
        }
    }

    if sim.declares("Grep") {
        let consult_user = sim.tools.len() <= GREP_USER_CONTEXT_MAX_TOOLS;
        if let Some((pattern, path)) = detect_grep_intent(text, &blocks, user_context, consult_user) {
            candidates.push(ToolInvocation::new(
                "Grep",
                input_of(&[("pattern", pattern.as_str()), ("path", path.as_str())]),
                None,
            ));
        }
    }

    if sim.declares("KillShell") && detect_kill_shell_intent(text) {
        candidates.push(ToolInvocation::new("KillShell", Map::new(), None));
    }

    let file_tool = if sim.declares("Write") {
        Some("Write")
    } else if sim.declares("Edit") {
        Some("Edit")
    } else {
        None
    };
    if let Some(tool) = file_tool {
        for block in blocks.iter().filter(|b| !is_shell(b) && !is_diff(b)) {
            if block.content.chars().count() < MIN_BLOCK_CONTENT {
                continue;
            }
            let Some(path) = infer_path(text, block) else {
                continue;
            };
            let input = if tool == "Write" {
                input_of(&[("file_path", path.as_str()), ("content", block.content)])
            } else {
                input_of(&[("file_path", path.as_str()), ("old_string", ""), ("new_string", block.content)])
            };
            candidates.push(ToolInvocation::new(tool, input, Some(block.span.clone())));
        }
    }

    candidates
        .into_iter()
        .filter_map(|candidate| filter::screen(candidate, ctx))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_at<'t>(text: &'t str, index: usize) -> CodeBlock<'t> {
        extract_code_blocks(text).swap_remove(index)
    }

    #[test]
    fn code_blocks_are_found_with_language() {
        let text = "a\n```Python\nprint('x')\n```\nb\n```\n\n```";
        let blocks = extract_code_blocks(text);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].language, "python");
        assert_eq!(blocks[0].content, "print('x')");
    }

    #[test]
    fn leading_comment_beats_prose() {
        let text = "Save it as **other.py**:\n```python\n# src/app.py\nprint('hello world')\n```";
        let block = block_at(text, 0);
        assert_eq!(infer_path(text, &block).as_deref(), Some("src/app.py"));
    }

    #[test]
    fn nearest_phrase_wins() {
        let text = "First create first.py, then write to second.js:\n```js\nconsole.log('hi there');\n```";
        let block = block_at(text, 0);
        assert_eq!(infer_path(text, &block).as_deref(), Some("second.js"));
    }

    #[test]
    fn backslashes_become_slashes() {
        let text = "### src\\main.rs\n```rust\nfn main() { println!(\"x\"); }\n```";
        let block = block_at(text, 0);
        assert_eq!(infer_path(text, &block).as_deref(), Some("src/main.rs"));
    }

    #[test]
    fn hostnames_are_not_paths() {
        let text = "Visit `example.com` first.\n```html\n<html><body></body></html>\n```";
        let block = block_at(text, 0);
        assert_eq!(infer_path(text, &block), None);
    }

    #[test]
    fn read_intent_checks_text_then_user() {
        assert_eq!(detect_read_intent("Let me read config.yaml", "").as_deref(), Some("config.yaml"));
        assert_eq!(detect_read_intent("Sure.", "请查看 src/lib.rs").as_deref(), Some("src/lib.rs"));
        assert_eq!(detect_read_intent("Sure.", "hello"), None);
    }

    #[test]
    fn grep_phrases_and_commands() {
        assert_eq!(
            grep_phrase("Let me search for `parse_config` first."),
            Some(("parse_config".to_string(), ".".to_string()))
        );
        assert_eq!(
            grep_phrase("我会在 src 中搜索 TODO"),
            Some(("TODO".to_string(), "src".to_string()))
        );
        assert_eq!(grep_phrase("Nothing to look for."), None);
        assert_eq!(
            grep_command(r#"grep -rn "fn main" src | head"#),
            Some(("fn main".to_string(), "src".to_string()))
        );
        assert_eq!(
            grep_command("grep -i todo"),
            Some(("todo".to_string(), ".".to_string()))
        );
    }

    #[test]
    fn user_context_is_only_consulted_when_asked() {
        assert!(detect_grep_intent("Sure.", &[], "search for TODO", false).is_none());
        assert_eq!(
            detect_grep_intent("Sure.", &[], "search for TODO", true),
            Some(("TODO".to_string(), ".".to_string()))
        );
    }

    #[test]
    fn kill_shell_intent() {
        assert!(detect_kill_shell_intent("Let me kill process 4242 first."));
        assert!(detect_kill_shell_intent("我来终止进程。"));
        assert!(!detect_kill_shell_intent("Stop here and review the diff."));
        assert!(!detect_kill_shell_intent("The processor is busy."));
    }

    #[test]
    fn diff_blocks_become_edits() {
        let diff = "--- a/app.py\n+++ b/app.py\n-print('a')\n+print('b')";
        let (path, old, new) = diff_to_edit(diff).expect("edit");
        assert_eq!(path, "app.py");
        assert_eq!(old, "print('a')");
        assert_eq!(new, "print('b')");
        assert_eq!(diff_to_edit("just text"), None);
    }
}
