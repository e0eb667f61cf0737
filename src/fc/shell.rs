//! Shell command cleanup for `Bash` invocations.
//!
//! Backends trained on a lot of Windows material keep writing `del`, `dir`
//! and backslash paths. Commands are translated to POSIX equivalents before
//! they are screened, and commands that are unsafe or clearly not meant to
//! be run verbatim are rejected.

use std::sync::LazyLock;

use regex_lite::Regex;

use super::grammar::compile;

/// Fenced block languages treated as shell sessions.
pub(super) const SHELL_LANGUAGES: &[&str] =
    &["sh", "bash", "shell", "powershell", "ps1", "cmd", "zsh"];

const MAX_BLOCK_COMMAND_LEN: usize = 500;

// ---------------------------------------------------------------------------
// Translation
// ---------------------------------------------------------------------------

/// Split a command line into words, honouring single and double quotes.
fn split_words(line: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut in_word = false;

    for c in line.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                in_word = true;
            }
            None if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            None => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if in_word {
        words.push(current);
    }
    words
}

/// Leading `/X` switches and the remaining operands.
fn split_switches(args: &[String]) -> (Vec<String>, &[String]) {
    let count = args
        .iter()
        .take_while(|a| a.len() == 2 && a.starts_with('/'))
        .count();
    let switches = args[..count]
        .iter()
        .map(|s| s[1..].to_ascii_lowercase())
        .collect();
    (switches, &args[count..])
}

/// Separator rewrite for an operand of a Windows verb, where every `\` is a
/// path separator.
fn quoted(path: &str) -> String {
    if path.starts_with(r"\\") {
        return format!("\"{path}\"");
    }
    format!("\"{}\"", path.replace('\\', "/"))
}

/// `type` is also a shell builtin; only a file-like operand means the
/// Windows verb.
fn looks_like_file(operand: &str) -> bool {
    operand.contains(['/', '\\']) || operand.rsplit_once('.').is_some_and(|(stem, ext)| {
        !stem.is_empty() && !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric())
    })
}

/// Translate one command with no `&&` chaining. `None` keeps it as is.
fn translate_verb(command: &str) -> Option<String> {
    let words = split_words(command);
    let (verb, args) = words.split_first()?;
    let (switches, operands) = split_switches(args);
    let has = |flags: &[&str]| switches.iter().any(|s| flags.contains(&s.as_str()));

    match verb.to_ascii_lowercase().as_str() {
        "del" | "erase" => match operands {
            [path] if has(&["q", "f"]) => Some(format!("rm -f {}", quoted(path))),
            [path] => Some(format!("rm {}", quoted(path))),
            _ => None,
        },
        "copy" => match operands {
            [src, dst] => Some(format!("cp {} {}", quoted(src), quoted(dst))),
            _ => None,
        },
        "move" => match operands {
            [src, dst] => Some(format!("mv {} {}", quoted(src), quoted(dst))),
            _ => None,
        },
        "type" => match operands {
            [path] if looks_like_file(path) => Some(format!("cat {}", quoted(path))),
            _ => None,
        },
        "dir" => match operands {
            [] => Some("ls -la".to_string()),
            [path] => Some(format!("ls -la {}", quoted(path))),
            _ => None,
        },
        "rmdir" | "rd" if has(&["s", "q"]) => match operands {
            [path] => Some(format!("rm -rf {}", quoted(path))),
            _ => None,
        },
        "cls" if operands.is_empty() => Some("clear".to_string()),
        "echo." if operands.is_empty() => Some("echo".to_string()),
        _ => None,
    }
}

fn is_path_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '~')
}

/// An unquoted word that reads as a Windows path: `C:\x` or `dir\file`.
/// Words with quotes, UNC prefixes, or a backslash that could be an escape
/// (`\.`, `\|`, `\$`) do not qualify.
fn looks_like_windows_path(word: &str) -> bool {
    if !word.contains('\\') || word.contains(['"', '\'']) || word.starts_with(r"\\") {
        return false;
    }
    let bytes = word.as_bytes();
    if bytes.len() > 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' && bytes[2] == b'\\' {
        return true;
    }
    let chars: Vec<char> = word.chars().collect();
    chars.iter().enumerate().all(|(i, &c)| {
        c != '\\'
            || (i > 0
                && is_path_char(chars[i - 1])
                && chars
                    .get(i + 1)
                    .is_some_and(|n| n.is_ascii_alphanumeric() || *n == '_'))
    })
}

/// Turn separators in Windows-looking words into `/`. Quoted strings and
/// everything else pass through untouched.
fn normalize_separators(text: &str) -> String {
    if !text.contains('\\') {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut word = String::new();
    let mut quote: Option<char> = None;

    let flush = |word: &mut String, out: &mut String| {
        if looks_like_windows_path(word) {
            out.push_str(&word.replace('\\', "/"));
        } else {
            out.push_str(word);
        }
        word.clear();
    };

    for c in text.chars() {
        match quote {
            Some(q) => {
                word.push(c);
                if c == q {
                    quote = None;
                }
            }
            None if c == '"' || c == '\'' => {
                word.push(c);
                quote = Some(c);
            }
            None if c.is_whitespace() => {
                flush(&mut word, &mut out);
                out.push(c);
            }
            None => word.push(c),
        }
    }
    flush(&mut word, &mut out);
    out
}

/// Split on `&&` outside quotes.
fn split_chain(command: &str) -> Vec<&str> {
    let bytes = command.as_bytes();
    let mut parts = Vec::new();
    let mut quote: Option<u8> = None;
    let mut start = 0usize;
    let mut i = 0usize;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'\'' => quote = Some(b),
            None if b == b'&' && bytes.get(i + 1) == Some(&b'&') => {
                parts.push(&command[start..i]);
                i += 2;
                start = i;
                continue;
            }
            None => {}
        }
        i += 1;
    }
    parts.push(&command[start..]);
    parts
}

fn translate_part(part: &str) -> String {
    translate_verb(part).unwrap_or_else(|| normalize_separators(part))
}

/// Rewrite Windows command syntax into POSIX shell syntax.
pub(super) fn translate_foreign_command(command: &str) -> String {
    let parts = split_chain(command.trim());
    if let [single] = parts.as_slice() {
        return translate_part(single.trim());
    }
    parts
        .iter()
        .map(|part| translate_part(part.trim()))
        .collect::<Vec<_>>()
        .join(" && ")
}

// ---------------------------------------------------------------------------
// Screening
// ---------------------------------------------------------------------------

const WINDOWS_LEFTOVERS: &[&str] = &["cd /d ", ":: ", "copy ", "xcopy ", "notepad"];

const PLACEHOLDERS: &[&str] = &[
    "your-username",
    "your_username",
    "your-",
    "你的",
    "<your",
    "[your",
    "example.com",
    "yourdomain",
];

const DANGEROUS_PATTERNS: &[&str] = &[
    r"(?:^|[\s;&|])rm\s+-[a-zA-Z]*(?:rf|fr)[a-zA-Z]*\s+(?:/|~/?|\*|/\*)(?:\s|$|;|&)",
    r"(?:^|[\s;&|])sudo\s+rm\s+-[a-zA-Z]*(?:rf|fr)",
    r":\s*\(\s*\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:",
];

static DANGEROUS_RES: LazyLock<Vec<Regex>> =
    LazyLock::new(|| DANGEROUS_PATTERNS.iter().filter_map(|p| compile(p)).collect());

/// Reason `command` must not be forwarded to the client, if any.
pub(super) fn rejection_reason(command: &str) -> Option<&'static str> {
    let trimmed = command.trim();
    if trimmed.chars().count() < 2 {
        return Some("empty command");
    }
    let lower = trimmed.to_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return Some("bare url");
    }
    if WINDOWS_LEFTOVERS.iter().any(|p| lower.contains(p)) {
        return Some("windows command syntax");
    }
    if PLACEHOLDERS.iter().any(|p| lower.contains(p)) {
        return Some("placeholder value");
    }
    if DANGEROUS_RES.iter().any(|re| re.is_match(trimmed)) {
        return Some("destructive command");
    }
    None
}

/// Dedup key for a command: whitespace collapsed, double quotes folded to
/// single quotes.
pub(super) fn normalize_for_dedup(command: &str) -> String {
    command
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('"', "'")
}

/// Join the runnable lines of a shell code block into one command.
pub(super) fn command_from_shell_block(content: &str) -> Option<String> {
    let lines: Vec<&str> = content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#') && !l.starts_with("::"))
        .map(|l| l.trim_start_matches(['$', '>', ' ']))
        .filter(|l| !l.is_empty())
        .collect();
    if lines.is_empty() {
        return None;
    }
    let command = lines.join(" && ");
    (command.len() < MAX_BLOCK_COMMAND_LEN).then_some(command)
}
