//! Content checks for file-writing invocations.
//!
//! Backends asked to write a file often write a progress report instead
//! ("the project has been successfully created, open http://..."). These
//! checks reject such payloads and obviously malformed structured files.

use std::sync::LazyLock;

use regex_lite::Regex;

use super::grammar::compile;

// ---------------------------------------------------------------------------
// Hallucination phrases
// ---------------------------------------------------------------------------

const HALLUCINATION_PATTERNS: &[&str] = &[
    r"已[成功完]*(?:安装|启动|创建|配置|部署|运行)",
    r"100\s*%\s*(?:成功|完成|安装)",
    r"项目(?:已|完全)?(?:可运行|可开发|可部署)",
    r"全部(?:完成|成功)",
    r"(?:访问|打开)\s*https?://",
    r"请(?:访问|打开|运行|执行)",
    r"你(?:现在)?(?:可以|需要|应该)",
    r"现在(?:可以|你可以)",
    r"[←→]\s*(?:这是|你|只需|由|可以)",
    r"(?:你)?只需要维护",
    r"自动生成并提交",
    r"完全可以删掉",
    r"没人用了",
    r"过时了",
    r"我(?:已经|将要|会|正在)",
    r"让我(?:为你|帮你)",
    r"接下来(?:我会|将)",
    r"(?i)\b(?:has|have)\s+been\s+successfully\s+(?:installed|created|configured|deployed|started)\b",
    r"(?i)\b100\s*%\s*(?:success|successful|complete|done)\b",
    r"(?i)\bthe\s+project\s+is\s+(?:now\s+)?(?:fully\s+)?(?:ready|runnable|deployable)\b",
    r"(?i)\b(?:visit|open)\s+https?://",
    r"(?i)\byou\s+can\s+now\b",
    r"(?i)\bnow\s+you\s+can\b",
    r"(?i)[←→]\s*(?:this\s+is|you\s|just\s|only\s)",
    r"(?i)\bI\s+(?:have\s+already|will\s+now|am\s+now)\b",
    r"(?i)\blet\s+me\s+(?:do\s+(?:it|this|that)|help)\s+for\s+you\b",
    r"(?i)\bnext,?\s+I\s+will\b",
];

static HALLUCINATION_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    HALLUCINATION_PATTERNS
        .iter()
        .filter_map(|p| compile(p))
        .collect()
});

// ---------------------------------------------------------------------------
// Structural checks
// ---------------------------------------------------------------------------

static TOML_SHAPE_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| compile(r"(?m)^\s*\[|\w+\s*="));

const PYTHON_TOKENS: &[&str] = &[
    "import ", "from ", "def ", "class ", "return", "if ", "for ", "while ", "=", "print(",
];

const PYPROJECT_MIN_LINES: usize = 15;

fn file_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

fn extension(path: &str) -> Option<String> {
    let name = file_name(path);
    let (_, ext) = name.rsplit_once('.')?;
    Some(ext.to_ascii_lowercase())
}

/// Why a file's content cannot be what its extension claims, if it cannot.
fn structural_defect(content: &str, path: &str) -> Option<&'static str> {
    let trimmed = content.trim();
    let name = file_name(path).to_ascii_lowercase();

    if name == "pyproject.toml" {
        let has_table = trimmed.contains("[project]") || trimmed.contains("[build-system]");
        if !has_table {
            return Some("pyproject.toml without [project] or [build-system]");
        }
        if trimmed.lines().count() < PYPROJECT_MIN_LINES {
            return Some("pyproject.toml is implausibly short");
        }
        return None;
    }

    match extension(path).as_deref() {
        Some("toml") => {
            let shaped = TOML_SHAPE_RE.as_ref().map_or(true, |re| re.is_match(trimmed));
            (!shaped).then_some("toml without tables or keys")
        }
        Some("lock") => {
            let ok = trimmed.starts_with('{')
                || trimmed.starts_with('[')
                || trimmed.starts_with("version");
            (!ok).then_some("lock file with unexpected header")
        }
        Some("json") => {
            let ok = trimmed.starts_with('{') || trimmed.starts_with('[');
            (!ok).then_some("json that is neither object nor array")
        }
        Some("py") => {
            let has_syntax = PYTHON_TOKENS.iter().any(|t| trimmed.contains(t))
                || trimmed.lines().any(|l| l.trim_start().starts_with('#') && l.is_ascii());
            (!has_syntax).then_some("python file without python syntax")
        }
        _ => None,
    }
}

/// Reason to reject `content` as the body of `file_path`, if any.
pub(super) fn hallucination_reason(content: &str, file_path: &str) -> Option<&'static str> {
    if HALLUCINATION_RES.iter().any(|re| re.is_match(content)) {
        return Some("narrative instead of file content");
    }
    structural_defect(content, file_path)
}

// ---------------------------------------------------------------------------
// Path plausibility
// ---------------------------------------------------------------------------

const NON_PATH_FRAGMENTS: &[&str] = &[
    ".com", ".cn", ".org", ".net", ".io", ".dev", ".app", ".gov", ".edu", ".co", ".info", ".biz",
    "http:", "https:", "www.", "cos.ap", "oss.", "s3.", "blob.", "storage.", "myqcloud", "aliyun",
    "amazonaws", ".ap-", ".eu-", ".us-", ".cn-",
];

const SOURCE_EXTENSIONS: &[&str] = &[
    "py", "js", "ts", "tsx", "jsx", "html", "css", "scss", "sass", "json", "yaml", "yml", "toml",
    "xml", "sql", "sh", "bash", "rs", "go", "java", "kt", "swift", "c", "cpp", "h", "hpp", "cs",
    "rb", "php", "lua", "r", "scala", "vue", "svelte", "md", "txt", "cfg", "ini", "env",
    "gitignore", "dockerfile", "makefile", "gradle", "pom", "lock", "sum",
];

/// Whether `path` looks like a project file rather than a hostname or a
/// stray word with a dot in it.
pub(super) fn is_valid_file_path(path: &str) -> bool {
    let path = path.trim();
    if path.is_empty() {
        return false;
    }
    let lower = path.to_ascii_lowercase();
    if NON_PATH_FRAGMENTS.iter().any(|f| lower.contains(f)) {
        return false;
    }
    if lower.starts_with('.') && !lower.contains('/') {
        return false;
    }
    let Some((stem, ext)) = lower.rsplit_once('.') else {
        return false;
    };
    stem.chars().count() >= 2 && SOURCE_EXTENSIONS.contains(&ext)
}
