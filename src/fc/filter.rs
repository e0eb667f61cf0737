use rustc_hash::FxHashSet;
use serde_json::{Map, Value};

use super::{shell, validator, ToolInvocation, ToolKind};
use crate::protocol::canonical::ConversionContext;

/// Smallest trimmed `Write` content worth forwarding.
pub(super) const MIN_WRITE_CONTENT: usize = 10;

const KEY_SEP: char = '\u{1f}';

/// Dedup key for a file mutation. `Write` and `Edit` share it so a path is
/// mutated at most once per response.
pub(super) fn mutation_key(path: &str) -> String {
    format!("mutate{KEY_SEP}{path}")
}

fn read_key(path: &str) -> String {
    format!("Read{KEY_SEP}{path}")
}

fn reject(invocation: &ToolInvocation, reason: &str) -> Option<ToolInvocation> {
    tracing::debug!(tool = invocation.name.as_str(), reason, "dropping simulated tool call");
    None
}

/// Apply the per-tool acceptance rules. Accepted invocations claim their
/// dedup key in `ctx`.
pub(super) fn screen(
    mut invocation: ToolInvocation,
    ctx: &mut ConversionContext,
) -> Option<ToolInvocation> {
    match invocation.kind() {
        ToolKind::Write => {
            let path = invocation.file_path();
            if path.trim().is_empty() {
                return reject(&invocation, "missing file_path");
            }
            let content = invocation.str_arg("content");
            if content.trim().chars().count() < MIN_WRITE_CONTENT {
                return reject(&invocation, "content too short");
            }
            if let Some(reason) = validator::hallucination_reason(content, path) {
                return reject(&invocation, reason);
            }
            if !ctx.claim_key(mutation_key(path)) {
                return reject(&invocation, "path already written");
            }
        }
        ToolKind::Edit => {
            let path = invocation.file_path();
            if path.trim().is_empty() {
                return reject(&invocation, "missing file_path");
            }
            let new_string = invocation.str_arg("new_string");
            if !new_string.is_empty() {
                if let Some(reason) = validator::hallucination_reason(new_string, path) {
                    return reject(&invocation, reason);
                }
            }
            if !ctx.claim_key(mutation_key(path)) {
                return reject(&invocation, "path already edited");
            }
        }
        ToolKind::Bash => {
            let translated = shell::translate_foreign_command(invocation.str_arg("command"));
            if let Some(reason) = shell::rejection_reason(&translated) {
                return reject(&invocation, reason);
            }
            let key = format!("Bash{KEY_SEP}{}", shell::normalize_for_dedup(&translated));
            if !ctx.claim_key(key) {
                return reject(&invocation, "duplicate command");
            }
            invocation
                .input
                .insert("command".to_string(), Value::String(translated));
        }
        ToolKind::Read => {
            let path = invocation.file_path();
            if path.trim().is_empty() {
                return reject(&invocation, "missing file_path");
            }
            if !ctx.claim_key(read_key(path)) {
                return reject(&invocation, "path already read");
            }
        }
        ToolKind::Other => {
            let key = format!("{}{KEY_SEP}{}", invocation.name, invocation.input_json());
            if !ctx.claim_key(key) {
                return reject(&invocation, "duplicate call");
            }
        }
    }
    Some(invocation)
}

/// Final ordering pass.
///
/// Shell commands are dropped when a file mutation is pending in the same
/// response, since they usually try to run the file before it exists. When
/// `Read` is declared, each mutated path is read first unless an earlier
/// `Read` already covers it.
pub(super) fn order(
    invocations: Vec<ToolInvocation>,
    read_declared: bool,
    ctx: &mut ConversionContext,
) -> Vec<ToolInvocation> {
    let mutation_pending = invocations.iter().any(|i| i.kind().mutates_file());

    let mut read_paths: FxHashSet<String> = FxHashSet::default();
    let mut ordered = Vec::with_capacity(invocations.len() * 2);

    for invocation in invocations {
        match invocation.kind() {
            ToolKind::Bash if mutation_pending => {
                tracing::debug!("dropping shell command alongside a file mutation");
            }
            ToolKind::Read => {
                if read_paths.insert(invocation.file_path().to_string()) {
                    ordered.push(invocation);
                }
            }
            kind if kind.mutates_file() && read_declared => {
                let path = invocation.file_path().to_string();
                if read_paths.insert(path.clone()) {
                    ctx.claim_key(read_key(&path));
                    let mut input = Map::new();
                    input.insert("file_path".to_string(), Value::String(path));
                    ordered.push(ToolInvocation::new("Read", input, None));
                }
                ordered.push(invocation);
            }
            _ => ordered.push(invocation),
        }
    }
    ordered
}
