use super::canonical::{CanonicalRole, CanonicalStopReason};

// ---------------------------------------------------------------------------
// Role mappings
// ---------------------------------------------------------------------------

/// Protocol A only admits `user` and `assistant` inside `messages`.
#[must_use]
pub fn anthropic_role_to_canonical(s: &str) -> Option<CanonicalRole> {
    match s {
        "user" => Some(CanonicalRole::User),
        "assistant" => Some(CanonicalRole::Assistant),
        _ => None,
    }
}

#[must_use]
pub fn openai_role_to_canonical(s: &str) -> Option<CanonicalRole> {
    match s {
        "system" | "developer" => Some(CanonicalRole::System),
        "user" => Some(CanonicalRole::User),
        "assistant" => Some(CanonicalRole::Assistant),
        "tool" | "function" => Some(CanonicalRole::Tool),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Stop reason mappings
// ---------------------------------------------------------------------------

/// Map the backend's `finish_reason` onto the canonical stop reason.
///
/// The backend has no tool protocol of its own, so anything unrecognized
/// (including a missing value) is an ordinary end of turn.
#[must_use]
pub fn backend_finish_to_canonical(s: Option<&str>) -> CanonicalStopReason {
    match s {
        Some("length" | "max_tokens") => CanonicalStopReason::MaxTokens,
        Some("content_filter") => CanonicalStopReason::ContentFilter,
        _ => CanonicalStopReason::EndOfTurn,
    }
}

#[must_use]
pub fn canonical_stop_to_anthropic(reason: CanonicalStopReason) -> &'static str {
    match reason {
        CanonicalStopReason::EndOfTurn => "end_turn",
        CanonicalStopReason::MaxTokens => "max_tokens",
        CanonicalStopReason::ContentFilter => "stop_sequence",
        CanonicalStopReason::ToolUse => "tool_use",
    }
}

#[must_use]
pub fn canonical_stop_to_openai(reason: CanonicalStopReason) -> &'static str {
    match reason {
        CanonicalStopReason::EndOfTurn => "stop",
        CanonicalStopReason::MaxTokens => "length",
        CanonicalStopReason::ContentFilter => "content_filter",
        CanonicalStopReason::ToolUse => "tool_calls",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_finish_maps_to_anthropic_stop_reasons() {
        let cases = [
            (Some("stop"), "end_turn"),
            (Some("length"), "max_tokens"),
            (Some("content_filter"), "stop_sequence"),
            (None, "end_turn"),
            (Some("something_else"), "end_turn"),
        ];
        for (finish, expected) in cases {
            let reason = backend_finish_to_canonical(finish);
            assert_eq!(canonical_stop_to_anthropic(reason), expected, "{finish:?}");
        }
    }

    #[test]
    fn openai_finish_reasons_round_trip_through_canonical() {
        for finish in ["stop", "length", "content_filter"] {
            let reason = backend_finish_to_canonical(Some(finish));
            assert_eq!(canonical_stop_to_openai(reason), finish);
        }
        assert_eq!(
            canonical_stop_to_openai(CanonicalStopReason::ToolUse),
            "tool_calls"
        );
    }

    #[test]
    fn anthropic_rejects_system_role_in_messages() {
        assert_eq!(anthropic_role_to_canonical("system"), None);
        assert_eq!(
            anthropic_role_to_canonical("assistant"),
            Some(CanonicalRole::Assistant)
        );
    }

    #[test]
    fn openai_developer_role_folds_into_system() {
        assert_eq!(
            openai_role_to_canonical("developer"),
            Some(CanonicalRole::System)
        );
        assert_eq!(openai_role_to_canonical("moderator"), None);
    }
}
