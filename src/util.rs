use std::time::{SystemTime, UNIX_EPOCH};

const HEX: &[u8; 16] = b"0123456789abcdef";

#[inline]
pub(crate) fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_secs())
}

/// Random request-scoped UUID. Only needs to be unique, not cryptographic.
#[must_use]
pub(crate) fn random_uuid() -> uuid::Uuid {
    uuid::Uuid::from_u64_pair(fastrand::u64(..), fastrand::u64(..))
}

/// `toolu_` followed by 24 lowercase hex characters.
#[must_use]
pub(crate) fn next_tool_use_id() -> String {
    let mut out = String::with_capacity(30);
    out.push_str("toolu_");
    push_hex(&mut out, fastrand::u64(..), 16);
    push_hex(&mut out, fastrand::u64(..), 8);
    out
}

#[must_use]
pub(crate) fn next_message_id() -> String {
    let mut out = String::with_capacity(28);
    out.push_str("msg_");
    push_hex(&mut out, fastrand::u64(..), 16);
    push_hex(&mut out, fastrand::u64(..), 8);
    out
}

#[must_use]
pub(crate) fn next_completion_id() -> String {
    let mut out = String::with_capacity(33);
    out.push_str("chatcmpl-");
    push_hex(&mut out, fastrand::u64(..), 16);
    push_hex(&mut out, fastrand::u64(..), 8);
    out
}

fn push_hex(out: &mut String, value: u64, digits: usize) {
    for shift in (0..digits).rev() {
        let nibble = (value >> (shift * 4)) & 0x0f;
        out.push(char::from(HEX[nibble as usize]));
    }
}

#[inline]
pub(crate) fn push_json_string_escaped(out: &mut String, value: &str) {
    let bytes = value.as_bytes();
    if bytes.iter().all(|&b| b >= 0x20 && b != b'"' && b != b'\\') {
        out.push('"');
        out.push_str(value);
        out.push('"');
        return;
    }

    out.push('"');
    for ch in value.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            c if c <= '\u{1f}' => {
                let control = c as u8;
                out.push_str("\\u00");
                out.push(char::from(HEX[(control >> 4) as usize]));
                out.push(char::from(HEX[(control & 0x0f) as usize]));
            }
            _ => out.push(ch),
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_use_id_shape() {
        let id = next_tool_use_id();
        assert!(id.starts_with("toolu_"));
        assert_eq!(id.len(), 30);
        assert!(id[6..].bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn generated_ids_differ() {
        assert_ne!(next_tool_use_id(), next_tool_use_id());
        assert_ne!(next_message_id(), next_message_id());
    }

    #[test]
    fn push_json_string_escaped_matches_serde_json() {
        let inputs = [
            "",
            "plain ascii",
            "quote \" and slash \\",
            "line\nbreak\r\n",
            "\u{08}\u{0c}\t",
            "control \u{001f} tail",
            "mixed \"ä\"\\\n",
        ];

        for input in inputs {
            let mut out = String::new();
            push_json_string_escaped(&mut out, input);
            let expected = serde_json::to_string(input).expect("serialize");
            assert_eq!(out, expected);
        }
    }
}
