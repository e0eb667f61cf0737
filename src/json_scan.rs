//! Byte-level scanning for JSON objects embedded in free text.
//!
//! Model output is prose with JSON payloads dropped into it, so a strict
//! parser cannot be pointed at the whole buffer. These helpers find where an
//! object starts and where its matching closing brace is, tracking string
//! literals and escapes so braces inside string values never count.

use memchr::memchr;

#[inline]
pub(crate) fn skip_ws(bytes: &[u8], mut i: usize) -> usize {
    while let Some(b' ' | b'\n' | b'\r' | b'\t') = bytes.get(i) {
        i += 1;
    }
    i
}

/// Position of the first `{` at or after `from`.
#[inline]
pub(crate) fn find_object_start(bytes: &[u8], from: usize) -> Option<usize> {
    let tail = bytes.get(from..)?;
    memchr(b'{', tail).map(|rel| from + rel)
}

/// Exclusive end of the object whose `{` sits at `start`.
///
/// Returns `None` when `start` is not a `{` or the text ends before depth
/// returns to zero.
pub(crate) fn balanced_object_end(bytes: &[u8], start: usize) -> Option<usize> {
    if bytes.get(start) != Some(&b'{') {
        return None;
    }
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + offset + 1);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brace_inside_string_does_not_close_object() {
        let text = br#"prefix {"content":"fn main() { }","n":1} tail"#;
        let start = find_object_start(text, 0).unwrap();
        let end = balanced_object_end(text, start).unwrap();
        assert_eq!(&text[start..end], br#"{"content":"fn main() { }","n":1}"#);
    }

    #[test]
    fn escaped_quote_keeps_string_open() {
        let text = br#"{"a":"say \"}\" loud"}"#;
        assert_eq!(balanced_object_end(text, 0), Some(text.len()));
    }

    #[test]
    fn nested_objects_are_balanced() {
        let text = br#"{"a":{"b":{"c":1}},"d":2}rest"#;
        assert_eq!(balanced_object_end(text, 0), Some(text.len() - 4));
    }

    #[test]
    fn unterminated_object_yields_none() {
        assert_eq!(balanced_object_end(br#"{"a":"#, 0), None);
        assert_eq!(balanced_object_end(b"x", 0), None);
    }

    #[test]
    fn skip_ws_stops_at_content() {
        assert_eq!(skip_ws(b" \n\t x", 0), 4);
        assert_eq!(skip_ws(b"   ", 1), 3);
    }
}
