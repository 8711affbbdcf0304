//! JSON string escaping for tree serialization.
//!
//! Escapes string contents per RFC 8259 without allocating per string.
//! Multi-byte UTF-8 sequences pass through unescaped.

/// Append `src` to `dst` as a quoted JSON string.
pub fn append_string(dst: &mut String, src: &str) {
    dst.push('"');
    let mut start = 0;
    for (i, b) in src.bytes().enumerate() {
        if b >= 0x20 && b != b'"' && b != b'\\' {
            continue;
        }
        dst.push_str(&src[start..i]);
        append_escaped_ascii(dst, b);
        start = i + 1;
    }
    dst.push_str(&src[start..]);
    dst.push('"');
}

fn append_escaped_ascii(dst: &mut String, c: u8) {
    match c {
        b'"' => dst.push_str("\\\""),
        b'\\' => dst.push_str("\\\\"),
        0x08 => dst.push_str("\\b"),
        0x0c => dst.push_str("\\f"),
        b'\n' => dst.push_str("\\n"),
        b'\r' => dst.push_str("\\r"),
        b'\t' => dst.push_str("\\t"),
        _ => {
            dst.push_str("\\u00");
            const HEX: &[u8; 16] = b"0123456789abcdef";
            dst.push(HEX[(c >> 4) as usize] as char);
            dst.push(HEX[(c & 0xf) as usize] as char);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn escape(s: &str) -> String {
        let mut out = String::new();
        append_string(&mut out, s);
        out
    }

    #[test]
    fn test_plain_string() {
        assert_eq!(escape("hello"), r#""hello""#);
        assert_eq!(escape(""), r#""""#);
    }

    #[test]
    fn test_quotes_and_backslashes() {
        assert_eq!(escape(r#"say "hi""#), r#""say \"hi\"""#);
        assert_eq!(escape(r"a\b"), r#""a\\b""#);
    }

    #[test]
    fn test_named_control_escapes() {
        assert_eq!(escape("a\nb\tc\r"), r#""a\nb\tc\r""#);
        assert_eq!(escape("\u{8}\u{c}"), r#""\b\f""#);
    }

    #[test]
    fn test_hex_control_escapes() {
        assert_eq!(escape("\u{0}"), "\"\\u0000\"");
        assert_eq!(escape("\u{1f}"), "\"\\u001f\"");
    }

    #[test]
    fn test_multibyte_passthrough() {
        assert_eq!(escape("héllo wörld ✓"), "\"héllo wörld ✓\"");
    }

    #[test]
    fn test_round_trip_through_serde() {
        for s in ["plain", "with \"quotes\"", "tabs\tand\nnewlines", "uni✓"] {
            let escaped = escape(s);
            let back: String = serde_json::from_str(&escaped).unwrap();
            assert_eq!(back, s);
        }
    }
}
