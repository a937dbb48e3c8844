//! Normalization of user-supplied identifiers into label-safe values.

/// Convert a phone number into a valid label value.
///
/// Keeps `[A-Za-z0-9._-]`, maps spaces, plus signs, and parentheses to
/// `-`, drops everything else, then strips leading and trailing
/// non-alphanumeric characters. Idempotent: sanitizing an already
/// sanitized value is a no-op.
pub fn sanitize_phone(phone: &str) -> String {
    let mut out = String::with_capacity(phone.len());
    for c in phone.chars() {
        match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => out.push(c),
            ' ' | '+' | '(' | ')' => out.push('-'),
            _ => {}
        }
    }
    out.trim_matches(|c| matches!(c, '-' | '_' | '.')).to_string()
}

/// Maximum fingerprint length kept after filtering.
const FINGERPRINT_MAX_LEN: usize = 16;

/// Filter a browser fingerprint down to hex characters, truncated to 16.
///
/// A fingerprint with no hex characters at all collapses to the empty
/// string, which callers treat as "no fingerprint supplied".
pub fn sanitize_fingerprint(fingerprint: &str) -> String {
    fingerprint
        .chars()
        .filter(|c| c.is_ascii_hexdigit())
        .take(FINGERPRINT_MAX_LEN)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phone_with_spaces_and_plus() {
        assert_eq!(sanitize_phone("+61 435 999 768"), "61-435-999-768");
    }

    #[test]
    fn phone_with_parentheses() {
        assert_eq!(sanitize_phone("(415) 555-0100"), "415--555-0100");
    }

    #[test]
    fn phone_drops_unknown_characters() {
        assert_eq!(sanitize_phone("04#35@99"), "043599");
    }

    #[test]
    fn phone_strips_leading_and_trailing_separators() {
        assert_eq!(sanitize_phone("...-415.555_"), "415.555");
    }

    #[test]
    fn phone_sanitization_is_idempotent() {
        for raw in ["+61 435 999 768", "(415) 555-0100", "..a-b_c.."] {
            let once = sanitize_phone(raw);
            assert_eq!(sanitize_phone(&once), once);
        }
    }

    #[test]
    fn empty_phone_stays_empty() {
        assert_eq!(sanitize_phone(""), "");
        assert_eq!(sanitize_phone("+++"), "");
    }

    #[test]
    fn fingerprint_keeps_hex_only() {
        assert_eq!(sanitize_fingerprint("abc123deadbeef01"), "abc123deadbeef01");
        assert_eq!(sanitize_fingerprint("zz-ab:12"), "ab12");
    }

    #[test]
    fn fingerprint_truncates_to_sixteen() {
        assert_eq!(
            sanitize_fingerprint("0123456789abcdef0123"),
            "0123456789abcdef"
        );
    }

    #[test]
    fn fingerprint_of_non_hex_collapses_to_empty() {
        assert_eq!(sanitize_fingerprint("ghijklmnop!@#"), "");
    }
}
