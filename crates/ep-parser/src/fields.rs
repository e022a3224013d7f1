//! Field-extraction helpers shared by every line shape. Each returns `None`
//! on any malformed input rather than propagating an error — per-field
//! degradation, never line rejection.

/// The MTA message id: three dash-separated segments, first 6 alphanumeric,
/// then 6 digits, then 2 alphanumeric (Exim-style `1rABCD-123456-78`).
pub fn extract_message_id(rest: &str) -> Option<(&str, &str)> {
    let token = rest.split_whitespace().next()?;
    let parts: Vec<&str> = token.split('-').collect();
    if parts.len() != 3 {
        return None;
    }
    let valid = parts[0].len() >= 6
        && parts[0].chars().all(|c| c.is_ascii_alphanumeric())
        && parts[1].len() == 6
        && parts[1].chars().all(|c| c.is_ascii_digit())
        && parts[2].len() >= 2
        && parts[2].chars().all(|c| c.is_ascii_alphanumeric());
    if !valid {
        return None;
    }
    let remainder = rest[token.len()..].trim_start();
    Some((token, remainder))
}

/// Extract a `KEY=value` token's value from anywhere in the line.
/// `value` is the whitespace-delimited token following `KEY=`.
pub fn extract_kv(line: &str, key: &str) -> Option<String> {
    let needle = format!("{key}=");
    let idx = line.find(&needle)?;
    let value_start = idx + needle.len();
    let value = line[value_start..].split_whitespace().next()?;
    Some(value.to_owned())
}

pub fn extract_u64_kv(line: &str, key: &str) -> Option<u64> {
    extract_kv(line, key)?.parse().ok()
}

/// Extract the content of the first `[...]` bracketed token (IP/host
/// literal).
pub fn extract_bracketed(line: &str) -> Option<String> {
    let start = line.find('[')?;
    let end = line[start..].find(']')? + start;
    Some(line[start + 1..end].to_owned())
}

/// Extract the content of the first `(...)` parenthesised token.
pub fn extract_parenthesised(line: &str) -> Option<String> {
    let start = line.find('(')?;
    let end = line[start..].find(')')? + start;
    Some(line[start + 1..end].to_owned())
}

/// The address immediately after a marker like `<=`, `=>`, `==`.
pub fn extract_address_after(line: &str, marker: &str) -> Option<String> {
    let idx = line.find(marker)?;
    let after = line[idx + marker.len()..].trim_start();
    let addr = after.split_whitespace().next()?;
    Some(addr.trim_end_matches(',').to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_valid_message_id() {
        let (id, rest) = extract_message_id("1rABCD-123456-78 <= sender@example.com").unwrap();
        assert_eq!(id, "1rABCD-123456-78");
        assert_eq!(rest, "<= sender@example.com");
    }

    #[test]
    fn rejects_malformed_message_id() {
        assert!(extract_message_id("not-an-id here").is_none());
    }

    #[test]
    fn extracts_kv_host_and_size() {
        let line = "... H=mail.example.com [1.2.3.4] P=esmtp S=1234";
        assert_eq!(extract_kv(line, "H").unwrap(), "mail.example.com");
        assert_eq!(extract_u64_kv(line, "S").unwrap(), 1234);
    }

    #[test]
    fn missing_kv_returns_none() {
        assert!(extract_kv("no keys here", "H").is_none());
    }

    #[test]
    fn extracts_bracketed_ip() {
        assert_eq!(
            extract_bracketed("H=mail.example.com [192.168.1.1] rest").unwrap(),
            "192.168.1.1"
        );
    }

    #[test]
    fn extracts_parenthesised_reason() {
        assert_eq!(
            extract_parenthesised("== addr R=x T=y (421 rejected)").unwrap(),
            "421 rejected"
        );
    }

    #[test]
    fn extracts_address_after_marker() {
        assert_eq!(
            extract_address_after("1x-1-1 <= sender@example.com H=x", "<=").unwrap(),
            "sender@example.com"
        );
    }
}
