//! RFC 3986 percent-encoding and query-string helpers.
//!
//! The transport layer builds Engine.IO handshake/poll URLs by hand
//! (`EIO=4&transport=polling&t=...&sid=...`), so encoding needs to be
//! explicit and dependency-light rather than routed through a full URL
//! builder. Surfaced as a standalone pair of functions since this crate
//! has no `url` dependency of its own.

/// Bytes that never need escaping in a query component: `A-Z a-z 0-9
/// - _ . ! ~ * ' ( )`, the unreserved set this client's wire format
/// calls for (RFC 3986's core unreserved set plus the RFC 2396 "mark"
/// characters Socket.IO query strings leave unescaped).
fn is_unreserved(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'!' | b'~' | b'*' | b'\'' | b'(' | b')')
}

/// Percent-encode `input` for use as a single query-string value.
pub fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for &b in input.as_bytes() {
        if is_unreserved(b) {
            out.push(b as char);
        } else {
            out.push('%');
            out.push_str(&format!("{:02X}", b));
        }
    }
    out
}

/// Decode a percent-encoded query-string value. `+` is treated as a
/// literal space, matching `application/x-www-form-urlencoded`.
pub fn percent_decode(input: &str) -> Result<String, String> {
    let bytes = input.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' => {
                if i + 2 >= bytes.len() {
                    return Err(format!("truncated percent-escape at offset {i}"));
                }
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3])
                    .map_err(|_| format!("invalid percent-escape at offset {i}"))?;
                let byte = u8::from_str_radix(hex, 16)
                    .map_err(|_| format!("invalid percent-escape at offset {i}"))?;
                out.push(byte);
                i += 3;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8(out).map_err(|e| format!("decoded bytes are not valid UTF-8: {e}"))
}

/// Serialize `pairs` into a `key=value&key=value` query string, in the
/// given order, with both keys and values percent-encoded.
pub fn qs_encode(pairs: &[(&str, &str)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", percent_encode(k), percent_encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Parse a `key=value&key=value` query string into decoded pairs, in
/// encounter order. A key with no `=` decodes to an empty value. Pairs
/// whose decoded key is empty (e.g. a leading `=value`) are dropped.
pub fn qs_decode(query: &str) -> Result<Vec<(String, String)>, String> {
    if query.is_empty() {
        return Ok(Vec::new());
    }
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => Ok((percent_decode(k)?, percent_decode(v)?)),
            None => Ok((percent_decode(pair)?, String::new())),
        })
        .filter(|result| !matches!(result, Ok((k, _)) if k.is_empty()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_leaves_unreserved_characters_untouched() {
        assert_eq!(percent_encode("abcXYZ019-_.~"), "abcXYZ019-_.~");
        assert_eq!(percent_encode("!*'()"), "!*'()");
    }

    #[test]
    fn encode_escapes_reserved_and_non_ascii() {
        assert_eq!(percent_encode("a b"), "a%20b");
        assert_eq!(percent_encode("a=b&c"), "a%3Db%26c");
    }

    #[test]
    fn decode_reverses_encode() {
        let original = "hello world & friends = 100%";
        let encoded = percent_encode(original);
        assert_eq!(percent_decode(&encoded).unwrap(), original);
    }

    #[test]
    fn decode_treats_plus_as_space() {
        assert_eq!(percent_decode("a+b").unwrap(), "a b");
    }

    #[test]
    fn decode_rejects_truncated_escape() {
        assert!(percent_decode("%4").is_err());
        assert!(percent_decode("%").is_err());
    }

    #[test]
    fn decode_rejects_invalid_hex() {
        assert!(percent_decode("%ZZ").is_err());
    }

    #[test]
    fn qs_encode_decode_round_trip() {
        let pairs = [("EIO", "4"), ("transport", "polling"), ("sid", "abc 123")];
        let encoded = qs_encode(&pairs);
        assert_eq!(encoded, "EIO=4&transport=polling&sid=abc%20123");
        let decoded = qs_decode(&encoded).unwrap();
        assert_eq!(
            decoded,
            vec![
                ("EIO".to_string(), "4".to_string()),
                ("transport".to_string(), "polling".to_string()),
                ("sid".to_string(), "abc 123".to_string()),
            ]
        );
    }

    #[test]
    fn qs_decode_empty_string_is_empty_list() {
        assert_eq!(qs_decode("").unwrap(), Vec::new());
    }

    #[test]
    fn qs_decode_skips_pairs_with_empty_key() {
        assert_eq!(
            qs_decode("=value&a=1").unwrap(),
            vec![("a".to_string(), "1".to_string())]
        );
    }

    #[test]
    fn qs_decode_key_without_value_defaults_to_empty() {
        assert_eq!(
            qs_decode("b64=1").unwrap(),
            vec![("b64".to_string(), "1".to_string())]
        );
        assert_eq!(
            qs_decode("flag").unwrap(),
            vec![("flag".to_string(), String::new())]
        );
    }
}
