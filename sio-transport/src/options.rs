//! Transport options and URL construction.

use std::collections::HashMap;

use sio_util::qs::qs_encode;

/// Options shared by every transport: host/port/path plus query and
/// header overrides layered on at open time.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub is_secure: bool,
    pub hostname: String,
    pub port: u16,
    pub path: String,
    pub is_timestamp_requests: bool,
    pub timestamp_param: String,
    pub query: Vec<(String, String)>,
    pub extra_headers: HashMap<String, Vec<String>>,
    pub is_trust_all_certs: bool,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            is_secure: false,
            hostname: "localhost".to_string(),
            port: 0,
            path: "/engine.io/".to_string(),
            is_timestamp_requests: false,
            timestamp_param: "t".to_string(),
            query: Vec::new(),
            extra_headers: HashMap::new(),
            is_trust_all_certs: false,
        }
    }
}

fn base36(mut n: u128) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut buf = Vec::new();
    while n > 0 {
        buf.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    buf.reverse();
    String::from_utf8(buf).unwrap()
}

impl TransportOptions {
    /// Build `scheme://host[:port]path[?query]`
    ///
    /// `now_ms` supplies the current time in milliseconds for the
    /// optional timestamp query parameter, since this crate does not
    /// call `SystemTime::now()` internally.
    pub fn uri(&self, secure_scheme: &str, insecure_scheme: &str, now_ms: u128) -> String {
        let scheme = if self.is_secure {
            secure_scheme
        } else {
            insecure_scheme
        };

        let host = if self.hostname.contains(':') {
            format!("[{}]", self.hostname)
        } else {
            self.hostname.clone()
        };

        let default_port = if self.is_secure { 443 } else { 80 };
        let port_part = if self.port > 0 && self.port != default_port {
            format!(":{}", self.port)
        } else {
            String::new()
        };

        let mut query = self.query.clone();
        if self.is_timestamp_requests {
            query.push((self.timestamp_param.clone(), base36(now_ms)));
        }

        let query_part = if query.is_empty() {
            String::new()
        } else {
            let pairs: Vec<(&str, &str)> =
                query.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
            format!("?{}", qs_encode(&pairs))
        };

        format!("{scheme}://{host}{port_part}{}{query_part}", self.path)
    }

    /// Insert or replace a query parameter, preserving insertion order
    /// of the remaining parameters.
    pub fn set_query_param(&mut self, key: &str, value: &str) {
        if let Some(entry) = self.query.iter_mut().find(|(k, _)| k == key) {
            entry.1 = value.to_string();
        } else {
            self.query.push((key.to_string(), value.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uri_omits_default_port() {
        let opts = TransportOptions {
            is_secure: true,
            hostname: "example.com".into(),
            port: 443,
            path: "/engine.io/".into(),
            ..Default::default()
        };
        assert_eq!(opts.uri("https", "http", 0), "https://example.com/engine.io/");
    }

    #[test]
    fn uri_includes_nondefault_port() {
        let opts = TransportOptions {
            hostname: "example.com".into(),
            port: 8080,
            path: "/engine.io/".into(),
            ..Default::default()
        };
        assert_eq!(opts.uri("https", "http", 0), "http://example.com:8080/engine.io/");
    }

    #[test]
    fn uri_brackets_ipv6_host() {
        let opts = TransportOptions {
            hostname: "::1".into(),
            port: 3000,
            path: "/engine.io/".into(),
            ..Default::default()
        };
        assert_eq!(opts.uri("https", "http", 0), "http://[::1]:3000/engine.io/");
    }

    #[test]
    fn uri_appends_query_and_timestamp() {
        let opts = TransportOptions {
            hostname: "example.com".into(),
            path: "/engine.io/".into(),
            is_timestamp_requests: true,
            timestamp_param: "t".into(),
            query: vec![("EIO".into(), "4".into()), ("transport".into(), "polling".into())],
            ..Default::default()
        };
        let uri = opts.uri("https", "http", 36);
        assert_eq!(uri, "http://example.com/engine.io/?EIO=4&transport=polling&t=10");
    }

    #[test]
    fn set_query_param_replaces_existing_key() {
        let mut opts = TransportOptions::default();
        opts.set_query_param("sid", "one");
        opts.set_query_param("sid", "two");
        assert_eq!(opts.query, vec![("sid".to_string(), "two".to_string())]);
    }
}
