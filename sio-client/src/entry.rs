//! The `io()` factory and per-origin Manager cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, Weak};

use serde_json::Value as JsonValue;

use sio_core::error::SioResult;

use crate::manager::{ManagerOptions, SocketManager};
use crate::socket::NamespaceSocket;

/// Minimum level a caller wants emitted. Installing an actual
/// `tracing` subscriber is the embedding binary's job (see `sio-cli`);
/// this crate only ever emits events, per the ambient logging
/// convention this workspace carries from its teacher. The field
/// exists so a caller can thread it through to whatever subscriber
/// they install themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Copy)]
pub struct LoggingConfig {
    pub min_level: LogLevel,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { min_level: LogLevel::Info }
    }
}

/// The three-section configuration bag the entry factory accepts
///.
#[derive(Clone)]
pub struct IoConfig {
    pub logging: LoggingConfig,
    pub manager: ManagerOptions,
    pub force_new: bool,
    pub multiplex: bool,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            manager: ManagerOptions::default(),
            force_new: false,
            multiplex: true,
        }
    }
}

fn manager_registry() -> &'static Mutex<HashMap<String, Weak<SocketManager>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<String, Weak<SocketManager>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

fn origin_key(parsed: &url::Url) -> String {
    let scheme = parsed.scheme();
    let host = parsed.host_str().unwrap_or("localhost");
    let port = parsed.port_or_known_default().unwrap_or(0);
    format!("{scheme}://{host}:{port}")
}

fn auth_to_json(auth: &HashMap<String, String>) -> JsonValue {
    JsonValue::Object(
        auth.iter()
            .map(|(k, v)| (k.clone(), JsonValue::String(v.clone())))
            .collect(),
    )
}

/// Connect to `uri`, reusing an existing Manager for the same origin
/// unless `force_new`, `!multiplex`, or the existing Manager already
/// has a Socket for this namespace.
pub fn io(uri: &str, config: IoConfig) -> SioResult<Arc<NamespaceSocket>> {
    let parsed = url::Url::parse(uri)?;
    let namespace = match parsed.path() {
        "" | "/" => "/".to_string(),
        other => other.to_string(),
    };
    let key = origin_key(&parsed);

    let mut registry = manager_registry().lock().unwrap();
    let existing = registry.get(&key).and_then(Weak::upgrade);

    let must_create_new = config.force_new
        || !config.multiplex
        || existing.as_ref().map(|m| m.has_socket(&namespace)).unwrap_or(true);

    let manager = if must_create_new {
        let manager = SocketManager::new(uri, config.manager.clone());
        registry.insert(key, Arc::downgrade(&manager));
        manager
    } else {
        existing.expect("must_create_new is false only when an existing manager was found")
    };
    drop(registry);

    let auth = auth_to_json(&config.manager.auth);
    Ok(manager.socket(&namespace, auth))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnecting_to_the_same_origin_reuses_the_manager() {
        let a = io("http://example.test:1234/", IoConfig::default()).unwrap();
        let b = io("http://example.test:1234/chat", IoConfig::default()).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn force_new_always_creates_a_fresh_manager() {
        let mut config = IoConfig::default();
        config.force_new = true;
        let a = io("http://force-new.test/", IoConfig::default()).unwrap();
        let b = io("http://force-new.test/", config).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn default_namespace_is_root_for_a_bare_origin() {
        let socket = io("http://bare-origin.test", IoConfig::default()).unwrap();
        assert_eq!(socket.namespace(), "/");
    }
}
