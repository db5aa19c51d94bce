//! # qcast Configuration
//!
//! A minimal string key/value store, in the spirit of `app.set()` /
//! `app.get()`. Loaders (env files, process environment) live in the
//! binary; the core only stores and parses values.
//!
//! ```rust
//! use qcast_core::QcastConfig;
//! let mut cfg = QcastConfig::new();
//!
//! cfg.set("pool.max_size", "10");
//! cfg.set("db.request_timeout", "100s");
//!
//! let snap = cfg.snapshot();
//! assert_eq!(snap.get_usize("pool.max_size"), Some(10));
//! assert_eq!(snap.get_duration("db.request_timeout").map(|d| d.as_secs()), Some(100));
//! ```
//!
//! ## Environment overrides
//! `QcastConfig::load_pairs_prefixed("QCAST__", vars)` maps
//! `QCAST__POOL__MAX_SIZE=25` to `pool.max_size = 25`. The server feeds it
//! the process environment after applying the plain variables.

use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Default)]
pub struct QcastConfig {
    values: HashMap<String, String>,
}

impl QcastConfig {
    /// Create an empty config store.
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
        }
    }

    /// Set a configuration key to a string value.
    pub fn set<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.values.insert(key.into(), value.into());
    }

    /// Set a key only when it has no value yet.
    pub fn set_default<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.values.entry(key.into()).or_insert_with(|| value.into());
    }

    /// Get a configuration value by key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }

    /// Copy every `PREFIX__A__B=value` pair into `a.b = value`.
    pub fn load_pairs_prefixed<I>(&mut self, prefix: &str, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            if let Some(stripped) = key.strip_prefix(prefix) {
                let normalized = stripped.to_lowercase().replace("__", ".");
                self.values.insert(normalized, value);
            }
        }
    }

    pub fn snapshot(&self) -> QcastConfigSnapshot {
        QcastConfigSnapshot::new(self.values.clone())
    }
}

/// Read-only view handed to components at construction time.
#[derive(Debug, Clone, Default)]
pub struct QcastConfigSnapshot {
    map: HashMap<String, String>,
}

impl QcastConfigSnapshot {
    pub(crate) fn new(map: HashMap<String, String>) -> Self {
        Self { map }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(|s| s.as_str())
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.map.get(key).cloned()
    }

    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.get(key).and_then(|v| v.trim().parse::<usize>().ok())
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.trim().parse::<u64>().ok())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|v| v.trim().parse::<bool>().ok())
    }

    /// Durations accept humantime strings ("100s", "24h") or bare
    /// milliseconds ("100000").
    pub fn get_duration(&self, key: &str) -> Option<Duration> {
        let raw = self.get(key)?.trim();
        if let Ok(ms) = raw.parse::<u64>() {
            return Some(Duration::from_millis(ms));
        }
        humantime::parse_duration(raw).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixed_pairs_are_normalized() {
        let mut cfg = QcastConfig::new();
        cfg.load_pairs_prefixed(
            "QCAST__",
            vec![
                ("QCAST__POOL__MAX_SIZE".to_string(), "25".to_string()),
                ("OTHER".to_string(), "x".to_string()),
            ],
        );
        assert_eq!(cfg.get("pool.max_size"), Some("25"));
        assert_eq!(cfg.get("other"), None);
    }

    #[test]
    fn durations_accept_millis_and_humantime() {
        let mut cfg = QcastConfig::new();
        cfg.set("a", "100000");
        cfg.set("b", "24h");
        cfg.set("c", "soon");
        let snap = cfg.snapshot();
        assert_eq!(snap.get_duration("a"), Some(Duration::from_secs(100)));
        assert_eq!(snap.get_duration("b"), Some(Duration::from_secs(24 * 60 * 60)));
        assert_eq!(snap.get_duration("c"), None);
    }

    #[test]
    fn set_default_does_not_override() {
        let mut cfg = QcastConfig::new();
        cfg.set("http.port", "8080");
        cfg.set_default("http.port", "3000");
        cfg.set_default("http.host", "0.0.0.0");
        assert_eq!(cfg.get("http.port"), Some("8080"));
        assert_eq!(cfg.get("http.host"), Some("0.0.0.0"));
    }
}
