//! Core multi-tenant types for qcast.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Port used when a server string carries no usable port.
pub const DEFAULT_DB_PORT: u16 = 1433;

/// A tenant ("restaurant") identifier as stored in the directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.len() == id.len() {
            Self(id)
        } else {
            Self(trimmed.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TenantId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Host and port of a database server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// Parse a directory server string.
    ///
    /// Accepts `"host,port"` or a bare `"host"`. Never fails: a port that is
    /// missing, zero or not an integer falls back to [`DEFAULT_DB_PORT`].
    pub fn parse(raw: &str) -> Self {
        let mut parts = raw.split(',');
        let first = parts.next().unwrap_or_default();
        match (parts.next(), parts.next()) {
            (Some(port), None) => Self {
                host: first.trim().to_string(),
                port: port
                    .trim()
                    .parse::<u16>()
                    .ok()
                    .filter(|p| *p != 0)
                    .unwrap_or(DEFAULT_DB_PORT),
            },
            _ => Self {
                host: raw.trim().to_string(),
                port: DEFAULT_DB_PORT,
            },
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Identifies one physical connection pool: `host:port:database`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub host: String,
    pub port: u16,
    pub database: String,
}

impl PoolKey {
    pub fn new(host: impl Into<String>, port: u16, database: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            database: database.into(),
        }
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.host, self.port, self.database)
    }
}

/// Connection descriptor for one tenant, as read from the directory.
///
/// Immutable once fetched. `Debug` never prints the login secret.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantDescriptor {
    pub tenant_id: TenantId,
    pub display_name: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub login_user: String,
    pub login_secret: String,
}

impl TenantDescriptor {
    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            host: self.host.clone(),
            port: self.port,
        }
    }

    pub fn pool_key(&self) -> PoolKey {
        PoolKey::new(self.host.clone(), self.port, self.database.clone())
    }
}

impl fmt::Debug for TenantDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantDescriptor")
            .field("tenant_id", &self.tenant_id)
            .field("display_name", &self.display_name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("login_user", &self.login_user)
            .field("login_secret", &"[PROTECTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_and_port() {
        let ep = Endpoint::parse("10.0.0.5,14330");
        assert_eq!(ep.host, "10.0.0.5");
        assert_eq!(ep.port, 14330);
    }

    #[test]
    fn bare_host_uses_default_port() {
        let ep = Endpoint::parse("10.0.0.5");
        assert_eq!(ep.host, "10.0.0.5");
        assert_eq!(ep.port, DEFAULT_DB_PORT);
    }

    #[test]
    fn malformed_port_falls_back_to_default() {
        assert_eq!(Endpoint::parse("10.0.0.5,notanumber").port, DEFAULT_DB_PORT);
        assert_eq!(Endpoint::parse("10.0.0.5,0").port, DEFAULT_DB_PORT);
        assert_eq!(Endpoint::parse("10.0.0.5,99999").port, DEFAULT_DB_PORT);
        assert_eq!(Endpoint::parse(" db.local , 1500 ").host, "db.local");
        assert_eq!(Endpoint::parse(" db.local , 1500 ").port, 1500);
    }

    #[test]
    fn extra_commas_keep_whole_string_as_host() {
        let ep = Endpoint::parse("a,1,2");
        assert_eq!(ep.host, "a,1,2");
        assert_eq!(ep.port, DEFAULT_DB_PORT);
    }

    #[test]
    fn parsing_is_idempotent() {
        for raw in ["10.0.0.5,14330", "10.0.0.5", "x,y", "", ","] {
            let once = Endpoint::parse(raw);
            let again = Endpoint::parse(&format!("{},{}", once.host, once.port));
            assert_eq!(once, again, "input {raw:?}");
        }
    }

    #[test]
    fn pool_key_display() {
        let key = PoolKey::new("10.0.0.5", 14330, "REST_007");
        assert_eq!(key.to_string(), "10.0.0.5:14330:REST_007");
    }

    #[test]
    fn descriptor_debug_hides_secret() {
        let d = TenantDescriptor {
            tenant_id: TenantId::new("7"),
            display_name: "Siam".into(),
            host: "h".into(),
            port: 1433,
            database: "db".into(),
            login_user: "u".into(),
            login_secret: "hunter2".into(),
        };
        let dbg = format!("{d:?}");
        assert!(!dbg.contains("hunter2"));
        assert!(dbg.contains("[PROTECTED]"));
    }

    #[test]
    fn tenant_ids_are_trimmed() {
        assert_eq!(TenantId::new(" 7 ").as_str(), "7");
        assert!(TenantId::new("   ").is_empty());
    }
}
