use std::time::Duration;

use qcast_auth::DEFAULT_TOKEN_TTL;
use qcast_axum::RealtimeSettings;
use qcast_core::{ConnectTarget, Endpoint, PoolSettings, QcastConfig, QcastConfigSnapshot, DEFAULT_DIRECTORY_TABLE};
use qcast_mssql::MssqlOptions;
use tracing::warn;

pub const ENV_PREFIX: &str = "QCAST__";

const DEV_JWT_SECRET: &str = "qcast-development-secret";

/// Environment variable -> config key.
const ENV_KEYS: &[(&str, &str)] = &[
    ("PORT", "http.port"),
    ("HTTP_HOST", "http.host"),
    ("DB_MAIN_SERVER", "directory.server"),
    ("DB_MAIN_PORT", "directory.port"),
    ("DB_MAIN_DATABASE", "directory.database"),
    ("DB_MAIN_USER", "directory.user"),
    ("DB_MAIN_PASSWORD", "directory.password"),
    ("DB_MAIN_TABLE", "directory.table"),
    ("JWT_SECRET", "auth.secret"),
    ("TOKEN_TTL", "auth.token_ttl"),
    ("DB_CONNECT_TIMEOUT", "db.connect_timeout"),
    ("DB_REQUEST_TIMEOUT", "db.request_timeout"),
    ("DB_ENCRYPT", "db.encrypt"),
    ("DB_TRUST_SERVER_CERTIFICATE", "db.trust_server_certificate"),
    ("DB_POOL_MAX", "pool.max_size"),
    ("DB_POOL_MIN", "pool.min_idle"),
    ("DB_POOL_IDLE_TIMEOUT", "pool.idle_timeout"),
    ("WS_HEARTBEAT_INTERVAL", "ws.heartbeat_interval"),
    ("WS_MAX_MISSED_HEARTBEATS", "ws.max_missed_heartbeats"),
    ("WS_MAX_FRAME_SIZE", "ws.max_frame_size"),
];

const DEFAULTS: &[(&str, &str)] = &[
    ("http.host", "0.0.0.0"),
    ("http.port", "3000"),
    ("directory.table", DEFAULT_DIRECTORY_TABLE),
    ("auth.token_ttl", "24h"),
    ("db.connect_timeout", "100s"),
    ("db.request_timeout", "100s"),
    ("db.encrypt", "true"),
    ("db.trust_server_certificate", "true"),
    ("pool.max_size", "10"),
    ("pool.min_idle", "0"),
    ("pool.idle_timeout", "100s"),
    ("ws.heartbeat_interval", "30s"),
    ("ws.max_missed_heartbeats", "2"),
    ("ws.max_frame_size", "262144"),
];

/// Process environment, then `QCAST__` overrides, then defaults.
pub fn load() -> QcastConfig {
    load_from(std::env::vars())
}

pub fn load_from<I>(vars: I) -> QcastConfig
where
    I: IntoIterator<Item = (String, String)>,
{
    let vars: Vec<(String, String)> = vars.into_iter().collect();
    let mut cfg = QcastConfig::new();

    for (env, key) in ENV_KEYS {
        let value = vars
            .iter()
            .find(|(name, value)| name == env && !value.trim().is_empty())
            .map(|(_, value)| value.clone());
        if let Some(value) = value {
            cfg.set(*key, value);
        }
    }

    cfg.load_pairs_prefixed(ENV_PREFIX, vars);

    for (key, value) in DEFAULTS {
        cfg.set_default(*key, *value);
    }
    cfg
}

/// Typed view of everything the server needs at start-up.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: String,
    pub directory: ConnectTarget,
    pub directory_table: String,
    pub jwt_secret: String,
    pub token_ttl: Duration,
    pub pool: PoolSettings,
    pub mssql: MssqlOptions,
    pub realtime: RealtimeSettings,
}

impl ServerSettings {
    pub fn from_config(cfg: &QcastConfig) -> anyhow::Result<Self> {
        let snap = cfg.snapshot();

        let pool = PoolSettings {
            max_size: snap.get_usize("pool.max_size").unwrap_or(10),
            min_idle: snap.get_usize("pool.min_idle").unwrap_or(0),
            idle_timeout: duration(&snap, "pool.idle_timeout", Duration::from_secs(100)),
            connect_timeout: duration(&snap, "db.connect_timeout", Duration::from_secs(100)),
            request_timeout: duration(&snap, "db.request_timeout", Duration::from_secs(100)),
        };

        let server = snap
            .get_string("directory.server")
            .ok_or_else(|| anyhow::anyhow!("DB_MAIN_SERVER is not set"))?;
        let endpoint = Endpoint::parse(&server);
        let port = match snap.get("directory.port") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|_| anyhow::anyhow!("DB_MAIN_PORT is not a valid port: {raw}"))?,
            None => endpoint.port,
        };

        let directory = ConnectTarget {
            host: endpoint.host,
            port,
            database: snap
                .get_string("directory.database")
                .ok_or_else(|| anyhow::anyhow!("DB_MAIN_DATABASE is not set"))?,
            user: snap.get_string("directory.user").unwrap_or_default(),
            secret: snap.get_string("directory.password").unwrap_or_default(),
            settings: pool.clone(),
        };

        let jwt_secret = match snap.get_string("auth.secret") {
            Some(secret) => secret,
            None => {
                warn!("JWT_SECRET is not set, using the development signing secret");
                DEV_JWT_SECRET.to_string()
            }
        };

        let defaults = RealtimeSettings::default();
        let host = snap.get("http.host").unwrap_or("0.0.0.0");
        let http_port = snap.get_u64("http.port").unwrap_or(3000);

        Ok(Self {
            addr: format!("{host}:{http_port}"),
            directory,
            directory_table: snap
                .get_string("directory.table")
                .unwrap_or_else(|| DEFAULT_DIRECTORY_TABLE.to_string()),
            jwt_secret,
            token_ttl: duration(&snap, "auth.token_ttl", DEFAULT_TOKEN_TTL),
            pool,
            mssql: MssqlOptions {
                encrypt: snap.get_bool("db.encrypt").unwrap_or(true),
                trust_server_certificate: snap.get_bool("db.trust_server_certificate").unwrap_or(true),
                ..MssqlOptions::default()
            },
            realtime: RealtimeSettings {
                heartbeat_interval: duration(&snap, "ws.heartbeat_interval", defaults.heartbeat_interval),
                max_missed_heartbeats: snap
                    .get_u64("ws.max_missed_heartbeats")
                    .and_then(|n| u32::try_from(n).ok())
                    .filter(|n| *n > 0)
                    .unwrap_or(defaults.max_missed_heartbeats),
                max_frame_size: snap.get_usize("ws.max_frame_size").unwrap_or(defaults.max_frame_size),
            },
        })
    }
}

fn duration(snap: &QcastConfigSnapshot, key: &str, fallback: Duration) -> Duration {
    match snap.get(key) {
        None => fallback,
        Some(raw) => snap.get_duration(key).unwrap_or_else(|| {
            warn!(key, value = raw, "unparseable duration, using default");
            fallback
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn base() -> Vec<(String, String)> {
        vars(&[
            ("DB_MAIN_SERVER", "10.1.1.1,14330"),
            ("DB_MAIN_DATABASE", "CFS_Main"),
            ("DB_MAIN_USER", "sa"),
            ("DB_MAIN_PASSWORD", "pw"),
        ])
    }

    #[test]
    fn defaults_fill_the_gaps() {
        let settings = ServerSettings::from_config(&load_from(base())).unwrap();
        assert_eq!(settings.addr, "0.0.0.0:3000");
        assert_eq!(settings.directory.host, "10.1.1.1");
        assert_eq!(settings.directory.port, 14330);
        assert_eq!(settings.directory_table, DEFAULT_DIRECTORY_TABLE);
        assert_eq!(settings.token_ttl, Duration::from_secs(24 * 60 * 60));
        assert_eq!(settings.pool, PoolSettings::default());
        assert_eq!(settings.realtime.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(settings.realtime.max_missed_heartbeats, 2);
        assert_eq!(settings.jwt_secret, DEV_JWT_SECRET);
    }

    #[test]
    fn explicit_port_overrides_server_string() {
        let mut env = base();
        env.extend(vars(&[("DB_MAIN_PORT", "1500"), ("PORT", "8080"), ("JWT_SECRET", "s")]));
        let settings = ServerSettings::from_config(&load_from(env)).unwrap();
        assert_eq!(settings.directory.port, 1500);
        assert_eq!(settings.addr, "0.0.0.0:8080");
        assert_eq!(settings.jwt_secret, "s");
    }

    #[test]
    fn prefixed_overrides_win_over_plain_variables() {
        let mut env = base();
        env.extend(vars(&[("DB_POOL_MAX", "5"), ("QCAST__POOL__MAX_SIZE", "25")]));
        let settings = ServerSettings::from_config(&load_from(env)).unwrap();
        assert_eq!(settings.pool.max_size, 25);
    }

    #[test]
    fn durations_accept_millis() {
        let mut env = base();
        env.extend(vars(&[("DB_REQUEST_TIMEOUT", "15000"), ("WS_HEARTBEAT_INTERVAL", "10s")]));
        let settings = ServerSettings::from_config(&load_from(env)).unwrap();
        assert_eq!(settings.pool.request_timeout, Duration::from_secs(15));
        assert_eq!(settings.realtime.heartbeat_interval, Duration::from_secs(10));
    }

    #[test]
    fn directory_server_is_required() {
        let err = ServerSettings::from_config(&load_from(vars(&[("DB_MAIN_DATABASE", "x")]))).unwrap_err();
        assert!(err.to_string().contains("DB_MAIN_SERVER"));
    }
}
