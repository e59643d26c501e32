//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{
    collections::BTreeMap,
    net::SocketAddr,
    num::{NonZeroU32, NonZeroUsize},
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::{TtlClass, TtlTable};

pub use cli::{CliArgs, Command, InvalidateArgs, KvOverride, ServeArgs, ServeOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "transit-pulse";
const ENV_PREFIX: &str = "TRANSIT_PULSE";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_KV_TIMEOUT_MS: u64 = 100;
const DEFAULT_EXECUTOR_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_MEMORY_CAPACITY: u64 = 10_000;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub kv: KvSettings,
    pub cache: CacheSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Clone, Default)]
pub struct KvSettings {
    /// Redis URL; the in-process store is used when unset.
    pub redis_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub kv_timeout: Duration,
    pub executor_timeout: Duration,
    pub memory_capacity: NonZeroUsize,
    pub ttl: TtlTable,
    pub entities: BTreeMap<String, EntitySettings>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            kv_timeout: Duration::from_millis(DEFAULT_KV_TIMEOUT_MS),
            executor_timeout: Duration::from_millis(DEFAULT_EXECUTOR_TIMEOUT_MS),
            memory_capacity: NonZeroUsize::new(DEFAULT_MEMORY_CAPACITY as usize)
                .unwrap_or(NonZeroUsize::MIN),
            ttl: TtlTable::default(),
            entities: BTreeMap::new(),
        }
    }
}

/// `[cache.entities.<name>]` overrides of the built-in policy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntitySettings {
    pub ttl_class: Option<TtlClass>,
    /// Replaces the entity's built-in invalidation rules when present.
    pub invalidation_patterns: Option<Vec<PatternSettings>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternSettings {
    pub pattern: String,
    pub attributes: Vec<String>,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Invalidate(args)) => raw.apply_kv_override(&args.kv),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    kv: RawKvSettings,
    cache: RawCacheSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(max) = overrides.database_max_connections {
            self.database.max_connections = Some(max);
        }
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = Some(enabled);
        }
        if let Some(timeout) = overrides.cache_kv_timeout_ms {
            self.cache.kv_timeout_ms = Some(timeout);
        }
        if let Some(timeout) = overrides.cache_executor_timeout_ms {
            self.cache.executor_timeout_ms = Some(timeout);
        }

        self.apply_kv_override(&overrides.kv);
    }

    fn apply_kv_override(&mut self, overrides: &KvOverride) {
        if let Some(url) = overrides.redis_url.as_ref() {
            self.kv.redis_url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            database,
            kv,
            cache,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let database = build_database_settings(database)?;
        let kv = build_kv_settings(kv);
        let cache = build_cache_settings(cache)?;

        Ok(Self {
            server,
            logging,
            database,
            kv,
            cache,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = non_blank(database.url);
    let max_connections = non_zero_u32(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
            .into(),
        "database.max_connections",
    )?;

    Ok(DatabaseSettings {
        url,
        max_connections,
    })
}

fn build_kv_settings(kv: RawKvSettings) -> KvSettings {
    KvSettings {
        redis_url: non_blank(kv.redis_url),
    }
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let kv_timeout = positive_millis(
        cache.kv_timeout_ms.unwrap_or(DEFAULT_KV_TIMEOUT_MS),
        "cache.kv_timeout_ms",
    )?;
    let executor_timeout = positive_millis(
        cache
            .executor_timeout_ms
            .unwrap_or(DEFAULT_EXECUTOR_TIMEOUT_MS),
        "cache.executor_timeout_ms",
    )?;

    let capacity = cache.memory_capacity.unwrap_or(DEFAULT_MEMORY_CAPACITY);
    let memory_capacity = usize::try_from(capacity)
        .ok()
        .and_then(NonZeroUsize::new)
        .ok_or_else(|| {
            LoadError::invalid(
                "cache.memory_capacity",
                "must be greater than zero and fit in usize",
            )
        })?;

    let defaults = TtlTable::default();
    let ttl = TtlTable {
        short: ttl_seconds(cache.ttl_seconds.short, defaults.short, "cache.ttl_seconds.short")?,
        medium: ttl_seconds(
            cache.ttl_seconds.medium,
            defaults.medium,
            "cache.ttl_seconds.medium",
        )?,
        long: ttl_seconds(cache.ttl_seconds.long, defaults.long, "cache.ttl_seconds.long")?,
    };

    let mut entities = BTreeMap::new();
    for (name, entity) in cache.entities {
        let invalidation_patterns = match entity.invalidation_patterns {
            Some(patterns) => Some(
                patterns
                    .into_iter()
                    .map(PatternSettings::try_from)
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            None => None,
        };
        entities.insert(
            name,
            EntitySettings {
                ttl_class: entity.ttl_class,
                invalidation_patterns,
            },
        );
    }

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(true),
        kv_timeout,
        executor_timeout,
        memory_capacity,
        ttl,
        entities,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawKvSettings {
    redis_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    kv_timeout_ms: Option<u64>,
    executor_timeout_ms: Option<u64>,
    memory_capacity: Option<u64>,
    ttl_seconds: RawTtlSettings,
    entities: BTreeMap<String, RawEntitySettings>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawTtlSettings {
    short: Option<u64>,
    medium: Option<u64>,
    long: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawEntitySettings {
    ttl_class: Option<TtlClass>,
    invalidation_patterns: Option<Vec<RawPattern>>,
}

/// A pattern is either a bare string or a table limiting it to attributes.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawPattern {
    Plain(String),
    Filtered {
        pattern: String,
        #[serde(default)]
        attributes: Vec<String>,
    },
}

impl TryFrom<RawPattern> for PatternSettings {
    type Error = LoadError;

    fn try_from(raw: RawPattern) -> Result<Self, Self::Error> {
        let (pattern, attributes) = match raw {
            RawPattern::Plain(pattern) => (pattern, Vec::new()),
            RawPattern::Filtered {
                pattern,
                attributes,
            } => (pattern, attributes),
        };

        let pattern = pattern.trim().to_string();
        if pattern.is_empty() {
            return Err(LoadError::invalid(
                "cache.entities.invalidation_patterns",
                "patterns must not be empty",
            ));
        }

        Ok(Self {
            pattern,
            attributes,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn positive_millis(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_millis(value))
}

fn ttl_seconds(
    value: Option<u64>,
    default: Duration,
    key: &'static str,
) -> Result<Duration, LoadError> {
    match value {
        Some(0) => Err(LoadError::invalid(key, "must be greater than zero")),
        Some(seconds) => Ok(Duration::from_secs(seconds)),
        None => Ok(default),
    }
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
