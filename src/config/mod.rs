//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;
#[cfg(test)]
mod tests;

pub use cli::*;

use std::{
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

use crate::application::circuit_breaker::BreakerConfig;
use crate::application::retry::RetryPolicy;
use crate::cache::CacheBackendKind;
use crate::domain::normalize::{DEFAULT_MAX_PAYLOAD_BYTES, NormalizerConfig};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "eventgate";
const ENV_PREFIX: &str = "EVENTGATE";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_ADMIN_HOST: &str = "127.0.0.1";
const DEFAULT_PUBLIC_PORT: u16 = 8080;
const DEFAULT_ADMIN_PORT: u16 = 8081;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_PERSISTENCE_MAX_ATTEMPTS: u64 = 3;
const DEFAULT_PERSISTENCE_INITIAL_BACKOFF_MS: u64 = 50;
const DEFAULT_PERSISTENCE_MAX_BACKOFF_MS: u64 = 1_000;
const DEFAULT_PERSISTENCE_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_CACHE_KEY_PREFIX: &str = "eventgate";
const DEFAULT_CACHE_EVENT_TTL_SECS: u64 = 300;
const DEFAULT_CACHE_CLAIM_TTL_SECS: u64 = 120;
const DEFAULT_CACHE_MAX_ENTRIES: u64 = 10_000;
const DEFAULT_CACHE_SWEEP_INTERVAL_SECS: u64 = 300;
const DEFAULT_CACHE_TIMEOUT_MS: u64 = 250;
const DEFAULT_BREAKER_FAILURE_THRESHOLD: u64 = 5;
const DEFAULT_BREAKER_OPEN_SECS: u64 = 30;
const DEFAULT_BREAKER_SUCCESS_THRESHOLD: u64 = 2;
const DEFAULT_API_RATE_LIMIT_WINDOW_SECS: u64 = 60;
const DEFAULT_API_RATE_LIMIT_MAX_REQUESTS: u64 = 600;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub persistence: PersistenceSettings,
    pub cache: CacheSettings,
    pub ingest: IngestSettings,
    pub api_rate_limit: ApiRateLimitSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub public_addr: SocketAddr,
    pub admin_addr: SocketAddr,
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

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseKind {
    Postgres,
    Memory,
}

impl DatabaseKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DatabaseKind::Postgres => "postgres",
            DatabaseKind::Memory => "memory",
        }
    }
}

impl FromStr for DatabaseKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(DatabaseKind::Postgres),
            "memory" => Ok(DatabaseKind::Memory),
            other => Err(format!("unknown database kind `{other}`")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub kind: DatabaseKind,
    /// Always present when `kind` is `Postgres`.
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct PersistenceSettings {
    pub max_attempts: NonZeroU32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub operation_timeout: Duration,
}

impl PersistenceSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.get(),
            initial_backoff: self.initial_backoff,
            max_backoff: self.max_backoff,
            operation_timeout: self.operation_timeout,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub backend: CacheBackendKind,
    pub key_prefix: String,
    pub event_ttl: Duration,
    pub claim_ttl: Duration,
    pub max_entries: NonZeroUsize,
    pub sweep_interval: Duration,
    pub operation_timeout: Duration,
    pub breaker: BreakerConfig,
}

#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub max_payload_bytes: usize,
    pub treat_edits_as_new_events: bool,
    pub enforce_source_ordering: bool,
}

impl IngestSettings {
    pub fn normalizer_config(&self) -> NormalizerConfig {
        NormalizerConfig {
            max_payload_bytes: self.max_payload_bytes,
            treat_edits_as_new_events: self.treat_edits_as_new_events,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiRateLimitSettings {
    pub window_seconds: NonZeroU32,
    pub max_requests: NonZeroU32,
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
        Some(Command::Migrate(args)) => {
            raw.apply_database_override(&args.database);
            // Migrations only make sense against Postgres.
            raw.database.kind = Some(DatabaseKind::Postgres.as_str().to_string());
        }
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    persistence: RawPersistenceSettings,
    cache: RawCacheSettings,
    ingest: RawIngestSettings,
    api_rate_limit: RawApiRateLimitSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(host) = overrides.server_admin_host.as_ref() {
            self.server.admin_host = Some(host.clone());
        }
        if let Some(port) = overrides.public_port {
            self.server.public_port = Some(port);
        }
        if let Some(port) = overrides.admin_port {
            self.server.admin_port = Some(port);
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
        if let Some(kind) = overrides.database_kind.as_ref() {
            self.database.kind = Some(kind.clone());
        }
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(max) = overrides.database_max_connections {
            self.database.max_connections = Some(max);
        }
        if let Some(backend) = overrides.cache_backend.as_ref() {
            self.cache.backend = Some(backend.clone());
        }
        if let Some(url) = overrides.cache_redis_url.as_ref() {
            self.cache.redis_url = Some(url.clone());
        }
        if let Some(prefix) = overrides.cache_key_prefix.as_ref() {
            self.cache.key_prefix = Some(prefix.clone());
        }
        if let Some(ttl) = overrides.cache_event_ttl_seconds {
            self.cache.event_ttl_seconds = Some(ttl);
        }
        if let Some(max) = overrides.cache_max_entries {
            self.cache.max_entries = Some(max);
        }
        if let Some(value) = overrides.ingest_enforce_source_ordering {
            self.ingest.enforce_source_ordering = Some(value);
        }
        if let Some(value) = overrides.ingest_treat_edits_as_new_events {
            self.ingest.treat_edits_as_new_events = Some(value);
        }
        if let Some(limit) = overrides.ingest_max_payload_bytes {
            self.ingest.max_payload_bytes = Some(limit);
        }
        if let Some(window) = overrides.api_rate_limit_window_seconds {
            self.api_rate_limit.window_seconds = Some(window);
        }
        if let Some(max) = overrides.api_rate_limit_max_requests {
            self.api_rate_limit.max_requests = Some(max);
        }
    }

    fn apply_database_override(&mut self, overrides: &DatabaseOverride) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            database,
            persistence,
            cache,
            ingest,
            api_rate_limit,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            persistence: build_persistence_settings(persistence)?,
            cache: build_cache_settings(cache)?,
            ingest: build_ingest_settings(ingest)?,
            api_rate_limit: build_api_rate_limit_settings(api_rate_limit)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let admin_host = server
        .admin_host
        .unwrap_or_else(|| DEFAULT_ADMIN_HOST.to_string());

    let public_port = server.public_port.unwrap_or(DEFAULT_PUBLIC_PORT);
    if public_port == 0 {
        return Err(LoadError::invalid(
            "server.public_port",
            "port must be greater than zero",
        ));
    }

    let admin_port = server.admin_port.unwrap_or(DEFAULT_ADMIN_PORT);
    if admin_port == 0 {
        return Err(LoadError::invalid(
            "server.admin_port",
            "port must be greater than zero",
        ));
    }

    let public_addr = parse_socket_addr(&host, public_port)
        .map_err(|reason| LoadError::invalid("server.public_addr", reason))?;
    let admin_addr = parse_socket_addr(&admin_host, admin_port)
        .map_err(|reason| LoadError::invalid("server.admin_addr", reason))?;

    if public_addr == admin_addr {
        return Err(LoadError::invalid(
            "server.admin_port",
            "public and admin listeners must not share an address",
        ));
    }

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    let graceful_shutdown = positive_duration(
        graceful_secs,
        Duration::from_secs,
        "server.graceful_shutdown_seconds",
    )?;

    Ok(ServerSettings {
        public_addr,
        admin_addr,
        graceful_shutdown,
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
    let kind = match database.kind.as_deref() {
        Some(value) => DatabaseKind::from_str(value)
            .map_err(|reason| LoadError::invalid("database.kind", reason))?,
        None => DatabaseKind::Postgres,
    };

    let url = non_blank(database.url);
    if kind == DatabaseKind::Postgres && url.is_none() {
        return Err(LoadError::invalid(
            "database.url",
            "required when database.kind is `postgres`",
        ));
    }

    let max_connections = non_zero_u32(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
            .into(),
        "database.max_connections",
    )?;

    Ok(DatabaseSettings {
        kind,
        url,
        max_connections,
    })
}

fn build_persistence_settings(
    persistence: RawPersistenceSettings,
) -> Result<PersistenceSettings, LoadError> {
    let max_attempts = non_zero_u32(
        persistence
            .max_attempts
            .unwrap_or(DEFAULT_PERSISTENCE_MAX_ATTEMPTS),
        "persistence.max_attempts",
    )?;

    let initial_backoff = Duration::from_millis(
        persistence
            .initial_backoff_ms
            .unwrap_or(DEFAULT_PERSISTENCE_INITIAL_BACKOFF_MS),
    );
    let max_backoff = Duration::from_millis(
        persistence
            .max_backoff_ms
            .unwrap_or(DEFAULT_PERSISTENCE_MAX_BACKOFF_MS),
    );
    if max_backoff < initial_backoff {
        return Err(LoadError::invalid(
            "persistence.max_backoff_ms",
            "must not be smaller than persistence.initial_backoff_ms",
        ));
    }

    let operation_timeout = positive_duration(
        persistence
            .operation_timeout_ms
            .unwrap_or(DEFAULT_PERSISTENCE_TIMEOUT_MS),
        Duration::from_millis,
        "persistence.operation_timeout_ms",
    )?;

    Ok(PersistenceSettings {
        max_attempts,
        initial_backoff,
        max_backoff,
        operation_timeout,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let backend = match cache
        .backend
        .as_deref()
        .map(|value| value.trim().to_ascii_lowercase())
        .as_deref()
    {
        None | Some("memory") => CacheBackendKind::Memory,
        Some("disabled") | Some("none") => CacheBackendKind::Disabled,
        Some("redis") => {
            let url = non_blank(cache.redis_url).ok_or_else(|| {
                LoadError::invalid("cache.redis_url", "required when cache.backend is `redis`")
            })?;
            CacheBackendKind::Redis { url }
        }
        Some(other) => {
            return Err(LoadError::invalid(
                "cache.backend",
                format!("unknown cache backend `{other}`"),
            ));
        }
    };

    let key_prefix = non_blank(cache.key_prefix).unwrap_or_else(|| DEFAULT_CACHE_KEY_PREFIX.into());
    if key_prefix.contains(char::is_whitespace) {
        return Err(LoadError::invalid(
            "cache.key_prefix",
            "must not contain whitespace",
        ));
    }

    let event_ttl = positive_duration(
        cache
            .event_ttl_seconds
            .unwrap_or(DEFAULT_CACHE_EVENT_TTL_SECS),
        Duration::from_secs,
        "cache.event_ttl_seconds",
    )?;
    let claim_ttl = positive_duration(
        cache
            .claim_ttl_seconds
            .unwrap_or(DEFAULT_CACHE_CLAIM_TTL_SECS),
        Duration::from_secs,
        "cache.claim_ttl_seconds",
    )?;
    let sweep_interval = positive_duration(
        cache
            .sweep_interval_seconds
            .unwrap_or(DEFAULT_CACHE_SWEEP_INTERVAL_SECS),
        Duration::from_secs,
        "cache.sweep_interval_seconds",
    )?;
    let operation_timeout = positive_duration(
        cache.operation_timeout_ms.unwrap_or(DEFAULT_CACHE_TIMEOUT_MS),
        Duration::from_millis,
        "cache.operation_timeout_ms",
    )?;

    let max_entries_value = cache.max_entries.unwrap_or(DEFAULT_CACHE_MAX_ENTRIES);
    let max_entries = usize::try_from(max_entries_value)
        .ok()
        .and_then(NonZeroUsize::new)
        .ok_or_else(|| {
            LoadError::invalid(
                "cache.max_entries",
                "must be greater than zero and fit in usize",
            )
        })?;

    let breaker = BreakerConfig {
        failure_threshold: non_zero_u32(
            cache
                .breaker_failure_threshold
                .unwrap_or(DEFAULT_BREAKER_FAILURE_THRESHOLD),
            "cache.breaker_failure_threshold",
        )?
        .get(),
        open_for: positive_duration(
            cache.breaker_open_seconds.unwrap_or(DEFAULT_BREAKER_OPEN_SECS),
            Duration::from_secs,
            "cache.breaker_open_seconds",
        )?,
        success_threshold: non_zero_u32(
            cache
                .breaker_success_threshold
                .unwrap_or(DEFAULT_BREAKER_SUCCESS_THRESHOLD),
            "cache.breaker_success_threshold",
        )?
        .get(),
    };

    Ok(CacheSettings {
        backend,
        key_prefix,
        event_ttl,
        claim_ttl,
        max_entries,
        sweep_interval,
        operation_timeout,
        breaker,
    })
}

fn build_ingest_settings(ingest: RawIngestSettings) -> Result<IngestSettings, LoadError> {
    let max_payload_value = ingest
        .max_payload_bytes
        .unwrap_or(DEFAULT_MAX_PAYLOAD_BYTES as u64);
    if max_payload_value == 0 {
        return Err(LoadError::invalid(
            "ingest.max_payload_bytes",
            "must be greater than zero",
        ));
    }
    let max_payload_bytes = usize::try_from(max_payload_value).map_err(|_| {
        LoadError::invalid(
            "ingest.max_payload_bytes",
            "value exceeds supported range for usize",
        )
    })?;

    Ok(IngestSettings {
        max_payload_bytes,
        treat_edits_as_new_events: ingest.treat_edits_as_new_events.unwrap_or(false),
        enforce_source_ordering: ingest.enforce_source_ordering.unwrap_or(false),
    })
}

fn build_api_rate_limit_settings(
    rate_limit: RawApiRateLimitSettings,
) -> Result<ApiRateLimitSettings, LoadError> {
    let window_seconds_val = rate_limit
        .window_seconds
        .unwrap_or(DEFAULT_API_RATE_LIMIT_WINDOW_SECS);
    let window_seconds = non_zero_u32(window_seconds_val, "api_rate_limit.window_seconds")?;

    let max_requests_val = rate_limit
        .max_requests
        .unwrap_or(DEFAULT_API_RATE_LIMIT_MAX_REQUESTS);
    let max_requests = non_zero_u32(max_requests_val, "api_rate_limit.max_requests")?;

    Ok(ApiRateLimitSettings {
        window_seconds,
        max_requests,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    admin_host: Option<String>,
    public_port: Option<u16>,
    admin_port: Option<u16>,
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
    kind: Option<String>,
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPersistenceSettings {
    max_attempts: Option<u64>,
    initial_backoff_ms: Option<u64>,
    max_backoff_ms: Option<u64>,
    operation_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    backend: Option<String>,
    redis_url: Option<String>,
    key_prefix: Option<String>,
    event_ttl_seconds: Option<u64>,
    claim_ttl_seconds: Option<u64>,
    max_entries: Option<u64>,
    sweep_interval_seconds: Option<u64>,
    operation_timeout_ms: Option<u64>,
    breaker_failure_threshold: Option<u64>,
    breaker_open_seconds: Option<u64>,
    breaker_success_threshold: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawIngestSettings {
    max_payload_bytes: Option<u64>,
    treat_edits_as_new_events: Option<bool>,
    enforce_source_ordering: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawApiRateLimitSettings {
    window_seconds: Option<u64>,
    max_requests: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
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

fn positive_duration(
    value: u64,
    unit: fn(u64) -> Duration,
    key: &'static str,
) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(unit(value))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}
