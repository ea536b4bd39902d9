use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the eventgate binary.
#[derive(Debug, Parser)]
#[command(name = "eventgate", version, about = "Event ingestion and caching gateway")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "EVENTGATE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the public and admin HTTP listeners.
    Serve(Box<ServeArgs>),
    /// Apply pending database migrations and exit.
    Migrate(MigrateArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct DatabaseOverride {
    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct MigrateArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the public listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the administrative listener host.
    #[arg(long = "server-admin-host", value_name = "HOST")]
    pub server_admin_host: Option<String>,

    /// Override the public listener port.
    #[arg(long = "server-public-port", value_name = "PORT")]
    pub public_port: Option<u16>,

    /// Override the administrative listener port.
    #[arg(long = "server-admin-port", value_name = "PORT")]
    pub admin_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Persistence backend (postgres|memory).
    #[arg(long = "database-kind", value_name = "KIND")]
    pub database_kind: Option<String>,

    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    /// Override the database pool size.
    #[arg(long = "database-max-connections", value_name = "COUNT")]
    pub database_max_connections: Option<u32>,

    /// Cache backend (memory|redis|disabled).
    #[arg(long = "cache-backend", value_name = "KIND")]
    pub cache_backend: Option<String>,

    /// Override the Redis connection URL.
    #[arg(long = "cache-redis-url", value_name = "URL")]
    pub cache_redis_url: Option<String>,

    /// Override the cache key namespace.
    #[arg(long = "cache-key-prefix", value_name = "PREFIX")]
    pub cache_key_prefix: Option<String>,

    /// Override the cached event lifetime.
    #[arg(long = "cache-event-ttl-seconds", value_name = "SECONDS")]
    pub cache_event_ttl_seconds: Option<u64>,

    /// Override the in-process cache capacity.
    #[arg(long = "cache-max-entries", value_name = "COUNT")]
    pub cache_max_entries: Option<u64>,

    /// Reject events that arrive behind their source's high-water sequence.
    #[arg(
        long = "ingest-enforce-source-ordering",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub ingest_enforce_source_ordering: Option<bool>,

    /// Include the payload digest in the dedup key.
    #[arg(
        long = "ingest-treat-edits-as-new-events",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub ingest_treat_edits_as_new_events: Option<bool>,

    /// Override the maximum canonical payload size in bytes.
    #[arg(long = "ingest-max-payload-bytes", value_name = "BYTES")]
    pub ingest_max_payload_bytes: Option<u64>,

    /// Override the API rate limit window size.
    #[arg(long = "api-rate-limit-window-seconds", value_name = "SECONDS")]
    pub api_rate_limit_window_seconds: Option<u64>,

    /// Override the API rate limit request ceiling.
    #[arg(long = "api-rate-limit-max-requests", value_name = "COUNT")]
    pub api_rate_limit_max_requests: Option<u64>,
}
