use super::*;

fn memory_raw() -> RawSettings {
    let mut raw = RawSettings::default();
    raw.database.kind = Some("memory".to_string());
    raw
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = memory_raw();
    raw.server.public_port = Some(4000);
    raw.logging.level = Some("info".to_string());

    let overrides = ServeOverrides {
        public_port: Some(4321),
        log_level: Some("debug".to_string()),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.public_addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
}

#[test]
fn defaults_match_documented_values() {
    let settings = Settings::from_raw(memory_raw()).expect("valid settings");

    assert_eq!(settings.server.public_addr.port(), DEFAULT_PUBLIC_PORT);
    assert_eq!(settings.server.admin_addr.port(), DEFAULT_ADMIN_PORT);
    assert_eq!(settings.database.kind, DatabaseKind::Memory);
    assert_eq!(settings.cache.backend, CacheBackendKind::Memory);
    assert_eq!(settings.cache.key_prefix, "eventgate");
    assert_eq!(settings.cache.event_ttl, Duration::from_secs(300));
    assert_eq!(settings.cache.claim_ttl, Duration::from_secs(120));
    assert_eq!(settings.cache.max_entries.get(), 10_000);
    assert_eq!(settings.ingest.max_payload_bytes, 64 * 1024);
    assert!(!settings.ingest.enforce_source_ordering);
    assert_eq!(settings.api_rate_limit.max_requests.get(), 600);

    let retry = settings.persistence.retry_policy();
    assert_eq!(retry, RetryPolicy::default());
    assert_eq!(settings.cache.breaker, BreakerConfig::default());
}

#[test]
fn postgres_requires_a_url() {
    let raw = RawSettings::default();
    let err = Settings::from_raw(raw).expect_err("missing url");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "database.url",
            ..
        }
    ));
}

#[test]
fn blank_database_url_counts_as_missing() {
    let mut raw = RawSettings::default();
    raw.database.url = Some("   ".to_string());
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn redis_backend_requires_a_url() {
    let mut raw = memory_raw();
    raw.cache.backend = Some("redis".to_string());
    let err = Settings::from_raw(raw).expect_err("missing redis url");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "cache.redis_url",
            ..
        }
    ));
}

#[test]
fn redis_backend_carries_url() {
    let mut raw = memory_raw();
    raw.cache.backend = Some("Redis".to_string());
    raw.cache.redis_url = Some("redis://127.0.0.1:6379".to_string());
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(
        settings.cache.backend,
        CacheBackendKind::Redis {
            url: "redis://127.0.0.1:6379".to_string()
        }
    );
}

#[test]
fn unknown_cache_backend_is_rejected() {
    let mut raw = memory_raw();
    raw.cache.backend = Some("memcached".to_string());
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "cache.backend",
            ..
        })
    ));
}

#[test]
fn zero_ttl_is_rejected() {
    let mut raw = memory_raw();
    raw.cache.claim_ttl_seconds = Some(0);
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "cache.claim_ttl_seconds",
            ..
        })
    ));
}

#[test]
fn breaker_settings_are_validated() {
    let mut raw = memory_raw();
    raw.cache.breaker_failure_threshold = Some(3);
    raw.cache.breaker_open_seconds = Some(10);
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.cache.breaker.failure_threshold, 3);
    assert_eq!(settings.cache.breaker.open_for, Duration::from_secs(10));
    assert_eq!(settings.cache.breaker.success_threshold, 2);

    let mut raw = memory_raw();
    raw.cache.breaker_success_threshold = Some(0);
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "cache.breaker_success_threshold",
            ..
        })
    ));
}

#[test]
fn backoff_ceiling_must_cover_initial_delay() {
    let mut raw = memory_raw();
    raw.persistence.initial_backoff_ms = Some(500);
    raw.persistence.max_backoff_ms = Some(100);
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn listeners_must_not_collide() {
    let mut raw = memory_raw();
    raw.server.public_port = Some(9000);
    raw.server.admin_port = Some(9000);
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn ingest_overrides_reach_normalizer_config() {
    let mut raw = memory_raw();
    let overrides = ServeOverrides {
        ingest_treat_edits_as_new_events: Some(true),
        ingest_enforce_source_ordering: Some(true),
        ingest_max_payload_bytes: Some(1024),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(settings.ingest.enforce_source_ordering);
    let normalizer = settings.ingest.normalizer_config();
    assert!(normalizer.treat_edits_as_new_events);
    assert_eq!(normalizer.max_payload_bytes, 1024);
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = memory_raw();
    let overrides = ServeOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["eventgate"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_migrate_arguments() {
    let args = CliArgs::parse_from([
        "eventgate",
        "migrate",
        "--database-url",
        "postgres://example",
    ]);

    match args.command.expect("migrate command") {
        Command::Migrate(migrate) => {
            assert_eq!(
                migrate.database.database_url.as_deref(),
                Some("postgres://example")
            );
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_serve_overrides() {
    let args = CliArgs::parse_from([
        "eventgate",
        "serve",
        "--server-host",
        "0.0.0.0",
        "--database-kind",
        "memory",
        "--cache-backend",
        "disabled",
        "--ingest-enforce-source-ordering",
        "true",
    ]);

    match args.command.expect("serve command") {
        Command::Serve(serve) => {
            assert_eq!(serve.overrides.server_host.as_deref(), Some("0.0.0.0"));
            assert_eq!(serve.overrides.database_kind.as_deref(), Some("memory"));
            assert_eq!(serve.overrides.cache_backend.as_deref(), Some("disabled"));
            assert_eq!(serve.overrides.ingest_enforce_source_ordering, Some(true));
        }
        _ => panic!("wrong command parsed"),
    }
}
