use std::{process, sync::Arc, time::Duration};

use eventgate::{
    application::{
        cache_access::CacheAccess, error::AppError, ingest::IngestionCoordinator,
        query::QueryService, repos::EventsRepo,
    },
    cache::{self, CacheBackendKind, CacheConfig, EventCache, MemoryCache},
    config::{self, DatabaseKind},
    domain::normalize::EventNormalizer,
    infra::{
        db::{InMemoryEventsRepo, PostgresRepositories},
        error::InfraError,
        http::{self, AdminState, ApiRateLimiter, ApiState, HealthProbe, RouterState},
        telemetry,
    },
};
use sqlx::PgPool;
use tokio::{sync::watch, task::JoinHandle, try_join};
use tracing::{Dispatch, Level, debug, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Migrate(_) => run_migrate(settings).await,
    }
}

async fn run_migrate(settings: config::Settings) -> Result<(), AppError> {
    let pool = connect_postgres(&settings).await?;
    info!(target = "eventgate::migrate", "Migrations applied");
    pool.close().await;
    Ok(())
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let repo = init_repository(&settings).await?;
    let (cache, sweeper) = init_cache(&settings).await?;

    let cache_access = CacheAccess::new(
        cache.clone(),
        settings.cache.operation_timeout,
        settings.cache.event_ttl,
        settings.cache.claim_ttl,
    )
    .with_breaker(settings.cache.breaker);
    let retry = settings.persistence.retry_policy();

    let ingest = Arc::new(IngestionCoordinator::new(
        EventNormalizer::new(settings.ingest.normalizer_config()),
        cache_access.clone(),
        repo.clone(),
        retry,
        settings.ingest.enforce_source_ordering,
    ));
    let query = QueryService::new(cache_access.clone(), repo.clone(), retry);
    let rate_limiter = Arc::new(ApiRateLimiter::new(
        Duration::from_secs(settings.api_rate_limit.window_seconds.get().into()),
        settings.api_rate_limit.max_requests.get(),
    ));
    let health = HealthProbe::new(repo.clone(), cache_access.clone());

    info!(
        target = "eventgate::serve",
        persistence = repo.backend_name(),
        cache = cache.backend_name(),
        enforce_source_ordering = ingest.enforces_source_ordering(),
        treat_edits_as_new_events = settings.ingest.treat_edits_as_new_events,
        "Gateway initialised"
    );

    let router_state = RouterState {
        api: ApiState {
            ingest,
            query,
            rate_limiter,
        },
        health: health.clone(),
    };
    let admin_state = AdminState {
        health,
        cache: cache_access,
    };

    let result = serve_http(&settings, router_state, admin_state).await;

    if let Some(handle) = sweeper {
        handle.abort();
        let _ = handle.await;
    }

    result
}

async fn init_repository(settings: &config::Settings) -> Result<Arc<dyn EventsRepo>, AppError> {
    match settings.database.kind {
        DatabaseKind::Memory => {
            warn!(
                target = "eventgate::serve",
                "Using the in-process event store; events are lost on restart"
            );
            Ok(Arc::new(InMemoryEventsRepo::new()))
        }
        DatabaseKind::Postgres => {
            let pool = connect_postgres(settings).await?;
            Ok(Arc::new(PostgresRepositories::new(pool)))
        }
    }
}

/// Connects and brings the schema up to date.
async fn connect_postgres(settings: &config::Settings) -> Result<PgPool, AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))
        .map_err(AppError::from)?;

    let pool =
        PostgresRepositories::connect(database_url, settings.database.max_connections.get())
            .await
            .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(|err| AppError::from(InfraError::migration(err.to_string())))?;

    Ok(pool)
}

async fn init_cache(
    settings: &config::Settings,
) -> Result<(Arc<dyn EventCache>, Option<JoinHandle<()>>), AppError> {
    let cache_config = CacheConfig::from(&settings.cache);

    match cache_config.backend {
        CacheBackendKind::Memory => {
            let memory = Arc::new(MemoryCache::new(&cache_config));
            let sweeper = spawn_cache_sweeper(memory.clone(), cache_config.sweep_interval);
            let cache: Arc<dyn EventCache> = memory;
            Ok((cache, Some(sweeper)))
        }
        CacheBackendKind::Disabled => {
            warn!(
                target = "eventgate::serve",
                "Cache disabled; every request runs in degraded mode"
            );
            let cache = cache::connect(&cache_config).await?;
            Ok((cache, None))
        }
        CacheBackendKind::Redis { .. } => {
            let cache = cache::connect(&cache_config).await?;
            Ok((cache, None))
        }
    }
}

fn spawn_cache_sweeper(cache: Arc<MemoryCache>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.tick().await; // Skip the first immediate tick
        loop {
            interval.tick().await;
            let removed = cache.sweep_expired();
            if removed > 0 {
                debug!(
                    target = "eventgate::cache::sweeper",
                    removed,
                    remaining = cache.len(),
                    "Expired cache entries swept"
                );
            }
        }
    })
}

async fn serve_http(
    settings: &config::Settings,
    router_state: RouterState,
    admin_state: AdminState,
) -> Result<(), AppError> {
    let public_router = http::build_router(router_state);
    let admin_router = http::build_admin_router(admin_state);

    let public_listener = tokio::net::TcpListener::bind(settings.server.public_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    let admin_listener = tokio::net::TcpListener::bind(settings.server.admin_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "eventgate::serve",
        public = %settings.server.public_addr,
        admin = %settings.server.admin_addr,
        "Listening"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let signal_handle = tokio::spawn(async move {
        shutdown_signal().await;
        info!(target = "eventgate::serve", "Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let public_server = axum::serve(public_listener, public_router.into_make_service())
        .with_graceful_shutdown(wait_for_shutdown(shutdown_rx.clone()));
    let admin_server = axum::serve(admin_listener, admin_router.into_make_service())
        .with_graceful_shutdown(wait_for_shutdown(shutdown_rx.clone()));

    let grace = settings.server.graceful_shutdown;
    let deadline = async move {
        wait_for_shutdown(shutdown_rx).await;
        tokio::time::sleep(grace).await;
    };

    let result = tokio::select! {
        served = async { try_join!(public_server, admin_server) } => served
            .map(|_| ())
            .map_err(|err| AppError::unexpected(format!("server error: {err}"))),
        _ = deadline => {
            warn!(
                target = "eventgate::serve",
                grace_seconds = grace.as_secs(),
                "Graceful shutdown timed out; dropping open connections"
            );
            Ok(())
        }
    };

    signal_handle.abort();
    result
}

async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
