use std::{process, sync::Arc, time::Duration};

use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;
use transit_pulse::{
    application::{error::AppError, query::QueryExecutor},
    cache::{
        CacheConfig, CacheResolver, InvalidationCoordinator, KvStore, MemoryKvStore,
        MutationEvent, PolicyRegistry,
    },
    config,
    infra::{
        db::PostgresQueryExecutor,
        error::InfraError,
        http::{self, HttpState},
        redis::RedisKvStore,
        telemetry,
    },
};

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
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;

    let registry = Arc::new(PolicyRegistry::from_settings(&settings.cache)?);
    let cache_config = CacheConfig::from(&settings.cache);

    match command {
        config::Command::Serve(_) => run_serve(settings, registry, cache_config).await,
        config::Command::Invalidate(args) => {
            run_invalidate(settings, registry, cache_config, args).await
        }
    }
}

async fn init_kv(
    settings: &config::Settings,
    cache_config: &CacheConfig,
) -> Result<Arc<dyn KvStore>, AppError> {
    match settings.kv.redis_url.as_deref() {
        Some(url) => {
            let store: Arc<dyn KvStore> = Arc::new(RedisKvStore::connect(url).await?);
            Ok(store)
        }
        None => {
            warn!(
                capacity = cache_config.memory_capacity,
                "no redis url configured; using the in-process cache store"
            );
            let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new(cache_config));
            Ok(store)
        }
    }
}

async fn init_executor(settings: &config::Settings) -> Result<Arc<dyn QueryExecutor>, AppError> {
    let url = settings
        .database
        .url
        .as_deref()
        .ok_or_else(|| InfraError::configuration("database.url is required to serve"))?;
    let pool = PostgresQueryExecutor::connect(url, settings.database.max_connections.get())
        .await
        .map_err(|err| InfraError::database(err.to_string()))?;
    let executor: Arc<dyn QueryExecutor> = Arc::new(PostgresQueryExecutor::new(pool));
    Ok(executor)
}

async fn run_serve(
    settings: config::Settings,
    registry: Arc<PolicyRegistry>,
    cache_config: CacheConfig,
) -> Result<(), AppError> {
    let kv = init_kv(&settings, &cache_config).await?;
    let executor = init_executor(&settings).await?;

    let resolver = Arc::new(CacheResolver::new(
        cache_config.clone(),
        registry,
        kv.clone(),
        executor.clone(),
    ));
    let state = HttpState::new(resolver, kv.clone(), executor);
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(InfraError::from)?;
    info!(
        addr = %settings.server.addr,
        kv_backend = kv.backend(),
        cache_enabled = cache_config.enabled,
        "transit pulse listening"
    );

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal(settings.server.graceful_shutdown))
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    info!("transit pulse stopped");
    Ok(())
}

async fn shutdown_signal(grace: Duration) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        return;
    }
    info!(
        grace_seconds = grace.as_secs(),
        "shutdown requested; draining connections"
    );
    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        warn!("graceful shutdown window elapsed; exiting");
        process::exit(0);
    });
}

async fn run_invalidate(
    settings: config::Settings,
    registry: Arc<PolicyRegistry>,
    cache_config: CacheConfig,
    args: config::InvalidateArgs,
) -> Result<(), AppError> {
    let url = settings.kv.redis_url.as_deref().ok_or_else(|| {
        InfraError::configuration("a redis url is required to invalidate (--redis-url)")
    })?;
    registry.rules_for(&args.entity)?;

    let kv: Arc<dyn KvStore> = Arc::new(RedisKvStore::connect(url).await?);
    let coordinator = InvalidationCoordinator::new(cache_config, registry, kv);

    let mut event = MutationEvent::new(args.entity);
    if let Some(identifier) = args.identifier {
        event = event.with_identifier(identifier);
    }
    for attribute in args.attributes {
        event = event.with_attribute(attribute);
    }
    for (name, value) in args.params {
        event = event.with_param(name, value);
    }

    let report = coordinator.invalidate(&event).await;
    info!(
        event_id = %report.event_id,
        deleted = report.deleted.len(),
        absent = report.absent,
        failures = report.failures.len(),
        skipped = report.skipped,
        "invalidation finished"
    );
    if report.failures.is_empty() {
        Ok(())
    } else {
        Err(InfraError::key_value(format!(
            "{} key(s) could not be invalidated: {}",
            report.failures.len(),
            report.failures.join(", ")
        ))
        .into())
    }
}
