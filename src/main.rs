use std::{future::IntoFuture, net::SocketAddr, process, sync::Arc};

use rolodex::{
    application::{
        contacts::{ContactService, sample_contacts},
        error::AppError,
        idempotency::IdempotencyLedger,
        repos::{ContactsRepo, ContactsWriteRepo},
    },
    cache::{Cache, CacheConfig},
    config,
    infra::{
        db::PostgresRepositories,
        error::InfraError,
        http::{self, AppState, RateLimiter},
        telemetry,
    },
};
use tokio::sync::Notify;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
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
        config::Command::Seed(args) => run_seed(settings, args).await,
    }
}

struct ApplicationContext {
    repositories: Arc<PostgresRepositories>,
    cache: Arc<Cache>,
    contacts: ContactService,
}

impl ApplicationContext {
    async fn shutdown(self) {
        self.cache.close().await;
        self.repositories.close().await;
    }
}

async fn init_repositories(
    settings: &config::Settings,
) -> Result<Arc<PostgresRepositories>, AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))
        .map_err(AppError::from)?;

    let pool = PostgresRepositories::connect(
        database_url,
        settings.database.max_connections.get(),
        settings.database.acquire_timeout,
    )
    .await
    .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    Ok(Arc::new(PostgresRepositories::new(pool)))
}

async fn build_application_context(
    settings: &config::Settings,
) -> Result<ApplicationContext, AppError> {
    let repositories = init_repositories(settings).await?;

    let cache_config = CacheConfig::from(&settings.cache);
    let cache = Arc::new(Cache::connect(&cache_config).await);
    info!(
        backend = cache.backend(),
        degraded = cache.is_degraded(),
        "cache ready"
    );

    let ledger = IdempotencyLedger::new(cache.clone(), cache_config.idempotency_ttl());
    let reader: Arc<dyn ContactsRepo> = repositories.clone();
    let writer: Arc<dyn ContactsWriteRepo> = repositories.clone();
    let contacts = ContactService::new(
        reader,
        writer,
        cache.clone(),
        ledger,
        cache_config.list_ttl(),
    );

    Ok(ApplicationContext {
        repositories,
        cache,
        contacts,
    })
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let app = build_application_context(&settings).await?;

    let rate_limiter = RateLimiter::new(
        std::time::Duration::from_secs(settings.rate_limit.window_seconds.get().into()),
        settings.rate_limit.max_requests.get(),
    )
    .trust_forwarded_for(settings.rate_limit.trust_forwarded_for);
    let state = AppState {
        contacts: app.contacts.clone(),
        rate_limiter: Arc::new(rate_limiter),
    };

    let result = serve_http(&settings, state).await;

    app.shutdown().await;
    result
}

async fn serve_http(settings: &config::Settings, state: AppState) -> Result<(), AppError> {
    let router = http::build_router(state);

    let addr = settings.server.addr;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| AppError::from(InfraError::Bind { addr, source }))?;
    info!(%addr, "listening");

    let stop = Arc::new(Notify::new());
    let server = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown({
        let stop = stop.clone();
        async move { stop.notified().await }
    });
    let mut server = std::pin::pin!(server.into_future());

    tokio::select! {
        result = &mut server => {
            return result.map_err(|err| AppError::unexpected(format!("server error: {err}")));
        }
        () = shutdown_signal() => {
            info!("shutdown signal received, draining connections");
            stop.notify_one();
        }
    }

    match tokio::time::timeout(settings.server.graceful_shutdown, server).await {
        Ok(result) => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))
        }
        Err(_) => {
            warn!(
                timeout_secs = settings.server.graceful_shutdown.as_secs(),
                "graceful shutdown timed out"
            );
            Ok(())
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
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
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

async fn run_seed(settings: config::Settings, args: config::SeedArgs) -> Result<(), AppError> {
    let app = build_application_context(&settings).await?;

    let result = app.contacts.seed(sample_contacts(args.count)).await;
    app.shutdown().await;

    let report = result?;
    info!(
        inserted = report.inserted,
        skipped = report.skipped,
        "seed completed"
    );
    Ok(())
}
