use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{anyhow, Context};
use axum::http::{
    header::{AUTHORIZATION, CONTENT_TYPE},
    HeaderName, HeaderValue, Method,
};
use sqlx::PgPool;
use tokio::net::TcpListener;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tourcompanion_backend::{
    config::Config,
    db::{
        postgres_billing_event_repository::PostgresBillingEventRepository,
        postgres_tenant_repository::PostgresTenantRepository,
    },
    responses::JsonResponse,
    routes::api_router,
    services::stripe::LiveStripeService,
    utils::{jwt::JwtKeys, kv_store::InMemoryKvStore},
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("loading configuration")?;

    let _sentry = config.sentry_dsn.as_deref().map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                environment: Some(config.environment.clone().into()),
                ..Default::default()
            },
        ))
    });

    let log_json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(log_json.then(|| fmt::layer().json()))
        .with((!log_json).then(fmt::layer))
        .with(sentry_tracing::layer())
        .init();

    let jwt_keys = JwtKeys::from_env().context("loading SUPABASE_JWT_SECRET")?;

    let pg_pool = establish_connection(&config.database_url).await?;
    sqlx::migrate!("./migrations")
        .run(&pg_pool)
        .await
        .context("running migrations")?;

    let kv_store = Arc::new(InMemoryKvStore::new());
    let sweeper = kv_store.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            sweeper.retain_live();
        }
    });

    let limits = &config.rate_limits;
    let global_governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_millisecond(limits.global_per_millisecond)
            .burst_size(limits.global_burst)
            .use_headers()
            .error_handler(|_err| {
                JsonResponse::too_many_requests(
                    "Too many requests. Please wait a moment and try again.",
                )
            })
            .finish()
            .ok_or_else(|| anyhow!("invalid RATE_LIMITER_* settings"))?,
    );

    // Drop idle IPs from the limiter map
    let governor_limiter = global_governor_conf.limiter().clone();
    std::thread::spawn(move || {
        let interval = Duration::from_secs(60);
        loop {
            std::thread::sleep(interval);
            governor_limiter.retain_recent();
        }
    });

    let cors = CorsLayer::new()
        .allow_origin(
            config
                .frontend_origin
                .parse::<HeaderValue>()
                .context("FRONTEND_ORIGIN is not a valid header value")?,
        )
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            AUTHORIZATION,
            CONTENT_TYPE,
            HeaderName::from_static("stripe-signature"),
        ])
        .allow_credentials(true);

    let addr: SocketAddr = config.bind_addr;
    let state = AppState {
        tenant_repo: Arc::new(PostgresTenantRepository {
            pool: pg_pool.clone(),
        }),
        billing_event_repo: Arc::new(PostgresBillingEventRepository { pool: pg_pool }),
        stripe: Arc::new(LiveStripeService::from_settings(&config.stripe)),
        kv_store,
        config: Arc::new(config),
        jwt_keys: Arc::new(jwt_keys),
    };

    let app = api_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(GovernorLayer {
            config: global_governor_conf,
        })
        .layer(cors);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "tourcompanion backend listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

/// Establish a connection to the database and verify it.
async fn establish_connection(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPool::connect(database_url)
        .await
        .context("connecting to the database")?;

    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .context("verifying database connection")?;

    info!("connected to the database");
    Ok(pool)
}
