//! # registrar: event registration service
//!
//! `registrar` takes registrations for event tickets, keeps each ticket's sold count
//! within capacity, enforces invitation codes, SMS verification and per-event form
//! questions, and tells the outside world about every confirmed or cancelled
//! registration by email and webhook.
//!
//! ## Request flow
//!
//! An authenticating proxy sits in front of the service and vouches for the caller
//! with the `X-Registrar-User` header (and `X-Registrar-Phone-Verified` once the
//! user has verified a phone number). Registrant endpoints live under `/api/v1`,
//! operator endpoints under `/admin/api/v1` and require the caller's email to be
//! listed in `admin_emails`.
//!
//! A registration runs a cheap preflight outside any transaction, then repeats
//! every check that can race inside a single `SERIALIZABLE` transaction that takes
//! capacity, consumes the invitation code, attributes the referral and writes the
//! notification outbox. Serialization failures surface as a retryable
//! `409 transaction_conflict`.
//!
//! ## Background services
//!
//! - The notification worker ([`notifications`]) drains the outbox: it sends the
//!   confirmation or cancellation email and fans webhook events out into deliveries.
//! - The webhook dispatcher ([`webhooks::dispatcher`]) claims due deliveries, sends
//!   them with bounded concurrency and applies retry backoff and the per-endpoint
//!   circuit breaker.
//!
//! Both can be switched off in config; several replicas may run them side by side
//! since every claim is made with `FOR UPDATE SKIP LOCKED`.
//!
//! ## Quick start
//!
//! ```no_run
//! use clap::Parser;
//! use registrar::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = registrar::config::Args::parse();
//!     let config = Config::load(&args)?;
//!     registrar::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod email;
pub mod errors;
pub mod notifications;
mod openapi;
pub mod registration;
pub mod telemetry;
pub mod types;
pub mod webhooks;

#[cfg(test)]
pub mod test_utils;

use crate::{
    api::handlers::{campaigns, registrations, webhooks as webhook_handlers},
    config::{CorsOrigin, PoolSettings},
    email::{EmailService, campaigns::CampaignSender},
    notifications::NotificationWorker,
    openapi::{AdminApiDoc, PublicApiDoc},
    registration::RegistrationCoordinator,
    webhooks::{WebhookDeliveryService, run_webhook_dispatcher},
};
use axum::http::{HeaderName, HeaderValue};
use axum::{
    Router, http,
    routing::{get, post},
};
use axum_prometheus::PrometheusMetricLayer;
use bon::Builder;
pub use config::Config;
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio_util::sync::{CancellationToken, DropGuard};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

/// Shared state handed to every request handler.
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub registrations: RegistrationCoordinator,
    pub webhooks: Arc<WebhookDeliveryService>,
    pub campaigns: Arc<CampaignSender>,
    /// Cancelled on shutdown; long-running work spawned by handlers watches it
    pub shutdown: CancellationToken,
}

/// The registrar database migrator.
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

fn pool_options(settings: &PoolSettings) -> PgPoolOptions {
    let secs = |s: u64| (s > 0).then(|| Duration::from_secs(s));

    PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .acquire_timeout(Duration::from_secs(settings.acquire_timeout_secs))
        .idle_timeout(secs(settings.idle_timeout_secs))
        .max_lifetime(secs(settings.max_lifetime_secs))
}

/// Connect to the configured database and bring its schema up to date.
#[instrument(skip_all)]
async fn setup_database(config: &Config) -> anyhow::Result<PgPool> {
    let pool = pool_options(&config.database.pool).connect(&config.database.url).await?;
    migrator().run(&pool).await?;
    info!(max_connections = config.database.pool.max_connections, "Database ready");
    Ok(pool)
}

fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let cors_config = &config.security.cors;

    let mut origins = Vec::new();
    for origin in &cors_config.allowed_origins {
        let header_value = match origin {
            CorsOrigin::Wildcard => "*".parse::<HeaderValue>()?,
            CorsOrigin::Url(url) => url.as_str().trim_end_matches('/').parse::<HeaderValue>()?,
        };
        origins.push(header_value);
    }

    let exposed = cors_config
        .exposed_headers
        .iter()
        .map(|header| header.parse::<HeaderName>())
        .collect::<Result<Vec<_>, _>>()?;

    let mut cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([http::Method::GET, http::Method::POST])
        .allow_headers([http::header::CONTENT_TYPE])
        .allow_credentials(cors_config.allow_credentials)
        .expose_headers(exposed);

    if let Some(max_age) = cors_config.max_age {
        cors = cors.max_age(Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the HTTP router: registrant API, admin API, docs, health and metrics.
#[instrument(skip_all)]
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    let public_routes = Router::new()
        .route("/registrations", post(registrations::create_registration))
        .route("/registrations/{id}", get(registrations::get_registration))
        .route("/registrations/{id}/cancel", post(registrations::cancel_registration))
        .route("/registrations/{id}/referral", get(registrations::get_referral_code));

    let admin_routes = Router::new()
        .route(
            "/events/{event_id}/webhook-deliveries/failed",
            get(webhook_handlers::list_failed_deliveries),
        )
        .route("/webhook-deliveries/{id}/retry", post(webhook_handlers::retry_delivery))
        .route("/webhook-endpoints/{id}/enable", post(webhook_handlers::enable_endpoint))
        .route("/events/{event_id}/campaigns", post(campaigns::create_campaign));

    let router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .nest("/api/v1", public_routes)
        .nest("/admin/api/v1", admin_routes)
        .with_state(state.clone())
        .merge(Scalar::with_url("/docs", PublicApiDoc::openapi()))
        .merge(Scalar::with_url("/admin/docs", AdminApiDoc::openapi()));

    let mut router = router.layer(create_cors_layer(&state.config)?);

    if state.config.enable_metrics {
        // Also installs the global recorder behind the `metrics` counters
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
        router = router
            .route("/internal/metrics", get(|| async move { metric_handle.render() }))
            .layer(prometheus_layer);
    }

    let router = router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// Background tasks running alongside the HTTP server.
///
/// Dropping this cancels the shared shutdown token, so tests that hold it for the
/// duration of a test stop their workers when the test ends.
pub struct BackgroundServices {
    background_tasks: Vec<tokio::task::JoinHandle<()>>,
    shutdown_token: CancellationToken,
    // Pub so that we can disarm it if we want to
    pub drop_guard: Option<DropGuard>,
}

impl BackgroundServices {
    /// Cancel every background task and wait for them to stop.
    pub async fn shutdown(self) {
        self.shutdown_token.cancel();

        for handle in self.background_tasks {
            let _ = handle.await;
        }
    }
}

fn setup_background_services(
    pool: PgPool,
    config: &Config,
    email: Arc<EmailService>,
    wake: Arc<Notify>,
    shutdown_token: CancellationToken,
) -> BackgroundServices {
    let drop_guard = shutdown_token.clone().drop_guard();
    let mut background_tasks = Vec::new();

    if config.notifications.enabled {
        let worker = NotificationWorker::new(pool.clone(), email, config.notifications.clone(), wake);
        let shutdown = shutdown_token.clone();
        background_tasks.push(tokio::spawn(async move {
            if let Err(e) = worker.run(shutdown).await {
                tracing::error!(error = %e, "Notification worker stopped");
            }
        }));
    } else {
        info!("Notification worker disabled by configuration");
    }

    if config.webhooks.enabled {
        let webhook_config = config.webhooks.clone();
        let shutdown = shutdown_token.clone();
        background_tasks.push(tokio::spawn(async move {
            if let Err(e) = run_webhook_dispatcher(pool, webhook_config, shutdown).await {
                tracing::error!(error = %e, "Webhook dispatcher stopped");
            }
        }));
    } else {
        info!("Webhook dispatcher disabled by configuration");
    }

    BackgroundServices {
        background_tasks,
        shutdown_token,
        drop_guard: Some(drop_guard),
    }
}

/// Owns the router, the database pool and the background services.
///
/// 1. [`Application::new`] connects, migrates and starts background services
/// 2. [`Application::serve`] binds the listener and handles requests
/// 3. When the shutdown future resolves, in-flight requests finish, background
///    services stop and the pool is closed
pub struct Application {
    router: Router,
    config: Config,
    pool: PgPool,
    bg_services: BackgroundServices,
}

impl Application {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        Self::new_with_pool(config, None).await
    }

    /// Create the application, reusing `pool` when given (tests) instead of connecting.
    pub async fn new_with_pool(config: Config, pool: Option<PgPool>) -> anyhow::Result<Self> {
        debug!("Starting registrar with configuration: {:#?}", config);

        let pool = match pool {
            Some(pool) => {
                migrator().run(&pool).await?;
                pool
            }
            None => setup_database(&config).await?,
        };

        let shutdown_token = CancellationToken::new();
        let wake = Arc::new(Notify::new());
        let email = Arc::new(EmailService::new(&config.email, &config.public_url)?);

        let bg_services = setup_background_services(pool.clone(), &config, email.clone(), wake.clone(), shutdown_token.clone());

        let app_state = AppState::builder()
            .config(config.clone())
            .registrations(RegistrationCoordinator::new(pool.clone(), &config.registration, wake))
            .webhooks(Arc::new(WebhookDeliveryService::new(pool.clone(), &config.webhooks)?))
            .campaigns(Arc::new(CampaignSender::new(email, &config.campaigns)))
            .shutdown(shutdown_token)
            .build();

        let router = build_router(&app_state)?;

        Ok(Self {
            router,
            config,
            pool,
            bg_services,
        })
    }

    #[cfg(test)]
    pub fn into_test_server(self) -> (axum_test::TestServer, BackgroundServices) {
        let server = axum_test::TestServer::new(self.router.into_make_service()).expect("Failed to create test server");
        (server, self.bg_services)
    }

    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!("Registrar listening on http://{}", bind_addr);

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Stopping background services...");
        self.bg_services.shutdown().await;

        info!("Closing database connections...");
        self.pool.close().await;

        telemetry::shutdown_telemetry();

        Ok(())
    }
}
