//! Runtime configuration for the registrar service.
//!
//! A YAML file (`config.yaml` unless `-f` or `REGISTRAR_CONFIG` says otherwise) is
//! read first. `REGISTRAR_`-prefixed environment variables are layered on top,
//! with `__` separating nested keys, so `REGISTRAR_WEBHOOKS__MAX_RETRIES=8` sets
//! `webhooks.max_retries`. A plain `DATABASE_URL` wins over `database.url`.
//!
//! ```no_run
//! use clap::Parser;
//! use registrar::config::{Args, Config};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load(&Args::parse())?;
//! assert!(config.webhooks.max_retries > 0);
//! # Ok(())
//! # }
//! ```
//!
//! Top-level sections: `database`, `auth`, `security`, `email`, `registration`,
//! `notifications`, `webhooks` and `campaigns`. See `config.yaml` at the crate
//! root for a commented example.

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::errors::Error;

/// Command line flags.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// YAML file to load
    #[arg(short = 'f', long, env = "REGISTRAR_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Check the configuration and exit.
    #[arg(long)]
    pub validate: bool,
}

/// Root of the configuration tree.
///
/// All fields have defaults, so an empty file plus `DATABASE_URL` is a working setup.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Listen address
    pub host: String,
    /// Listen port
    pub port: u16,
    /// Public base URL, used for links in outgoing email
    pub public_url: String,
    /// Picked up from the `DATABASE_URL` environment variable and folded into `database.url`
    #[serde(skip_serializing)]
    pub database_url: Option<String>,
    pub database: DatabaseConfig,
    /// Identities (emails) allowed on `/admin` routes
    pub admin_emails: Vec<String>,
    pub auth: AuthConfig,
    pub security: SecurityConfig,
    pub email: EmailConfig,
    pub registration: RegistrationConfig,
    pub notifications: NotificationsConfig,
    pub webhooks: WebhookConfig,
    pub campaigns: CampaignConfig,
    /// Expose Prometheus metrics at `/internal/metrics`
    pub enable_metrics: bool,
    /// Export traces over OTLP (endpoint taken from the standard `OTEL_*` variables)
    pub enable_otel_export: bool,
}

/// PostgreSQL connection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool: PoolSettings,
}

/// sqlx pool sizing and timeouts.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolSettings {
    /// Upper bound on open connections
    pub max_connections: u32,
    /// Connections kept open while idle
    pub min_connections: u32,
    /// Seconds to wait for a free connection
    pub acquire_timeout_secs: u64,
    /// Seconds an idle connection survives; 0 disables
    pub idle_timeout_secs: u64,
    /// Seconds before a connection is recycled; 0 disables
    pub max_lifetime_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    pub proxy_header: ProxyHeaderAuthConfig,
}

/// Identity headers set by the trusted upstream proxy.
///
/// The proxy owns login and phone verification; this service only reads the result.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProxyHeaderAuthConfig {
    /// Header carrying the authenticated user's email
    pub user_header: String,
    /// Header set to `true` once the upstream has verified the user's phone number
    pub phone_verified_header: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SecurityConfig {
    /// Browser access rules
    pub cors: CorsConfig,
}

/// Cross-origin rules for the registration frontend.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    /// Origins the frontend is served from
    pub allowed_origins: Vec<CorsOrigin>,
    /// Whether browsers may send cookies along
    pub allow_credentials: bool,
    /// Preflight cache lifetime in seconds
    pub max_age: Option<u64>,
    /// Response headers readable from scripts, such as `location`
    pub exposed_headers: Vec<String>,
}

/// Email configuration for registration notices and campaigns.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
// no deny_unknown_fields: it does not work together with the flattened transport
pub struct EmailConfig {
    /// Where outgoing mail goes
    #[serde(flatten)]
    pub transport: EmailTransportConfig,
    /// Sender email address
    pub from_email: String,
    /// Sender display name
    pub from_name: String,
    /// Optional Reply-To address
    pub reply_to: Option<String>,
}

/// Mail delivery backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EmailTransportConfig {
    /// Relay through an SMTP server
    Smtp {
        host: String,
        port: u16,
        username: String,
        password: String,
        /// Connect with TLS
        use_tls: bool,
    },
    /// Drop `.eml` files into a directory, for local runs and tests
    File {
        /// Target directory, created on startup if missing
        path: String,
    },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistrationConfig {
    /// Upper bound on the length of free-text form answers
    pub form_max_field_length: usize,
}

/// Outbox worker configuration.
///
/// Safe to run on every replica: rows are claimed with `SKIP LOCKED`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct NotificationsConfig {
    /// Run the outbox worker on this instance (default: true)
    pub enabled: bool,
    /// Fallback poll interval when no wake-up arrives (default: 5s)
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// How long a claimed row stays invisible to other workers (default: 2m)
    #[serde(with = "humantime_serde")]
    pub claim_timeout: Duration,
    /// Attempts before a row is marked failed (default: 8)
    pub max_attempts: i32,
    #[serde(with = "humantime_serde")]
    pub backoff_base: Duration,
    #[serde(with = "humantime_serde")]
    pub backoff_max: Duration,
    /// Rows claimed per tick (default: 50)
    pub batch_size: i64,
}

/// Webhook delivery configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct WebhookConfig {
    /// Enable the webhook dispatcher (default: true)
    pub enabled: bool,
    /// How often to poll for due deliveries (default: 1s)
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// HTTP timeout per delivery attempt (default: 30s)
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Failed attempts before a delivery is exhausted (default: 5)
    pub max_retries: i32,
    /// First retry delay; doubles per attempt (default: 30s)
    #[serde(with = "humantime_serde")]
    pub backoff_base: Duration,
    /// Ceiling for the retry delay (default: 1h)
    #[serde(with = "humantime_serde")]
    pub backoff_max: Duration,
    /// Exhausted deliveries in a row before an endpoint is disabled (default: 3)
    pub circuit_breaker_threshold: i32,
    /// Deliveries claimed per tick (default: 50)
    pub claim_batch_size: i64,
    /// How long a claimed delivery stays invisible to other dispatchers (default: 2m)
    #[serde(with = "humantime_serde")]
    pub claim_timeout: Duration,
    /// In-flight HTTP requests across all endpoints (default: 20)
    pub max_concurrent_sends: usize,
    /// Size of the queue between the dispatcher and its send worker (default: 200)
    pub channel_capacity: usize,
}

/// Batch email campaign pacing.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CampaignConfig {
    /// Recipients per batch (default: 50)
    pub batch_size: usize,
    /// Pause between batches (default: 1s)
    #[serde(with = "humantime_serde")]
    pub batch_pause: Duration,
}

/// One entry of `allowed_origins`: `*` or an origin URL.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CorsOrigin {
    /// `*`
    #[serde(deserialize_with = "parse_wildcard")]
    Wildcard,
    /// Specific origin URL (e.g., `https://tickets.example.com`)
    #[serde(deserialize_with = "parse_url")]
    Url(Url),
}

fn parse_wildcard<'de, D>(deserializer: D) -> Result<(), D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    if s == "*" {
        Ok(())
    } else {
        Err(serde::de::Error::custom("Expected '*'"))
    }
}

fn parse_url<'de, D>(deserializer: D) -> Result<Url, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    Url::parse(&s).map_err(serde::de::Error::custom)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            public_url: "http://localhost:3000".to_string(),
            database_url: None,
            database: DatabaseConfig::default(),
            admin_emails: Vec::new(),
            auth: AuthConfig::default(),
            security: SecurityConfig::default(),
            email: EmailConfig::default(),
            registration: RegistrationConfig::default(),
            notifications: NotificationsConfig::default(),
            webhooks: WebhookConfig::default(),
            campaigns: CampaignConfig::default(),
            enable_metrics: true,
            enable_otel_export: false,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost:5432/registrar".to_string(),
            pool: PoolSettings::default(),
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 0,
            acquire_timeout_secs: 30,
            idle_timeout_secs: 600,
            max_lifetime_secs: 1800,
        }
    }
}

impl Default for ProxyHeaderAuthConfig {
    fn default() -> Self {
        Self {
            user_header: "x-registrar-user".to_string(),
            phone_verified_header: "x-registrar-phone-verified".to_string(),
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            // Same-origin only until configured
            allowed_origins: Vec::new(),
            allow_credentials: true,
            max_age: Some(3600),
            exposed_headers: vec!["location".to_string()],
        }
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            transport: EmailTransportConfig::default(),
            from_email: "noreply@example.com".to_string(),
            from_name: "Registrar".to_string(),
            reply_to: None,
        }
    }
}

impl Default for EmailTransportConfig {
    fn default() -> Self {
        Self::File {
            path: "./emails".to_string(),
        }
    }
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            form_max_field_length: 2000,
        }
    }
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval: Duration::from_secs(5),
            claim_timeout: Duration::from_secs(120),
            max_attempts: 8,
            backoff_base: Duration::from_secs(10),
            backoff_max: Duration::from_secs(30 * 60),
            batch_size: 50,
        }
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval: Duration::from_secs(1),
            timeout: Duration::from_secs(30),
            max_retries: 5,
            backoff_base: Duration::from_secs(30),
            backoff_max: Duration::from_secs(60 * 60),
            circuit_breaker_threshold: 3,
            claim_batch_size: 50,
            claim_timeout: Duration::from_secs(120),
            max_concurrent_sends: 20,
            channel_capacity: 200,
        }
    }
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            batch_pause: Duration::from_secs(1),
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let mut config: Self = Self::figment(args).extract()?;

        if let Some(url) = config.database_url.take() {
            config.database.url = url;
        }

        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Reject settings that would only fail later at runtime.
    pub fn validate(&self) -> Result<(), Error> {
        if self.database.url.is_empty() {
            return Err(invalid("database.url must be set (or provide DATABASE_URL)"));
        }

        if self.database.pool.min_connections > self.database.pool.max_connections {
            return Err(invalid(format!(
                "database.pool.min_connections ({}) cannot be greater than max_connections ({})",
                self.database.pool.min_connections, self.database.pool.max_connections
            )));
        }

        if self.auth.proxy_header.user_header.is_empty() {
            return Err(invalid("auth.proxy_header.user_header cannot be empty"));
        }

        let cors = &self.security.cors;
        if cors.allow_credentials && cors.allowed_origins.iter().any(|o| matches!(o, CorsOrigin::Wildcard)) {
            return Err(invalid("security.cors.allowed_origins cannot contain \"*\" when allow_credentials is true"));
        }

        if self.registration.form_max_field_length == 0 {
            return Err(invalid("registration.form_max_field_length must be greater than 0"));
        }

        let n = &self.notifications;
        if n.enabled {
            if n.batch_size <= 0 {
                return Err(invalid("notifications.batch_size must be greater than 0"));
            }
            if n.max_attempts <= 0 {
                return Err(invalid("notifications.max_attempts must be greater than 0"));
            }
            if n.backoff_base > n.backoff_max {
                return Err(invalid(format!(
                    "notifications.backoff_base ({:?}) cannot be greater than backoff_max ({:?})",
                    n.backoff_base, n.backoff_max
                )));
            }
        }

        let w = &self.webhooks;
        if w.enabled {
            if w.max_retries <= 0 {
                return Err(invalid("webhooks.max_retries must be greater than 0"));
            }
            if w.circuit_breaker_threshold <= 0 {
                return Err(invalid("webhooks.circuit_breaker_threshold must be greater than 0"));
            }
            if w.claim_batch_size <= 0 || w.max_concurrent_sends == 0 || w.channel_capacity == 0 {
                return Err(invalid(
                    "webhooks.claim_batch_size, max_concurrent_sends and channel_capacity must be greater than 0",
                ));
            }
            if w.backoff_base > w.backoff_max {
                return Err(invalid(format!(
                    "webhooks.backoff_base ({:?}) cannot be greater than backoff_max ({:?})",
                    w.backoff_base, w.backoff_max
                )));
            }
        }

        if self.campaigns.batch_size == 0 {
            return Err(invalid("campaigns.batch_size must be greater than 0"));
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            .merge(Yaml::file(&args.config))
            .merge(Env::prefixed("REGISTRAR_").split("__"))
            .merge(Env::raw().only(&["DATABASE_URL"]))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether `email` may use the admin endpoints. Compared case-insensitively.
    pub fn is_admin(&self, email: &str) -> bool {
        self.admin_emails.iter().any(|admin| admin.eq_ignore_ascii_case(email))
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::Internal {
        operation: format!("Config validation: {}", message.into()),
    }
}
