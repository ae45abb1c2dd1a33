//! Test utilities shared by the unit and HTTP tests.
//!
//! Events, tickets and codes are owned by the event management service, so
//! these fixtures insert them with plain SQL.

use crate::config::{Config, EmailConfig, EmailTransportConfig, PoolSettings};
use crate::db::handlers::Webhooks;
use crate::db::models::{
    events::Event,
    invitation_codes::InvitationCode,
    registrations::Registration,
    tickets::Ticket,
    webhooks::{WebhookDelivery, WebhookDeliveryCreateDBRequest, WebhookEndpoint},
};
use crate::types::EventId;
use axum_test::TestServer;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

pub const ADMIN_EMAIL: &str = "admin@example.com";

pub async fn create_test_app(pool: PgPool) -> (TestServer, crate::BackgroundServices) {
    let config = create_test_config();

    let app = crate::Application::new_with_pool(config, Some(pool))
        .await
        .expect("Failed to create application");

    app.into_test_server()
}

pub fn create_test_config() -> Config {
    // Use temp directory for test emails
    let temp_dir = std::env::temp_dir().join(format!("registrar-test-emails-{}", std::process::id()));

    let mut config = Config {
        admin_emails: vec![ADMIN_EMAIL.to_string()],
        email: EmailConfig {
            transport: EmailTransportConfig::File {
                path: temp_dir.to_string_lossy().to_string(),
            },
            ..Default::default()
        },
        enable_metrics: false,
        ..Default::default()
    };
    config.database.pool = PoolSettings {
        max_connections: 4,
        min_connections: 0,
        ..Default::default()
    };
    // Tests drive the workers by hand
    config.notifications.enabled = false;
    config.webhooks.enabled = false;
    config
}

/// Identity headers as the upstream auth proxy would set them.
pub fn identity_headers(email: &str, phone_verified: bool) -> Vec<(String, String)> {
    let auth = crate::config::ProxyHeaderAuthConfig::default();
    let mut headers = vec![(auth.user_header, email.to_string())];
    if phone_verified {
        headers.push((auth.phone_verified_header, "true".to_string()));
    }
    headers
}

pub async fn create_test_event(pool: &PgPool) -> Event {
    create_test_event_with_schema(pool, serde_json::json!([])).await
}

pub async fn create_test_event_with_schema(pool: &PgPool, form_schema: serde_json::Value) -> Event {
    let slug = format!("event-{}", Uuid::new_v4().simple());
    sqlx::query_as::<_, Event>("INSERT INTO events (name, slug, form_schema) VALUES ($1, $2, $3) RETURNING *")
        .bind(format!("Test Event {slug}"))
        .bind(&slug)
        .bind(form_schema)
        .fetch_one(pool)
        .await
        .expect("Failed to create test event")
}

#[derive(Debug, Clone)]
pub struct TicketFixture {
    pub quantity: i32,
    pub price: Decimal,
    pub is_active: bool,
    pub sale_start: Option<DateTime<Utc>>,
    pub sale_end: Option<DateTime<Utc>>,
    pub require_invite_code: bool,
    pub require_sms_verification: bool,
}

impl Default for TicketFixture {
    fn default() -> Self {
        Self {
            quantity: 10,
            price: Decimal::new(2500, 2),
            is_active: true,
            sale_start: None,
            sale_end: None,
            require_invite_code: false,
            require_sms_verification: false,
        }
    }
}

pub async fn create_test_ticket(pool: &PgPool, event_id: EventId, fixture: TicketFixture) -> Ticket {
    sqlx::query_as::<_, Ticket>(
        r#"
        INSERT INTO tickets (
            event_id, name, price, quantity, is_active, sale_start, sale_end,
            require_invite_code, require_sms_verification
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING *
        "#,
    )
    .bind(event_id)
    .bind(format!("Ticket {}", &Uuid::new_v4().simple().to_string()[..8]))
    .bind(fixture.price)
    .bind(fixture.quantity)
    .bind(fixture.is_active)
    .bind(fixture.sale_start)
    .bind(fixture.sale_end)
    .bind(fixture.require_invite_code)
    .bind(fixture.require_sms_verification)
    .fetch_one(pool)
    .await
    .expect("Failed to create test ticket")
}

#[derive(Debug, Clone)]
pub struct CodeFixture {
    pub code: Option<String>,
    pub usage_limit: Option<i32>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl Default for CodeFixture {
    fn default() -> Self {
        Self {
            code: None,
            usage_limit: None,
            valid_from: None,
            valid_until: None,
            is_active: true,
        }
    }
}

pub async fn create_test_code(pool: &PgPool, ticket: &Ticket, fixture: CodeFixture) -> InvitationCode {
    let code = fixture
        .code
        .unwrap_or_else(|| format!("INVITE-{}", &Uuid::new_v4().simple().to_string()[..8]));

    sqlx::query_as::<_, InvitationCode>(
        r#"
        INSERT INTO invitation_codes (event_id, ticket_id, code, usage_limit, valid_from, valid_until, is_active)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING *
        "#,
    )
    .bind(ticket.event_id)
    .bind(ticket.id)
    .bind(code)
    .bind(fixture.usage_limit)
    .bind(fixture.valid_from)
    .bind(fixture.valid_until)
    .bind(fixture.is_active)
    .fetch_one(pool)
    .await
    .expect("Failed to create test invitation code")
}

/// Insert a confirmed registration and take one unit of the ticket's capacity.
pub async fn create_test_registration(pool: &PgPool, ticket: &Ticket, email: &str) -> Registration {
    let mut tx = pool.begin().await.expect("Failed to begin transaction");

    let registration = sqlx::query_as::<_, Registration>(
        r#"
        INSERT INTO registrations (event_id, ticket_id, email, status)
        VALUES ($1, $2, $3, 'confirmed')
        RETURNING *
        "#,
    )
    .bind(ticket.event_id)
    .bind(ticket.id)
    .bind(email)
    .fetch_one(&mut *tx)
    .await
    .expect("Failed to create test registration");

    sqlx::query("UPDATE tickets SET sold_count = sold_count + 1 WHERE id = $1")
        .bind(ticket.id)
        .execute(&mut *tx)
        .await
        .expect("Failed to take ticket capacity");

    tx.commit().await.expect("Failed to commit test registration");
    registration
}

#[derive(Debug, Clone)]
pub struct EndpointFixture {
    pub url: String,
    pub auth_header: Option<String>,
    pub event_types: Option<serde_json::Value>,
    pub is_active: bool,
}

impl Default for EndpointFixture {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:9/webhook".to_string(),
            auth_header: None,
            event_types: None,
            is_active: true,
        }
    }
}

pub async fn create_test_endpoint(pool: &PgPool, event_id: EventId, fixture: EndpointFixture) -> WebhookEndpoint {
    sqlx::query_as::<_, WebhookEndpoint>(
        r#"
        INSERT INTO webhook_endpoints (event_id, url, auth_header, event_types, is_active)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(event_id)
    .bind(fixture.url)
    .bind(fixture.auth_header)
    .bind(fixture.event_types)
    .bind(fixture.is_active)
    .fetch_one(pool)
    .await
    .expect("Failed to create test webhook endpoint")
}

pub async fn create_test_delivery(pool: &PgPool, endpoint: &WebhookEndpoint, registration_id: Uuid) -> WebhookDelivery {
    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    Webhooks::new(&mut conn)
        .create_delivery(&WebhookDeliveryCreateDBRequest {
            endpoint_id: endpoint.id,
            event_id: endpoint.event_id,
            registration_id,
            event_type: "registration_confirmed".to_string(),
            payload: serde_json::json!({
                "type": "registration_confirmed",
                "timestamp": Utc::now(),
                "data": { "registration": { "id": registration_id } }
            }),
        })
        .await
        .expect("Failed to create test delivery")
}

pub async fn get_ticket(pool: &PgPool, id: Uuid) -> Ticket {
    sqlx::query_as::<_, Ticket>("SELECT * FROM tickets WHERE id = $1")
        .bind(id)
        .fetch_one(pool)
        .await
        .expect("Failed to load ticket")
}
