//! Registration transaction coordinator.
//!
//! A registration is decided in two phases:
//!
//! 1. **Preflight** reads current state on a plain connection and rejects
//!    anything that obviously cannot succeed. It is advisory: the state may
//!    change before the transaction runs.
//! 2. **Commit** re-checks the contended facts (duplicate email, capacity,
//!    invitation code usage) inside one `SERIALIZABLE` transaction and applies
//!    every write together with the outbox rows for its side effects.
//!
//! Postgres is the only arbiter between concurrent requests. A lost
//! serialization race surfaces as [`RegistrationError::TransactionConflict`],
//! which clients may retry unchanged.

pub mod errors;
pub mod form;
pub mod gate;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use rand::Rng;
use serde::Deserialize;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use tokio::sync::Notify;
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;

use crate::config::RegistrationConfig;
use crate::db::handlers::{Events, InvitationCodes, Referrals, Registrations, Tickets};
use crate::db::models::events::Event;
use crate::db::models::referrals::Referral;
use crate::db::models::registrations::{Registration, RegistrationCreateDBRequest, RegistrationStatus};
use crate::db::models::tickets::{Reservation, Ticket};
use crate::notifications::{RegistrationSnapshot, enqueue_registration_event};
use crate::types::{EventId, ReferralId, RegistrationId, TicketId, abbrev_uuid};
use crate::webhooks::WebhookEventType;

pub use errors::{FieldError, RegistrationError};
use gate::CodeDecision;

const REFERRAL_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const REFERRAL_CODE_LENGTH: usize = 8;
const REFERRAL_CODE_ATTEMPTS: usize = 3;
const REFERRAL_CODE_UNIQUE: &str = "referrals_code_key";

/// A registration attempt as submitted by the client.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct RegistrationRequest {
    #[schema(value_type = String, format = "uuid")]
    pub event_id: EventId,
    #[schema(value_type = String, format = "uuid")]
    pub ticket_id: TicketId,
    #[serde(default)]
    pub invitation_code: Option<String>,
    #[serde(default)]
    pub referral_code: Option<String>,
    /// Answers to the event's registration form, keyed by field name
    #[serde(default)]
    #[schema(value_type = Object)]
    pub form_data: serde_json::Value,
}

/// Who is registering, as established by the auth layer.
#[derive(Debug, Clone)]
pub struct Registrant {
    pub email: String,
    pub phone_verified: bool,
}

/// Who is asking to cancel or read a registration.
#[derive(Debug, Clone)]
pub struct Requester {
    pub email: String,
    pub is_admin: bool,
}

impl Requester {
    fn may_access(&self, registration: &Registration) -> bool {
        self.is_admin || registration.email.eq_ignore_ascii_case(&self.email)
    }
}

/// Everything preflight established, carried into the transaction.
struct Plan {
    event: Event,
    ticket: Ticket,
    code: CodeDecision,
    referral: Option<String>,
    form_data: serde_json::Value,
}

#[derive(Clone)]
pub struct RegistrationCoordinator {
    pool: PgPool,
    form_max_field_length: usize,
    notify: Arc<Notify>,
}

impl RegistrationCoordinator {
    /// `notify` wakes the notification worker after each commit.
    pub fn new(pool: PgPool, config: &RegistrationConfig, notify: Arc<Notify>) -> Self {
        Self {
            pool,
            form_max_field_length: config.form_max_field_length,
            notify,
        }
    }

    #[instrument(skip_all, fields(event_id = %abbrev_uuid(&request.event_id), ticket_id = %abbrev_uuid(&request.ticket_id)))]
    pub async fn register(&self, request: &RegistrationRequest, registrant: &Registrant) -> Result<Registration, RegistrationError> {
        let result = self.try_register(request, registrant).await;

        let outcome = match &result {
            Ok(_) => "confirmed",
            Err(e) => e.outcome(),
        };
        counter!("registrar_registrations_total", "outcome" => outcome).increment(1);

        match &result {
            Ok(registration) => {
                info!(registration_id = %abbrev_uuid(&registration.id), "Registration confirmed");
                self.notify.notify_one();
            }
            Err(RegistrationError::Internal(e)) => warn!(error = %format!("{e:#}"), "Registration failed"),
            Err(e) => debug!(outcome = e.code(), "Registration refused"),
        }

        result
    }

    async fn try_register(&self, request: &RegistrationRequest, registrant: &Registrant) -> Result<Registration, RegistrationError> {
        let plan = {
            let mut conn = self.pool.acquire().await?;
            self.preflight(&mut conn, request, registrant, Utc::now()).await?
        };

        let mut tx = begin_serializable(&self.pool).await?;
        let registration = commit_phase(&mut tx, &plan, &registrant.email).await?;
        tx.commit().await?;

        Ok(registration)
    }

    /// Cheap, possibly stale checks in the order clients see them.
    async fn preflight(
        &self,
        conn: &mut PgConnection,
        request: &RegistrationRequest,
        registrant: &Registrant,
        now: DateTime<Utc>,
    ) -> Result<Plan, RegistrationError> {
        let event = Events::new(conn)
            .get_by_id(request.event_id)
            .await?
            .ok_or(RegistrationError::EventNotFound)?;
        if !event.is_active {
            return Err(RegistrationError::EventNotActive);
        }

        let ticket = Tickets::new(conn)
            .get_by_id(request.ticket_id)
            .await?
            .filter(|t| t.event_id == event.id && t.is_visible)
            .ok_or(RegistrationError::TicketNotFound)?;
        if !ticket.is_on_sale(now) {
            return Err(RegistrationError::TicketNotOnSale);
        }
        if Tickets::new(conn).try_reserve(ticket.id).await? == Reservation::SoldOut {
            return Err(RegistrationError::TicketSoldOut);
        }

        if Registrations::new(conn)
            .find_active_by_email(event.id, &registrant.email)
            .await?
            .is_some()
        {
            return Err(RegistrationError::AlreadyRegistered);
        }

        let supplied_code = non_empty(request.invitation_code.as_deref());
        let code_row = match supplied_code {
            Some(code) => InvitationCodes::new(conn).find_by_code(event.id, code).await?,
            None => None,
        };
        let validation = gate::evaluate(code_row.as_ref(), ticket.id, now);
        let code = gate::apply_policy(
            ticket.require_invite_code,
            supplied_code.is_some(),
            validation,
            code_row.as_ref().map(|c| c.id),
        )?;

        if ticket.require_sms_verification && !registrant.phone_verified {
            return Err(RegistrationError::SmsVerificationRequired);
        }

        let referral = match non_empty(request.referral_code.as_deref()) {
            Some(code) => {
                Referrals::new(conn)
                    .find_valid(code, event.id)
                    .await?
                    .ok_or(RegistrationError::ReferralCodeInvalid)?;
                Some(code.to_string())
            }
            None => None,
        };

        let fields = form::parse_schema(&event.form_schema)?;
        let form_data = form::validate(&fields, &request.form_data, self.form_max_field_length)
            .map_err(|errors| RegistrationError::FormValidationFailed { errors })?;

        Ok(Plan {
            event,
            ticket,
            code,
            referral,
            form_data,
        })
    }

    /// Cancel a confirmed registration and release its ticket.
    ///
    /// Invitation code usage and referral attribution are left as they are.
    #[instrument(skip(self, requester), fields(registration_id = %abbrev_uuid(&id)))]
    pub async fn cancel(&self, id: RegistrationId, requester: &Requester) -> Result<Registration, RegistrationError> {
        let result = self.try_cancel(id, requester).await;

        let outcome = match &result {
            Ok(_) => "cancelled",
            Err(e) => e.outcome(),
        };
        counter!("registrar_cancellations_total", "outcome" => outcome).increment(1);

        if result.is_ok() {
            info!("Registration cancelled");
            self.notify.notify_one();
        }
        result
    }

    async fn try_cancel(&self, id: RegistrationId, requester: &Requester) -> Result<Registration, RegistrationError> {
        let mut tx = begin_serializable(&self.pool).await?;

        let current = Registrations::new(&mut tx)
            .get_by_id(id)
            .await?
            .filter(|r| requester.may_access(r))
            .ok_or(RegistrationError::RegistrationNotFound)?;

        match current.registration_status() {
            RegistrationStatus::Cancelled => return Err(RegistrationError::AlreadyCancelled),
            RegistrationStatus::Pending => return Err(RegistrationError::RegistrationNotConfirmed),
            RegistrationStatus::Confirmed => {}
        }

        // Conditional on status, so a concurrent cancel cannot release twice
        let cancelled = Registrations::new(&mut tx)
            .mark_cancelled(id)
            .await?
            .ok_or(RegistrationError::AlreadyCancelled)?;

        if !Tickets::new(&mut tx).release(cancelled.ticket_id).await? {
            warn!(
                registration_id = %abbrev_uuid(&id),
                ticket_id = %abbrev_uuid(&cancelled.ticket_id),
                "Ticket sold count already zero on cancel"
            );
        }

        let event = Events::new(&mut tx)
            .get_by_id(cancelled.event_id)
            .await?
            .ok_or(RegistrationError::EventNotFound)?;
        let ticket = Tickets::new(&mut tx)
            .get_by_id(cancelled.ticket_id)
            .await?
            .ok_or(RegistrationError::TicketNotFound)?;

        enqueue_registration_event(
            &mut tx,
            WebhookEventType::RegistrationCancelled,
            &RegistrationSnapshot {
                registration: &cancelled,
                ticket: &ticket,
                event: &event,
            },
        )
        .await?;

        tx.commit().await?;
        Ok(cancelled)
    }

    #[instrument(skip(self, requester), fields(registration_id = %abbrev_uuid(&id)), err)]
    pub async fn get(&self, id: RegistrationId, requester: &Requester) -> Result<Registration, RegistrationError> {
        let mut conn = self.pool.acquire().await?;
        Registrations::new(&mut conn)
            .get_by_id(id)
            .await?
            .filter(|r| requester.may_access(r))
            .ok_or(RegistrationError::RegistrationNotFound)
    }

    /// The shareable referral code of a confirmed registration, issued on first request.
    #[instrument(skip(self, requester), fields(registration_id = %abbrev_uuid(&id)), err)]
    pub async fn referral_code(&self, id: RegistrationId, requester: &Requester) -> Result<Referral, RegistrationError> {
        let mut conn = self.pool.acquire().await?;

        let registration = Registrations::new(&mut conn)
            .get_by_id(id)
            .await?
            .filter(|r| requester.may_access(r))
            .ok_or(RegistrationError::RegistrationNotFound)?;
        if registration.registration_status() != RegistrationStatus::Confirmed {
            return Err(RegistrationError::RegistrationNotConfirmed);
        }

        let mut referrals = Referrals::new(&mut conn);
        if let Some(existing) = referrals.get_by_registration(id).await? {
            return Ok(existing);
        }

        for _ in 0..REFERRAL_CODE_ATTEMPTS {
            let code = generate_referral_code();
            match referrals.create_for_registration(id, registration.event_id, &code).await {
                Ok(Some(created)) => return Ok(created),
                // A concurrent request issued one first
                Ok(None) => {
                    return referrals
                        .get_by_registration(id)
                        .await?
                        .ok_or_else(|| anyhow::anyhow!("referral for {id} vanished after conflict").into());
                }
                Err(e) if e.is_unique_violation_of(REFERRAL_CODE_UNIQUE) => {
                    debug!("Referral code collision, regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(anyhow::anyhow!("could not generate a unique referral code after {REFERRAL_CODE_ATTEMPTS} attempts").into())
    }

    /// Confirmed registrants of an event, for campaigns.
    pub async fn confirmed_emails(&self, event_id: EventId) -> Result<Vec<String>, RegistrationError> {
        let mut conn = self.pool.acquire().await?;
        Events::new(&mut conn)
            .get_by_id(event_id)
            .await?
            .ok_or(RegistrationError::EventNotFound)?;
        Ok(Registrations::new(&mut conn).list_confirmed_emails(event_id).await?)
    }
}

async fn begin_serializable(pool: &PgPool) -> Result<Transaction<'static, Postgres>, RegistrationError> {
    let mut tx = pool.begin().await?;
    sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
        .execute(&mut *tx)
        .await?;
    Ok(tx)
}

/// The atomic phase. Any error leaves the transaction to roll back on drop.
async fn commit_phase(tx: &mut PgConnection, plan: &Plan, email: &str) -> Result<Registration, RegistrationError> {
    let Plan {
        event,
        ticket,
        code,
        referral,
        form_data,
    } = plan;

    if Registrations::new(tx).find_active_by_email(event.id, email).await?.is_some() {
        return Err(RegistrationError::AlreadyRegistered);
    }

    if Tickets::new(tx).try_reserve(ticket.id).await? == Reservation::SoldOut {
        return Err(RegistrationError::TicketSoldOut);
    }

    let invitation_code_id = match code {
        CodeDecision::Consume(code_id) => match InvitationCodes::new(tx).consume(*code_id, ticket.id).await? {
            Some(consumed) => Some(consumed.id),
            None => {
                let current = InvitationCodes::new(tx).get_by_id(*code_id).await?;
                let validation = gate::evaluate(current.as_ref(), ticket.id, Utc::now());
                debug!(
                    code_id = %abbrev_uuid(code_id),
                    reason = validation.as_str(),
                    "Invitation code could not be redeemed"
                );
                // Without a code id the policy can only skip or refuse
                gate::apply_policy(ticket.require_invite_code, true, validation, None)?;
                None
            }
        },
        CodeDecision::Skip => None,
    };

    let referral_id: Option<ReferralId> = match referral {
        Some(code) => Some(
            Referrals::new(tx)
                .find_valid(code, event.id)
                .await?
                .ok_or(RegistrationError::ReferralCodeInvalid)?
                .id,
        ),
        None => None,
    };

    let registration = Registrations::new(tx)
        .create(&RegistrationCreateDBRequest {
            event_id: event.id,
            ticket_id: ticket.id,
            invitation_code_id,
            email: email.to_string(),
            status: RegistrationStatus::Confirmed,
            form_data: form_data.clone(),
        })
        .await?;

    if !Tickets::new(tx).increment_sold(ticket.id).await? {
        return Err(RegistrationError::TicketSoldOut);
    }

    if let Some(referral_id) = referral_id {
        Referrals::new(tx).attribute(referral_id, registration.id, event.id).await?;
    }

    enqueue_registration_event(
        tx,
        WebhookEventType::RegistrationConfirmed,
        &RegistrationSnapshot {
            registration: &registration,
            ticket,
            event,
        },
    )
    .await?;

    Ok(registration)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn generate_referral_code() -> String {
    let mut rng = rand::rng();
    (0..REFERRAL_CODE_LENGTH)
        .map(|_| REFERRAL_CODE_ALPHABET[rng.random_range(0..REFERRAL_CODE_ALPHABET.len())] as char)
        .collect()
}
