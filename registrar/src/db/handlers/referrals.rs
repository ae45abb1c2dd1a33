//! Database repository for referral codes and attribution records.

use sqlx::PgConnection;
use tracing::instrument;

use crate::db::errors::Result;
use crate::db::models::referrals::{Referral, ReferralUsage};
use crate::types::{EventId, ReferralId, RegistrationId, abbrev_uuid};

pub struct Referrals<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Referrals<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Find a referral that may be used for a new registration in `event_id`:
    /// it must be active and its owning registration must be confirmed.
    #[instrument(skip(self, code), fields(event_id = %abbrev_uuid(&event_id)), err)]
    pub async fn find_valid(&mut self, code: &str, event_id: EventId) -> Result<Option<Referral>> {
        let referral = sqlx::query_as::<_, Referral>(
            r#"
            SELECT rf.*
            FROM referrals rf
            JOIN registrations owner_reg ON owner_reg.id = rf.registration_id
            WHERE rf.code = $1
              AND rf.event_id = $2
              AND rf.is_active = true
              AND owner_reg.status = 'confirmed'
            "#,
        )
        .bind(code)
        .bind(event_id)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(referral)
    }

    #[instrument(skip(self), fields(registration_id = %abbrev_uuid(&registration_id)), err)]
    pub async fn get_by_registration(&mut self, registration_id: RegistrationId) -> Result<Option<Referral>> {
        let referral = sqlx::query_as::<_, Referral>("SELECT * FROM referrals WHERE registration_id = $1")
            .bind(registration_id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(referral)
    }

    /// Insert the referral for a registration. Returns `None` if the
    /// registration already has one (a concurrent caller won).
    #[instrument(skip(self, code), fields(registration_id = %abbrev_uuid(&registration_id)), err)]
    pub async fn create_for_registration(
        &mut self,
        registration_id: RegistrationId,
        event_id: EventId,
        code: &str,
    ) -> Result<Option<Referral>> {
        let referral = sqlx::query_as::<_, Referral>(
            r#"
            INSERT INTO referrals (registration_id, event_id, code)
            VALUES ($1, $2, $3)
            ON CONFLICT (registration_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(registration_id)
        .bind(event_id)
        .bind(code)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(referral)
    }

    /// Record that `registration_id` was referred. Call exactly once per registration.
    #[instrument(skip(self), fields(referral_id = %abbrev_uuid(&referral_id), registration_id = %abbrev_uuid(&registration_id)), err)]
    pub async fn attribute(
        &mut self,
        referral_id: ReferralId,
        registration_id: RegistrationId,
        event_id: EventId,
    ) -> Result<ReferralUsage> {
        let usage = sqlx::query_as::<_, ReferralUsage>(
            r#"
            INSERT INTO referral_usages (referral_id, registration_id, event_id)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(referral_id)
        .bind(registration_id)
        .bind(event_id)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(usage)
    }

    /// All attributions, including referred registrations that were later cancelled.
    #[instrument(skip(self), fields(referral_id = %abbrev_uuid(&referral_id)), err)]
    pub async fn count_usages(&mut self, referral_id: ReferralId) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM referral_usages WHERE referral_id = $1")
            .bind(referral_id)
            .fetch_one(&mut *self.db)
            .await?;

        Ok(count)
    }

    /// Attributions whose referred registration is still confirmed.
    #[instrument(skip(self), fields(referral_id = %abbrev_uuid(&referral_id)), err)]
    pub async fn count_confirmed_usages(&mut self, referral_id: ReferralId) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM referral_usages u
            JOIN registrations r ON r.id = u.registration_id
            WHERE u.referral_id = $1 AND r.status = 'confirmed'
            "#,
        )
        .bind(referral_id)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(count)
    }
}
