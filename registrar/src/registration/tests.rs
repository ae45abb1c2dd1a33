use super::*;
use crate::db::handlers::Outbox;
use crate::test_utils::{
    CodeFixture, TicketFixture, create_test_code, create_test_event, create_test_event_with_schema, create_test_ticket, get_ticket,
};
use chrono::Duration;
use futures::future::join_all;
use serde_json::json;

fn coordinator(pool: &PgPool) -> RegistrationCoordinator {
    RegistrationCoordinator::new(pool.clone(), &RegistrationConfig::default(), Arc::new(Notify::new()))
}

fn registrant(email: &str) -> Registrant {
    Registrant {
        email: email.to_string(),
        phone_verified: false,
    }
}

fn owner(email: &str) -> Requester {
    Requester {
        email: email.to_string(),
        is_admin: false,
    }
}

fn request(ticket: &Ticket) -> RegistrationRequest {
    RegistrationRequest {
        event_id: ticket.event_id,
        ticket_id: ticket.id,
        invitation_code: None,
        referral_code: None,
        form_data: json!({}),
    }
}

/// What a well-behaved client does: resend on `retryable`, stop otherwise.
async fn register_with_retry(
    coordinator: &RegistrationCoordinator,
    request: &RegistrationRequest,
    registrant: &Registrant,
) -> Result<Registration, RegistrationError> {
    for _ in 0..50 {
        match coordinator.register(request, registrant).await {
            Err(e) if e.is_retryable() => tokio::task::yield_now().await,
            other => return other,
        }
    }
    panic!("registration for {} still conflicting after 50 attempts", registrant.email);
}

/// Same as [`register_with_retry`] for cancellations, which also contend on the ticket row.
async fn cancel_with_retry(
    coordinator: &RegistrationCoordinator,
    id: RegistrationId,
    requester: &Requester,
) -> Result<Registration, RegistrationError> {
    for _ in 0..50 {
        match coordinator.cancel(id, requester).await {
            Err(e) if e.is_retryable() => tokio::task::yield_now().await,
            other => return other,
        }
    }
    panic!("cancellation of {id} still conflicting after 50 attempts");
}

#[sqlx::test]
#[test_log::test]
async fn test_register_confirms_and_enqueues_side_effects(pool: PgPool) {
    let event = create_test_event(&pool).await;
    let ticket = create_test_ticket(&pool, event.id, TicketFixture::default()).await;

    let registration = coordinator(&pool)
        .register(&request(&ticket), &registrant("ada@example.com"))
        .await
        .unwrap();

    assert_eq!(registration.registration_status(), RegistrationStatus::Confirmed);
    assert_eq!(get_ticket(&pool, ticket.id).await.sold_count, 1);

    let mut conn = pool.acquire().await.unwrap();
    let outbox = Outbox::new(&mut conn).list_for_registration(registration.id).await.unwrap();
    let mut kinds: Vec<_> = outbox.iter().map(|m| m.kind.as_str()).collect();
    kinds.sort();
    assert_eq!(kinds, vec!["email", "webhook"]);
    assert!(outbox.iter().all(|m| m.event_type == "registration_confirmed"));
}

/// One seat left and two registrants arriving at once.
#[sqlx::test]
#[test_log::test]
async fn test_last_seat_goes_to_exactly_one_registrant(pool: PgPool) {
    let event = create_test_event(&pool).await;
    let ticket = create_test_ticket(&pool, event.id, TicketFixture { quantity: 1, ..Default::default() }).await;
    let coordinator = coordinator(&pool);
    let req = request(&ticket);
    let (first, second) = (registrant("a@example.com"), registrant("b@example.com"));

    let (a, b) = tokio::join!(
        register_with_retry(&coordinator, &req, &first),
        register_with_retry(&coordinator, &req, &second),
    );

    let results = [a, b];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(
        results
            .iter()
            .filter(|r| matches!(r, Err(RegistrationError::TicketSoldOut)))
            .count(),
        1
    );
    assert_eq!(get_ticket(&pool, ticket.id).await.sold_count, 1);
}

/// A single-use code presented twice at once.
#[sqlx::test]
#[test_log::test]
async fn test_single_use_code_redeemed_once(pool: PgPool) {
    let event = create_test_event(&pool).await;
    let ticket = create_test_ticket(
        &pool,
        event.id,
        TicketFixture {
            require_invite_code: true,
            ..Default::default()
        },
    )
    .await;
    let code = create_test_code(
        &pool,
        &ticket,
        CodeFixture {
            usage_limit: Some(1),
            ..Default::default()
        },
    )
    .await;
    let coordinator = coordinator(&pool);
    let req = RegistrationRequest {
        invitation_code: Some(code.code.clone()),
        ..request(&ticket)
    };
    let (first, second) = (registrant("a@example.com"), registrant("b@example.com"));

    let (a, b) = tokio::join!(
        register_with_retry(&coordinator, &req, &first),
        register_with_retry(&coordinator, &req, &second),
    );

    let results = [a, b];
    let winner = results.iter().find_map(|r| r.as_ref().ok()).expect("one registration succeeds");
    assert_eq!(winner.invitation_code_id, Some(code.id));
    assert!(results.iter().any(|r| matches!(
        r,
        Err(RegistrationError::InvitationCodeExhausted | RegistrationError::InvitationCodeInvalid)
    )));

    let mut conn = pool.acquire().await.unwrap();
    let reloaded = InvitationCodes::new(&mut conn).get_by_id(code.id).await.unwrap().unwrap();
    assert_eq!(reloaded.used_count, 1);
}

#[sqlx::test]
#[test_log::test]
async fn test_usage_limit_holds_under_contention(pool: PgPool) {
    const LIMIT: usize = 3;
    let event = create_test_event(&pool).await;
    let ticket = create_test_ticket(
        &pool,
        event.id,
        TicketFixture {
            quantity: 20,
            require_invite_code: true,
            ..Default::default()
        },
    )
    .await;
    let code = create_test_code(
        &pool,
        &ticket,
        CodeFixture {
            usage_limit: Some(LIMIT as i32),
            ..Default::default()
        },
    )
    .await;
    let coordinator = coordinator(&pool);
    let req = RegistrationRequest {
        invitation_code: Some(code.code.clone()),
        ..request(&ticket)
    };
    let registrants: Vec<_> = (0..2 * LIMIT).map(|i| registrant(&format!("r{i}@example.com"))).collect();

    let results = join_all(registrants.iter().map(|r| register_with_retry(&coordinator, &req, r))).await;

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), LIMIT);
    assert!(
        results
            .iter()
            .filter(|r| r.is_err())
            .all(|r| matches!(r, Err(RegistrationError::InvitationCodeExhausted)))
    );
    assert_eq!(get_ticket(&pool, ticket.id).await.sold_count, LIMIT as i32);
}

#[sqlx::test]
#[test_log::test]
async fn test_sold_count_stays_within_capacity(pool: PgPool) {
    let event = create_test_event(&pool).await;
    let ticket = create_test_ticket(&pool, event.id, TicketFixture { quantity: 3, ..Default::default() }).await;
    let coordinator = coordinator(&pool);
    let req = request(&ticket);
    let registrants: Vec<_> = (0..8).map(|i| registrant(&format!("burst{i}@example.com"))).collect();

    let results = join_all(registrants.iter().map(|r| register_with_retry(&coordinator, &req, r))).await;
    let confirmed: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();

    assert_eq!(confirmed.len(), 3);
    assert!(
        results
            .iter()
            .filter(|r| r.is_err())
            .all(|r| matches!(r, Err(RegistrationError::TicketSoldOut)))
    );
    assert_eq!(get_ticket(&pool, ticket.id).await.sold_count, 3);

    // Cancels and a new registration racing each other. Each cancel of the same
    // ticket may lose a serialization race, so they resend like clients would.
    let owners: Vec<_> = confirmed.iter().map(|r| owner(&r.email)).collect();
    let cancels = confirmed
        .iter()
        .zip(&owners)
        .map(|(r, requester)| cancel_with_retry(&coordinator, r.id, requester));
    let late = registrant("late@example.com");
    let (cancel_results, late_result) = tokio::join!(join_all(cancels), register_with_retry(&coordinator, &req, &late));

    assert!(cancel_results.iter().all(|r| r.is_ok()));
    let sold = get_ticket(&pool, ticket.id).await.sold_count;
    assert!((0..=3).contains(&sold));
    assert_eq!(sold, if late_result.is_ok() { 1 } else { 0 });
}

/// One live registration per email and event, across tickets.
#[sqlx::test]
#[test_log::test]
async fn test_already_registered_for_event(pool: PgPool) {
    let event = create_test_event(&pool).await;
    let general = create_test_ticket(&pool, event.id, TicketFixture::default()).await;
    let vip = create_test_ticket(&pool, event.id, TicketFixture::default()).await;
    let coordinator = coordinator(&pool);

    coordinator
        .register(&request(&general), &registrant("ada@example.com"))
        .await
        .unwrap();

    let err = coordinator
        .register(&request(&vip), &registrant("ADA@example.com"))
        .await
        .unwrap_err();
    assert!(matches!(err, RegistrationError::AlreadyRegistered));
    assert_eq!(get_ticket(&pool, vip.id).await.sold_count, 0);
}

#[sqlx::test]
#[test_log::test]
async fn test_double_cancel_is_rejected(pool: PgPool) {
    let event = create_test_event(&pool).await;
    let ticket = create_test_ticket(&pool, event.id, TicketFixture::default()).await;
    let coordinator = coordinator(&pool);
    let requester = owner("ada@example.com");

    let registration = coordinator
        .register(&request(&ticket), &registrant("ada@example.com"))
        .await
        .unwrap();
    assert_eq!(get_ticket(&pool, ticket.id).await.sold_count, 1);

    let cancelled = coordinator.cancel(registration.id, &requester).await.unwrap();
    assert_eq!(cancelled.registration_status(), RegistrationStatus::Cancelled);
    assert!(cancelled.cancelled_at.is_some());
    assert_eq!(get_ticket(&pool, ticket.id).await.sold_count, 0);

    let err = coordinator.cancel(registration.id, &requester).await.unwrap_err();
    assert!(matches!(err, RegistrationError::AlreadyCancelled));
    assert_eq!(get_ticket(&pool, ticket.id).await.sold_count, 0);

    // The seat and the email are free again
    coordinator
        .register(&request(&ticket), &registrant("ada@example.com"))
        .await
        .unwrap();
    assert_eq!(get_ticket(&pool, ticket.id).await.sold_count, 1);
}

#[sqlx::test]
#[test_log::test]
async fn test_cancel_requires_owner_or_admin(pool: PgPool) {
    let event = create_test_event(&pool).await;
    let ticket = create_test_ticket(&pool, event.id, TicketFixture::default()).await;
    let coordinator = coordinator(&pool);

    let registration = coordinator
        .register(&request(&ticket), &registrant("ada@example.com"))
        .await
        .unwrap();

    let err = coordinator.cancel(registration.id, &owner("mallory@example.com")).await.unwrap_err();
    assert!(matches!(err, RegistrationError::RegistrationNotFound));

    let admin = Requester {
        email: "ops@example.com".to_string(),
        is_admin: true,
    };
    coordinator.cancel(registration.id, &admin).await.unwrap();

    let mut conn = pool.acquire().await.unwrap();
    let outbox = Outbox::new(&mut conn).list_for_registration(registration.id).await.unwrap();
    assert_eq!(outbox.iter().filter(|m| m.event_type == "registration_cancelled").count(), 2);
}

#[sqlx::test]
#[test_log::test]
async fn test_cancel_leaves_code_usage_in_place(pool: PgPool) {
    let event = create_test_event(&pool).await;
    let ticket = create_test_ticket(
        &pool,
        event.id,
        TicketFixture {
            require_invite_code: true,
            ..Default::default()
        },
    )
    .await;
    let code = create_test_code(
        &pool,
        &ticket,
        CodeFixture {
            usage_limit: Some(1),
            ..Default::default()
        },
    )
    .await;
    let coordinator = coordinator(&pool);
    let req = RegistrationRequest {
        invitation_code: Some(code.code.clone()),
        ..request(&ticket)
    };

    let registration = coordinator.register(&req, &registrant("ada@example.com")).await.unwrap();
    coordinator.cancel(registration.id, &owner("ada@example.com")).await.unwrap();

    let err = coordinator.register(&req, &registrant("ada@example.com")).await.unwrap_err();
    assert!(matches!(err, RegistrationError::InvitationCodeExhausted));
}

#[sqlx::test]
#[test_log::test]
async fn test_invitation_code_policy(pool: PgPool) {
    let event = create_test_event(&pool).await;
    let open = create_test_ticket(&pool, event.id, TicketFixture::default()).await;
    let gated = create_test_ticket(
        &pool,
        event.id,
        TicketFixture {
            require_invite_code: true,
            ..Default::default()
        },
    )
    .await;
    let expired = create_test_code(
        &pool,
        &gated,
        CodeFixture {
            valid_until: Some(Utc::now() - Duration::days(1)),
            ..Default::default()
        },
    )
    .await;
    let coordinator = coordinator(&pool);

    let err = coordinator
        .register(&request(&gated), &registrant("a@example.com"))
        .await
        .unwrap_err();
    assert!(matches!(err, RegistrationError::InvitationCodeRequired));

    let with_expired = RegistrationRequest {
        invitation_code: Some(expired.code.clone()),
        ..request(&gated)
    };
    let err = coordinator.register(&with_expired, &registrant("a@example.com")).await.unwrap_err();
    assert!(matches!(err, RegistrationError::InvitationCodeInvalid));

    // A bad code on a ticket that does not need one is ignored
    let bonus = RegistrationRequest {
        invitation_code: Some("NOT-A-CODE".to_string()),
        ..request(&open)
    };
    let registration = coordinator.register(&bonus, &registrant("a@example.com")).await.unwrap();
    assert!(registration.invitation_code_id.is_none());
}

#[sqlx::test]
#[test_log::test]
async fn test_preflight_refusals(pool: PgPool) {
    let event = create_test_event(&pool).await;
    let closed = create_test_ticket(
        &pool,
        event.id,
        TicketFixture {
            sale_end: Some(Utc::now() - Duration::hours(1)),
            ..Default::default()
        },
    )
    .await;
    let sms = create_test_ticket(
        &pool,
        event.id,
        TicketFixture {
            require_sms_verification: true,
            ..Default::default()
        },
    )
    .await;
    let other_event = create_test_event(&pool).await;
    let foreign = create_test_ticket(&pool, other_event.id, TicketFixture::default()).await;
    let coordinator = coordinator(&pool);
    let who = registrant("a@example.com");

    let err = coordinator.register(&request(&closed), &who).await.unwrap_err();
    assert!(matches!(err, RegistrationError::TicketNotOnSale));

    let err = coordinator.register(&request(&sms), &who).await.unwrap_err();
    assert!(matches!(err, RegistrationError::SmsVerificationRequired));

    let mismatched = RegistrationRequest {
        ticket_id: foreign.id,
        ..request(&sms)
    };
    let err = coordinator.register(&mismatched, &who).await.unwrap_err();
    assert!(matches!(err, RegistrationError::TicketNotFound));

    let unknown = RegistrationRequest {
        event_id: uuid::Uuid::new_v4(),
        ..request(&sms)
    };
    let err = coordinator.register(&unknown, &who).await.unwrap_err();
    assert!(matches!(err, RegistrationError::EventNotFound));

    let verified = Registrant {
        phone_verified: true,
        ..who
    };
    coordinator.register(&request(&sms), &verified).await.unwrap();
}

#[sqlx::test]
#[test_log::test]
async fn test_form_validation_reports_every_field(pool: PgPool) {
    let event = create_test_event_with_schema(
        &pool,
        json!([
            {"name": "full_name", "type": "text", "required": true},
            {"name": "shirt_size", "type": "select", "required": true, "options": ["S", "M", "L"]},
            {"name": "company", "type": "text"}
        ]),
    )
    .await;
    let ticket = create_test_ticket(&pool, event.id, TicketFixture::default()).await;
    let coordinator = coordinator(&pool);

    let bad = RegistrationRequest {
        form_data: json!({"shirt_size": "XXL"}),
        ..request(&ticket)
    };
    let err = coordinator.register(&bad, &registrant("a@example.com")).await.unwrap_err();
    let RegistrationError::FormValidationFailed { errors } = err else {
        panic!("expected form errors, got {err:?}");
    };
    let mut fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
    fields.sort();
    assert_eq!(fields, vec!["full_name", "shirt_size"]);
    assert_eq!(get_ticket(&pool, ticket.id).await.sold_count, 0);

    let good = RegistrationRequest {
        form_data: json!({"full_name": "  Ada Lovelace ", "shirt_size": "M", "unexpected": 1}),
        ..request(&ticket)
    };
    let registration = coordinator.register(&good, &registrant("a@example.com")).await.unwrap();
    assert_eq!(registration.form_data, json!({"full_name": "Ada Lovelace", "shirt_size": "M"}));
}

#[sqlx::test]
#[test_log::test]
async fn test_referral_attribution(pool: PgPool) {
    let event = create_test_event(&pool).await;
    let ticket = create_test_ticket(&pool, event.id, TicketFixture::default()).await;
    let coordinator = coordinator(&pool);

    let referrer = coordinator
        .register(&request(&ticket), &registrant("ada@example.com"))
        .await
        .unwrap();
    let referral = coordinator.referral_code(referrer.id, &owner("ada@example.com")).await.unwrap();
    assert_eq!(referral.code.len(), REFERRAL_CODE_LENGTH);

    // Issued once
    let again = coordinator.referral_code(referrer.id, &owner("ada@example.com")).await.unwrap();
    assert_eq!(again.id, referral.id);

    let referred = RegistrationRequest {
        referral_code: Some(referral.code.clone()),
        ..request(&ticket)
    };
    coordinator.register(&referred, &registrant("grace@example.com")).await.unwrap();

    let bogus = RegistrationRequest {
        referral_code: Some("NOPE1234".to_string()),
        ..request(&ticket)
    };
    let err = coordinator.register(&bogus, &registrant("linus@example.com")).await.unwrap_err();
    assert!(matches!(err, RegistrationError::ReferralCodeInvalid));

    // A cancelled referrer's code stops working; past usage stays counted
    coordinator.cancel(referrer.id, &owner("ada@example.com")).await.unwrap();
    let err = coordinator.register(&referred, &registrant("linus@example.com")).await.unwrap_err();
    assert!(matches!(err, RegistrationError::ReferralCodeInvalid));

    let mut conn = pool.acquire().await.unwrap();
    let mut referrals = Referrals::new(&mut conn);
    assert_eq!(referrals.count_usages(referral.id).await.unwrap(), 1);
    assert_eq!(referrals.count_confirmed_usages(referral.id).await.unwrap(), 1);
}

#[sqlx::test]
#[test_log::test]
async fn test_referral_code_requires_confirmed_registration(pool: PgPool) {
    let event = create_test_event(&pool).await;
    let ticket = create_test_ticket(&pool, event.id, TicketFixture::default()).await;
    let coordinator = coordinator(&pool);

    let registration = coordinator
        .register(&request(&ticket), &registrant("ada@example.com"))
        .await
        .unwrap();
    coordinator.cancel(registration.id, &owner("ada@example.com")).await.unwrap();

    let err = coordinator
        .referral_code(registration.id, &owner("ada@example.com"))
        .await
        .unwrap_err();
    assert!(matches!(err, RegistrationError::RegistrationNotConfirmed));
}

#[test]
fn test_referral_codes_use_unambiguous_alphabet() {
    for _ in 0..100 {
        let code = generate_referral_code();
        assert_eq!(code.len(), REFERRAL_CODE_LENGTH);
        assert!(code.bytes().all(|b| REFERRAL_CODE_ALPHABET.contains(&b)));
    }
}
