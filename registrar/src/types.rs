//! Common type definitions.
//!
//! All entity IDs are UUIDs wrapped in type aliases so signatures say which
//! entity they expect:
//!
//! - [`EventId`], [`TicketId`], [`InvitationCodeId`]
//! - [`RegistrationId`], [`ReferralId`]
//! - [`EndpointId`], [`DeliveryId`], [`OutboxId`]
//!
//! [`abbrev_uuid`] shortens UUIDs for log fields.

use uuid::Uuid;

pub type EventId = Uuid;
pub type TicketId = Uuid;
pub type InvitationCodeId = Uuid;
pub type RegistrationId = Uuid;
pub type ReferralId = Uuid;
pub type EndpointId = Uuid;
pub type DeliveryId = Uuid;
pub type OutboxId = Uuid;

/// Abbreviate a UUID to its first 8 characters for more readable logs and traces
/// Example: "550e8400-e29b-41d4-a716-446655440000" -> "550e8400"
pub fn abbrev_uuid(uuid: &Uuid) -> String {
    uuid.to_string().chars().take(8).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abbrev_uuid() {
        let id: Uuid = "550e8400-e29b-41d4-a716-446655440000".parse().unwrap();
        assert_eq!(abbrev_uuid(&id), "550e8400");
    }
}
