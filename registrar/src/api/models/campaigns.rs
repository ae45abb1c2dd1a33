use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// An email to send to every confirmed registrant of an event.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CampaignCreate {
    pub subject: String,
    /// HTML body, sent as is
    pub body_html: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CampaignAccepted {
    /// Number of confirmed registrants the campaign will be sent to
    pub recipients: usize,
}
