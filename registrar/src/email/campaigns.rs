//! Batch email campaigns to an event's confirmed registrants.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::EmailService;
use crate::config::CampaignConfig;

/// A single message sent to many recipients.
#[derive(Debug, Clone)]
pub struct Campaign {
    pub subject: String,
    pub body_html: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CampaignReport {
    pub sent: usize,
    /// Recipient and error for every send that failed
    pub failed: Vec<(String, String)>,
    /// True when shutdown stopped the campaign before every batch was sent
    pub interrupted: bool,
}

pub struct CampaignSender {
    email: Arc<EmailService>,
    batch_size: usize,
    batch_pause: Duration,
}

impl CampaignSender {
    pub fn new(email: Arc<EmailService>, config: &CampaignConfig) -> Self {
        Self {
            email,
            batch_size: config.batch_size.max(1),
            batch_pause: config.batch_pause,
        }
    }

    /// Send `campaign` to every recipient, `batch_size` at a time with a pause
    /// between batches. A failed recipient is recorded and skipped.
    pub async fn send(&self, campaign: &Campaign, recipients: &[String], shutdown: &CancellationToken) -> CampaignReport {
        let mut report = CampaignReport::default();
        let batches = recipients.chunks(self.batch_size);
        let batch_count = batches.len();

        for (index, batch) in batches.enumerate() {
            for recipient in batch {
                match self.email.send_email(recipient, &campaign.subject, &campaign.body_html).await {
                    Ok(()) => {
                        report.sent += 1;
                        counter!("registrar_campaign_emails_total", "outcome" => "sent").increment(1);
                    }
                    Err(e) => {
                        warn!(recipient = %recipient, error = %e, "Campaign email failed");
                        counter!("registrar_campaign_emails_total", "outcome" => "failed").increment(1);
                        report.failed.push((recipient.clone(), e.to_string()));
                    }
                }
            }

            if index + 1 < batch_count {
                tokio::select! {
                    _ = tokio::time::sleep(self.batch_pause) => {}
                    _ = shutdown.cancelled() => {
                        report.interrupted = true;
                        break;
                    }
                }
            }
        }

        info!(
            sent = report.sent,
            failed = report.failed.len(),
            interrupted = report.interrupted,
            "Campaign finished"
        );
        report
    }
}
