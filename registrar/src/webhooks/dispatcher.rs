//! Background webhook dispatch.
//!
//! Each [`WebhookDispatcher::tick`] runs two steps on the polling task:
//!
//! 1. Claim due deliveries (`FOR UPDATE SKIP LOCKED`, joined with their endpoint)
//!    and hand them to the send worker over a bounded channel. Deliveries whose
//!    endpoint is gone or disabled are exhausted here without an HTTP attempt.
//! 2. Collect whatever reports the send worker has produced so far and record
//!    them: delivered, failed with a new `next_retry_at`, or exhausted.
//!
//! The send worker owns the HTTP client and a semaphore bounding in-flight
//! requests. It never touches the database. A delivery that was claimed but
//! never reported (shutdown, full channel) is picked up again after its claim
//! timeout.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use sqlx::PgPool;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;

use super::delivery::{self, SendOutcome, WebhookSendRequest};
use super::retry::RetryPolicy;
use crate::config::WebhookConfig;
use crate::db::handlers::Webhooks;
use crate::types::abbrev_uuid;

/// What the send worker reports back for one request.
#[derive(Debug)]
struct SendReport {
    request: WebhookSendRequest,
    outcome: SendOutcome,
}

pub struct WebhookDispatcher {
    pool: PgPool,
    queue_tx: mpsc::Sender<WebhookSendRequest>,
    report_rx: mpsc::Receiver<SendReport>,
    policy: RetryPolicy,
    claim_batch_size: i64,
    claim_timeout: Duration,
    circuit_breaker_threshold: i32,
}

impl WebhookDispatcher {
    /// Build the HTTP client, start the send worker and return the polling half.
    pub fn spawn(pool: PgPool, config: &WebhookConfig, shutdown: CancellationToken) -> anyhow::Result<Self> {
        let (queue_tx, queue_rx) = mpsc::channel::<WebhookSendRequest>(config.channel_capacity);
        let (report_tx, report_rx) = mpsc::channel(config.channel_capacity);

        let http_client = reqwest::Client::builder().timeout(config.timeout).build()?;

        tokio::spawn(run_send_worker(queue_rx, report_tx, http_client, config.max_concurrent_sends, shutdown));

        Ok(Self {
            pool,
            queue_tx,
            report_rx,
            policy: RetryPolicy::from_config(config),
            claim_batch_size: config.claim_batch_size,
            claim_timeout: config.claim_timeout,
            circuit_breaker_threshold: config.circuit_breaker_threshold,
        })
    }

    /// One polling cycle.
    pub async fn tick(&mut self) {
        self.dispatch_due().await;
        self.record_reports().await;
    }

    /// Claim due deliveries and queue them for the send worker.
    async fn dispatch_due(&self) {
        let mut conn = match self.pool.acquire().await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "No connection available, skipping webhook claim");
                return;
            }
        };

        let deliveries = {
            let mut repo = Webhooks::new(&mut conn);
            match repo.claim_due_deliveries(self.claim_batch_size, self.claim_timeout).await {
                Ok(d) => d,
                Err(e) => {
                    tracing::warn!(error = %e, "Claiming due webhook deliveries failed");
                    return;
                }
            }
        };

        if deliveries.is_empty() {
            return;
        }

        counter!("registrar_webhook_deliveries_claimed_total").increment(deliveries.len() as u64);
        tracing::debug!(claimed = deliveries.len(), "Queueing webhook deliveries");

        for claimed in deliveries {
            let request = match delivery::build_request(&claimed) {
                Ok(r) => r,
                Err(unsendable) => {
                    tracing::info!(
                        delivery_id = %abbrev_uuid(&claimed.id),
                        endpoint_id = %abbrev_uuid(&claimed.endpoint_id),
                        reason = unsendable.reason(),
                        "Endpoint unusable, exhausting delivery"
                    );
                    let mut repo = Webhooks::new(&mut conn);
                    if let Err(e) = repo.mark_exhausted(claimed.id, unsendable.reason()).await {
                        tracing::warn!(error = %e, delivery_id = %abbrev_uuid(&claimed.id), "Could not exhaust delivery");
                    }
                    continue;
                }
            };

            if let Err(e) = self.queue_tx.try_send(request) {
                // next_retry_at was moved forward by the claim
                tracing::warn!(delivery_id = %abbrev_uuid(&claimed.id), error = %e, "Send queue full, delivery left for a later claim");
            }
        }
    }

    /// Record every report that is ready without waiting for in-flight sends.
    async fn record_reports(&mut self) {
        let mut conn = match self.pool.acquire().await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "No connection available, leaving webhook reports queued");
                return;
            }
        };

        let mut recorded = 0u32;
        while let Ok(report) = self.report_rx.try_recv() {
            recorded += 1;
            if let Err(e) = delivery::record_outcome(
                &mut conn,
                &self.policy,
                self.circuit_breaker_threshold,
                &report.request,
                &report.outcome,
            )
            .await
            {
                tracing::warn!(
                    error = %e,
                    delivery_id = %abbrev_uuid(&report.request.delivery_id),
                    "Could not record webhook outcome"
                );
            }
        }

        if recorded > 0 {
            tracing::debug!(recorded, "Recorded webhook outcomes");
        }
    }
}

/// Poll loop driving a [`WebhookDispatcher`] until shutdown.
pub async fn run_webhook_dispatcher(pool: PgPool, config: WebhookConfig, shutdown: CancellationToken) -> anyhow::Result<()> {
    let mut dispatcher = WebhookDispatcher::spawn(pool, &config, shutdown.clone())?;

    tracing::info!(poll_interval = ?config.poll_interval, "Starting webhook dispatcher");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(config.poll_interval) => {}
            _ = shutdown.cancelled() => {
                tracing::info!("Webhook dispatcher shutting down");
                return Ok(());
            }
        }

        dispatcher.tick().await;
    }
}

/// Performs the HTTP calls, at most `max_in_flight` at a time.
async fn run_send_worker(
    mut queue: mpsc::Receiver<WebhookSendRequest>,
    report_tx: mpsc::Sender<SendReport>,
    http_client: reqwest::Client,
    max_in_flight: usize,
    shutdown: CancellationToken,
) {
    let semaphore = Arc::new(Semaphore::new(max_in_flight));

    loop {
        let next = tokio::select! {
            next = queue.recv() => next,
            _ = shutdown.cancelled() => None,
        };
        let Some(request) = next else {
            break;
        };

        let Ok(permit) = semaphore.clone().acquire_owned().await else {
            break;
        };

        let client = http_client.clone();
        let reports = report_tx.clone();

        tokio::spawn(async move {
            tracing::debug!(
                delivery_id = %abbrev_uuid(&request.delivery_id),
                url = %request.url,
                attempt = request.retry_count + 1,
                "POST webhook"
            );

            let outcome = delivery::send_once(&client, &request).await;
            drop(permit);

            let delivery_id = request.delivery_id;
            if reports.send(SendReport { request, outcome }).await.is_err() {
                tracing::debug!(delivery_id = %abbrev_uuid(&delivery_id), "Dispatcher gone, dropping webhook report");
            }
        });
    }

    tracing::debug!("Webhook send worker stopped");
}
