use crate::delivery::MailTransport;
use crate::retry::RetryScheduler;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkSendRequest {
    pub subject: String,
    pub content: String,
    pub recipients: Vec<String>,
}

/// Structured result of a bulk-send request. Callers never see a raw error
/// chain, only one of these.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BulkSendOutcome {
    /// Delivered synchronously within the timeout.
    Sent { recipients: usize, elapsed_ms: u64 },
    /// Delivery failed or timed out; the batch is in the retry queue.
    Queued { batch_id: String, error: String },
    /// The request itself was unusable; nothing was queued.
    Invalid { error: String },
}

/// The bulk-send entry point: one synchronous attempt under a timeout,
/// falling back to the retry queue so a transport outage can never lose a
/// notification.
pub struct OutboundGateway {
    transport: Arc<dyn MailTransport>,
    scheduler: Arc<RetryScheduler>,
    send_timeout: Duration,
}

impl OutboundGateway {
    pub fn new(
        transport: Arc<dyn MailTransport>,
        scheduler: Arc<RetryScheduler>,
        send_timeout: Duration,
    ) -> Self {
        OutboundGateway {
            transport,
            scheduler,
            send_timeout,
        }
    }

    pub async fn send(&self, request: &BulkSendRequest) -> BulkSendOutcome {
        if let Err(problem) = validate(request) {
            return BulkSendOutcome::Invalid { error: problem };
        }

        let started = std::time::Instant::now();
        let attempt = self.transport.send_bulk(
            &request.subject,
            &request.content,
            &request.recipients,
        );

        let error = match tokio::time::timeout(self.send_timeout, attempt).await {
            Ok(Ok(())) => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                log::info!(
                    "Bulk send to {} recipients completed in {elapsed_ms}ms",
                    request.recipients.len()
                );
                return BulkSendOutcome::Sent {
                    recipients: request.recipients.len(),
                    elapsed_ms,
                };
            }
            Ok(Err(e)) => format!("{e:#}"),
            // The underlying send may still finish after the timeout fires;
            // the retry path tolerates that by preferring a duplicate send
            // over a lost one.
            Err(_) => format!("send timed out after {:?}", self.send_timeout),
        };

        log::warn!("Bulk send failed, queueing for retry: {error}");
        let batch_id = self.scheduler.schedule(
            &request.subject,
            &request.content,
            request.recipients.clone(),
        );
        BulkSendOutcome::Queued {
            batch_id: batch_id.to_string(),
            error,
        }
    }
}

fn validate(request: &BulkSendRequest) -> Result<(), String> {
    if request.subject.trim().is_empty() {
        return Err("subject must not be empty".to_string());
    }
    if request.content.trim().is_empty() {
        return Err("content must not be empty".to_string());
    }
    if request.recipients.is_empty() {
        return Err("recipient list must not be empty".to_string());
    }
    Ok(())
}
