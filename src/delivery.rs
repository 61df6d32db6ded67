use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

/// One outbound bulk notification tracked through retries. The recipient
/// list is snapshotted at creation and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct DeliveryBatch {
    pub id: Uuid,
    pub subject: String,
    pub body: String,
    pub recipients: Vec<String>,
    pub created_at: DateTime<Utc>,
    /// Eligible for dispatch once this has passed; starts at "now".
    pub next_retry: DateTime<Utc>,
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl DeliveryBatch {
    pub fn new(subject: &str, body: &str, recipients: Vec<String>) -> Self {
        let now = Utc::now();
        DeliveryBatch {
            id: Uuid::new_v4(),
            subject: subject.to_string(),
            body: body.to_string(),
            recipients,
            created_at: now,
            next_retry: now,
            attempts: 0,
            last_error: None,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_retry <= now
    }
}

/// The external mail-sending collaborator. SMTP itself lives behind this;
/// the pipeline only orchestrates calls to it.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send_bulk(
        &self,
        subject: &str,
        body: &str,
        recipients: &[String],
    ) -> anyhow::Result<()>;

    async fn send_single(&self, subject: &str, body: &str, recipient: &str)
        -> anyhow::Result<()>;
}

/// Delivery mechanism, escalating as attempts accumulate: when the bulk
/// path keeps failing, smaller sends raise the odds that at least some
/// recipients get the mail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStrategy {
    Bulk,
    Chunked,
    PerRecipient,
}

impl SendStrategy {
    pub fn for_attempt(attempts: u32) -> Self {
        match attempts {
            0 => SendStrategy::Bulk,
            1 => SendStrategy::Chunked,
            _ => SendStrategy::PerRecipient,
        }
    }
}

/// Run one delivery attempt with the strategy selected by the batch's
/// attempt count. The caller owns attempt accounting; this function only
/// reports success or failure of the chosen mechanism.
pub async fn dispatch(
    transport: &dyn MailTransport,
    batch: &DeliveryBatch,
    chunk_size: usize,
    chunk_pause: Duration,
) -> anyhow::Result<()> {
    let strategy = SendStrategy::for_attempt(batch.attempts);
    log::info!(
        "Dispatching batch {} (attempt {}, {:?}, {} recipients)",
        batch.id,
        batch.attempts,
        strategy,
        batch.recipients.len()
    );

    match strategy {
        SendStrategy::Bulk => {
            transport
                .send_bulk(&batch.subject, &batch.body, &batch.recipients)
                .await
        }
        SendStrategy::Chunked => {
            send_chunked(transport, batch, chunk_size, chunk_pause).await
        }
        SendStrategy::PerRecipient => send_per_recipient(transport, batch).await,
    }
}

/// Fixed-size chunks sent sequentially with a pause in between; the attempt
/// only counts as a success if every chunk went through.
async fn send_chunked(
    transport: &dyn MailTransport,
    batch: &DeliveryBatch,
    chunk_size: usize,
    chunk_pause: Duration,
) -> anyhow::Result<()> {
    let chunks: Vec<&[String]> = batch.recipients.chunks(chunk_size.max(1)).collect();
    let total = chunks.len();
    for (i, chunk) in chunks.into_iter().enumerate() {
        transport
            .send_bulk(&batch.subject, &batch.body, chunk)
            .await
            .with_context(|| format!("chunk {}/{total} failed", i + 1))?;
        if i + 1 < total {
            tokio::time::sleep(chunk_pause).await;
        }
    }
    Ok(())
}

/// Lowest-level fallback: one direct send per recipient. Every recipient is
/// attempted even when earlier ones fail, so a broken address cannot starve
/// the rest of the list.
async fn send_per_recipient(
    transport: &dyn MailTransport,
    batch: &DeliveryBatch,
) -> anyhow::Result<()> {
    let mut failures = Vec::new();
    for recipient in &batch.recipients {
        if let Err(e) = transport
            .send_single(&batch.subject, &batch.body, recipient)
            .await
        {
            log::warn!("Direct send to {recipient} failed: {e:#}");
            failures.push(recipient.clone());
        }
    }
    if failures.is_empty() {
        Ok(())
    } else {
        anyhow::bail!(
            "{} of {} direct sends failed ({})",
            failures.len(),
            batch.recipients.len(),
            failures.join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records every transport call so strategy escalation can be asserted.
    #[derive(Default)]
    pub struct StubTransport {
        pub bulk_calls: Mutex<Vec<Vec<String>>>,
        pub single_calls: Mutex<Vec<String>>,
        pub fail_bulk: bool,
        pub fail_single_to: Option<String>,
    }

    #[async_trait]
    impl MailTransport for StubTransport {
        async fn send_bulk(
            &self,
            _subject: &str,
            _body: &str,
            recipients: &[String],
        ) -> anyhow::Result<()> {
            self.bulk_calls.lock().unwrap().push(recipients.to_vec());
            if self.fail_bulk {
                anyhow::bail!("bulk transport down");
            }
            Ok(())
        }

        async fn send_single(
            &self,
            _subject: &str,
            _body: &str,
            recipient: &str,
        ) -> anyhow::Result<()> {
            self.single_calls.lock().unwrap().push(recipient.to_string());
            if self.fail_single_to.as_deref() == Some(recipient) {
                anyhow::bail!("recipient rejected");
            }
            Ok(())
        }
    }

    fn recipients(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("tenant{i}@example.com")).collect()
    }

    #[test]
    fn test_strategy_selection_by_attempt() {
        assert_eq!(SendStrategy::for_attempt(0), SendStrategy::Bulk);
        assert_eq!(SendStrategy::for_attempt(1), SendStrategy::Chunked);
        assert_eq!(SendStrategy::for_attempt(2), SendStrategy::PerRecipient);
        assert_eq!(SendStrategy::for_attempt(10), SendStrategy::PerRecipient);
    }

    #[tokio::test]
    async fn test_attempt_zero_sends_one_bulk() {
        let transport = StubTransport::default();
        let batch = DeliveryBatch::new("Info", "Hej", recipients(25));
        dispatch(&transport, &batch, 10, Duration::ZERO).await.unwrap();

        let bulk = transport.bulk_calls.lock().unwrap();
        assert_eq!(bulk.len(), 1);
        assert_eq!(bulk[0].len(), 25);
        assert!(transport.single_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_attempt_one_sends_chunks_of_ten() {
        let transport = StubTransport::default();
        let mut batch = DeliveryBatch::new("Info", "Hej", recipients(25));
        batch.attempts = 1;
        dispatch(&transport, &batch, 10, Duration::ZERO).await.unwrap();

        let bulk = transport.bulk_calls.lock().unwrap();
        assert_eq!(bulk.len(), 3);
        assert_eq!(bulk[0].len(), 10);
        assert_eq!(bulk[1].len(), 10);
        assert_eq!(bulk[2].len(), 5);
    }

    #[tokio::test]
    async fn test_attempt_two_sends_per_recipient() {
        let transport = StubTransport::default();
        let mut batch = DeliveryBatch::new("Info", "Hej", recipients(3));
        batch.attempts = 2;
        dispatch(&transport, &batch, 10, Duration::ZERO).await.unwrap();

        assert!(transport.bulk_calls.lock().unwrap().is_empty());
        assert_eq!(transport.single_calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_chunked_fails_if_any_chunk_fails() {
        let transport = StubTransport {
            fail_bulk: true,
            ..Default::default()
        };
        let mut batch = DeliveryBatch::new("Info", "Hej", recipients(15));
        batch.attempts = 1;
        let err = dispatch(&transport, &batch, 10, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("chunk 1/2"));
    }

    #[tokio::test]
    async fn test_per_recipient_attempts_everyone_despite_failure() {
        let transport = StubTransport {
            fail_single_to: Some("tenant0@example.com".to_string()),
            ..Default::default()
        };
        let mut batch = DeliveryBatch::new("Info", "Hej", recipients(4));
        batch.attempts = 3;
        let result = dispatch(&transport, &batch, 10, Duration::ZERO).await;

        assert!(result.is_err());
        // The failing first recipient did not stop the other three.
        assert_eq!(transport.single_calls.lock().unwrap().len(), 4);
    }
}
