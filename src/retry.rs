use crate::delivery::{dispatch, DeliveryBatch, MailTransport};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// Fixed backoff table, indexed by attempt count (clamped to the last
/// entry). First failure waits a minute, later ones back off to an hour.
pub const BACKOFF_MINUTES: [i64; 5] = [1, 5, 15, 30, 60];

/// A batch that has failed this many times is dropped for good.
pub const MAX_ATTEMPTS: u32 = 5;

/// Owns the queue of failed delivery batches and retries them on its own
/// timer. Request paths enqueue concurrently; only the scheduler's tick
/// removes entries or marks them failed.
pub struct RetryScheduler {
    queue: Mutex<HashMap<Uuid, DeliveryBatch>>,
    transport: Arc<dyn MailTransport>,
    chunk_size: usize,
    chunk_pause: Duration,
}

impl RetryScheduler {
    pub fn new(transport: Arc<dyn MailTransport>, chunk_size: usize, chunk_pause: Duration) -> Self {
        RetryScheduler {
            queue: Mutex::new(HashMap::new()),
            transport,
            chunk_size,
            chunk_pause,
        }
    }

    /// Enqueue a failed send for retry. The batch is due immediately; the
    /// next tick picks it up.
    pub fn schedule(&self, subject: &str, body: &str, recipients: Vec<String>) -> Uuid {
        let batch = DeliveryBatch::new(subject, body, recipients);
        let id = batch.id;
        log::warn!(
            "Queued batch {id} for retry ({} recipients)",
            batch.recipients.len()
        );
        self.queue.lock().unwrap().insert(id, batch);
        id
    }

    /// Record one failed attempt. Backoff is selected by the attempt count
    /// before the increment, so the first failure waits BACKOFF_MINUTES[0].
    /// Reaching MAX_ATTEMPTS evicts the batch as permanently failed.
    pub fn mark_failed(&self, id: Uuid, error: &str) {
        let mut queue = self.queue.lock().unwrap();
        let batch = match queue.get_mut(&id) {
            Some(batch) => batch,
            None => return,
        };

        let index = (batch.attempts as usize).min(BACKOFF_MINUTES.len() - 1);
        batch.attempts += 1;
        batch.last_error = Some(error.to_string());

        if batch.attempts >= MAX_ATTEMPTS {
            log::error!(
                "Batch {id} permanently failed after {} attempts, dropping. Last error: {error}",
                batch.attempts
            );
            queue.remove(&id);
            return;
        }

        let delay = chrono::Duration::minutes(BACKOFF_MINUTES[index]);
        batch.next_retry = Utc::now() + delay;
        log::warn!(
            "Batch {id} attempt {} failed, next retry in {}m: {error}",
            batch.attempts,
            BACKOFF_MINUTES[index]
        );
    }

    /// One scheduler tick: dispatch every due batch through the strategy
    /// selected by its attempt count. Success removes the batch; failure
    /// records it and schedules the next retry.
    pub async fn process_due(&self) {
        let now = Utc::now();
        // Clone due batches out so the lock is not held across sends.
        let due: Vec<DeliveryBatch> = {
            let queue = self.queue.lock().unwrap();
            queue.values().filter(|b| b.is_due(now)).cloned().collect()
        };
        if due.is_empty() {
            return;
        }
        log::info!("Retry tick: {} batch(es) due", due.len());

        for batch in due {
            match dispatch(
                self.transport.as_ref(),
                &batch,
                self.chunk_size,
                self.chunk_pause,
            )
            .await
            {
                Ok(()) => {
                    log::info!(
                        "Batch {} delivered to {} recipients after {} prior attempt(s)",
                        batch.id,
                        batch.recipients.len(),
                        batch.attempts
                    );
                    self.queue.lock().unwrap().remove(&batch.id);
                }
                Err(e) => self.mark_failed(batch.id, &format!("{e:#}")),
            }
        }
    }

    pub fn queued(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    /// Snapshot of one batch, mainly for tests and status logging.
    pub fn batch(&self, id: Uuid) -> Option<DeliveryBatch> {
        self.queue.lock().unwrap().get(&id).cloned()
    }

    /// Fixed-interval driver for process_due. Runs until shutdown.
    pub async fn run_scheduled(self: Arc<Self>, tick_interval: Duration) {
        let mut ticker = tokio::time::interval(tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.process_due().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Transport whose outcomes are scripted per call.
    #[derive(Default)]
    struct ScriptedTransport {
        fail_always: bool,
        bulk_calls: Mutex<u32>,
        single_calls: Mutex<u32>,
    }

    #[async_trait]
    impl MailTransport for ScriptedTransport {
        async fn send_bulk(&self, _: &str, _: &str, _: &[String]) -> anyhow::Result<()> {
            *self.bulk_calls.lock().unwrap() += 1;
            if self.fail_always {
                anyhow::bail!("smtp down");
            }
            Ok(())
        }

        async fn send_single(&self, _: &str, _: &str, _: &str) -> anyhow::Result<()> {
            *self.single_calls.lock().unwrap() += 1;
            if self.fail_always {
                anyhow::bail!("smtp down");
            }
            Ok(())
        }
    }

    fn scheduler(transport: Arc<ScriptedTransport>) -> RetryScheduler {
        RetryScheduler::new(transport, 10, Duration::ZERO)
    }

    fn recipients() -> Vec<String> {
        vec!["a@example.com".to_string(), "b@example.com".to_string()]
    }

    #[test]
    fn test_backoff_schedule_first_and_second_failure() {
        let sched = scheduler(Arc::new(ScriptedTransport::default()));
        let id = sched.schedule("Info", "Hej", recipients());

        sched.mark_failed(id, "boom");
        let batch = sched.batch(id).unwrap();
        assert_eq!(batch.attempts, 1);
        let wait = (batch.next_retry - Utc::now()).num_seconds();
        assert!((55..=60).contains(&wait), "expected ~1m, got {wait}s");

        sched.mark_failed(id, "boom again");
        let batch = sched.batch(id).unwrap();
        assert_eq!(batch.attempts, 2);
        assert_eq!(batch.last_error.as_deref(), Some("boom again"));
        let wait = (batch.next_retry - Utc::now()).num_seconds();
        assert!((295..=300).contains(&wait), "expected ~5m, got {wait}s");
    }

    #[test]
    fn test_eviction_after_max_attempts() {
        let sched = scheduler(Arc::new(ScriptedTransport::default()));
        let id = sched.schedule("Info", "Hej", recipients());

        for _ in 0..MAX_ATTEMPTS {
            sched.mark_failed(id, "boom");
        }
        assert!(sched.batch(id).is_none());
        assert_eq!(sched.queued(), 0);

        // A sixth failure report on the evicted batch is a no-op.
        sched.mark_failed(id, "late failure");
        assert_eq!(sched.queued(), 0);
    }

    #[tokio::test]
    async fn test_process_due_removes_successful_batch() {
        let transport = Arc::new(ScriptedTransport::default());
        let sched = scheduler(transport.clone());
        sched.schedule("Info", "Hej", recipients());

        sched.process_due().await;
        assert_eq!(sched.queued(), 0);
        assert_eq!(*transport.bulk_calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_process_due_backs_off_failed_batch() {
        let transport = Arc::new(ScriptedTransport {
            fail_always: true,
            ..Default::default()
        });
        let sched = scheduler(transport.clone());
        let id = sched.schedule("Info", "Hej", recipients());

        sched.process_due().await;
        let batch = sched.batch(id).unwrap();
        assert_eq!(batch.attempts, 1);
        assert!(batch.last_error.is_some());

        // Not due yet, so a second tick must not touch it.
        sched.process_due().await;
        assert_eq!(sched.batch(id).unwrap().attempts, 1);
        assert_eq!(*transport.bulk_calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_enqueue_during_tick() {
        let transport = Arc::new(ScriptedTransport::default());
        let sched = Arc::new(scheduler(transport));

        let producer = {
            let sched = sched.clone();
            tokio::spawn(async move {
                for i in 0..50 {
                    sched.schedule("Info", &format!("batch {i}"), recipients());
                    tokio::task::yield_now().await;
                }
            })
        };
        let ticker = {
            let sched = sched.clone();
            tokio::spawn(async move {
                for _ in 0..10 {
                    sched.process_due().await;
                    tokio::task::yield_now().await;
                }
            })
        };
        producer.await.unwrap();
        ticker.await.unwrap();

        // Whatever the interleaving, nothing is lost: every batch was
        // either delivered (removed) or still queued.
        sched.process_due().await;
        assert_eq!(sched.queued(), 0);
    }
}
