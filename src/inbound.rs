use crate::decode;
use crate::extract;
use crate::fingerprint;
use crate::mailbox::{InboundMessage, MailboxConnector};
use crate::record::{BuildOutcome, RecordBuilder};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Outcome of one polling pass; also the payload the manual trigger
/// returns to its caller.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PassReport {
    pub fetched: usize,
    pub created: usize,
    pub duplicates: usize,
    pub failed: usize,
    /// Set when the pass never reached the per-message stage: connection
    /// failure, or an overlapping pass already running.
    pub aborted: Option<String>,
}

pub struct InboundOrchestrator {
    connector: Arc<MailboxConnector>,
    builder: Arc<RecordBuilder>,
    // Passes must not overlap: a slow pass skips the next tick instead of
    // opening a second mailbox connection.
    pass_guard: tokio::sync::Mutex<()>,
}

impl InboundOrchestrator {
    pub fn new(connector: MailboxConnector, builder: RecordBuilder) -> Self {
        InboundOrchestrator {
            connector: Arc::new(connector),
            builder: Arc::new(builder),
            pass_guard: tokio::sync::Mutex::new(()),
        }
    }

    /// One full pass: poll, then decode/extract/fingerprint/build each
    /// message, marking it seen only once persistence accepted it. The
    /// mailbox client is synchronous, so the pass runs on the blocking pool.
    pub async fn run_pass(&self) -> PassReport {
        let _guard = match self.pass_guard.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                log::warn!("Inbound pass already in progress, skipping this trigger");
                return PassReport {
                    aborted: Some("pass already in progress".to_string()),
                    ..Default::default()
                };
            }
        };

        let connector = self.connector.clone();
        let builder = self.builder.clone();
        match tokio::task::spawn_blocking(move || run_pass_blocking(&connector, &builder)).await {
            Ok(report) => report,
            Err(e) => {
                log::error!("Inbound pass task failed: {e}");
                PassReport {
                    aborted: Some(format!("pass task failed: {e}")),
                    ..Default::default()
                }
            }
        }
    }

    /// Fixed-interval driver. Runs until the process shuts down.
    pub async fn run_scheduled(self: Arc<Self>, poll_interval: Duration) {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let report = self.run_pass().await;
            if report.aborted.is_none() {
                log::info!(
                    "Inbound pass done: {} fetched, {} created, {} duplicates, {} failed",
                    report.fetched,
                    report.created,
                    report.duplicates,
                    report.failed
                );
            }
        }
    }
}

fn run_pass_blocking(connector: &MailboxConnector, builder: &RecordBuilder) -> PassReport {
    let mut report = PassReport::default();

    // A connection failure aborts the whole pass; nothing was marked seen,
    // so every message is picked up again next interval.
    let mut session = match connector.open() {
        Ok(session) => session,
        Err(e) => {
            log::error!("Inbound pass aborted: {e:#}");
            report.aborted = Some(format!("{e:#}"));
            return report;
        }
    };

    let messages = match session.fetch_unseen(connector.target_address()) {
        Ok(messages) => messages,
        Err(e) => {
            log::error!("Inbound pass aborted during search: {e:#}");
            report.aborted = Some(format!("{e:#}"));
            session.close();
            return report;
        }
    };

    report.fetched = messages.len();
    process_messages(builder, &messages, |uid| session.mark_seen(uid), &mut report);
    session.close();
    report
}

/// Per-message stage, failure-isolated: an error on message N leaves it
/// unread for the next pass and moves on to N+1.
fn process_messages<F>(
    builder: &RecordBuilder,
    messages: &[InboundMessage],
    mut mark_seen: F,
    report: &mut PassReport,
) where
    F: FnMut(u32) -> anyhow::Result<()>,
{
    for message in messages {
        match process_message(builder, message) {
            Ok(outcome) => {
                match outcome {
                    BuildOutcome::Created(_) => report.created += 1,
                    BuildOutcome::Duplicate => report.duplicates += 1,
                }
                // Duplicates are marked seen too; the message itself was
                // handled, there is just nothing new to store.
                if let Err(e) = mark_seen(message.uid) {
                    log::warn!("Could not mark uid {} seen: {e:#}", message.uid);
                }
            }
            Err(e) => {
                log::error!("Failed to process uid {}: {e:#}", message.uid);
                report.failed += 1;
            }
        }
    }
}

fn process_message(
    builder: &RecordBuilder,
    message: &InboundMessage,
) -> anyhow::Result<BuildOutcome> {
    let text = decode::decode(message);
    let fields = extract::extract(&text, &message.subject);
    let prints = fingerprint::fingerprints(&fields);
    builder.build(&fields, &prints)
}
