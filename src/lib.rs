pub mod config;
pub mod decode;
pub mod delivery;
pub mod extract;
pub mod fingerprint;
pub mod inbound;
pub mod mailbox;
pub mod outbound;
pub mod record;
pub mod retry;
pub mod smtp;

pub use config::Config;
pub use delivery::{DeliveryBatch, MailTransport, SendStrategy};
pub use extract::ExtractedFields;
pub use fingerprint::{Fingerprint, FingerprintSet, Tier};
pub use inbound::{InboundOrchestrator, PassReport};
pub use outbound::{BulkSendOutcome, BulkSendRequest, OutboundGateway};
pub use record::{BuildOutcome, JsonFileStore, PendingRecord, PendingStore, RecordBuilder};
pub use retry::RetryScheduler;
