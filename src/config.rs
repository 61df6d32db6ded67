use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub mailbox: MailboxConfig,
    pub smtp: SmtpConfig,
    pub inbound: InboundConfig,
    pub outbound: OutboundConfig,
    /// Where accepted pending records are appended, one JSON object per line.
    pub store_path: String,
}

/// IMAP credentials and the address filter for the shared inbox.
#[derive(Clone, Serialize, Deserialize)]
pub struct MailboxConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Folder to poll, usually INBOX.
    pub folder: String,
    /// Only messages whose reply-to (or from) matches this address are
    /// picked up; everything else in the shared mailbox is left alone.
    pub target_address: String,
}

// Keep the password out of debug logs.
impl std::fmt::Debug for MailboxConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailboxConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("folder", &self.folder)
            .field("target_address", &self.target_address)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Sender address used on all outbound mail.
    pub from_address: String,
}

impl std::fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("from_address", &self.from_address)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundConfig {
    /// Seconds between mailbox polling passes.
    pub poll_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundConfig {
    /// Seconds between retry-queue scans.
    pub retry_interval_secs: u64,
    /// Timeout for the synchronous first delivery attempt.
    pub send_timeout_secs: u64,
    /// Recipients per chunk when the chunked strategy runs.
    pub chunk_size: usize,
    /// Pause between chunks, in milliseconds.
    pub chunk_pause_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            mailbox: MailboxConfig {
                host: "imap.example.com".to_string(),
                port: 993,
                username: "felanmalan@example.com".to_string(),
                password: String::new(),
                folder: "INBOX".to_string(),
                target_address: "noreply@forms.example.com".to_string(),
            },
            smtp: SmtpConfig {
                host: "smtp.example.com".to_string(),
                port: 587,
                username: "felanmalan@example.com".to_string(),
                password: String::new(),
                from_address: "felanmalan@example.com".to_string(),
            },
            inbound: InboundConfig {
                poll_interval_secs: 300,
            },
            outbound: OutboundConfig {
                retry_interval_secs: 60,
                send_timeout_secs: 30,
                chunk_size: 10,
                chunk_pause_ms: 500,
            },
            store_path: "/var/lib/portvakt/pending_records.jsonl".to_string(),
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_file(&self, path: &str) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Sanity checks run by --test-config and at daemon startup.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.mailbox.host.is_empty() || self.mailbox.username.is_empty() {
            problems.push("mailbox host/username must be set".to_string());
        }
        if self.mailbox.target_address.is_empty() {
            problems.push("mailbox target_address must be set".to_string());
        }
        if self.inbound.poll_interval_secs == 0 {
            problems.push("inbound poll_interval_secs must be > 0".to_string());
        }
        if self.outbound.retry_interval_secs == 0 {
            problems.push("outbound retry_interval_secs must be > 0".to_string());
        }
        if self.outbound.chunk_size == 0 {
            problems.push("outbound chunk_size must be > 0".to_string());
        }
        problems
    }
}
