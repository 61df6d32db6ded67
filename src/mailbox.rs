use crate::config::MailboxConfig;
use anyhow::{bail, Context};
use mailparse::MailHeaderMap;

/// One message pulled from the shared inbox. Transient: lives for a single
/// polling pass and is never persisted.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub uid: u32,
    pub subject: String,
    /// Full RFC822 bytes; the content decoder walks the MIME tree itself.
    pub raw: Vec<u8>,
    pub sender: String,
    pub reply_to: String,
}

pub struct MailboxConnector {
    config: MailboxConfig,
}

/// An open IMAP session, scoped to one polling pass. The orchestrator owns
/// it for the duration of the pass and must call `close` on every exit path
/// (dropping it also logs out).
pub struct MailboxSession {
    session: imap::Session<Box<dyn imap::ImapConnection>>,
    logged_out: bool,
}

impl MailboxConnector {
    pub fn new(config: MailboxConfig) -> Self {
        MailboxConnector { config }
    }

    /// Connect, login and select the configured folder. Any failure here is
    /// transient from the caller's point of view: log it and poll again next
    /// interval.
    pub fn open(&self) -> anyhow::Result<MailboxSession> {
        if self.config.username.is_empty() || self.config.password.is_empty() {
            bail!("mailbox credentials not configured");
        }

        log::debug!(
            "Connecting to IMAP server {}:{}",
            self.config.host,
            self.config.port
        );

        let client = imap::ClientBuilder::new(&self.config.host, self.config.port)
            .connect()
            .with_context(|| format!("IMAP connect to {} failed", self.config.host))?;

        let mut session = client
            .login(&self.config.username, &self.config.password)
            .map_err(|(e, _)| e)
            .context("IMAP login failed")?;

        if let Err(e) = session.select(&self.config.folder) {
            let _ = session.logout();
            return Err(e).with_context(|| format!("IMAP select {} failed", self.config.folder));
        }

        Ok(MailboxSession {
            session,
            logged_out: false,
        })
    }

    pub fn target_address(&self) -> &str {
        &self.config.target_address
    }
}

impl MailboxSession {
    /// Search for unseen messages and return those whose reply-to (falling
    /// back to from) matches the target address. Everything else is left
    /// untouched; BODY.PEEK keeps the \Seen flag unset until the caller
    /// explicitly marks a message processed.
    pub fn fetch_unseen(&mut self, target_address: &str) -> anyhow::Result<Vec<InboundMessage>> {
        let uids = self
            .session
            .uid_search("UNSEEN")
            .context("IMAP search UNSEEN failed")?;

        log::debug!("Found {} unseen messages", uids.len());
        if uids.is_empty() {
            return Ok(Vec::new());
        }

        let mut sorted: Vec<u32> = uids.into_iter().collect();
        sorted.sort_unstable();
        let query = sorted
            .iter()
            .map(|u| u.to_string())
            .collect::<Vec<_>>()
            .join(",");

        let fetches = self
            .session
            .uid_fetch(&query, "(UID BODY.PEEK[])")
            .context("IMAP fetch failed")?;

        let mut messages = Vec::new();
        for fetch in fetches.iter() {
            let uid = match fetch.uid {
                Some(uid) => uid,
                None => continue,
            };
            let raw = match fetch.body() {
                Some(body) => body.to_vec(),
                None => continue,
            };

            let (subject, sender, reply_to) = parse_envelope_headers(&raw);
            let effective = if reply_to.is_empty() { &sender } else { &reply_to };
            if !effective.eq_ignore_ascii_case(target_address) {
                log::debug!("Skipping uid {uid}: sender {effective} does not match target");
                continue;
            }

            messages.push(InboundMessage {
                uid,
                subject,
                raw,
                sender,
                reply_to,
            });
        }

        Ok(messages)
    }

    /// Flag one message \Seen. Called only after the record has been
    /// accepted by persistence (or recognized as a duplicate), so a crash
    /// in between leaves the message unread and retried next pass.
    pub fn mark_seen(&mut self, uid: u32) -> anyhow::Result<()> {
        self.session
            .uid_store(uid.to_string(), "+FLAGS (\\Seen)")
            .with_context(|| format!("failed to mark uid {uid} seen"))?;
        Ok(())
    }

    pub fn close(mut self) {
        if let Err(e) = self.session.logout() {
            log::debug!("IMAP logout error (ignored): {e}");
        }
        self.logged_out = true;
    }
}

impl Drop for MailboxSession {
    fn drop(&mut self) {
        if !self.logged_out {
            let _ = self.session.logout();
        }
    }
}

/// Pull subject, from and reply-to out of the raw headers. Address fields
/// are reduced to the bare addr-spec, lowercased.
fn parse_envelope_headers(raw: &[u8]) -> (String, String, String) {
    let parsed = match mailparse::parse_mail(raw) {
        Ok(p) => p,
        Err(e) => {
            log::warn!("Unparseable message headers: {e}");
            return (String::new(), String::new(), String::new());
        }
    };

    let subject = parsed.headers.get_first_value("Subject").unwrap_or_default();
    let sender = first_address(&parsed, "From");
    let reply_to = first_address(&parsed, "Reply-To");
    (subject, sender, reply_to)
}

fn first_address(parsed: &mailparse::ParsedMail, header: &str) -> String {
    let value = match parsed.headers.get_first_value(header) {
        Some(v) => v,
        None => return String::new(),
    };
    match mailparse::addrparse(&value) {
        Ok(list) => list
            .extract_single_info()
            .map(|info| info.addr.to_lowercase())
            .unwrap_or_else(|| value.trim().to_lowercase()),
        Err(_) => value.trim().to_lowercase(),
    }
}
