use crate::config::SmtpConfig;
use crate::delivery::MailTransport;
use anyhow::Context;
use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

/// Production transport: lettre over STARTTLS. The pipeline never speaks
/// SMTP itself, it only calls this.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> anyhow::Result<Self> {
        let from: Mailbox = config
            .from_address
            .parse()
            .with_context(|| format!("invalid from_address {}", config.from_address))?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .with_context(|| format!("invalid SMTP relay {}", config.host))?
            .port(config.port)
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .build();

        Ok(SmtpMailer { transport, from })
    }

    fn message(
        &self,
        subject: &str,
        body: &str,
        recipients: &[String],
    ) -> anyhow::Result<Message> {
        let mut builder = Message::builder().from(self.from.clone()).subject(subject);
        for recipient in recipients {
            let mailbox: Mailbox = recipient
                .parse()
                .with_context(|| format!("invalid recipient {recipient}"))?;
            builder = builder.bcc(mailbox);
        }
        builder
            .body(body.to_string())
            .context("failed to build message")
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    /// One message, all recipients as bcc.
    async fn send_bulk(
        &self,
        subject: &str,
        body: &str,
        recipients: &[String],
    ) -> anyhow::Result<()> {
        let message = self.message(subject, body, recipients)?;
        self.transport
            .send(message)
            .await
            .context("bulk SMTP send failed")?;
        Ok(())
    }

    async fn send_single(
        &self,
        subject: &str,
        body: &str,
        recipient: &str,
    ) -> anyhow::Result<()> {
        let mailbox: Mailbox = recipient
            .parse()
            .with_context(|| format!("invalid recipient {recipient}"))?;
        let message = Message::builder()
            .from(self.from.clone())
            .to(mailbox)
            .subject(subject)
            .body(body.to_string())
            .context("failed to build message")?;
        self.transport
            .send(message)
            .await
            .with_context(|| format!("direct SMTP send to {recipient} failed"))?;
        Ok(())
    }
}
