use anyhow::Context;
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use tracing::{debug, info};

use crate::config::SmtpConfig;

/// Outbound mail collaborator. Callers treat delivery failures as
/// non-fatal.
pub trait Mailer: Send + Sync {
    fn send(&self, to: &str, subject: &str, text: &str) -> anyhow::Result<()>;
}

pub struct SmtpMailer {
    transport: SmtpTransport,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> anyhow::Result<Self> {
        let transport = if config.username.is_empty() && config.password.is_empty() {
            // Unauthenticated relay, e.g. a local MailDev instance.
            SmtpTransport::builder_dangerous(&config.host)
                .port(config.port)
                .build()
        } else {
            let credentials = Credentials::new(config.username.clone(), config.password.clone());
            SmtpTransport::relay(&config.host)
                .context("smtp relay")?
                .port(config.port)
                .credentials(credentials)
                .build()
        };

        let from = config
            .from_address
            .parse()
            .context("parse smtp from address")?;

        Ok(Self { transport, from })
    }
}

impl Mailer for SmtpMailer {
    fn send(&self, to: &str, subject: &str, text: &str) -> anyhow::Result<()> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(to.parse().context("parse recipient address")?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(text.to_string())
            .context("build email message")?;

        self.transport.send(&message).context("smtp send")?;
        info!(to = %to, subject = %subject, "email sent");
        Ok(())
    }
}

/// Stands in when no SMTP relay is configured.
pub struct NoopMailer;

impl Mailer for NoopMailer {
    fn send(&self, to: &str, subject: &str, _text: &str) -> anyhow::Result<()> {
        debug!(to = %to, subject = %subject, "smtp not configured, dropping email");
        Ok(())
    }
}
