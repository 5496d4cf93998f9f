//! SMTP alert sink
//!
//! Credentials and recipients come from the environment only; the config
//! file carries the relay host and port. When credentials are missing
//! the sink is absent and alerts are persisted without notification.

use anyhow::{Context, Result};
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;
use tracing::info;

use crate::config::{AlertsConfig, EmailEnv};

pub struct Mailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    sender: String,
    recipients: Vec<String>,
}

impl Mailer {
    /// Build the sink from environment credentials; `None` when any of
    /// sender, password, or recipients are unset.
    pub fn from_env(config: &AlertsConfig) -> Result<Option<Self>> {
        let env = EmailEnv::from_env();
        if !env.is_configured() {
            return Ok(None);
        }
        let sender = env.sender.unwrap_or_default();
        let password = env.password.unwrap_or_default();

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_server)
            .with_context(|| format!("Invalid SMTP relay: {}", config.smtp_server))?
            .port(config.smtp_port)
            .credentials(Credentials::new(sender.clone(), password))
            .timeout(Some(Duration::from_secs(10)))
            .build();

        info!(
            "Email sink configured via {}:{} for {} recipient(s)",
            config.smtp_server,
            config.smtp_port,
            env.recipients.len()
        );

        Ok(Some(Self {
            transport,
            sender,
            recipients: env.recipients,
        }))
    }

    pub async fn send(&self, subject: &str, body: String) -> Result<()> {
        let mut builder = Message::builder()
            .from(self.sender.parse().context("Invalid sender address")?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN);

        for recipient in &self.recipients {
            builder = builder.to(recipient
                .parse()
                .with_context(|| format!("Invalid recipient address: {}", recipient))?);
        }

        let message = builder.body(body)?;
        self.transport
            .send(message)
            .await
            .context("SMTP delivery failed")?;
        Ok(())
    }
}
