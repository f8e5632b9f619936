//! Outbound email for the verification flow.

use std::time::Duration;

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use thiserror::Error;
use tracing::{info, instrument};

use crate::config::MailConfig;

const SMTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Delivery failure. Callers log it; it never aborts the triggering operation.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("invalid email address: {0}")]
    InvalidAddress(String),

    #[error("failed to build message: {0}")]
    MessageBuild(#[from] lettre::error::Error),

    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_verification_email(&self, to: &str, link: &str) -> Result<(), NotifyError>;
}

pub struct SmtpNotifier {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpNotifier {
    pub fn new(host: &str, config: &MailConfig) -> anyhow::Result<Self> {
        let credentials = Credentials::new(config.username.clone(), config.password.clone());
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)?
            .port(config.smtp_port)
            .credentials(credentials)
            .timeout(Some(SMTP_TIMEOUT))
            .build();
        let from = config
            .from_address
            .parse::<Mailbox>()
            .map_err(|e| anyhow::anyhow!("MAIL_FROM is not a valid address: {e}"))?;
        Ok(Self { mailer, from })
    }
}

fn render_html(link: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
  <body style="font-family: sans-serif">
    <h2>Confirm your email</h2>
    <p>Thanks for signing up. Click the link below to verify your address:</p>
    <p><a href="{link}">Verify email</a></p>
    <p>The link expires in 24 hours.</p>
  </body>
</html>"#
    )
}

fn render_text(link: &str) -> String {
    format!("Thanks for signing up.\n\nVerify your email address: {link}\n\nThe link expires in 24 hours.\n")
}

#[async_trait]
impl Notifier for SmtpNotifier {
    #[instrument(skip(self, link))]
    async fn send_verification_email(&self, to: &str, link: &str) -> Result<(), NotifyError> {
        let to_mailbox = to
            .parse::<Mailbox>()
            .map_err(|e| NotifyError::InvalidAddress(e.to_string()))?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to_mailbox)
            .subject("Verify your email address")
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(render_text(link)),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(render_html(link)),
                    ),
            )?;

        self.mailer.send(message).await?;
        info!("verification email sent");
        Ok(())
    }
}

/// Used when no SMTP host is configured: the link only goes to the log.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_verification_email(&self, to: &str, link: &str) -> Result<(), NotifyError> {
        info!(to, link, "SMTP disabled; verification link not emailed");
        Ok(())
    }
}
