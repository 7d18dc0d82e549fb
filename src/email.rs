//! Outgoing account email. SMTP when configured, otherwise messages are only logged.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::info;

use crate::{config::{AppConfig, EmailConfig}, users::repo_types::User};

pub const WELCOME_SUBJECT: &str = "Welcome to the Tourbook family!";
pub const RESET_SUBJECT: &str = "Your password reset token (valid for only 10 minutes)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailKind {
    Welcome,
    PasswordReset,
}

#[derive(Debug, Clone)]
pub struct OutgoingEmail {
    pub kind: EmailKind,
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl OutgoingEmail {
    pub fn welcome(user: &User, account_url: &str) -> Self {
        Self {
            kind: EmailKind::Welcome,
            to: user.email.clone(),
            subject: WELCOME_SUBJECT.into(),
            body: format!(
                "Hi {},\n\nWelcome to Tourbook, we're glad to have you!\n\
                 Upload a photo and complete your profile here: {account_url}\n",
                user.first_name()
            ),
        }
    }

    pub fn password_reset(user: &User, reset_url: &str) -> Self {
        Self {
            kind: EmailKind::PasswordReset,
            to: user.email.clone(),
            subject: RESET_SUBJECT.into(),
            body: format!(
                "Hi {},\n\nForgot your password? Submit a PATCH request with your new password \
                 and passwordConfirm to: {reset_url}\n\
                 If you didn't forget your password, please ignore this email.\n",
                user.first_name()
            ),
        }
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> anyhow::Result<()>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &EmailConfig) -> anyhow::Result<Self> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
            .context("smtp relay")?
            .port(config.smtp_port);
        if let (Some(user), Some(pass)) = (&config.smtp_user, &config.smtp_password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }
        let from = config
            .from_address
            .parse()
            .context("SMTP_FROM is not a valid mailbox")?;
        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &OutgoingEmail) -> anyhow::Result<()> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(email.to.parse().context("recipient address")?)
            .subject(email.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(email.body.clone())?;
        self.transport.send(message).await?;
        info!(to = %email.to, kind = ?email.kind, "email sent");
        Ok(())
    }
}

/// Stand-in used when SMTP is not configured.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &OutgoingEmail) -> anyhow::Result<()> {
        info!(to = %email.to, kind = ?email.kind, subject = %email.subject, body = %email.body, "email not delivered (no SMTP configured)");
        Ok(())
    }
}

pub fn mailer_from_config(config: &AppConfig) -> anyhow::Result<Arc<dyn Mailer>> {
    Ok(match &config.email {
        Some(email) => Arc::new(SmtpMailer::new(email)?) as Arc<dyn Mailer>,
        None => Arc::new(LogMailer),
    })
}

#[cfg(test)]
pub use recording::RecordingMailer;
