//! Out-of-band delivery of OTP codes
//!
//! Delivery is best effort. The orchestrator logs a failed send and keeps
//! the challenge alive.

use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox, Message};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::config::SmtpSettings;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    #[error("Failed to build email: {0}")]
    Build(String),

    #[error("SMTP delivery failed: {0}")]
    Transport(String),
}

/// Sends a freshly issued OTP code to its owner
#[async_trait]
pub trait OtpNotifier: Send + Sync {
    async fn send_otp(&self, email: &str, code: &str, ttl_minutes: i64) -> Result<(), NotifyError>;
}

/// SMTP delivery through lettre
#[derive(Clone)]
pub struct SmtpNotifier {
    transport: Arc<AsyncSmtpTransport<Tokio1Executor>>,
    from: Mailbox,
}

impl SmtpNotifier {
    pub fn new(settings: &SmtpSettings) -> Result<Self, NotifyError> {
        let from = settings
            .from
            .parse::<Mailbox>()
            .map_err(|e| NotifyError::InvalidAddress(format!("SMTP_FROM: {}", e)))?;

        let builder = if settings.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)
        }
        .map_err(|e| NotifyError::Transport(e.to_string()))?
        .port(settings.port);

        let builder = match (&settings.username, &settings.password) {
            (Some(username), Some(password)) => {
                builder.credentials(Credentials::new(username.clone(), password.clone()))
            }
            _ => builder,
        };

        Ok(Self {
            transport: Arc::new(builder.build()),
            from,
        })
    }
}

#[async_trait]
impl OtpNotifier for SmtpNotifier {
    async fn send_otp(&self, email: &str, code: &str, ttl_minutes: i64) -> Result<(), NotifyError> {
        let to = email
            .parse::<Mailbox>()
            .map_err(|e| NotifyError::InvalidAddress(e.to_string()))?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject("Your otp code")
            .header(ContentType::TEXT_PLAIN)
            .body(otp_body(code, ttl_minutes))
            .map_err(|e| NotifyError::Build(e.to_string()))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        tracing::info!(recipient = %email, "OTP email sent");
        Ok(())
    }
}

/// Used when no SMTP host is configured
///
/// The code itself is only written to the log when `reveal_code` is set,
/// which `main` never does in production.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier {
    reveal_code: bool,
}

impl LogNotifier {
    pub fn new(reveal_code: bool) -> Self {
        Self { reveal_code }
    }
}

#[async_trait]
impl OtpNotifier for LogNotifier {
    async fn send_otp(&self, email: &str, code: &str, ttl_minutes: i64) -> Result<(), NotifyError> {
        let shown = if self.reveal_code { code } else { "<redacted>" };
        tracing::info!(
            recipient = %email,
            otp = %shown,
            ttl_minutes,
            "SMTP disabled; OTP not emailed"
        );
        Ok(())
    }
}

/// A delivered code as seen by [`RecordingNotifier`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentOtp {
    pub email: String,
    pub code: String,
}

/// Keeps every code it is asked to send; for tests and demos
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<SentOtp>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentOtp> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Most recent code sent to `email`
    pub fn last_code_for(&self, email: &str) -> Option<String> {
        self.sent()
            .into_iter()
            .rev()
            .find(|s| s.email == email)
            .map(|s| s.code)
    }
}

#[async_trait]
impl OtpNotifier for RecordingNotifier {
    async fn send_otp(&self, email: &str, code: &str, _ttl_minutes: i64) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(SentOtp {
                email: email.to_string(),
                code: code.to_string(),
            });
        Ok(())
    }
}

fn otp_body(code: &str, ttl_minutes: i64) -> String {
    format!(
        "Your OTP code is: {}\nIt will expire in {} minutes.",
        code, ttl_minutes
    )
}
