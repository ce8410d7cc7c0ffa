//! Outgoing mail seam.

use crate::error::Result;

/// An outgoing message.
#[derive(Debug, Clone)]
pub struct Mail {
    /// Recipient address.
    pub to: String,
    /// Subject line.
    pub subject: String,
    /// Plain-text body.
    pub body: String,
}

/// Mail delivery backend.
pub trait Mailer: Send + Sync {
    /// Deliver one message.
    fn send(&self, mail: &Mail) -> Result<()>;
}

/// Default backend: logs the message instead of delivering it.
///
/// Good enough for single-host installs where the admin tails the log;
/// a real SMTP backend plugs in behind the same trait.
pub struct LogMailer {
    from: String,
}

impl LogMailer {
    /// Create a log-backed mailer.
    pub fn new(from: String) -> Self {
        Self { from }
    }
}

impl Mailer for LogMailer {
    fn send(&self, mail: &Mail) -> Result<()> {
        tracing::info!(
            from = %self.from,
            to = %mail.to,
            subject = %mail.subject,
            body = %mail.body,
            "Outgoing mail"
        );
        Ok(())
    }
}
