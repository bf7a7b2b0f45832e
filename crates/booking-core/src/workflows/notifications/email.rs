use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::info;

use crate::workflows::booking::{DispatchError, UserId};

/// Rendered message handed to an e-mail provider; recipient lookup is the
/// provider bridge's concern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub recipient: UserId,
    pub subject: String,
    pub body: String,
    pub template_params: BTreeMap<String, String>,
}

#[async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send(&self, message: EmailMessage) -> Result<(), DispatchError>;
}

/// Writes messages to the log instead of delivering them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingEmailTransport;

#[async_trait]
impl EmailTransport for LoggingEmailTransport {
    async fn send(&self, message: EmailMessage) -> Result<(), DispatchError> {
        info!(recipient = %message.recipient, subject = %message.subject, "email queued");
        Ok(())
    }
}
