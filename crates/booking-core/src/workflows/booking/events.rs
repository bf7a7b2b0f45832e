use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::domain::Booking;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingEventKind {
    BookingConfirmed,
    BookingCancelled,
}

impl BookingEventKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::BookingConfirmed => "booking_confirmed",
            Self::BookingCancelled => "booking_cancelled",
        }
    }
}

/// Lifecycle fact emitted after the corresponding state change has been committed.
#[derive(Debug, Clone, Serialize)]
pub struct BookingEvent {
    pub kind: BookingEventKind,
    pub booking: Booking,
    pub property_title: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Consumer of lifecycle events (the notification dispatcher).
///
/// The lifecycle service never awaits delivery; errors are only logged.
#[async_trait]
pub trait BookingEventSink: Send + Sync {
    async fn emit(&self, event: BookingEvent) -> Result<(), DispatchError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("notification store unavailable: {0}")]
    Store(String),
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}
