//! Turns booking lifecycle events into user-visible notifications.
//!
//! The dispatcher owns the inbox store, the connected-peer registry, and the
//! e-mail hand-off; the booking core only ever sees it as a
//! [`BookingEventSink`](crate::workflows::booking::BookingEventSink).

pub mod dispatcher;
pub mod domain;
pub mod email;
pub mod registry;
pub mod router;
pub mod store;

pub use dispatcher::NotificationDispatcher;
pub use domain::{
    Notification, NotificationError, NotificationId, NotificationKind, NotificationPage,
    NotificationQuery,
};
pub use email::{EmailMessage, EmailTransport, LoggingEmailTransport};
pub use registry::{ConnectionId, PeerConnection, PeerMessage, PeerRegistry};
pub use router::notification_router;
pub use store::{InMemoryNotificationStore, NotificationStore};
