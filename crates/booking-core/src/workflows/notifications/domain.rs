use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::workflows::booking::{BookingId, PageRequest, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationId(pub String);

impl NotificationId {
    pub fn generate() -> Self {
        Self(format!("ntf_{}", Uuid::new_v4().simple()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    BookingConfirmed,
    BookingCancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub user_id: UserId,
    pub booking_id: BookingId,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub metadata: BTreeMap<String, String>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationQuery {
    pub page: PageRequest,
    pub unread_only: bool,
}

impl Default for NotificationQuery {
    fn default() -> Self {
        Self {
            page: PageRequest::new(1, 20),
            unread_only: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NotificationPage {
    pub notifications: Vec<Notification>,
    pub current_page: u32,
    pub total_pages: u64,
    pub total: u64,
    pub unread_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotificationError {
    #[error("notification not found")]
    NotFound,
    #[error("notification store unavailable: {0}")]
    Unavailable(String),
}
