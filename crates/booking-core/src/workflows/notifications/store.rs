use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::workflows::booking::{PageRequest, UserId};

use super::domain::{Notification, NotificationError, NotificationId};

/// Persistence boundary for user inboxes.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn insert(&self, notification: Notification) -> Result<Notification, NotificationError>;

    /// Newest first.
    async fn list_for_user(
        &self,
        user: &UserId,
        unread_only: bool,
        page: PageRequest,
    ) -> Result<Vec<Notification>, NotificationError>;

    async fn count_for_user(
        &self,
        user: &UserId,
        unread_only: bool,
    ) -> Result<u64, NotificationError>;

    /// `None` when the notification does not exist or belongs to someone else.
    async fn mark_read(
        &self,
        user: &UserId,
        id: &NotificationId,
    ) -> Result<Option<Notification>, NotificationError>;

    /// Returns how many notifications flipped from unread to read.
    async fn mark_all_read(&self, user: &UserId) -> Result<usize, NotificationError>;
}

#[derive(Default, Clone)]
pub struct InMemoryNotificationStore {
    records: Arc<Mutex<HashMap<NotificationId, Notification>>>,
}

impl InMemoryNotificationStore {
    fn guard(
        &self,
    ) -> Result<MutexGuard<'_, HashMap<NotificationId, Notification>>, NotificationError> {
        self.records
            .lock()
            .map_err(|_| NotificationError::Unavailable("notification store poisoned".to_string()))
    }
}

fn visible(notification: &Notification, user: &UserId, unread_only: bool) -> bool {
    &notification.user_id == user && (!unread_only || !notification.is_read)
}

#[async_trait]
impl NotificationStore for InMemoryNotificationStore {
    async fn insert(&self, notification: Notification) -> Result<Notification, NotificationError> {
        let mut guard = self.guard()?;
        guard.insert(notification.id.clone(), notification.clone());
        Ok(notification)
    }

    async fn list_for_user(
        &self,
        user: &UserId,
        unread_only: bool,
        page: PageRequest,
    ) -> Result<Vec<Notification>, NotificationError> {
        let guard = self.guard()?;
        let mut notifications: Vec<Notification> = guard
            .values()
            .filter(|notification| visible(notification, user, unread_only))
            .cloned()
            .collect();
        notifications.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.0.cmp(&a.id.0))
        });
        Ok(notifications
            .into_iter()
            .skip(page.offset())
            .take(page.limit as usize)
            .collect())
    }

    async fn count_for_user(
        &self,
        user: &UserId,
        unread_only: bool,
    ) -> Result<u64, NotificationError> {
        let guard = self.guard()?;
        Ok(guard
            .values()
            .filter(|notification| visible(notification, user, unread_only))
            .count() as u64)
    }

    async fn mark_read(
        &self,
        user: &UserId,
        id: &NotificationId,
    ) -> Result<Option<Notification>, NotificationError> {
        let mut guard = self.guard()?;
        match guard.get_mut(id) {
            Some(notification) if &notification.user_id == user => {
                notification.is_read = true;
                Ok(Some(notification.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn mark_all_read(&self, user: &UserId) -> Result<usize, NotificationError> {
        let mut guard = self.guard()?;
        let mut flipped = 0;
        for notification in guard.values_mut() {
            if &notification.user_id == user && !notification.is_read {
                notification.is_read = true;
                flipped += 1;
            }
        }
        Ok(flipped)
    }
}
