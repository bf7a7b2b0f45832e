use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::json;
use tracing::{info, warn};

use crate::workflows::booking::{
    BookingEvent, BookingEventKind, BookingEventSink, Clock, DispatchError, UserId,
};

use super::domain::{
    Notification, NotificationError, NotificationId, NotificationKind, NotificationPage,
    NotificationQuery,
};
use super::email::{EmailMessage, EmailTransport};
use super::registry::{PeerMessage, PeerRegistry};
use super::store::NotificationStore;

const UNTITLED_PROPERTY: &str = "your stay";

/// Persists, pushes and e-mails one notification per lifecycle event, and
/// serves the per-user inbox.
pub struct NotificationDispatcher {
    store: Arc<dyn NotificationStore>,
    peers: Arc<PeerRegistry>,
    email: Arc<dyn EmailTransport>,
    clock: Arc<dyn Clock>,
}

fn long_date(date: NaiveDate) -> String {
    date.format("%B %-d, %Y").to_string()
}

fn render(event: &BookingEvent) -> (NotificationKind, String, String) {
    let property = event.property_title.as_deref().unwrap_or(UNTITLED_PROPERTY);
    let stay = &event.booking.stay;
    match event.kind {
        BookingEventKind::BookingConfirmed => (
            NotificationKind::BookingConfirmed,
            "Booking Confirmed!".to_string(),
            format!(
                "Your booking for \"{property}\" from {} to {} has been confirmed.",
                long_date(stay.check_in),
                long_date(stay.check_out)
            ),
        ),
        BookingEventKind::BookingCancelled => (
            NotificationKind::BookingCancelled,
            "Booking Cancelled".to_string(),
            format!(
                "Your booking for \"{property}\" from {} to {} has been cancelled.",
                long_date(stay.check_in),
                long_date(stay.check_out)
            ),
        ),
    }
}

fn metadata(event: &BookingEvent) -> BTreeMap<String, String> {
    let booking = &event.booking;
    let mut metadata = BTreeMap::new();
    metadata.insert("booking_id".to_string(), booking.id.0.clone());
    if let Some(title) = &event.property_title {
        metadata.insert("property_title".to_string(), title.clone());
    }
    metadata.insert("check_in".to_string(), booking.stay.check_in.to_string());
    metadata.insert("check_out".to_string(), booking.stay.check_out.to_string());
    metadata.insert("guests".to_string(), booking.guests.to_string());
    metadata.insert("total_amount".to_string(), booking.total_amount.to_string());
    metadata
}

impl NotificationDispatcher {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        peers: Arc<PeerRegistry>,
        email: Arc<dyn EmailTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            peers,
            email,
            clock,
        }
    }

    pub fn peers(&self) -> &Arc<PeerRegistry> {
        &self.peers
    }

    pub async fn list(
        &self,
        user: &UserId,
        query: NotificationQuery,
    ) -> Result<NotificationPage, NotificationError> {
        let notifications = self
            .store
            .list_for_user(user, query.unread_only, query.page)
            .await?;
        let total = self.store.count_for_user(user, query.unread_only).await?;
        let unread_count = self.store.count_for_user(user, true).await?;
        Ok(NotificationPage {
            notifications,
            current_page: query.page.page,
            total_pages: total.div_ceil(u64::from(query.page.limit)),
            total,
            unread_count,
        })
    }

    pub async fn mark_read(
        &self,
        user: &UserId,
        id: &NotificationId,
    ) -> Result<Notification, NotificationError> {
        let notification = self
            .store
            .mark_read(user, id)
            .await?
            .ok_or(NotificationError::NotFound)?;
        self.push(
            user,
            "notification_updated",
            json!({ "notification": &notification }),
        );
        Ok(notification)
    }

    pub async fn mark_all_read(&self, user: &UserId) -> Result<usize, NotificationError> {
        let flipped = self.store.mark_all_read(user).await?;
        if flipped > 0 {
            self.push(user, "notifications_read", json!({ "count": flipped }));
        }
        Ok(flipped)
    }

    pub async fn unread_count(&self, user: &UserId) -> Result<u64, NotificationError> {
        self.store.count_for_user(user, true).await
    }

    fn push(&self, user: &UserId, event: &str, payload: serde_json::Value) {
        let delivered = self.peers.send_to_user(
            user,
            PeerMessage {
                event: event.to_string(),
                payload,
            },
        );
        if delivered == 0 {
            info!(user_id = %user, event, "no connected peers; notification kept in inbox");
        }
    }
}

#[async_trait]
impl BookingEventSink for NotificationDispatcher {
    async fn emit(&self, event: BookingEvent) -> Result<(), DispatchError> {
        let (kind, title, message) = render(&event);
        let notification = Notification {
            id: NotificationId::generate(),
            user_id: event.booking.user_id.clone(),
            booking_id: event.booking.id.clone(),
            kind,
            title,
            message,
            metadata: metadata(&event),
            is_read: false,
            created_at: self.clock.now(),
        };

        let stored = self
            .store
            .insert(notification)
            .await
            .map_err(|err| DispatchError::Store(err.to_string()))?;
        info!(
            notification_id = %stored.id.0,
            booking_id = %stored.booking_id,
            kind = event.kind.label(),
            "notification stored"
        );

        self.push(
            &stored.user_id,
            "new_notification",
            json!({ "notification": &stored }),
        );

        let email = EmailMessage {
            recipient: stored.user_id.clone(),
            subject: stored.title.clone(),
            body: stored.message.clone(),
            template_params: stored.metadata.clone(),
        };
        if let Err(err) = self.email.send(email).await {
            warn!(notification_id = %stored.id.0, error = %err, "email hand-off failed");
            return Err(err);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::booking::{
        Booking, BookingId, BookingStatus, FixedClock, PageRequest, PaymentStatus, PropertyId,
        StayInterval,
    };
    use crate::workflows::notifications::{InMemoryNotificationStore, LoggingEmailTransport};
    use chrono::{TimeZone, Utc};

    struct RefusingTransport;

    #[async_trait]
    impl EmailTransport for RefusingTransport {
        async fn send(&self, _message: EmailMessage) -> Result<(), DispatchError> {
            Err(DispatchError::Delivery("mailbox full".to_string()))
        }
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, day).expect("valid date")
    }

    fn booking(user: &str) -> Booking {
        let at = Utc.with_ymd_and_hms(2025, 5, 1, 9, 0, 0).single().expect("valid time");
        Booking {
            id: BookingId("bkg_test".to_string()),
            property_id: PropertyId("prop-1".to_string()),
            user_id: UserId(user.to_string()),
            stay: StayInterval::new(date(1), date(5)),
            guests: 2,
            total_amount: 40_000,
            status: BookingStatus::Confirmed,
            payment_status: PaymentStatus::Pending,
            external_payment_ref: Some("pi_sim_000001".to_string()),
            external_sync_ref: None,
            created_at: at,
            updated_at: at,
            version: 1,
        }
    }

    fn event(kind: BookingEventKind, user: &str) -> BookingEvent {
        BookingEvent {
            kind,
            booking: booking(user),
            property_title: Some("Harbour Loft".to_string()),
            occurred_at: Utc::now(),
        }
    }

    fn dispatcher(email: Arc<dyn EmailTransport>) -> NotificationDispatcher {
        let now = Utc.with_ymd_and_hms(2025, 5, 2, 12, 0, 0).single().expect("valid time");
        NotificationDispatcher::new(
            Arc::new(InMemoryNotificationStore::default()),
            PeerRegistry::new(),
            email,
            Arc::new(FixedClock::new(now)),
        )
    }

    #[tokio::test]
    async fn confirmation_is_stored_and_pushed() {
        let dispatcher = dispatcher(Arc::new(LoggingEmailTransport));
        let user = UserId("guest-1".to_string());
        let mut connection = dispatcher.peers().connect(user.clone());

        dispatcher
            .emit(event(BookingEventKind::BookingConfirmed, "guest-1"))
            .await
            .expect("dispatch succeeds");

        let page = dispatcher
            .list(&user, NotificationQuery::default())
            .await
            .expect("inbox lists");
        assert_eq!(page.total, 1);
        assert_eq!(page.unread_count, 1);
        let stored = &page.notifications[0];
        assert_eq!(stored.kind, NotificationKind::BookingConfirmed);
        assert_eq!(
            stored.message,
            "Your booking for \"Harbour Loft\" from June 1, 2025 to June 5, 2025 has been confirmed."
        );
        assert_eq!(stored.metadata.get("total_amount").map(String::as_str), Some("40000"));

        let pushed = connection.recv().await.expect("peer receives push");
        assert_eq!(pushed.event, "new_notification");
    }

    #[tokio::test]
    async fn failed_email_still_keeps_the_inbox_entry() {
        let dispatcher = dispatcher(Arc::new(RefusingTransport));
        let user = UserId("guest-2".to_string());

        let result = dispatcher
            .emit(event(BookingEventKind::BookingCancelled, "guest-2"))
            .await;
        assert!(matches!(result, Err(DispatchError::Delivery(_))));
        assert_eq!(dispatcher.unread_count(&user).await.expect("count"), 1);
    }

    #[tokio::test]
    async fn marking_read_is_scoped_to_the_owner() {
        let dispatcher = dispatcher(Arc::new(LoggingEmailTransport));
        let owner = UserId("guest-3".to_string());
        dispatcher
            .emit(event(BookingEventKind::BookingConfirmed, "guest-3"))
            .await
            .expect("dispatch succeeds");
        dispatcher
            .emit(event(BookingEventKind::BookingCancelled, "guest-3"))
            .await
            .expect("dispatch succeeds");

        let page = dispatcher
            .list(&owner, NotificationQuery::default())
            .await
            .expect("inbox lists");
        let id = page.notifications[0].id.clone();

        let stranger = UserId("guest-9".to_string());
        assert_eq!(
            dispatcher.mark_read(&stranger, &id).await,
            Err(NotificationError::NotFound)
        );

        let read = dispatcher.mark_read(&owner, &id).await.expect("owner marks read");
        assert!(read.is_read);
        assert_eq!(dispatcher.unread_count(&owner).await.expect("count"), 1);

        assert_eq!(dispatcher.mark_all_read(&owner).await.expect("mark all"), 1);
        let unread = dispatcher
            .list(
                &owner,
                NotificationQuery {
                    page: PageRequest::default(),
                    unread_only: true,
                },
            )
            .await
            .expect("inbox lists");
        assert_eq!(unread.total, 0);
    }
}
