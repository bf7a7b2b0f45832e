use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::to_bytes;
use axum::response::Response;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::config::BookingConfig;
use crate::workflows::booking::{
    AuthorizationRequest, Booking, BookingEvent, BookingEventSink, BookingFilter, BookingId,
    BookingLifecycleService, BookingRepository, BookingStatus, ConfirmationPolicy,
    CreateBookingRequest, DispatchError, FixedClock, InMemoryBookingStore,
    InMemoryPropertyCatalog, InMemorySyncGateway, LifecycleCollaborators, PageRequest,
    PaymentAuthorization, PaymentCoordinator, PaymentError, PaymentSnapshot, PaymentStatus,
    PropertyId, PropertySnapshot, RepositoryError, SimulatedPaymentCoordinator, StayInterval,
    UserId,
};

pub(super) const PROPERTY: &str = "prop-harbour";
pub(super) const GUEST: &str = "guest-ana";
pub(super) const OTHER_GUEST: &str = "guest-ben";

/// 2025-05-01T12:00:00Z; every stay in these tests lies in June 2025.
pub(super) fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 5, 1, 12, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub(super) fn at(month: u32, day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, month, day, hour, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub(super) fn june(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, day).expect("valid date")
}

pub(super) fn guest() -> UserId {
    UserId(GUEST.to_string())
}

pub(super) fn other_guest() -> UserId {
    UserId(OTHER_GUEST.to_string())
}

pub(super) fn property() -> PropertySnapshot {
    PropertySnapshot {
        property_id: PropertyId(PROPERTY.to_string()),
        title: "Harbour Loft".to_string(),
        price_per_night: 100,
        max_guests: 4,
        is_active: true,
        external_listing_id: Some("pms-listing-17".to_string()),
    }
}

pub(super) fn request(check_in: u32, check_out: u32) -> CreateBookingRequest {
    CreateBookingRequest {
        property_id: PropertyId(PROPERTY.to_string()),
        check_in: june(check_in),
        check_out: june(check_out),
        guests: 2,
    }
}

pub(super) fn config(policy: ConfirmationPolicy) -> BookingConfig {
    BookingConfig {
        confirmation_policy: policy,
        ..BookingConfig::default()
    }
}

/// A record written straight to storage, bypassing the ledger's checks.
pub(super) fn stored_booking(
    user: &UserId,
    check_in: u32,
    check_out: u32,
    status: BookingStatus,
) -> Booking {
    Booking {
        id: BookingId::generate(),
        property_id: PropertyId(PROPERTY.to_string()),
        user_id: user.clone(),
        stay: StayInterval::new(june(check_in), june(check_out)),
        guests: 1,
        total_amount: 100 * u64::from(check_out - check_in),
        status,
        payment_status: PaymentStatus::Pending,
        external_payment_ref: None,
        external_sync_ref: None,
        created_at: now(),
        updated_at: now(),
        version: 0,
    }
}

/// Forwards every emitted event to a channel the test can await.
pub(super) struct RecordingSink {
    sender: mpsc::UnboundedSender<BookingEvent>,
}

impl RecordingSink {
    pub(super) fn new() -> (Self, mpsc::UnboundedReceiver<BookingEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl BookingEventSink for RecordingSink {
    async fn emit(&self, event: BookingEvent) -> Result<(), DispatchError> {
        self.sender
            .send(event)
            .map_err(|err| DispatchError::Delivery(err.to_string()))
    }
}

pub(super) async fn next_event(events: &mut mpsc::UnboundedReceiver<BookingEvent>) -> BookingEvent {
    tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("event within timeout")
        .expect("event channel open")
}

/// Coordinator that declines everything and remembers which bookings asked.
#[derive(Default)]
pub(super) struct DecliningPayments {
    pub(super) attempted: Mutex<Vec<BookingId>>,
}

impl DecliningPayments {
    pub(super) fn attempted(&self) -> Vec<BookingId> {
        self.attempted.lock().expect("attempts lock").clone()
    }
}

#[async_trait]
impl PaymentCoordinator for DecliningPayments {
    async fn authorize(
        &self,
        request: AuthorizationRequest,
    ) -> Result<PaymentAuthorization, PaymentError> {
        if let Some(id) = request.metadata.get("booking_id") {
            self.attempted
                .lock()
                .expect("attempts lock")
                .push(BookingId(id.clone()));
        }
        Err(PaymentError::Declined("card_declined".to_string()))
    }

    async fn retrieve_status(&self, reference: &str) -> Result<PaymentSnapshot, PaymentError> {
        Err(PaymentError::UnknownReference(reference.to_string()))
    }
}

/// In-memory store whose updates or deletes can be made to fail, or whose
/// updates can lose races.
#[derive(Default)]
pub(super) struct FlakyStore {
    pub(super) inner: InMemoryBookingStore,
    pub(super) fail_updates: AtomicBool,
    pub(super) fail_deletes: AtomicBool,
    pub(super) version_conflicts: AtomicUsize,
}

impl FlakyStore {
    pub(super) fn failing_updates() -> Self {
        let store = Self::default();
        store.fail_updates.store(true, Ordering::SeqCst);
        store
    }

    pub(super) fn failing_deletes() -> Self {
        let store = Self::default();
        store.fail_deletes.store(true, Ordering::SeqCst);
        store
    }

    pub(super) fn recover(&self) {
        self.fail_updates.store(false, Ordering::SeqCst);
        self.fail_deletes.store(false, Ordering::SeqCst);
    }

    pub(super) fn lose_next_races(&self, count: usize) {
        self.version_conflicts.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl BookingRepository for FlakyStore {
    async fn insert(&self, booking: Booking) -> Result<Booking, RepositoryError> {
        self.inner.insert(booking).await
    }

    async fn fetch(&self, id: &BookingId) -> Result<Option<Booking>, RepositoryError> {
        self.inner.fetch(id).await
    }

    async fn update(
        &self,
        booking: Booking,
        expected_version: u64,
    ) -> Result<Booking, RepositoryError> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("primary offline".to_string()));
        }
        let lost_race = self
            .version_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if lost_race {
            return Err(RepositoryError::VersionConflict {
                expected: expected_version,
            });
        }
        self.inner.update(booking, expected_version).await
    }

    async fn delete(&self, id: &BookingId) -> Result<bool, RepositoryError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("primary offline".to_string()));
        }
        self.inner.delete(id).await
    }

    async fn find_overlapping_active(
        &self,
        property: &PropertyId,
        stay: &StayInterval,
        exclude: Option<&BookingId>,
    ) -> Result<Vec<Booking>, RepositoryError> {
        self.inner.find_overlapping_active(property, stay, exclude).await
    }

    async fn find_by_payment_ref(
        &self,
        payment_ref: &str,
    ) -> Result<Option<Booking>, RepositoryError> {
        self.inner.find_by_payment_ref(payment_ref).await
    }

    async fn list_by_user(
        &self,
        user: &UserId,
        filter: BookingFilter,
        page: PageRequest,
    ) -> Result<Vec<Booking>, RepositoryError> {
        self.inner.list_by_user(user, filter, page).await
    }

    async fn count_by_user(
        &self,
        user: &UserId,
        filter: BookingFilter,
    ) -> Result<u64, RepositoryError> {
        self.inner.count_by_user(user, filter).await
    }
}

/// Fully wired lifecycle service over in-memory collaborators.
pub(super) struct Harness<R> {
    pub(super) service: Arc<BookingLifecycleService<R>>,
    pub(super) store: Arc<R>,
    pub(super) payments: SimulatedPaymentCoordinator,
    pub(super) sync: InMemorySyncGateway,
    pub(super) clock: Arc<FixedClock>,
    pub(super) events: mpsc::UnboundedReceiver<BookingEvent>,
}

pub(super) fn harness(policy: ConfirmationPolicy) -> Harness<InMemoryBookingStore> {
    harness_with(Arc::new(InMemoryBookingStore::default()), policy)
}

pub(super) fn harness_with<R>(store: Arc<R>, policy: ConfirmationPolicy) -> Harness<R>
where
    R: BookingRepository + 'static,
{
    let payments = SimulatedPaymentCoordinator::default();
    let sync = InMemorySyncGateway::default();
    let clock = Arc::new(FixedClock::new(now()));
    let (sink, events) = RecordingSink::new();

    let collaborators = LifecycleCollaborators {
        properties: Arc::new(InMemoryPropertyCatalog::with_properties([property()])),
        payments: Arc::new(payments.clone()),
        sync: Arc::new(sync.clone()),
        events: Arc::new(sink),
    };
    let service = Arc::new(BookingLifecycleService::new(
        store.clone(),
        collaborators,
        &config(policy),
        clock.clone(),
    ));

    Harness {
        service,
        store,
        payments,
        sync,
        clock,
        events,
    }
}

pub(super) fn declining_service(
    payments: Arc<DecliningPayments>,
) -> (
    Arc<BookingLifecycleService<InMemoryBookingStore>>,
    Arc<InMemoryBookingStore>,
) {
    let store = Arc::new(InMemoryBookingStore::default());
    (declining_service_over(store.clone(), payments), store)
}

pub(super) fn declining_service_over<R>(
    store: Arc<R>,
    payments: Arc<DecliningPayments>,
) -> Arc<BookingLifecycleService<R>>
where
    R: BookingRepository + 'static,
{
    let (sink, _events) = RecordingSink::new();
    let collaborators = LifecycleCollaborators {
        properties: Arc::new(InMemoryPropertyCatalog::with_properties([property()])),
        payments,
        sync: Arc::new(InMemorySyncGateway::default()),
        events: Arc::new(sink),
    };
    Arc::new(BookingLifecycleService::new(
        store,
        collaborators,
        &config(ConfirmationPolicy::Strict),
        Arc::new(FixedClock::new(now())),
    ))
}

/// Polls until the detached sync task has stored its reference.
pub(super) async fn wait_for_sync_ref<R>(store: &R, id: &BookingId) -> String
where
    R: BookingRepository,
{
    for _ in 0..100 {
        if let Some(sync_ref) = store
            .fetch(id)
            .await
            .expect("fetch succeeds")
            .and_then(|booking| booking.external_sync_ref)
        {
            return sync_ref;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("sync reference was never recorded for {id}");
}

pub(super) async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body bytes");
    serde_json::from_slice(&bytes).expect("json body")
}
