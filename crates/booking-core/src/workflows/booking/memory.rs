//! In-process adapters used for local development, the CLI demo, and tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::info;

use super::domain::{
    Booking, BookingFilter, BookingId, BookingStatus, PageRequest, PropertyId, PropertySnapshot,
    StayInterval, UserId,
};
use super::payment::{
    AuthorizationRequest, PaymentAuthorization, PaymentCoordinator, PaymentError,
    PaymentIntentStatus, PaymentSnapshot,
};
use super::repository::{BookingRepository, PropertyCatalog, RepositoryError};
use super::sync::{ExternalSyncGateway, SyncError, SyncRequest};

fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> Result<MutexGuard<'a, T>, RepositoryError> {
    mutex
        .lock()
        .map_err(|_| RepositoryError::Unavailable(format!("{what} mutex poisoned")))
}

#[derive(Default, Clone)]
pub struct InMemoryBookingStore {
    records: Arc<Mutex<HashMap<BookingId, Booking>>>,
}

impl InMemoryBookingStore {
    pub fn snapshot(&self) -> Vec<Booking> {
        self.records
            .lock()
            .map(|guard| guard.values().cloned().collect())
            .unwrap_or_default()
    }

    fn user_bookings(
        guard: &HashMap<BookingId, Booking>,
        user: &UserId,
        filter: BookingFilter,
    ) -> Vec<Booking> {
        let mut bookings: Vec<Booking> = guard
            .values()
            .filter(|booking| &booking.user_id == user && filter.matches(booking))
            .cloned()
            .collect();
        bookings.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.0.cmp(&a.id.0))
        });
        bookings
    }
}

#[async_trait]
impl BookingRepository for InMemoryBookingStore {
    async fn insert(&self, booking: Booking) -> Result<Booking, RepositoryError> {
        let mut guard = lock(&self.records, "booking store")?;
        if guard.contains_key(&booking.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(booking.id.clone(), booking.clone());
        Ok(booking)
    }

    async fn fetch(&self, id: &BookingId) -> Result<Option<Booking>, RepositoryError> {
        let guard = lock(&self.records, "booking store")?;
        Ok(guard.get(id).cloned())
    }

    async fn update(
        &self,
        mut booking: Booking,
        expected_version: u64,
    ) -> Result<Booking, RepositoryError> {
        let mut guard = lock(&self.records, "booking store")?;
        let stored = guard.get(&booking.id).ok_or(RepositoryError::NotFound)?;
        if stored.version != expected_version {
            return Err(RepositoryError::VersionConflict {
                expected: expected_version,
            });
        }
        booking.version = expected_version + 1;
        guard.insert(booking.id.clone(), booking.clone());
        Ok(booking)
    }

    async fn delete(&self, id: &BookingId) -> Result<bool, RepositoryError> {
        let mut guard = lock(&self.records, "booking store")?;
        Ok(guard.remove(id).is_some())
    }

    async fn find_overlapping_active(
        &self,
        property: &PropertyId,
        stay: &StayInterval,
        exclude: Option<&BookingId>,
    ) -> Result<Vec<Booking>, RepositoryError> {
        let guard = lock(&self.records, "booking store")?;
        Ok(guard
            .values()
            .filter(|booking| {
                &booking.property_id == property
                    && booking.status.is_active()
                    && booking.stay.overlaps(stay)
                    && exclude.map_or(true, |id| &booking.id != id)
            })
            .cloned()
            .collect())
    }

    async fn find_by_payment_ref(
        &self,
        payment_ref: &str,
    ) -> Result<Option<Booking>, RepositoryError> {
        let guard = lock(&self.records, "booking store")?;
        Ok(guard
            .values()
            .find(|booking| booking.external_payment_ref.as_deref() == Some(payment_ref))
            .cloned())
    }

    async fn list_by_user(
        &self,
        user: &UserId,
        filter: BookingFilter,
        page: PageRequest,
    ) -> Result<Vec<Booking>, RepositoryError> {
        let guard = lock(&self.records, "booking store")?;
        Ok(Self::user_bookings(&guard, user, filter)
            .into_iter()
            .skip(page.offset())
            .take(page.limit as usize)
            .collect())
    }

    async fn count_by_user(
        &self,
        user: &UserId,
        filter: BookingFilter,
    ) -> Result<u64, RepositoryError> {
        let guard = lock(&self.records, "booking store")?;
        Ok(guard
            .values()
            .filter(|booking| &booking.user_id == user && filter.matches(booking))
            .count() as u64)
    }
}

#[derive(Default, Clone)]
pub struct InMemoryPropertyCatalog {
    properties: Arc<Mutex<HashMap<PropertyId, PropertySnapshot>>>,
}

impl InMemoryPropertyCatalog {
    pub fn with_properties(properties: impl IntoIterator<Item = PropertySnapshot>) -> Self {
        let catalog = Self::default();
        for property in properties {
            catalog.upsert(property);
        }
        catalog
    }

    pub fn upsert(&self, property: PropertySnapshot) {
        if let Ok(mut guard) = self.properties.lock() {
            guard.insert(property.property_id.clone(), property);
        }
    }
}

#[async_trait]
impl PropertyCatalog for InMemoryPropertyCatalog {
    async fn fetch(&self, id: &PropertyId) -> Result<Option<PropertySnapshot>, RepositoryError> {
        let guard = lock(&self.properties, "property catalog")?;
        Ok(guard.get(id).cloned())
    }
}

/// Payment coordinator that issues local references. Every intent starts at
/// `requires_payment_method` and only moves through
/// [`SimulatedPaymentCoordinator::set_status`].
#[derive(Clone)]
pub struct SimulatedPaymentCoordinator {
    intents: Arc<Mutex<HashMap<String, PaymentSnapshot>>>,
    sequence: Arc<AtomicU64>,
}

impl Default for SimulatedPaymentCoordinator {
    fn default() -> Self {
        Self {
            intents: Arc::default(),
            sequence: Arc::new(AtomicU64::new(1)),
        }
    }
}

impl SimulatedPaymentCoordinator {
    /// Returns `false` for unknown references.
    pub fn set_status(&self, reference: &str, status: PaymentIntentStatus) -> bool {
        match self.intents.lock() {
            Ok(mut guard) => match guard.get_mut(reference) {
                Some(intent) => {
                    intent.status = status;
                    true
                }
                None => false,
            },
            Err(_) => false,
        }
    }
}

#[async_trait]
impl PaymentCoordinator for SimulatedPaymentCoordinator {
    async fn authorize(
        &self,
        request: AuthorizationRequest,
    ) -> Result<PaymentAuthorization, PaymentError> {
        if request.amount == 0 {
            return Err(PaymentError::Declined("amount must be positive".to_string()));
        }
        let id = self.sequence.fetch_add(1, Ordering::Relaxed);
        let reference = format!("pi_sim_{id:06}");
        let client_secret = format!("{reference}_secret");

        let mut guard = self
            .intents
            .lock()
            .map_err(|_| PaymentError::Unavailable("simulated ledger poisoned".to_string()))?;
        guard.insert(
            reference.clone(),
            PaymentSnapshot {
                reference: reference.clone(),
                status: PaymentIntentStatus::RequiresPaymentMethod,
                client_secret: Some(client_secret.clone()),
                amount: request.amount,
            },
        );

        Ok(PaymentAuthorization {
            reference,
            client_secret,
            amount: request.amount,
        })
    }

    async fn retrieve_status(&self, reference: &str) -> Result<PaymentSnapshot, PaymentError> {
        let guard = self
            .intents
            .lock()
            .map_err(|_| PaymentError::Unavailable("simulated ledger poisoned".to_string()))?;
        guard
            .get(reference)
            .cloned()
            .ok_or_else(|| PaymentError::UnknownReference(reference.to_string()))
    }
}

/// A mirrored booking as held by [`InMemorySyncGateway`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirroredBooking {
    pub sync_ref: String,
    pub listing_id: String,
    pub booking_id: BookingId,
    pub stay: StayInterval,
    pub status: BookingStatus,
}

/// Stand-in for the external property-management system.
#[derive(Default, Clone)]
pub struct InMemorySyncGateway {
    bookings: Arc<Mutex<HashMap<String, MirroredBooking>>>,
    sequence: Arc<AtomicU64>,
}

impl InMemorySyncGateway {
    pub fn mirrored(&self) -> Vec<MirroredBooking> {
        self.bookings
            .lock()
            .map(|guard| guard.values().cloned().collect())
            .unwrap_or_default()
    }

    fn guard(&self) -> Result<MutexGuard<'_, HashMap<String, MirroredBooking>>, SyncError> {
        self.bookings
            .lock()
            .map_err(|_| SyncError::Transport("mirror store poisoned".to_string()))
    }
}

#[async_trait]
impl ExternalSyncGateway for InMemorySyncGateway {
    async fn mirror_booking(&self, request: SyncRequest) -> Result<String, SyncError> {
        let mut guard = self.guard()?;
        if let Some(existing) = guard
            .values()
            .find(|mirrored| mirrored.booking_id == request.booking.id)
        {
            return Ok(existing.sync_ref.clone());
        }

        let id = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let sync_ref = format!("pms_booking_{id:06}");
        guard.insert(
            sync_ref.clone(),
            MirroredBooking {
                sync_ref: sync_ref.clone(),
                listing_id: request.listing_id,
                booking_id: request.booking.id,
                stay: request.booking.stay,
                status: BookingStatus::Confirmed,
            },
        );
        info!(sync_ref = %sync_ref, "booking mirrored in memory");
        Ok(sync_ref)
    }

    async fn update_status(&self, sync_ref: &str, status: BookingStatus) -> Result<(), SyncError> {
        let mut guard = self.guard()?;
        let mirrored = guard
            .get_mut(sync_ref)
            .ok_or_else(|| SyncError::NotFound(sync_ref.to_string()))?;
        mirrored.status = status;
        Ok(())
    }

    async fn check_availability(&self, request: &SyncRequest) -> Result<bool, SyncError> {
        let guard = self.guard()?;
        Ok(!guard.values().any(|mirrored| {
            mirrored.listing_id == request.listing_id
                && mirrored.booking_id != request.booking.id
                && mirrored.status == BookingStatus::Confirmed
                && mirrored.stay.overlaps(&request.booking.stay)
        }))
    }
}
