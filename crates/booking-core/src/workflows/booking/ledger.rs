use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info};

use super::availability::AvailabilityOracle;
use super::clock::Clock;
use super::domain::{
    Booking, BookingFilter, BookingId, BookingPage, BookingStatus, NewBooking, PageRequest,
    Pagination, PaymentStatus, PropertyId, StayInterval, UserId,
};
use super::error::{BookingError, ConflictStage, ValidationError};
use super::repository::{BookingRepository, RepositoryError};

const MAX_WRITE_ATTEMPTS: usize = 3;

/// Result of a state transition; `applied` is false for idempotent no-ops.
#[derive(Debug, Clone)]
pub struct Transition {
    pub booking: Booking,
    pub applied: bool,
}

/// Owner of booking records and their state transitions.
///
/// Creation holds a per-property async lock across the availability check and
/// the insert, so two overlapping requests for the same property cannot both
/// pass the check. Other writes are serialized per record through the
/// repository's version check.
pub struct BookingLedger<R> {
    repository: Arc<R>,
    oracle: AvailabilityOracle<R>,
    clock: Arc<dyn Clock>,
    cancellation_window_hours: i64,
    property_locks: Mutex<HashMap<PropertyId, Arc<tokio::sync::Mutex<()>>>>,
}

impl<R> BookingLedger<R>
where
    R: BookingRepository + 'static,
{
    pub fn new(repository: Arc<R>, clock: Arc<dyn Clock>, cancellation_window_hours: i64) -> Self {
        let oracle = AvailabilityOracle::new(repository.clone());
        Self {
            repository,
            oracle,
            clock,
            cancellation_window_hours,
            property_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn oracle(&self) -> &AvailabilityOracle<R> {
        &self.oracle
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Exclusive section for reservation decisions on one property.
    pub async fn lock_property(
        &self,
        property: &PropertyId,
    ) -> Result<OwnedMutexGuard<()>, RepositoryError> {
        let lock = {
            let mut table = self
                .property_locks
                .lock()
                .map_err(|_| RepositoryError::Unavailable("property lock table poisoned".into()))?;
            table
                .entry(property.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        Ok(lock.lock_owned().await)
    }

    /// Date checks shared by creation and request pre-validation.
    pub fn validate_stay(&self, stay: &StayInterval) -> Result<(), ValidationError> {
        if !stay.is_well_formed() {
            return Err(ValidationError::CheckOutNotAfterCheckIn);
        }
        if stay.check_in < self.clock.now().date_naive() {
            return Err(ValidationError::CheckInInPast);
        }
        Ok(())
    }

    /// Validate and reserve. The new booking is `pending/pending` and occupies its stay.
    pub async fn create(&self, request: NewBooking) -> Result<Booking, BookingError> {
        let NewBooking {
            property_id,
            user_id,
            stay,
            guests,
            price_per_night,
            max_guests,
        } = request;

        self.validate_stay(&stay)?;
        let now = self.clock.now();
        if guests == 0 {
            return Err(ValidationError::NoGuests.into());
        }
        if guests > max_guests {
            return Err(ValidationError::TooManyGuests {
                requested: guests,
                max_guests,
            }
            .into());
        }

        let nights = u64::try_from(stay.nights()).unwrap_or_default();
        let total_amount = price_per_night
            .checked_mul(nights)
            .ok_or(ValidationError::AmountOutOfRange)?;
        let booking = Booking {
            id: BookingId::generate(),
            property_id,
            user_id,
            stay,
            guests,
            total_amount,
            status: BookingStatus::Pending,
            payment_status: PaymentStatus::Pending,
            external_payment_ref: None,
            external_sync_ref: None,
            created_at: now,
            updated_at: now,
            version: 0,
        };

        let _reservation = self.lock_property(&booking.property_id).await?;
        if !self
            .oracle
            .is_available(&booking.property_id, &booking.stay, None)
            .await?
        {
            debug!(property_id = %booking.property_id, "stay overlaps an active booking");
            return Err(BookingError::Conflict {
                stage: ConflictStage::Creation,
            });
        }

        let stored = self.repository.insert(booking).await?;
        info!(
            booking_id = %stored.id,
            property_id = %stored.property_id,
            nights,
            total_amount = stored.total_amount,
            "booking reserved"
        );
        Ok(stored)
    }

    /// Hard removal; only for rolling back a reservation whose payment step failed.
    pub async fn delete(&self, id: &BookingId) -> Result<(), BookingError> {
        if self.repository.delete(id).await? {
            info!(booking_id = %id, "provisional booking removed");
            Ok(())
        } else {
            Err(BookingError::NotFound)
        }
    }

    pub async fn get(&self, id: &BookingId) -> Result<Booking, BookingError> {
        self.repository
            .fetch(id)
            .await?
            .ok_or(BookingError::NotFound)
    }

    pub async fn find_by_payment_ref(&self, payment_ref: &str) -> Result<Booking, BookingError> {
        self.repository
            .find_by_payment_ref(payment_ref)
            .await?
            .ok_or(BookingError::NotFound)
    }

    pub async fn list_by_user(
        &self,
        user: &UserId,
        filter: BookingFilter,
        page: PageRequest,
    ) -> Result<BookingPage, BookingError> {
        let bookings = self.repository.list_by_user(user, filter, page).await?;
        let total = self.repository.count_by_user(user, filter).await?;
        Ok(BookingPage {
            bookings,
            pagination: Pagination::new(page, total),
        })
    }

    pub async fn attach_payment_ref(
        &self,
        id: &BookingId,
        reference: &str,
    ) -> Result<Booking, BookingError> {
        self.mutate(id, |booking| {
            if booking.external_payment_ref.as_deref() == Some(reference) {
                return Ok(false);
            }
            booking.external_payment_ref = Some(reference.to_string());
            if booking.payment_status == PaymentStatus::Failed {
                booking.payment_status = PaymentStatus::Pending;
            }
            Ok(true)
        })
        .await
    }

    pub async fn record_sync_ref(
        &self,
        id: &BookingId,
        sync_ref: &str,
    ) -> Result<Booking, BookingError> {
        self.mutate(id, |booking| {
            if booking.external_sync_ref.as_deref() == Some(sync_ref) {
                return Ok(false);
            }
            booking.external_sync_ref = Some(sync_ref.to_string());
            Ok(true)
        })
        .await
    }

    /// Refresh the cached payment projection. Never marks a booking paid;
    /// that only happens together with confirmation.
    pub async fn record_payment_status(
        &self,
        id: &BookingId,
        status: PaymentStatus,
    ) -> Result<Booking, BookingError> {
        self.mutate(id, |booking| {
            if booking.payment_status == status
                || status == PaymentStatus::Paid
                || booking.status != BookingStatus::Pending
            {
                return Ok(false);
            }
            booking.payment_status = status;
            Ok(true)
        })
        .await
    }

    /// Caller must already have verified payment and re-checked availability.
    /// Confirming a confirmed booking is a no-op.
    pub async fn transition_to_confirmed(
        &self,
        id: &BookingId,
    ) -> Result<Transition, BookingError> {
        self.apply(id, |booking| match booking.status {
            BookingStatus::Confirmed => Ok(false),
            BookingStatus::Pending => {
                booking.status = BookingStatus::Confirmed;
                booking.payment_status = PaymentStatus::Paid;
                Ok(true)
            }
            status => Err(BookingError::InvalidTransition { status }),
        })
        .await
    }

    /// Pending bookings can always be cancelled by their owner; confirmed ones
    /// only outside the cancellation window.
    pub async fn transition_to_cancelled(
        &self,
        id: &BookingId,
        actor: &UserId,
    ) -> Result<Booking, BookingError> {
        let now = self.clock.now();
        let window_hours = self.cancellation_window_hours;
        self.mutate(id, |booking| {
            if !booking.is_owned_by(actor) {
                return Err(BookingError::Forbidden);
            }
            if booking.status.is_terminal() {
                return Err(BookingError::InvalidTransition {
                    status: booking.status,
                });
            }
            if booking.status == BookingStatus::Confirmed {
                let hours_until_check_in = booking.hours_until_check_in(now);
                if hours_until_check_in < window_hours {
                    return Err(BookingError::CancellationWindow {
                        hours_until_check_in,
                        window_hours,
                    });
                }
            }
            booking.status = BookingStatus::Cancelled;
            Ok(true)
        })
        .await
    }

    async fn mutate<F>(&self, id: &BookingId, change: F) -> Result<Booking, BookingError>
    where
        F: FnMut(&mut Booking) -> Result<bool, BookingError>,
    {
        self.apply(id, change).await.map(|transition| transition.booking)
    }

    /// Read-modify-write with optimistic retries. `change` returns whether it modified the record.
    async fn apply<F>(&self, id: &BookingId, mut change: F) -> Result<Transition, BookingError>
    where
        F: FnMut(&mut Booking) -> Result<bool, BookingError>,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let current = self.get(id).await?;
            let mut next = current.clone();
            if !change(&mut next)? {
                return Ok(Transition {
                    booking: current,
                    applied: false,
                });
            }
            next.updated_at = self.clock.now();

            match self.repository.update(next, current.version).await {
                Ok(stored) => {
                    return Ok(Transition {
                        booking: stored,
                        applied: true,
                    })
                }
                Err(RepositoryError::VersionConflict { .. }) if attempts < MAX_WRITE_ATTEMPTS => {
                    debug!(booking_id = %id, attempts, "retrying after concurrent write");
                }
                Err(RepositoryError::NotFound) => return Err(BookingError::NotFound),
                Err(err) => return Err(err.into()),
            }
        }
    }
}
