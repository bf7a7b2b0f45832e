use std::sync::Arc;

use super::domain::{BookingId, PropertyId, StayInterval};
use super::repository::{BookingRepository, RepositoryError};

/// Answers "is this stay free?" from the booking records alone.
///
/// Only pending and confirmed bookings count. The oracle holds no lock of its
/// own; callers that reserve on a positive answer must hold the ledger's
/// property lock across the check and the write.
pub struct AvailabilityOracle<R> {
    repository: Arc<R>,
}

impl<R> Clone for AvailabilityOracle<R> {
    fn clone(&self) -> Self {
        Self {
            repository: self.repository.clone(),
        }
    }
}

impl<R> AvailabilityOracle<R>
where
    R: BookingRepository + 'static,
{
    pub fn new(repository: Arc<R>) -> Self {
        Self { repository }
    }

    /// `exclude` omits a booking that is re-checking its own slot.
    pub async fn is_available(
        &self,
        property: &PropertyId,
        stay: &StayInterval,
        exclude: Option<&BookingId>,
    ) -> Result<bool, RepositoryError> {
        let conflicts = self
            .repository
            .find_overlapping_active(property, stay, exclude)
            .await?;

        // Storage may hand back a superset; only genuine overlaps block.
        let blocking = conflicts.iter().any(|booking| {
            booking.status.is_active()
                && booking.property_id == *property
                && booking.stay.overlaps(stay)
                && exclude.map_or(true, |id| booking.id != *id)
        });

        Ok(!blocking)
    }
}
