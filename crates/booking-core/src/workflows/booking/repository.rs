use async_trait::async_trait;

use super::domain::{
    Booking, BookingFilter, BookingId, PageRequest, PropertyId, PropertySnapshot, StayInterval,
    UserId,
};

/// Storage abstraction for booking records.
///
/// Implementations must make each call atomic with respect to the record it
/// touches. `update` only succeeds when the stored version equals
/// `expected_version`, and bumps the version on write.
#[async_trait]
pub trait BookingRepository: Send + Sync {
    async fn insert(&self, booking: Booking) -> Result<Booking, RepositoryError>;
    async fn fetch(&self, id: &BookingId) -> Result<Option<Booking>, RepositoryError>;
    async fn update(
        &self,
        booking: Booking,
        expected_version: u64,
    ) -> Result<Booking, RepositoryError>;
    /// Returns `false` when nothing was removed.
    async fn delete(&self, id: &BookingId) -> Result<bool, RepositoryError>;
    /// Pending or confirmed bookings on `property` whose stay overlaps `stay`.
    async fn find_overlapping_active(
        &self,
        property: &PropertyId,
        stay: &StayInterval,
        exclude: Option<&BookingId>,
    ) -> Result<Vec<Booking>, RepositoryError>;
    async fn find_by_payment_ref(
        &self,
        payment_ref: &str,
    ) -> Result<Option<Booking>, RepositoryError>;
    /// Newest first.
    async fn list_by_user(
        &self,
        user: &UserId,
        filter: BookingFilter,
        page: PageRequest,
    ) -> Result<Vec<Booking>, RepositoryError>;
    async fn count_by_user(
        &self,
        user: &UserId,
        filter: BookingFilter,
    ) -> Result<u64, RepositoryError>;
}

/// Read access to the externally owned property catalog.
#[async_trait]
pub trait PropertyCatalog: Send + Sync {
    async fn fetch(&self, id: &PropertyId) -> Result<Option<PropertySnapshot>, RepositoryError>;
}

/// Error enumeration for repository failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("record was modified concurrently (expected version {expected})")]
    VersionConflict { expected: u64 },
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}
