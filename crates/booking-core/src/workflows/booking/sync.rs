use async_trait::async_trait;
use serde::Serialize;

use super::domain::{Booking, BookingStatus, PropertySnapshot};

/// Payload mirrored to the external property-management system.
#[derive(Debug, Clone, Serialize)]
pub struct SyncRequest {
    pub booking: Booking,
    /// Listing id in the external system, falling back to our property id.
    pub listing_id: String,
    pub property_title: String,
}

impl SyncRequest {
    pub fn new(booking: Booking, property: Option<&PropertySnapshot>) -> Self {
        let listing_id = property
            .and_then(|snapshot| snapshot.external_listing_id.clone())
            .unwrap_or_else(|| booking.property_id.0.clone());
        let property_title = property
            .map(|snapshot| snapshot.title.clone())
            .unwrap_or_default();
        Self {
            booking,
            listing_id,
            property_title,
        }
    }
}

/// Mirror of confirmed bookings in an external property-management system.
///
/// Best effort: every failure is logged by the caller and never undoes local state.
#[async_trait]
pub trait ExternalSyncGateway: Send + Sync {
    async fn mirror_booking(&self, request: SyncRequest) -> Result<String, SyncError>;
    async fn update_status(&self, sync_ref: &str, status: BookingStatus) -> Result<(), SyncError>;
    /// The external system's own availability opinion; advisory only.
    async fn check_availability(&self, request: &SyncRequest) -> Result<bool, SyncError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error("external sync transport failed: {0}")]
    Transport(String),
    #[error("external sync rejected the request: {0}")]
    Rejected(String),
    #[error("external record '{0}' not found")]
    NotFound(String),
}
