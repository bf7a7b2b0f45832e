use super::domain::BookingStatus;
use super::payment::{PaymentError, PaymentIntentStatus};
use super::repository::RepositoryError;

/// User-correctable problems with a booking request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("check-out date must be after check-in date")]
    CheckOutNotAfterCheckIn,
    #[error("check-in date cannot be in the past")]
    CheckInInPast,
    #[error("at least one guest is required")]
    NoGuests,
    #[error("maximum guests allowed: {max_guests}")]
    TooManyGuests { requested: u32, max_guests: u32 },
    #[error("payment reference does not match this booking")]
    PaymentReferenceMismatch,
    #[error("total price for this stay is out of range")]
    AmountOutOfRange,
}

/// Which availability check rejected the booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictStage {
    Creation,
    Confirmation,
}

/// Failure taxonomy shared by the ledger and the lifecycle service.
#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("booking not found")]
    NotFound,
    #[error("property not found or not available")]
    PropertyUnavailable,
    #[error("access denied: booking belongs to another user")]
    Forbidden,
    #[error("{stage}")]
    Conflict { stage: ConflictStage },
    #[error("cancellation not allowed within {window_hours} hours of check-in ({hours_until_check_in}h remaining)")]
    CancellationWindow {
        hours_until_check_in: i64,
        window_hours: i64,
    },
    #[error("booking is already {}", .status.label())]
    InvalidTransition { status: BookingStatus },
    #[error("failed to create payment authorization: {0}")]
    PaymentAuthorizationFailed(#[source] PaymentError),
    #[error("payment not completed, current status: {}", .status.label())]
    PaymentNotVerified { status: PaymentIntentStatus },
    #[error("failed to retrieve payment information: {0}")]
    PaymentLookupFailed(#[source] PaymentError),
    #[error(transparent)]
    Storage(#[from] RepositoryError),
}

impl std::fmt::Display for ConflictStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictStage::Creation => f.write_str("property not available for selected dates"),
            ConflictStage::Confirmation => f.write_str(
                "property is no longer available for the selected dates; payment must be refunded",
            ),
        }
    }
}

impl BookingError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}
