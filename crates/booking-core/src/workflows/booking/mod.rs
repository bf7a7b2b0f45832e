//! Booking lifecycle: reservation, payment-gated confirmation, cancellation,
//! and the availability rules that keep a property from being double-booked.
//!
//! The [`BookingLedger`] is the only writer of booking records. The
//! [`BookingLifecycleService`] orchestrates it together with the payment
//! coordinator, the external property-management mirror, and the event sink.

pub mod availability;
pub mod clock;
pub mod domain;
pub mod error;
pub mod events;
pub mod http;
pub mod ledger;
pub mod memory;
pub mod payment;
pub mod reconciliation;
pub mod repository;
pub mod router;
pub mod service;
pub mod sync;

#[cfg(test)]
mod tests;

pub use availability::AvailabilityOracle;
pub use clock::{Clock, FixedClock, SystemClock};
pub use domain::{
    Booking, BookingFilter, BookingId, BookingPage, BookingStatus, NewBooking, PageRequest,
    Pagination, PaymentStatus, PropertyId, PropertySnapshot, StayInterval, UserId,
};
pub use error::{BookingError, ConflictStage, ValidationError};
pub use events::{BookingEvent, BookingEventKind, BookingEventSink, DispatchError};
pub use http::{HttpPaymentCoordinator, HttpSyncGateway};
pub use ledger::{BookingLedger, Transition};
pub use memory::{
    InMemoryBookingStore, InMemoryPropertyCatalog, InMemorySyncGateway, MirroredBooking,
    SimulatedPaymentCoordinator,
};
pub use payment::{
    AuthorizationRequest, ConfirmationPolicy, PaymentAuthorization, PaymentCoordinator,
    PaymentError, PaymentIntentStatus, PaymentSnapshot,
};
pub use reconciliation::{
    OrphanedAuthorization, ReconciliationJournal, ReconciliationReport, StaleReservation,
};
pub use repository::{BookingRepository, PropertyCatalog, RepositoryError};
pub use router::booking_router;
pub use service::{
    spawn_reconciliation, BookingLifecycleService, CreateBookingRequest, CreatedBooking,
    LifecycleCollaborators,
};
pub use sync::{ExternalSyncGateway, SyncError, SyncRequest};
