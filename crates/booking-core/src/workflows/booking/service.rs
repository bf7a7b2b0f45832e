use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::BookingConfig;

use super::clock::Clock;
use super::domain::{
    Booking, BookingFilter, BookingId, BookingPage, BookingStatus, NewBooking, PageRequest,
    PaymentStatus, PropertyId, PropertySnapshot, StayInterval, UserId,
};
use super::error::{BookingError, ConflictStage, ValidationError};
use super::events::{BookingEvent, BookingEventKind, BookingEventSink};
use super::ledger::BookingLedger;
use super::payment::{
    AuthorizationRequest, ConfirmationPolicy, PaymentAuthorization, PaymentCoordinator,
    PaymentIntentStatus,
};
use super::reconciliation::{ReconciliationJournal, ReconciliationReport};
use super::repository::{BookingRepository, PropertyCatalog};
use super::sync::{ExternalSyncGateway, SyncRequest};

/// Request body for a new reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateBookingRequest {
    pub property_id: PropertyId,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub guests: u32,
}

/// A reserved booking plus the handle the client needs to complete payment.
#[derive(Debug, Clone, Serialize)]
pub struct CreatedBooking {
    pub booking: Booking,
    pub payment: PaymentAuthorization,
}

/// External collaborators consumed by the lifecycle service.
#[derive(Clone)]
pub struct LifecycleCollaborators {
    pub properties: Arc<dyn PropertyCatalog>,
    pub payments: Arc<dyn PaymentCoordinator>,
    pub sync: Arc<dyn ExternalSyncGateway>,
    pub events: Arc<dyn BookingEventSink>,
}

/// State machine coordinating the ledger with payment, sync, and notification
/// collaborators: create, then confirm once funds are committed, then cancel.
///
/// Work after a committed confirmation (external sync, event emission) runs on
/// detached tasks and can never roll the confirmation back.
pub struct BookingLifecycleService<R> {
    ledger: Arc<BookingLedger<R>>,
    properties: Arc<dyn PropertyCatalog>,
    payments: Arc<dyn PaymentCoordinator>,
    sync: Arc<dyn ExternalSyncGateway>,
    events: Arc<dyn BookingEventSink>,
    journal: Arc<ReconciliationJournal>,
    policy: ConfirmationPolicy,
    currency: String,
}

impl<R> BookingLifecycleService<R>
where
    R: BookingRepository + 'static,
{
    pub fn new(
        repository: Arc<R>,
        collaborators: LifecycleCollaborators,
        config: &BookingConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let ledger = Arc::new(BookingLedger::new(
            repository,
            clock,
            config.cancellation_window_hours,
        ));
        let LifecycleCollaborators {
            properties,
            payments,
            sync,
            events,
        } = collaborators;

        Self {
            ledger,
            properties,
            payments,
            sync,
            events,
            journal: Arc::new(ReconciliationJournal::default()),
            policy: config.confirmation_policy,
            currency: config.currency.clone(),
        }
    }

    pub fn ledger(&self) -> &Arc<BookingLedger<R>> {
        &self.ledger
    }

    pub fn journal(&self) -> &Arc<ReconciliationJournal> {
        &self.journal
    }

    pub fn policy(&self) -> ConfirmationPolicy {
        self.policy
    }

    /// Reserve the stay, then authorize payment. A failed authorization removes
    /// the reservation so no partial state survives.
    pub async fn create(
        &self,
        actor: &UserId,
        request: CreateBookingRequest,
    ) -> Result<CreatedBooking, BookingError> {
        let stay = StayInterval::new(request.check_in, request.check_out);
        self.ledger.validate_stay(&stay)?;

        let property = self.active_property(&request.property_id).await?;
        let booking = self
            .ledger
            .create(NewBooking {
                property_id: property.property_id.clone(),
                user_id: actor.clone(),
                stay,
                guests: request.guests,
                price_per_night: property.price_per_night,
                max_guests: property.max_guests,
            })
            .await?;

        let authorization = match self.payments.authorize(self.authorization_for(&booking)).await {
            Ok(authorization) => authorization,
            Err(payment_error) => {
                warn!(booking_id = %booking.id, error = %payment_error, "payment authorization failed, rolling back");
                if let Err(rollback_error) = self.ledger.delete(&booking.id).await {
                    error!(booking_id = %booking.id, error = %rollback_error, "rollback of provisional booking failed; journaled for removal");
                    self.journal
                        .record_stale_reservation(booking.id.clone(), self.ledger.clock().now());
                }
                return Err(BookingError::PaymentAuthorizationFailed(payment_error));
            }
        };

        let booking = self.link_authorization(&booking.id, &authorization).await?;
        info!(booking_id = %booking.id, payment_ref = %authorization.reference, "booking created");

        Ok(CreatedBooking {
            booking,
            payment: authorization,
        })
    }

    /// Idempotent confirmation; safe to call from client retries and payment signals.
    pub async fn confirm(&self, actor: &UserId, id: &BookingId) -> Result<Booking, BookingError> {
        let booking = self.owned_booking(actor, id).await?;

        match booking.status {
            BookingStatus::Confirmed => return self.reaffirm(booking).await,
            BookingStatus::Pending => {}
            status => return Err(BookingError::InvalidTransition { status }),
        }

        let reference = match booking.external_payment_ref.clone() {
            Some(reference) => reference,
            None => self.recover_reference(&booking.id).await?.ok_or(
                BookingError::PaymentNotVerified {
                    status: PaymentIntentStatus::RequiresPaymentMethod,
                },
            )?,
        };

        let snapshot = self
            .payments
            .retrieve_status(&reference)
            .await
            .map_err(BookingError::PaymentLookupFailed)?;

        if !self.policy.accepts(snapshot.status) {
            if snapshot.status.is_dead() {
                if let Err(err) = self
                    .ledger
                    .record_payment_status(&booking.id, PaymentStatus::Failed)
                    .await
                {
                    warn!(booking_id = %booking.id, error = %err, "could not cache failed payment status");
                }
            }
            debug!(booking_id = %booking.id, status = snapshot.status.label(), policy = self.policy.label(), "payment not confirmable");
            return Err(BookingError::PaymentNotVerified {
                status: snapshot.status,
            });
        }

        let transition = {
            let _reservation = self.ledger.lock_property(&booking.property_id).await?;
            let still_free = self
                .ledger
                .oracle()
                .is_available(&booking.property_id, &booking.stay, Some(&booking.id))
                .await?;
            if !still_free {
                warn!(booking_id = %booking.id, property_id = %booking.property_id, "availability lost before confirmation; refund required");
                return Err(BookingError::Conflict {
                    stage: ConflictStage::Confirmation,
                });
            }
            self.ledger.transition_to_confirmed(&booking.id).await?
        };

        if transition.applied {
            info!(booking_id = %booking.id, payment_status = snapshot.status.label(), "booking confirmed");
            self.after_confirmation(transition.booking.clone());
        }
        Ok(transition.booking)
    }

    /// Owner cancellation. No refund is triggered here.
    pub async fn cancel(&self, actor: &UserId, id: &BookingId) -> Result<Booking, BookingError> {
        let cancelled = self.ledger.transition_to_cancelled(id, actor).await?;
        info!(booking_id = %cancelled.id, "booking cancelled");
        self.after_cancellation(cancelled.clone());
        Ok(cancelled)
    }

    pub async fn get(&self, actor: &UserId, id: &BookingId) -> Result<Booking, BookingError> {
        self.owned_booking(actor, id).await
    }

    pub async fn list(
        &self,
        actor: &UserId,
        filter: BookingFilter,
        page: PageRequest,
    ) -> Result<BookingPage, BookingError> {
        self.ledger.list_by_user(actor, filter, page).await
    }

    pub async fn check_availability(
        &self,
        property: &PropertyId,
        check_in: NaiveDate,
        check_out: NaiveDate,
    ) -> Result<bool, BookingError> {
        let stay = StayInterval::new(check_in, check_out);
        if !stay.is_well_formed() {
            return Err(ValidationError::CheckOutNotAfterCheckIn.into());
        }
        Ok(self.ledger.oracle().is_available(property, &stay, None).await?)
    }

    /// Return a usable client secret, replacing an authorization that can no
    /// longer be completed.
    pub async fn refresh_payment(
        &self,
        actor: &UserId,
        id: &BookingId,
    ) -> Result<PaymentAuthorization, BookingError> {
        let booking = self.owned_booking(actor, id).await?;
        if booking.status != BookingStatus::Pending {
            return Err(BookingError::InvalidTransition {
                status: booking.status,
            });
        }

        let reference = match booking.external_payment_ref.clone() {
            Some(reference) => Some(reference),
            None => self.recover_reference(&booking.id).await?,
        };

        if let Some(reference) = reference {
            let snapshot = self
                .payments
                .retrieve_status(&reference)
                .await
                .map_err(BookingError::PaymentLookupFailed)?;
            if let (false, Some(client_secret)) = (snapshot.status.is_dead(), snapshot.client_secret) {
                return Ok(PaymentAuthorization {
                    reference: snapshot.reference,
                    client_secret,
                    amount: snapshot.amount,
                });
            }
            info!(booking_id = %booking.id, status = snapshot.status.label(), "replacing unusable payment authorization");
        }

        let authorization = self
            .payments
            .authorize(self.authorization_for(&booking))
            .await
            .map_err(BookingError::PaymentAuthorizationFailed)?;
        self.link_authorization(&booking.id, &authorization).await?;
        Ok(authorization)
    }

    /// Out-of-band payment notification; confirms on behalf of the owner.
    pub async fn handle_payment_signal(
        &self,
        id: &BookingId,
        payment_ref: &str,
    ) -> Result<Booking, BookingError> {
        let booking = self.ledger.get(id).await?;
        let known = booking.external_payment_ref.as_deref() == Some(payment_ref)
            || self
                .journal
                .get(id)
                .is_some_and(|entry| entry.authorization.reference == payment_ref);
        if !known {
            return Err(ValidationError::PaymentReferenceMismatch.into());
        }
        self.confirm(&booking.user_id, id).await
    }

    /// Payment notification that carries only the authorization reference.
    pub async fn handle_payment_reference(&self, payment_ref: &str) -> Result<Booking, BookingError> {
        let booking_id = match self.ledger.find_by_payment_ref(payment_ref).await {
            Ok(booking) => booking.id,
            Err(BookingError::NotFound) => self
                .journal
                .pending()
                .into_iter()
                .find(|entry| entry.authorization.reference == payment_ref)
                .map(|entry| entry.booking_id)
                .ok_or(BookingError::NotFound)?,
            Err(err) => return Err(err),
        };
        self.handle_payment_signal(&booking_id, payment_ref).await
    }

    /// Re-attach authorizations whose booking update failed during creation and
    /// remove reservations whose rollback failed.
    pub async fn reconcile_orphaned_payments(&self) -> ReconciliationReport {
        let mut report = ReconciliationReport::default();
        for entry in self.journal.stale_reservations() {
            self.journal.note_release_attempt(&entry.booking_id);
            match self.ledger.delete(&entry.booking_id).await {
                Ok(()) => {
                    self.journal.release_stale(&entry.booking_id);
                    info!(booking_id = %entry.booking_id, "stale reservation released");
                    report.released += 1;
                }
                Err(BookingError::NotFound) => {
                    self.journal.release_stale(&entry.booking_id);
                }
                Err(err) => {
                    warn!(booking_id = %entry.booking_id, attempts = entry.attempts + 1, error = %err, "stale reservation still present");
                    report.still_pending += 1;
                }
            }
        }

        for entry in self.journal.pending() {
            self.journal.note_attempt(&entry.booking_id);
            match self
                .ledger
                .attach_payment_ref(&entry.booking_id, &entry.authorization.reference)
                .await
            {
                Ok(_) => {
                    self.journal.resolve(&entry.booking_id);
                    info!(booking_id = %entry.booking_id, payment_ref = %entry.authorization.reference, "orphaned authorization attached");
                    report.attached += 1;
                }
                Err(BookingError::NotFound) => {
                    self.journal.resolve(&entry.booking_id);
                    error!(booking_id = %entry.booking_id, payment_ref = %entry.authorization.reference, "authorization has no booking; void it with the payment provider");
                    report.discarded += 1;
                }
                Err(err) => {
                    warn!(booking_id = %entry.booking_id, attempts = entry.attempts + 1, error = %err, "orphaned authorization still unattached");
                    report.still_pending += 1;
                }
            }
        }
        report
    }

    async fn active_property(&self, id: &PropertyId) -> Result<PropertySnapshot, BookingError> {
        match self.properties.fetch(id).await? {
            Some(property) if property.is_active => Ok(property),
            _ => Err(BookingError::PropertyUnavailable),
        }
    }

    async fn owned_booking(&self, actor: &UserId, id: &BookingId) -> Result<Booking, BookingError> {
        let booking = self.ledger.get(id).await?;
        if !booking.is_owned_by(actor) {
            return Err(BookingError::Forbidden);
        }
        Ok(booking)
    }

    /// An already confirmed booking still holds its slot; report success either way.
    async fn reaffirm(&self, booking: Booking) -> Result<Booking, BookingError> {
        let holds = self
            .ledger
            .oracle()
            .is_available(&booking.property_id, &booking.stay, Some(&booking.id))
            .await?;
        if holds {
            debug!(booking_id = %booking.id, "booking already confirmed");
        } else {
            error!(booking_id = %booking.id, property_id = %booking.property_id, "confirmed booking overlaps another active booking");
        }
        Ok(booking)
    }

    fn authorization_for(&self, booking: &Booking) -> AuthorizationRequest {
        let mut metadata = BTreeMap::new();
        metadata.insert("booking_id".to_string(), booking.id.0.clone());
        metadata.insert("property_id".to_string(), booking.property_id.0.clone());
        metadata.insert("user_id".to_string(), booking.user_id.0.clone());
        AuthorizationRequest {
            amount: booking.total_amount,
            currency: self.currency.clone(),
            metadata,
        }
    }

    /// Persist the authorization on the booking, journaling it when storage fails
    /// so the reference is never lost.
    async fn link_authorization(
        &self,
        id: &BookingId,
        authorization: &PaymentAuthorization,
    ) -> Result<Booking, BookingError> {
        match self.ledger.attach_payment_ref(id, &authorization.reference).await {
            Ok(booking) => {
                self.journal.resolve(id);
                Ok(booking)
            }
            Err(err) => {
                error!(booking_id = %id, payment_ref = %authorization.reference, error = %err, "could not store payment reference; journaled for reconciliation");
                self.journal
                    .record(id.clone(), authorization.clone(), self.ledger.clock().now());
                Err(err)
            }
        }
    }

    async fn recover_reference(&self, id: &BookingId) -> Result<Option<String>, BookingError> {
        let Some(entry) = self.journal.get(id) else {
            return Ok(None);
        };
        let reference = entry.authorization.reference.clone();
        self.ledger.attach_payment_ref(id, &reference).await?;
        self.journal.resolve(id);
        info!(booking_id = %id, payment_ref = %reference, "recovered journaled payment reference");
        Ok(Some(reference))
    }

    fn after_confirmation(&self, booking: Booking) {
        let ledger = self.ledger.clone();
        let properties = self.properties.clone();
        let sync = self.sync.clone();
        let events = self.events.clone();

        tokio::spawn(async move {
            let property = match properties.fetch(&booking.property_id).await {
                Ok(property) => property,
                Err(err) => {
                    warn!(booking_id = %booking.id, error = %err, "property lookup failed after confirmation");
                    None
                }
            };
            let property_title = property.as_ref().map(|snapshot| snapshot.title.clone());

            let emit_booking = booking.clone();
            let clock = ledger.clock().clone();
            tokio::spawn(async move {
                let event = BookingEvent {
                    kind: BookingEventKind::BookingConfirmed,
                    booking: emit_booking,
                    property_title,
                    occurred_at: clock.now(),
                };
                dispatch(events.as_ref(), event).await;
            });

            mirror(ledger.as_ref(), sync.as_ref(), booking, property.as_ref()).await;
        });
    }

    fn after_cancellation(&self, booking: Booking) {
        let properties = self.properties.clone();
        let sync = self.sync.clone();
        let events = self.events.clone();
        let clock = self.ledger.clock().clone();

        tokio::spawn(async move {
            if let Some(sync_ref) = booking.external_sync_ref.as_deref() {
                if let Err(err) = sync.update_status(sync_ref, BookingStatus::Cancelled).await {
                    warn!(booking_id = %booking.id, sync_ref, error = %err, "external sync of cancellation failed");
                }
            }

            let property_title = properties
                .fetch(&booking.property_id)
                .await
                .ok()
                .flatten()
                .map(|snapshot| snapshot.title);
            let event = BookingEvent {
                kind: BookingEventKind::BookingCancelled,
                booking,
                property_title,
                occurred_at: clock.now(),
            };
            dispatch(events.as_ref(), event).await;
        });
    }
}

async fn dispatch(events: &dyn BookingEventSink, event: BookingEvent) {
    let booking_id = event.booking.id.clone();
    let kind = event.kind.label();
    match events.emit(event).await {
        Ok(()) => debug!(booking_id = %booking_id, kind, "lifecycle event dispatched"),
        Err(err) => warn!(booking_id = %booking_id, kind, error = %err, "lifecycle event dispatch failed"),
    }
}

async fn mirror<R>(
    ledger: &BookingLedger<R>,
    sync: &dyn ExternalSyncGateway,
    booking: Booking,
    property: Option<&PropertySnapshot>,
) where
    R: BookingRepository + 'static,
{
    let booking_id = booking.id.clone();
    let request = SyncRequest::new(booking, property);

    match sync.check_availability(&request).await {
        Ok(true) => {}
        Ok(false) => {
            info!(booking_id = %booking_id, listing_id = %request.listing_id, "external system reports the stay unavailable; local ledger is authoritative")
        }
        Err(err) => debug!(booking_id = %booking_id, error = %err, "external availability check failed"),
    }

    match sync.mirror_booking(request).await {
        Ok(sync_ref) => match ledger.record_sync_ref(&booking_id, &sync_ref).await {
            Ok(_) => info!(booking_id = %booking_id, sync_ref = %sync_ref, "booking mirrored to external system"),
            Err(err) => warn!(booking_id = %booking_id, sync_ref = %sync_ref, error = %err, "could not store external sync reference"),
        },
        Err(err) => warn!(booking_id = %booking_id, error = %err, "external sync failed"),
    }
}

/// Periodically sweep the reconciliation journal.
pub fn spawn_reconciliation<R>(
    service: Arc<BookingLifecycleService<R>>,
    every: Duration,
) -> JoinHandle<()>
where
    R: BookingRepository + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if service.journal().is_empty() {
                continue;
            }
            let report = service.reconcile_orphaned_payments().await;
            debug!(
                attached = report.attached,
                discarded = report.discarded,
                released = report.released,
                still_pending = report.still_pending,
                "payment reconciliation sweep"
            );
        }
    })
}
