use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use super::domain::BookingId;
use super::payment::PaymentAuthorization;

/// Authorization that was created with the coordinator but could not be linked
/// to its booking record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrphanedAuthorization {
    pub booking_id: BookingId,
    pub authorization: PaymentAuthorization,
    pub recorded_at: DateTime<Utc>,
    pub attempts: u32,
}

/// Provisional booking whose payment authorization failed but which could not
/// be removed; it blocks its stay until a sweep deletes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleReservation {
    pub booking_id: BookingId,
    pub recorded_at: DateTime<Utc>,
    pub attempts: u32,
}

/// Journal of authorizations awaiting re-attachment and of reservations
/// awaiting removal.
///
/// Entries leave the journal only once the reference is persisted on the
/// booking, the stale reservation is deleted, or the booking is gone.
#[derive(Debug, Default)]
pub struct ReconciliationJournal {
    entries: Mutex<HashMap<BookingId, OrphanedAuthorization>>,
    stale: Mutex<HashMap<BookingId, StaleReservation>>,
}

impl ReconciliationJournal {
    pub fn record(
        &self,
        booking_id: BookingId,
        authorization: PaymentAuthorization,
        now: DateTime<Utc>,
    ) {
        self.lock().insert(
            booking_id.clone(),
            OrphanedAuthorization {
                booking_id,
                authorization,
                recorded_at: now,
                attempts: 0,
            },
        );
    }

    pub fn get(&self, booking_id: &BookingId) -> Option<OrphanedAuthorization> {
        self.lock().get(booking_id).cloned()
    }

    pub fn pending(&self) -> Vec<OrphanedAuthorization> {
        let mut entries: Vec<_> = self.lock().values().cloned().collect();
        entries.sort_by_key(|entry| entry.recorded_at);
        entries
    }

    pub fn resolve(&self, booking_id: &BookingId) -> Option<OrphanedAuthorization> {
        self.lock().remove(booking_id)
    }

    pub fn note_attempt(&self, booking_id: &BookingId) {
        if let Some(entry) = self.lock().get_mut(booking_id) {
            entry.attempts += 1;
        }
    }

    pub fn record_stale_reservation(&self, booking_id: BookingId, now: DateTime<Utc>) {
        guard(&self.stale).insert(
            booking_id.clone(),
            StaleReservation {
                booking_id,
                recorded_at: now,
                attempts: 0,
            },
        );
    }

    pub fn stale_reservations(&self) -> Vec<StaleReservation> {
        let mut entries: Vec<_> = guard(&self.stale).values().cloned().collect();
        entries.sort_by_key(|entry| entry.recorded_at);
        entries
    }

    pub fn release_stale(&self, booking_id: &BookingId) -> Option<StaleReservation> {
        guard(&self.stale).remove(booking_id)
    }

    pub fn note_release_attempt(&self, booking_id: &BookingId) {
        if let Some(entry) = guard(&self.stale).get_mut(booking_id) {
            entry.attempts += 1;
        }
    }

    /// Orphaned authorizations plus stale reservations.
    pub fn len(&self) -> usize {
        self.lock().len() + guard(&self.stale).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<BookingId, OrphanedAuthorization>> {
        guard(&self.entries)
    }
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Outcome of one reconciliation sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconciliationReport {
    pub attached: usize,
    pub discarded: usize,
    /// Stale reservations deleted.
    pub released: usize,
    pub still_pending: usize,
}
