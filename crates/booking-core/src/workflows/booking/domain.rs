use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier wrapper for bookings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookingId(pub String);

impl BookingId {
    pub fn generate() -> Self {
        Self(format!("bkg_{}", Uuid::new_v4().simple()))
    }
}

impl std::fmt::Display for BookingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference to a property owned by the listing catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyId(pub String);

impl std::fmt::Display for PropertyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference to a user owned by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Half-open stay interval `[check_in, check_out)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StayInterval {
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
}

impl StayInterval {
    pub fn new(check_in: NaiveDate, check_out: NaiveDate) -> Self {
        Self {
            check_in,
            check_out,
        }
    }

    /// Two stays overlap iff `start1 < end2 && end1 > start2`; a checkout day may
    /// be the next guest's check-in day.
    pub fn overlaps(&self, other: &StayInterval) -> bool {
        self.check_in < other.check_out && self.check_out > other.check_in
    }

    pub fn nights(&self) -> i64 {
        (self.check_out - self.check_in).num_days()
    }

    pub fn is_well_formed(&self) -> bool {
        self.check_in < self.check_out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl BookingStatus {
    /// Pending and confirmed bookings occupy their interval.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Confirmed)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Completed)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "confirmed" => Some(Self::Confirmed),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// Cached projection of the payment coordinator's view. Never authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
}

/// Snapshot of the property taken when a booking is requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertySnapshot {
    pub property_id: PropertyId,
    pub title: String,
    /// Minor currency units.
    pub price_per_night: u64,
    pub max_guests: u32,
    pub is_active: bool,
    /// Listing identifier in the external property-management system, when mirrored.
    pub external_listing_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub property_id: PropertyId,
    pub user_id: UserId,
    pub stay: StayInterval,
    pub guests: u32,
    /// `price_per_night * nights` in minor currency units, fixed at creation.
    pub total_amount: u64,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub external_payment_ref: Option<String>,
    pub external_sync_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency token maintained by the repository.
    pub version: u64,
}

impl Booking {
    pub fn is_owned_by(&self, user: &UserId) -> bool {
        &self.user_id == user
    }

    pub fn nights(&self) -> i64 {
        self.stay.nights()
    }

    /// Whole hours from `now` until check-in (midnight UTC of the check-in date),
    /// truncated toward zero.
    pub fn hours_until_check_in(&self, now: DateTime<Utc>) -> i64 {
        let check_in = self.stay.check_in.and_time(chrono::NaiveTime::MIN).and_utc();
        (check_in - now).num_hours()
    }
}

/// Parameters for a new reservation; price and capacity come from the property snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBooking {
    pub property_id: PropertyId,
    pub user_id: UserId,
    pub stay: StayInterval,
    pub guests: u32,
    pub price_per_night: u64,
    pub max_guests: u32,
}

/// Optional filter applied when listing a user's bookings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BookingFilter {
    pub status: Option<BookingStatus>,
}

impl BookingFilter {
    pub fn matches(&self, booking: &Booking) -> bool {
        self.status.map_or(true, |status| booking.status == status)
    }
}

/// One-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
}

impl PageRequest {
    pub const MAX_LIMIT: u32 = 100;

    pub fn new(page: u32, limit: u32) -> Self {
        Self {
            page: page.max(1),
            limit: limit.clamp(1, Self::MAX_LIMIT),
        }
    }

    pub fn offset(&self) -> usize {
        (self.page as usize - 1) * self.limit as usize
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(1, 10)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Pagination {
    pub current_page: u32,
    pub total_pages: u64,
    pub total_bookings: u64,
}

impl Pagination {
    pub fn new(page: PageRequest, total: u64) -> Self {
        Self {
            current_page: page.page,
            total_pages: total.div_ceil(u64::from(page.limit)),
            total_bookings: total,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BookingPage {
    pub bookings: Vec<Booking>,
    pub pagination: Pagination,
}
