//! Payment coordinator contract.
//!
//! The coordinator is the only authority on whether money was committed. The
//! booking's `payment_status` field is a cached projection that is refreshed
//! from here whenever a state-changing decision is made.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Vendor-neutral status of a payment authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentIntentStatus {
    /// Funds committed.
    Succeeded,
    Processing,
    RequiresCapture,
    RequiresAction,
    RequiresPaymentMethod,
    Canceled,
    Expired,
    Failed,
}

impl PaymentIntentStatus {
    pub fn label(self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Processing => "processing",
            Self::RequiresCapture => "requires_capture",
            Self::RequiresAction => "requires_action",
            Self::RequiresPaymentMethod => "requires_payment_method",
            Self::Canceled => "canceled",
            Self::Expired => "expired",
            Self::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "succeeded" | "paid" => Some(Self::Succeeded),
            "processing" => Some(Self::Processing),
            "requires_capture" => Some(Self::RequiresCapture),
            "requires_action" | "requires_confirmation" => Some(Self::RequiresAction),
            "requires_payment_method" => Some(Self::RequiresPaymentMethod),
            "canceled" | "cancelled" => Some(Self::Canceled),
            "expired" => Some(Self::Expired),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// The authorization can no longer be completed and must be replaced.
    pub fn is_dead(self) -> bool {
        matches!(self, Self::Canceled | Self::Expired | Self::Failed)
    }
}

/// Which coordinator statuses allow a booking to be confirmed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationPolicy {
    /// Only committed funds confirm a booking.
    #[default]
    Strict,
    /// Also accepts in-flight statuses; for sandbox deployments whose test
    /// cards never settle.
    Relaxed,
}

impl ConfirmationPolicy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "strict" => Some(Self::Strict),
            "relaxed" => Some(Self::Relaxed),
            _ => None,
        }
    }

    pub fn accepts(self, status: PaymentIntentStatus) -> bool {
        match self {
            Self::Strict => status == PaymentIntentStatus::Succeeded,
            Self::Relaxed => matches!(
                status,
                PaymentIntentStatus::Succeeded
                    | PaymentIntentStatus::Processing
                    | PaymentIntentStatus::RequiresCapture
            ),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Relaxed => "relaxed",
        }
    }
}

/// Request to hold funds for a booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorizationRequest {
    /// Minor currency units.
    pub amount: u64,
    pub currency: String,
    pub metadata: BTreeMap<String, String>,
}

/// Handle returned by the coordinator after a successful authorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentAuthorization {
    pub reference: String,
    pub client_secret: String,
    pub amount: u64,
}

/// Live view of an authorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSnapshot {
    pub reference: String,
    pub status: PaymentIntentStatus,
    pub client_secret: Option<String>,
    pub amount: u64,
}

#[async_trait]
pub trait PaymentCoordinator: Send + Sync {
    async fn authorize(
        &self,
        request: AuthorizationRequest,
    ) -> Result<PaymentAuthorization, PaymentError>;
    async fn retrieve_status(&self, reference: &str) -> Result<PaymentSnapshot, PaymentError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PaymentError {
    #[error("payment declined: {0}")]
    Declined(String),
    #[error("unknown payment reference '{0}'")]
    UnknownReference(String),
    #[error("payment coordinator unavailable: {0}")]
    Unavailable(String),
    #[error("unexpected payment coordinator response: {0}")]
    InvalidResponse(String),
}
