//! JSON-over-HTTP clients for remote payment and property-management services.
//!
//! Both speak a small vendor-neutral contract; vendor specific bridges sit
//! behind the remote endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};

use super::domain::BookingStatus;
use super::payment::{
    AuthorizationRequest, PaymentAuthorization, PaymentCoordinator, PaymentError,
    PaymentIntentStatus, PaymentSnapshot,
};
use super::sync::{ExternalSyncGateway, SyncError, SyncRequest};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

fn build_client() -> Result<Client, reqwest::Error> {
    Client::builder().timeout(REQUEST_TIMEOUT).build()
}

fn with_key(builder: RequestBuilder, api_key: Option<&str>) -> RequestBuilder {
    match api_key {
        Some(key) => builder.bearer_auth(key),
        None => builder,
    }
}

pub struct HttpPaymentCoordinator {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpPaymentCoordinator {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_client()?,
            base_url: base_url.into(),
            api_key,
        })
    }
}

#[derive(Debug, Deserialize)]
struct AuthorizationBody {
    reference: String,
    client_secret: String,
    amount: u64,
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    reference: String,
    status: String,
    #[serde(default)]
    client_secret: Option<String>,
    amount: u64,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
}

fn payment_transport(err: reqwest::Error) -> PaymentError {
    PaymentError::Unavailable(err.to_string())
}

async fn error_message(response: reqwest::Response) -> String {
    let status = response.status();
    match response.json::<ErrorBody>().await {
        Ok(ErrorBody { error: Some(message) }) => message,
        _ => format!("HTTP {status}"),
    }
}

#[async_trait]
impl PaymentCoordinator for HttpPaymentCoordinator {
    async fn authorize(
        &self,
        request: AuthorizationRequest,
    ) -> Result<PaymentAuthorization, PaymentError> {
        let url = format!("{}/authorizations", self.base_url);
        let response = with_key(self.client.post(url), self.api_key.as_deref())
            .json(&request)
            .send()
            .await
            .map_err(payment_transport)?;

        let status = response.status();
        if status.is_client_error() {
            return Err(PaymentError::Declined(error_message(response).await));
        }
        if !status.is_success() {
            return Err(PaymentError::Unavailable(error_message(response).await));
        }

        let body: AuthorizationBody = response
            .json()
            .await
            .map_err(|err| PaymentError::InvalidResponse(err.to_string()))?;
        Ok(PaymentAuthorization {
            reference: body.reference,
            client_secret: body.client_secret,
            amount: body.amount,
        })
    }

    async fn retrieve_status(&self, reference: &str) -> Result<PaymentSnapshot, PaymentError> {
        let url = format!("{}/authorizations/{reference}", self.base_url);
        let response = with_key(self.client.get(url), self.api_key.as_deref())
            .send()
            .await
            .map_err(payment_transport)?;

        match response.status() {
            StatusCode::NOT_FOUND => return Err(PaymentError::UnknownReference(reference.to_string())),
            status if !status.is_success() => {
                return Err(PaymentError::Unavailable(error_message(response).await))
            }
            _ => {}
        }

        let body: StatusBody = response
            .json()
            .await
            .map_err(|err| PaymentError::InvalidResponse(err.to_string()))?;
        let status = PaymentIntentStatus::parse(&body.status).ok_or_else(|| {
            PaymentError::InvalidResponse(format!("unknown payment status '{}'", body.status))
        })?;
        Ok(PaymentSnapshot {
            reference: body.reference,
            status,
            client_secret: body.client_secret,
            amount: body.amount,
        })
    }
}

pub struct HttpSyncGateway {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpSyncGateway {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_client()?,
            base_url: base_url.into(),
            api_key,
        })
    }

    async fn expect_success(response: reqwest::Response) -> Result<reqwest::Response, SyncError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else if status.is_client_error() {
            Err(SyncError::Rejected(error_message(response).await))
        } else {
            Err(SyncError::Transport(error_message(response).await))
        }
    }
}

#[derive(Debug, Serialize)]
struct StatusUpdate {
    status: BookingStatus,
}

#[derive(Debug, Deserialize)]
struct MirrorBody {
    id: String,
}

#[derive(Debug, Deserialize)]
struct AvailabilityBody {
    available: bool,
}

fn sync_transport(err: reqwest::Error) -> SyncError {
    SyncError::Transport(err.to_string())
}

#[async_trait]
impl ExternalSyncGateway for HttpSyncGateway {
    async fn mirror_booking(&self, request: SyncRequest) -> Result<String, SyncError> {
        let url = format!("{}/bookings", self.base_url);
        let response = with_key(self.client.post(url), self.api_key.as_deref())
            .json(&request)
            .send()
            .await
            .map_err(sync_transport)?;
        let body: MirrorBody = Self::expect_success(response)
            .await?
            .json()
            .await
            .map_err(sync_transport)?;
        Ok(body.id)
    }

    async fn update_status(&self, sync_ref: &str, status: BookingStatus) -> Result<(), SyncError> {
        let url = format!("{}/bookings/{sync_ref}", self.base_url);
        let response = with_key(self.client.patch(url), self.api_key.as_deref())
            .json(&StatusUpdate { status })
            .send()
            .await
            .map_err(sync_transport)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(SyncError::NotFound(sync_ref.to_string()));
        }
        Self::expect_success(response).await.map(|_| ())
    }

    async fn check_availability(&self, request: &SyncRequest) -> Result<bool, SyncError> {
        let url = format!("{}/listings/{}/availability", self.base_url, request.listing_id);
        let response = with_key(self.client.get(url), self.api_key.as_deref())
            .query(&[
                ("check_in", request.booking.stay.check_in.to_string()),
                ("check_out", request.booking.stay.check_out.to_string()),
            ])
            .send()
            .await
            .map_err(sync_transport)?;
        let body: AvailabilityBody = Self::expect_success(response)
            .await?
            .json()
            .await
            .map_err(sync_transport)?;
        Ok(body.available)
    }
}
