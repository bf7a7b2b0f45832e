use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use crate::workflows::actor::ActingUser;

use super::domain::{BookingFilter, BookingId, BookingStatus, PageRequest, PropertyId};
use super::error::BookingError;
use super::repository::BookingRepository;
use super::service::{BookingLifecycleService, CreateBookingRequest};

/// Router builder exposing the booking lifecycle over HTTP.
pub fn booking_router<R>(service: Arc<BookingLifecycleService<R>>) -> Router
where
    R: BookingRepository + 'static,
{
    Router::new()
        .route(
            "/api/v1/bookings",
            post(create_handler::<R>).get(list_handler::<R>),
        )
        .route("/api/v1/bookings/:booking_id", get(get_handler::<R>))
        .route(
            "/api/v1/bookings/:booking_id/confirm",
            post(confirm_handler::<R>),
        )
        .route(
            "/api/v1/bookings/:booking_id/cancel",
            post(cancel_handler::<R>),
        )
        .route(
            "/api/v1/bookings/:booking_id/payment",
            post(refresh_payment_handler::<R>),
        )
        .route("/api/v1/payments/signal", post(payment_signal_handler::<R>))
        .route(
            "/api/v1/properties/:property_id/availability",
            get(availability_handler::<R>),
        )
        .with_state(service)
}

/// HTTP status for each failure class.
pub fn status_for(error: &BookingError) -> StatusCode {
    match error {
        BookingError::Validation(_) => StatusCode::BAD_REQUEST,
        BookingError::NotFound | BookingError::PropertyUnavailable => StatusCode::NOT_FOUND,
        BookingError::Forbidden => StatusCode::FORBIDDEN,
        BookingError::Conflict { .. } | BookingError::InvalidTransition { .. } => {
            StatusCode::CONFLICT
        }
        BookingError::CancellationWindow { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        BookingError::PaymentNotVerified { .. } => StatusCode::PAYMENT_REQUIRED,
        BookingError::PaymentAuthorizationFailed(_) | BookingError::PaymentLookupFailed(_) => {
            StatusCode::BAD_GATEWAY
        }
        BookingError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn error_response(error: BookingError) -> Response {
    let status = status_for(&error);
    if status.is_server_error() {
        error!(error = %error, "booking request failed");
    }
    let payload = json!({ "error": error.to_string() });
    (status, Json(payload)).into_response()
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListQuery {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    page: Option<u32>,
    #[serde(default)]
    limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AvailabilityQuery {
    check_in: NaiveDate,
    check_out: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PaymentSignal {
    #[serde(default)]
    booking_id: Option<BookingId>,
    payment_reference: String,
}

pub(crate) async fn create_handler<R>(
    State(service): State<Arc<BookingLifecycleService<R>>>,
    ActingUser(actor): ActingUser,
    Json(request): Json<CreateBookingRequest>,
) -> Response
where
    R: BookingRepository + 'static,
{
    match service.create(&actor, request).await {
        Ok(created) => (StatusCode::CREATED, Json(created)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn list_handler<R>(
    State(service): State<Arc<BookingLifecycleService<R>>>,
    ActingUser(actor): ActingUser,
    Query(query): Query<ListQuery>,
) -> Response
where
    R: BookingRepository + 'static,
{
    let status = match query.status.as_deref().filter(|raw| !raw.is_empty()) {
        None => None,
        Some(raw) => match BookingStatus::parse(raw) {
            Some(status) => Some(status),
            None => {
                let payload = json!({ "error": format!("unknown booking status '{raw}'") });
                return (StatusCode::BAD_REQUEST, Json(payload)).into_response();
            }
        },
    };
    let page = PageRequest::new(query.page.unwrap_or(1), query.limit.unwrap_or(10));

    match service.list(&actor, BookingFilter { status }, page).await {
        Ok(page) => (StatusCode::OK, Json(page)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn get_handler<R>(
    State(service): State<Arc<BookingLifecycleService<R>>>,
    ActingUser(actor): ActingUser,
    Path(booking_id): Path<String>,
) -> Response
where
    R: BookingRepository + 'static,
{
    match service.get(&actor, &BookingId(booking_id)).await {
        Ok(booking) => (StatusCode::OK, Json(booking)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn confirm_handler<R>(
    State(service): State<Arc<BookingLifecycleService<R>>>,
    ActingUser(actor): ActingUser,
    Path(booking_id): Path<String>,
) -> Response
where
    R: BookingRepository + 'static,
{
    match service.confirm(&actor, &BookingId(booking_id)).await {
        Ok(booking) => (StatusCode::OK, Json(booking)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn cancel_handler<R>(
    State(service): State<Arc<BookingLifecycleService<R>>>,
    ActingUser(actor): ActingUser,
    Path(booking_id): Path<String>,
) -> Response
where
    R: BookingRepository + 'static,
{
    match service.cancel(&actor, &BookingId(booking_id)).await {
        Ok(booking) => (StatusCode::OK, Json(booking)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn refresh_payment_handler<R>(
    State(service): State<Arc<BookingLifecycleService<R>>>,
    ActingUser(actor): ActingUser,
    Path(booking_id): Path<String>,
) -> Response
where
    R: BookingRepository + 'static,
{
    match service.refresh_payment(&actor, &BookingId(booking_id)).await {
        Ok(payment) => (StatusCode::OK, Json(payment)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn payment_signal_handler<R>(
    State(service): State<Arc<BookingLifecycleService<R>>>,
    Json(signal): Json<PaymentSignal>,
) -> Response
where
    R: BookingRepository + 'static,
{
    let outcome = match &signal.booking_id {
        Some(id) => {
            service
                .handle_payment_signal(id, &signal.payment_reference)
                .await
        }
        None => {
            service
                .handle_payment_reference(&signal.payment_reference)
                .await
        }
    };
    match outcome {
        Ok(booking) => (StatusCode::OK, Json(booking)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn availability_handler<R>(
    State(service): State<Arc<BookingLifecycleService<R>>>,
    Path(property_id): Path<String>,
    Query(query): Query<AvailabilityQuery>,
) -> Response
where
    R: BookingRepository + 'static,
{
    let property_id = PropertyId(property_id);
    match service
        .check_availability(&property_id, query.check_in, query.check_out)
        .await
    {
        Ok(available) => {
            let payload = json!({
                "property_id": property_id,
                "check_in": query.check_in,
                "check_out": query.check_out,
                "available": available,
            });
            (StatusCode::OK, Json(payload)).into_response()
        }
        Err(err) => error_response(err),
    }
}
