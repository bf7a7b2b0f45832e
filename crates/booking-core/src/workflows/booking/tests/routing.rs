use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{Method, Request, StatusCode};
use serde_json::json;
use tower::ServiceExt;

use super::common::*;
use crate::workflows::actor::{ActingUser, USER_HEADER};
use crate::workflows::booking::router::{confirm_handler, status_for};
use crate::workflows::booking::{
    booking_router, BookingError, BookingStatus, ConfirmationPolicy, ConflictStage,
    InMemoryBookingStore, PaymentIntentStatus, RepositoryError, ValidationError,
};

fn create_request(user: &str, check_in: &str, check_out: &str) -> Request<Body> {
    let body = json!({
        "property_id": PROPERTY,
        "check_in": check_in,
        "check_out": check_out,
        "guests": 2,
    });
    Request::builder()
        .method(Method::POST)
        .uri("/api/v1/bookings")
        .header("content-type", "application/json")
        .header(USER_HEADER, user)
        .body(Body::from(body.to_string()))
        .expect("request")
}

fn get_request(user: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(USER_HEADER, user)
        .body(Body::empty())
        .expect("request")
}

#[test]
fn failures_map_to_distinct_statuses() {
    let cases = [
        (
            BookingError::Validation(ValidationError::NoGuests),
            StatusCode::BAD_REQUEST,
        ),
        (BookingError::NotFound, StatusCode::NOT_FOUND),
        (BookingError::Forbidden, StatusCode::FORBIDDEN),
        (
            BookingError::Conflict {
                stage: ConflictStage::Confirmation,
            },
            StatusCode::CONFLICT,
        ),
        (
            BookingError::CancellationWindow {
                hours_until_check_in: 5,
                window_hours: 24,
            },
            StatusCode::UNPROCESSABLE_ENTITY,
        ),
        (
            BookingError::PaymentNotVerified {
                status: PaymentIntentStatus::Processing,
            },
            StatusCode::PAYMENT_REQUIRED,
        ),
        (
            BookingError::Storage(RepositoryError::Unavailable("down".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR,
        ),
    ];

    for (error, expected) in cases {
        assert_eq!(status_for(&error), expected, "{error}");
    }
}

#[tokio::test]
async fn requests_without_a_user_are_unauthorized() {
    let harness = harness(ConfirmationPolicy::Strict);
    let response = booking_router(harness.service)
        .oneshot(
            Request::builder()
                .uri("/api/v1/bookings")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn create_then_overlap_over_http() {
    let harness = harness(ConfirmationPolicy::Strict);
    let router = booking_router(harness.service);

    let created = router
        .clone()
        .oneshot(create_request(GUEST, "2025-06-01", "2025-06-05"))
        .await
        .expect("response");
    assert_eq!(created.status(), StatusCode::CREATED);
    let body = json_body(created).await;
    assert_eq!(body["booking"]["status"], "pending");
    assert_eq!(body["booking"]["total_amount"], 400);
    assert!(body["payment"]["client_secret"].is_string());

    let overlapping = router
        .clone()
        .oneshot(create_request(OTHER_GUEST, "2025-06-04", "2025-06-10"))
        .await
        .expect("response");
    assert_eq!(overlapping.status(), StatusCode::CONFLICT);
    let body = json_body(overlapping).await;
    assert_eq!(body["error"], "property not available for selected dates");

    let adjacent = router
        .oneshot(create_request(OTHER_GUEST, "2025-06-05", "2025-06-08"))
        .await
        .expect("response");
    assert_eq!(adjacent.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn inverted_dates_are_a_bad_request() {
    let harness = harness(ConfirmationPolicy::Strict);
    let response = booking_router(harness.service)
        .oneshot(create_request(GUEST, "2025-06-05", "2025-06-01"))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn confirm_without_payment_requires_payment() {
    let harness = harness(ConfirmationPolicy::Strict);
    let created = harness
        .service
        .create(&guest(), request(1, 4))
        .await
        .expect("booking created");

    let response = confirm_handler::<InMemoryBookingStore>(
        State(harness.service.clone()),
        ActingUser(guest()),
        Path(created.booking.id.0.clone()),
    )
    .await;
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    let body = json_body(response).await;
    assert_eq!(
        body["error"],
        "payment not completed, current status: requires_payment_method"
    );
}

#[tokio::test]
async fn confirm_and_cancel_round_trip_over_http() {
    let harness = harness(ConfirmationPolicy::Strict);
    let created = harness
        .service
        .create(&guest(), request(20, 23))
        .await
        .expect("booking created");
    harness
        .payments
        .set_status(&created.payment.reference, PaymentIntentStatus::Succeeded);
    let router = booking_router(harness.service.clone());
    let id = created.booking.id.0.clone();

    let confirmed = router
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri(format!("/api/v1/bookings/{id}/confirm"))
                .header(USER_HEADER, GUEST)
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(confirmed.status(), StatusCode::OK);
    assert_eq!(json_body(confirmed).await["status"], "confirmed");

    let stranger = router
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri(format!("/api/v1/bookings/{id}/cancel"))
                .header(USER_HEADER, OTHER_GUEST)
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(stranger.status(), StatusCode::FORBIDDEN);

    let cancelled = router
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri(format!("/api/v1/bookings/{id}/cancel"))
                .header(USER_HEADER, GUEST)
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(cancelled.status(), StatusCode::OK);
    assert_eq!(
        json_body(cancelled).await["status"],
        BookingStatus::Cancelled.label()
    );
}

#[tokio::test]
async fn list_rejects_unknown_status_filter() {
    let harness = harness(ConfirmationPolicy::Strict);
    let response = booking_router(harness.service)
        .oneshot(get_request(GUEST, "/api/v1/bookings?status=teleported"))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn list_reports_pagination() {
    let harness = harness(ConfirmationPolicy::Strict);
    for (check_in, check_out) in [(1, 2), (2, 3), (3, 4)] {
        harness
            .service
            .create(&guest(), request(check_in, check_out))
            .await
            .expect("booking created");
    }

    let response = booking_router(harness.service)
        .oneshot(get_request(GUEST, "/api/v1/bookings?status=pending&page=2&limit=2"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["bookings"].as_array().map(Vec::len), Some(1));
    assert_eq!(body["pagination"]["current_page"], 2);
    assert_eq!(body["pagination"]["total_pages"], 2);
    assert_eq!(body["pagination"]["total_bookings"], 3);
}

#[tokio::test]
async fn availability_endpoint_answers_without_a_user() {
    let harness = harness(ConfirmationPolicy::Strict);
    harness
        .service
        .create(&guest(), request(1, 5))
        .await
        .expect("booking created");
    let router = booking_router(harness.service);

    let taken = router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!(
                    "/api/v1/properties/{PROPERTY}/availability?check_in=2025-06-03&check_out=2025-06-06"
                ))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(taken.status(), StatusCode::OK);
    assert_eq!(json_body(taken).await["available"], false);

    let free = router
        .oneshot(
            Request::builder()
                .uri(format!(
                    "/api/v1/properties/{PROPERTY}/availability?check_in=2025-06-05&check_out=2025-06-06"
                ))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(json_body(free).await["available"], true);
}

#[tokio::test]
async fn payment_signal_with_wrong_reference_is_rejected() {
    let harness = harness(ConfirmationPolicy::Strict);
    let created = harness
        .service
        .create(&guest(), request(1, 4))
        .await
        .expect("booking created");

    let response = booking_router(harness.service)
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/api/v1/payments/signal")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({
                        "booking_id": created.booking.id,
                        "payment_reference": "pi_forged",
                    })
                    .to_string(),
                ))
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn payment_signal_without_booking_id_confirms_by_reference() {
    let harness = harness(ConfirmationPolicy::Strict);
    let created = harness
        .service
        .create(&guest(), request(1, 4))
        .await
        .expect("booking created");
    harness
        .payments
        .set_status(&created.payment.reference, PaymentIntentStatus::Succeeded);

    let response = booking_router(harness.service)
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/api/v1/payments/signal")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({ "payment_reference": created.payment.reference }).to_string(),
                ))
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["id"], json!(created.booking.id));
    assert_eq!(body["status"], "confirmed");
}
