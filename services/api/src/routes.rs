use crate::infra::{AppState, BookingService};
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Extension;
use axum::Json;
use booking_core::workflows::booking::{
    booking_router, PaymentIntentStatus, SimulatedPaymentCoordinator,
};
use booking_core::workflows::notifications::{notification_router, NotificationDispatcher};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

/// Booking and notification routes plus the operational endpoints. The
/// settlement route exists only while payments are simulated.
pub(crate) fn with_application_routes(
    bookings: Arc<BookingService>,
    notifications: Arc<NotificationDispatcher>,
    simulated_payments: Option<SimulatedPaymentCoordinator>,
) -> axum::Router {
    let router = booking_router(bookings)
        .merge(notification_router(notifications))
        .route("/health", axum::routing::get(healthcheck))
        .route("/ready", axum::routing::get(readiness_endpoint))
        .route("/metrics", axum::routing::get(metrics_endpoint));

    match simulated_payments {
        Some(payments) => router.merge(
            axum::Router::new()
                .route(
                    "/dev/payments/:reference/settle",
                    axum::routing::post(settle_simulated_payment),
                )
                .with_state(payments),
        ),
        None => router,
    }
}

pub(crate) async fn settle_simulated_payment(
    State(payments): State<SimulatedPaymentCoordinator>,
    Path(reference): Path<String>,
) -> impl IntoResponse {
    if payments.set_status(&reference, PaymentIntentStatus::Succeeded) {
        info!(payment_ref = %reference, "simulated payment settled");
        (
            StatusCode::OK,
            Json(json!({ "reference": reference, "status": "succeeded" })),
        )
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("unknown payment reference '{reference}'") })),
        )
    }
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}
