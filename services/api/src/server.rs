use crate::cli::ServeArgs;
use crate::infra::{build_runtime, AppState};
use crate::routes::with_application_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use booking_core::config::AppConfig;
use booking_core::error::AppError;
use booking_core::telemetry;
use booking_core::workflows::booking::{spawn_reconciliation, SystemClock};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{info, warn};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let runtime = build_runtime(&config, Arc::new(SystemClock))?;
    let _reconciler = spawn_reconciliation(
        runtime.bookings.clone(),
        config.booking.reconcile_interval,
    );
    let policy = runtime.bookings.policy();
    if runtime.simulated_payments.is_some() {
        warn!("simulated payments are settled through POST /dev/payments/:reference/settle");
    }

    let app = with_application_routes(
        runtime.bookings,
        runtime.notifications,
        runtime.simulated_payments,
    )
    .layer(Extension(app_state))
    .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        policy = policy.label(),
        cancellation_window_hours = config.booking.cancellation_window_hours,
        "booking service ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
