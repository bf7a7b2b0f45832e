use booking_core::config::AppConfig;
use booking_core::error::AppError;
use booking_core::workflows::booking::{
    BookingLifecycleService, Clock, ExternalSyncGateway, HttpPaymentCoordinator, HttpSyncGateway,
    InMemoryBookingStore, InMemoryPropertyCatalog, InMemorySyncGateway, LifecycleCollaborators,
    PaymentCoordinator, PropertyId, PropertySnapshot,
    SimulatedPaymentCoordinator,
};
use booking_core::workflows::notifications::{
    InMemoryNotificationStore, LoggingEmailTransport, NotificationDispatcher, PeerRegistry,
};
use chrono::NaiveDate;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

pub(crate) type BookingService = BookingLifecycleService<InMemoryBookingStore>;

/// Everything the HTTP surface and the demo drive.
pub(crate) struct Runtime {
    pub(crate) bookings: Arc<BookingService>,
    pub(crate) notifications: Arc<NotificationDispatcher>,
    /// Present only when payments are simulated, so callers can settle them.
    pub(crate) simulated_payments: Option<SimulatedPaymentCoordinator>,
    pub(crate) mirror: Option<InMemorySyncGateway>,
}

/// Wire the lifecycle service, choosing HTTP adapters where endpoints are
/// configured and in-process stand-ins otherwise. Simulated payments are
/// refused in production.
pub(crate) fn build_runtime(config: &AppConfig, clock: Arc<dyn Clock>) -> Result<Runtime, AppError> {
    config.check_payment_backend()?;

    let (payments, simulated_payments): (Arc<dyn PaymentCoordinator>, _) =
        match config.payment.base_url.as_deref() {
            Some(url) => {
                info!(payment_api = url, "using remote payment coordinator");
                let client = HttpPaymentCoordinator::new(url, config.payment.api_key.clone())?;
                (Arc::new(client), None)
            }
            None => {
                warn!("PAYMENT_API_URL unset; payments are simulated and must be settled explicitly");
                let simulated = SimulatedPaymentCoordinator::default();
                (Arc::new(simulated.clone()), Some(simulated))
            }
        };

    let (sync, mirror): (Arc<dyn ExternalSyncGateway>, _) = match config.sync.base_url.as_deref() {
        Some(url) => {
            info!(sync_api = url, "using remote property-management sync");
            let client = HttpSyncGateway::new(url, config.sync.api_key.clone())?;
            (Arc::new(client), None)
        }
        None => {
            let mirror = InMemorySyncGateway::default();
            (Arc::new(mirror.clone()), Some(mirror))
        }
    };

    let notifications = Arc::new(NotificationDispatcher::new(
        Arc::new(InMemoryNotificationStore::default()),
        PeerRegistry::new(),
        Arc::new(LoggingEmailTransport),
        clock.clone(),
    ));

    let collaborators = LifecycleCollaborators {
        properties: Arc::new(InMemoryPropertyCatalog::with_properties(demo_properties())),
        payments,
        sync,
        events: notifications.clone(),
    };
    let bookings = Arc::new(BookingLifecycleService::new(
        Arc::new(InMemoryBookingStore::default()),
        collaborators,
        &config.booking,
        clock,
    ));

    Ok(Runtime {
        bookings,
        notifications,
        simulated_payments,
        mirror,
    })
}

/// Listings served by the in-memory catalog. Prices are in minor units.
pub(crate) fn demo_properties() -> Vec<PropertySnapshot> {
    vec![
        PropertySnapshot {
            property_id: PropertyId("prop-harbour-loft".to_string()),
            title: "Harbour Loft".to_string(),
            price_per_night: 18_500,
            max_guests: 4,
            is_active: true,
            external_listing_id: Some("pms-1001".to_string()),
        },
        PropertySnapshot {
            property_id: PropertyId("prop-cedar-cabin".to_string()),
            title: "Cedar Cabin".to_string(),
            price_per_night: 12_000,
            max_guests: 6,
            is_active: true,
            external_listing_id: None,
        },
        PropertySnapshot {
            property_id: PropertyId("prop-old-mill".to_string()),
            title: "Old Mill Studio".to_string(),
            price_per_night: 9_000,
            max_guests: 2,
            is_active: false,
            external_listing_id: None,
        },
    ]
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}
