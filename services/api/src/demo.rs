use crate::infra::{build_runtime, Runtime};
use booking_core::config::{AppConfig, EndpointConfig};
use booking_core::error::AppError;
use booking_core::workflows::booking::{
    BookingError, CreateBookingRequest, PaymentIntentStatus, PropertyId, SystemClock, UserId,
};
use booking_core::workflows::notifications::NotificationQuery;
use chrono::{Local, NaiveDate};
use clap::Args;
use std::sync::Arc;
use std::time::Duration;

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Check-in date (YYYY-MM-DD). Defaults to 30 days from today.
    #[arg(long, value_parser = crate::infra::parse_date)]
    pub(crate) check_in: Option<NaiveDate>,
    /// Length of stay in nights.
    #[arg(long, default_value_t = 3)]
    pub(crate) nights: u32,
    /// Number of guests.
    #[arg(long, default_value_t = 2)]
    pub(crate) guests: u32,
    /// Property to book from the demo catalog.
    #[arg(long, default_value = "prop-harbour-loft")]
    pub(crate) property: String,
}

const DEMO_GUEST: &str = "demo-guest";
const RIVAL_GUEST: &str = "demo-rival";

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        check_in,
        nights,
        guests,
        property,
    } = args;

    // Always the in-process adapters, whatever the environment points at.
    let mut config = AppConfig::load()?;
    config.payment = EndpointConfig::default();
    config.sync = EndpointConfig::default();

    let runtime = build_runtime(&config, Arc::new(SystemClock))?;
    let Runtime {
        bookings,
        notifications,
        simulated_payments,
        mirror,
    } = runtime;

    let check_in =
        check_in.unwrap_or_else(|| Local::now().date_naive() + chrono::Duration::days(30));
    let check_out = check_in + chrono::Duration::days(i64::from(nights));
    let guest = UserId(DEMO_GUEST.to_string());
    let request = CreateBookingRequest {
        property_id: PropertyId(property),
        check_in,
        check_out,
        guests,
    };

    println!("Booking lifecycle demo");
    println!(
        "Policy {} | cancellation window {}h | currency {}",
        config.booking.confirmation_policy.label(),
        config.booking.cancellation_window_hours,
        config.booking.currency
    );

    let created = match bookings.create(&guest, request.clone()).await {
        Ok(created) => created,
        Err(err) => {
            println!("- Reservation rejected: {err}");
            return Ok(());
        }
    };
    let booking_id = created.booking.id.clone();
    println!(
        "- Reserved {} for {} -> {} ({} nights, {} guests), total {} minor units",
        booking_id,
        check_in,
        check_out,
        created.booking.nights(),
        created.booking.guests,
        created.booking.total_amount
    );
    println!(
        "  Payment authorization {} awaiting the guest",
        created.payment.reference
    );

    match bookings.confirm(&guest, &booking_id).await {
        Err(BookingError::PaymentNotVerified { status }) => {
            println!("- Early confirm refused: payment {}", status.label())
        }
        Err(err) => println!("- Early confirm failed: {err}"),
        Ok(booking) => println!("- Early confirm accepted ({})", booking.status.label()),
    }

    let rival = UserId(RIVAL_GUEST.to_string());
    match bookings.create(&rival, request).await {
        Err(err) if err.is_conflict() => println!("- Overlapping request from {rival}: {err}"),
        Err(err) => println!("- Overlapping request failed: {err}"),
        Ok(other) => println!("- Overlapping request unexpectedly reserved {}", other.booking.id),
    }

    if let Some(payments) = &simulated_payments {
        payments.set_status(&created.payment.reference, PaymentIntentStatus::Succeeded);
        println!("  Guest completed payment");
    }

    let confirmed = bookings.confirm(&guest, &booking_id).await?;
    println!(
        "- Confirmed {} (payment {:?})",
        confirmed.id, confirmed.payment_status
    );
    let again = bookings.confirm(&guest, &booking_id).await?;
    println!(
        "- Repeated confirm is a no-op (version {} -> {})",
        confirmed.version, again.version
    );

    // Sync and notification delivery run detached; give them a moment.
    for _ in 0..50 {
        if notifications.unread_count(&guest).await.unwrap_or_default() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    if let Some(mirror) = &mirror {
        for mirrored in mirror.mirrored() {
            println!(
                "  Mirrored to property-management system as {} (listing {})",
                mirrored.sync_ref, mirrored.listing_id
            );
        }
    }

    match bookings.cancel(&guest, &booking_id).await {
        Ok(cancelled) => println!("- Cancelled {} ({})", cancelled.id, cancelled.status.label()),
        Err(err) => println!("- Cancellation refused: {err}"),
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    match notifications
        .list(&guest, NotificationQuery::default())
        .await
    {
        Ok(page) => {
            println!("\nInbox for {guest} ({} unread)", page.unread_count);
            for notification in page.notifications {
                println!("- {}: {}", notification.title, notification.message);
            }
        }
        Err(err) => println!("\nInbox unavailable: {err}"),
    }

    Ok(())
}
