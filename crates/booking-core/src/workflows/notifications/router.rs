use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, patch},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tokio_stream::StreamExt;
use tracing::{debug, error};

use crate::workflows::actor::ActingUser;
use crate::workflows::booking::PageRequest;

use super::dispatcher::NotificationDispatcher;
use super::domain::{NotificationError, NotificationId, NotificationQuery};

/// Inbox routes plus the server-sent event stream for connected peers.
pub fn notification_router(dispatcher: Arc<NotificationDispatcher>) -> Router {
    Router::new()
        .route("/api/v1/notifications", get(list_handler))
        .route("/api/v1/notifications/unread-count", get(unread_count_handler))
        .route("/api/v1/notifications/read-all", patch(read_all_handler))
        .route("/api/v1/notifications/stream", get(stream_handler))
        .route(
            "/api/v1/notifications/:notification_id/read",
            patch(read_handler),
        )
        .with_state(dispatcher)
}

#[derive(Debug, Deserialize)]
struct InboxQuery {
    #[serde(default)]
    page: Option<u32>,
    #[serde(default)]
    limit: Option<u32>,
    #[serde(default)]
    unread_only: bool,
}

fn error_response(err: NotificationError) -> Response {
    let status = match err {
        NotificationError::NotFound => StatusCode::NOT_FOUND,
        NotificationError::Unavailable(_) => {
            error!(error = %err, "notification request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(json!({ "error": err.to_string() }))).into_response()
}

async fn list_handler(
    State(dispatcher): State<Arc<NotificationDispatcher>>,
    ActingUser(actor): ActingUser,
    Query(query): Query<InboxQuery>,
) -> Response {
    let query = NotificationQuery {
        page: PageRequest::new(query.page.unwrap_or(1), query.limit.unwrap_or(20)),
        unread_only: query.unread_only,
    };
    match dispatcher.list(&actor, query).await {
        Ok(page) => (StatusCode::OK, Json(page)).into_response(),
        Err(err) => error_response(err),
    }
}

async fn read_handler(
    State(dispatcher): State<Arc<NotificationDispatcher>>,
    ActingUser(actor): ActingUser,
    Path(notification_id): Path<String>,
) -> Response {
    match dispatcher
        .mark_read(&actor, &NotificationId(notification_id))
        .await
    {
        Ok(notification) => (StatusCode::OK, Json(notification)).into_response(),
        Err(err) => error_response(err),
    }
}

async fn read_all_handler(
    State(dispatcher): State<Arc<NotificationDispatcher>>,
    ActingUser(actor): ActingUser,
) -> Response {
    match dispatcher.mark_all_read(&actor).await {
        Ok(updated) => (StatusCode::OK, Json(json!({ "updated": updated }))).into_response(),
        Err(err) => error_response(err),
    }
}

async fn unread_count_handler(
    State(dispatcher): State<Arc<NotificationDispatcher>>,
    ActingUser(actor): ActingUser,
) -> Response {
    match dispatcher.unread_count(&actor).await {
        Ok(count) => (StatusCode::OK, Json(json!({ "unread_count": count }))).into_response(),
        Err(err) => error_response(err),
    }
}

async fn stream_handler(
    State(dispatcher): State<Arc<NotificationDispatcher>>,
    ActingUser(actor): ActingUser,
) -> Response {
    let connection = dispatcher.peers().connect(actor.clone());
    debug!(user_id = %actor, connection = connection.id().0, "notification stream opened");
    let events = connection.map(|message| {
        Event::default()
            .event(message.event)
            .json_data(message.payload)
    });
    Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response()
}
