//! Drawing page routes.
//!
//! `/draw` with no room mints one and redirects to it, so every page load
//! lands on a concrete `?roomId=`. An id that does not parse or does not
//! name a stored room sends the browser back to `/draw` for a fresh room.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Redirect, Response};
use serde::Deserialize;
use tracing::{error, warn};
use uuid::Uuid;

use crate::routes::public_dir;
use crate::services::room::{self, RoomError};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct DrawQuery {
    #[serde(rename = "roomId")]
    pub room_id: Option<String>,
}

/// `GET /` — the app lives at `/draw`.
pub async fn redirect_root() -> Redirect {
    Redirect::to("/draw")
}

/// `GET /draw[?roomId=]` — mint, bounce or serve the drawing page.
pub async fn draw_page(State(state): State<AppState>, Query(query): Query<DrawQuery>) -> Response {
    let raw = query.room_id.as_deref().map(str::trim).unwrap_or_default();
    if raw.is_empty() {
        return match room::create_room(&state).await {
            Ok(room_id) => Redirect::to(&format!("/draw?roomId={room_id}")).into_response(),
            Err(e) => {
                error!(error = %e, "room mint failed");
                room_error_to_status(&e).into_response()
            }
        };
    }

    let Ok(room_id) = raw.parse::<Uuid>() else {
        warn!(room_id = raw, "unparseable room id; redirecting");
        return Redirect::to("/draw").into_response();
    };

    match room::room_exists(&state, room_id).await {
        Ok(true) => serve_index().await,
        Ok(false) => {
            warn!(%room_id, "unknown room; redirecting");
            Redirect::to("/draw").into_response()
        }
        Err(e) => {
            error!(error = %e, %room_id, "room lookup failed");
            room_error_to_status(&e).into_response()
        }
    }
}

async fn serve_index() -> Response {
    let path = public_dir().join("index.html");
    match tokio::fs::read_to_string(&path).await {
        Ok(body) => Html(body).into_response(),
        Err(e) => {
            error!(error = %e, path = %path.display(), "index.html unavailable");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn room_error_to_status(err: &RoomError) -> StatusCode {
    match err {
        RoomError::NotFound(_) => StatusCode::NOT_FOUND,
        RoomError::NotJoined(_) => StatusCode::FORBIDDEN,
        RoomError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[cfg(test)]
#[path = "draw_test.rs"]
mod tests;
