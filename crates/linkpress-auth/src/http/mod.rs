//! HTTP surface for the authorization flow.
//!
//! Exposes the login redirect, provider callback, refresh, and a resolve
//! diagnostic endpoint. Responses follow a uniform shape: successes are
//! `{"status": "ok", ...}` and failures are
//! `{"status": "error", "message": ..., "details": {"category": ...}}`.
//! Raw credential material and the client secret never appear in either.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use time::OffsetDateTime;

use crate::config::IdentitySource;
use crate::error::AuthError;
use crate::flow::{AuthFlowController, CallbackParams};
use crate::refresh::RefreshOrchestrator;
use crate::resolver::IdentityResolver;

/// Shared state for the auth routes.
#[derive(Clone)]
pub struct AuthState {
    /// Login/callback flow controller.
    pub flow: Arc<AuthFlowController>,

    /// Access credential refresher.
    pub refresher: Arc<RefreshOrchestrator>,

    /// Author identity resolver.
    pub resolver: Arc<IdentityResolver>,
}

/// Builds the auth router.
pub fn router(state: AuthState) -> Router {
    Router::new()
        .route("/auth/provider/login", get(login))
        .route("/auth/provider/callback", get(callback))
        .route("/auth/provider/refresh/{user_id}", post(refresh))
        .route("/auth/provider/resolve/{user_id}", get(resolve))
        .with_state(state)
}

/// An `AuthError` rendered as an HTTP response.
pub struct ApiError(pub AuthError);

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::error!(error = %self.0, category = %self.0.category(), "Request failed");
        } else {
            tracing::warn!(error = %self.0, category = %self.0.category(), "Request rejected");
        }

        let body = serde_json::json!({
            "status": "error",
            "message": self.0.to_string(),
            "details": {
                "category": self.0.category().to_string(),
            },
        });
        (status, Json(body)).into_response()
    }
}

/// `GET /auth/provider/login` - redirects to the provider's login page.
async fn login(State(state): State<AuthState>) -> Result<Redirect, ApiError> {
    let url = state.flow.begin_login().await?;
    Ok(Redirect::temporary(url.as_str()))
}

/// `GET /auth/provider/callback` - completes the login exchange.
async fn callback(
    State(state): State<AuthState>,
    Query(params): Query<CallbackParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let outcome = state.flow.complete_callback(&params).await?;
    Ok(Json(serde_json::json!({
        "status": "ok",
        "user_id": outcome.user_id,
        "expires_in": outcome.expires_in,
        "has_id_token": outcome.has_id_token,
        "member_id": outcome.member_id,
    })))
}

/// `POST /auth/provider/refresh/{user_id}` - forces a freshness check.
///
/// The response reports the outcome and remaining lifetime but never the
/// token value itself.
async fn refresh(
    State(state): State<AuthState>,
    Path(user_id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let access = state.refresher.ensure_fresh(user_id).await?;
    let expires_in = access
        .expires_at
        .map(|at| (at - OffsetDateTime::now_utc()).whole_seconds().max(0));

    Ok(Json(serde_json::json!({
        "status": "ok",
        "access_token": "updated",
        "refreshed": access.refreshed,
        "expires_in": expires_in,
    })))
}

/// `GET /auth/provider/resolve/{user_id}` - reports the author identity
/// the system would currently post under.
async fn resolve(
    State(state): State<AuthState>,
    Path(user_id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let access = state.refresher.ensure_fresh(user_id).await?;
    let identity = state
        .resolver
        .resolve_author(user_id, &access.access_token)
        .await?;

    let source = match identity.source {
        IdentitySource::VerifiedIdToken => "id_token",
        IdentitySource::UserinfoCall => "userinfo",
    };
    Ok(Json(serde_json::json!({
        "status": "ok",
        "member_id": identity.member_id,
        "author_urn": identity.author_urn,
        "source": source,
    })))
}
