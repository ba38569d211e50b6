//! Publishing endpoints.
//!
//! The write path of the service: each request obtains a fresh access
//! credential, resolves the author identity, and only then calls the
//! platform. An identity mismatch aborts before anything is posted.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use linkpress_auth::http::ApiError;
use linkpress_auth::refresh::RefreshOrchestrator;
use linkpress_auth::resolver::{check_identity_conflict, IdentityResolver};
use serde::Deserialize;

use crate::platform::{LinkAttachment, PlatformClient};

/// Shared state for the publish routes.
#[derive(Clone)]
pub struct PublishState {
    /// Access credential refresher.
    pub refresher: Arc<RefreshOrchestrator>,

    /// Author identity resolver.
    pub resolver: Arc<IdentityResolver>,

    /// Platform write client.
    pub platform: Arc<PlatformClient>,
}

/// Builds the publish router.
pub fn router(state: PublishState) -> Router {
    Router::new()
        .route("/publish/post", post(publish_post))
        .route("/publish/link", post(publish_link))
        .with_state(state)
}

/// Body for `POST /publish/post`.
#[derive(Debug, Deserialize)]
pub struct PostRequest {
    /// The local user to post as.
    pub user_id: i64,

    /// Share text.
    pub text: String,

    /// Member id the client believes it is posting as. Checked against the
    /// resolved identity, never used as the author.
    pub member_id: Option<String>,
}

/// Body for `POST /publish/link`.
#[derive(Debug, Deserialize)]
pub struct LinkPostRequest {
    /// The local user to post as.
    pub user_id: i64,

    /// Share text.
    pub text: String,

    /// Member id the client believes it is posting as. Checked against the
    /// resolved identity, never used as the author.
    pub member_id: Option<String>,

    /// The article link.
    #[serde(flatten)]
    pub link: LinkAttachment,
}

/// `POST /publish/post` - publishes a text share.
async fn publish_post(
    State(state): State<PublishState>,
    Json(request): Json<PostRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (access, identity) =
        prepare(&state, request.user_id, request.member_id.as_deref()).await?;
    let receipt = state
        .platform
        .post_text(&access, &identity.author_urn, &request.text)
        .await?;

    Ok(Json(serde_json::json!({
        "status": "ok",
        "author_urn": identity.author_urn,
        "post_id": receipt.post_id,
        "request_id": receipt.request_id,
    })))
}

/// `POST /publish/link` - publishes a share with an article link.
async fn publish_link(
    State(state): State<PublishState>,
    Json(request): Json<LinkPostRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (access, identity) =
        prepare(&state, request.user_id, request.member_id.as_deref()).await?;
    let receipt = state
        .platform
        .post_link(&access, &identity.author_urn, &request.text, &request.link)
        .await?;

    Ok(Json(serde_json::json!({
        "status": "ok",
        "author_urn": identity.author_urn,
        "post_id": receipt.post_id,
        "request_id": receipt.request_id,
    })))
}

/// Freshness and identity checks shared by both endpoints.
///
/// A `member_id` supplied by the client is checked against the resolved
/// identity; it never overrides it.
async fn prepare(
    state: &PublishState,
    user_id: i64,
    claimed_member_id: Option<&str>,
) -> Result<(String, linkpress_auth::AuthorIdentity), ApiError> {
    let access = state.refresher.ensure_fresh(user_id).await?;
    let identity = state
        .resolver
        .resolve_author(user_id, &access.access_token)
        .await?;
    check_identity_conflict(claimed_member_id, &identity.member_id)?;
    Ok((access.access_token, identity))
}
