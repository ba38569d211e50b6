//! Platform write client.
//!
//! Posts shares to the platform's UGC endpoint on behalf of a resolved
//! author. Requests carry the Restli protocol header the endpoint
//! requires; the platform acknowledges with 201 (created) or 202
//! (accepted for async processing) and echoes a request id header used
//! for support escalations.

use linkpress_auth::{AuthError, RetryPolicy};
use serde::Serialize;
use url::Url;

/// Default UGC post endpoint.
pub const DEFAULT_POST_URL: &str = "https://api.linkedin.com/v2/ugcPosts";

/// Environment variable overriding the post endpoint.
pub const POST_URL_VAR: &str = "PLATFORM_POST_URL";

const RESTLI_HEADER: &str = "X-Restli-Protocol-Version";
const RESTLI_VERSION: &str = "2.0.0";

/// Acknowledgement for an accepted post.
#[derive(Debug, Clone, Serialize)]
pub struct PostReceipt {
    /// Platform id of the created share, when reported.
    pub post_id: Option<String>,

    /// Request id echoed by the platform, for support escalations.
    pub request_id: Option<String>,
}

/// HTTP client for the platform's UGC endpoint.
pub struct PlatformClient {
    http_client: reqwest::Client,
    post_url: Url,
    retry: RetryPolicy,
}

impl PlatformClient {
    /// Creates a client for the given post endpoint.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client cannot be created (should not happen in
    /// practice).
    #[must_use]
    pub fn new(post_url: Url) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            http_client,
            post_url,
            retry: RetryPolicy::default(),
        }
    }

    /// Creates a client from the environment, falling back to the default
    /// endpoint.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the override is not a valid URL.
    pub fn from_env() -> Result<Self, AuthError> {
        let url = match std::env::var(POST_URL_VAR) {
            Ok(value) => Url::parse(&value).map_err(|e| {
                AuthError::configuration(format!("{POST_URL_VAR} is not a valid URL: {e}"))
            })?,
            Err(_) => Url::parse(DEFAULT_POST_URL)
                .map_err(|e| AuthError::configuration(format!("invalid default post URL: {e}")))?,
        };
        Ok(Self::new(url))
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Publishes a text-only share.
    ///
    /// # Errors
    ///
    /// - `ReauthRequired` if the platform rejects the access token.
    /// - `UpstreamUnavailable` on other failures.
    pub async fn post_text(
        &self,
        access_token: &str,
        author_urn: &str,
        text: &str,
    ) -> Result<PostReceipt, AuthError> {
        let payload = share_payload(author_urn, text, None);
        self.submit(access_token, &payload).await
    }

    /// Publishes a share carrying an article link.
    ///
    /// # Errors
    ///
    /// As for [`post_text`](Self::post_text).
    pub async fn post_link(
        &self,
        access_token: &str,
        author_urn: &str,
        text: &str,
        link: &LinkAttachment,
    ) -> Result<PostReceipt, AuthError> {
        let payload = share_payload(author_urn, text, Some(link));
        self.submit(access_token, &payload).await
    }

    async fn submit(
        &self,
        access_token: &str,
        payload: &serde_json::Value,
    ) -> Result<PostReceipt, AuthError> {
        let response = self
            .retry
            .send("ugc post", || {
                self.http_client
                    .post(self.post_url.as_str())
                    .bearer_auth(access_token)
                    .header(RESTLI_HEADER, RESTLI_VERSION)
                    .json(payload)
            })
            .await?;

        let status = response.status();
        let request_id = response
            .headers()
            .get("x-restli-request-id")
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        // 201 is synchronous creation, 202 is accepted for processing.
        if !matches!(status.as_u16(), 201 | 202) {
            tracing::warn!(
                status = status.as_u16(),
                request_id = request_id.as_deref().unwrap_or("-"),
                "Platform rejected post"
            );
            if matches!(status.as_u16(), 401 | 403) {
                return Err(AuthError::reauth_required(format!(
                    "platform rejected the access token with HTTP {}",
                    status.as_u16()
                )));
            }
            return Err(AuthError::upstream(format!(
                "post endpoint returned HTTP {}",
                status.as_u16()
            )));
        }

        let header_id = response
            .headers()
            .get("x-restli-id")
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let post_id = match header_id {
            Some(id) => Some(id),
            None => response
                .json::<serde_json::Value>()
                .await
                .ok()
                .and_then(|body| body.get("id").and_then(|v| v.as_str()).map(String::from)),
        };

        tracing::info!(
            post_id = post_id.as_deref().unwrap_or("-"),
            request_id = request_id.as_deref().unwrap_or("-"),
            "Published share"
        );

        Ok(PostReceipt {
            post_id,
            request_id,
        })
    }
}

/// An article link attached to a share.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct LinkAttachment {
    /// The linked URL.
    pub url: String,

    /// Link title shown on the card.
    pub title: Option<String>,

    /// Link description shown on the card.
    pub description: Option<String>,
}

fn share_payload(
    author_urn: &str,
    text: &str,
    link: Option<&LinkAttachment>,
) -> serde_json::Value {
    let share_content = match link {
        None => serde_json::json!({
            "shareCommentary": { "text": text },
            "shareMediaCategory": "NONE",
        }),
        Some(link) => {
            let mut media = serde_json::json!({
                "status": "READY",
                "originalUrl": link.url,
            });
            if let Some(title) = &link.title {
                media["title"] = serde_json::json!({ "text": title });
            }
            if let Some(description) = &link.description {
                media["description"] = serde_json::json!({ "text": description });
            }
            serde_json::json!({
                "shareCommentary": { "text": text },
                "shareMediaCategory": "ARTICLE",
                "media": [media],
            })
        }
    };

    serde_json::json!({
        "author": author_urn,
        "lifecycleState": "PUBLISHED",
        "specificContent": {
            "com.linkedin.ugc.ShareContent": share_content,
        },
        "visibility": {
            "com.linkedin.ugc.MemberNetworkVisibility": "PUBLIC",
        },
    })
}
