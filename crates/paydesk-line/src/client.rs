// SPDX-FileCopyrightText: 2026 Paydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP client for the messaging platform's REST surface.
//!
//! Handles reply (single-use token), push (validated target), and profile
//! fetch with a 24-hour per-user cache. All operations are best effort:
//! callers log failures and continue.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use paydesk_core::{MessagingAdapter, PaydeskError, UserId};
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use tracing::{debug, warn};

/// Client for reply/push/profile calls.
pub struct LineClient {
    http: reqwest::Client,
    base_url: String,
    /// user id -> (display name, cache expiry unix ms)
    profile_cache: DashMap<String, (String, i64)>,
    profile_ttl_ms: i64,
    placeholder_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileResponse {
    display_name: String,
}

impl LineClient {
    /// Creates a client authenticated with the channel access token.
    pub fn new(
        channel_token: &str,
        base_url: String,
        profile_ttl: Duration,
        placeholder_name: String,
    ) -> Result<Self, PaydeskError> {
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {channel_token}");
        headers.insert(
            "authorization",
            HeaderValue::from_str(&auth)
                .map_err(|e| PaydeskError::Config(format!("invalid channel token: {e}")))?,
        );
        headers.insert("content-type", HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| PaydeskError::Channel {
                message: format!("failed to build HTTP client: {e}"),
                source: Some(Box::new(e)),
            })?;

        Ok(Self {
            http,
            base_url,
            profile_cache: DashMap::new(),
            profile_ttl_ms: profile_ttl.as_millis() as i64,
            placeholder_name,
        })
    }

    async fn post_message(
        &self,
        endpoint: &str,
        body: serde_json::Value,
    ) -> Result<(), PaydeskError> {
        let url = format!("{}{endpoint}", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| PaydeskError::Channel {
                message: format!("HTTP request to {endpoint} failed: {e}"),
                source: Some(Box::new(e)),
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let detail = response.text().await.unwrap_or_default();
        Err(PaydeskError::Channel {
            message: format!("{endpoint} returned {status}: {detail}"),
            source: None,
        })
    }
}

#[async_trait]
impl MessagingAdapter for LineClient {
    async fn reply(&self, reply_token: &str, text: &str) -> Result<(), PaydeskError> {
        self.post_message(
            "/v2/bot/message/reply",
            serde_json::json!({
                "replyToken": reply_token,
                "messages": [{ "type": "text", "text": text }],
            }),
        )
        .await
    }

    async fn push(&self, user: &UserId, text: &str) -> Result<(), PaydeskError> {
        if !user.is_valid() {
            return Err(PaydeskError::Channel {
                message: format!("refusing push to malformed user id `{user}`"),
                source: None,
            });
        }
        self.post_message(
            "/v2/bot/message/push",
            serde_json::json!({
                "to": user.0,
                "messages": [{ "type": "text", "text": text }],
            }),
        )
        .await
    }

    async fn display_name(&self, user: &UserId) -> String {
        let now_ms = chrono::Utc::now().timestamp_millis();

        if let Some(cached) = self.profile_cache.get(&user.0) {
            let (name, expires_at) = cached.value().clone();
            if expires_at > now_ms {
                return name;
            }
        }

        let url = format!("{}/v2/bot/profile/{}", self.base_url, user.0);
        match self.http.get(&url).send().await {
            Ok(response) if response.status().is_success() => {
                match response.json::<ProfileResponse>().await {
                    Ok(profile) => {
                        self.profile_cache.insert(
                            user.0.clone(),
                            (profile.display_name.clone(), now_ms + self.profile_ttl_ms),
                        );
                        profile.display_name
                    }
                    Err(e) => {
                        warn!(user = %user, error = %e, "malformed profile response");
                        self.placeholder_name.clone()
                    }
                }
            }
            Ok(response) => {
                debug!(user = %user, status = %response.status(), "profile fetch rejected");
                self.placeholder_name.clone()
            }
            Err(e) => {
                warn!(user = %user, error = %e, "profile fetch failed");
                self.placeholder_name.clone()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn uid() -> UserId {
        UserId(format!("U{}", "0a1b2c3d".repeat(4)))
    }

    async fn client_for(server: &MockServer) -> LineClient {
        LineClient::new(
            "test-token",
            server.uri(),
            Duration::from_secs(86_400),
            "顧客".into(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn reply_posts_token_and_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/bot/message/reply"))
            .and(header("authorization", "Bearer test-token"))
            .and(body_partial_json(serde_json::json!({
                "replyToken": "rt-1",
                "messages": [{ "type": "text", "text": "hello" }],
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        client.reply("rt-1", "hello").await.unwrap();
    }

    #[tokio::test]
    async fn push_refuses_malformed_user_id_without_http() {
        let server = MockServer::start().await;
        // No mock mounted: any request would 404 and the test would still
        // pass, but the point is the client refuses before sending.
        let client = client_for(&server).await;
        let err = client.push(&UserId("garbage".into()), "hi").await.unwrap_err();
        assert!(err.to_string().contains("malformed user id"));
    }

    #[tokio::test]
    async fn push_sends_to_valid_user() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/bot/message/push"))
            .and(body_partial_json(serde_json::json!({ "to": uid().0 })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        client.push(&uid(), "輪到您了").await.unwrap();
    }

    #[tokio::test]
    async fn non_success_reply_maps_to_channel_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/bot/message/reply"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad token"))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client.reply("rt-x", "hi").await.unwrap_err();
        assert!(matches!(err, PaydeskError::Channel { .. }));
    }

    #[tokio::test]
    async fn display_name_is_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/v2/bot/profile/{}", uid().0)))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "displayName": "小明" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        assert_eq!(client.display_name(&uid()).await, "小明");
        // Second call must be served from cache (expect(1) above enforces it).
        assert_eq!(client.display_name(&uid()).await, "小明");
    }

    #[tokio::test]
    async fn display_name_degrades_to_placeholder() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        assert_eq!(client.display_name(&uid()).await, "顧客");
    }
}
