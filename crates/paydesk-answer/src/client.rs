// SPDX-FileCopyrightText: 2026 Paydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP client for the generative answer backend.
//!
//! One request per admitted question: system instruction, optional matched
//! knowledge snippet as grounding, then the user text. The call carries a
//! hard timeout; the admission controller relies on this client never
//! outliving it.

use std::time::Duration;

use async_trait::async_trait;
use paydesk_core::{AnswerAdapter, PaydeskError};
use reqwest::header::{HeaderMap, HeaderValue};
use tracing::debug;

use crate::types::{ChatMessage, ChatRequest, ChatResponse};

/// Client for the chat-completion-style answer backend.
pub struct AnswerClient {
    http: reqwest::Client,
    api_url: String,
    model: String,
    system_prompt: String,
    timeout: Duration,
}

impl AnswerClient {
    pub fn new(
        api_url: String,
        api_key: Option<&str>,
        model: String,
        system_prompt: String,
        timeout: Duration,
    ) -> Result<Self, PaydeskError> {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        if let Some(key) = api_key {
            let auth = format!("Bearer {key}");
            headers.insert(
                "authorization",
                HeaderValue::from_str(&auth)
                    .map_err(|e| PaydeskError::Config(format!("invalid answer api key: {e}")))?,
            );
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| PaydeskError::Answer {
                message: format!("failed to build HTTP client: {e}"),
                source: Some(Box::new(e)),
            })?;

        Ok(Self {
            http,
            api_url,
            model,
            system_prompt,
            timeout,
        })
    }
}

#[async_trait]
impl AnswerAdapter for AnswerClient {
    async fn answer(
        &self,
        question: &str,
        grounding: Option<&str>,
    ) -> Result<String, PaydeskError> {
        let mut system = self.system_prompt.clone();
        if let Some(snippet) = grounding {
            system.push_str("\n\n參考資料：\n");
            system.push_str(snippet);
        }

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".into(),
                    content: system,
                },
                ChatMessage {
                    role: "user".into(),
                    content: question.to_string(),
                },
            ],
        };

        // Belt and braces: the reqwest client also carries this timeout, but
        // the outer bound covers body streaming after headers arrive.
        let send = async {
            let response = self
                .http
                .post(&self.api_url)
                .json(&request)
                .send()
                .await
                .map_err(|e| PaydeskError::Answer {
                    message: format!("HTTP request failed: {e}"),
                    source: Some(Box::new(e)),
                })?;

            let status = response.status();
            debug!(status = %status, "answer backend responded");
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(PaydeskError::Answer {
                    message: format!("backend returned {status}: {body}"),
                    source: None,
                });
            }

            response
                .json::<ChatResponse>()
                .await
                .map_err(|e| PaydeskError::Answer {
                    message: format!("malformed backend response: {e}"),
                    source: Some(Box::new(e)),
                })
        };

        let parsed = tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| PaydeskError::Timeout {
                duration: self.timeout,
            })??;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(PaydeskError::Answer {
                message: "backend returned an empty answer".into(),
                source: None,
            });
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(server: &MockServer, timeout: Duration) -> AnswerClient {
        AnswerClient::new(
            format!("{}/v1/chat/completions", server.uri()),
            Some("k"),
            "gpt-4o-mini".into(),
            "你是客服助理".into(),
            timeout,
        )
        .unwrap()
    }

    fn ok_body(text: &str) -> serde_json::Value {
        serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": text } }]
        })
    }

    #[tokio::test]
    async fn answer_returns_first_choice_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(serde_json::json!({ "model": "gpt-4o-mini" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body("滿千免運")))
            .mount(&server)
            .await;

        let client = client_for(&server, Duration::from_secs(8)).await;
        assert_eq!(client.answer("運費多少", None).await.unwrap(), "滿千免運");
    }

    #[tokio::test]
    async fn grounding_snippet_lands_in_system_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({
                "messages": [{ "role": "system" }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body("ok")))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, Duration::from_secs(8)).await;
        client.answer("怎麼取貨", Some("超商取貨或門市自取")).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        let system = body["messages"][0]["content"].as_str().unwrap();
        assert!(system.contains("超商取貨或門市自取"));
    }

    #[tokio::test]
    async fn non_success_maps_to_answer_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = client_for(&server, Duration::from_secs(8)).await;
        let err = client.answer("hi", None).await.unwrap_err();
        assert!(matches!(err, PaydeskError::Answer { .. }));
    }

    #[tokio::test]
    async fn slow_backend_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(ok_body("late"))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let client = client_for(&server, Duration::from_millis(100)).await;
        let err = client.answer("hi", None).await.unwrap_err();
        assert!(matches!(
            err,
            PaydeskError::Timeout { .. } | PaydeskError::Answer { .. }
        ));
    }

    #[tokio::test]
    async fn empty_answer_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body("  ")))
            .mount(&server)
            .await;

        let client = client_for(&server, Duration::from_secs(8)).await;
        assert!(client.answer("hi", None).await.is_err());
    }
}
