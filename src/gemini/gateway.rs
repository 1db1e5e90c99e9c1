//! Model proxy gateway
//!
//! Sends assembled requests to the remote proxy with bounded, flat-backoff
//! retries. Uses a long-lived reqwest::Client for connection pooling.

use crate::config::{GatewayConfig, RetryPolicy};
use crate::gemini::response::{extract_text_from_bytes, ProxyArgs, ProxyEnvelope};
use crate::models::ModelRequest;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

/// Why a single attempt may be worth repeating
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RetryableFailure {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("proxy returned status {status}: {body}")]
    Server { status: u16, body: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("model proxy URL is not configured (set GAS_PROXY_URL)")]
    NotConfigured,

    #[error("proxy rejected the request with status {status}: {body}")]
    Client { status: u16, body: String },

    #[error("request to the proxy failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: RetryableFailure,
    },

    #[error("no response from the model after all retries")]
    NoResponse,
}

impl GatewayError {
    /// Text shown to the end user in place of an answer
    pub fn user_message(&self) -> String {
        format!("⚠️ Error: {}", self)
    }
}

enum AttemptError {
    Retryable(RetryableFailure),
    Fatal(GatewayError),
}

/// Reusable proxy gateway (connection-pooled)
pub struct ModelGateway {
    client: Client,
    config: GatewayConfig,
}

impl ModelGateway {
    pub fn new(config: GatewayConfig) -> crate::Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .build()?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Send a request, retrying transient failures.
    ///
    /// Timeouts, transport errors and 5xx replies are retried after a flat
    /// backoff until the attempt budget is spent. 4xx replies fail at once.
    pub async fn send(&self, request: &ModelRequest) -> Result<String, GatewayError> {
        let url = self
            .config
            .proxy_url
            .as_deref()
            .ok_or(GatewayError::NotConfigured)?;

        let envelope = ProxyEnvelope {
            model: &self.config.model,
            args: ProxyArgs {
                contents: &request.contents,
            },
        };

        let policy = &self.config.retry;

        for attempt in 1..=policy.max_attempts {
            info!(
                attempt,
                max_attempts = policy.max_attempts,
                turns = request.contents.len(),
                "Calling model proxy"
            );

            match self.attempt(url, &envelope, policy).await {
                Ok(text) => {
                    info!(attempt, bytes = text.len(), "Model proxy response received");
                    return Ok(text);
                }
                Err(AttemptError::Fatal(e)) => {
                    error!("Model proxy rejected request: {}", e);
                    return Err(e);
                }
                Err(AttemptError::Retryable(failure)) if attempt < policy.max_attempts => {
                    warn!(
                        attempt,
                        backoff_ms = policy.backoff.as_millis() as u64,
                        "Model proxy attempt failed, retrying: {}",
                        failure
                    );
                    tokio::time::sleep(policy.backoff).await;
                }
                Err(AttemptError::Retryable(failure)) => {
                    error!(attempt, "Model proxy attempts exhausted: {}", failure);
                    return Err(GatewayError::RetriesExhausted {
                        attempts: policy.max_attempts,
                        last: failure,
                    });
                }
            }
        }

        Err(GatewayError::NoResponse)
    }

    /// Like [`send`](Self::send), with failures rendered as user-facing text
    pub async fn ask(&self, request: &ModelRequest) -> String {
        match self.send(request).await {
            Ok(text) => text,
            Err(e) => e.user_message(),
        }
    }

    async fn attempt(
        &self,
        url: &str,
        envelope: &ProxyEnvelope<'_>,
        policy: &RetryPolicy,
    ) -> Result<String, AttemptError> {
        let response = self
            .client
            .post(url)
            .timeout(policy.timeout)
            .json(envelope)
            .send()
            .await
            .map_err(|e| AttemptError::Retryable(classify_transport(e, policy.timeout)))?;

        let status = response.status();

        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(AttemptError::Retryable(RetryableFailure::Server {
                status: status.as_u16(),
                body,
            }));
        }

        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(AttemptError::Fatal(GatewayError::Client {
                status: status.as_u16(),
                body,
            }));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| AttemptError::Retryable(classify_transport(e, policy.timeout)))?;

        Ok(extract_text_from_bytes(&bytes))
    }
}

fn classify_transport(error: reqwest::Error, timeout: Duration) -> RetryableFailure {
    if error.is_timeout() {
        RetryableFailure::Timeout(timeout)
    } else {
        RetryableFailure::Transport(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gemini::RequestBuilder;
    use serde_json::json;
    use tokio::time::Instant;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gateway_for(server: &MockServer, timeout: Duration, backoff: Duration) -> ModelGateway {
        let config = GatewayConfig {
            proxy_url: Some(format!("{}/exec", server.uri())),
            retry: RetryPolicy {
                max_attempts: 3,
                timeout,
                backoff,
            },
            ..GatewayConfig::default()
        };
        ModelGateway::new(config).unwrap()
    }

    fn answer(text: &str) -> serde_json::Value {
        json!({"candidates": [{"content": {"parts": [{"text": text}]}}]})
    }

    fn request() -> ModelRequest {
        RequestBuilder::new("be brief").build("hi", &[], None)
    }

    #[tokio::test]
    async fn test_success_returns_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/exec"))
            .and(body_partial_json(json!({"model": "gemini-2.5-flash"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(answer("hola")))
            .expect(1)
            .mount(&server)
            .await;

        let gateway = gateway_for(&server, Duration::from_secs(5), Duration::from_millis(10));
        let result = gateway.send(&request()).await;

        assert_eq!(result, Ok("hola".to_string()));
        server.verify().await;
    }

    #[tokio::test]
    async fn test_envelope_carries_contents() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "args": {"contents": [
                    {"role": "user", "parts": [{"text": "be brief"}]},
                    {"role": "user", "parts": [{"text": "hi"}]}
                ]}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(answer("ok")))
            .expect(1)
            .mount(&server)
            .await;

        let gateway = gateway_for(&server, Duration::from_secs(5), Duration::from_millis(10));
        assert_eq!(gateway.send(&request()).await, Ok("ok".to_string()));
    }

    #[tokio::test]
    async fn test_server_errors_are_retried_until_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(answer("recovered")))
            .expect(1)
            .mount(&server)
            .await;

        let gateway = gateway_for(&server, Duration::from_secs(5), Duration::from_millis(10));
        let result = gateway.send(&request()).await;

        assert_eq!(result, Ok("recovered".to_string()));
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
        server.verify().await;
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
            .mount(&server)
            .await;

        let gateway = gateway_for(&server, Duration::from_secs(5), Duration::from_millis(10));
        let result = gateway.send(&request()).await;

        assert_eq!(
            result,
            Err(GatewayError::Client {
                status: 400,
                body: "bad request".to_string()
            })
        );
        assert_eq!(server.received_requests().await.unwrap().len(), 1);

        let rendered = gateway.ask(&request()).await;
        assert!(rendered.contains("400"));
    }

    #[tokio::test]
    async fn test_timeouts_exhaust_retries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(answer("too late"))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let backoff = Duration::from_millis(100);
        let gateway = gateway_for(&server, Duration::from_millis(100), backoff);

        let started = Instant::now();
        let result = gateway.send(&request()).await;
        let elapsed = started.elapsed();

        let error = result.unwrap_err();
        assert!(matches!(
            error,
            GatewayError::RetriesExhausted {
                attempts: 3,
                last: RetryableFailure::Timeout(_)
            }
        ));
        assert!(error.to_string().contains("3 attempts"));
        assert!(gateway.ask(&request()).await.contains("3 attempts"));

        // Three timeouts plus a backoff between each pair of attempts
        assert!(elapsed >= backoff * 2 + Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_persistent_server_error_exhausts_retries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("upstream down"))
            .expect(3)
            .mount(&server)
            .await;

        let gateway = gateway_for(&server, Duration::from_secs(5), Duration::from_millis(10));
        let result = gateway.send(&request()).await;

        assert_eq!(
            result,
            Err(GatewayError::RetriesExhausted {
                attempts: 3,
                last: RetryableFailure::Server {
                    status: 502,
                    body: "upstream down".to_string()
                }
            })
        );
        server.verify().await;
    }

    #[tokio::test]
    async fn test_connection_refused_is_retried() {
        // Bind then release a port so nothing is listening on it
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = GatewayConfig {
            proxy_url: Some(format!("http://{}/exec", addr)),
            retry: RetryPolicy {
                max_attempts: 3,
                timeout: Duration::from_secs(1),
                backoff: Duration::from_millis(5),
            },
            ..GatewayConfig::default()
        };
        let gateway = ModelGateway::new(config).unwrap();

        let error = gateway.send(&request()).await.unwrap_err();
        assert!(matches!(
            error,
            GatewayError::RetriesExhausted { attempts: 3, .. }
        ));
    }

    #[tokio::test]
    async fn test_malformed_body_yields_placeholder() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .expect(1)
            .mount(&server)
            .await;

        let gateway = gateway_for(&server, Duration::from_secs(5), Duration::from_millis(10));
        let text = gateway.send(&request()).await.unwrap();

        assert_eq!(text, crate::gemini::response::EMPTY_REPLY_PLACEHOLDER);
    }

    #[tokio::test]
    async fn test_zero_attempt_budget_yields_no_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(answer("unused")))
            .mount(&server)
            .await;

        let config = GatewayConfig {
            proxy_url: Some(server.uri()),
            retry: RetryPolicy {
                max_attempts: 0,
                ..RetryPolicy::default()
            },
            ..GatewayConfig::default()
        };
        let gateway = ModelGateway::new(config).unwrap();

        assert_eq!(gateway.send(&request()).await, Err(GatewayError::NoResponse));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_proxy_url() {
        let gateway = ModelGateway::new(GatewayConfig::default()).unwrap();
        let result = gateway.send(&request()).await;

        assert_eq!(result, Err(GatewayError::NotConfigured));
        assert!(gateway.ask(&request()).await.contains("GAS_PROXY_URL"));
    }
}
