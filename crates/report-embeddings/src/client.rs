//! HTTP client for the remote embedding service.
//!
//! `POST {base}{embed_path}` with `{"text": ...}` returns
//! `{"vector": [...], "dim": n}`; `GET {base}{ready_path}` answers 2xx once
//! the model is loaded.

use std::time::Duration;

use async_trait::async_trait;
use backoff::{backoff::Backoff, ExponentialBackoff};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use report_types::EmbeddingSettings;

use crate::error::EmbeddingError;

/// Converts report text into an embedding vector.
///
/// Implementations surface failures to the caller; retrying is the caller's
/// concern.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Embed one text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Probe readiness once.
    async fn ready(&self) -> Result<(), EmbeddingError>;
}

/// Configuration for the remote client.
#[derive(Debug, Clone)]
pub struct RemoteEmbeddingConfig {
    /// Base URI (e.g., "http://model:8000")
    pub base_url: String,
    pub embed_path: String,
    pub ready_path: String,
    /// Timeout of each HTTP request
    pub request_timeout: Duration,
    /// Total time `wait_until_ready` keeps probing
    pub ready_timeout: Duration,
    /// Delay before the first probe
    pub ready_initial_delay: Duration,
    /// First interval between probes
    pub ready_poll_interval: Duration,
}

impl RemoteEmbeddingConfig {
    /// Config with default paths and timeouts for `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        let defaults = EmbeddingSettings::default();
        Self {
            base_url: base_url.into(),
            embed_path: defaults.embed_path,
            ready_path: defaults.ready_path,
            request_timeout: Duration::from_secs(defaults.request_timeout_secs),
            ready_timeout: Duration::from_secs(defaults.ready_timeout_secs),
            ready_initial_delay: Duration::from_secs(defaults.ready_initial_delay_secs),
            ready_poll_interval: Duration::from_millis(defaults.ready_poll_interval_ms),
        }
    }

    /// Build from settings. Fails when no base URL is configured.
    pub fn from_settings(settings: &EmbeddingSettings) -> Result<Self, EmbeddingError> {
        let base_url = settings.require_base_url()?;
        settings.validate().map_err(EmbeddingError::Config)?;
        Ok(Self {
            base_url: base_url.to_string(),
            embed_path: settings.embed_path.clone(),
            ready_path: settings.ready_path.clone(),
            request_timeout: settings.request_timeout(),
            ready_timeout: settings.ready_timeout(),
            ready_initial_delay: Duration::from_secs(settings.ready_initial_delay_secs),
            ready_poll_interval: Duration::from_millis(settings.ready_poll_interval_ms),
        })
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    vector: Vec<f32>,
    #[serde(default)]
    dim: Option<usize>,
}

/// Client for the remote inference service.
pub struct RemoteEmbeddingClient {
    client: Client,
    config: RemoteEmbeddingConfig,
}

impl RemoteEmbeddingClient {
    /// Create a new client.
    pub fn new(config: RemoteEmbeddingConfig) -> Result<Self, EmbeddingError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| EmbeddingError::Config(e.to_string()))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &RemoteEmbeddingConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Probe readiness until it succeeds or the readiness timeout elapses.
    pub async fn wait_until_ready(&self) -> Result<(), EmbeddingError> {
        if !self.config.ready_initial_delay.is_zero() {
            debug!(
                delay_ms = self.config.ready_initial_delay.as_millis(),
                "Waiting before first readiness probe"
            );
            tokio::time::sleep(self.config.ready_initial_delay).await;
        }

        let mut backoff = ExponentialBackoff {
            initial_interval: self.config.ready_poll_interval,
            max_interval: self.config.ready_poll_interval * 10,
            max_elapsed_time: Some(self.config.ready_timeout),
            ..Default::default()
        };
        backoff.reset();

        let mut probes = 0u32;
        loop {
            probes += 1;
            info!(probe = probes, url = %self.url(&self.config.ready_path), "Checking if embedding service is ready");

            match self.ready().await {
                Ok(()) => {
                    info!(probes, "Embedding service is ready");
                    return Ok(());
                }
                Err(e) => match backoff.next_backoff() {
                    Some(duration) => {
                        info!(
                            error = %e,
                            retry_in_ms = duration.as_millis(),
                            "Embedding service not ready yet"
                        );
                        tokio::time::sleep(duration).await;
                    }
                    None => {
                        warn!(error = %e, probes, "Embedding service readiness timed out");
                        return Err(EmbeddingError::NotReady(format!(
                            "not ready within {:?}: {}",
                            self.config.ready_timeout, e
                        )));
                    }
                },
            }
        }
    }
}

#[async_trait]
impl EmbeddingService for RemoteEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let url = self.url(&self.config.embed_path);
        debug!(url = %url, text_len = text.len(), "Posting to embedding service");

        let response = self
            .client
            .post(&url)
            .json(&EmbedRequest { text })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: EmbedResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::Decode(e.to_string()))?;

        if let Some(dim) = body.dim {
            if dim != body.vector.len() {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: dim,
                    actual: body.vector.len(),
                });
            }
        }
        debug!(dim = body.vector.len(), "Embedding generated");
        Ok(body.vector)
    }

    async fn ready(&self) -> Result<(), EmbeddingError> {
        let response = self
            .client
            .get(self.url(&self.config.ready_path))
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(EmbeddingError::Status {
                status: status.as_u16(),
                body,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(server: &MockServer) -> RemoteEmbeddingConfig {
        RemoteEmbeddingConfig {
            request_timeout: Duration::from_secs(2),
            ready_timeout: Duration::from_millis(400),
            ready_initial_delay: Duration::ZERO,
            ready_poll_interval: Duration::from_millis(20),
            ..RemoteEmbeddingConfig::new(server.uri())
        }
    }

    #[tokio::test]
    async fn test_embed_posts_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embed"))
            .and(body_json(json!({"text": "No acute findings."})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"vector": [0.5, -1.0, 2.0], "dim": 3})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = RemoteEmbeddingClient::new(test_config(&server)).unwrap();
        let vector = client.embed("No acute findings.").await.unwrap();
        assert_eq!(vector, vec![0.5, -1.0, 2.0]);
    }

    #[tokio::test]
    async fn test_embed_custom_path() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/latents"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"vector": [1.0]})))
            .mount(&server)
            .await;

        let config = RemoteEmbeddingConfig {
            embed_path: "/latents".to_string(),
            ..test_config(&server)
        };
        let client = RemoteEmbeddingClient::new(config).unwrap();
        assert_eq!(client.embed("x").await.unwrap(), vec![1.0]);
    }

    #[tokio::test]
    async fn test_embed_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("model crashed"))
            .mount(&server)
            .await;

        let client = RemoteEmbeddingClient::new(test_config(&server)).unwrap();
        match client.embed("x").await {
            Err(EmbeddingError::Status { status, body }) => {
                assert_eq!(status, 500);
                assert_eq!(body, "model crashed");
            }
            other => panic!("expected status error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_embed_undecodable_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let client = RemoteEmbeddingClient::new(test_config(&server)).unwrap();
        assert!(matches!(
            client.embed("x").await,
            Err(EmbeddingError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_embed_dimension_mismatch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"vector": [1.0], "dim": 4})))
            .mount(&server)
            .await;

        let client = RemoteEmbeddingClient::new(test_config(&server)).unwrap();
        assert!(matches!(
            client.embed("x").await,
            Err(EmbeddingError::DimensionMismatch { expected: 4, actual: 1 })
        ));
    }

    #[tokio::test]
    async fn test_wait_until_ready_after_failures() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ready"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/ready"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let config = RemoteEmbeddingConfig {
            ready_timeout: Duration::from_secs(5),
            ..test_config(&server)
        };
        let client = RemoteEmbeddingClient::new(config).unwrap();
        client.wait_until_ready().await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_until_ready_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ready"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = RemoteEmbeddingClient::new(test_config(&server)).unwrap();
        assert!(matches!(
            client.wait_until_ready().await,
            Err(EmbeddingError::NotReady(_))
        ));
    }

    #[test]
    fn test_from_settings_requires_base_url() {
        let settings = EmbeddingSettings::default();
        assert!(matches!(
            RemoteEmbeddingConfig::from_settings(&settings),
            Err(EmbeddingError::Config(_))
        ));

        let settings = EmbeddingSettings {
            base_url: Some("http://model:8000/".to_string()),
            ready_path: "/.well-known/ready".to_string(),
            ..EmbeddingSettings::default()
        };
        let config = RemoteEmbeddingConfig::from_settings(&settings).unwrap();
        let client = RemoteEmbeddingClient::new(config).unwrap();
        assert_eq!(client.url("/.well-known/ready"), "http://model:8000/.well-known/ready");
    }

    #[test]
    fn test_config_errors_are_not_retryable() {
        assert!(!EmbeddingError::Config("x".into()).is_retryable());
        assert!(EmbeddingError::Http("x".into()).is_retryable());
        assert!(EmbeddingError::Status { status: 503, body: String::new() }.is_retryable());
    }
}
