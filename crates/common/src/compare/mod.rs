//! AI comparison client abstraction
//!
//! The comparison itself runs in an external service that receives two texts
//! and answers with a summary, a list of differences and a similarity score.

use crate::config::ComparisonConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoffBuilder;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// One difference reported between the two texts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Difference {
    /// e.g. "added", "removed", "changed"
    pub kind: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonOutcome {
    pub summary: String,
    #[serde(default)]
    pub differences: Vec<Difference>,
    /// Similarity in [0, 1]
    pub score: f64,
}

/// Trait for text comparison
#[async_trait]
pub trait Comparator: Send + Sync {
    async fn compare(&self, text1: &str, text2: &str) -> Result<ComparisonOutcome>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// JSON-over-HTTP comparison client
pub struct HttpComparator {
    client: reqwest::Client,
    api_base: String,
    api_key: Option<String>,
    model: String,
    timeout: Duration,
    max_retries: u32,
}

#[derive(Serialize)]
struct CompareRequest<'a> {
    model: &'a str,
    document1: &'a str,
    document2: &'a str,
}

impl HttpComparator {
    pub fn new(config: &ComparisonConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            max_retries: config.max_retries,
        })
    }

    async fn make_request(&self, request: &CompareRequest<'_>) -> Result<ComparisonOutcome> {
        let url = format!("{}/compare", self.api_base);

        let mut builder = self.client.post(&url).timeout(self.timeout).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| self.map_transport(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ComparisonFailed {
                message: format!("API error {}: {}", status, body),
            });
        }

        let outcome: ComparisonOutcome = response.json().await.map_err(|e| self.map_transport(e))?;

        if !(0.0..=1.0).contains(&outcome.score) {
            return Err(AppError::ComparisonFailed {
                message: format!("score {} is outside [0, 1]", outcome.score),
            });
        }

        Ok(outcome)
    }

    fn map_transport(&self, err: reqwest::Error) -> AppError {
        if err.is_timeout() {
            AppError::ComparisonTimeout {
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else {
            AppError::HttpClient(err)
        }
    }
}

/// Timeouts, transport failures and 5xx/429 answers are worth another try
fn is_transient(err: &AppError) -> bool {
    match err {
        AppError::ComparisonTimeout { .. } => true,
        AppError::HttpClient(e) => e.is_connect() || e.is_request() || e.is_timeout(),
        AppError::ComparisonFailed { message } => {
            message.starts_with("API error 5") || message.starts_with("API error 429")
        }
        _ => false,
    }
}

#[async_trait]
impl Comparator for HttpComparator {
    async fn compare(&self, text1: &str, text2: &str) -> Result<ComparisonOutcome> {
        let request = CompareRequest {
            model: &self.model,
            document1: text1,
            document2: text2,
        };
        let request = &request;

        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(200))
            .with_max_interval(Duration::from_secs(5))
            .with_max_elapsed_time(None)
            .build();

        let mut attempt = 0u32;
        retry(policy, || {
            attempt += 1;
            let current = attempt;
            async move {
                match self.make_request(request).await {
                    Ok(outcome) => Ok(outcome),
                    Err(e) if current <= self.max_retries && is_transient(&e) => {
                        warn!(
                            attempt = current,
                            max_retries = self.max_retries,
                            error = %e,
                            "Comparison request failed, retrying"
                        );
                        Err(backoff::Error::transient(e))
                    }
                    Err(e) => Err(backoff::Error::permanent(e)),
                }
            }
        })
        .await
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_parses_without_differences() {
        let outcome: ComparisonOutcome =
            serde_json::from_str(r#"{"summary": "identical", "score": 1.0}"#).unwrap();
        assert!(outcome.differences.is_empty());
        assert_eq!(outcome.summary, "identical");
    }

    #[test]
    fn test_transient_classification() {
        assert!(is_transient(&AppError::ComparisonTimeout { timeout_ms: 10 }));
        assert!(is_transient(&AppError::ComparisonFailed {
            message: "API error 503 Service Unavailable: busy".into()
        }));
        assert!(!is_transient(&AppError::ComparisonFailed {
            message: "API error 400 Bad Request: too long".into()
        }));
        assert!(!is_transient(&AppError::validation("bad", None)));
    }

    #[tokio::test]
    async fn test_unreachable_service_surfaces_error() {
        let config = ComparisonConfig {
            api_base: "http://127.0.0.1:1/v1/".into(),
            api_key: Some("test-key".into()),
            model: "test-model".into(),
            timeout_secs: 2,
            max_retries: 0,
        };
        let comparator = HttpComparator::new(&config).unwrap();
        assert_eq!(comparator.model_name(), "test-model");
        assert!(comparator.compare("a", "b").await.is_err());
    }
}
