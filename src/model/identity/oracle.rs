use std::time::Duration;

use data_encoding::BASE64;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure to obtain a similarity score from the oracle.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("oracle responded with status {0}")]
    Status(StatusCode),
}

/// The external image-similarity oracle.
///
/// Given a reference and a freshly captured image, returns a similarity
/// score that should lie in `[0, 100]`. Interpreting the score is the
/// caller's job.
#[rocket::async_trait]
pub trait SimilarityOracle: Send + Sync {
    async fn similarity(&self, reference: &[u8], captured: &[u8]) -> Result<f64, OracleError>;
}

#[derive(Serialize)]
struct CompareRequest {
    reference: String,
    captured: String,
}

#[derive(Deserialize)]
struct CompareResponse {
    similarity: f64,
}

/// An oracle reached over HTTP: images are POSTed base64-encoded as JSON,
/// and the response carries `{"similarity": <score>}`.
pub struct HttpOracle {
    client: Client,
    url: String,
}

impl HttpOracle {
    /// Build an oracle client. The timeout bounds the whole request.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, OracleError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[rocket::async_trait]
impl SimilarityOracle for HttpOracle {
    async fn similarity(&self, reference: &[u8], captured: &[u8]) -> Result<f64, OracleError> {
        let body = CompareRequest {
            reference: BASE64.encode(reference),
            captured: BASE64.encode(captured),
        };
        let response = self.client.post(&self.url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(OracleError::Status(status));
        }
        let result: CompareResponse = response.json().await?;
        trace!("Oracle at {} returned similarity {}", self.url, result.similarity);
        Ok(result.similarity)
    }
}
