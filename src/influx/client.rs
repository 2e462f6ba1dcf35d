//! Thin client for the InfluxDB v2 HTTP API
//!
//! Two endpoints are enough for this service: the Flux query API
//! (annotated-CSV response) and the line-protocol write API. Both are
//! plain HTTP; the caller owns query construction and response parsing.

use crate::config::InfluxCommonConfig;
use std::fmt;
use std::time::Duration;

#[derive(Debug)]
pub enum InfluxError {
    Http(reqwest::Error),
    /// The server answered with a non-success status.
    Api { status: u16, body: String },
    Csv(String),
}

impl From<reqwest::Error> for InfluxError {
    fn from(err: reqwest::Error) -> Self {
        InfluxError::Http(err)
    }
}

impl fmt::Display for InfluxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InfluxError::Http(e) => write!(f, "HTTP error: {}", e),
            InfluxError::Api { status, body } => write!(f, "API error {}: {}", status, body),
            InfluxError::Csv(msg) => write!(f, "CSV error: {}", msg),
        }
    }
}

impl std::error::Error for InfluxError {}

#[derive(Clone)]
pub struct InfluxClient {
    http: reqwest::Client,
    url: String,
    org: String,
    token: String,
}

impl InfluxClient {
    pub fn new(cfg: &InfluxCommonConfig) -> Result<Self, InfluxError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            http,
            url: cfg.url.trim_end_matches('/').to_string(),
            org: cfg.org.clone(),
            token: cfg.token.clone(),
        })
    }

    /// Run a Flux query, returning the raw annotated-CSV body.
    pub async fn query_raw(&self, flux: &str) -> Result<String, InfluxError> {
        let endpoint = format!("{}/api/v2/query", self.url);

        let response = self
            .http
            .post(&endpoint)
            .query(&[("org", self.org.as_str())])
            .header("Authorization", format!("Token {}", self.token))
            .header("Content-Type", "application/vnd.flux")
            .header("Accept", "application/csv")
            .body(flux.to_string())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(InfluxError::Api {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        Ok(response.text().await?)
    }

    /// Write a line-protocol batch (second precision) into `bucket`.
    pub async fn write_lines(&self, bucket: &str, lines: String) -> Result<(), InfluxError> {
        let endpoint = format!("{}/api/v2/write", self.url);

        let response = self
            .http
            .post(&endpoint)
            .query(&[
                ("org", self.org.as_str()),
                ("bucket", bucket),
                ("precision", "s"),
            ])
            .header("Authorization", format!("Token {}", self.token))
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(lines)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(InfluxError::Api {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        Ok(())
    }
}
