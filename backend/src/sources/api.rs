//! Remote-API adapter: HTTP GET returning a non-empty JSON array of objects.
//!
//! A bare object is rejected rather than wrapped into a one-element array.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use super::{ParsedSource, SourceAdapter};
use crate::error::{SourceError, SourceResult};
use crate::models::{Row, SourceKind};

/// Default request timeout.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(15);

/// Adapter for a remote JSON endpoint.
#[derive(Debug, Clone)]
pub struct ApiAdapter {
    client: reqwest::Client,
    url: String,
}

impl ApiAdapter {
    /// Adapter with its own client and the default timeout.
    pub fn new(url: impl Into<String>) -> SourceResult<Self> {
        let client = build_client(DEFAULT_FETCH_TIMEOUT)?;
        Ok(Self::with_client(client, url))
    }

    /// Adapter sharing an existing client.
    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn fetch(&self) -> SourceResult<Value> {
        tracing::debug!(url = %self.url, "fetching api source");

        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| SourceError::Fetch(format!("Request to {} failed: {}", self.url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Fetch(format!("{} answered HTTP {}", self.url, status)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| SourceError::Fetch(format!("Cannot read response body: {}", e)))?;

        serde_json::from_str(&body)
            .map_err(|e| SourceError::Schema(format!("Response is not valid JSON: {}", e)))
    }
}

/// HTTP client with a bounded request timeout.
pub fn build_client(timeout: Duration) -> SourceResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| SourceError::Fetch(format!("Cannot build HTTP client: {}", e)))
}

/// Only absolute http(s) URLs are fetched.
pub fn validate_url(url: &str) -> SourceResult<()> {
    let parsed = reqwest::Url::parse(url.trim())
        .map_err(|e| SourceError::Validation(format!("Invalid API URL '{}': {}", url, e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(SourceError::Validation(format!(
            "Unsupported URL scheme '{}', expected http or https",
            scheme
        ))),
    }
}

/// Turn a decoded payload into rows.
pub fn rows_from_payload(payload: Value) -> SourceResult<Vec<Row>> {
    let items = match payload {
        Value::Array(items) => items,
        Value::Object(_) => {
            return Err(SourceError::Schema(
                "API returned a single object; expected an array of objects".to_string(),
            ))
        }
        other => {
            return Err(SourceError::Schema(format!(
                "API returned {}; expected an array of objects",
                json_type(&other)
            )))
        }
    };

    if items.is_empty() {
        return Err(SourceError::Schema("API returned an empty array".to_string()));
    }

    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| match item {
            Value::Object(row) => Ok(row),
            other => Err(SourceError::Schema(format!(
                "Element {} is {}, expected an object",
                i,
                json_type(&other)
            ))),
        })
        .collect()
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[async_trait]
impl SourceAdapter for ApiAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Api
    }

    async fn parse(&self) -> SourceResult<ParsedSource> {
        validate_url(&self.url)?;
        let payload = self.fetch().await?;
        let rows = rows_from_payload(payload)?;
        Ok(ParsedSource {
            kind: SourceKind::Api,
            declared_fields: Vec::new(),
            rows,
        })
    }
}
