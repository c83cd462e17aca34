//! Azure Resource Manager REST client
//!
//! The provider only needs a handful of verbs against resource IDs, so the
//! client is a trait: production code uses [`HttpArmClient`], tests use an
//! in-memory fake.

use std::time::Duration;

use carina_core::convergence::FetchError;
use carina_core::provider::{BoxFuture, ProviderError};
use log::debug;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::Value as Json;
use thiserror::Error;

use crate::config::AzureProviderConfig;

/// Errors returned by ARM requests
#[derive(Debug, Error)]
pub enum ArmError {
    #[error("{0} was not found")]
    NotFound(String),

    #[error("request for {id} failed with HTTP {status} ({code}): {message}")]
    Status {
        id: String,
        status: u16,
        code: String,
        message: String,
    },

    #[error("request for {id} failed: {message}")]
    Transport { id: String, message: String },

    #[error("invalid response for {id}: {source}")]
    Decode {
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ArmError {
    /// Whether repeating the same request may succeed
    ///
    /// Throttling, conflicts with an operation still in flight, server errors
    /// and dropped connections are retryable. Malformed requests and
    /// authentication or authorization failures are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            ArmError::Status { status, .. } => {
                matches!(*status, 408 | 409 | 429) || (500..=599).contains(status)
            }
            ArmError::Transport { .. } => true,
            ArmError::NotFound(_) | ArmError::Decode { .. } => false,
        }
    }
}

impl From<ArmError> for FetchError {
    fn from(err: ArmError) -> Self {
        let fetch = if err.is_retryable() {
            FetchError::transient(err.to_string())
        } else {
            FetchError::fatal(err.to_string())
        };
        fetch.with_source(err)
    }
}

impl From<ArmError> for ProviderError {
    fn from(err: ArmError) -> Self {
        ProviderError::from_cause(err)
    }
}

pub type ArmResult<T> = Result<T, ArmError>;

/// Verbs the provider issues against ARM resource IDs
pub trait ArmClient: Send + Sync {
    /// GET a resource; `None` if it does not exist
    fn get(&self, id: &str, api_version: &str) -> BoxFuture<'_, ArmResult<Option<Json>>>;

    /// PUT a full resource body
    fn put(&self, id: &str, api_version: &str, body: Json) -> BoxFuture<'_, ArmResult<Json>>;

    /// PATCH a partial resource body
    fn patch(&self, id: &str, api_version: &str, body: Json) -> BoxFuture<'_, ArmResult<Json>>;

    /// DELETE a resource; deleting a missing resource succeeds
    fn delete(&self, id: &str, api_version: &str) -> BoxFuture<'_, ArmResult<()>>;

    /// POST an action (e.g. `scheduleRun`) on a resource
    fn post(
        &self,
        id: &str,
        action: &str,
        api_version: &str,
        body: Json,
    ) -> BoxFuture<'_, ArmResult<Option<Json>>>;
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// [`ArmClient`] over HTTPS with a bearer token
pub struct HttpArmClient {
    http: reqwest::Client,
    endpoint: String,
    access_token: String,
}

impl HttpArmClient {
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

    pub fn new(config: &AzureProviderConfig) -> ArmResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("carina-provider-azure/", env!("CARGO_PKG_VERSION")))
            .timeout(Self::REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ArmError::Transport {
                id: config.endpoint.clone(),
                message: e.to_string(),
            })?;

        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            access_token: config.access_token.clone(),
        })
    }

    fn url(&self, path: &str, api_version: &str) -> String {
        format!("{}{}?api-version={}", self.endpoint, path, api_version)
    }

    /// Send a request; 404 maps to `NotFound`, an empty body to `None`
    async fn send(
        &self,
        method: Method,
        path: String,
        api_version: String,
        body: Option<Json>,
    ) -> ArmResult<Option<Json>> {
        debug!("{} {} (api-version {})", method, path, api_version);

        let mut request = self
            .http
            .request(method, self.url(&path, &api_version))
            .bearer_auth(&self.access_token);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(|e| ArmError::Transport {
            id: path.clone(),
            message: e.to_string(),
        })?;
        let status = response.status();
        let text = response.text().await.map_err(|e| ArmError::Transport {
            id: path.clone(),
            message: e.to_string(),
        })?;

        if status == StatusCode::NOT_FOUND {
            return Err(ArmError::NotFound(path));
        }
        if !status.is_success() {
            let (code, message) = match serde_json::from_str::<ErrorEnvelope>(&text) {
                Ok(envelope) => (envelope.error.code, envelope.error.message),
                Err(_) => (
                    status.canonical_reason().unwrap_or("Unknown").to_string(),
                    text,
                ),
            };
            return Err(ArmError::Status {
                id: path,
                status: status.as_u16(),
                code,
                message,
            });
        }

        if text.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|source| ArmError::Decode { id: path, source })
    }
}

impl ArmClient for HttpArmClient {
    fn get(&self, id: &str, api_version: &str) -> BoxFuture<'_, ArmResult<Option<Json>>> {
        let (id, api_version) = (id.to_string(), api_version.to_string());
        Box::pin(async move {
            match self.send(Method::GET, id, api_version, None).await {
                Err(ArmError::NotFound(_)) => Ok(None),
                other => other,
            }
        })
    }

    fn put(&self, id: &str, api_version: &str, body: Json) -> BoxFuture<'_, ArmResult<Json>> {
        let (id, api_version) = (id.to_string(), api_version.to_string());
        Box::pin(async move {
            self.send(Method::PUT, id, api_version, Some(body))
                .await
                .map(|response| response.unwrap_or(Json::Null))
        })
    }

    fn patch(&self, id: &str, api_version: &str, body: Json) -> BoxFuture<'_, ArmResult<Json>> {
        let (id, api_version) = (id.to_string(), api_version.to_string());
        Box::pin(async move {
            self.send(Method::PATCH, id, api_version, Some(body))
                .await
                .map(|response| response.unwrap_or(Json::Null))
        })
    }

    fn delete(&self, id: &str, api_version: &str) -> BoxFuture<'_, ArmResult<()>> {
        let (id, api_version) = (id.to_string(), api_version.to_string());
        Box::pin(async move {
            match self.send(Method::DELETE, id, api_version, None).await {
                Ok(_) | Err(ArmError::NotFound(_)) => Ok(()),
                Err(e) => Err(e),
            }
        })
    }

    fn post(
        &self,
        id: &str,
        action: &str,
        api_version: &str,
        body: Json,
    ) -> BoxFuture<'_, ArmResult<Option<Json>>> {
        let path = format!("{}/{}", id, action);
        let api_version = api_version.to_string();
        Box::pin(async move { self.send(Method::POST, path, api_version, Some(body)).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> ArmError {
        ArmError::Status {
            id: "/subscriptions/0000".to_string(),
            status: code,
            code: "Code".to_string(),
            message: "message".to_string(),
        }
    }

    #[test]
    fn classifies_retryable_statuses() {
        for code in [408, 409, 429, 500, 502, 503] {
            assert!(status(code).is_retryable(), "{} should be retryable", code);
        }
        for code in [400, 401, 403, 422] {
            assert!(!status(code).is_retryable(), "{} should be fatal", code);
        }
        assert!(
            ArmError::Transport {
                id: "x".to_string(),
                message: "connection reset".to_string()
            }
            .is_retryable()
        );
    }

    #[test]
    fn fetch_error_keeps_classification() {
        let transient: FetchError = status(503).into();
        assert!(transient.is_retryable());
        assert!(transient.to_string().contains("HTTP 503"));

        let fatal: FetchError = status(403).into();
        assert!(!fatal.is_retryable());
    }

    #[test]
    fn parses_error_envelope() {
        let envelope: ErrorEnvelope = serde_json::from_str(
            r#"{"error":{"code":"AuthorizationFailed","message":"no access"}}"#,
        )
        .unwrap();
        assert_eq!(envelope.error.code, "AuthorizationFailed");
        assert_eq!(envelope.error.message, "no access");
    }

    #[test]
    fn builds_urls_against_endpoint() {
        let config = AzureProviderConfig::for_tests("0000");
        let client = HttpArmClient::new(&config).unwrap();
        assert_eq!(
            client.url("/subscriptions/0000/resourceGroups/rg", "2021-04-01"),
            "https://management.azure.com/subscriptions/0000/resourceGroups/rg?api-version=2021-04-01"
        );
    }
}
