//! Common utilities for the Proxmox API client
//!
//! Provides the authenticated HTTP wrapper shared by every endpoint and
//! the translation of Proxmox error responses into `SdnError`.

use crate::error::SdnError;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Every Proxmox API response wraps its payload in `{"data": ...}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataEnvelope<T> {
    pub data: T,
}

/// Provider phrases that mark a creation as rejected because the object
/// (or a zone-scoped object with the same id) is already present.
const ALREADY_EXISTS_MARKERS: &[&str] = &["already defined", "already exists"];

/// HTTP client wrapper with API token authentication
pub struct HttpClient {
    client: Client,
    base_url: String,
    auth_header: String,
}

impl HttpClient {
    /// Create a new HTTP client wrapper
    ///
    /// `auth_header` is the full `Authorization` header value.
    pub fn new(client: Client, base_url: String, auth_header: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_header,
        }
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build a full URL from a path
    pub fn build_url(&self, path: &str) -> String {
        if path.starts_with("http") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }

    /// Make a GET request and unwrap the data envelope
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, SdnError> {
        self.send(Method::GET, path, None).await
    }

    /// Make a POST request and unwrap the data envelope
    pub async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, SdnError> {
        self.send(Method::POST, path, Some(body)).await
    }

    /// Make a PUT request and unwrap the data envelope
    pub async fn put<T: DeserializeOwned>(
        &self,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<T, SdnError> {
        self.send(Method::PUT, path, body).await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<T, SdnError> {
        let url = self.build_url(path);
        match body {
            Some(b) => debug!("{} {} with body: {}", method, url, b),
            None => debug!("{} {}", method, url),
        }

        let mut request = self
            .client
            .request(method.clone(), &url)
            .header("Authorization", &self.auth_header)
            .header("Accept", "application/json");
        if let Some(b) = body {
            request = request.json(b);
        }

        let response = request.send().await.map_err(SdnError::Http)?;
        let status = response.status();
        let response_text = response.text().await?;

        if !status.is_success() {
            return Err(Self::classify_error(&method, path, status, &response_text));
        }

        let envelope: DataEnvelope<T> = serde_json::from_str(&response_text).map_err(|e| {
            SdnError::InvalidResponse(format!(
                "error decoding {} {} response: {} - Response (first 500 chars): {}",
                method,
                path,
                e,
                response_text.chars().take(500).collect::<String>()
            ))
        })?;
        Ok(envelope.data)
    }

    /// Map a non-success response to the matching error variant.
    ///
    /// Proxmox reports duplicate SDN ids with a 500 and a message in the body
    /// (either top-level `message` or per-parameter `errors`), so the body is
    /// inspected once here and callers only ever branch on the variant.
    pub fn classify_error(method: &Method, path: &str, status: StatusCode, body: &str) -> SdnError {
        let message = format!("{} {} failed: {} - {}", method, path, status, body);

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return SdnError::Authentication(message);
        }
        if status == StatusCode::NOT_FOUND {
            return SdnError::NotFound(message);
        }

        let lowered = body.to_lowercase();
        if ALREADY_EXISTS_MARKERS.iter().any(|m| lowered.contains(m)) {
            return SdnError::AlreadyExists(message);
        }

        SdnError::Api {
            status: status.as_u16(),
            message,
        }
    }

    /// Build query string from filters
    pub fn build_query_string(filters: &[(&str, &str)]) -> String {
        filters
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Encode a single path segment (vnet ids, task UPIDs)
    pub fn encode_segment(segment: &str) -> String {
        urlencoding::encode(segment).into_owned()
    }
}
