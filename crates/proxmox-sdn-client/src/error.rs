//! Proxmox SDN client errors

use thiserror::Error;

/// Errors that can occur when interacting with the Proxmox API
#[derive(Debug, Error)]
pub enum SdnError {
    /// HTTP request/response error (connect, TLS, timeout, body read)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Proxmox API returned an error status
    #[error("Proxmox API error ({status}): {message}")]
    Api {
        status: u16,
        message: String,
    },

    /// Creation rejected because an object with the same identity is already defined
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Authentication failed (invalid token, missing privilege)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Response was well-formed JSON but not what the endpoint documents
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl SdnError {
    /// Whether the provider rejected a creation because the object already exists.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, SdnError::AlreadyExists(_))
    }
}
