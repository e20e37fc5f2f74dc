use reqwest::StatusCode;
use thiserror::Error;

/// Why a delivery attempt did not succeed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// Worth retrying later: network trouble, throttling, provider outage.
    #[error("Transient delivery failure: {0}")]
    Transient(String),

    /// Retrying cannot help: bad address, rejected payload, no contact.
    #[error("Permanent delivery failure: {0}")]
    Permanent(String),
}

impl DeliveryError {
    /// Classify a non-success HTTP response from a provider.
    pub fn from_status(provider: &str, status: StatusCode, body: &str) -> Self {
        let message = format!("{} returned {}: {}", provider, status, body);
        if status.is_server_error()
            || status == StatusCode::TOO_MANY_REQUESTS
            || status == StatusCode::REQUEST_TIMEOUT
        {
            DeliveryError::Transient(message)
        } else {
            DeliveryError::Permanent(message)
        }
    }

    /// A request that never produced a response.
    pub fn from_request(provider: &str, err: reqwest::Error) -> Self {
        if err.is_builder() {
            DeliveryError::Permanent(format!("{} request invalid: {}", provider, err))
        } else {
            DeliveryError::Transient(format!("{} request failed: {}", provider, err))
        }
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, DeliveryError::Permanent(_))
    }
}
