//! Shared HTTP plumbing for webhook-style channels

use super::ChannelError;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::time::Duration;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const USER_AGENT: &str = concat!("Faultline-Notifier/", env!("CARGO_PKG_VERSION"));

/// Longest response body excerpt kept in error messages
const MAX_ERROR_BODY: usize = 512;

pub fn build_client(timeout: Duration) -> Result<Client, ChannelError> {
    Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| ChannelError::InvalidConfig(format!("failed to build HTTP client: {e}")))
}

/// Send the request and turn every non-2xx answer into a classified error
pub async fn send_request(request: RequestBuilder) -> Result<Response, ChannelError> {
    let response = request.send().await.map_err(classify_transport_error)?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(classify_status(status, &body))
}

pub fn classify_status(status: StatusCode, body: &str) -> ChannelError {
    let message = if body.trim().is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {}", truncate(body.trim(), MAX_ERROR_BODY))
    };

    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        ChannelError::Transient(message)
    } else {
        ChannelError::Permanent(message)
    }
}

fn classify_transport_error(error: reqwest::Error) -> ChannelError {
    if error.is_builder() {
        ChannelError::InvalidConfig(error.to_string())
    } else {
        // timeouts, refused connections, resets
        ChannelError::Transient(error.to_string())
    }
}

pub(crate) fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
