//! API request and response types

use serde::{Deserialize, Serialize};

/// Message posted to the REST webhook
#[derive(Debug, Deserialize)]
pub struct WebhookRequest {
    /// Conversation id
    pub sender: String,
    pub message: String,
}

/// Response for lifecycle actions
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
