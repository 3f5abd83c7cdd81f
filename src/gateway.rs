//! Contract for the remote generative-AI service.

use async_trait::async_trait;
use thiserror::Error;

use crate::models::SourceImage;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("provider returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("no {0} in response")]
    MissingContent(&'static str),
    #[error("Other: {0}")]
    Other(String),
}

impl GatewayError {
    /// Permanent errors are not worth another attempt.
    pub fn is_permanent(&self) -> bool {
        matches!(self, GatewayError::InvalidInput(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    /// Provider model identifier, e.g. `imagen-4.0-generate-001`.
    pub model: String,
    pub prompt: String,
    pub image: Option<SourceImage>,
}

#[async_trait]
pub trait GenerationGateway: Send + Sync {
    /// Returns an image data URL (or plain text for text-only models).
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GatewayError>;

    /// Writes YouTube title/description/tags for a thumbnail prompt.
    async fn caption(&self, prompt: &str) -> Result<String, GatewayError>;

    /// Describes a photo as a prompt for a similar, improved thumbnail.
    async fn describe_image(&self, image: &SourceImage) -> Result<String, GatewayError>;
}
