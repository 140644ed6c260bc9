//! Contracts for the external services the matcher talks to, plus the HTTP
//! clients that implement them.

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

pub mod gemini;
pub mod ollama;
pub mod telegram;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Rate limited by provider: {0}")]
    RateLimited(String),
    #[error("Request failed: {0}")]
    Transport(String),
    #[error("Provider returned {status}: {body}")]
    Provider { status: u16, body: String },
    #[error("Malformed provider response: {0}")]
    Malformed(String),
}

impl GenerationError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, GenerationError::RateLimited(_))
    }

    /// Whether the same request may succeed later. Client errors such as a
    /// bad key or an unknown model, and unparsable replies, fail the same
    /// way every time.
    pub fn is_retryable(&self) -> bool {
        match self {
            GenerationError::RateLimited(_) | GenerationError::Transport(_) => true,
            GenerationError::Provider { status, .. } => *status >= 500 || *status == 408,
            GenerationError::Malformed(_) => false,
        }
    }
}

/// Map a non-success HTTP response to a generation error. Quota exhaustion
/// counts as rate limiting even when reported with another status.
pub(crate) fn classify_failure(status: StatusCode, body: String) -> GenerationError {
    if status == StatusCode::TOO_MANY_REQUESTS || body.contains("RESOURCE_EXHAUSTED") {
        GenerationError::RateLimited(body)
    } else {
        GenerationError::Provider {
            status: status.as_u16(),
            body,
        }
    }
}

/// Single-turn text completion.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, GenerationError>;
}

#[async_trait]
impl<T: TextGenerator + ?Sized> TextGenerator for Box<T> {
    async fn complete(&self, prompt: &str) -> Result<String, GenerationError> {
        (**self).complete(prompt).await
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageFormat {
    Html,
    Plain,
}

#[derive(Debug, Error)]
pub enum ChannelError {
    /// The channel refused the message itself, e.g. broken markup.
    #[error("Message rejected: {0}")]
    Rejected(String),
    #[error("Channel unavailable: {0}")]
    Unavailable(String),
}

/// Outbound notification channel.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    async fn send(
        &self,
        recipient: &str,
        text: &str,
        format: MessageFormat,
    ) -> Result<(), ChannelError>;
}

/// Join `path` onto `base`, treating `base` as a directory. `path` is always
/// relative, even when its first segment contains a colon.
pub(crate) fn endpoint(base: &str, path: &str) -> Result<url::Url, url::ParseError> {
    let base = url::Url::parse(&format!("{}/", base.trim_end_matches('/')))?;
    base.join(&format!("./{}", path.trim_start_matches('/')))
}
