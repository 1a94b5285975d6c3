use async_trait::async_trait;

use crate::models::{HttpRequest, HttpResponse};

pub mod client;
pub mod dns_cache;

pub use client::ReqwestHttpClient;
pub use dns_cache::CachingDnsResolver;

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// The per-request timeout elapsed. Carries the synthesized 408
    /// response so callers can still build a statement outcome.
    #[error("request timed out")]
    Timeout { response: HttpResponse },

    #[error("request execution failed: {message}")]
    RequestFailed {
        message: String,
        response: HttpResponse,
    },
}

impl HttpError {
    pub fn response(&self) -> &HttpResponse {
        match self {
            HttpError::Timeout { response } => response,
            HttpError::RequestFailed { response, .. } => response,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, HttpError::Timeout { .. })
    }
}

/// Performs one upstream HTTP request. Implementations own pooling and
/// transport details; per-request timeouts are hard deadlines.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn do_request(&self, request: HttpRequest) -> Result<HttpResponse, HttpError>;
}
