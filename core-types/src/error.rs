use thiserror::Error;

/// Remote rate-limit code shared by every shard of the remote service.
pub const RATE_LIMIT_CODE: u16 = 407;

/// Failure of a single remote API call, classified so the retry executor can
/// decide whether another attempt is worthwhile.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// Connection-level failure: DNS, refused connection, reset mid-body.
    #[error("network error: {0}")]
    Network(String),
    /// Remote signalled it is shedding load; the same request may succeed
    /// shortly.
    #[error("rate limited by remote (code {code})")]
    RateLimited { code: u16 },
    /// Credential rejected. Retrying with the same credential cannot help.
    #[error("authentication rejected: {message}")]
    Auth { message: String },
    /// Any other remote-reported error: malformed request, unknown method.
    #[error("remote error {code}: {message}")]
    Remote { code: u16, message: String },
    /// The response body did not match the documented envelope.
    #[error("malformed response: {0}")]
    Decode(String),
}

impl ApiError {
    /// True for failures worth retrying; everything else aborts immediately.
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Network(_) | ApiError::RateLimited { .. })
    }

    /// Classify a remote-reported error by its code and message. The remote
    /// reuses the rate-limit code for credential rejections, so the message
    /// has to disambiguate.
    pub fn from_remote(code: u16, message: String) -> Self {
        if message.contains("INVALID_APPLICATION_ID") || message.contains("INVALID_ACCESS_TOKEN") {
            return ApiError::Auth { message };
        }
        if code == RATE_LIMIT_CODE {
            return ApiError::RateLimited { code };
        }
        ApiError::Remote { code, message }
    }
}
