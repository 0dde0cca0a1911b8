use thiserror::Error;

/// Errors produced across the parley components.
///
/// The variants map one-to-one onto response classes: validation problems
/// are never retried, auth failures require the client to re-authenticate,
/// and transient failures are retried only by the directory client's
/// bounded policy.
#[derive(Debug, Error)]
pub enum ParleyError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("transient error: {0}")]
    Transient(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("token error: {0}")]
    Token(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ParleyError {
    /// HTTP status code for this error class.
    ///
    /// Transient and transport errors never reach end users over HTTP; they
    /// map to 503 for completeness.
    pub fn http_status(&self) -> u16 {
        match self {
            ParleyError::Validation(_) => 400,
            ParleyError::Auth(_) | ParleyError::Token(_) => 401,
            ParleyError::Forbidden(_) => 403,
            ParleyError::NotFound(_) => 404,
            ParleyError::Conflict(_) => 409,
            ParleyError::Transient(_) | ParleyError::Transport(_) => 503,
            ParleyError::Io(_) | ParleyError::Serialization(_) | ParleyError::Internal(_) => 500,
        }
    }
}

pub type ParleyResult<T> = Result<T, ParleyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(ParleyError::Validation("x".into()).http_status(), 400);
        assert_eq!(ParleyError::Auth("x".into()).http_status(), 401);
        assert_eq!(ParleyError::Forbidden("x".into()).http_status(), 403);
        assert_eq!(ParleyError::NotFound("x".into()).http_status(), 404);
        assert_eq!(ParleyError::Conflict("x".into()).http_status(), 409);
        assert_eq!(ParleyError::Internal("x".into()).http_status(), 500);
    }
}
