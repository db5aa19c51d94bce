//! Credential tokens for qcast.
//!
//! A token is the whole session: it carries everything needed to reopen a
//! tenant connection without a second directory round trip. The login secret
//! inside it is sealed with AES-256-GCM, then the claims are signed (HS256).

mod seal;
pub mod token;

use qcast_core::QcastError;
use serde_json::json;
use thiserror::Error;

pub use token::{IssuedToken, TokenCodec, VerifiedToken, DEFAULT_TOKEN_TTL};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("token has expired")]
    Expired,

    #[error("invalid token: {0}")]
    Invalid(String),

    #[error("failed to issue token: {0}")]
    Issue(String),
}

impl TokenError {
    /// Client-facing sub-kind: `expired` means re-login, `invalid` means the
    /// token itself is unusable.
    pub fn reason(&self) -> &'static str {
        match self {
            TokenError::Expired => "expired",
            TokenError::Invalid(_) => "invalid",
            TokenError::Issue(_) => "issue",
        }
    }
}

impl From<TokenError> for QcastError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired => QcastError::not_authenticated("Token has expired")
                .with_data(json!({ "reason": err.reason() })),
            TokenError::Invalid(_) => QcastError::not_authenticated("Invalid token")
                .with_data(json!({ "reason": err.reason() })),
            TokenError::Issue(msg) => QcastError::general_error(format!("Failed to issue token: {msg}")),
        }
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    let token = token.trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return None;
    }
    Some(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_header_parsing() {
        assert_eq!(bearer_token("Bearer abc.def.ghi"), Some("abc.def.ghi"));
        assert_eq!(bearer_token("  bearer   xyz "), Some("xyz"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("Bearer"), None);
    }

    #[test]
    fn token_errors_map_to_not_authenticated() {
        let expired = QcastError::from(TokenError::Expired);
        assert_eq!(expired.code(), 401);
        assert_eq!(expired.data.unwrap()["reason"], "expired");

        let invalid = QcastError::from(TokenError::Invalid("bad signature".into()));
        assert_eq!(invalid.code(), 401);
        assert_eq!(invalid.message, "Invalid token");
        assert_eq!(invalid.data.unwrap()["reason"], "invalid");
    }
}
