//! Noren WebSocket Authentication
//!
//! The feed authenticates in-band: once the socket is open the client sends
//! an identify frame carrying the session token, and the server answers with
//! a connect acknowledgement.
//!
//! # Authentication Flow
//!
//! 1. Connect to the WebSocket endpoint
//! 2. Send `{"t":"c","uid":"..","actid":"..","susertoken":"..","source":"API"}`
//! 3. Receive `{"t":"ck","s":"OK","uid":".."}` or a non-`OK` status
//!
//! A rejected acknowledgement means the token is no longer valid. Retrying
//! with the same token cannot succeed, so the ticker holds reconnection until
//! a new token is supplied.

use std::time::Duration;

use thiserror::Error;

use super::messages::{ConnectAck, ConnectRequest};

// =============================================================================
// Constants
// =============================================================================

/// Default time allowed between sending the identify frame and the ack.
pub const ACK_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during authentication.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// The server rejected the session token.
    #[error("session rejected by server: status {status:?}")]
    Rejected {
        /// Status string from the acknowledgement.
        status: String,
    },

    /// No acknowledgement arrived in time.
    #[error("no connect acknowledgement within {0:?}")]
    AckTimeout(Duration),

    /// Credentials are incomplete.
    #[error("missing credential: {0}")]
    MissingCredential(&'static str),
}

impl AuthError {
    /// Whether retrying with the same credentials can succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::AckTimeout(_))
    }
}

// =============================================================================
// Credentials
// =============================================================================

/// Session credentials for the tick feed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    user_id: String,
    account_id: String,
    access_token: String,
}

impl Credentials {
    /// Create credentials.
    #[must_use]
    pub const fn new(user_id: String, account_id: String, access_token: String) -> Self {
        Self {
            user_id,
            account_id,
            access_token,
        }
    }

    /// Credentials where the account id equals the user id, which is the
    /// usual case for retail accounts.
    #[must_use]
    pub fn for_user(user_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        let user_id = user_id.into();
        Self {
            account_id: user_id.clone(),
            user_id,
            access_token: access_token.into(),
        }
    }

    /// User id.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Account id.
    #[must_use]
    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// Session access token.
    #[must_use]
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Replace the access token, keeping the ids.
    pub fn set_access_token(&mut self, token: String) {
        self.access_token = token;
    }

    /// Reject credentials with empty fields.
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.user_id.is_empty() {
            return Err(AuthError::MissingCredential("user_id"));
        }
        if self.account_id.is_empty() {
            return Err(AuthError::MissingCredential("account_id"));
        }
        if self.access_token.is_empty() {
            return Err(AuthError::MissingCredential("access_token"));
        }
        Ok(())
    }

    /// Identify frame for these credentials.
    #[must_use]
    pub fn connect_request(&self) -> ConnectRequest<'_> {
        ConnectRequest::new(&self.user_id, &self.account_id, &self.access_token)
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user_id", &self.user_id)
            .field("account_id", &self.account_id)
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

/// Check a connect acknowledgement.
pub fn verify_ack(ack: &ConnectAck) -> Result<(), AuthError> {
    if ack.is_ok() {
        Ok(())
    } else {
        Err(AuthError::Rejected {
            status: ack.status.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_token() {
        let creds = Credentials::for_user("FT0001", "very-secret");
        let debug = format!("{creds:?}");
        assert!(debug.contains("FT0001"));
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("very-secret"));
    }

    #[test]
    fn for_user_copies_account_id() {
        let creds = Credentials::for_user("FT0001", "tok");
        assert_eq!(creds.account_id(), "FT0001");
    }

    #[test]
    fn validate_reports_first_missing_field() {
        let creds = Credentials::new("FT1".into(), "FT1".into(), String::new());
        assert_eq!(
            creds.validate(),
            Err(AuthError::MissingCredential("access_token"))
        );
        assert!(Credentials::for_user("FT1", "t").validate().is_ok());
    }

    #[test]
    fn verify_ack_classifies_status() {
        let ok = ConnectAck {
            status: "OK".into(),
            uid: None,
        };
        assert!(verify_ack(&ok).is_ok());

        let bad = ConnectAck {
            status: "Invalid session".into(),
            uid: None,
        };
        let err = verify_ack(&bad).unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("Invalid session"));
    }

    #[test]
    fn set_access_token_keeps_ids() {
        let mut creds = Credentials::for_user("FT1", "old");
        creds.set_access_token("new".into());
        assert_eq!(creds.access_token(), "new");
        assert_eq!(creds.user_id(), "FT1");
    }
}
