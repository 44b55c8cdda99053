//! Primary-factor exchange.
//!
//! Defines the `CredentialHandshake` trait. Both surface generations
//! implement it: the web surface with a hidden-field login form, the
//! structured surface with a token-endpoint grant. Either way the result
//! is a `HandshakeOutcome` and the session holds the materials MFA needs.

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::SecretString;

use crate::session::Session;
use crate::transport::HttpResponse;
use crate::types::{BankError, BankResult, Step};

/// Plaintext credentials, already obtained by the caller.
#[derive(Debug)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::new(password.into()),
        }
    }
}

/// What a successful primary-factor exchange yields, on either surface.
#[derive(Debug)]
pub struct HandshakeOutcome {
    /// Confirmation action URL (web) or challenge endpoint (structured).
    pub confirmation_target: String,
    pub anti_forgery_token: SecretString,
    pub mfa_correlation_id: Option<String>,
    pub bootstrap_access_token: Option<SecretString>,
}

#[async_trait]
pub trait CredentialHandshake: Send + Sync {
    /// Exchange the primary factor. Implementations rotate the session's
    /// anti-forgery token and record the correlation id / bootstrap token.
    async fn authenticate(
        &self,
        session: &mut Session,
        credentials: &Credentials,
    ) -> BankResult<HandshakeOutcome>;
}

/// Map the status of a credential submission. Explicit refusals are told
/// apart from layout changes by status, never by field absence alone.
pub(crate) fn check_credential_status(resp: &HttpResponse) -> BankResult<()> {
    let status = resp.status;
    if status.is_success() {
        return Ok(());
    }
    if matches!(
        status,
        StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
    ) {
        return Err(BankError::CredentialsRejected {
            step: Step::CredentialSubmit,
            status: status.as_u16(),
        });
    }
    Err(BankError::UnexpectedStatus {
        step: Step::CredentialSubmit,
        status: status.as_u16(),
    })
}
