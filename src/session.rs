//! Session state.
//!
//! Holds the rotating credentials of one authenticated run (anti-forgery
//! token, MFA correlation id, access token) on top of the transport's
//! cookie jar, and decorates outgoing requests with them.
//!
//! Every decorated request is stamped with the rotation generation it was
//! built under. Sending a request whose stamp predates the latest rotation
//! fails with `StaleAntiForgeryToken` before anything reaches the network.

use chrono::{DateTime, Duration, Utc};
use reqwest::Url;
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::transport::{HttpRequest, HttpResponse, Transport};
use crate::types::{BankError, BankResult, Step};

/// Header carrying the anti-forgery token.
pub const XSRF_HEADER: &str = "x-xsrf-token";

/// Cookie the structured surface sets with the anti-forgery token.
pub const XSRF_COOKIE: &str = "__Host-xsrf";

/// A request decorated with the session's current credentials.
#[derive(Debug)]
pub struct AuthenticatedRequest {
    request: HttpRequest,
    generation: u64,
}

impl AuthenticatedRequest {
    /// Rotation generation the request was built under.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn request(&self) -> &HttpRequest {
        &self.request
    }
}

/// Credentials of one authenticated run.
pub struct Session {
    transport: Arc<dyn Transport>,
    anti_forgery: Option<SecretString>,
    generation: u64,
    mfa_correlation_id: Option<String>,
    access_token: Option<SecretString>,
    access_expires_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("has_anti_forgery", &self.anti_forgery.is_some())
            .field("generation", &self.generation)
            .field("mfa_correlation_id", &self.mfa_correlation_id)
            .field("has_access_token", &self.access_token.is_some())
            .field("access_expires_at", &self.access_expires_at)
            .finish()
    }
}

impl Session {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            anti_forgery: None,
            generation: 0,
            mfa_correlation_id: None,
            access_token: None,
            access_expires_at: None,
        }
    }

    // -- Anti-forgery token --------------------------------------------------

    pub fn current_token(&self) -> BankResult<&SecretString> {
        self.anti_forgery.as_ref().ok_or(BankError::NotAuthenticated)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Replace the anti-forgery token. Requests decorated before this call
    /// can no longer be sent.
    pub fn rotate(&mut self, token: SecretString) {
        self.anti_forgery = Some(token);
        self.generation += 1;
        debug!(generation = self.generation, "Anti-forgery token rotated");
    }

    /// Attach the current anti-forgery header. Session cookies come from
    /// the transport's jar.
    pub fn apply(&self, mut request: HttpRequest) -> BankResult<AuthenticatedRequest> {
        let token = self.current_token()?;
        request.set_header(XSRF_HEADER, token.expose_secret());
        Ok(AuthenticatedRequest {
            request,
            generation: self.generation,
        })
    }

    // -- Sending -------------------------------------------------------------

    /// Send a decorated request.
    pub async fn send(
        &self,
        request: AuthenticatedRequest,
        step: Step,
    ) -> BankResult<HttpResponse> {
        if request.generation != self.generation {
            return Err(BankError::StaleAntiForgeryToken {
                issued: request.generation,
                current: self.generation,
            });
        }
        self.transport
            .execute(request.request)
            .await
            .map_err(|e| BankError::transport(step, e))
    }

    /// Send a request that needs no anti-forgery token (login page,
    /// bootstrap).
    pub async fn send_anonymous(
        &self,
        request: HttpRequest,
        step: Step,
    ) -> BankResult<HttpResponse> {
        self.transport
            .execute(request)
            .await
            .map_err(|e| BankError::transport(step, e))
    }

    // -- Cookies -------------------------------------------------------------

    pub fn cookie(&self, url: &Url, name: &str) -> Option<String> {
        self.transport
            .jar_cookies(url)
            .into_iter()
            .find(|c| c.name == name)
            .map(|c| c.value)
    }

    /// Rotate to the anti-forgery cookie's value if the server re-issued it.
    /// Returns whether a rotation happened.
    pub fn refresh_from_cookie(&mut self, url: &Url, name: &str) -> bool {
        let Some(value) = self.cookie(url, name) else {
            return false;
        };
        let unchanged = self
            .anti_forgery
            .as_ref()
            .is_some_and(|t| t.expose_secret() == &value);
        if unchanged {
            return false;
        }
        self.rotate(SecretString::new(value));
        true
    }

    // -- MFA correlation / access token ---------------------------------------

    pub fn set_correlation_id(&mut self, id: String) {
        self.mfa_correlation_id = Some(id);
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.mfa_correlation_id.as_deref()
    }

    /// Store an access token. `expires_in` is in seconds, as the token
    /// endpoint reports it. An expiry beyond what a timestamp can hold is
    /// treated as unknown.
    pub fn set_access_token(&mut self, token: SecretString, expires_in: Option<i64>) {
        self.access_token = Some(token);
        self.access_expires_at = expires_in.and_then(|secs| {
            let at = Duration::try_seconds(secs).and_then(|d| Utc::now().checked_add_signed(d));
            if at.is_none() {
                warn!(expires_in = secs, "Token expiry out of range, ignoring it");
            }
            at
        });
    }

    pub fn access_token(&self) -> Option<&SecretString> {
        self.access_token.as_ref()
    }

    /// Time left on the access token, if its expiry is known.
    pub fn access_token_remaining(&self) -> Option<Duration> {
        self.access_expires_at.map(|at| at - Utc::now())
    }

    /// Refresh is not supported: an expired token ends the run.
    pub fn ensure_not_expired(&self, step: Step) -> BankResult<()> {
        match self.access_token_remaining() {
            Some(left) if left <= Duration::zero() => Err(BankError::SessionExpired { step }),
            _ => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
