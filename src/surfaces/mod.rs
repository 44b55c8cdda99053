//! Banking surface integrations.
//!
//! Defines the `Surface` trait and provides implementations for:
//! - Web: the legacy server-rendered banking pages (form login, HTML
//!   overview, CSV export)
//! - Api: the JSON:API endpoints behind the newer banking frontend

pub mod api;
pub mod web;

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::handshake::CredentialHandshake;
use crate::ledger::LedgerSource;
use crate::mfa::ChallengeBackend;
use crate::types::{BankError, BankResult, Step};

/// One surface generation: handshake, challenge and ledger operations
/// against the same host.
pub trait Surface: CredentialHandshake + ChallengeBackend + LedgerSource {
    /// Surface name for logging.
    fn name(&self) -> &str;
}

/// Which surface a run talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SurfaceKind {
    Web,
    #[default]
    Api,
}

/// Resolve `path` (absolute or relative, query allowed) against `base`.
/// Paths often come from server responses, so a bad one is a decode
/// failure of `step`.
pub(crate) fn join_url(base: &Url, path: &str, step: Step) -> BankResult<Url> {
    base.join(path)
        .map_err(|e| BankError::decode(step, format!("cannot join {path:?} onto {base}: {e}")))
}
