//! MFA challenge orchestration.
//!
//! Drives the out-of-band confirmation after the primary factor:
//!
//! `NoChallenge → Created → Polling → {Confirmed, Expired, Failed, TimedOut, Cancelled}`
//!
//! Only `Confirmed` leads on to finalization. Exhausting the poll budget is
//! always reported as `TimedOut`; the loop never falls through to success.
//! The surface-specific wire work lives behind `ChallengeBackend`.

use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::handshake::HandshakeOutcome;
use crate::session::Session;
use crate::types::{BankError, BankResult, ChallengeStatus, MfaChallenge, MfaMethod};

/// Default pause between two status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Default poll budget (~3 minutes at the default interval).
pub const DEFAULT_POLL_ATTEMPTS: u32 = 60;

// ---------------------------------------------------------------------------
// Backend trait
// ---------------------------------------------------------------------------

/// Surface-specific challenge operations.
#[async_trait]
pub trait ChallengeBackend: Send + Sync {
    /// Enrolled devices, fetched once per handshake.
    async fn list_methods(
        &self,
        session: &Session,
        outcome: &HandshakeOutcome,
    ) -> BankResult<Vec<MfaMethod>>;

    async fn create_challenge(
        &self,
        session: &Session,
        outcome: &HandshakeOutcome,
        method: &MfaMethod,
    ) -> BankResult<MfaChallenge>;

    /// One full status round trip. `tick` is 1-based.
    async fn poll_challenge(
        &self,
        session: &Session,
        challenge: &MfaChallenge,
        tick: u32,
    ) -> BankResult<ChallengeStatus>;

    /// Exchange a confirmed challenge for a usable session. Non-2xx is
    /// `FinalizationFailed`; the challenge is consumed either way.
    async fn finalize(
        &self,
        session: &mut Session,
        outcome: &HandshakeOutcome,
        challenge: &MfaChallenge,
    ) -> BankResult<()>;
}

// ---------------------------------------------------------------------------
// Method selection
// ---------------------------------------------------------------------------

/// Callback that is shown the enrolled methods and returns a 1-based index.
pub type MethodChooser = Arc<dyn Fn(&[MfaMethod]) -> usize + Send + Sync>;

/// How to pick one enrolled method.
#[derive(Clone)]
pub enum MethodSelection {
    /// Latest `enrolled_at`; ties go to the first one seen.
    LatestEnrolled,
    /// Explicit 1-based index.
    Index(usize),
    /// Ask the caller.
    Interactive(MethodChooser),
}

impl fmt::Debug for MethodSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MethodSelection::LatestEnrolled => write!(f, "LatestEnrolled"),
            MethodSelection::Index(i) => write!(f, "Index({i})"),
            MethodSelection::Interactive(_) => write!(f, "Interactive"),
        }
    }
}

impl Default for MethodSelection {
    fn default() -> Self {
        MethodSelection::LatestEnrolled
    }
}

/// Pick exactly one method. An empty set is an error, never a default.
pub fn select_method<'a>(
    methods: &'a [MfaMethod],
    selection: &MethodSelection,
) -> BankResult<&'a MfaMethod> {
    if methods.is_empty() {
        return Err(BankError::NoEnrolledMethods);
    }
    match selection {
        MethodSelection::LatestEnrolled => Ok(latest_enrolled(methods)),
        MethodSelection::Index(index) => by_index(methods, *index),
        MethodSelection::Interactive(choose) => by_index(methods, choose(methods)),
    }
}

fn latest_enrolled(methods: &[MfaMethod]) -> &MfaMethod {
    let mut best = &methods[0];
    for method in &methods[1..] {
        // Strictly later only, so the first of equal timestamps wins.
        // `None` orders before any timestamp.
        if method.enrolled_at > best.enrolled_at {
            best = method;
        }
    }
    best
}

fn by_index(methods: &[MfaMethod], index: usize) -> BankResult<&MfaMethod> {
    if index == 0 || index > methods.len() {
        return Err(BankError::InvalidSelection {
            index,
            available: methods.len(),
        });
    }
    Ok(&methods[index - 1])
}

// ---------------------------------------------------------------------------
// Polling policy and state
// ---------------------------------------------------------------------------

/// Bounded polling parameters.
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
    /// External deadline; polling stops with `Cancelled` once it passes.
    pub deadline: Option<Instant>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_POLL_ATTEMPTS,
            deadline: None,
        }
    }
}

impl PollPolicy {
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Worst-case time spent sleeping between polls. Saturates at
    /// `Duration::MAX`.
    pub fn budget(&self) -> Duration {
        self.interval
            .checked_mul(self.max_attempts)
            .unwrap_or(Duration::MAX)
    }
}

/// Where the orchestrator is in the challenge lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MfaState {
    NoChallenge,
    Created,
    Polling { attempt: u32 },
    Confirmed,
    Expired,
    Failed,
    TimedOut,
    Cancelled,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Runs one challenge per handshake.
#[derive(Debug)]
pub struct MfaOrchestrator {
    selection: MethodSelection,
    policy: PollPolicy,
    state: MfaState,
}

impl MfaOrchestrator {
    pub fn new(selection: MethodSelection, policy: PollPolicy) -> Self {
        Self {
            selection,
            policy,
            state: MfaState::NoChallenge,
        }
    }

    pub fn state(&self) -> MfaState {
        self.state
    }

    pub fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    /// Select a method, create a challenge, poll it to a terminal state and
    /// finalize it. Returns the confirmed challenge.
    pub async fn run<B>(
        &mut self,
        backend: &B,
        session: &mut Session,
        outcome: &HandshakeOutcome,
    ) -> BankResult<MfaChallenge>
    where
        B: ChallengeBackend + ?Sized,
    {
        self.state = MfaState::NoChallenge;

        let methods = backend.list_methods(session, outcome).await?;
        debug!(count = methods.len(), "MFA methods fetched");
        let method = select_method(&methods, &self.selection)?.clone();
        if method.locked {
            warn!(method_id = %method.id, "Selected MFA method is locked");
        }
        info!(
            method_id = %method.id,
            device = %method.device_label,
            wait_secs = self.policy.budget().as_secs(),
            "Requesting confirmation on device"
        );

        let mut challenge = backend.create_challenge(session, outcome, &method).await?;
        self.state = MfaState::Created;
        info!(challenge_id = %challenge.id, "MFA challenge created, waiting for confirmation");

        self.poll(backend, session, &challenge).await?;
        challenge.status = ChallengeStatus::Processed;

        backend.finalize(session, outcome, &challenge).await?;
        info!(challenge_id = %challenge.id, "MFA challenge finalized");
        Ok(challenge)
    }

    /// Poll until the challenge is confirmed (`Ok`) or any other end state
    /// (`Err`).
    pub async fn poll<B>(
        &mut self,
        backend: &B,
        session: &Session,
        challenge: &MfaChallenge,
    ) -> BankResult<()>
    where
        B: ChallengeBackend + ?Sized,
    {
        let deadline = self.policy.deadline;
        let max_attempts = self.policy.max_attempts;

        for attempt in 1..=max_attempts {
            self.state = MfaState::Polling { attempt };

            let status = match within(deadline, backend.poll_challenge(session, challenge, attempt)).await {
                Some(status) => status?,
                None => return Err(self.cancelled(challenge, attempt - 1)),
            };

            match status {
                ChallengeStatus::Processed => {
                    self.state = MfaState::Confirmed;
                    info!(challenge_id = %challenge.id, attempt, "MFA challenge confirmed");
                    return Ok(());
                }
                ChallengeStatus::Expired => {
                    self.state = MfaState::Expired;
                    return Err(BankError::ChallengeExpired {
                        challenge_id: challenge.id.clone(),
                    });
                }
                ChallengeStatus::Failed => {
                    self.state = MfaState::Failed;
                    return Err(BankError::ChallengeFailed {
                        challenge_id: challenge.id.clone(),
                    });
                }
                ChallengeStatus::Pending => {
                    debug!(challenge_id = %challenge.id, attempt, "MFA challenge still pending");
                }
            }

            if attempt < max_attempts
                && within(deadline, tokio::time::sleep(self.policy.interval))
                    .await
                    .is_none()
            {
                return Err(self.cancelled(challenge, attempt));
            }
        }

        self.state = MfaState::TimedOut;
        warn!(challenge_id = %challenge.id, attempts = max_attempts, "MFA challenge not confirmed in time");
        Err(BankError::TimedOut {
            challenge_id: challenge.id.clone(),
            attempts: max_attempts,
        })
    }

    fn cancelled(&mut self, challenge: &MfaChallenge, attempts: u32) -> BankError {
        self.state = MfaState::Cancelled;
        warn!(challenge_id = %challenge.id, attempts, "MFA polling cancelled by deadline");
        BankError::Cancelled {
            challenge_id: challenge.id.clone(),
            attempts,
        }
    }
}

/// Run `fut` unless `deadline` passes first.
async fn within<F: Future>(deadline: Option<Instant>, fut: F) -> Option<F::Output> {
    match deadline {
        None => Some(fut.await),
        Some(deadline) => tokio::select! {
            out = fut => Some(out),
            _ = tokio::time::sleep_until(deadline) => None,
        },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
