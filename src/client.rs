//! Banking client: handshake, MFA, then ledger reads for one authenticated run.

use chrono::Duration;
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{debug, info};

use crate::handshake::Credentials;
use crate::ledger::{DateRange, LedgerBatch};
use crate::mfa::{MethodSelection, MfaOrchestrator, MfaState, PollPolicy};
use crate::session::Session;
use crate::surfaces::Surface;
use crate::transport::Transport;
use crate::types::{AccountSummary, BankError, BankResult, MfaChallenge};

/// Below this much access-token lifetime (seconds), reads run one at a time.
pub const EXPIRY_MARGIN_SECS: i64 = 60;

/// Owns the session of one run and drives a surface through it.
pub struct BankClient<S: Surface> {
    surface: S,
    session: Session,
    mfa: MfaOrchestrator,
    logged_in: bool,
}

impl<S: Surface> BankClient<S> {
    pub fn new(
        surface: S,
        transport: Arc<dyn Transport>,
        selection: MethodSelection,
        policy: PollPolicy,
    ) -> Self {
        Self {
            surface,
            session: Session::new(transport),
            mfa: MfaOrchestrator::new(selection, policy),
            logged_in: false,
        }
    }

    /// Primary factor, then the out-of-band confirmation. On error the
    /// client stays logged out; a new `login` starts a fresh handshake.
    pub async fn login(&mut self, credentials: &Credentials) -> BankResult<MfaChallenge> {
        self.logged_in = false;
        info!(surface = self.surface.name(), user = %credentials.username, "Logging in");

        let outcome = self.surface.authenticate(&mut self.session, credentials).await?;
        let challenge = self.mfa.run(&self.surface, &mut self.session, &outcome).await?;

        self.logged_in = true;
        info!(surface = self.surface.name(), "Session established");
        Ok(challenge)
    }

    fn ensure_logged_in(&self) -> BankResult<()> {
        if self.logged_in {
            Ok(())
        } else {
            Err(BankError::NotAuthenticated)
        }
    }

    /// Every product on the overview, depots included.
    pub async fn accounts(&self) -> BankResult<Vec<AccountSummary>> {
        self.ensure_logged_in()?;
        self.surface.accounts(&self.session).await
    }

    /// Transactions of one account. Depots have no ledger and yield an
    /// empty batch without a request.
    pub async fn transactions(
        &self,
        account: &AccountSummary,
        range: &DateRange,
    ) -> BankResult<LedgerBatch> {
        self.ensure_logged_in()?;
        if !account.kind.has_ledger() {
            debug!(account = %account.identifier, "Depot has no transaction ledger");
            return Ok(LedgerBatch::new(&account.identifier));
        }
        self.surface
            .transactions(&self.session, account, range)
            .await
            .map_err(|e| e.for_account(&account.identifier))
    }

    /// Ledgers of every account that has one, in overview order.
    pub async fn fetch_ledgers(
        &self,
        accounts: &[AccountSummary],
        range: &DateRange,
    ) -> BankResult<Vec<LedgerBatch>> {
        self.ensure_logged_in()?;
        let with_ledger: Vec<&AccountSummary> =
            accounts.iter().filter(|a| a.kind.has_ledger()).collect();

        if self.concurrent_reads() {
            debug!(count = with_ledger.len(), "Fetching ledgers concurrently");
            return try_join_all(with_ledger.into_iter().map(|a| self.transactions(a, range))).await;
        }

        let mut batches = Vec::with_capacity(with_ledger.len());
        for account in with_ledger {
            batches.push(self.transactions(account, range).await?);
        }
        Ok(batches)
    }

    /// Concurrent reads need a stateless surface and enough token lifetime
    /// left that no read starts on a token about to lapse.
    pub(crate) fn concurrent_reads(&self) -> bool {
        self.surface.stateless_reads()
            && self
                .session
                .access_token_remaining()
                .map_or(true, |left| left > Duration::seconds(EXPIRY_MARGIN_SECS))
    }

    pub fn is_logged_in(&self) -> bool {
        self.logged_in
    }

    pub fn mfa_state(&self) -> MfaState {
        self.mfa.state()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
