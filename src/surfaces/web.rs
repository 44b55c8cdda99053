//! Legacy web banking surface.
//!
//! Server-rendered pages on the `www` host:
//! - login: hidden-field form (`$sID$`, `token`) posted with the username
//!   and password; the answer is the app-confirmation page carrying the
//!   `XSRFPreventionToken` and the `form#confirmForm` action
//! - MFA: the confirmation page is the challenge; the page script polls
//!   `?$event=pollingVerification` until the banking app confirms
//! - overview: `FinancialStatus.xhtml`, one `tr.mainRow` per product
//! - ledger: search form POST, then `?$event=csvExport`
//!
//! Pages are parsed with `scraper`. `Html` is not `Send`, so every parse
//! happens in a synchronous helper that returns owned values.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use super::{join_url, Surface};
use crate::handshake::{check_credential_status, CredentialHandshake, Credentials, HandshakeOutcome};
use crate::ledger::csv_export::parse_export;
use crate::ledger::locale::{format_date, parse_amount, parse_date};
use crate::ledger::{DateRange, LedgerBatch, LedgerSource};
use crate::mfa::ChallengeBackend;
use crate::session::Session;
use crate::transport::{HttpRequest, HttpResponse};
use crate::types::{
    AccountKind, AccountSummary, BankError, BankResult, ChallengeStatus, MfaChallenge, MfaMethod,
    Step,
};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

pub const DEFAULT_WEB_BASE: &str = "https://www.dkb.de";
const SURFACE_NAME: &str = "web";

const LOGIN_PATH: &str = "/banking";
const OVERVIEW_PATH: &str =
    "/DkbTransactionBanking/content/banking/financialstatus/FinancialComposite/FinancialStatus.xhtml?$event=init";
const CHECKING_LEDGER_PATH: &str = "/banking/finanzstatus/kontoumsaetze";
const CARD_LEDGER_PATH: &str = "/banking/finanzstatus/kreditkartenumsaetze";

const FIELD_SESSION_ID: &str = "$sID$";
const FIELD_LOGIN_TOKEN: &str = "token";
const FIELD_XSRF: &str = "XSRFPreventionToken";
const FIELD_ACCOUNT_SELECT: &str = "slAllAccounts";

/// Id of the single pseudo-method: the web surface confirms through
/// whichever app the user enrolled, there is no device list.
pub const APP_METHOD_ID: &str = "app";

// ---------------------------------------------------------------------------
// Page parsing
// ---------------------------------------------------------------------------

fn selector(css: &str, step: Step) -> BankResult<Selector> {
    Selector::parse(css).map_err(|e| BankError::decode(step, format!("invalid selector {css:?}: {e:?}")))
}

fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

/// Hidden fields of the login form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LoginForm {
    pub action: Option<String>,
    pub session_id: String,
    pub token: String,
}

pub(crate) fn parse_login_form(html: &str) -> BankResult<LoginForm> {
    let step = Step::LoginPage;
    let doc = Html::parse_document(html);
    let form = doc
        .select(&selector("form#login", step)?)
        .next()
        .ok_or_else(|| BankError::missing(step, "form#login"))?;

    let hidden = |name: &str| -> BankResult<String> {
        let css = format!("input[name='{name}']");
        form.select(&selector(&css, step)?)
            .next()
            .and_then(|input| input.value().attr("value"))
            .map(str::to_string)
            .ok_or_else(|| BankError::missing(step, name))
    };

    Ok(LoginForm {
        action: form.value().attr("action").map(str::to_string),
        session_id: hidden(FIELD_SESSION_ID)?,
        token: hidden(FIELD_LOGIN_TOKEN)?,
    })
}

/// Whether a page is the login form again.
pub(crate) fn has_login_form(html: &str) -> BankResult<bool> {
    let doc = Html::parse_document(html);
    Ok(doc.select(&selector("form#login", Step::CredentialSubmit)?).next().is_some())
}

/// Value of the `XSRFPreventionToken` hidden input, if the page has one.
pub(crate) fn parse_xsrf(html: &str, step: Step) -> BankResult<Option<String>> {
    let doc = Html::parse_document(html);
    let css = format!("input[name='{FIELD_XSRF}']");
    Ok(doc
        .select(&selector(&css, step)?)
        .next()
        .and_then(|input| input.value().attr("value"))
        .filter(|v| !v.is_empty())
        .map(str::to_string))
}

/// Anti-forgery token and confirmation action of the page shown after the
/// credentials were accepted.
pub(crate) fn parse_confirmation(html: &str) -> BankResult<(String, String)> {
    let step = Step::CredentialSubmit;
    let token = parse_xsrf(html, step)?.ok_or_else(|| BankError::missing(step, FIELD_XSRF))?;

    let doc = Html::parse_document(html);
    let action = doc
        .select(&selector("form#confirmForm", step)?)
        .next()
        .and_then(|form| form.value().attr("action"))
        .filter(|a| !a.is_empty())
        .map(str::to_string)
        .ok_or_else(|| BankError::missing(step, "form#confirmForm[action]"))?;

    Ok((token, action))
}

/// Products on the financial status page, by column position:
/// name, identifier, balance date, balance, action links.
pub(crate) fn parse_overview(html: &str) -> BankResult<Vec<AccountSummary>> {
    let step = Step::Overview;
    let doc = Html::parse_document(html);
    let row_sel = selector("tr.mainRow", step)?;
    let cell_sel = selector("td", step)?;
    let name_sel = selector("div.forceWrap", step)?;
    let iban_sel = selector("div.iban", step)?;
    let payment_sel = selector("a.evt-paymentTransaction", step)?;
    let depot_sel = selector("a.evt-depot", step)?;

    let mut accounts = Vec::new();
    for row in doc.select(&row_sel) {
        let cells: Vec<ElementRef<'_>> = row.select(&cell_sel).collect();

        let display_name = cells
            .first()
            .and_then(|c| c.select(&name_sel).next())
            .map(text_of)
            .unwrap_or_default();
        let identifier: String = cells
            .get(1)
            .and_then(|c| c.select(&iban_sel).next())
            .map(|e| text_of(e).split_whitespace().collect())
            .unwrap_or_default();
        let balance_date = cells.get(2).and_then(|c| parse_date(&text_of(*c)).ok());
        let balance = cells.get(3).and_then(|c| {
            let text = text_of(*c);
            text.split_whitespace().next().and_then(|raw| parse_amount(raw).ok())
        });

        let links = cells.get(4);
        let payment = links.and_then(|c| c.select(&payment_sel).next());
        let (kind, link) = match payment {
            Some(a) if identifier.starts_with("DE") => (AccountKind::Checking, Some(a)),
            Some(a) => (AccountKind::CreditCard, Some(a)),
            None => (AccountKind::Depot, links.and_then(|c| c.select(&depot_sel).next())),
        };
        let transaction_ref = link
            .and_then(|a| a.value().attr("href"))
            .unwrap_or_default()
            .to_string();

        if identifier.is_empty() {
            warn!(name = %display_name, "Overview row without identifier");
        }
        accounts.push(AccountSummary {
            display_name,
            identifier,
            kind,
            transaction_ref,
            balance,
            balance_date,
        });
    }
    Ok(accounts)
}

/// Value of the account preselected in the transaction search form.
pub(crate) fn parse_selected_account(html: &str) -> BankResult<String> {
    let step = Step::TransactionSearch;
    let doc = Html::parse_document(html);
    let css = format!("select[name='{FIELD_ACCOUNT_SELECT}'] option[selected]");
    doc.select(&selector(&css, step)?)
        .next()
        .and_then(|option| option.value().attr("value"))
        .map(str::to_string)
        .ok_or_else(|| BankError::missing(step, FIELD_ACCOUNT_SELECT))
}

/// Poll URL for the confirmation page. `poll_id` only defeats caches.
pub(crate) fn poll_url(action: &str, poll_id: i64) -> BankResult<Url> {
    let separator = if action.contains('?') { '&' } else { '?' };
    let raw = format!("{action}{separator}$event=pollingVerification&$ignore.request=true&_={poll_id}");
    Url::parse(&raw).map_err(|e| BankError::decode(Step::ChallengePoll, e))
}

/// Page listing the transactions of `kind`. Depots have no ledger page and
/// fall back to the checking one.
pub(crate) fn ledger_path(kind: AccountKind) -> &'static str {
    match kind {
        AccountKind::CreditCard => CARD_LEDGER_PATH,
        AccountKind::Checking | AccountKind::Depot => CHECKING_LEDGER_PATH,
    }
}

/// Body of a poll answer: `{"state": "..."}`.
#[derive(Debug, serde::Deserialize)]
struct PollState {
    state: Option<String>,
}

// ---------------------------------------------------------------------------
// Surface
// ---------------------------------------------------------------------------

/// Legacy web banking surface.
pub struct WebSurface {
    base: Url,
}

impl WebSurface {
    pub fn new(base: Url) -> Self {
        Self { base }
    }

    fn url(&self, path: &str, step: Step) -> BankResult<Url> {
        join_url(&self.base, path, step)
    }

    fn expect_success(resp: &HttpResponse, step: Step) -> BankResult<()> {
        if resp.is_success() {
            Ok(())
        } else {
            Err(BankError::UnexpectedStatus {
                step,
                status: resp.status.as_u16(),
            })
        }
    }

    /// A page bounced back to the login form means the server dropped the
    /// session.
    fn expect_logged_in(resp: &HttpResponse, step: Step) -> BankResult<()> {
        Self::expect_success(resp, step)?;
        if has_login_form(&resp.text())? {
            return Err(BankError::SessionExpired { step });
        }
        Ok(())
    }

    async fn get_page(&self, session: &Session, url: Url, step: Step) -> BankResult<HttpResponse> {
        let req = session.apply(HttpRequest::get(url))?;
        let resp = session.send(req, step).await?;
        Self::expect_logged_in(&resp, step)?;
        Ok(resp)
    }
}

#[async_trait]
impl CredentialHandshake for WebSurface {
    async fn authenticate(
        &self,
        session: &mut Session,
        credentials: &Credentials,
    ) -> BankResult<HandshakeOutcome> {
        let login_url = self.url(LOGIN_PATH, Step::LoginPage)?;
        let page = session
            .send_anonymous(HttpRequest::get(login_url.clone()), Step::LoginPage)
            .await?;
        Self::expect_success(&page, Step::LoginPage)?;
        let form = parse_login_form(&page.text())?;
        debug!(action = ?form.action, "Login form parsed");

        let submit_url = match &form.action {
            Some(action) => join_url(&page.url, action, Step::LoginPage)?,
            None => login_url,
        };
        let submit = HttpRequest::post_form(
            submit_url,
            [
                (FIELD_SESSION_ID, form.session_id.as_str()),
                (FIELD_LOGIN_TOKEN, form.token.as_str()),
                ("j_username", credentials.username.as_str()),
                ("j_password", credentials.password.expose_secret().as_str()),
            ],
        );
        let resp = session.send_anonymous(submit, Step::CredentialSubmit).await?;
        check_credential_status(&resp)?;

        let body = resp.text();
        if has_login_form(&body)? {
            return Err(BankError::AmbiguousCredentials {
                step: Step::CredentialSubmit,
            });
        }
        let (token, action) = parse_confirmation(&body)?;
        let confirmation = join_url(&resp.url, &action, Step::CredentialSubmit)?;

        session.rotate(SecretString::new(token.clone()));
        info!(surface = SURFACE_NAME, "Credentials accepted, app confirmation required");

        Ok(HandshakeOutcome {
            confirmation_target: confirmation.to_string(),
            anti_forgery_token: SecretString::new(token),
            mfa_correlation_id: None,
            bootstrap_access_token: None,
        })
    }
}

#[async_trait]
impl ChallengeBackend for WebSurface {
    async fn list_methods(
        &self,
        _session: &Session,
        _outcome: &HandshakeOutcome,
    ) -> BankResult<Vec<MfaMethod>> {
        Ok(vec![MfaMethod {
            id: APP_METHOD_ID.to_string(),
            device_label: "banking app".to_string(),
            method_type: APP_METHOD_ID.to_string(),
            enrolled_at: None,
            locked: false,
            remaining_attempts: None,
            preferred: true,
        }])
    }

    async fn create_challenge(
        &self,
        _session: &Session,
        outcome: &HandshakeOutcome,
        method: &MfaMethod,
    ) -> BankResult<MfaChallenge> {
        // Rendering the confirmation page already pushed the request to the app.
        Ok(MfaChallenge {
            id: outcome.confirmation_target.clone(),
            method_id: method.id.clone(),
            correlation_id: outcome.mfa_correlation_id.clone(),
            status: ChallengeStatus::Pending,
        })
    }

    async fn poll_challenge(
        &self,
        session: &Session,
        challenge: &MfaChallenge,
        tick: u32,
    ) -> BankResult<ChallengeStatus> {
        let poll_id = Utc::now().timestamp_millis() * 1000 + i64::from(tick);
        let req = session.apply(HttpRequest::get(poll_url(&challenge.id, poll_id)?))?;
        let resp = session.send(req, Step::ChallengePoll).await?;
        Self::expect_success(&resp, Step::ChallengePoll)?;

        let body: PollState = resp
            .json()
            .map_err(|e| BankError::decode(Step::ChallengePoll, e))?;
        let raw = body
            .state
            .ok_or_else(|| BankError::missing(Step::ChallengePoll, "state"))?;
        Ok(ChallengeStatus::normalize(&raw))
    }

    async fn finalize(
        &self,
        session: &mut Session,
        _outcome: &HandshakeOutcome,
        challenge: &MfaChallenge,
    ) -> BankResult<()> {
        let url = Url::parse(&challenge.id).map_err(|e| BankError::decode(Step::Finalize, e))?;
        let token = session.current_token()?.expose_secret().clone();
        let req = session.apply(HttpRequest::post_form(
            url,
            [("$event", "next"), (FIELD_XSRF, token.as_str())],
        ))?;
        let resp = session.send(req, Step::Finalize).await?;
        if !resp.is_success() {
            return Err(BankError::FinalizationFailed {
                status: resp.status.as_u16(),
            });
        }

        if let Some(next) = parse_xsrf(&resp.text(), Step::Finalize)? {
            if next != token {
                session.rotate(SecretString::new(next));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerSource for WebSurface {
    async fn accounts(&self, session: &Session) -> BankResult<Vec<AccountSummary>> {
        let resp = self
            .get_page(session, self.url(OVERVIEW_PATH, Step::Overview)?, Step::Overview)
            .await?;
        let accounts = parse_overview(&resp.text())?;
        info!(count = accounts.len(), "Parsed financial status overview");
        Ok(accounts)
    }

    async fn transactions(
        &self,
        session: &Session,
        account: &AccountSummary,
        range: &DateRange,
    ) -> BankResult<LedgerBatch> {
        // 1. Account page: which account the search form has selected
        let page = self
            .get_page(
                session,
                self.url(&account.transaction_ref, Step::TransactionSearch)?,
                Step::TransactionSearch,
            )
            .await?;
        let selected = parse_selected_account(&page.text())?;

        // 2. Search with the requested period
        let ledger_url = self.url(ledger_path(account.kind), Step::TransactionSearch)?;
        let from = format_date(range.from);
        let to = format_date(range.to);
        let search = session.apply(HttpRequest::post_form(
            ledger_url.clone(),
            [
                ("slTransactionStatus", "0"),
                ("slSearchPeriod", "1"),
                ("searchPeriodRadio", "1"),
                ("transactionDate", from.as_str()),
                ("toTransactionDate", to.as_str()),
                ("$event", "search"),
                (FIELD_ACCOUNT_SELECT, selected.as_str()),
            ],
        ))?;
        let resp = session.send(search, Step::TransactionSearch).await?;
        Self::expect_logged_in(&resp, Step::TransactionSearch)?;

        // 3. Export the result
        let mut export_url = ledger_url;
        export_url.set_query(Some("$event=csvExport"));
        let export = self.get_page(session, export_url, Step::TransactionExport).await?;
        debug!(
            account = %account.identifier,
            bytes = export.body.len(),
            "Downloaded CSV export"
        );

        parse_export(&export.body, account.kind, &account.identifier)
    }
}

impl Surface for WebSurface {
    fn name(&self) -> &str {
        SURFACE_NAME
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
