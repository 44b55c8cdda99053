//! Structured JSON:API banking surface.
//!
//! Endpoints on the `banking` host:
//! - `GET  /login`                      sets the `__Host-xsrf` cookie
//! - `POST /api/token`                  `banking_user_sca` grant, then `banking_user_mfa`
//! - `GET  /api/mfa/mfa/methods`        enrolled seal_one devices
//! - `POST /api/mfa/mfa/challenges`     out-of-band challenge
//! - `GET  /api/mfa/mfa/challenges/{id}` verification status
//! - `GET  /api/accounts/accounts`, `/api/credit-card/cards`,
//!   `/api/broker/brokerage-accounts`   overview
//!
//! Every authenticated request carries the `x-xsrf-token` header; session
//! cookies come from the jar. Reads are stateless, so the client may issue
//! them concurrently.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::{StatusCode, Url};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use secrecy::{ExposeSecret, SecretString};
use std::str::FromStr;
use tracing::{debug, info};

use super::{join_url, Surface};
use crate::handshake::{check_credential_status, CredentialHandshake, Credentials, HandshakeOutcome};
use crate::ledger::{DateRange, LedgerBatch, LedgerSource};
use crate::mfa::ChallengeBackend;
use crate::session::{Session, XSRF_COOKIE};
use crate::transport::{HttpRequest, HttpResponse};
use crate::types::{
    AccountKind, AccountSummary, BankError, BankResult, ChallengeStatus, MfaChallenge, MfaMethod,
    ReferenceCodes, Step, TransactionRecord,
};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

pub const DEFAULT_API_BASE: &str = "https://banking.dkb.de";
const SURFACE_NAME: &str = "api";

const LOGIN_PATH: &str = "/login";
const TOKEN_PATH: &str = "/api/token";
const METHODS_PATH: &str = "/api/mfa/mfa/methods?filter%5BmethodType%5D=seal_one";
const CHALLENGES_PATH: &str = "/api/mfa/mfa/challenges";
const ACCOUNTS_PATH: &str = "/api/accounts/accounts";
const CARDS_PATH: &str = "/api/credit-card/cards";
const BROKERAGE_PATH: &str = "/api/broker/brokerage-accounts";

const JSON_API: &str = "application/vnd.api+json";
const METHOD_TYPE: &str = "seal_one";
const CHALLENGE_TYPE: &str = "mfa-challenge";
const CARD_TYPE: &str = "creditCard";

// ---------------------------------------------------------------------------
// API types (JSON:API → Rust)
// ---------------------------------------------------------------------------

/// `/api/token` answer. Only the fields we use.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    mfa_id: Option<String>,
    /// Seconds.
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Document<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct Single<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct MethodResource {
    id: String,
    attributes: MethodAttributes,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MethodAttributes {
    #[serde(default)]
    method_type: String,
    #[serde(default)]
    device_name: String,
    #[serde(default)]
    locked: bool,
    #[serde(default)]
    remaining_validation_attempts: Option<u32>,
    #[serde(default)]
    enrolled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    preferred_device: bool,
}

impl From<MethodResource> for MfaMethod {
    fn from(r: MethodResource) -> Self {
        MfaMethod {
            id: r.id,
            device_label: r.attributes.device_name,
            method_type: r.attributes.method_type,
            enrolled_at: r.attributes.enrolled_at,
            locked: r.attributes.locked,
            remaining_attempts: r.attributes.remaining_validation_attempts,
            preferred: r.attributes.preferred_device,
        }
    }
}

/// Challenge POST body.
#[derive(Debug, Serialize)]
struct ChallengeRequest<'a> {
    data: ChallengeRequestData<'a>,
}

#[derive(Debug, Serialize)]
struct ChallengeRequestData<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    attributes: ChallengeRequestAttributes<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChallengeRequestAttributes<'a> {
    method_id: &'a str,
    method_type: &'a str,
    mfa_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChallengeResource {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    attributes: Option<ChallengeAttributes>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChallengeAttributes {
    #[serde(default)]
    verification_status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Money {
    value: String,
    #[serde(default)]
    currency_code: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NamedProduct {
    #[serde(default)]
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AccountResource {
    id: String,
    attributes: AccountAttributes,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountAttributes {
    iban: String,
    #[serde(default)]
    holder_name: Option<String>,
    #[serde(default)]
    product: Option<NamedProduct>,
    #[serde(default)]
    balance: Option<Money>,
    #[serde(default)]
    updated_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CardResource {
    id: String,
    #[serde(rename = "type", default)]
    kind: String,
    attributes: CardAttributes,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CardAttributes {
    masked_pan: String,
    #[serde(default)]
    product: Option<NamedProduct>,
    #[serde(default)]
    balance: Option<Money>,
}

#[derive(Debug, Deserialize)]
struct BrokerageResource {
    id: String,
    #[serde(default)]
    attributes: BrokerageAttributes,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BrokerageAttributes {
    #[serde(default)]
    depot_account_id: Option<String>,
    #[serde(default)]
    holder_name: Option<String>,
}

/// Counterparty block of a checking transaction.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Party {
    #[serde(default)]
    name: Option<String>,
    #[serde(default, alias = "creditorAccount", alias = "debtorAccount")]
    account: Option<PartyAccount>,
    #[serde(default)]
    agent: Option<PartyAgent>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartyAccount {
    #[serde(default)]
    iban: Option<String>,
    #[serde(default)]
    account_number: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartyAgent {
    #[serde(default)]
    bic: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckingAttributes {
    booking_date: NaiveDate,
    #[serde(default)]
    value_date: Option<NaiveDate>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    transaction_type: String,
    amount: Money,
    #[serde(default)]
    creditor: Party,
    #[serde(default)]
    debtor: Party,
    #[serde(default)]
    creditor_id: Option<String>,
    #[serde(default)]
    mandate_id: Option<String>,
    #[serde(default)]
    end_to_end_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CardTransactionAttributes {
    #[serde(default)]
    status: String,
    #[serde(default)]
    booking_date: Option<NaiveDate>,
    /// Timestamp, date part used when there is no booking date yet.
    #[serde(default)]
    authorization_date: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    transaction_type: String,
    amount: Money,
}

#[derive(Debug, Deserialize)]
struct Item<A> {
    attributes: A,
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

fn decimal(raw: &str) -> BankResult<Decimal> {
    Decimal::from_str(raw.trim()).map_err(|_| BankError::AmountParse {
        raw: raw.to_string(),
    })
}

/// First ten characters of an ISO timestamp as a date.
fn iso_date(raw: &str) -> BankResult<NaiveDate> {
    raw.get(..10)
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        .ok_or_else(|| BankError::DateParse {
            raw: raw.to_string(),
        })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn attributes<A: DeserializeOwned>(item: &serde_json::Value, line: u64) -> BankResult<A> {
    serde_json::from_value::<Item<A>>(item.clone())
        .map(|i| i.attributes)
        .map_err(|e| BankError::RecordDecode {
            line,
            message: e.to_string(),
        })
}

/// Checking-account transaction. The counterpart is the creditor for
/// debits and the debtor for credits.
pub(crate) fn decode_checking_transaction(
    item: &serde_json::Value,
    line: u64,
) -> BankResult<TransactionRecord> {
    let a: CheckingAttributes = attributes(item, line)?;
    let amount = decimal(&a.amount.value)?;
    let party = if amount.is_sign_negative() { a.creditor } else { a.debtor };
    let account = party.account.unwrap_or_default();

    Ok(TransactionRecord {
        booking_date: a.booking_date,
        value_date: a.value_date.unwrap_or(a.booking_date),
        counterpart: party.name.unwrap_or_default(),
        purpose: a.description,
        amount,
        currency: a.amount.currency_code.unwrap_or_else(|| "EUR".to_string()),
        posting_text: a.transaction_type,
        settled: None,
        references: ReferenceCodes {
            account_number: non_empty(account.iban.or(account.account_number)),
            bank_code: non_empty(party.agent.and_then(|g| g.bic)),
            creditor_id: non_empty(a.creditor_id),
            mandate_reference: non_empty(a.mandate_id),
            customer_reference: None,
            end_to_end_id: non_empty(a.end_to_end_id),
        },
    })
}

/// Credit-card transaction. Authorized-but-unbooked rows are kept with
/// `settled = Some(false)`.
pub(crate) fn decode_card_transaction(
    item: &serde_json::Value,
    line: u64,
) -> BankResult<TransactionRecord> {
    let a: CardTransactionAttributes = attributes(item, line)?;
    let authorized = a.authorization_date.as_deref().map(iso_date).transpose()?;
    let booking_date = match (a.booking_date, authorized) {
        (Some(booked), _) => booked,
        (None, Some(authorized)) => authorized,
        (None, None) => {
            return Err(BankError::RecordDecode {
                line,
                message: "neither bookingDate nor authorizationDate".to_string(),
            })
        }
    };

    Ok(TransactionRecord {
        booking_date,
        value_date: booking_date,
        counterpart: a.description.clone(),
        purpose: a.description,
        amount: decimal(&a.amount.value)?,
        currency: a.amount.currency_code.unwrap_or_else(|| "EUR".to_string()),
        posting_text: a.transaction_type,
        settled: Some(a.status.eq_ignore_ascii_case("booked")),
        references: ReferenceCodes::default(),
    })
}

/// Decode a transaction document item by item.
pub(crate) fn decode_transactions(
    body: &[u8],
    kind: AccountKind,
    account: &str,
) -> BankResult<LedgerBatch> {
    let doc: Document<serde_json::Value> =
        serde_json::from_slice(body).map_err(|e| BankError::decode(Step::TransactionExport, e))?;

    let mut batch = LedgerBatch::new(account);
    for (index, item) in doc.data.iter().enumerate() {
        let line = index as u64 + 1;
        let decoded = match kind {
            AccountKind::CreditCard => decode_card_transaction(item, line),
            AccountKind::Checking | AccountKind::Depot => decode_checking_transaction(item, line),
        };
        batch.accept(line, || item.to_string(), decoded)?;
    }
    Ok(batch)
}

fn balance_of(money: Option<&Money>) -> Option<Decimal> {
    money.and_then(|m| decimal(&m.value).ok())
}

// ---------------------------------------------------------------------------
// Surface
// ---------------------------------------------------------------------------

/// JSON:API banking surface.
pub struct ApiSurface {
    base: Url,
}

impl ApiSurface {
    pub fn new(base: Url) -> Self {
        Self { base }
    }

    fn url(&self, path: &str, step: Step) -> BankResult<Url> {
        join_url(&self.base, path, step)
    }

    /// Status of an authenticated read: 401 ends the session.
    fn check_read(resp: &HttpResponse, step: Step) -> BankResult<()> {
        if resp.status == StatusCode::UNAUTHORIZED {
            return Err(BankError::SessionExpired { step });
        }
        if !resp.is_success() {
            return Err(BankError::UnexpectedStatus {
                step,
                status: resp.status.as_u16(),
            });
        }
        Ok(())
    }

    async fn get(&self, session: &Session, url: Url, step: Step) -> BankResult<HttpResponse> {
        let req = session.apply(HttpRequest::get(url).with_header("accept", JSON_API))?;
        let resp = session.send(req, step).await?;
        Self::check_read(&resp, step)?;
        Ok(resp)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        session: &Session,
        path: &str,
        step: Step,
    ) -> BankResult<T> {
        let resp = self.get(session, self.url(path, step)?, step).await?;
        resp.json().map_err(|e| BankError::decode(step, e))
    }

    /// POST a grant to the token endpoint.
    async fn grant(
        &self,
        session: &Session,
        fields: Vec<(&str, &str)>,
        step: Step,
    ) -> BankResult<HttpResponse> {
        let req = session.apply(HttpRequest::post_form(self.url(TOKEN_PATH, step)?, fields))?;
        session.send(req, step).await
    }

    async fn checking_accounts(&self, session: &Session) -> BankResult<Vec<AccountSummary>> {
        let doc: Document<AccountResource> =
            self.get_json(session, ACCOUNTS_PATH, Step::Overview).await?;
        Ok(doc
            .data
            .into_iter()
            .map(|r| {
                let a = r.attributes;
                AccountSummary {
                    display_name: a
                        .product
                        .and_then(|p| p.display_name)
                        .or(a.holder_name)
                        .unwrap_or_default(),
                    identifier: a.iban,
                    kind: AccountKind::Checking,
                    transaction_ref: format!("{ACCOUNTS_PATH}/{}/transactions", r.id),
                    balance: balance_of(a.balance.as_ref()),
                    balance_date: a.updated_at.as_deref().and_then(|d| iso_date(d).ok()),
                }
            })
            .collect())
    }

    async fn credit_cards(&self, session: &Session) -> BankResult<Vec<AccountSummary>> {
        let doc: Document<CardResource> = self.get_json(session, CARDS_PATH, Step::Overview).await?;
        Ok(doc
            .data
            .into_iter()
            .filter(|r| r.kind == CARD_TYPE)
            .map(|r| AccountSummary {
                display_name: r
                    .attributes
                    .product
                    .and_then(|p| p.display_name)
                    .unwrap_or_default(),
                identifier: r.attributes.masked_pan,
                kind: AccountKind::CreditCard,
                transaction_ref: format!("{CARDS_PATH}/{}/transactions", r.id),
                balance: balance_of(r.attributes.balance.as_ref()),
                balance_date: None,
            })
            .collect())
    }

    async fn depots(&self, session: &Session) -> BankResult<Vec<AccountSummary>> {
        let doc: Document<BrokerageResource> =
            self.get_json(session, BROKERAGE_PATH, Step::Overview).await?;
        Ok(doc
            .data
            .into_iter()
            .map(|r| AccountSummary {
                display_name: r.attributes.holder_name.unwrap_or_else(|| "Depot".to_string()),
                identifier: r.attributes.depot_account_id.unwrap_or_else(|| r.id.clone()),
                kind: AccountKind::Depot,
                transaction_ref: format!("{BROKERAGE_PATH}/{}", r.id),
                balance: None,
                balance_date: None,
            })
            .collect())
    }
}

#[async_trait]
impl CredentialHandshake for ApiSurface {
    async fn authenticate(
        &self,
        session: &mut Session,
        credentials: &Credentials,
    ) -> BankResult<HandshakeOutcome> {
        // 1. Bootstrap the anti-forgery cookie
        let step = Step::AntiForgeryBootstrap;
        let resp = session
            .send_anonymous(HttpRequest::get(self.url(LOGIN_PATH, step)?), step)
            .await?;
        if !resp.is_success() {
            return Err(BankError::UnexpectedStatus {
                step,
                status: resp.status.as_u16(),
            });
        }
        session.refresh_from_cookie(&self.base, XSRF_COOKIE);
        if session.current_token().is_err() {
            return Err(BankError::missing(step, XSRF_COOKIE));
        }

        // 2. Primary factor
        let resp = self
            .grant(
                session,
                vec![
                    ("grant_type", "banking_user_sca"),
                    ("sca_type", "web-login"),
                    ("username", credentials.username.as_str()),
                    ("password", credentials.password.expose_secret().as_str()),
                ],
                Step::CredentialSubmit,
            )
            .await?;
        check_credential_status(&resp)?;

        let token: TokenResponse = resp
            .json()
            .map_err(|e| BankError::decode(Step::CredentialSubmit, e))?;
        let mfa_id = token
            .mfa_id
            .filter(|v| !v.is_empty())
            .ok_or_else(|| BankError::missing(Step::CredentialSubmit, "mfa_id"))?;
        let access_token = token
            .access_token
            .filter(|v| !v.is_empty())
            .ok_or_else(|| BankError::missing(Step::CredentialSubmit, "access_token"))?;

        session.set_correlation_id(mfa_id.clone());
        session.set_access_token(SecretString::new(access_token.clone()), token.expires_in);
        session.refresh_from_cookie(&self.base, XSRF_COOKIE);
        info!(surface = SURFACE_NAME, "Credentials accepted, MFA required");

        Ok(HandshakeOutcome {
            confirmation_target: self.url(CHALLENGES_PATH, Step::CredentialSubmit)?.to_string(),
            anti_forgery_token: SecretString::new(session.current_token()?.expose_secret().clone()),
            mfa_correlation_id: Some(mfa_id),
            bootstrap_access_token: Some(SecretString::new(access_token)),
        })
    }
}

#[async_trait]
impl ChallengeBackend for ApiSurface {
    async fn list_methods(
        &self,
        session: &Session,
        _outcome: &HandshakeOutcome,
    ) -> BankResult<Vec<MfaMethod>> {
        let doc: Document<MethodResource> =
            self.get_json(session, METHODS_PATH, Step::MfaMethods).await?;
        Ok(doc.data.into_iter().map(MfaMethod::from).collect())
    }

    async fn create_challenge(
        &self,
        session: &Session,
        outcome: &HandshakeOutcome,
        method: &MfaMethod,
    ) -> BankResult<MfaChallenge> {
        let step = Step::ChallengeCreate;
        let mfa_id = session
            .correlation_id()
            .or(outcome.mfa_correlation_id.as_deref())
            .ok_or_else(|| BankError::missing(step, "mfa_id"))?
            .to_string();

        let method_type = if method.method_type.is_empty() {
            METHOD_TYPE
        } else {
            method.method_type.as_str()
        };
        let body = serde_json::to_vec(&ChallengeRequest {
            data: ChallengeRequestData {
                kind: CHALLENGE_TYPE,
                attributes: ChallengeRequestAttributes {
                    method_id: &method.id,
                    method_type,
                    mfa_id: &mfa_id,
                },
            },
        })
        .map_err(|e| BankError::decode(step, e))?;

        let url = Url::parse(&outcome.confirmation_target).map_err(|e| BankError::decode(step, e))?;
        let req = session.apply(
            HttpRequest::post_raw(url, JSON_API, body).with_header("accept", JSON_API),
        )?;
        let resp = session.send(req, step).await?;
        Self::check_read(&resp, step)?;

        let created: Single<ChallengeResource> =
            resp.json().map_err(|e| BankError::decode(step, e))?;
        let id = created
            .data
            .id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| BankError::missing(step, "data.id"))?;
        let status = created
            .data
            .attributes
            .and_then(|a| a.verification_status)
            .map(|s| ChallengeStatus::normalize(&s))
            .unwrap_or(ChallengeStatus::Pending);

        Ok(MfaChallenge {
            id,
            method_id: method.id.clone(),
            correlation_id: Some(mfa_id),
            status,
        })
    }

    async fn poll_challenge(
        &self,
        session: &Session,
        challenge: &MfaChallenge,
        tick: u32,
    ) -> BankResult<ChallengeStatus> {
        let step = Step::ChallengePoll;
        let path = format!("{CHALLENGES_PATH}/{}", urlencoding::encode(&challenge.id));
        let polled: Single<ChallengeResource> = self.get_json(session, &path, step).await?;
        let raw = polled
            .data
            .attributes
            .and_then(|a| a.verification_status)
            .ok_or_else(|| BankError::missing(step, "verificationStatus"))?;
        debug!(tick, status = %raw, "Challenge status");
        Ok(ChallengeStatus::normalize(&raw))
    }

    async fn finalize(
        &self,
        session: &mut Session,
        outcome: &HandshakeOutcome,
        challenge: &MfaChallenge,
    ) -> BankResult<()> {
        let step = Step::Finalize;
        let mfa_id = challenge
            .correlation_id
            .clone()
            .ok_or_else(|| BankError::missing(step, "mfa_id"))?;
        let bootstrap = session
            .access_token()
            .or(outcome.bootstrap_access_token.as_ref())
            .map(|t| t.expose_secret().clone())
            .ok_or_else(|| BankError::missing(step, "access_token"))?;

        let resp = self
            .grant(
                session,
                vec![
                    ("grant_type", "banking_user_mfa"),
                    ("mfa_id", mfa_id.as_str()),
                    ("access_token", bootstrap.as_str()),
                ],
                step,
            )
            .await?;
        if !resp.is_success() {
            return Err(BankError::FinalizationFailed {
                status: resp.status.as_u16(),
            });
        }

        let token: TokenResponse = resp.json().map_err(|e| BankError::decode(step, e))?;
        if let Some(access) = token.access_token.filter(|v| !v.is_empty()) {
            session.set_access_token(SecretString::new(access), token.expires_in);
        }
        session.refresh_from_cookie(&self.base, XSRF_COOKIE);
        Ok(())
    }
}

#[async_trait]
impl LedgerSource for ApiSurface {
    async fn accounts(&self, session: &Session) -> BankResult<Vec<AccountSummary>> {
        session.ensure_not_expired(Step::Overview)?;
        let (mut accounts, cards, depots) = futures::try_join!(
            self.checking_accounts(session),
            self.credit_cards(session),
            self.depots(session),
        )?;
        accounts.extend(cards);
        accounts.extend(depots);
        info!(count = accounts.len(), "Fetched account overview");
        Ok(accounts)
    }

    async fn transactions(
        &self,
        session: &Session,
        account: &AccountSummary,
        range: &DateRange,
    ) -> BankResult<LedgerBatch> {
        let step = Step::TransactionExport;
        session.ensure_not_expired(step)?;

        let mut url = self.url(&account.transaction_ref, step)?;
        url.set_query(Some(&format!(
            "{}={}&{}={}",
            urlencoding::encode("filter[bookingDate][GE]"),
            range.from.format("%Y-%m-%d"),
            urlencoding::encode("filter[bookingDate][LE]"),
            range.to.format("%Y-%m-%d"),
        )));
        let resp = self.get(session, url, step).await?;

        let batch = decode_transactions(&resp.body, account.kind, &account.identifier)?;
        debug!(
            account = %account.identifier,
            records = batch.records.len(),
            skipped = batch.skipped.len(),
            "Decoded transactions"
        );
        Ok(batch)
    }

    fn stateless_reads(&self) -> bool {
        true
    }
}

impl Surface for ApiSurface {
    fn name(&self) -> &str {
        SURFACE_NAME
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
