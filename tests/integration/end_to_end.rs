//! Full login and export runs against the in-memory bank.

use chrono::NaiveDate;
use rust_decimal_macros::dec;
use secrecy::ExposeSecret;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

use bankfetch::client::BankClient;
use bankfetch::handshake::Credentials;
use bankfetch::ledger::DateRange;
use bankfetch::mfa::{MethodSelection, MfaState, PollPolicy};
use bankfetch::surfaces::api::ApiSurface;
use bankfetch::surfaces::web::WebSurface;
use bankfetch::types::{AccountKind, BankError};

use crate::fake_bank::{base_url, FakeBank, CONFIRM_PATH, PASSWORD, USERNAME};

fn fast_policy(max_attempts: u32) -> PollPolicy {
    PollPolicy {
        interval: Duration::from_millis(5),
        max_attempts,
        deadline: None,
    }
}

fn march() -> DateRange {
    DateRange::new(
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
        NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
    )
    .unwrap()
}

fn credentials() -> Credentials {
    Credentials::new(USERNAME, PASSWORD)
}

// ---------------------------------------------------------------------------
// Legacy web surface
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_web_login_and_checking_export() {
    let bank = Arc::new(FakeBank::new(3));
    let mut client = BankClient::new(
        WebSurface::new(base_url()),
        bank.clone(),
        MethodSelection::LatestEnrolled,
        fast_policy(10),
    );

    let challenge = assert_ok!(client.login(&credentials()).await);
    assert!(challenge.id.ends_with(CONFIRM_PATH));
    assert_eq!(bank.polls(), 3);
    assert_eq!(bank.finalized(), 1);
    assert_eq!(client.mfa_state(), MfaState::Confirmed);
    assert!(client.is_logged_in());

    // Token from the confirmation page, then the one issued on finalize
    assert_eq!(client.session().generation(), 2);
    assert_eq!(client.session().current_token().unwrap().expose_secret(), "web-xsrf-2");

    let accounts = assert_ok!(client.accounts().await);
    assert_eq!(accounts.len(), 2);
    assert_eq!(accounts[0].kind, AccountKind::Checking);
    assert_eq!(accounts[0].identifier, "DE02120300000000202051");
    assert_eq!(accounts[0].balance, Some(dec!(1265.44)));
    assert_eq!(accounts[1].kind, AccountKind::Depot);

    let batches = assert_ok!(client.fetch_ledgers(&accounts, &march()).await);
    assert_eq!(batches.len(), 1);
    let batch = &batches[0];
    assert_eq!(batch.account, "DE02120300000000202051");
    assert!(batch.is_complete());
    assert_eq!(batch.records.len(), 2);

    assert_eq!(batch.records[0].amount, dec!(-1234.56));
    assert_eq!(batch.records[0].counterpart, "Stadtwerke Köln");
    assert_eq!(batch.records[0].purpose, "Abschlag März");
    assert_eq!(batch.records[1].amount, dec!(2500.00));
    assert_eq!(batch.records[1].counterpart, "ACME GmbH");

    assert_eq!(bank.search_field("transactionDate").as_deref(), Some("01.03.2024"));
    assert_eq!(bank.search_field("toTransactionDate").as_deref(), Some("31.03.2024"));
    assert_eq!(bank.search_field("slAllAccounts").as_deref(), Some("0"));
    assert!(!bank.requests().iter().any(|r| r.contains("depotstatus")));
}

#[tokio::test]
async fn test_web_rerendered_login_is_ambiguous() {
    let bank = Arc::new(FakeBank::new(1));
    let mut client = BankClient::new(
        WebSurface::new(base_url()),
        bank.clone(),
        MethodSelection::LatestEnrolled,
        fast_policy(3),
    );

    let err = assert_err!(client.login(&Credentials::new(USERNAME, "wrong")).await);
    assert!(matches!(err, BankError::AmbiguousCredentials { .. }));
    assert!(err.is_user_actionable());
    assert_eq!(bank.polls(), 0);
    assert!(!client.is_logged_in());
}

#[tokio::test]
async fn test_web_unconfirmed_challenge_times_out_without_finalize() {
    let bank = Arc::new(FakeBank::new(u32::MAX));
    let mut client = BankClient::new(
        WebSurface::new(base_url()),
        bank.clone(),
        MethodSelection::LatestEnrolled,
        fast_policy(3),
    );

    let err = assert_err!(client.login(&credentials()).await);
    assert!(matches!(err, BankError::TimedOut { attempts: 3, .. }));
    assert_eq!(client.mfa_state(), MfaState::TimedOut);
    assert_eq!(bank.polls(), 3);
    assert_eq!(bank.finalized(), 0);

    let err = assert_err!(client.accounts().await);
    assert!(matches!(err, BankError::NotAuthenticated));
}

// ---------------------------------------------------------------------------
// JSON:API surface
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_api_login_and_all_ledgers() {
    let bank = Arc::new(FakeBank::new(2));
    let mut client = BankClient::new(
        ApiSurface::new(base_url()),
        bank.clone(),
        MethodSelection::LatestEnrolled,
        fast_policy(10),
    );

    let challenge = assert_ok!(client.login(&credentials()).await);
    assert_eq!(challenge.id, "c-1");
    assert_eq!(challenge.method_id, "m-new");
    assert_eq!(challenge.correlation_id.as_deref(), Some("mfa-1"));
    assert_eq!(bank.polls(), 2);
    assert_eq!(bank.finalized(), 1);
    assert_eq!(
        client.session().access_token().unwrap().expose_secret(),
        "access-2"
    );

    let accounts = assert_ok!(client.accounts().await);
    let kinds: Vec<AccountKind> = accounts.iter().map(|a| a.kind).collect();
    assert_eq!(
        kinds,
        vec![AccountKind::Checking, AccountKind::CreditCard, AccountKind::Depot]
    );
    assert_eq!(accounts[1].identifier, "4748********1234");

    let batches = assert_ok!(client.fetch_ledgers(&accounts, &march()).await);
    assert_eq!(batches.len(), 2);

    let checking = &batches[0];
    assert!(checking.is_complete());
    assert_eq!(checking.records.len(), 2);
    assert_eq!(checking.records[0].amount, dec!(-1234.56));
    assert_eq!(checking.records[0].counterpart, "Stadtwerke Köln");
    assert_eq!(
        checking.records[0].references.account_number.as_deref(),
        Some("DE89370400440532013000")
    );
    assert_eq!(checking.records[1].counterpart, "ACME GmbH");

    let card = &batches[1];
    assert_eq!(card.records.len(), 1);
    assert_eq!(card.records[0].settled, Some(true));
    assert_eq!(card.skipped.len(), 1);
    assert_eq!(card.skipped[0].line, 2);
    assert!(card.skipped[0].reason.contains("twelve"));

    assert!(!bank.requests().iter().any(|r| r.contains("brokerage-accounts/b-1")));
}

#[tokio::test]
async fn test_api_wrong_password_is_rejected() {
    let bank = Arc::new(FakeBank::new(1));
    let mut client = BankClient::new(
        ApiSurface::new(base_url()),
        bank.clone(),
        MethodSelection::LatestEnrolled,
        fast_policy(3),
    );

    let err = assert_err!(client.login(&Credentials::new(USERNAME, "wrong")).await);
    assert!(matches!(err, BankError::CredentialsRejected { status: 401, .. }));
    assert_eq!(bank.polls(), 0);
}

#[tokio::test]
async fn test_api_explicit_method_choice_is_sent() {
    let bank = Arc::new(FakeBank::new(1));
    // Index 1 is the older device in server order, which the bank refuses.
    let mut client = BankClient::new(
        ApiSurface::new(base_url()),
        bank.clone(),
        MethodSelection::Index(1),
        fast_policy(3),
    );

    let err = assert_err!(client.login(&credentials()).await);
    assert!(matches!(err, BankError::UnexpectedStatus { status: 422, .. }));
    assert_eq!(bank.polls(), 0);
}

#[tokio::test]
async fn test_api_deadline_cancels_polling() {
    let bank = Arc::new(FakeBank::new(u32::MAX));
    let policy = PollPolicy {
        interval: Duration::from_millis(20),
        max_attempts: 1_000,
        deadline: None,
    }
    .with_deadline(tokio::time::Instant::now() + Duration::from_millis(150));
    let mut client = BankClient::new(
        ApiSurface::new(base_url()),
        bank.clone(),
        MethodSelection::LatestEnrolled,
        policy,
    );

    let err = assert_err!(client.login(&credentials()).await);
    assert!(matches!(err, BankError::Cancelled { .. }));
    assert_eq!(client.mfa_state(), MfaState::Cancelled);
    assert!(bank.polls() >= 1);
    assert_eq!(bank.finalized(), 0);
}
