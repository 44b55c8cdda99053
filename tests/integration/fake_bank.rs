//! In-memory bank for integration testing.
//!
//! Implements `Transport` and answers both surfaces (legacy pages and
//! JSON:API) from a single state. Confirmation arrives on a configurable
//! poll tick. Every request is recorded so tests can assert on what the
//! client sent.

use async_trait::async_trait;
use reqwest::{Method, StatusCode, Url};
use serde_json::{json, Value};
use std::sync::Mutex;

use bankfetch::session::{XSRF_COOKIE, XSRF_HEADER};
use bankfetch::transport::{Cookie, HttpRequest, HttpResponse, RequestBody, Transport, TransportError};

pub const USERNAME: &str = "alice";
pub const PASSWORD: &str = "correct horse";

pub const CONFIRM_PATH: &str = "/banking/confirm";
const OVERVIEW_PATH: &str =
    "/DkbTransactionBanking/content/banking/financialstatus/FinancialComposite/FinancialStatus.xhtml";

pub fn base_url() -> Url {
    Url::parse("https://bank.test").unwrap()
}

const LOGIN_PAGE: &str = r#"<html><body>
  <form id="login" action="/banking" method="post">
    <input type="hidden" name="$sID$" value="sid-42">
    <input type="hidden" name="token" value="login-token">
    <input type="text" name="j_username">
    <input type="password" name="j_password">
  </form></body></html>"#;

const OVERVIEW_PAGE: &str = r#"<html><body><table>
  <tr class="mainRow">
    <td><div class="forceWrap">Girokonto</div></td>
    <td><div class="iban">DE02 1203 0000 0000 2020 51</div></td>
    <td>31.03.2024</td>
    <td>1.265,44 EUR</td>
    <td><a class="evt-paymentTransaction" href="/banking/finanzstatus/kontoumsaetze?row=0">Umsätze</a></td>
  </tr>
  <tr class="mainRow">
    <td><div class="forceWrap">Depot</div></td>
    <td><div class="iban">501234567</div></td>
    <td>31.03.2024</td>
    <td>10.000,00 EUR</td>
    <td><a class="evt-depot" href="/banking/depotstatus?row=1">Depot</a></td>
  </tr>
</table></body></html>"#;

const ACCOUNT_PAGE: &str = r#"<html><body><form id="search">
  <select name="slAllAccounts">
    <option value="0" selected="selected">Girokonto</option>
    <option value="1">Depot</option>
  </select></form></body></html>"#;

/// Six preamble lines, header, two bookings.
const CHECKING_CSV: &str = concat!(
    "\"Kontonummer:\";\"DE02120300000000202051 / Girokonto\";\n",
    "\n",
    "\"Von:\";\"01.03.2024\";\n",
    "\"Bis:\";\"31.03.2024\";\n",
    "\"Kontostand vom 31.03.2024:\";\"1.265,44 EUR\";\n",
    "\"\";\n",
    "\"Buchungstag\";\"Wertstellung\";\"Buchungstext\";\"Auftraggeber / Begünstigter\";\"Verwendungszweck\";\"Kontonummer\";\"Bankleitzahl\";\"Betrag (EUR)\";\"Gläubiger-ID\";\"Mandatsreferenz\";\"Kundenreferenz\";\n",
    "\"04.03.2024\";\"04.03.2024\";\"Lastschrift\";\"Stadtwerke Köln\";\"Abschlag März\";\"DE89370400440532013000\";\"COBADEFFXXX\";\"-1.234,56\";\"DE98ZZZ09999999999\";\"M-42\";\"\";\n",
    "\"01.03.2024\";\"01.03.2024\";\"Gutschrift\";\"ACME GmbH\";\"Gehalt März\";\"DE44500105175407324931\";\"INGDDEFFXXX\";\"2.500,00\";\"\";\"\";\"\";\n",
);

/// Server-side state, inspectable from tests.
#[derive(Debug, Default)]
pub struct BankState {
    pub polls: u32,
    pub finalized: u32,
    pub logged_in: bool,
    pub xsrf: String,
    pub search: Vec<(String, String)>,
    pub requests: Vec<String>,
}

pub struct FakeBank {
    confirm_on: u32,
    state: Mutex<BankState>,
    cookies: Mutex<Vec<Cookie>>,
}

impl FakeBank {
    /// A bank whose app confirmation shows up on poll number `confirm_on`.
    pub fn new(confirm_on: u32) -> Self {
        Self {
            confirm_on,
            state: Mutex::new(BankState::default()),
            cookies: Mutex::new(Vec::new()),
        }
    }

    pub fn polls(&self) -> u32 {
        self.state.lock().unwrap().polls
    }

    pub fn finalized(&self) -> u32 {
        self.state.lock().unwrap().finalized
    }

    pub fn search_field(&self, name: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .search
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
    }

    pub fn requests(&self) -> Vec<String> {
        self.state.lock().unwrap().requests.clone()
    }

    fn confirmed(&self, state: &BankState) -> bool {
        state.polls >= self.confirm_on
    }

    // -- Legacy pages ----------------------------------------------------

    fn web(&self, req: &HttpRequest, state: &mut BankState) -> HttpResponse {
        let path = req.url.path();
        let query = req.url.query().unwrap_or("");
        let has_token = req.header(XSRF_HEADER) == Some(state.xsrf.as_str());

        match (req.method.clone(), path) {
            (Method::GET, "/banking") => html(&req.url, LOGIN_PAGE),
            (Method::POST, "/banking") => {
                let valid = req.form_field("$sID$") == Some("sid-42")
                    && req.form_field("token") == Some("login-token")
                    && req.form_field("j_username") == Some(USERNAME)
                    && req.form_field("j_password") == Some(PASSWORD);
                if !valid {
                    // The real site re-renders the form, with 200
                    return html(&req.url, LOGIN_PAGE);
                }
                state.xsrf = "web-xsrf-1".to_string();
                html(&req.url, &confirmation_page(&state.xsrf))
            }
            (Method::GET, CONFIRM_PATH) if query.contains("$event=pollingVerification") => {
                if !has_token {
                    return status(&req.url, StatusCode::FORBIDDEN);
                }
                state.polls += 1;
                let s = if self.confirmed(state) { "PROCESSED" } else { "PENDING" };
                respond_json(&req.url, StatusCode::OK, json!({ "state": s }))
            }
            (Method::POST, CONFIRM_PATH) => {
                let ok = self.confirmed(state)
                    && req.form_field("$event") == Some("next")
                    && req.form_field("XSRFPreventionToken") == Some(state.xsrf.as_str());
                if !ok {
                    return status(&req.url, StatusCode::BAD_REQUEST);
                }
                state.finalized += 1;
                state.logged_in = true;
                state.xsrf = "web-xsrf-2".to_string();
                html(
                    &req.url,
                    &format!(r#"<html><input type="hidden" name="XSRFPreventionToken" value="{}"></html>"#, state.xsrf),
                )
            }
            _ if !state.logged_in => html(&req.url, LOGIN_PAGE),
            (Method::GET, OVERVIEW_PATH) => html(&req.url, OVERVIEW_PAGE),
            (Method::GET, "/banking/finanzstatus/kontoumsaetze") if query.contains("csvExport") => {
                if state.search.is_empty() {
                    return status(&req.url, StatusCode::CONFLICT);
                }
                let (bytes, _, _) = encoding_rs::ISO_8859_15.encode(CHECKING_CSV);
                HttpResponse {
                    status: StatusCode::OK,
                    url: req.url.clone(),
                    body: bytes.into_owned(),
                }
            }
            (Method::GET, "/banking/finanzstatus/kontoumsaetze") => html(&req.url, ACCOUNT_PAGE),
            (Method::POST, "/banking/finanzstatus/kontoumsaetze") => {
                if let RequestBody::Form(fields) = &req.body {
                    state.search = fields.clone();
                }
                html(&req.url, "<html><body>Suchergebnis</body></html>")
            }
            _ => status(&req.url, StatusCode::NOT_FOUND),
        }
    }

    // -- JSON:API ----------------------------------------------------------

    fn api(&self, req: &HttpRequest, state: &mut BankState) -> HttpResponse {
        let url = &req.url;
        let path = url.path();

        if (req.method.clone(), path) == (Method::GET, "/login") {
            state.xsrf = "api-xsrf-1".to_string();
            *self.cookies.lock().unwrap() = vec![Cookie {
                name: XSRF_COOKIE.to_string(),
                value: state.xsrf.clone(),
            }];
            return html(url, "<html><body>app</body></html>");
        }
        if req.header(XSRF_HEADER) != Some(state.xsrf.as_str()) {
            return status(url, StatusCode::FORBIDDEN);
        }

        match (req.method.clone(), path) {
            (Method::POST, "/api/token") => match req.form_field("grant_type") {
                Some("banking_user_sca") => {
                    if req.form_field("username") != Some(USERNAME)
                        || req.form_field("password") != Some(PASSWORD)
                        || req.form_field("sca_type") != Some("web-login")
                    {
                        return respond_json(url, StatusCode::UNAUTHORIZED, json!({ "error": "invalid_grant" }));
                    }
                    respond_json(
                        url,
                        StatusCode::OK,
                        json!({ "access_token": "bootstrap-1", "mfa_id": "mfa-1", "expires_in": 300 }),
                    )
                }
                Some("banking_user_mfa") => {
                    let ok = self.confirmed(state)
                        && req.form_field("mfa_id") == Some("mfa-1")
                        && req.form_field("access_token") == Some("bootstrap-1");
                    if !ok {
                        return respond_json(url, StatusCode::BAD_REQUEST, json!({ "error": "invalid_grant" }));
                    }
                    state.finalized += 1;
                    state.logged_in = true;
                    respond_json(
                        url,
                        StatusCode::OK,
                        json!({ "access_token": "access-2", "expires_in": 600 }),
                    )
                }
                _ => status(url, StatusCode::BAD_REQUEST),
            },
            (Method::GET, "/api/mfa/mfa/methods") => respond_json(
                url,
                StatusCode::OK,
                json!({ "data": [
                    { "type": "mfa-methods", "id": "m-old", "attributes": {
                        "methodType": "seal_one", "deviceName": "Old phone",
                        "enrolledAt": "2022-01-10T09:00:00Z", "locked": false } },
                    { "type": "mfa-methods", "id": "m-new", "attributes": {
                        "methodType": "seal_one", "deviceName": "New phone",
                        "enrolledAt": "2024-02-01T09:00:00Z", "locked": false,
                        "preferredDevice": true } }
                ]}),
            ),
            (Method::POST, "/api/mfa/mfa/challenges") => {
                let body: Value = match &req.body {
                    RequestBody::Raw { bytes, .. } => serde_json::from_slice(bytes).unwrap_or(Value::Null),
                    _ => Value::Null,
                };
                let attrs = &body["data"]["attributes"];
                if body["data"]["type"] != "mfa-challenge" || attrs["mfaId"] != "mfa-1" {
                    return status(url, StatusCode::BAD_REQUEST);
                }
                if attrs["methodId"] != "m-new" {
                    // Old device was unenrolled server-side
                    return status(url, StatusCode::UNPROCESSABLE_ENTITY);
                }
                respond_json(
                    url,
                    StatusCode::CREATED,
                    json!({ "data": { "type": "mfa-challenge", "id": "c-1",
                        "attributes": { "verificationStatus": "pending" } } }),
                )
            }
            (Method::GET, "/api/mfa/mfa/challenges/c-1") => {
                state.polls += 1;
                let s = if self.confirmed(state) { "processed" } else { "pending" };
                respond_json(
                    url,
                    StatusCode::OK,
                    json!({ "data": { "id": "c-1", "attributes": { "verificationStatus": s } } }),
                )
            }
            _ if !state.logged_in => status(url, StatusCode::UNAUTHORIZED),
            (Method::GET, "/api/accounts/accounts") => respond_json(
                url,
                StatusCode::OK,
                json!({ "data": [{ "type": "account", "id": "a-1", "attributes": {
                    "iban": "DE02120300000000202051",
                    "holderName": "Alice",
                    "product": { "displayName": "Girokonto" },
                    "balance": { "currencyCode": "EUR", "value": "1265.44" },
                    "updatedAt": "2024-03-31"
                }}]}),
            ),
            (Method::GET, "/api/credit-card/cards") => respond_json(
                url,
                StatusCode::OK,
                json!({ "data": [
                    { "type": "creditCard", "id": "k-1", "attributes": {
                        "maskedPan": "4748********1234",
                        "product": { "displayName": "Visa" },
                        "balance": { "value": "-45.10", "currencyCode": "EUR" } } },
                    { "type": "debitCard", "id": "d-1", "attributes": { "maskedPan": "5168********9999" } }
                ]}),
            ),
            (Method::GET, "/api/broker/brokerage-accounts") => respond_json(
                url,
                StatusCode::OK,
                json!({ "data": [{ "type": "brokerageAccount", "id": "b-1",
                    "attributes": { "depotAccountId": "501234567" } }]}),
            ),
            (Method::GET, "/api/accounts/accounts/a-1/transactions") => {
                let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
                let from = pairs.iter().find(|(k, _)| k == "filter[bookingDate][GE]");
                if from.map(|(_, v)| v.as_str()) != Some("2024-03-01") {
                    return status(url, StatusCode::BAD_REQUEST);
                }
                respond_json(
                    url,
                    StatusCode::OK,
                    json!({ "data": [
                        { "type": "accountTransaction", "id": "t-1", "attributes": {
                            "status": "booked", "bookingDate": "2024-03-04", "valueDate": "2024-03-04",
                            "description": "Abschlag März", "transactionType": "DIRECT_DEBIT",
                            "amount": { "currencyCode": "EUR", "value": "-1234.56" },
                            "creditor": { "name": "Stadtwerke Köln",
                                "creditorAccount": { "iban": "DE89370400440532013000" } },
                            "debtor": { "name": "Alice" },
                            "creditorId": "DE98ZZZ09999999999", "mandateId": "M-42" } },
                        { "type": "accountTransaction", "id": "t-2", "attributes": {
                            "status": "booked", "bookingDate": "2024-03-01",
                            "description": "Gehalt März", "transactionType": "CREDIT_TRANSFER",
                            "amount": { "currencyCode": "EUR", "value": "2500.00" },
                            "creditor": { "name": "Alice" },
                            "debtor": { "name": "ACME GmbH" } } }
                    ]}),
                )
            }
            (Method::GET, "/api/credit-card/cards/k-1/transactions") => respond_json(
                url,
                StatusCode::OK,
                json!({ "data": [
                    { "type": "creditCardTransaction", "id": "ct-1", "attributes": {
                        "status": "booked", "bookingDate": "2024-03-03",
                        "description": "Café Zürich",
                        "amount": { "value": "-12.60", "currencyCode": "EUR" } } },
                    { "type": "creditCardTransaction", "id": "ct-2", "attributes": {
                        "status": "authorized", "authorizationDate": "2024-03-28T14:03:00Z",
                        "description": "Broken",
                        "amount": { "value": "twelve", "currencyCode": "EUR" } } }
                ]}),
            ),
            _ => status(url, StatusCode::NOT_FOUND),
        }
    }
}

#[async_trait]
impl Transport for FakeBank {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut state = self.state.lock().unwrap();
        state.requests.push(format!("{} {}", request.method, request.url));

        let path = request.url.path();
        let resp = if path == "/login" || path.starts_with("/api/") {
            self.api(&request, &mut state)
        } else {
            self.web(&request, &mut state)
        };
        Ok(resp)
    }

    fn jar_cookies(&self, _url: &Url) -> Vec<Cookie> {
        self.cookies.lock().unwrap().clone()
    }
}

// ---------------------------------------------------------------------------
// Response helpers
// ---------------------------------------------------------------------------

fn confirmation_page(xsrf: &str) -> String {
    format!(
        r#"<html><body>
  <form id="confirmForm" action="{CONFIRM_PATH}" method="post">
    <input type="hidden" name="XSRFPreventionToken" value="{xsrf}">
    <p>Bitte bestätigen Sie die Anmeldung in Ihrer App.</p>
  </form></body></html>"#
    )
}

fn html(url: &Url, body: &str) -> HttpResponse {
    HttpResponse {
        status: StatusCode::OK,
        url: url.clone(),
        body: body.as_bytes().to_vec(),
    }
}

fn status(url: &Url, status: StatusCode) -> HttpResponse {
    HttpResponse {
        status,
        url: url.clone(),
        body: Vec::new(),
    }
}

fn respond_json(url: &Url, status: StatusCode, body: Value) -> HttpResponse {
    HttpResponse {
        status,
        url: url.clone(),
        body: body.to_string().into_bytes(),
    }
}
