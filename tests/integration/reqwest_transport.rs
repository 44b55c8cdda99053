//! `ReqwestTransport` against a local HTTP server: cookie jar, redirects
//! and request bodies.

use reqwest::{StatusCode, Url};
use serde_json::json;
use std::time::Duration;
use tokio_test::assert_ok;
use wiremock::matchers::{body_json, body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use bankfetch::transport::{HttpRequest, ReqwestTransport, Transport};

fn transport() -> ReqwestTransport {
    assert_ok!(ReqwestTransport::new("bankfetch-test", Duration::from_secs(5)))
}

fn url(server: &MockServer, p: &str) -> Url {
    Url::parse(&format!("{}{p}", server.uri())).unwrap()
}

#[tokio::test]
async fn test_cookie_is_stored_and_sent_back() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(200).insert_header("set-cookie", "xsrf=tok-1; Path=/"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/next"))
        .and(header("cookie", "xsrf=tok-1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("with cookie"))
        .mount(&server)
        .await;

    let transport = transport();
    let login = assert_ok!(transport.execute(HttpRequest::get(url(&server, "/login"))).await);
    assert_eq!(login.status, StatusCode::OK);

    let cookies = transport.jar_cookies(&url(&server, "/"));
    assert!(cookies.iter().any(|c| c.name == "xsrf" && c.value == "tok-1"));

    let next = assert_ok!(transport.execute(HttpRequest::get(url(&server, "/next"))).await);
    assert_eq!(next.status, StatusCode::OK);
    assert_eq!(next.text(), "with cookie");
}

#[tokio::test]
async fn test_redirect_is_followed_and_final_url_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/banking"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/banking/start"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/banking/start"))
        .respond_with(ResponseTemplate::new(200).set_body_string("start page"))
        .mount(&server)
        .await;

    let resp = assert_ok!(transport().execute(HttpRequest::get(url(&server, "/banking"))).await);
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.url.path(), "/banking/start");
    assert_eq!(resp.text(), "start page");
}

#[tokio::test]
async fn test_form_body_and_headers_are_sent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/banking"))
        .and(header("x-xsrf-token", "tok-1"))
        .and(header("content-type", "application/x-www-form-urlencoded"))
        .and(body_string_contains("%24sID%24=sid-1"))
        .and(body_string_contains("j_username=alice"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let req = HttpRequest::post_form(
        url(&server, "/banking"),
        [("$sID$", "sid-1"), ("j_username", "alice")],
    )
    .with_header("x-xsrf-token", "tok-1");
    let resp = assert_ok!(transport().execute(req).await);
    assert_eq!(resp.status, StatusCode::OK);
}

#[tokio::test]
async fn test_raw_body_carries_content_type() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/mfa/mfa/challenges"))
        .and(header("content-type", "application/vnd.api+json"))
        .and(body_json(json!({ "data": { "type": "mfa-challenge" } })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "data": { "id": "c-1" } })))
        .mount(&server)
        .await;

    let body = serde_json::to_vec(&json!({ "data": { "type": "mfa-challenge" } })).unwrap();
    let req = HttpRequest::post_raw(
        url(&server, "/api/mfa/mfa/challenges"),
        "application/vnd.api+json",
        body,
    );
    let resp = assert_ok!(transport().execute(req).await);
    assert_eq!(resp.status, StatusCode::CREATED);
    let created: serde_json::Value = resp.json().unwrap();
    assert_eq!(created["data"]["id"], "c-1");
}

#[tokio::test]
async fn test_error_status_is_a_response_not_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let req = HttpRequest::post_form(url(&server, "/api/token"), [("grant_type", "banking_user_sca")]);
    let resp = assert_ok!(transport().execute(req).await);
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
    assert!(!resp.is_success());
}

#[tokio::test]
async fn test_unreachable_host_is_transport_error() {
    // Nothing listens on port 1 locally.
    let result = transport()
        .execute(HttpRequest::get(Url::parse("http://127.0.0.1:1/").unwrap()))
        .await;
    assert!(result.is_err());
}
