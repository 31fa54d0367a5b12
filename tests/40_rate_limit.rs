mod common;

use anyhow::Result;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use serde_json::json;

use common::TestApp;
use portal_api_rust::config::AppConfig;

fn limited(limit: u64) -> AppConfig {
    let mut config = AppConfig::development();
    config.api.rate_limit_requests = limit;
    config.api.rate_limit_window_secs = 60;
    config
}

#[tokio::test]
async fn sixth_request_in_window_is_rejected() -> Result<()> {
    let app = TestApp::with_config(limited(5));
    let body = json!({ "email": "nobody@x.com" });

    for expected_remaining in (0..5).rev() {
        let res = app.post("/password-reset/request", None, body.clone()).await?;
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.headers["x-ratelimit-limit"], "5");
        assert_eq!(res.headers["x-ratelimit-remaining"], expected_remaining.to_string().as_str());
    }

    let res = app.post("/password-reset/request", None, body).await?;
    assert_eq!(res.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(res.body["success"], false);
    assert_eq!(res.error_code(), Some("RATE_LIMITED"));
    let retry_after = res.body["error"]["details"]["retry_after"].as_u64().unwrap_or_default();
    assert!((1..=60).contains(&retry_after));
    assert!(res.headers.contains_key("retry-after"));
    assert!(res.headers.contains_key("x-ratelimit-reset"));
    Ok(())
}

#[tokio::test]
async fn paths_are_counted_separately() -> Result<()> {
    let app = TestApp::with_config(limited(1));

    let res = app
        .post("/password-reset/request", None, json!({ "email": "nobody@x.com" }))
        .await?;
    assert_eq!(res.status, StatusCode::OK);

    let res = app
        .post("/login", None, json!({ "email": "nobody@x.com", "password": "whatever-it-is" }))
        .await?;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);

    let res = app
        .post("/password-reset/request", None, json!({ "email": "nobody@x.com" }))
        .await?;
    assert_eq!(res.status, StatusCode::TOO_MANY_REQUESTS);
    Ok(())
}

#[tokio::test]
async fn authenticated_routes_are_not_throttled() -> Result<()> {
    let app = TestApp::with_config(limited(1));
    app.create_user("a@x.com").await?;
    let (token, _) = app.login("a@x.com").await?;

    for _ in 0..3 {
        assert_eq!(app.get("/api/auth/whoami", &token).await?.status, StatusCode::OK);
    }
    Ok(())
}

#[tokio::test]
async fn disabled_limiter_lets_everything_through() -> Result<()> {
    let mut config = limited(1);
    config.api.enable_rate_limiting = false;
    let app = TestApp::with_config(config);

    for _ in 0..3 {
        let res = app
            .post("/password-reset/request", None, json!({ "email": "nobody@x.com" }))
            .await?;
        assert_eq!(res.status, StatusCode::OK);
        assert!(!res.headers.contains_key("x-ratelimit-limit"));
    }
    Ok(())
}

#[tokio::test]
async fn forwarded_for_cannot_be_rotated_by_the_client() -> Result<()> {
    let mut config = limited(5);
    config.api.trust_forwarded_for = true;
    let app = TestApp::with_config(config);

    let mut statuses = Vec::new();
    for i in 0..8 {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/password-reset/request")
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-forwarded-for", format!("198.51.100.{}, 10.0.0.1", i))
            .body(Body::from(json!({ "email": "nobody@x.com" }).to_string()))?;
        statuses.push(app.send(request).await?.status);
    }

    assert!(statuses[..5].iter().all(|s| *s == StatusCode::OK));
    assert!(statuses[5..].iter().all(|s| *s == StatusCode::TOO_MANY_REQUESTS));
    Ok(())
}
