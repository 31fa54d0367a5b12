mod common;

use anyhow::Result;
use axum::http::{Method, StatusCode};
use chrono::{Duration, Utc};
use uuid::Uuid;

use common::TestApp;
use portal_api_rust::auth::{generate_opaque_token, hash_token};
use portal_api_rust::database::models::NewSession;
use portal_api_rust::database::SessionRepository;
use portal_api_rust::server::sweep_once;

#[tokio::test]
async fn sweep_removes_only_expired_sessions() -> Result<()> {
    let app = TestApp::new();
    let user = app.create_user("a@x.com").await?;

    for minutes in [1, 30, 600] {
        app.store
            .create_session(NewSession {
                id: Uuid::new_v4(),
                user_id: user,
                access_token_hash: hash_token(&generate_opaque_token()),
                refresh_token_hash: hash_token(&generate_opaque_token()),
                ip_address: None,
                user_agent: None,
                expires_at: Utc::now() - Duration::minutes(minutes),
            })
            .await?;
    }
    let (first, _) = app.login("a@x.com").await?;
    let (second, _) = app.login("a@x.com").await?;

    assert_eq!(app.state.sessions.delete_expired_sessions().await?, 3);
    assert_eq!(app.state.sessions.delete_expired_sessions().await?, 0);

    for token in [&first, &second] {
        assert_eq!(app.get("/api/auth/whoami", token).await?.status, StatusCode::OK);
    }
    Ok(())
}

#[tokio::test]
async fn background_sweep_pass_keeps_live_sessions() -> Result<()> {
    let app = TestApp::new();
    app.create_user("a@x.com").await?;
    let (token, _) = app.login("a@x.com").await?;

    sweep_once(&app.state).await;
    assert_eq!(app.get("/api/auth/whoami", &token).await?.status, StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn health_reflects_the_credential_store() -> Result<()> {
    let app = TestApp::new();

    let res = app.request(Method::GET, "/health", None, None, None).await?;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["success"], true);

    app.store.set_available(false);
    let res = app.request(Method::GET, "/health", None, None, None).await?;
    assert_eq!(res.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(res.body["success"], false);
    Ok(())
}

#[tokio::test]
async fn unknown_route_uses_the_error_envelope() -> Result<()> {
    let app = TestApp::new();

    let res = app.request(Method::GET, "/nope", None, None, None).await?;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
    assert_eq!(res.body["success"], false);
    assert_eq!(res.error_code(), Some("NOT_FOUND"));
    Ok(())
}

#[tokio::test]
async fn wrong_method_uses_the_error_envelope() -> Result<()> {
    let app = TestApp::new();

    let res = app.request(Method::GET, "/login", None, None, None).await?;
    assert_eq!(res.status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(res.body["success"], false);
    assert_eq!(res.error_code(), Some("METHOD_NOT_ALLOWED"));
    Ok(())
}

#[tokio::test]
async fn out_of_range_page_is_a_validation_error() -> Result<()> {
    let app = TestApp::new();
    let admin = app.create_user("root@x.com").await?;
    app.make_admin(admin).await?;
    let org = app.create_org("Acme", "postgres://localhost/acme").await?;
    app.state
        .tenant_router
        .provision(&org, &portal_api_rust::services::Actor::system())
        .await?;
    app.add_member(org.id, admin, portal_api_rust::database::models::TenantRole::Member)
        .await?;
    let (token, _) = app.login("root@x.com").await?;

    let res = app.get("/audit-logs?page=9223372036854775807&size=50", &token).await?;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.error_code(), Some("INVALID_PAGE"));

    let res = app
        .request(
            Method::GET,
            "/api/organization/users?page=9223372036854775807",
            Some(&token),
            Some(org.id),
            None,
        )
        .await?;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.error_code(), Some("INVALID_PAGE"));

    let res = app.get("/audit-logs?page=3&size=50", &token).await?;
    assert_eq!(res.status, StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn audit_log_query_filters_and_paginates() -> Result<()> {
    let app = TestApp::new();
    let admin = app.create_user("root@x.com").await?;
    app.make_admin(admin).await?;
    app.create_user("a@x.com").await?;
    for _ in 0..3 {
        app.login("a@x.com").await?;
    }
    let res = app
        .post(
            "/login",
            None,
            serde_json::json!({ "email": "a@x.com", "password": "definitely-wrong" }),
        )
        .await?;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    let (token, _) = app.login("root@x.com").await?;

    let res = app
        .get("/audit-logs?action=login&user_email=a@x.com&status=success&size=2", &token)
        .await?;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["meta"]["total"], 3);
    assert_eq!(res.body["meta"]["per_page"], 2);
    assert_eq!(res.body["meta"]["total_pages"], 2);
    assert_eq!(res.data().as_array().map(Vec::len), Some(2));

    let res = app.get("/audit-logs?action=login&status=failure", &token).await?;
    assert_eq!(res.body["meta"]["total"], 1);

    let res = app.get("/audit-logs?status=maybe", &token).await?;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);

    let res = app.get("/audit-logs/stats", &token).await?;
    assert_eq!(res.status, StatusCode::OK);
    assert!(res.data()["total"].as_i64().unwrap_or_default() >= 5);
    Ok(())
}

#[tokio::test]
async fn audit_prune_needs_manage_permission() -> Result<()> {
    let app = TestApp::new();
    app.create_user("a@x.com").await?;
    let (token, _) = app.login("a@x.com").await?;

    let res = app
        .request(Method::DELETE, "/audit-logs?older_than_days=30", Some(&token), None, None)
        .await?;
    assert_eq!(res.status, StatusCode::FORBIDDEN);

    app.grant_member("audit:manage").await?;
    let res = app
        .request(Method::DELETE, "/audit-logs?older_than_days=30", Some(&token), None, None)
        .await?;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.data()["removed"], 0);
    Ok(())
}
