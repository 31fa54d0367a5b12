mod common;

use anyhow::Result;
use axum::http::{Method, StatusCode};
use serde_json::json;

use common::{TestApp, PASSWORD};
use portal_api_rust::database::models::{AuditFilter, AuditOutcome};
use portal_api_rust::database::{AuditRepository, SessionRepository};

#[tokio::test]
async fn login_returns_token_pair() -> Result<()> {
    let app = TestApp::new();
    app.create_user("a@x.com").await?;

    let res = app
        .post("/login", None, json!({ "email": "a@x.com", "password": PASSWORD }))
        .await?;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["success"], true);
    assert!(res.data()["token"].is_string());
    assert!(res.data()["refreshToken"].is_string());
    assert_eq!(res.data()["expiresIn"], 3600);
    Ok(())
}

#[tokio::test]
async fn wrong_password_is_unauthorized() -> Result<()> {
    let app = TestApp::new();
    app.create_user("a@x.com").await?;

    let res = app
        .post("/login", None, json!({ "email": "a@x.com", "password": "not-the-password" }))
        .await?;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    assert_eq!(res.body["success"], false);
    assert_eq!(res.error_code(), Some("INVALID_CREDENTIALS"));
    Ok(())
}

#[tokio::test]
async fn refresh_token_works_exactly_once() -> Result<()> {
    let app = TestApp::new();
    app.create_user("a@x.com").await?;
    let (_, refresh) = app.login("a@x.com").await?;

    let first = app.post("/refresh", None, json!({ "refreshToken": refresh })).await?;
    assert_eq!(first.status, StatusCode::OK);
    let rotated = first.data()["token"].as_str().unwrap_or_default().to_string();
    assert_eq!(app.get("/api/auth/whoami", &rotated).await?.status, StatusCode::OK);

    let replay = app.post("/refresh", None, json!({ "refreshToken": refresh })).await?;
    assert_eq!(replay.status, StatusCode::UNAUTHORIZED);
    assert_eq!(replay.error_code(), Some("SESSION_NOT_FOUND"));
    Ok(())
}

#[tokio::test]
async fn logout_twice_is_not_an_error() -> Result<()> {
    let app = TestApp::new();
    let user = app.create_user("a@x.com").await?;
    let (token, _) = app.login("a@x.com").await?;

    for _ in 0..2 {
        let res = app.request(Method::POST, "/logout", Some(&token), None, None).await?;
        assert_eq!(res.status, StatusCode::OK);
    }
    assert_eq!(app.store.delete_user_sessions(user).await?, 0);

    let res = app.get("/api/auth/whoami", &token).await?;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn disabled_user_gets_forbidden_and_no_session() -> Result<()> {
    let app = TestApp::new();
    let user = app.create_user("a@x.com").await?;
    app.deactivate(user).await?;

    let res = app
        .post("/login", None, json!({ "email": "a@x.com", "password": PASSWORD }))
        .await?;
    assert_eq!(res.status, StatusCode::FORBIDDEN);
    assert_eq!(res.error_code(), Some("ACCOUNT_DISABLED"));
    assert_eq!(app.store.delete_user_sessions(user).await?, 0);

    let filter = AuditFilter {
        action: Some("login".to_string()),
        outcome: Some(AuditOutcome::Failure),
        page: 1,
        size: 50,
        ..AuditFilter::default()
    };
    let (entries, total) = app.store.query_audit_logs(&filter).await?;
    assert_eq!(total, 1);
    assert_eq!(entries[0].user_id, Some(user));
    Ok(())
}

#[tokio::test]
async fn missing_or_malformed_bearer_is_unauthorized() -> Result<()> {
    let app = TestApp::new();

    let res = app.request(Method::GET, "/api/auth/whoami", None, None, None).await?;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    assert_eq!(res.error_code(), Some("MISSING_TOKEN"));

    let res = app.get("/api/auth/whoami", "not-a-jwt").await?;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    assert_eq!(res.body["success"], false);
    Ok(())
}

#[tokio::test]
async fn deactivation_ends_live_tokens() -> Result<()> {
    let app = TestApp::new();
    let user = app.create_user("a@x.com").await?;
    let (token, _) = app.login("a@x.com").await?;
    assert_eq!(app.get("/api/auth/whoami", &token).await?.status, StatusCode::OK);

    app.deactivate(user).await?;
    assert_eq!(app.get("/api/auth/whoami", &token).await?.status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn whoami_reports_roles_permissions_and_memberships() -> Result<()> {
    let app = TestApp::new();
    let user = app.create_user("a@x.com").await?;
    let org = app.create_org("Acme", "postgres://localhost/acme").await?;
    app.add_member(org.id, user, portal_api_rust::database::models::TenantRole::Admin)
        .await?;
    let (token, _) = app.login("a@x.com").await?;

    let res = app.get("/api/auth/whoami", &token).await?;
    assert_eq!(res.status, StatusCode::OK);
    let data = res.data();
    assert_eq!(data["user"]["email"], "a@x.com");
    assert!(data["user"].get("password_hash").is_none());
    assert_eq!(data["roles"], json!(["member"]));
    assert_eq!(data["permissions"]["integration"], json!(["read"]));
    assert_eq!(data["is_admin"], false);
    assert_eq!(data["organizations"][0]["organization_id"], json!(org.id));
    assert_eq!(data["organizations"][0]["role"], "admin");
    Ok(())
}

#[tokio::test]
async fn register_then_login() -> Result<()> {
    let app = TestApp::new();

    let res = app
        .post(
            "/register",
            None,
            json!({ "email": "New@X.com", "name": "New", "password": PASSWORD }),
        )
        .await?;
    assert_eq!(res.status, StatusCode::CREATED);
    assert_eq!(res.data()["email"], "new@x.com");

    let dup = app
        .post(
            "/register",
            None,
            json!({ "email": "new@x.com", "name": "New", "password": PASSWORD }),
        )
        .await?;
    assert_eq!(dup.status, StatusCode::CONFLICT);

    app.login("new@x.com").await?;
    Ok(())
}

#[tokio::test]
async fn password_change_revokes_sessions() -> Result<()> {
    let app = TestApp::new();
    app.create_user("a@x.com").await?;
    let (token, _) = app.login("a@x.com").await?;

    let res = app
        .request(
            Method::PUT,
            "/api/auth/password",
            Some(&token),
            None,
            Some(json!({ "currentPassword": PASSWORD, "newPassword": "another-long-secret" })),
        )
        .await?;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);
    assert_eq!(app.get("/api/auth/whoami", &token).await?.status, StatusCode::UNAUTHORIZED);

    let res = app
        .post(
            "/login",
            None,
            json!({ "email": "a@x.com", "password": "another-long-secret" }),
        )
        .await?;
    assert_eq!(res.status, StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn password_reset_token_is_single_use() -> Result<()> {
    let app = TestApp::new();
    app.create_user("a@x.com").await?;

    let res = app
        .post("/password-reset/request", None, json!({ "email": "a@x.com" }))
        .await?;
    assert_eq!(res.status, StatusCode::OK);
    let token = res.data()["reset_token"].as_str().unwrap_or_default().to_string();
    assert!(!token.is_empty());

    let unknown = app
        .post("/password-reset/request", None, json!({ "email": "nobody@x.com" }))
        .await?;
    assert_eq!(unknown.status, StatusCode::OK);
    assert_eq!(unknown.data()["message"], res.data()["message"]);

    let confirm = json!({ "token": token, "newPassword": "brand-new-secret" });
    let first = app.post("/password-reset/confirm", None, confirm.clone()).await?;
    assert_eq!(first.status, StatusCode::OK);
    let second = app.post("/password-reset/confirm", None, confirm).await?;
    assert_eq!(second.status, StatusCode::BAD_REQUEST);
    assert_eq!(second.error_code(), Some("INVALID_RESET_TOKEN"));
    Ok(())
}
