#![allow(dead_code)]

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use portal_api_rust::config::AppConfig;
use portal_api_rust::database::models::{NewOrganization, Organization, PermissionKey, TenantRole};
use portal_api_rust::database::{MemoryStore, OrganizationRepository, RoleRepository, UserRepository};
use portal_api_rust::server::{app, AppState};
use portal_api_rust::services::integrations::InvocationContext;
use portal_api_rust::services::{Actor, Integration, IntegrationError, IntegrationRegistry, MemoryCounterStore};

pub const PASSWORD: &str = "correct-horse-battery";

/// Full router over an in-process Credential Store.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<MemoryStore>,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: axum::http::HeaderMap,
    pub body: Value,
}

impl TestResponse {
    pub fn data(&self) -> &Value {
        &self.body["data"]
    }

    pub fn error_code(&self) -> Option<&str> {
        self.body["error"]["code"].as_str()
    }
}

/// Returns the request body under `echo`.
pub struct Echo;

#[async_trait]
impl Integration for Echo {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Returns the request"
    }

    async fn invoke(&self, context: InvocationContext, request: Value) -> Result<Value, IntegrationError> {
        Ok(json!({ "organization_id": context.organization_id, "echo": request }))
    }
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(AppConfig::development())
    }

    pub fn with_config(config: AppConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let registry = IntegrationRegistry::new().register(Arc::new(Echo));
        let state = AppState::build(
            config,
            store.clone(),
            store.clone(),
            Arc::new(MemoryCounterStore::new()),
            registry,
        );
        Self {
            router: app(state.clone()),
            state,
            store,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Result<TestResponse> {
        let response = self.router.clone().oneshot(request).await?;
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).context("response body is not JSON")?
        };
        Ok(TestResponse { status, headers, body })
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        organization: Option<Uuid>,
        body: Option<Value>,
    ) -> Result<TestResponse> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        if let Some(organization) = organization {
            builder = builder.header("x-organization-uuid", organization.to_string());
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(&body)?))?,
            None => builder.body(Body::empty())?,
        };
        self.send(request).await
    }

    pub async fn get(&self, uri: &str, token: &str) -> Result<TestResponse> {
        self.request(Method::GET, uri, Some(token), None, None).await
    }

    pub async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> Result<TestResponse> {
        self.request(Method::POST, uri, token, None, Some(body)).await
    }

    /// Operator-created account holding the default `member` role.
    pub async fn create_user(&self, email: &str) -> Result<Uuid> {
        let user = self
            .state
            .accounts
            .create_user(email, email, PASSWORD, &Actor::system())
            .await?;
        Ok(user.id)
    }

    pub async fn make_admin(&self, user_id: Uuid) -> Result<()> {
        let admin = self
            .store
            .find_role_by_name("admin")
            .await?
            .context("admin role is seeded")?;
        self.store.assign_role(user_id, admin.id).await?;
        Ok(())
    }

    pub async fn grant_member(&self, permission: &str) -> Result<()> {
        let member = self
            .store
            .find_role_by_name("member")
            .await?
            .context("member role is seeded")?;
        let key = PermissionKey::parse(permission).context("permission is resource:action")?;
        self.store.grant_permission(member.id, &key).await?;
        Ok(())
    }

    pub async fn create_org(&self, name: &str, write_address: &str) -> Result<Organization> {
        Ok(self
            .store
            .create_organization(NewOrganization {
                id: None,
                name: name.to_string(),
                sso_active: false,
                write_address: write_address.to_string(),
                read_address: None,
            })
            .await?)
    }

    pub async fn add_member(&self, org: Uuid, user: Uuid, role: TenantRole) -> Result<()> {
        self.store.upsert_membership(user, org, role).await?;
        Ok(())
    }

    pub async fn deactivate(&self, user: Uuid) -> Result<()> {
        self.store.set_user_active(user, false).await?;
        Ok(())
    }

    pub async fn login(&self, email: &str) -> Result<(String, String)> {
        let res = self
            .post("/login", None, json!({ "email": email, "password": PASSWORD }))
            .await?;
        anyhow::ensure!(res.status == StatusCode::OK, "login failed: {} {}", res.status, res.body);
        let token = res.data()["token"].as_str().context("token")?.to_string();
        let refresh = res.data()["refreshToken"].as_str().context("refreshToken")?.to_string();
        Ok((token, refresh))
    }
}
