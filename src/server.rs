use axum::{
    http::{header, HeaderValue, Method, StatusCode},
    middleware::{from_fn_with_state, map_response},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Router,
};
use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{catch_panic::CatchPanicLayer, cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::database::{
    CredentialStore, DatabaseError, DatabaseManager, MemoryStore, OrganizationUserRepository, PgStore,
    PgTenantDirectory, PoolSettings, StoreHealth, UserRepository,
};
use crate::error::ApiError;
use crate::handlers::{elevated, protected, public};
use crate::middleware::{jwt_auth_middleware, rate_limit_middleware, validate_tenant_middleware};
use crate::services::{
    AccountService, AuditRecorder, AuthorizationEngine, CounterStore, IntegrationGateway, IntegrationRegistry,
    MemoryCounterStore, RateLimiter, RedisCounterStore, RoleAdmin, SessionManager, TenantRegistry, TenantRouter,
};

/// Shared handles every handler and middleware reads. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: Arc<dyn UserRepository>,
    pub health: Arc<dyn StoreHealth>,
    pub sessions: Arc<SessionManager>,
    pub authz: Arc<AuthorizationEngine>,
    pub tenants: Arc<TenantRegistry>,
    pub tenant_router: Arc<TenantRouter>,
    pub rate_limiter: Arc<RateLimiter>,
    pub audit: Arc<AuditRecorder>,
    pub accounts: Arc<AccountService>,
    pub roles: Arc<RoleAdmin>,
    pub integrations: Arc<IntegrationGateway>,
    pub database: Option<Arc<DatabaseManager>>,
}

impl AppState {
    /// Wire every service over one Credential Store and one tenant directory.
    pub fn build<S>(
        config: AppConfig,
        store: Arc<S>,
        directory: Arc<dyn OrganizationUserRepository>,
        counters: Arc<dyn CounterStore>,
        integrations: IntegrationRegistry,
    ) -> Self
    where
        S: CredentialStore + 'static,
    {
        let audit = Arc::new(AuditRecorder::new(store.clone(), &config.audit));
        let sessions = Arc::new(SessionManager::new(
            store.clone(),
            store.clone(),
            &config.security,
            audit.clone(),
        ));
        let accounts = Arc::new(AccountService::new(
            store.clone(),
            store.clone(),
            store.clone(),
            sessions.clone(),
            audit.clone(),
            &config.security,
        ));
        let gateway = IntegrationGateway::new(
            integrations,
            audit.clone(),
            Duration::from_secs(config.api.request_timeout_secs.max(1)),
        );

        Self {
            users: store.clone(),
            health: store.clone(),
            authz: Arc::new(AuthorizationEngine::new(store.clone())),
            tenants: Arc::new(TenantRegistry::new(store.clone(), audit.clone())),
            roles: Arc::new(RoleAdmin::new(store, audit.clone())),
            tenant_router: Arc::new(TenantRouter::new(directory, audit.clone())),
            rate_limiter: Arc::new(RateLimiter::new(counters)),
            integrations: Arc::new(gateway),
            config: Arc::new(config),
            sessions,
            accounts,
            audit,
            database: None,
        }
    }

    /// Everything in process: `DATABASE_URL=memory://` and the test suite.
    pub fn in_memory(config: AppConfig, integrations: IntegrationRegistry) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::build(
            config,
            store.clone(),
            store,
            Arc::new(MemoryCounterStore::new()),
            integrations,
        )
    }

    /// Connect to Postgres (and Redis when configured) and apply migrations.
    pub async fn postgres(config: AppConfig, integrations: IntegrationRegistry) -> Result<Self, DatabaseError> {
        let manager = Arc::new(DatabaseManager::connect(&config.database.url, PoolSettings::from_config(&config)).await?);
        let store = Arc::new(PgStore::new(manager.main_pool().clone()));
        store.migrate().await?;

        let counters: Arc<dyn CounterStore> = match &config.api.redis_url {
            Some(url) => match RedisCounterStore::connect(url).await {
                Ok(redis) => Arc::new(redis),
                Err(e) => {
                    warn!(error = %e, "Redis unavailable; rate limit counters are per process");
                    Arc::new(MemoryCounterStore::new())
                }
            },
            None => Arc::new(MemoryCounterStore::new()),
        };

        let directory = Arc::new(PgTenantDirectory::new(manager.clone()));
        let mut state = Self::build(config, store, directory, counters, integrations);
        state.database = Some(manager);
        Ok(state)
    }

    /// In-memory or Postgres, by `DATABASE_URL`.
    pub async fn from_config(config: AppConfig, integrations: IntegrationRegistry) -> Result<Self, DatabaseError> {
        if config.uses_memory_store() {
            warn!("Using the in-memory credential store; data is lost on restart");
            Ok(Self::in_memory(config, integrations))
        } else {
            Self::postgres(config, integrations).await
        }
    }
}

pub fn app(state: AppState) -> Router {
    let config = state.config.clone();

    Router::new()
        .merge(public_routes(&state))
        .merge(auth_routes(&state))
        .merge(tenant_routes(&state))
        .merge(admin_routes(&state))
        .fallback(|| async { ApiError::not_found("Route not found") })
        .with_state(state)
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TimeoutLayer::new(Duration::from_secs(config.api.request_timeout_secs.max(1))))
        .layer(map_response(envelope_bare_errors))
        .layer(cors_layer(&config))
        .layer(TraceLayer::new_for_http())
}

fn public_routes(state: &AppState) -> Router<AppState> {
    use public::{auth, health};

    let throttled = Router::new()
        .route("/login", post(auth::login))
        .route("/refresh", post(auth::refresh))
        .route("/register", post(auth::register))
        .route("/password-reset/request", post(auth::password_reset_request))
        .route("/password-reset/confirm", post(auth::password_reset_confirm))
        .route_layer(from_fn_with_state(state.clone(), rate_limit_middleware));

    Router::new()
        .route("/", get(health::root))
        .route("/health", get(health::health))
        // validates the bearer itself so a second logout is not a 401
        .route("/logout", post(auth::logout))
        .merge(throttled)
}

fn auth_routes(state: &AppState) -> Router<AppState> {
    use protected::auth;

    Router::new()
        .route("/logout-all", post(auth::logout_all))
        .route("/api/auth/whoami", get(auth::whoami))
        .route("/api/auth/password", put(auth::change_password))
        .route_layer(from_fn_with_state(state.clone(), jwt_auth_middleware))
}

fn tenant_routes(state: &AppState) -> Router<AppState> {
    use protected::{integrations, organization};

    // route_layer order: the last added runs first
    Router::new()
        .route("/api/organization", get(organization::show))
        .route(
            "/api/organization/users",
            get(organization::users_list).post(organization::users_create),
        )
        .route(
            "/api/organization/users/:id",
            get(organization::users_show).delete(organization::users_delete),
        )
        .route("/api/organization/members", post(organization::members_add))
        .route("/api/organization/members/:user_id", delete(organization::members_remove))
        .route("/api/integrations", get(integrations::list))
        .route("/api/integrations/:name/invoke", post(integrations::invoke))
        .route_layer(from_fn_with_state(state.clone(), validate_tenant_middleware))
        .route_layer(from_fn_with_state(state.clone(), jwt_auth_middleware))
}

fn admin_routes(state: &AppState) -> Router<AppState> {
    use elevated::{audit, organizations, roles, users};

    Router::new()
        .route("/audit-logs", get(audit::list).delete(audit::prune))
        .route("/audit-logs/stats", get(audit::stats))
        .route(
            "/api/admin/organizations",
            get(organizations::list).post(organizations::create),
        )
        .route(
            "/api/admin/organizations/:id",
            get(organizations::show)
                .patch(organizations::update)
                .delete(organizations::delete),
        )
        .route("/api/admin/organizations/:id/provision", post(organizations::provision))
        .route("/api/admin/roles", get(roles::list).post(roles::create))
        .route("/api/admin/roles/:id", delete(roles::delete))
        .route("/api/admin/roles/:id/permissions", put(roles::replace_permissions))
        .route(
            "/api/admin/users/:id/roles/:role_id",
            post(users::assign_role).delete(users::revoke_role),
        )
        .route("/api/admin/users/:id/deactivate", post(users::deactivate))
        .route_layer(from_fn_with_state(state.clone(), jwt_auth_middleware))
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    if !config.security.enable_cors {
        return CorsLayer::new();
    }
    let origins: Vec<HeaderValue> = config
        .security
        .cors_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::HeaderName::from_static("x-organization-uuid"),
        ])
}

fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!(panic = detail, "Handler panicked");
    ApiError::internal_server_error("An error occurred while processing your request").into_response()
}

/// Give the bodiless 405 from the method router and the 408 from
/// `TimeoutLayer` the error envelope.
pub async fn envelope_bare_errors(response: Response) -> Response {
    match response.status() {
        StatusCode::METHOD_NOT_ALLOWED => {
            let allow = response.headers().get(header::ALLOW).cloned();
            let mut enveloped = ApiError::bad_request("Method not allowed for this route")
                .with_code("METHOD_NOT_ALLOWED")
                .into_response();
            *enveloped.status_mut() = StatusCode::METHOD_NOT_ALLOWED;
            if let Some(allow) = allow {
                enveloped.headers_mut().insert(header::ALLOW, allow);
            }
            enveloped
        }
        StatusCode::REQUEST_TIMEOUT => {
            warn!("Request timed out");
            ApiError::service_unavailable("Request timed out")
                .with_code("REQUEST_TIMEOUT")
                .into_response()
        }
        _ => response,
    }
}

/// Periodically delete expired sessions and reset tokens and drop idle
/// tenant pools.
pub fn spawn_sweeper(state: AppState) -> tokio::task::JoinHandle<()> {
    let interval = Duration::from_secs(state.config.database.session_sweep_interval_secs.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            sweep_once(&state).await;
        }
    })
}

pub async fn sweep_once(state: &AppState) {
    if let Err(e) = state.sessions.delete_expired_sessions().await {
        error!(error = %e, "Session sweep failed");
    }
    match state.accounts.delete_expired_reset_tokens().await {
        Ok(0) => {}
        Ok(removed) => info!(removed, "Swept expired password reset tokens"),
        Err(e) => error!(error = %e, "Reset token sweep failed"),
    }
    if let Some(database) = &state.database {
        let evicted = database.tenant_pools().evict_idle().await;
        if evicted > 0 {
            info!(evicted, "Closed idle tenant pools");
        }
    }
}

/// Bind, run the sweeper and serve until Ctrl-C.
pub async fn serve(state: AppState) -> std::io::Result<()> {
    let bind_addr = SocketAddr::from(([0, 0, 0, 0], state.config.api.port));
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!("Portal API listening on http://{}", bind_addr);

    let sweeper = spawn_sweeper(state.clone());
    let database = state.database.clone();
    let result = axum::serve(listener, app(state).into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await;

    sweeper.abort();
    if let Some(database) = database {
        database.close_all().await;
    }
    info!("Portal API stopped");
    result
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use serde_json::Value;

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn timeout_is_rendered_in_the_envelope() {
        let bare = Response::builder()
            .status(StatusCode::REQUEST_TIMEOUT)
            .body(Body::empty())
            .unwrap();
        let response = envelope_bare_errors(bare).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "REQUEST_TIMEOUT");
    }

    #[tokio::test]
    async fn method_not_allowed_keeps_status_and_allow_header() {
        let bare = Response::builder()
            .status(StatusCode::METHOD_NOT_ALLOWED)
            .header(header::ALLOW, "POST")
            .body(Body::empty())
            .unwrap();
        let response = envelope_bare_errors(bare).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()[header::ALLOW], "POST");
        assert_eq!(body_json(response).await["error"]["code"], "METHOD_NOT_ALLOWED");
    }

    #[tokio::test]
    async fn other_responses_pass_through() {
        let ok = Response::builder().status(StatusCode::OK).body(Body::from("x")).unwrap();
        assert_eq!(envelope_bare_errors(ok).await.status(), StatusCode::OK);
    }
}
