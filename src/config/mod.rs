use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub security: SecurityConfig,
    pub tenant: TenantConfig,
    pub audit: AuditConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Credential Store URL. `memory://` selects the in-process store.
    pub url: String,
    pub max_connections: u32,
    /// Seconds to wait for a pooled connection before giving up
    pub connection_timeout: u64,
    pub statement_timeout_ms: u64,
    pub tenant_max_connections: u32,
    /// Maximum number of distinct tenant store addresses kept pooled
    pub tenant_pool_capacity: usize,
    pub tenant_idle_timeout_secs: u64,
    pub session_sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub port: u16,
    pub request_timeout_secs: u64,
    pub enable_rate_limiting: bool,
    pub rate_limit_requests: u64,
    pub rate_limit_window_secs: u64,
    /// Shared counter store; in-process counters are used when unset
    pub redis_url: Option<String>,
    pub trust_forwarded_for: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(skip_serializing)]
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub access_token_ttl_mins: i64,
    pub refresh_token_ttl_hours: i64,
    pub password_reset_ttl_mins: i64,
    pub min_password_length: usize,
    pub allow_registration: bool,
    pub check_session_revocation: bool,
    pub enable_cors: bool,
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    /// Answer 404 instead of 403 when the caller is not a member of an existing organization
    pub conceal_existence: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    pub enable_audit_logging: bool,
    pub retention_days: i64,
    pub stats_top_n: i64,
    pub max_page_size: i64,
    pub write_timeout_ms: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("JWT_SECRET must be set outside development")]
    MissingJwtSecret,
    #[error("JWT_SECRET must be at least 32 bytes in {0:?}")]
    WeakJwtSecret(Environment),
    #[error("Invalid value for {0}")]
    Invalid(&'static str),
}

const DEVELOPMENT_JWT_SECRET: &str = "development-only-secret-do-not-deploy";

impl AppConfig {
    pub fn from_env() -> Self {
        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        // Set defaults based on environment, then override with specific env vars
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        // Database overrides
        if let Ok(v) = env::var("DATABASE_URL") {
            self.database.url = v;
        }
        if let Ok(v) = env::var("DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = v.parse().unwrap_or(self.database.max_connections);
        }
        if let Ok(v) = env::var("DATABASE_CONNECTION_TIMEOUT") {
            self.database.connection_timeout = v.parse().unwrap_or(self.database.connection_timeout);
        }
        if let Ok(v) = env::var("DATABASE_STATEMENT_TIMEOUT_MS") {
            self.database.statement_timeout_ms = v.parse().unwrap_or(self.database.statement_timeout_ms);
        }
        if let Ok(v) = env::var("TENANT_MAX_CONNECTIONS") {
            self.database.tenant_max_connections = v.parse().unwrap_or(self.database.tenant_max_connections);
        }
        if let Ok(v) = env::var("TENANT_POOL_CAPACITY") {
            self.database.tenant_pool_capacity = v.parse().unwrap_or(self.database.tenant_pool_capacity);
        }
        if let Ok(v) = env::var("TENANT_IDLE_TIMEOUT_SECS") {
            self.database.tenant_idle_timeout_secs = v.parse().unwrap_or(self.database.tenant_idle_timeout_secs);
        }
        if let Ok(v) = env::var("SESSION_SWEEP_INTERVAL_SECS") {
            self.database.session_sweep_interval_secs = v.parse().unwrap_or(self.database.session_sweep_interval_secs);
        }

        // API overrides
        if let Ok(v) = env::var("PORTAL_API_PORT").or_else(|_| env::var("PORT")) {
            self.api.port = v.parse().unwrap_or(self.api.port);
        }
        if let Ok(v) = env::var("API_REQUEST_TIMEOUT_SECS") {
            self.api.request_timeout_secs = v.parse().unwrap_or(self.api.request_timeout_secs);
        }
        if let Ok(v) = env::var("API_ENABLE_RATE_LIMITING") {
            self.api.enable_rate_limiting = v.parse().unwrap_or(self.api.enable_rate_limiting);
        }
        if let Ok(v) = env::var("API_RATE_LIMIT_REQUESTS") {
            self.api.rate_limit_requests = v.parse().unwrap_or(self.api.rate_limit_requests);
        }
        if let Ok(v) = env::var("API_RATE_LIMIT_WINDOW_SECS") {
            self.api.rate_limit_window_secs = v.parse().unwrap_or(self.api.rate_limit_window_secs);
        }
        if let Ok(v) = env::var("REDIS_URL") {
            self.api.redis_url = Some(v).filter(|s| !s.trim().is_empty());
        }
        if let Ok(v) = env::var("API_TRUST_FORWARDED_FOR") {
            self.api.trust_forwarded_for = v.parse().unwrap_or(self.api.trust_forwarded_for);
        }

        // Security overrides
        if let Ok(v) = env::var("JWT_SECRET") {
            self.security.jwt_secret = v;
        }
        if let Ok(v) = env::var("JWT_ISSUER") {
            self.security.jwt_issuer = v;
        }
        if let Ok(v) = env::var("SECURITY_ACCESS_TOKEN_TTL_MINS") {
            self.security.access_token_ttl_mins = v.parse().unwrap_or(self.security.access_token_ttl_mins);
        }
        if let Ok(v) = env::var("SECURITY_REFRESH_TOKEN_TTL_HOURS") {
            self.security.refresh_token_ttl_hours = v.parse().unwrap_or(self.security.refresh_token_ttl_hours);
        }
        if let Ok(v) = env::var("SECURITY_PASSWORD_RESET_TTL_MINS") {
            self.security.password_reset_ttl_mins = v.parse().unwrap_or(self.security.password_reset_ttl_mins);
        }
        if let Ok(v) = env::var("SECURITY_ALLOW_REGISTRATION") {
            self.security.allow_registration = v.parse().unwrap_or(self.security.allow_registration);
        }
        if let Ok(v) = env::var("SECURITY_CHECK_SESSION_REVOCATION") {
            self.security.check_session_revocation = v.parse().unwrap_or(self.security.check_session_revocation);
        }
        if let Ok(v) = env::var("SECURITY_ENABLE_CORS") {
            self.security.enable_cors = v.parse().unwrap_or(self.security.enable_cors);
        }
        if let Ok(v) = env::var("SECURITY_CORS_ORIGINS") {
            self.security.cors_origins = v.split(',').map(|s| s.trim().to_string()).collect();
        }

        // Tenant overrides
        if let Ok(v) = env::var("TENANT_CONCEAL_EXISTENCE") {
            self.tenant.conceal_existence = v.parse().unwrap_or(self.tenant.conceal_existence);
        }

        // Audit overrides
        if let Ok(v) = env::var("AUDIT_ENABLE_LOGGING") {
            self.audit.enable_audit_logging = v.parse().unwrap_or(self.audit.enable_audit_logging);
        }
        if let Ok(v) = env::var("AUDIT_RETENTION_DAYS") {
            self.audit.retention_days = v.parse().unwrap_or(self.audit.retention_days);
        }
        if let Ok(v) = env::var("AUDIT_STATS_TOP_N") {
            self.audit.stats_top_n = v.parse().unwrap_or(self.audit.stats_top_n);
        }
        if let Ok(v) = env::var("AUDIT_MAX_PAGE_SIZE") {
            self.audit.max_page_size = v.parse().unwrap_or(self.audit.max_page_size);
        }

        self
    }

    /// Reject configurations that would run with unsafe credentials.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.security.jwt_secret.is_empty() {
            return Err(ConfigError::MissingJwtSecret);
        }
        if self.environment != Environment::Development && self.security.jwt_secret.len() < 32 {
            return Err(ConfigError::WeakJwtSecret(self.environment));
        }
        if self.api.rate_limit_window_secs == 0 {
            return Err(ConfigError::Invalid("API_RATE_LIMIT_WINDOW_SECS"));
        }
        if self.security.access_token_ttl_mins <= 0 || self.security.refresh_token_ttl_hours <= 0 {
            return Err(ConfigError::Invalid("token lifetimes"));
        }
        Ok(())
    }

    pub fn uses_memory_store(&self) -> bool {
        self.database.url.starts_with("memory:")
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.database.connection_timeout)
    }

    pub fn development() -> Self {
        Self {
            environment: Environment::Development,
            database: DatabaseConfig {
                url: "memory://".to_string(),
                max_connections: 10,
                connection_timeout: 30,
                statement_timeout_ms: 30_000,
                tenant_max_connections: 5,
                tenant_pool_capacity: 16,
                tenant_idle_timeout_secs: 300,
                session_sweep_interval_secs: 300,
            },
            api: ApiConfig {
                port: 3000,
                request_timeout_secs: 60,
                enable_rate_limiting: true,
                rate_limit_requests: 30,
                rate_limit_window_secs: 60,
                redis_url: None,
                trust_forwarded_for: false,
            },
            security: SecurityConfig {
                jwt_secret: DEVELOPMENT_JWT_SECRET.to_string(),
                jwt_issuer: "portal-api-rust".to_string(),
                access_token_ttl_mins: 60,
                refresh_token_ttl_hours: 24 * 7,
                password_reset_ttl_mins: 60,
                min_password_length: 8,
                allow_registration: true,
                check_session_revocation: true,
                enable_cors: true,
                cors_origins: vec!["http://localhost:3000".to_string(), "http://localhost:5173".to_string()],
            },
            tenant: TenantConfig {
                conceal_existence: false,
            },
            audit: AuditConfig {
                enable_audit_logging: true,
                retention_days: 30,
                stats_top_n: 10,
                max_page_size: 200,
                write_timeout_ms: 2_000,
            },
        }
    }

    fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            database: DatabaseConfig {
                url: String::new(),
                max_connections: 20,
                connection_timeout: 10,
                statement_timeout_ms: 10_000,
                tenant_max_connections: 5,
                tenant_pool_capacity: 64,
                tenant_idle_timeout_secs: 300,
                session_sweep_interval_secs: 600,
            },
            api: ApiConfig {
                port: 3000,
                request_timeout_secs: 30,
                enable_rate_limiting: true,
                rate_limit_requests: 10,
                rate_limit_window_secs: 60,
                redis_url: None,
                trust_forwarded_for: true,
            },
            security: SecurityConfig {
                jwt_secret: String::new(),
                jwt_issuer: "portal-api-rust".to_string(),
                access_token_ttl_mins: 30,
                refresh_token_ttl_hours: 24 * 7,
                password_reset_ttl_mins: 30,
                min_password_length: 10,
                allow_registration: true,
                check_session_revocation: true,
                enable_cors: true,
                cors_origins: vec!["https://staging.example.com".to_string()],
            },
            tenant: TenantConfig {
                conceal_existence: true,
            },
            audit: AuditConfig {
                enable_audit_logging: true,
                retention_days: 90,
                stats_top_n: 10,
                max_page_size: 100,
                write_timeout_ms: 2_000,
            },
        }
    }

    fn production() -> Self {
        Self {
            environment: Environment::Production,
            database: DatabaseConfig {
                url: String::new(),
                max_connections: 50,
                connection_timeout: 5,
                statement_timeout_ms: 5_000,
                tenant_max_connections: 10,
                tenant_pool_capacity: 256,
                tenant_idle_timeout_secs: 600,
                session_sweep_interval_secs: 900,
            },
            api: ApiConfig {
                port: 3000,
                request_timeout_secs: 15,
                enable_rate_limiting: true,
                rate_limit_requests: 5,
                rate_limit_window_secs: 60,
                redis_url: None,
                trust_forwarded_for: true,
            },
            security: SecurityConfig {
                jwt_secret: String::new(),
                jwt_issuer: "portal-api-rust".to_string(),
                access_token_ttl_mins: 15,
                refresh_token_ttl_hours: 24 * 3,
                password_reset_ttl_mins: 15,
                min_password_length: 12,
                allow_registration: false,
                check_session_revocation: true,
                enable_cors: true,
                cors_origins: vec!["https://app.example.com".to_string()],
            },
            tenant: TenantConfig {
                conceal_existence: true,
            },
            audit: AuditConfig {
                enable_audit_logging: true,
                retention_days: 365,
                stats_top_n: 10,
                max_page_size: 100,
                write_timeout_ms: 2_000,
            },
        }
    }
}

// Global singleton config for the binaries - library components take config through constructors
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

// Convenience function for accessing config
pub fn config() -> &'static AppConfig {
    &CONFIG
}

#[macro_export]
macro_rules! is_production {
    () => {
        matches!($crate::config::CONFIG.environment, $crate::config::Environment::Production)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_development_config() {
        let config = AppConfig::development();
        assert!(config.uses_memory_store());
        assert!(config.security.allow_registration);
        assert!(!config.tenant.conceal_existence);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_production_config() {
        let config = AppConfig::production();
        assert!(!config.security.allow_registration);
        assert!(config.tenant.conceal_existence);
        assert_eq!(config.api.rate_limit_requests, 5);
    }

    #[test]
    fn production_requires_a_secret() {
        let mut config = AppConfig::production();
        assert!(matches!(config.validate(), Err(ConfigError::MissingJwtSecret)));

        config.security.jwt_secret = "short".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::WeakJwtSecret(_))));

        config.security.jwt_secret = "x".repeat(48);
        assert!(config.validate().is_ok());
    }
}
