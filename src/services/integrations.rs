use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::database::models::AuditOutcome;
use crate::services::audit::AuditRecorder;
use crate::services::Actor;

#[derive(Debug, Error)]
pub enum IntegrationError {
    #[error("Integration '{0}' is not registered")]
    NotFound(String),

    #[error("Invalid integration request: {0}")]
    InvalidRequest(String),

    #[error("Integration upstream failed: {0}")]
    Upstream(String),

    #[error("Integration timed out after {0:?}")]
    Timeout(Duration),
}

/// Tenant and caller an invocation runs on behalf of.
#[derive(Debug, Clone, Copy)]
pub struct InvocationContext {
    pub organization_id: Uuid,
    pub user_id: Option<Uuid>,
}

/// A third-party client reachable through the portal.
#[async_trait]
pub trait Integration: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    async fn invoke(&self, context: InvocationContext, request: Value) -> Result<Value, IntegrationError>;
}

#[derive(Debug, Clone, Serialize)]
pub struct IntegrationInfo {
    pub name: String,
    pub description: String,
}

/// Integrations by name. Built once at start-up, read-only afterwards.
#[derive(Default, Clone)]
pub struct IntegrationRegistry {
    integrations: BTreeMap<String, Arc<dyn Integration>>,
}

impl IntegrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Later registrations under the same name replace earlier ones.
    pub fn register(mut self, integration: Arc<dyn Integration>) -> Self {
        self.integrations.insert(integration.name().to_string(), integration);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Integration>> {
        self.integrations.get(name).cloned()
    }

    pub fn list(&self) -> Vec<IntegrationInfo> {
        self.integrations
            .values()
            .map(|i| IntegrationInfo {
                name: i.name().to_string(),
                description: i.description().to_string(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.integrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.integrations.is_empty()
    }
}

/// Invokes registered integrations with a deadline and records every call.
pub struct IntegrationGateway {
    registry: IntegrationRegistry,
    audit: Arc<AuditRecorder>,
    timeout: Duration,
}

impl IntegrationGateway {
    pub fn new(registry: IntegrationRegistry, audit: Arc<AuditRecorder>, timeout: Duration) -> Self {
        Self {
            registry,
            audit,
            timeout,
        }
    }

    pub fn list(&self) -> Vec<IntegrationInfo> {
        self.registry.list()
    }

    pub async fn invoke(
        &self,
        name: &str,
        organization_id: Uuid,
        request: Value,
        actor: &Actor,
    ) -> Result<Value, IntegrationError> {
        let integration = self
            .registry
            .get(name)
            .ok_or_else(|| IntegrationError::NotFound(name.to_string()))?;

        let context = InvocationContext {
            organization_id,
            user_id: actor.user_id,
        };
        let result = match tokio::time::timeout(self.timeout, integration.invoke(context, request)).await {
            Ok(result) => result,
            Err(_) => Err(IntegrationError::Timeout(self.timeout)),
        };

        let (outcome, details) = match &result {
            Ok(_) => {
                info!(integration = name, organization = %organization_id, "Integration invoked");
                (AuditOutcome::Success, json!({ "organization_id": organization_id }))
            }
            Err(e) => {
                warn!(integration = name, organization = %organization_id, error = %e, "Integration failed");
                (
                    AuditOutcome::Failure,
                    json!({ "organization_id": organization_id, "error": e.to_string() }),
                )
            }
        };
        self.audit
            .record(
                actor
                    .entry("invoke", "integration", outcome)
                    .resource_id(name)
                    .details(details),
            )
            .await;

        result
    }
}
