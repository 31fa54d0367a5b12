use std::fmt;
use uuid::Uuid;

use crate::database::manager::quote_identifier;

/// Schema namespace holding one tenant's tables. Built only from the
/// organization id and always stored in quoted form, so it can be spliced into
/// SQL as an identifier and never as anything else.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TenantNamespace {
    name: String,
    quoted: String,
}

impl TenantNamespace {
    pub fn for_organization(organization_id: Uuid) -> Self {
        let name = organization_id.to_string();
        let quoted = quote_identifier(&name);
        Self { name, quoted }
    }

    /// Unquoted schema name, for logs and catalog lookups.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Quoted identifier, safe to place in a SQL statement.
    pub fn quoted(&self) -> &str {
        &self.quoted
    }
}

impl fmt::Display for TenantNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.quoted)
    }
}

/// Resolved target of a tenant-scoped operation: which organization, which
/// namespace, and which physical store.
#[derive(Debug, Clone)]
pub struct TenantScope {
    pub organization_id: Uuid,
    pub namespace: TenantNamespace,
    pub address: String,
}

const ORGANIZATION_USER_COLUMNS: &str =
    "id, email, name, password_hash, is_active, sso_subject, last_login_at, created_at, updated_at";

/// The fixed set of statements that may run against a tenant store. Values are
/// always bound parameters; the namespace is the only spliced token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TenantQuery {
    CreateNamespace,
    CreateUsersTable,
    ListUsers,
    CountUsers,
    FindUser,
    InsertUser,
    DeleteUser,
}

impl TenantQuery {
    pub fn render(&self, namespace: &TenantNamespace) -> String {
        let ns = namespace.quoted();
        match self {
            TenantQuery::CreateNamespace => format!("CREATE SCHEMA IF NOT EXISTS {ns}"),
            TenantQuery::CreateUsersTable => format!(
                "CREATE TABLE IF NOT EXISTS {ns}.users (\
                 id UUID PRIMARY KEY, \
                 email TEXT NOT NULL UNIQUE, \
                 name TEXT NOT NULL, \
                 password_hash TEXT, \
                 is_active BOOLEAN NOT NULL DEFAULT TRUE, \
                 sso_subject TEXT, \
                 last_login_at TIMESTAMPTZ, \
                 created_at TIMESTAMPTZ NOT NULL DEFAULT now(), \
                 updated_at TIMESTAMPTZ NOT NULL DEFAULT now())"
            ),
            TenantQuery::ListUsers => format!(
                "SELECT {ORGANIZATION_USER_COLUMNS} FROM {ns}.users \
                 ORDER BY created_at, id LIMIT $1 OFFSET $2"
            ),
            TenantQuery::CountUsers => format!("SELECT COUNT(*) FROM {ns}.users"),
            TenantQuery::FindUser => {
                format!("SELECT {ORGANIZATION_USER_COLUMNS} FROM {ns}.users WHERE id = $1")
            }
            TenantQuery::InsertUser => format!(
                "INSERT INTO {ns}.users (id, email, name, sso_subject) VALUES ($1, $2, $3, $4) \
                 RETURNING {ORGANIZATION_USER_COLUMNS}"
            ),
            TenantQuery::DeleteUser => format!("DELETE FROM {ns}.users WHERE id = $1"),
        }
    }
}

/// Render `template` against the namespace of `organization_id`.
pub fn qualified_query(template: TenantQuery, organization_id: Uuid) -> String {
    template.render(&TenantNamespace::for_organization(organization_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_is_quoted_organization_id() {
        let id = Uuid::new_v4();
        let ns = TenantNamespace::for_organization(id);
        assert_eq!(ns.name(), id.to_string());
        assert_eq!(ns.quoted(), format!("\"{}\"", id));
    }

    #[test]
    fn every_table_reference_is_qualified() {
        let id = Uuid::new_v4();
        let prefix = format!("\"{}\".users", id);
        for template in [
            TenantQuery::CreateUsersTable,
            TenantQuery::ListUsers,
            TenantQuery::CountUsers,
            TenantQuery::FindUser,
            TenantQuery::InsertUser,
            TenantQuery::DeleteUser,
        ] {
            let sql = qualified_query(template, id);
            assert!(sql.contains(&prefix), "{:?} not qualified: {}", template, sql);
            assert_eq!(sql.matches(".users").count(), 1);
        }
    }

    #[test]
    fn different_organizations_render_different_namespaces() {
        let a = qualified_query(TenantQuery::ListUsers, Uuid::new_v4());
        let b = qualified_query(TenantQuery::ListUsers, Uuid::new_v4());
        assert_ne!(a, b);
    }
}
