use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use super::PgStore;
use crate::database::manager::DatabaseError;
use crate::database::models::{AuditFilter, AuditLog, CountBucket, NewAuditLog, TimeRange};
use crate::database::repository::{AuditDimension, AuditRepository};

fn push_range(qb: &mut QueryBuilder<'_, Postgres>, range: TimeRange) {
    if let Some(start) = range.start {
        qb.push(" AND created_at >= ").push_bind(start);
    }
    if let Some(end) = range.end {
        qb.push(" AND created_at < ").push_bind(end);
    }
}

fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &AuditFilter) {
    if let Some(user_id) = filter.user_id {
        qb.push(" AND user_id = ").push_bind(user_id);
    }
    if let Some(email) = &filter.user_email {
        qb.push(" AND user_email = ").push_bind(email.clone());
    }
    if let Some(action) = &filter.action {
        qb.push(" AND action = ").push_bind(action.clone());
    }
    if let Some(resource) = &filter.resource {
        qb.push(" AND resource = ").push_bind(resource.clone());
    }
    if let Some(resource_id) = &filter.resource_id {
        qb.push(" AND resource_id = ").push_bind(resource_id.clone());
    }
    if let Some(outcome) = filter.outcome {
        qb.push(" AND status = ").push_bind(outcome.as_str());
    }
    push_range(qb, filter.range);
}

#[async_trait]
impl AuditRepository for PgStore {
    async fn insert_audit_log(&self, entry: NewAuditLog) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO audit_logs \
             (id, user_id, user_email, action, resource, resource_id, details, ip_address, user_agent, status, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(Uuid::new_v4())
        .bind(entry.user_id)
        .bind(&entry.user_email)
        .bind(&entry.action)
        .bind(&entry.resource)
        .bind(&entry.resource_id)
        .bind(&entry.details)
        .bind(&entry.ip_address)
        .bind(&entry.user_agent)
        .bind(entry.outcome.as_str())
        .bind(entry.created_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn query_audit_logs(&self, filter: &AuditFilter) -> Result<(Vec<AuditLog>, i64), DatabaseError> {
        let mut count_qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM audit_logs WHERE TRUE");
        push_filter(&mut count_qb, filter);
        let total = count_qb.build_query_scalar::<i64>().fetch_one(self.pool()).await?;

        let mut qb = QueryBuilder::<Postgres>::new("SELECT * FROM audit_logs WHERE TRUE");
        push_filter(&mut qb, filter);
        qb.push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(filter.size)
            .push(" OFFSET ")
            .push_bind(filter.offset());
        let rows = qb.build_query_as::<AuditLog>().fetch_all(self.pool()).await?;

        Ok((rows, total))
    }

    async fn count_audit_logs(&self, range: TimeRange) -> Result<i64, DatabaseError> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM audit_logs WHERE TRUE");
        push_range(&mut qb, range);
        let total = qb.build_query_scalar::<i64>().fetch_one(self.pool()).await?;
        Ok(total)
    }

    async fn audit_counts_by(
        &self,
        dimension: AuditDimension,
        range: TimeRange,
        limit: Option<i64>,
    ) -> Result<Vec<CountBucket>, DatabaseError> {
        // Column names come from a closed enum, never from input.
        let column = dimension.column();
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {column} AS key, COUNT(*) AS count FROM audit_logs WHERE {column} IS NOT NULL"
        ));
        push_range(&mut qb, range);
        qb.push(format!(" GROUP BY {column} ORDER BY count DESC, key ASC"));
        if let Some(limit) = limit {
            qb.push(" LIMIT ").push_bind(limit);
        }
        let rows = qb.build_query_as::<CountBucket>().fetch_all(self.pool()).await?;
        Ok(rows)
    }

    async fn recent_audit_logs(&self, range: TimeRange, limit: i64) -> Result<Vec<AuditLog>, DatabaseError> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT * FROM audit_logs WHERE TRUE");
        push_range(&mut qb, range);
        qb.push(" ORDER BY created_at DESC, id DESC LIMIT ").push_bind(limit);
        let rows = qb.build_query_as::<AuditLog>().fetch_all(self.pool()).await?;
        Ok(rows)
    }

    async fn prune_audit_logs(&self, older_than: DateTime<Utc>) -> Result<u64, DatabaseError> {
        let result = sqlx::query("DELETE FROM audit_logs WHERE created_at < $1")
            .bind(older_than)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected())
    }
}
