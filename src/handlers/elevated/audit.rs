// handlers/elevated/audit.rs - /audit-logs, /audit-logs/stats

use axum::extract::rejection::QueryRejection;
use axum::extract::{Extension, Query, State};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::database::models::{AuditFilter, AuditLog, AuditOutcome, AuditStats, TimeRange};
use crate::error::ApiError;
use crate::handlers::{check_offset, query_params, DEFAULT_PAGE_SIZE};
use crate::middleware::{ApiResponse, ApiResult, AuthUser};
use crate::server::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct AuditQuery {
    pub user_id: Option<Uuid>,
    pub user_email: Option<String>,
    pub action: Option<String>,
    pub resource: Option<String>,
    pub resource_id: Option<String>,
    pub status: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub page: Option<i64>,
    #[serde(alias = "per_page")]
    pub size: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StatsQuery {
    pub days: Option<i64>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PruneQuery {
    pub older_than_days: Option<i64>,
}

/// GET /audit-logs - filtered, newest first, paginated
pub async fn list(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    query: Result<Query<AuditQuery>, QueryRejection>,
) -> ApiResult<Vec<AuditLog>> {
    state.authz.authorize(auth.user_id, "audit", "read").await?;
    let query = query_params(query)?;

    let outcome = match query.status.as_deref() {
        None | Some("") => None,
        Some("success") => Some(AuditOutcome::Success),
        Some("failure") => Some(AuditOutcome::Failure),
        Some(other) => return Err(ApiError::bad_request(format!("Unknown status '{}'", other))),
    };
    let page = query.page.unwrap_or(1).max(1);
    let size = query
        .size
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, state.config.audit.max_page_size.max(1));
    check_offset(page, size)?;

    let filter = AuditFilter {
        user_id: query.user_id,
        user_email: non_empty(query.user_email),
        action: non_empty(query.action),
        resource: non_empty(query.resource),
        resource_id: non_empty(query.resource_id),
        outcome,
        range: parse_range(query.start_date.as_deref(), query.end_date.as_deref())?,
        page,
        size,
    };

    let page = state.audit.query(filter).await?;
    Ok(ApiResponse::paginated(page.entries, page.page, page.size, page.total))
}

/// GET /audit-logs/stats - counts by action, resource and status, top
/// actors and the latest entries. Defaults to the trailing 30 days.
pub async fn stats(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    query: Result<Query<StatsQuery>, QueryRejection>,
) -> ApiResult<AuditStats> {
    state.authz.authorize(auth.user_id, "audit", "read").await?;
    let query = query_params(query)?;

    let stats = if query.start_date.is_some() || query.end_date.is_some() {
        let range = parse_range(query.start_date.as_deref(), query.end_date.as_deref())?;
        state.audit.stats(range).await?
    } else {
        state.audit.stats_for_days(query.days.unwrap_or(30)).await?
    };
    Ok(ApiResponse::success(stats))
}

/// DELETE /audit-logs?older_than_days=N - apply the retention cutoff.
/// Irreversible.
pub async fn prune(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    query: Result<Query<PruneQuery>, QueryRejection>,
) -> ApiResult<Value> {
    state.authz.authorize(auth.user_id, "audit", "manage").await?;
    let query = query_params(query)?;
    let days = query.older_than_days.unwrap_or(state.config.audit.retention_days);
    if days < 1 {
        return Err(ApiError::bad_request("older_than_days must be at least 1"));
    }

    let removed = state.audit.prune_older_than_days(days).await?;
    state
        .audit
        .record(
            auth.actor()
                .entry("prune", "audit_log", AuditOutcome::Success)
                .details(json!({ "older_than_days": days, "removed": removed })),
        )
        .await;
    Ok(ApiResponse::success(json!({ "removed": removed, "older_than_days": days })))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// `start_date` is inclusive. A bare `end_date` day includes that whole day.
pub fn parse_range(start: Option<&str>, end: Option<&str>) -> Result<TimeRange, ApiError> {
    let start = start.filter(|s| !s.is_empty()).map(|s| parse_instant(s, false)).transpose()?;
    let end = end.filter(|s| !s.is_empty()).map(|s| parse_instant(s, true)).transpose()?;
    if let (Some(s), Some(e)) = (start, end) {
        if s >= e {
            return Err(ApiError::bad_request("start_date must be before end_date"));
        }
    }
    Ok(TimeRange { start, end })
}

fn parse_instant(raw: &str, end_of_day: bool) -> Result<DateTime<Utc>, ApiError> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(at.with_timezone(&Utc));
    }
    let day = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| ApiError::bad_request(format!("Invalid date '{}', expected YYYY-MM-DD or RFC 3339", raw)))?;
    let midnight = day
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| ApiError::bad_request(format!("Invalid date '{}'", raw)))?
        .and_utc();
    Ok(if end_of_day { midnight + Duration::days(1) } else { midnight })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_end_date_covers_the_whole_day() {
        let range = parse_range(Some("2024-03-01"), Some("2024-03-01")).unwrap();
        assert_eq!(range.end.unwrap() - range.start.unwrap(), Duration::days(1));
    }

    #[test]
    fn rfc3339_is_accepted() {
        let range = parse_range(Some("2024-03-01T10:00:00Z"), None).unwrap();
        assert_eq!(range.start.unwrap().to_rfc3339(), "2024-03-01T10:00:00+00:00");
        assert!(range.end.is_none());
    }

    #[test]
    fn garbage_and_inverted_ranges_are_rejected() {
        assert!(parse_range(Some("yesterday"), None).is_err());
        assert!(parse_range(Some("2024-03-02"), Some("2024-03-01T00:00:00Z")).is_err());
    }
}
