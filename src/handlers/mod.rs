// handlers/mod.rs - three handler tiers
//
// Public (no auth) → Protected (bearer auth, optionally tenant-scoped)
// → Elevated (bearer auth plus a platform permission)
pub mod elevated;
pub mod protected;
pub mod public;

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query};
use axum::Json;
use serde::Deserialize;

use crate::error::ApiError;

pub const DEFAULT_PAGE_SIZE: i64 = 50;
pub const MAX_PAGE_SIZE: i64 = 200;

/// Unwrap a JSON body, turning axum's rejection into the error envelope.
pub fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ApiError::bad_request(rejection.body_text()).with_code("INVALID_JSON"))
}

pub fn path_params<T>(params: Result<Path<T>, PathRejection>) -> Result<T, ApiError> {
    params
        .map(|Path(value)| value)
        .map_err(|rejection| ApiError::bad_request(rejection.body_text()).with_code("INVALID_PATH"))
}

pub fn query_params<T>(params: Result<Query<T>, QueryRejection>) -> Result<T, ApiError> {
    params
        .map(|Query(value)| value)
        .map_err(|rejection| ApiError::bad_request(rejection.body_text()).with_code("INVALID_QUERY"))
}

/// `?page=&size=` (also accepts `per_page`).
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    #[serde(alias = "per_page")]
    pub size: Option<i64>,
}

impl PageQuery {
    pub fn page(&self) -> i64 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn size(&self) -> i64 {
        self.size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }

    /// `(page, size)` after checking the row offset is representable.
    pub fn window(&self) -> Result<(i64, i64), ApiError> {
        let (page, size) = (self.page(), self.size());
        check_offset(page, size)?;
        Ok((page, size))
    }
}

/// Reject pages whose `(page - 1) * size` offset overflows.
pub fn check_offset(page: i64, size: i64) -> Result<i64, ApiError> {
    (page.max(1) - 1)
        .checked_mul(size.max(0))
        .ok_or_else(|| ApiError::bad_request("page is out of range").with_code("INVALID_PAGE"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn huge_page_is_rejected() {
        let paging = PageQuery {
            page: Some(i64::MAX),
            size: Some(50),
        };
        let err = paging.window().unwrap_err();
        assert_eq!(err.error_code(), "INVALID_PAGE");
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn defaults_and_clamping() {
        let paging = PageQuery {
            page: Some(0),
            size: Some(10_000),
        };
        assert_eq!(paging.window().unwrap(), (1, MAX_PAGE_SIZE));
        assert_eq!(PageQuery::default().window().unwrap(), (1, DEFAULT_PAGE_SIZE));
    }
}
