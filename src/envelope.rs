//! Response envelope shared by every JSON endpoint.

use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: i64,
    pub total_pages: i64,
}

impl<T> ApiResponse<T> {
    pub fn success(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
            error: None,
            timestamp: Utc::now(),
            pagination: None,
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
            error: None,
            timestamp: Utc::now(),
            pagination: None,
        }
    }

    pub fn error(message: impl Into<String>, code: &str) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
            error: Some(code.to_string()),
            timestamp: Utc::now(),
            pagination: None,
        }
    }

    pub fn with_pagination(mut self, pagination: Pagination) -> Self {
        self.pagination = Some(pagination);
        self
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

impl Pagination {
    pub fn new(page: u32, limit: u32, total: i64) -> Self {
        let limit_i = i64::from(limit.max(1));
        Self {
            page,
            limit,
            total,
            total_pages: (total + limit_i - 1) / limit_i,
        }
    }
}

/// `?page=&size=` query parameters. Pages are zero-based.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PageParams {
    pub page: Option<u32>,
    pub size: Option<u32>,
}

pub const MAX_PAGE_SIZE: u32 = 100;

impl PageParams {
    pub fn resolve(&self, default_size: u32) -> (u32, u32) {
        let size = self.size.unwrap_or(default_size).clamp(1, MAX_PAGE_SIZE);
        (self.page.unwrap_or(0), size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_omits_error_and_pagination() {
        let json = serde_json::to_value(ApiResponse::success("ok", 5)).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["data"], 5);
        assert!(json.get("error").is_none());
        assert!(json.get("pagination").is_none());
    }

    #[test]
    fn message_only_omits_data() {
        let json = serde_json::to_value(ApiResponse::<()>::message("deleted")).unwrap();
        assert_eq!(json["message"], "deleted");
        assert!(json.get("data").is_none());
    }

    #[test]
    fn pagination_rounds_total_pages_up() {
        let p = Pagination::new(0, 10, 21);
        assert_eq!(p.total_pages, 3);
        assert_eq!(Pagination::new(0, 10, 0).total_pages, 0);
        assert_eq!(Pagination::new(1, 10, 10).total_pages, 1);
    }

    #[test]
    fn pagination_serializes_camel_case() {
        let json =
            serde_json::to_value(ApiResponse::success("ok", vec![1]).with_pagination(Pagination::new(0, 5, 6)))
                .unwrap();
        assert_eq!(json["pagination"]["totalPages"], 2);
        assert_eq!(json["pagination"]["limit"], 5);
    }

    #[test]
    fn page_params_clamp_size() {
        let params = PageParams {
            page: Some(2),
            size: Some(1000),
        };
        assert_eq!(params.resolve(10), (2, MAX_PAGE_SIZE));
        assert_eq!(PageParams::default().resolve(10), (0, 10));
        let zero = PageParams {
            page: None,
            size: Some(0),
        };
        assert_eq!(zero.resolve(10), (0, 1));
    }
}
