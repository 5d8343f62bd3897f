//! The paginated RPC boundary: request shape, response envelope and the
//! errors a fetch can end in.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;
use url::Url;

use crate::collection::{FetchTicket, Page};
use crate::record::Record;

pub const MAX_URL_LENGTH: usize = 2048;

/// Server-side filter parameters, rendered into the query string in key order.
pub type Filters = BTreeMap<String, String>;

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum FetchError {
    #[error("invalid endpoint '{url}': {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("network error: {message}")]
    Network { message: String },

    #[error("timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("server rejected request: {message}")]
    Rejected { message: String },

    #[error("invalid response: {reason}")]
    InvalidResponse { reason: String },
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Network { .. } | FetchError::Timeout { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiStatus {
    Success,
    Error,
}

/// `{status, data, hasMore?, message?}` as returned by every list endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiEnvelope {
    pub status: ApiStatus,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub has_more: Option<bool>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ApiEnvelope {
    pub fn success(data: Value) -> Self {
        Self {
            status: ApiStatus::Success,
            data,
            has_more: None,
            message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ApiStatus::Error,
            data: Value::Null,
            has_more: None,
            message: Some(message.into()),
        }
    }

    #[must_use]
    pub fn with_has_more(mut self, has_more: bool) -> Self {
        self.has_more = Some(has_more);
        self
    }

    /// Decodes `data` as one page of `T`. A `null` payload is an empty page.
    pub fn into_page<T: DeserializeOwned>(self, limit: u32) -> Result<Page<T>, FetchError> {
        if self.status == ApiStatus::Error {
            return Err(FetchError::Rejected {
                message: self
                    .message
                    .unwrap_or_else(|| "request failed".to_string()),
            });
        }

        let items = match self.data {
            Value::Null => Vec::new(),
            Value::Array(values) => values
                .into_iter()
                .map(serde_json::from_value)
                .collect::<Result<Vec<T>, _>>()
                .map_err(|e| FetchError::InvalidResponse {
                    reason: e.to_string(),
                })?,
            other => {
                return Err(FetchError::InvalidResponse {
                    reason: format!("expected an array of records, got {}", json_kind(&other)),
                })
            }
        };

        Ok(Page {
            items,
            limit,
            has_more: self.has_more,
        })
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Converts the transport result of a list call into a page of records.
pub fn page_from_http(
    result: crux_http::Result<crux_http::Response<ApiEnvelope>>,
    limit: u32,
) -> Result<Page<Record>, FetchError> {
    match result {
        Ok(mut response) => {
            if !response.status().is_success() {
                return Err(FetchError::Rejected {
                    message: format!("HTTP {}", response.status()),
                });
            }
            let envelope = response.take_body().ok_or_else(|| FetchError::InvalidResponse {
                reason: "empty body".to_string(),
            })?;
            envelope.into_page(limit)
        }
        Err(e) => Err(FetchError::Network {
            message: e.to_string(),
        }),
    }
}

/// One page request against a list endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub request_id: String,
    pub endpoint: String,
    pub page: u32,
    pub limit: u32,
    pub filters: Filters,
}

impl PageRequest {
    pub fn new(endpoint: impl Into<String>, ticket: FetchTicket, filters: &Filters) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            endpoint: endpoint.into(),
            page: ticket.page,
            limit: ticket.limit,
            filters: filters.clone(),
        }
    }

    /// `GET {base}/{endpoint}?page=&limit=&<filters>`.
    pub fn url(&self, base_url: &str) -> Result<Url, FetchError> {
        let joined = format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            self.endpoint.trim_start_matches('/')
        );
        let mut url = validate_base_url(&joined)?;

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("page", &self.page.to_string());
            query.append_pair("limit", &self.limit.to_string());
            for (key, value) in &self.filters {
                query.append_pair(key, value);
            }
        }

        Ok(url)
    }
}

/// Accepts absolute http(s) URLs with a host and without embedded credentials.
pub fn validate_base_url(raw: &str) -> Result<Url, FetchError> {
    let invalid = |reason: &str| FetchError::InvalidEndpoint {
        url: truncate_url(raw),
        reason: reason.to_string(),
    };

    if raw.trim().is_empty() {
        return Err(invalid("URL cannot be empty"));
    }
    if raw.len() > MAX_URL_LENGTH {
        return Err(invalid("URL exceeds maximum length"));
    }

    let parsed = Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid("only 'http' and 'https' are allowed"));
    }
    if parsed.host_str().is_none() {
        return Err(invalid("URL must have a host"));
    }
    if !parsed.username().is_empty() || parsed.password().is_some() {
        return Err(invalid("credentials in URL are not allowed"));
    }

    Ok(parsed)
}

pub(crate) fn truncate_url(url: &str) -> String {
    match url.char_indices().nth(100) {
        Some((cut, _)) => format!("{}...", &url[..cut]),
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ticket(page: u32) -> FetchTicket {
        FetchTicket {
            page,
            limit: 20,
            generation: 0,
        }
    }

    #[test]
    fn envelope_parses_camel_case_has_more() {
        let envelope: ApiEnvelope = serde_json::from_value(json!({
            "status": "success",
            "data": [{"id": 1}],
            "hasMore": false
        }))
        .unwrap();

        let page = envelope.into_page::<Record>(20).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page.has_more, Some(false));
        assert!(!page.has_more());
    }

    #[test]
    fn error_envelope_is_rejected_with_server_message() {
        let result = ApiEnvelope::error("branch closed").into_page::<Record>(20);
        assert_eq!(
            result,
            Err(FetchError::Rejected {
                message: "branch closed".into()
            })
        );
    }

    #[test]
    fn null_data_is_an_empty_page() {
        let page = ApiEnvelope::success(Value::Null)
            .into_page::<Record>(20)
            .unwrap();
        assert!(page.is_empty());
        assert!(!page.has_more());
    }

    #[test]
    fn object_data_is_invalid() {
        let result = ApiEnvelope::success(json!({"id": 1})).into_page::<Record>(20);
        assert!(matches!(result, Err(FetchError::InvalidResponse { .. })));
    }

    #[test]
    fn record_without_id_fails_the_page() {
        let result =
            ApiEnvelope::success(json!([{"id": 1}, {"name": "x"}])).into_page::<Record>(20);
        assert!(matches!(result, Err(FetchError::InvalidResponse { .. })));
    }

    #[test]
    fn request_url_carries_page_limit_and_sorted_filters() {
        let mut filters = Filters::new();
        filters.insert("status".into(), "overdue".into());
        filters.insert("branch".into(), "north 2".into());

        let request = PageRequest::new("/loans/collections", ticket(3), &filters);
        let url = request.url("https://api.example.com/v1/").unwrap();

        assert_eq!(
            url.as_str(),
            "https://api.example.com/v1/loans/collections?page=3&limit=20&branch=north+2&status=overdue"
        );
    }

    #[test]
    fn request_ids_are_unique() {
        let filters = Filters::new();
        let a = PageRequest::new("leads", ticket(1), &filters);
        let b = PageRequest::new("leads", ticket(1), &filters);
        assert_ne!(a.request_id, b.request_id);
    }

    #[test]
    fn base_url_validation() {
        assert!(validate_base_url("https://api.example.com").is_ok());
        assert!(validate_base_url("").is_err());
        assert!(validate_base_url("ftp://example.com").is_err());
        assert!(validate_base_url("https://user:pw@example.com").is_err());
        assert!(validate_base_url("not a url").is_err());
    }

    #[test]
    fn retryable_errors() {
        assert!(FetchError::Network {
            message: "x".into()
        }
        .is_retryable());
        assert!(FetchError::Timeout { timeout_ms: 10 }.is_retryable());
        assert!(!FetchError::Rejected {
            message: "x".into()
        }
        .is_retryable());
    }
}
