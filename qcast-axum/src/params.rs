//! Request bodies for the queue endpoints and the loose-typed field parsing
//! they share with the real-time channel.

use axum::http::{header, HeaderMap};
use qcast_core::{QcastError, TenantId};
use serde::Deserialize;
use serde_json::Value;

use crate::orchestrator::QueueOperation;

pub const DEFAULT_QUEUE_STATUS: &str = "ALL";

/// Kitchen display selectors the remote side understands.
pub const KDS_TYPES: [i32; 2] = [1, 4];

/// Clients send ids as JSON strings or numbers.
pub fn tenant_from_value(value: &Value) -> Option<TenantId> {
    let id = match value {
        Value::String(s) => TenantId::new(s.as_str()),
        Value::Number(n) => TenantId::new(n.to_string()),
        _ => return None,
    };
    (!id.is_empty()).then_some(id)
}

fn text_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Accepts `1`, `4`, `"1"` or `"4"`.
pub fn parse_kds_type(value: &Value) -> Option<i32> {
    let n = match value {
        Value::Number(n) => n.as_i64()?,
        Value::String(s) => s.trim().parse::<i64>().ok()?,
        _ => return None,
    };
    i32::try_from(n).ok().filter(|k| KDS_TYPES.contains(k))
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginBody {
    #[serde(rename = "RestID", default)]
    pub rest_id: Value,
}

impl LoginBody {
    pub fn tenant(&self) -> Result<TenantId, QcastError> {
        tenant_from_value(&self.rest_id).ok_or_else(|| QcastError::bad_request("RestID is required"))
    }
}

/// Body shared by the three token-protected execute endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct ExecuteBody {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(rename = "QueStatus", default)]
    pub que_status: Option<String>,
    #[serde(rename = "TrnID", default)]
    pub trn_id: Value,
    #[serde(rename = "kdsType", default)]
    pub kds_type: Value,
}

impl ExecuteBody {
    /// Body `token`, then the `Authorization: Bearer` header.
    pub fn token<'a>(&'a self, headers: &'a HeaderMap) -> Result<&'a str, QcastError> {
        let from_body = self.token.as_deref().map(str::trim).filter(|t| !t.is_empty());
        let from_header = || {
            headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(qcast_auth::bearer_token)
        };
        from_body
            .or_else(from_header)
            .ok_or_else(|| QcastError::bad_request("JWT token is required"))
    }

    pub fn queue_listing(&self) -> QueueOperation {
        let status = self
            .que_status
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_QUEUE_STATUS);
        QueueOperation::QueueListing {
            status: status.to_string(),
        }
    }

    pub fn transaction_lookup(&self) -> Result<QueueOperation, QcastError> {
        let trn_id = text_from_value(&self.trn_id).ok_or_else(|| QcastError::bad_request("TrnID is required"))?;
        Ok(QueueOperation::TransactionLookup { trn_id })
    }

    pub fn kitchen_display(&self) -> Result<QueueOperation, QcastError> {
        let kds_type = parse_kds_type(&self.kds_type)
            .ok_or_else(|| QcastError::bad_request("KDS type is required and must be 1 or 4"))?;
        Ok(QueueOperation::KitchenDisplay { kds_type })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use serde_json::json;

    #[test]
    fn kds_type_accepts_numbers_and_numeric_strings() {
        assert_eq!(parse_kds_type(&json!(1)), Some(1));
        assert_eq!(parse_kds_type(&json!("4")), Some(4));
        assert_eq!(parse_kds_type(&json!(2)), None);
        assert_eq!(parse_kds_type(&json!("x")), None);
        assert_eq!(parse_kds_type(&Value::Null), None);
    }

    #[test]
    fn blank_status_defaults_to_all() {
        let body: ExecuteBody = serde_json::from_value(json!({"token": "t", "QueStatus": ""})).unwrap();
        assert_eq!(body.queue_listing(), QueueOperation::QueueListing { status: "ALL".into() });
    }

    #[test]
    fn token_falls_back_to_bearer_header() {
        let body = ExecuteBody::default();
        let mut headers = HeaderMap::new();
        assert!(body.token(&headers).is_err());

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(body.token(&headers).unwrap(), "abc");
    }

    #[test]
    fn numeric_rest_id_is_accepted() {
        let body: LoginBody = serde_json::from_value(json!({"RestID": 7})).unwrap();
        assert_eq!(body.tenant().unwrap().as_str(), "7");

        let missing: LoginBody = serde_json::from_value(json!({})).unwrap();
        assert!(missing.tenant().is_err());
    }
}
