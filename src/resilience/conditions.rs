//! Retry condition evaluation.
//!
//! # Responsibilities
//! - Compile declarative conditions once, at endpoint build time
//! - Judge a completed upstream response against them
//!
//! # Design Decisions
//! - Status codes: a single code is an exact match, `A-B` an inclusive range
//! - Header values: a bare string, a numeric literal, or a JSON array of
//!   accepted values; the header name is matched case-insensitively
//! - A list of conditions is a logical OR, so its order never matters

use std::collections::HashSet;

use axum::http::{HeaderName, Response};
use thiserror::Error;

use crate::config::ConditionConfig;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConditionError {
    #[error("invalid status code condition '{raw}': {reason}")]
    StatusCode { raw: String, reason: String },

    #[error("invalid header name '{name}' in condition")]
    HeaderName { name: String },

    #[error("invalid header value condition '{raw}': {reason}")]
    HeaderValue { raw: String, reason: String },
}

/// A condition ready for evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompiledCondition {
    /// Inclusive status code range; a single code has `low == high`.
    StatusCode { low: u16, high: u16 },
    Header {
        name: HeaderName,
        accepted: HashSet<String>,
    },
}

impl CompiledCondition {
    /// Whether the response matches this condition.
    pub fn judge<B>(&self, response: &Response<B>) -> bool {
        match self {
            CompiledCondition::StatusCode { low, high } => {
                let code = response.status().as_u16();
                *low <= code && code <= *high
            }
            CompiledCondition::Header { name, accepted } => response
                .headers()
                .get_all(name)
                .iter()
                .filter_map(|value| value.to_str().ok())
                .any(|value| accepted.contains(value.trim())),
        }
    }
}

/// Compile a configured condition.
pub fn prepare(config: &ConditionConfig) -> Result<CompiledCondition, ConditionError> {
    match config {
        ConditionConfig::ByStatusCode(raw) => prepare_status_code(raw),
        ConditionConfig::ByHeader(header) => {
            let name = HeaderName::from_bytes(header.name.trim().as_bytes()).map_err(|_| {
                ConditionError::HeaderName {
                    name: header.name.clone(),
                }
            })?;
            Ok(CompiledCondition::Header {
                name,
                accepted: parse_accepted_values(&header.value)?,
            })
        }
    }
}

/// Compile every condition, failing on the first malformed one.
pub fn prepare_all(configs: &[ConditionConfig]) -> Result<Vec<CompiledCondition>, ConditionError> {
    configs.iter().map(prepare).collect()
}

/// True if any condition matches; `on_empty` when there are none.
pub fn judge_all<B>(conditions: &[CompiledCondition], response: &Response<B>, on_empty: bool) -> bool {
    if conditions.is_empty() {
        return on_empty;
    }
    conditions.iter().any(|condition| condition.judge(response))
}

fn prepare_status_code(raw: &str) -> Result<CompiledCondition, ConditionError> {
    let invalid = |reason: &str| ConditionError::StatusCode {
        raw: raw.to_string(),
        reason: reason.to_string(),
    };

    let parts: Vec<&str> = raw.split('-').map(str::trim).collect();
    if parts.len() > 2 {
        return Err(invalid("expected a code or a range 'low-high'"));
    }

    let codes = parts
        .iter()
        .map(|part| part.parse::<u16>().map_err(|_| invalid("status codes must be numeric")))
        .collect::<Result<Vec<_>, _>>()?;

    match codes.as_slice() {
        [code] => Ok(CompiledCondition::StatusCode { low: *code, high: *code }),
        [low, high] if low <= high => Ok(CompiledCondition::StatusCode { low: *low, high: *high }),
        [_, _] => Err(invalid("range start is greater than its end")),
        _ => Err(invalid("expected a code or a range 'low-high'")),
    }
}

fn parse_accepted_values(raw: &str) -> Result<HashSet<String>, ConditionError> {
    let raw = raw.trim();
    let invalid = |reason: String| ConditionError::HeaderValue {
        raw: raw.to_string(),
        reason,
    };

    if !raw.starts_with('[') {
        return Ok(HashSet::from([raw.to_string()]));
    }

    let values: Vec<serde_json::Value> =
        serde_json::from_str(raw).map_err(|e| invalid(e.to_string()))?;

    values
        .into_iter()
        .map(|value| match value {
            serde_json::Value::String(s) => Ok(s),
            serde_json::Value::Number(n) => Ok(n.to_string()),
            other => Err(invalid(format!("unsupported array element {other}"))),
        })
        .collect()
}
