// Copyright 2022-2024 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! Typed accessors over the raw request parameter map.

use blockhost_api::Params;
use serde_json::Value;

use crate::validate::ValidationError;

pub fn get_int(params: &Params, key: &str) -> Option<i64> {
    params.get(key).and_then(Value::as_i64)
}

pub fn get_str<'a>(params: &'a Params, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str)
}

pub fn require_str<'a>(
    params: &'a Params,
    key: &'static str,
) -> Result<&'a str, ValidationError> {
    get_str(params, key).ok_or(ValidationError::NotAString(key))
}

/// The value of `key` if it is a string, or `default` when absent.
pub fn str_or<'a>(
    params: &'a Params,
    key: &'static str,
    default: &'a str,
) -> Result<&'a str, ValidationError> {
    match params.get(key) {
        None => Ok(default),
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(ValidationError::NotAString(key)),
    }
}

pub fn require_list<'a>(
    params: &'a Params,
    key: &'static str,
) -> Result<&'a Vec<Value>, ValidationError> {
    match params.get(key) {
        Some(Value::Array(items)) => Ok(items),
        _ => Err(ValidationError::NotAList(key)),
    }
}

pub fn require_map<'a>(
    params: &'a Params,
    key: &'static str,
) -> Result<&'a serde_json::Map<String, Value>, ValidationError> {
    match params.get(key) {
        Some(Value::Object(map)) => Ok(map),
        _ => Err(ValidationError::NotAMap(key)),
    }
}

/// Render a scalar parameter value as a single argv element.
pub fn scalar_to_arg(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
