use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::imodel_access::{ErrorLayer, HierarchyError, Result, Row};

/// Query engines hand booleans back as numbers, so accept both.
pub fn row_flag(row: &Row, column: &str) -> Option<bool> {
    match row.get(column)? {
        Value::Bool(flag) => Some(*flag),
        Value::Number(num) => Some(num.as_f64().map(|n| n != 0.0).unwrap_or(false)),
        Value::String(s) => Some(s == "1" || s.eq_ignore_ascii_case("true")),
        _ => None,
    }
}

pub fn row_bool(row: &Row, column: &str) -> bool {
    row_flag(row, column).unwrap_or(false)
}

pub fn row_str<'a>(row: &'a Row, column: &str) -> Option<&'a str> {
    match row.get(column)? {
        Value::String(s) => Some(s.as_str()),
        _ => None,
    }
}

pub fn row_required_str<'a>(row: &'a Row, column: &str) -> Result<&'a str> {
    row_str(row, column).ok_or_else(|| {
        HierarchyError::sticky(
            ErrorLayer::DataLayer,
            format!("row is missing the \"{}\" column", column),
        )
    })
}

/// Read a column holding serialized JSON.  `NULL` reads as `None`; anything
/// that doesn't parse is an error rather than silently treated as absent.
pub fn row_json<T: DeserializeOwned>(row: &Row, column: &str) -> Result<Option<T>> {
    match row.get(column) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(serde_json::from_str(s)?)),
        Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
    }
}
