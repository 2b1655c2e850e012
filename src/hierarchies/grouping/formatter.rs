use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::imodel_access::Result;

/// Turns raw property values into the strings grouping nodes are labelled and
/// keyed with.  Consumers inject their own to apply units, locales and the
/// like.
#[async_trait]
pub trait PropertyValueFormatter {
    async fn format(&self, value: &Value) -> Result<String>;
}

pub type PropertyValueFormatterRef = Arc<dyn PropertyValueFormatter + Send + Sync>;

#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultPropertyValueFormatter;

#[async_trait]
impl PropertyValueFormatter for DefaultPropertyValueFormatter {
    async fn format(&self, value: &Value) -> Result<String> {
        Ok(match value {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            Value::Bool(b) => b.to_string(),
            Value::Number(num) => {
                if let Some(i) = num.as_i64() {
                    i.to_string()
                } else if let Some(u) = num.as_u64() {
                    u.to_string()
                } else {
                    match num.as_f64() {
                        Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
                        Some(f) => f.to_string(),
                        None => num.to_string(),
                    }
                }
            }
            other => other.to_string(),
        })
    }
}
