use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use tracing::{error, trace};
use ustr::{ustr, Ustr};

use super::access_interface::{ECClassInfo, ECMetadataProvider, ErrorLayer, HierarchyError, Result};

pub type MetadataProviderRef = Arc<dyn ECMetadataProvider + Send + Sync>;

/// EC full class names come in both `Schema.Class` and `Schema:Class`
/// flavors; we always work with the former.
pub fn normalize_full_class_name(full_class_name: &str) -> String {
    full_class_name.replacen(':', ".", 1)
}

pub fn parse_full_class_name(full_class_name: &str) -> Result<(&str, &str)> {
    match full_class_name.split_once(|c| c == '.' || c == ':') {
        Some((schema, class)) if !schema.is_empty() && !class.is_empty() => Ok((schema, class)),
        _ => Err(HierarchyError::sticky(
            ErrorLayer::BadInput,
            format!("Invalid full class name \"{}\"", full_class_name),
        )),
    }
}

/// Resolve a full class name through the metadata provider.  A missing schema
/// or class is fatal for whatever operation asked for it.
pub async fn get_class(
    metadata: &(dyn ECMetadataProvider + Send + Sync),
    full_class_name: &str,
) -> Result<ECClassInfo> {
    let (schema_name, class_name) = parse_full_class_name(full_class_name)?;
    let schema = match metadata.get_schema(schema_name).await? {
        Some(schema) => schema,
        None => {
            error!(schema_name, "schema lookup failed");
            return Err(HierarchyError::sticky(
                ErrorLayer::MetadataLayer,
                format!("Invalid schema \"{}\"", schema_name),
            ));
        }
    };
    match metadata.get_class(&schema, class_name).await? {
        Some(class) => Ok(class),
        None => {
            error!(schema_name, class_name, "class lookup failed");
            Err(HierarchyError::sticky(
                ErrorLayer::MetadataLayer,
                format!(
                    "Invalid class \"{}\" in schema \"{}\"",
                    class_name, schema_name
                ),
            ))
        }
    }
}

/// Per-session memoization of class-derivation checks.
///
/// Sibling rows frequently ask the same `(derived, base)` question, so we keep
/// the answers for as long as the owning filtering session lives.  A new
/// session gets a new cache; nothing is shared across sessions.
pub struct ClassDerivationCache {
    metadata: MetadataProviderRef,
    known: Mutex<HashMap<(Ustr, Ustr), bool>>,
}

impl ClassDerivationCache {
    pub fn new(metadata: MetadataProviderRef) -> Self {
        Self {
            metadata,
            known: Mutex::new(HashMap::new()),
        }
    }

    pub fn metadata(&self) -> &MetadataProviderRef {
        &self.metadata
    }

    pub async fn class_derives_from(&self, derived: &str, base: &str) -> Result<bool> {
        let key = (
            ustr(&normalize_full_class_name(derived)),
            ustr(&normalize_full_class_name(base)),
        );
        if key.0.eq_ignore_ascii_case(&key.1) {
            return Ok(true);
        }

        // The lock is never held across the metadata call.
        if let Some(known) = self.known.lock().unwrap().get(&key) {
            return Ok(*known);
        }

        let derives = self
            .metadata
            .class_derives_from(key.0.as_str(), key.1.as_str())
            .await?;
        trace!(derived = %key.0, base = %key.1, derives, "class derivation check");
        self.known.lock().unwrap().insert(key, derives);
        Ok(derives)
    }

    /// Two classes are compatible if either derives from the other.
    pub async fn classes_compatible(&self, lhs: &str, rhs: &str) -> Result<bool> {
        Ok(self.class_derives_from(lhs, rhs).await? || self.class_derives_from(rhs, lhs).await?)
    }
}
