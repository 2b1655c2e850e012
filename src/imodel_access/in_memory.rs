use std::{
    collections::HashMap,
    sync::atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;

use super::{
    access_interface::{
        ECClassInfo, ECMetadataProvider, ECSchemaInfo, ErrorLayer, HierarchyError, Result,
    },
    class_derivation::{normalize_full_class_name, parse_full_class_name},
};

struct InMemoryClass {
    info: ECClassInfo,
    base_classes: Vec<String>,
}

/// Metadata provider backed by a set of class declarations held in memory.
///
/// This is what hierarchy definitions use in their tests, and what consumers
/// can use when the schema set is small and known up front.  Class names are
/// matched case-insensitively, like EC does.
#[derive(Default)]
pub struct InMemoryMetadata {
    schemas: HashMap<String, ECSchemaInfo>,
    classes: HashMap<String, InMemoryClass>,
    derivation_checks: AtomicUsize,
}

impl InMemoryMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a class along with its direct base classes.  The schema is
    /// implicitly declared.
    pub fn with_class(mut self, full_class_name: &str, label: Option<&str>, bases: &[&str]) -> Self {
        let full_name = normalize_full_class_name(full_class_name);
        let (schema_name, class_name) = match parse_full_class_name(&full_name) {
            Ok(parts) => parts,
            Err(_) => return self,
        };
        self.schemas
            .entry(schema_name.to_lowercase())
            .or_insert_with(|| ECSchemaInfo {
                name: schema_name.to_string(),
                alias: None,
            });
        self.classes.insert(
            full_name.to_lowercase(),
            InMemoryClass {
                info: ECClassInfo {
                    full_name: full_name.clone(),
                    name: class_name.to_string(),
                    label: label.map(str::to_string),
                },
                base_classes: bases.iter().map(|b| normalize_full_class_name(b)).collect(),
            },
        );
        self
    }

    /// Number of `class_derives_from` calls this provider has served.
    pub fn derivation_checks(&self) -> usize {
        self.derivation_checks.load(Ordering::SeqCst)
    }

    fn lookup(&self, full_class_name: &str) -> Result<&InMemoryClass> {
        self.classes
            .get(&normalize_full_class_name(full_class_name).to_lowercase())
            .ok_or_else(|| {
                HierarchyError::sticky(
                    ErrorLayer::MetadataLayer,
                    format!("Invalid class \"{}\"", full_class_name),
                )
            })
    }
}

#[async_trait]
impl ECMetadataProvider for InMemoryMetadata {
    async fn get_schema(&self, schema_name: &str) -> Result<Option<ECSchemaInfo>> {
        Ok(self.schemas.get(&schema_name.to_lowercase()).cloned())
    }

    async fn get_class(
        &self,
        schema: &ECSchemaInfo,
        class_name: &str,
    ) -> Result<Option<ECClassInfo>> {
        let key = format!("{}.{}", schema.name, class_name).to_lowercase();
        Ok(self.classes.get(&key).map(|class| class.info.clone()))
    }

    async fn class_derives_from(
        &self,
        derived_class_name: &str,
        base_class_name: &str,
    ) -> Result<bool> {
        self.derivation_checks.fetch_add(1, Ordering::SeqCst);

        let target = normalize_full_class_name(base_class_name).to_lowercase();
        let mut pending = vec![self.lookup(derived_class_name)?];
        while let Some(class) = pending.pop() {
            if class.info.full_name.to_lowercase() == target {
                return Ok(true);
            }
            for base in &class.base_classes {
                pending.push(self.lookup(base)?);
            }
        }
        Ok(false)
    }
}
