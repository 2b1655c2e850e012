use serde::{Deserialize, Serialize};

/// Key of a single EC instance.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceKey {
    pub class_name: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imodel_key: Option<String>,
}

impl InstanceKey {
    pub fn new(class_name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            id: id.into(),
            imodel_key: None,
        }
    }

    /// The id in canonical form, or lowercased as given when it isn't a
    /// valid instance id.
    pub fn canonical_id(&self) -> String {
        canonical_instance_id(&self.id).unwrap_or_else(|| self.id.to_lowercase())
    }
}

/// Canonical form of an instance id: lowercase hex with a `0x` prefix and no
/// leading zeros.  Hex and decimal input are accepted; `None` for anything
/// else.
pub fn canonical_instance_id(id: &str) -> Option<String> {
    let (digits, radix) = match id.strip_prefix("0x").or_else(|| id.strip_prefix("0X")) {
        Some(hex) => (hex, 16),
        None => (id, 10),
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return None;
    }
    let value = u64::from_str_radix(digits, radix).ok()?;
    Some(format!("0x{:x}", value))
}

/// Key of a node that doesn't represent an instance; the hierarchy definition
/// picks the `id` and, optionally, a `source` to disambiguate ids coming from
/// different data sources.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GenericNodeKey {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl GenericNodeKey {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyIdentity {
    pub class_name: String,
    pub property_name: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum GroupingNodeKey {
    #[serde(rename_all = "camelCase")]
    ClassGrouping { class_name: String },
    #[serde(rename_all = "camelCase")]
    LabelGrouping {
        label: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        group_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    PropertyValueGrouping {
        properties_class_name: String,
        property_name: String,
        formatted_property_value: String,
    },
    #[serde(rename_all = "camelCase")]
    PropertyValueRangeGrouping {
        properties_class_name: String,
        property_name: String,
        from_value: f64,
        to_value: f64,
    },
    #[serde(rename_all = "camelCase")]
    PropertyOtherValuesGrouping { properties: Vec<PropertyIdentity> },
}

impl GroupingNodeKey {
    /// Name of the property this key groups by, for any of the property
    /// grouping flavors.
    pub fn grouped_property_name(&self) -> Option<&str> {
        match self {
            GroupingNodeKey::PropertyValueGrouping { property_name, .. }
            | GroupingNodeKey::PropertyValueRangeGrouping { property_name, .. } => {
                Some(property_name)
            }
            GroupingNodeKey::PropertyOtherValuesGrouping { properties } => {
                properties.first().map(|p| p.property_name.as_str())
            }
            GroupingNodeKey::ClassGrouping { .. } | GroupingNodeKey::LabelGrouping { .. } => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "key", rename_all = "kebab-case")]
pub enum HierarchyNodeKey {
    Instances(Vec<InstanceKey>),
    Generic(GenericNodeKey),
    Grouping(GroupingNodeKey),
}

impl HierarchyNodeKey {
    pub fn is_class_grouping(&self) -> bool {
        matches!(
            self,
            HierarchyNodeKey::Grouping(GroupingNodeKey::ClassGrouping { .. })
        )
    }

    pub fn as_grouping(&self) -> Option<&GroupingNodeKey> {
        match self {
            HierarchyNodeKey::Grouping(key) => Some(key),
            _ => None,
        }
    }
}
