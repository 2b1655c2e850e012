use serde::{Deserialize, Serialize};

use super::node_key::{GenericNodeKey, InstanceKey};
use crate::imodel_access::{ClassDerivationCache, Result};

/// Identifies a node in a filtering path.  Deserializes from either an
/// instance key (`{ className, id }`) or a generic key (`{ id, source? }`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HierarchyNodeIdentifier {
    Instance(InstanceKey),
    Generic(GenericNodeKey),
}

impl HierarchyNodeIdentifier {
    pub fn instance(class_name: &str, id: &str) -> Self {
        HierarchyNodeIdentifier::Instance(InstanceKey::new(class_name, id))
    }

    pub fn generic(id: &str) -> Self {
        HierarchyNodeIdentifier::Generic(GenericNodeKey::new(id))
    }
}

/// Identifier equality.  Generic identifiers compare by `(id, source)`;
/// instance identifiers compare by canonical id and `imodel_key`, and additionally
/// require the classes to be compatible, which needs the metadata provider.
///
/// There is no `Hash` that agrees with this relation, so callers that dedup
/// identifiers have to scan linearly.
pub async fn identifiers_equal(
    lhs: &HierarchyNodeIdentifier,
    rhs: &HierarchyNodeIdentifier,
    classes: &ClassDerivationCache,
) -> Result<bool> {
    match (lhs, rhs) {
        (HierarchyNodeIdentifier::Generic(lhs), HierarchyNodeIdentifier::Generic(rhs)) => {
            Ok(lhs == rhs)
        }
        (HierarchyNodeIdentifier::Instance(lhs), HierarchyNodeIdentifier::Instance(rhs)) => {
            if lhs.canonical_id() != rhs.canonical_id() || lhs.imodel_key != rhs.imodel_key {
                return Ok(false);
            }
            classes
                .classes_compatible(&lhs.class_name, &rhs.class_name)
                .await
        }
        _ => Ok(false),
    }
}

/// `true` / `false` expand (or not) every node on the path; `{ depth }`
/// expands nodes whose hierarchy depth is below `depth`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AutoExpandOption {
    Flag(bool),
    UntilDepth { depth: usize },
}

impl AutoExpandOption {
    /// Deterministic merge used when several paths end on the same node: an
    /// unconditional `true` wins, otherwise the smallest depth wins, and a
    /// plain `false` only survives if both sides are `false`.
    pub fn merge(lhs: &AutoExpandOption, rhs: &AutoExpandOption) -> AutoExpandOption {
        use AutoExpandOption::*;
        match (lhs, rhs) {
            (Flag(true), _) | (_, Flag(true)) => Flag(true),
            (UntilDepth { depth: l }, UntilDepth { depth: r }) => UntilDepth {
                depth: (*l).min(*r),
            },
            (UntilDepth { depth }, Flag(false)) | (Flag(false), UntilDepth { depth }) => {
                UntilDepth { depth: *depth }
            }
            (Flag(false), Flag(false)) => Flag(false),
        }
    }

    pub fn expands_at_depth(&self, depth: usize) -> bool {
        match self {
            AutoExpandOption::Flag(flag) => *flag,
            AutoExpandOption::UntilDepth { depth: until } => depth < *until,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilteringPathOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_expand: Option<AutoExpandOption>,
}

/// Options attached to a filter target; the same shape as the options of the
/// path(s) that ended on it.
pub type FilterTargetOptions = FilteringPathOptions;

pub fn merge_filter_target_options(
    lhs: Option<FilterTargetOptions>,
    rhs: Option<&FilterTargetOptions>,
) -> Option<FilterTargetOptions> {
    match (lhs, rhs) {
        (None, None) => None,
        (Some(lhs), None) => Some(lhs),
        (None, Some(rhs)) => Some(rhs.clone()),
        (Some(lhs), Some(rhs)) => Some(FilteringPathOptions {
            auto_expand: match (&lhs.auto_expand, &rhs.auto_expand) {
                (Some(l), Some(r)) => Some(AutoExpandOption::merge(l, r)),
                (Some(l), None) => Some(l.clone()),
                (None, r) => r.clone(),
            },
        }),
    }
}

/// A filtering path as the consumer gives it to us: either a bare list of
/// identifiers or the list together with options.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HierarchyFilteringPath {
    Bare(Vec<HierarchyNodeIdentifier>),
    WithOptions {
        path: Vec<HierarchyNodeIdentifier>,
        #[serde(default)]
        options: Option<FilteringPathOptions>,
    },
}

impl HierarchyFilteringPath {
    pub fn normalize(self) -> NormalizedFilteringPath {
        match self {
            HierarchyFilteringPath::Bare(path) => NormalizedFilteringPath {
                path,
                options: None,
            },
            HierarchyFilteringPath::WithOptions { path, options } => {
                NormalizedFilteringPath { path, options }
            }
        }
    }
}

impl From<Vec<HierarchyNodeIdentifier>> for HierarchyFilteringPath {
    fn from(path: Vec<HierarchyNodeIdentifier>) -> Self {
        HierarchyFilteringPath::Bare(path)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct NormalizedFilteringPath {
    pub path: Vec<HierarchyNodeIdentifier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<FilteringPathOptions>,
}
