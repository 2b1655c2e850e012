use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{
    identifiers::{FilterTargetOptions, NormalizedFilteringPath},
    node_key::{GenericNodeKey, GroupingNodeKey, HierarchyNodeKey, InstanceKey},
};

/// Either a plain on/off switch or a parameter block, the way hierarchy
/// definitions spell grouping directives (`"byClass": true` or
/// `"byClass": { "hideIfNoSiblings": true }`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlagOrParams<T> {
    Flag(bool),
    Params(T),
}

impl<T: Clone + Default> FlagOrParams<T> {
    pub fn params(&self) -> Option<T> {
        match self {
            FlagOrParams::Flag(true) => Some(T::default()),
            FlagOrParams::Flag(false) => None,
            FlagOrParams::Params(params) => Some(params.clone()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GroupingAutoExpand {
    Always,
    SingleChild,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseGroupingParams {
    #[serde(default)]
    pub hide_if_no_siblings: bool,
    #[serde(default)]
    pub hide_if_one_grouped_node: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_expand: Option<GroupingAutoExpand>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseClassGroupingParams {
    pub full_class_names: Vec<String>,
    #[serde(default)]
    pub hide_if_no_siblings: bool,
    #[serde(default)]
    pub hide_if_one_grouped_node: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_expand: Option<GroupingAutoExpand>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyValueRange {
    pub from_value: f64,
    pub to_value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_label: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyGroup {
    pub property_name: String,
    /// The value of the property for the node being grouped; a JSON primitive.
    #[serde(default)]
    pub property_value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ranges: Option<Vec<PropertyValueRange>>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertiesGroupingParams {
    pub properties_class_name: String,
    pub property_groups: Vec<PropertyGroup>,
    #[serde(default)]
    pub create_group_for_unspecified_values: bool,
    #[serde(default)]
    pub create_group_for_out_of_range_values: bool,
    #[serde(default)]
    pub hide_if_no_siblings: bool,
    #[serde(default)]
    pub hide_if_one_grouped_node: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_expand: Option<GroupingAutoExpand>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum LabelGroupingAction {
    #[serde(rename_all = "camelCase")]
    Group {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        group_id: Option<String>,
        #[serde(default)]
        hide_if_no_siblings: bool,
        #[serde(default)]
        hide_if_one_grouped_node: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        auto_expand: Option<GroupingAutoExpand>,
    },
    #[serde(rename_all = "camelCase")]
    Merge {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        group_id: Option<String>,
    },
}

impl Default for LabelGroupingAction {
    fn default() -> Self {
        LabelGroupingAction::Group {
            group_id: None,
            hide_if_no_siblings: false,
            hide_if_one_grouped_node: false,
            auto_expand: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceNodeGroupingParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub by_label: Option<FlagOrParams<LabelGroupingAction>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub by_class: Option<FlagOrParams<BaseGroupingParams>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub by_base_classes: Option<BaseClassGroupingParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub by_properties: Option<PropertiesGroupingParams>,
}

/// Which grouping handler family a grouping node came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum GroupingType {
    BaseClass,
    Class,
    Property,
    Label,
}

/// The hiding and auto-expand knobs shared by every grouping flavor.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GroupingPolicy {
    pub hide_if_no_siblings: bool,
    pub hide_if_one_grouped_node: bool,
    pub auto_expand: Option<GroupingAutoExpand>,
}

impl InstanceNodeGroupingParams {
    pub fn policy(&self, grouping_type: GroupingType) -> Option<GroupingPolicy> {
        match grouping_type {
            GroupingType::BaseClass => self.by_base_classes.as_ref().map(|p| GroupingPolicy {
                hide_if_no_siblings: p.hide_if_no_siblings,
                hide_if_one_grouped_node: p.hide_if_one_grouped_node,
                auto_expand: p.auto_expand,
            }),
            GroupingType::Class => self
                .by_class
                .as_ref()
                .and_then(|p| p.params())
                .map(|p| GroupingPolicy {
                    hide_if_no_siblings: p.hide_if_no_siblings,
                    hide_if_one_grouped_node: p.hide_if_one_grouped_node,
                    auto_expand: p.auto_expand,
                }),
            GroupingType::Property => self.by_properties.as_ref().map(|p| GroupingPolicy {
                hide_if_no_siblings: p.hide_if_no_siblings,
                hide_if_one_grouped_node: p.hide_if_one_grouped_node,
                auto_expand: p.auto_expand,
            }),
            GroupingType::Label => match self.by_label.as_ref().and_then(|p| p.params()) {
                Some(LabelGroupingAction::Group {
                    hide_if_no_siblings,
                    hide_if_one_grouped_node,
                    auto_expand,
                    ..
                }) => Some(GroupingPolicy {
                    hide_if_no_siblings,
                    hide_if_one_grouped_node,
                    auto_expand,
                }),
                _ => None,
            },
        }
    }
}

/// Directives the hierarchy definition attaches to a node to control what
/// happens to it after it's been parsed.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingParams {
    #[serde(default)]
    pub hide_if_no_children: bool,
    #[serde(default)]
    pub hide_in_hierarchy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grouping: Option<InstanceNodeGroupingParams>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PathPosition {
    pub path_index: usize,
    pub position: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeFilteringProps {
    pub is_filter_target: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_target_options: Option<FilterTargetOptions>,
    pub has_filter_target_ancestor: bool,
    /// Positions in the session's filtering paths this node was matched at.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub filter_paths_identifier_positions: Vec<PathPosition>,
    /// The remainders of the matched paths, to be consumed by the child level.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub filtered_children_identifier_paths: Vec<NormalizedFilteringPath>,
}

impl NodeFilteringProps {
    pub fn is_on_filtered_path(&self) -> bool {
        self.is_filter_target
            || !self.filtered_children_identifier_paths.is_empty()
            || !self.filter_paths_identifier_positions.is_empty()
    }

    pub fn merge(mut self, other: &NodeFilteringProps) -> NodeFilteringProps {
        self.is_filter_target |= other.is_filter_target;
        self.has_filter_target_ancestor |= other.has_filter_target_ancestor;
        self.filter_target_options = super::identifiers::merge_filter_target_options(
            self.filter_target_options,
            other.filter_target_options.as_ref(),
        );
        for position in &other.filter_paths_identifier_positions {
            if !self.filter_paths_identifier_positions.contains(position) {
                self.filter_paths_identifier_positions.push(*position);
            }
        }
        self.filtered_children_identifier_paths
            .extend(other.filtered_children_identifier_paths.iter().cloned());
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedInstanceNode {
    /// Never empty; more than one key when nodes were merged by label.
    pub key: Vec<InstanceKey>,
    pub label: String,
    pub parent_keys: Vec<HierarchyNodeKey>,
    /// `None` when the definition didn't say whether the node has children.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_params: Option<ProcessingParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filtering: Option<NodeFilteringProps>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_expand: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extended_data: Option<Map<String, Value>>,
}

impl ProcessedInstanceNode {
    pub fn class_name(&self) -> &str {
        self.key.first().map(|k| k.class_name.as_str()).unwrap_or("")
    }

    pub fn grouping_params(&self) -> Option<&InstanceNodeGroupingParams> {
        self.processing_params.as_ref()?.grouping.as_ref()
    }

    pub fn grouping_policy(&self, grouping_type: GroupingType) -> Option<GroupingPolicy> {
        self.grouping_params()?.policy(grouping_type)
    }

    pub fn with_parent_key(mut self, key: HierarchyNodeKey) -> Self {
        self.parent_keys.push(key);
        self
    }

    /// Fold `other` into this node, the way label merging combines nodes that
    /// represent the same thing.
    pub fn merged_with(self, other: ProcessedInstanceNode) -> ProcessedInstanceNode {
        let children = match (self.children, other.children) {
            (Some(true), _) | (_, Some(true)) => Some(true),
            (Some(false), Some(false)) => Some(false),
            _ => None,
        };
        let auto_expand = match (self.auto_expand, other.auto_expand) {
            (Some(true), _) | (_, Some(true)) => Some(true),
            _ => None,
        };
        let filtering = match (self.filtering, other.filtering.as_ref()) {
            (Some(lhs), Some(rhs)) => Some(lhs.merge(rhs)),
            (Some(lhs), None) => Some(lhs),
            (None, rhs) => rhs.cloned(),
        };
        let mut key = self.key;
        key.extend(other.key);
        ProcessedInstanceNode {
            key,
            label: self.label,
            parent_keys: self.parent_keys,
            children,
            processing_params: self.processing_params,
            filtering,
            auto_expand,
            extended_data: self.extended_data,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedGenericNode {
    pub key: GenericNodeKey,
    pub label: String,
    pub parent_keys: Vec<HierarchyNodeKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_params: Option<ProcessingParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filtering: Option<NodeFilteringProps>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_expand: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extended_data: Option<Map<String, Value>>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedGroupingNode {
    pub key: GroupingNodeKey,
    pub label: String,
    pub parent_keys: Vec<HierarchyNodeKey>,
    pub children: Vec<ProcessedHierarchyNode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_expand: Option<bool>,
}

impl ProcessedGroupingNode {
    /// Build a grouping node over `members`, re-parenting them under the new
    /// node's key.
    pub fn new(
        key: GroupingNodeKey,
        label: String,
        parent_keys: Vec<HierarchyNodeKey>,
        members: Vec<ProcessedInstanceNode>,
    ) -> Self {
        let own_key = HierarchyNodeKey::Grouping(key.clone());
        ProcessedGroupingNode {
            key,
            label,
            parent_keys,
            children: members
                .into_iter()
                .map(|member| ProcessedHierarchyNode::Instances(member.with_parent_key(own_key.clone())))
                .collect(),
            auto_expand: None,
        }
    }

    /// Hierarchy depth of the grouping node itself.
    pub fn depth(&self) -> usize {
        self.parent_keys.len()
    }

    pub fn instance_children(&self) -> impl Iterator<Item = &ProcessedInstanceNode> {
        self.children.iter().filter_map(|child| match child {
            ProcessedHierarchyNode::Instances(node) => Some(node),
            _ => None,
        })
    }

    /// Undo the grouping: give back the instance children with this node's
    /// key removed from their parent keys.
    pub fn into_members(self) -> Vec<ProcessedInstanceNode> {
        let own_key = HierarchyNodeKey::Grouping(self.key);
        self.children
            .into_iter()
            .filter_map(|child| match child {
                ProcessedHierarchyNode::Instances(mut node) => {
                    if node.parent_keys.last() == Some(&own_key) {
                        node.parent_keys.pop();
                    }
                    Some(node)
                }
                _ => None,
            })
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ProcessedHierarchyNode {
    Instances(ProcessedInstanceNode),
    Generic(ProcessedGenericNode),
    Grouping(ProcessedGroupingNode),
}

impl ProcessedHierarchyNode {
    pub fn label(&self) -> &str {
        match self {
            ProcessedHierarchyNode::Instances(node) => &node.label,
            ProcessedHierarchyNode::Generic(node) => &node.label,
            ProcessedHierarchyNode::Grouping(node) => &node.label,
        }
    }

    pub fn key(&self) -> HierarchyNodeKey {
        match self {
            ProcessedHierarchyNode::Instances(node) => HierarchyNodeKey::Instances(node.key.clone()),
            ProcessedHierarchyNode::Generic(node) => HierarchyNodeKey::Generic(node.key.clone()),
            ProcessedHierarchyNode::Grouping(node) => HierarchyNodeKey::Grouping(node.key.clone()),
        }
    }

    pub fn parent_keys(&self) -> &[HierarchyNodeKey] {
        match self {
            ProcessedHierarchyNode::Instances(node) => &node.parent_keys,
            ProcessedHierarchyNode::Generic(node) => &node.parent_keys,
            ProcessedHierarchyNode::Grouping(node) => &node.parent_keys,
        }
    }

    pub fn set_parent_keys(&mut self, parent_keys: Vec<HierarchyNodeKey>) {
        match self {
            ProcessedHierarchyNode::Instances(node) => node.parent_keys = parent_keys,
            ProcessedHierarchyNode::Generic(node) => node.parent_keys = parent_keys,
            ProcessedHierarchyNode::Grouping(node) => node.parent_keys = parent_keys,
        }
    }

    /// Keys of this node's children: our parent keys plus our own key.
    pub fn child_parent_keys(&self) -> Vec<HierarchyNodeKey> {
        let mut keys = self.parent_keys().to_vec();
        keys.push(self.key());
        keys
    }

    pub fn auto_expand(&self) -> Option<bool> {
        match self {
            ProcessedHierarchyNode::Instances(node) => node.auto_expand,
            ProcessedHierarchyNode::Generic(node) => node.auto_expand,
            ProcessedHierarchyNode::Grouping(node) => node.auto_expand,
        }
    }

    pub fn with_auto_expand(self, auto_expand: bool) -> Self {
        match self {
            ProcessedHierarchyNode::Instances(node) => {
                ProcessedHierarchyNode::Instances(ProcessedInstanceNode {
                    auto_expand: Some(auto_expand),
                    ..node
                })
            }
            ProcessedHierarchyNode::Generic(node) => {
                ProcessedHierarchyNode::Generic(ProcessedGenericNode {
                    auto_expand: Some(auto_expand),
                    ..node
                })
            }
            ProcessedHierarchyNode::Grouping(node) => {
                ProcessedHierarchyNode::Grouping(ProcessedGroupingNode {
                    auto_expand: Some(auto_expand),
                    ..node
                })
            }
        }
    }

    pub fn filtering(&self) -> Option<&NodeFilteringProps> {
        match self {
            ProcessedHierarchyNode::Instances(node) => node.filtering.as_ref(),
            ProcessedHierarchyNode::Generic(node) => node.filtering.as_ref(),
            ProcessedHierarchyNode::Grouping(_) => None,
        }
    }

    pub fn processing_params(&self) -> Option<&ProcessingParams> {
        match self {
            ProcessedHierarchyNode::Instances(node) => node.processing_params.as_ref(),
            ProcessedHierarchyNode::Generic(node) => node.processing_params.as_ref(),
            ProcessedHierarchyNode::Grouping(_) => None,
        }
    }

    /// `Some(true)` / `Some(false)` when we know whether the node has children.
    /// Grouping nodes always have children.
    pub fn has_children(&self) -> Option<bool> {
        match self {
            ProcessedHierarchyNode::Instances(node) => node.children,
            ProcessedHierarchyNode::Generic(node) => node.children,
            ProcessedHierarchyNode::Grouping(node) => Some(!node.children.is_empty()),
        }
    }

    pub fn with_children_flag(self, has_children: bool) -> Self {
        match self {
            ProcessedHierarchyNode::Instances(node) => {
                ProcessedHierarchyNode::Instances(ProcessedInstanceNode {
                    children: Some(has_children),
                    ..node
                })
            }
            ProcessedHierarchyNode::Generic(node) => {
                ProcessedHierarchyNode::Generic(ProcessedGenericNode {
                    children: Some(has_children),
                    ..node
                })
            }
            grouping @ ProcessedHierarchyNode::Grouping(_) => grouping,
        }
    }

    /// Is this node, or for grouping nodes any node below it, a filter target
    /// or on the way to one?
    pub fn leads_to_filter_target(&self) -> bool {
        match self {
            ProcessedHierarchyNode::Grouping(node) => {
                node.children.iter().any(|child| child.leads_to_filter_target())
            }
            _ => self
                .filtering()
                .map(|filtering| filtering.is_on_filtered_path())
                .unwrap_or(false),
        }
    }
}
