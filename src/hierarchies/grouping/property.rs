use async_trait::async_trait;
use serde_json::{json, Value};

use super::{
    group_parent_keys, sort_groups_by_label, sort_nodes_by_label, GroupingContext,
    GroupingHandler, GroupingHandlerResult,
};
use crate::{
    hierarchies::{
        node_key::{GroupingNodeKey, PropertyIdentity},
        nodes::{
            GroupingType, PropertiesGroupingParams, PropertyGroup, PropertyValueRange,
            ProcessedGroupingNode, ProcessedInstanceNode,
        },
    },
    imodel_access::{normalize_full_class_name, Result},
};

pub const UNSPECIFIED_VALUE_LABEL: &str = "Not specified";
pub const OTHER_VALUES_LABEL: &str = "Other";

/// One distinct property grouping configuration: a property at a given
/// grouping level, below the properties listed before it.
#[derive(Clone, Debug, PartialEq)]
pub struct PropertyGroupingInfo {
    pub properties_class_name: String,
    pub property_name: String,
    pub ranges: Option<Vec<PropertyValueRange>>,
    pub previous_property_names: Vec<String>,
    pub level: usize,
}

impl PropertyGroupingInfo {
    pub fn from_params(params: &PropertiesGroupingParams) -> Vec<PropertyGroupingInfo> {
        let properties_class_name = normalize_full_class_name(&params.properties_class_name);
        params
            .property_groups
            .iter()
            .enumerate()
            .map(|(level, group)| PropertyGroupingInfo {
                properties_class_name: properties_class_name.clone(),
                property_name: group.property_name.clone(),
                ranges: group.ranges.clone(),
                previous_property_names: params.property_groups[..level]
                    .iter()
                    .map(|g| g.property_name.clone())
                    .collect(),
                level,
            })
            .collect()
    }
}

/// Groups nodes by the value of one property; exact values, ranges, and the
/// catch-all buckets for unspecified and out-of-range values.
#[derive(Debug)]
pub struct PropertyGroupingHandler {
    info: PropertyGroupingInfo,
}

enum Bucket {
    Group(GroupingNodeKey, String),
    None,
}

impl PropertyGroupingHandler {
    pub fn new(info: PropertyGroupingInfo) -> Self {
        PropertyGroupingHandler { info }
    }

    /// The node's params for this handler's property, if the node is
    /// configured exactly the way this handler is and already sits below the
    /// groups for the preceding properties.
    fn applicable_group<'a>(
        &self,
        node: &'a ProcessedInstanceNode,
    ) -> Option<(&'a PropertiesGroupingParams, &'a PropertyGroup)> {
        let params = node.grouping_params()?.by_properties.as_ref()?;
        if !normalize_full_class_name(&params.properties_class_name)
            .eq_ignore_ascii_case(&self.info.properties_class_name)
        {
            return None;
        }
        let group = params.property_groups.get(self.info.level)?;
        if group.property_name != self.info.property_name || group.ranges != self.info.ranges {
            return None;
        }
        let previous_match = params.property_groups[..self.info.level]
            .iter()
            .map(|g| &g.property_name)
            .eq(self.info.previous_property_names.iter());
        if !previous_match {
            return None;
        }

        let level = self.info.level;
        if node.parent_keys.len() < level {
            return None;
        }
        let parents_match = node.parent_keys[node.parent_keys.len() - level..]
            .iter()
            .zip(&self.info.previous_property_names)
            .all(|(key, name)| {
                key.as_grouping().and_then(|k| k.grouped_property_name()) == Some(name.as_str())
            });
        if !parents_match {
            return None;
        }
        Some((params, group))
    }

    async fn bucket_for(
        &self,
        params: &PropertiesGroupingParams,
        group: &PropertyGroup,
        context: &GroupingContext,
    ) -> Result<Bucket> {
        let value = &group.property_value;
        let unspecified = match value {
            Value::Null => true,
            Value::String(s) => s.is_empty(),
            _ => false,
        };
        if unspecified {
            return Ok(if params.create_group_for_unspecified_values {
                Bucket::Group(
                    GroupingNodeKey::PropertyValueGrouping {
                        properties_class_name: self.info.properties_class_name.clone(),
                        property_name: self.info.property_name.clone(),
                        formatted_property_value: String::new(),
                    },
                    UNSPECIFIED_VALUE_LABEL.to_string(),
                )
            } else {
                Bucket::None
            });
        }

        if let Some(ranges) = &group.ranges {
            let number = match value {
                Value::Number(num) => num.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            };
            let matching = number.and_then(|number| {
                ranges
                    .iter()
                    .find(|range| range.from_value <= number && number <= range.to_value)
            });
            return Ok(match matching {
                Some(range) => {
                    let label = match &range.range_label {
                        Some(label) => label.clone(),
                        None => format!(
                            "{} - {}",
                            context.formatter.format(&json!(range.from_value)).await?,
                            context.formatter.format(&json!(range.to_value)).await?
                        ),
                    };
                    Bucket::Group(
                        GroupingNodeKey::PropertyValueRangeGrouping {
                            properties_class_name: self.info.properties_class_name.clone(),
                            property_name: self.info.property_name.clone(),
                            from_value: range.from_value,
                            to_value: range.to_value,
                        },
                        label,
                    )
                }
                None if params.create_group_for_out_of_range_values => Bucket::Group(
                    GroupingNodeKey::PropertyOtherValuesGrouping {
                        properties: vec![PropertyIdentity {
                            class_name: self.info.properties_class_name.clone(),
                            property_name: self.info.property_name.clone(),
                        }],
                    },
                    OTHER_VALUES_LABEL.to_string(),
                ),
                None => Bucket::None,
            });
        }

        let formatted = context.formatter.format(value).await?;
        Ok(Bucket::Group(
            GroupingNodeKey::PropertyValueGrouping {
                properties_class_name: self.info.properties_class_name.clone(),
                property_name: self.info.property_name.clone(),
                formatted_property_value: formatted.clone(),
            },
            formatted,
        ))
    }
}

#[async_trait]
impl GroupingHandler for PropertyGroupingHandler {
    fn grouping_type(&self) -> GroupingType {
        GroupingType::Property
    }

    async fn group(
        &self,
        nodes: Vec<ProcessedInstanceNode>,
        context: &GroupingContext,
    ) -> Result<GroupingHandlerResult> {
        let mut buckets: Vec<(GroupingNodeKey, String, Vec<ProcessedInstanceNode>)> = Vec::new();
        let mut ungrouped = Vec::new();
        for node in nodes {
            let bucket = match self.applicable_group(&node) {
                Some((params, group)) => {
                    if !context
                        .classes
                        .class_derives_from(node.class_name(), &self.info.properties_class_name)
                        .await?
                    {
                        Bucket::None
                    } else {
                        self.bucket_for(params, group, context).await?
                    }
                }
                None => Bucket::None,
            };
            match bucket {
                Bucket::None => ungrouped.push(node),
                Bucket::Group(key, label) => {
                    match buckets.iter_mut().find(|(known, _, _)| *known == key) {
                        Some((_, _, members)) => members.push(node),
                        None => buckets.push((key, label, vec![node])),
                    }
                }
            }
        }

        let mut grouped: Vec<ProcessedGroupingNode> = buckets
            .into_iter()
            .map(|(key, label, members)| {
                let parent_keys = group_parent_keys(&members);
                ProcessedGroupingNode::new(key, label, parent_keys, members)
            })
            .collect();
        sort_groups_by_label(&mut grouped);
        sort_nodes_by_label(&mut ungrouped);

        Ok(GroupingHandlerResult {
            grouped,
            ungrouped,
            grouping_type: GroupingType::Property,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::{
        hierarchies::{
            grouping::{create_grouping_handlers, group_nodes, DefaultPropertyValueFormatter},
            node_key::InstanceKey,
            nodes::{InstanceNodeGroupingParams, ProcessedHierarchyNode, ProcessingParams},
        },
        imodel_access::{ClassDerivationCache, InMemoryMetadata},
    };

    fn context() -> GroupingContext {
        GroupingContext {
            classes: ClassDerivationCache::new(Arc::new(
                InMemoryMetadata::new()
                    .with_class("BisCore.Element", None, &[])
                    .with_class("BisCore.PhysicalElement", None, &["BisCore.Element"]),
            )),
            formatter: Arc::new(DefaultPropertyValueFormatter),
            cancel: CancellationToken::new(),
        }
    }

    fn node(id: &str, property_groups: Vec<PropertyGroup>) -> ProcessedHierarchyNode {
        ProcessedHierarchyNode::Instances(ProcessedInstanceNode {
            key: vec![InstanceKey::new("BisCore.PhysicalElement", id)],
            label: id.to_string(),
            processing_params: Some(ProcessingParams {
                grouping: Some(InstanceNodeGroupingParams {
                    by_properties: Some(PropertiesGroupingParams {
                        properties_class_name: "BisCore:Element".to_string(),
                        property_groups,
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    fn group(property_name: &str, property_value: Value) -> PropertyGroup {
        PropertyGroup {
            property_name: property_name.to_string(),
            property_value,
            ranges: None,
        }
    }

    #[tokio::test]
    async fn groups_by_exact_values_at_two_levels() {
        let context = context();
        let nodes = vec![
            node("0x1", vec![group("Color", json!("red")), group("Size", json!(1))]),
            node("0x2", vec![group("Color", json!("red")), group("Size", json!(2))]),
            node("0x3", vec![group("Color", json!("blue")), group("Size", json!(1))]),
        ];
        let handlers = create_grouping_handlers(&nodes, &context).await.unwrap();
        assert_eq!(handlers.len(), 2);
        let result = group_nodes(nodes, 0, &handlers, &context).await.unwrap();

        let labels: Vec<&str> = result.iter().map(|n| n.label()).collect();
        assert_eq!(labels, vec!["blue", "red"]);
        let red = match &result[1] {
            ProcessedHierarchyNode::Grouping(group) => group,
            other => panic!("unexpected {:?}", other),
        };
        let sizes: Vec<&str> = red.children.iter().map(|n| n.label()).collect();
        assert_eq!(sizes, vec!["1", "2"]);
        assert_eq!(
            red.key,
            GroupingNodeKey::PropertyValueGrouping {
                properties_class_name: "BisCore.Element".to_string(),
                property_name: "Color".to_string(),
                formatted_property_value: "red".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn unspecified_values_get_their_own_group_when_asked() {
        let context = context();
        let mut with_flag = node("0x1", vec![group("Color", Value::Null)]);
        if let ProcessedHierarchyNode::Instances(node) = &mut with_flag {
            if let Some(params) = node
                .processing_params
                .as_mut()
                .and_then(|p| p.grouping.as_mut())
                .and_then(|g| g.by_properties.as_mut())
            {
                params.create_group_for_unspecified_values = true;
            }
        }
        let nodes = vec![with_flag, node("0x2", vec![group("Color", json!(""))])];
        let handlers = create_grouping_handlers(&nodes, &context).await.unwrap();
        let result = group_nodes(nodes, 0, &handlers, &context).await.unwrap();

        assert_eq!(result.len(), 2);
        let unspecified = result
            .iter()
            .find_map(|n| match n {
                ProcessedHierarchyNode::Grouping(group) => Some(group),
                _ => None,
            })
            .unwrap();
        assert_eq!(unspecified.label, UNSPECIFIED_VALUE_LABEL);
        assert_eq!(unspecified.children[0].label(), "0x1");
        assert!(result.iter().any(|n| n.label() == "0x2"));
    }

    fn ranged(property_value: Value, ranges: &[(f64, f64)]) -> PropertyGroup {
        PropertyGroup {
            ranges: Some(
                ranges
                    .iter()
                    .map(|&(from_value, to_value)| PropertyValueRange {
                        from_value,
                        to_value,
                        range_label: None,
                    })
                    .collect(),
            ),
            ..group("Weight", property_value)
        }
    }

    fn members(node: &ProcessedHierarchyNode) -> Vec<&str> {
        match node {
            ProcessedHierarchyNode::Grouping(group) => {
                group.children.iter().map(|n| n.label()).collect()
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn range_bounds_are_inclusive_on_both_ends() {
        let context = context();
        let ranges = [(0.0, 10.0), (11.0, 20.0)];
        let nodes = vec![
            node("0x1", vec![ranged(json!(10), &ranges)]),
            node("0x2", vec![ranged(json!(11), &ranges)]),
            node("0x3", vec![ranged(json!("7"), &ranges)]),
        ];
        let handlers = create_grouping_handlers(&nodes, &context).await.unwrap();
        let result = group_nodes(nodes, 0, &handlers, &context).await.unwrap();

        let labels: Vec<&str> = result.iter().map(|n| n.label()).collect();
        assert_eq!(labels, vec!["0 - 10", "11 - 20"]);
        assert_eq!(members(&result[0]), vec!["0x1", "0x3"]);
        assert_eq!(members(&result[1]), vec!["0x2"]);
    }

    #[tokio::test]
    async fn overlapping_ranges_pick_the_first_listed() {
        let context = context();
        for (ranges, expected) in [
            ([(0.0, 10.0), (5.0, 15.0)], (0.0, 10.0)),
            ([(5.0, 15.0), (0.0, 10.0)], (5.0, 15.0)),
        ] {
            let nodes = vec![node("0x1", vec![ranged(json!(7), &ranges)])];
            let handlers = create_grouping_handlers(&nodes, &context).await.unwrap();
            let result = group_nodes(nodes, 0, &handlers, &context).await.unwrap();

            assert_eq!(result.len(), 1);
            match &result[0] {
                ProcessedHierarchyNode::Grouping(group) => assert_eq!(
                    group.key,
                    GroupingNodeKey::PropertyValueRangeGrouping {
                        properties_class_name: "BisCore.Element".to_string(),
                        property_name: "Weight".to_string(),
                        from_value: expected.0,
                        to_value: expected.1,
                    }
                ),
                other => panic!("unexpected {:?}", other),
            }
        }
    }
}
