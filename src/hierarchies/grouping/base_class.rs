use async_trait::async_trait;

use super::{
    group_parent_keys, sort_nodes_by_label, GroupingContext, GroupingHandler,
    GroupingHandlerResult,
};
use crate::{
    hierarchies::{
        node_key::GroupingNodeKey,
        nodes::{GroupingType, ProcessedGroupingNode, ProcessedInstanceNode},
    },
    imodel_access::{normalize_full_class_name, ECClassInfo, Result},
};

/// Groups nodes whose class derives from `base_class`, among those that list
/// it in their `by_base_classes` params.
#[derive(Debug)]
pub struct BaseClassGroupingHandler {
    base_class: ECClassInfo,
}

impl BaseClassGroupingHandler {
    pub fn new(base_class: ECClassInfo) -> Self {
        BaseClassGroupingHandler { base_class }
    }

    fn requested_by(&self, node: &ProcessedInstanceNode) -> bool {
        node.grouping_params()
            .and_then(|params| params.by_base_classes.as_ref())
            .map(|params| {
                params.full_class_names.iter().any(|name| {
                    normalize_full_class_name(name).eq_ignore_ascii_case(&self.base_class.full_name)
                })
            })
            .unwrap_or(false)
    }
}

#[async_trait]
impl GroupingHandler for BaseClassGroupingHandler {
    fn grouping_type(&self) -> GroupingType {
        GroupingType::BaseClass
    }

    async fn group(
        &self,
        nodes: Vec<ProcessedInstanceNode>,
        context: &GroupingContext,
    ) -> Result<GroupingHandlerResult> {
        let mut members = Vec::new();
        let mut ungrouped = Vec::new();
        for node in nodes {
            if self.requested_by(&node)
                && context
                    .classes
                    .class_derives_from(node.class_name(), &self.base_class.full_name)
                    .await?
            {
                members.push(node);
            } else {
                ungrouped.push(node);
            }
        }
        sort_nodes_by_label(&mut ungrouped);

        let grouped = if members.is_empty() {
            vec![]
        } else {
            vec![ProcessedGroupingNode::new(
                GroupingNodeKey::ClassGrouping {
                    class_name: self.base_class.full_name.clone(),
                },
                self.base_class.display_label().to_string(),
                group_parent_keys(&members),
                members,
            )]
        };

        Ok(GroupingHandlerResult {
            grouped,
            ungrouped,
            grouping_type: GroupingType::BaseClass,
        })
    }
}
