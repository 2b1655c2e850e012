use async_trait::async_trait;

use super::{
    group_parent_keys, sort_groups_by_label, GroupingContext, GroupingHandler,
    GroupingHandlerResult,
};
use crate::{
    hierarchies::{
        node_key::GroupingNodeKey,
        nodes::{GroupingType, ProcessedGroupingNode, ProcessedInstanceNode},
    },
    imodel_access::{get_class, Result},
};

/// Groups nodes that ask for it by their exact class.
#[derive(Debug)]
pub struct ClassGroupingHandler;

#[async_trait]
impl GroupingHandler for ClassGroupingHandler {
    fn grouping_type(&self) -> GroupingType {
        GroupingType::Class
    }

    async fn group(
        &self,
        nodes: Vec<ProcessedInstanceNode>,
        context: &GroupingContext,
    ) -> Result<GroupingHandlerResult> {
        let mut buckets: Vec<(String, Vec<ProcessedInstanceNode>)> = Vec::new();
        let mut ungrouped = Vec::new();
        for node in nodes {
            if node.grouping_policy(GroupingType::Class).is_none() {
                ungrouped.push(node);
                continue;
            }
            let class_name = node.class_name().to_string();
            match buckets
                .iter_mut()
                .find(|(name, _)| name.eq_ignore_ascii_case(&class_name))
            {
                Some((_, members)) => members.push(node),
                None => buckets.push((class_name, vec![node])),
            }
        }

        let metadata = context.classes.metadata().as_ref();
        let mut grouped = Vec::with_capacity(buckets.len());
        for (class_name, members) in buckets {
            let class = get_class(metadata, &class_name).await?;
            grouped.push(ProcessedGroupingNode::new(
                GroupingNodeKey::ClassGrouping {
                    class_name: class.full_name.clone(),
                },
                class.display_label().to_string(),
                group_parent_keys(&members),
                members,
            ));
        }
        sort_groups_by_label(&mut grouped);
        super::sort_nodes_by_label(&mut ungrouped);

        Ok(GroupingHandlerResult {
            grouped,
            ungrouped,
            grouping_type: GroupingType::Class,
        })
    }
}
