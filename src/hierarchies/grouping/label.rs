use async_trait::async_trait;
use itertools::Itertools;

use super::{
    group_parent_keys, sort_nodes_by_label, GroupingContext, GroupingHandler,
    GroupingHandlerResult,
};
use crate::{
    hierarchies::{
        node_key::GroupingNodeKey,
        nodes::{GroupingType, LabelGroupingAction, ProcessedGroupingNode, ProcessedInstanceNode},
    },
    imodel_access::Result,
};

/// Single pass over label-sorted nodes.  Within a run of equal labels, nodes
/// asking to be merged are folded into the first of them, and nodes asking to
/// be grouped get a label grouping node once there are at least two of them.
/// Everything else in the run stays a sibling of the group.
#[derive(Debug)]
pub struct LabelGroupingHandler;

#[async_trait]
impl GroupingHandler for LabelGroupingHandler {
    fn grouping_type(&self) -> GroupingType {
        GroupingType::Label
    }

    async fn group(
        &self,
        mut nodes: Vec<ProcessedInstanceNode>,
        _context: &GroupingContext,
    ) -> Result<GroupingHandlerResult> {
        sort_nodes_by_label(&mut nodes);

        let mut grouped = Vec::new();
        let mut ungrouped = Vec::with_capacity(nodes.len());
        for (label, run) in &nodes.into_iter().group_by(|node| node.label.clone()) {
            let mut run_nodes: Vec<ProcessedInstanceNode> = Vec::new();
            let mut merge_slots: Vec<(Option<String>, usize)> = Vec::new();
            let mut groups: Vec<(Option<String>, Vec<ProcessedInstanceNode>)> = Vec::new();

            for node in run {
                let action = node
                    .grouping_params()
                    .and_then(|params| params.by_label.as_ref())
                    .and_then(|by_label| by_label.params());
                match action {
                    None => run_nodes.push(node),
                    Some(LabelGroupingAction::Merge { group_id }) => {
                        match merge_slots.iter().find(|(id, _)| *id == group_id) {
                            Some((_, slot)) => {
                                let first = std::mem::take(&mut run_nodes[*slot]);
                                run_nodes[*slot] = first.merged_with(node);
                            }
                            None => {
                                merge_slots.push((group_id, run_nodes.len()));
                                run_nodes.push(node);
                            }
                        }
                    }
                    Some(LabelGroupingAction::Group { group_id, .. }) => {
                        match groups.iter_mut().find(|(id, _)| *id == group_id) {
                            Some((_, members)) => members.push(node),
                            None => groups.push((group_id, vec![node])),
                        }
                    }
                }
            }

            for (group_id, mut members) in groups {
                if members.len() < 2 {
                    run_nodes.append(&mut members);
                    continue;
                }
                let parent_keys = group_parent_keys(&members);
                grouped.push(ProcessedGroupingNode::new(
                    GroupingNodeKey::LabelGrouping {
                        label: label.clone(),
                        group_id,
                    },
                    label.clone(),
                    parent_keys,
                    members,
                ));
            }
            ungrouped.append(&mut run_nodes);
        }

        Ok(GroupingHandlerResult {
            grouped,
            ungrouped,
            grouping_type: GroupingType::Label,
        })
    }
}
