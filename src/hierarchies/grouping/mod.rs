//! Grouping of sibling instance nodes.
//!
//! Handlers run in a fixed order: base class, class, property (one handler
//! per distinct property grouping configuration) and label.  Every handler
//! gets what the previous ones left ungrouped, and the members of every group
//! it creates are grouped again by the handlers that follow it.

mod base_class;
mod class;
mod formatter;
mod label;
mod property;

use std::{collections::HashMap, fmt};

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use tokio_util::sync::CancellationToken;
use tracing::{trace, trace_span, Instrument};

pub use base_class::BaseClassGroupingHandler;
pub use class::ClassGroupingHandler;
pub use formatter::{DefaultPropertyValueFormatter, PropertyValueFormatter, PropertyValueFormatterRef};
pub use label::LabelGroupingHandler;
pub use property::{PropertyGroupingHandler, PropertyGroupingInfo};

use super::{
    identifiers::AutoExpandOption,
    node_key::InstanceKey,
    nodes::{
        GroupingAutoExpand, GroupingType, ProcessedGroupingNode, ProcessedHierarchyNode,
        ProcessedInstanceNode,
    },
};
use crate::{
    imodel_access::{get_class, ClassDerivationCache, HierarchyError, Result},
    utils::sorting::{compare_labels, compare_nodes_by_label, merge_sorted_vecs},
};

/// What one grouping pass produced.  Both lists are sorted by label.
#[derive(Debug)]
pub struct GroupingHandlerResult {
    pub grouped: Vec<ProcessedGroupingNode>,
    pub ungrouped: Vec<ProcessedInstanceNode>,
    pub grouping_type: GroupingType,
}

/// Everything grouping handlers need besides the nodes.
pub struct GroupingContext {
    pub classes: ClassDerivationCache,
    pub formatter: PropertyValueFormatterRef,
    pub cancel: CancellationToken,
}

#[async_trait]
pub trait GroupingHandler: fmt::Debug + Send + Sync {
    fn grouping_type(&self) -> GroupingType;

    async fn group(
        &self,
        nodes: Vec<ProcessedInstanceNode>,
        context: &GroupingContext,
    ) -> Result<GroupingHandlerResult>;
}

pub type GroupingHandlerBox = Box<dyn GroupingHandler>;

/// Grouping nodes sit where their members were, so they take the parent keys
/// of the first member.
pub(crate) fn group_parent_keys(
    members: &[ProcessedInstanceNode],
) -> Vec<super::node_key::HierarchyNodeKey> {
    members
        .first()
        .map(|member| member.parent_keys.clone())
        .unwrap_or_default()
}

pub(crate) fn sort_groups_by_label(groups: &mut [ProcessedGroupingNode]) {
    groups.sort_by(|l, r| compare_labels(&l.label, &r.label));
}

pub(crate) fn sort_nodes_by_label(nodes: &mut [ProcessedInstanceNode]) {
    nodes.sort_by(|l, r| compare_labels(&l.label, &r.label));
}

/// Build the handlers needed for a level from the grouping params its nodes
/// carry.  Referenced classes are resolved up front so that a missing class
/// fails the whole level.
pub async fn create_grouping_handlers(
    nodes: &[ProcessedHierarchyNode],
    context: &GroupingContext,
) -> Result<Vec<GroupingHandlerBox>> {
    let mut base_class_names: Vec<String> = Vec::new();
    let mut by_class = false;
    let mut by_label = false;
    let mut property_infos: Vec<PropertyGroupingInfo> = Vec::new();

    for node in nodes {
        let params = match node {
            ProcessedHierarchyNode::Instances(node) => match node.grouping_params() {
                Some(params) => params,
                None => continue,
            },
            _ => continue,
        };
        if let Some(base_classes) = &params.by_base_classes {
            for name in &base_classes.full_class_names {
                let name = crate::imodel_access::normalize_full_class_name(name);
                if !base_class_names
                    .iter()
                    .any(|known| known.eq_ignore_ascii_case(&name))
                {
                    base_class_names.push(name);
                }
            }
        }
        by_class |= params.by_class.as_ref().and_then(|p| p.params()).is_some();
        by_label |= params.by_label.as_ref().and_then(|p| p.params()).is_some();
        if let Some(properties) = &params.by_properties {
            for info in PropertyGroupingInfo::from_params(properties) {
                if !property_infos.contains(&info) {
                    property_infos.push(info);
                }
            }
        }
    }

    let metadata = context.classes.metadata().as_ref();
    let mut handlers: Vec<GroupingHandlerBox> = Vec::new();

    // Base classes go base-first, so that a group for a more specific class
    // ends up inside the group for its base.
    let mut base_classes = Vec::with_capacity(base_class_names.len());
    for name in &base_class_names {
        let class = get_class(metadata, name).await?;
        let mut ancestors = 0;
        for other in &base_class_names {
            if !other.eq_ignore_ascii_case(name)
                && context.classes.class_derives_from(name, other).await?
            {
                ancestors += 1;
            }
        }
        base_classes.push((ancestors, class));
    }
    base_classes.sort_by_key(|(ancestors, _)| *ancestors);
    for (_, class) in base_classes {
        handlers.push(Box::new(BaseClassGroupingHandler::new(class)));
    }

    if by_class {
        handlers.push(Box::new(ClassGroupingHandler));
    }

    let mut validated_classes: Vec<String> = Vec::new();
    for info in &property_infos {
        if !validated_classes
            .iter()
            .any(|known| known.eq_ignore_ascii_case(&info.properties_class_name))
        {
            get_class(metadata, &info.properties_class_name).await?;
            validated_classes.push(info.properties_class_name.clone());
        }
    }
    property_infos.sort_by_key(|info| info.level);
    for info in property_infos {
        handlers.push(Box::new(PropertyGroupingHandler::new(info)));
    }

    if by_label {
        handlers.push(Box::new(LabelGroupingHandler));
    }

    trace!(handlers = ?handlers, "created grouping handlers");
    Ok(handlers)
}

/// Dissolve groups whose members asked for it: `hide_if_no_siblings` when the
/// group would be alone in its level, `hide_if_one_grouped_node` when it has a
/// single member.  One member asking is enough.
pub fn apply_group_hiding(
    result: GroupingHandlerResult,
    extra_siblings: usize,
) -> GroupingHandlerResult {
    let GroupingHandlerResult {
        grouped,
        mut ungrouped,
        grouping_type,
    } = result;
    let has_no_siblings = grouped.len() == 1 && ungrouped.is_empty() && extra_siblings == 0;

    let mut kept = Vec::with_capacity(grouped.len());
    let mut dissolved = false;
    for group in grouped {
        let wants = |check: fn(&super::nodes::GroupingPolicy) -> bool| {
            group
                .instance_children()
                .any(|child| child.grouping_policy(grouping_type).map_or(false, |p| check(&p)))
        };
        let hide = (has_no_siblings && wants(|p| p.hide_if_no_siblings))
            || (group.children.len() == 1 && wants(|p| p.hide_if_one_grouped_node));
        if hide {
            trace!(label = group.label.as_str(), "dissolving group");
            ungrouped.extend(group.into_members());
            dissolved = true;
        } else {
            kept.push(group);
        }
    }
    if dissolved {
        sort_nodes_by_label(&mut ungrouped);
    }

    GroupingHandlerResult {
        grouped: kept,
        ungrouped,
        grouping_type,
    }
}

/// Decide whether a freshly created grouping node should be auto-expanded,
/// from what its members asked for.
pub fn assign_auto_expand(
    mut group: ProcessedGroupingNode,
    grouping_type: GroupingType,
) -> ProcessedGroupingNode {
    let requested = |child: &ProcessedInstanceNode| {
        child
            .grouping_policy(grouping_type)
            .and_then(|policy| policy.auto_expand)
    };

    let expand = if group
        .instance_children()
        .any(|child| requested(child) == Some(GroupingAutoExpand::Always))
    {
        true
    } else if group.children.len() == 1 {
        match group.instance_children().next() {
            Some(child) if requested(child) == Some(GroupingAutoExpand::SingleChild) => {
                match grouping_type {
                    GroupingType::BaseClass | GroupingType::Class => {
                        // Filter targets may limit expansion to a depth.
                        match child
                            .filtering
                            .as_ref()
                            .and_then(|f| f.filter_target_options.as_ref())
                            .and_then(|o| o.auto_expand.as_ref())
                        {
                            Some(AutoExpandOption::UntilDepth { depth }) => group.depth() < *depth,
                            _ => true,
                        }
                    }
                    GroupingType::Property | GroupingType::Label => true,
                }
            }
            _ => false,
        }
    } else {
        false
    };

    group.auto_expand = if expand { Some(true) } else { None };
    group
}

fn order_key(node: &ProcessedInstanceNode) -> Option<&InstanceKey> {
    node.key.first()
}

/// Run `handlers` over a level's nodes.  `extra_siblings` counts nodes that
/// will sit next to the result but aren't part of `nodes`.
///
/// When nothing ends up grouped, the nodes come back in their original
/// order; otherwise the result is label-sorted, with non-instance nodes at the
/// end.
pub fn group_nodes<'a>(
    nodes: Vec<ProcessedHierarchyNode>,
    extra_siblings: usize,
    handlers: &'a [GroupingHandlerBox],
    context: &'a GroupingContext,
) -> BoxFuture<'a, Result<Vec<ProcessedHierarchyNode>>> {
    let span = trace_span!("group_nodes", nodes = nodes.len(), handlers = handlers.len());
    async move {
        if handlers.is_empty() {
            return Ok(nodes);
        }

        let mut original_order: HashMap<InstanceKey, usize> = HashMap::new();
        let mut remaining = Vec::new();
        let mut rest = Vec::new();
        for (index, node) in nodes.into_iter().enumerate() {
            match node {
                ProcessedHierarchyNode::Instances(node) => {
                    if let Some(key) = order_key(&node) {
                        original_order.entry(key.clone()).or_insert(index);
                    }
                    remaining.push(node);
                }
                other => rest.push((index, other)),
            }
        }

        let mut all_grouped: Vec<ProcessedGroupingNode> = Vec::new();
        for (i, handler) in handlers.iter().enumerate() {
            if context.cancel.is_cancelled() {
                return Err(HierarchyError::Cancelled);
            }
            if remaining.is_empty() {
                break;
            }

            let result = handler.group(remaining, context).await?;
            let siblings = extra_siblings + rest.len() + all_grouped.len();
            let result = apply_group_hiding(result, siblings);
            remaining = result.ungrouped;

            let mut regrouped = Vec::with_capacity(result.grouped.len());
            for group in result.grouped {
                let mut group = assign_auto_expand(group, result.grouping_type);
                let children = std::mem::take(&mut group.children);
                group.children = group_nodes(children, 0, &handlers[i + 1..], context).await?;
                regrouped.push(group);
            }
            all_grouped = merge_sorted_vecs(all_grouped, regrouped, |l, r| {
                compare_labels(&l.label, &r.label)
            });
        }

        if all_grouped.is_empty() {
            let mut restored: Vec<(usize, ProcessedHierarchyNode)> = remaining
                .into_iter()
                .map(|node| {
                    let index = order_key(&node)
                        .and_then(|key| original_order.get(key))
                        .copied()
                        .unwrap_or(usize::MAX);
                    (index, ProcessedHierarchyNode::Instances(node))
                })
                .collect();
            restored.extend(rest);
            restored.sort_by_key(|(index, _)| *index);
            return Ok(restored.into_iter().map(|(_, node)| node).collect());
        }

        sort_nodes_by_label(&mut remaining);
        let mut merged = merge_sorted_vecs(
            remaining
                .into_iter()
                .map(ProcessedHierarchyNode::Instances)
                .collect(),
            all_grouped
                .into_iter()
                .map(ProcessedHierarchyNode::Grouping)
                .collect(),
            compare_nodes_by_label,
        );
        merged.extend(rest.into_iter().map(|(_, node)| node));
        Ok(merged)
    }
    .instrument(span)
    .boxed()
}
