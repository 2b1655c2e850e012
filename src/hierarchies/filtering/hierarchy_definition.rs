use std::sync::Arc;

use async_trait::async_trait;
use futures::{stream, StreamExt, TryStreamExt};
use tracing::{trace, trace_span, Instrument};

use super::{
    matcher::{filter_level_definitions, level_filtering_context},
    query::FilteringColumnNames as Columns,
    session::FilteringSession,
    should_auto_expand,
};
use crate::{
    hierarchies::{
        definition::{HierarchyDefinition, HierarchyDefinitionRef, HierarchyLevelDefinition},
        identifiers::HierarchyNodeIdentifier,
        node_key::GroupingNodeKey,
        nodes::{NodeFilteringProps, PathPosition, ProcessedHierarchyNode, ProcessedInstanceNode},
        row_values::{row_bool, row_json, row_str},
    },
    imodel_access::{Result, Row},
};

/// Wraps a hierarchy definition so that only the nodes on the session's
/// filtering paths (and everything below filter targets) make it into the
/// hierarchy.
pub struct FilteringHierarchyDefinition {
    source: HierarchyDefinitionRef,
    session: Arc<FilteringSession>,
    class_check_concurrency: usize,
}

impl FilteringHierarchyDefinition {
    pub fn new(
        source: HierarchyDefinitionRef,
        session: Arc<FilteringSession>,
        class_check_concurrency: usize,
    ) -> Self {
        FilteringHierarchyDefinition {
            source,
            session,
            class_check_concurrency: class_check_concurrency.max(1),
        }
    }

    pub fn session(&self) -> &Arc<FilteringSession> {
        &self.session
    }

    /// Of the path positions holding the row's instance id, keep those the
    /// level is looking for and whose identifier class is compatible with the
    /// row's class.
    async fn verified_positions(
        &self,
        filter_instance_id: &str,
        level_positions: &[PathPosition],
        class_name: &str,
    ) -> Result<Vec<PathPosition>> {
        let session = &self.session;
        let candidates: Vec<PathPosition> = session
            .instance_positions(filter_instance_id)
            .iter()
            .filter(|pos| level_positions.contains(pos))
            .copied()
            .collect();

        let verified: Vec<Option<PathPosition>> = stream::iter(candidates)
            .map(|pos| verify_position(session, pos, class_name))
            .buffered(self.class_check_concurrency)
            .try_collect()
            .await?;
        Ok(verified.into_iter().flatten().collect())
    }

    async fn apply_row_filtering(
        &self,
        row: &Row,
        parent: Option<&ProcessedHierarchyNode>,
        mut node: ProcessedInstanceNode,
    ) -> Result<ProcessedInstanceNode> {
        let has_filter_target_ancestor = row_bool(row, Columns::HAS_FILTER_TARGET_ANCESTOR);
        let filter_instance_id = match row_str(row, Columns::FILTER_EC_INSTANCE_ID) {
            Some(id) => id,
            None => {
                if has_filter_target_ancestor {
                    node.filtering = Some(NodeFilteringProps {
                        has_filter_target_ancestor,
                        ..Default::default()
                    });
                }
                return Ok(node);
            }
        };

        let (level_positions, depth) = match level_filtering_context(&self.session, parent) {
            Some(context) => (context.positions, context.depth),
            None => (
                vec![],
                parent.map(|p| p.parent_keys().len() + 1).unwrap_or(0),
            ),
        };
        let positions = self
            .verified_positions(filter_instance_id, &level_positions, node.class_name())
            .await?;

        let is_filter_target = row_bool(row, Columns::IS_FILTER_TARGET)
            && positions.iter().any(|pos| self.session.is_terminal(*pos));
        let filter_target_options = if is_filter_target {
            row_json(row, Columns::FILTER_TARGET_OPTIONS)?
        } else {
            None
        };
        let filtered_children_identifier_paths = positions
            .iter()
            .filter(|pos| !self.session.is_terminal(**pos))
            .map(|pos| self.session.sub_path_after(*pos))
            .collect();
        let expand = should_auto_expand(&self.session, &positions, depth);
        trace!(
            id = filter_instance_id,
            positions = positions.len(),
            is_filter_target,
            expand,
            "parsed filtered row"
        );

        node.auto_expand = Some(node.auto_expand == Some(true) || expand);
        node.filtering = Some(NodeFilteringProps {
            is_filter_target,
            filter_target_options,
            has_filter_target_ancestor,
            filter_paths_identifier_positions: positions,
            filtered_children_identifier_paths,
        });
        Ok(node)
    }
}

async fn verify_position(
    session: &FilteringSession,
    pos: PathPosition,
    class_name: &str,
) -> Result<Option<PathPosition>> {
    match session.identifier_at(pos) {
        Some(HierarchyNodeIdentifier::Instance(key))
            if session.accepts_imodel_key(key.imodel_key.as_deref()) =>
        {
            let compatible = session
                .classes()
                .classes_compatible(&key.class_name, class_name)
                .await?;
            Ok(if compatible { Some(pos) } else { None })
        }
        _ => Ok(None),
    }
}

#[async_trait]
impl HierarchyDefinition for FilteringHierarchyDefinition {
    async fn define_hierarchy_level(
        &self,
        parent_node: Option<&ProcessedHierarchyNode>,
    ) -> Result<Vec<HierarchyLevelDefinition>> {
        let definitions = self.source.define_hierarchy_level(parent_node).await?;
        match level_filtering_context(&self.session, parent_node) {
            None => Ok(definitions),
            Some(context) => {
                filter_level_definitions(&self.session, &context, definitions).await
            }
        }
    }

    async fn parse_node(
        &self,
        row: &Row,
        parent_node: Option<&ProcessedHierarchyNode>,
    ) -> Result<ProcessedInstanceNode> {
        let node = self.source.parse_node(row, parent_node).await?;
        let span = trace_span!("filter_row", class_name = node.class_name());
        self.apply_row_filtering(row, parent_node, node)
            .instrument(span)
            .await
    }

    async fn pre_process_node(
        &self,
        node: ProcessedHierarchyNode,
    ) -> Result<Option<ProcessedHierarchyNode>> {
        let node = match self.source.pre_process_node(node).await? {
            Some(node) => node,
            None => return Ok(None),
        };
        let (hide_in_hierarchy, filtering) = (
            node.processing_params()
                .map(|params| params.hide_in_hierarchy)
                .unwrap_or(false),
            node.filtering(),
        );
        if let Some(filtering) = filtering {
            // Hidden targets only survive below another target.
            if hide_in_hierarchy
                && filtering.is_filter_target
                && !filtering.has_filter_target_ancestor
            {
                trace!(label = node.label(), "dropping hidden filter target");
                return Ok(None);
            }
            // The row's instance id is on a path, but under an unrelated class.
            if !filtering.is_on_filtered_path() && !filtering.has_filter_target_ancestor {
                trace!(label = node.label(), "dropping node with unverified filter match");
                return Ok(None);
            }
        }
        Ok(Some(node))
    }

    async fn post_process_node(&self, node: ProcessedHierarchyNode) -> Result<ProcessedHierarchyNode> {
        let node = self.source.post_process_node(node).await?;
        let expand = match &node {
            ProcessedHierarchyNode::Grouping(grouping)
                if matches!(grouping.key, GroupingNodeKey::ClassGrouping { .. }) =>
            {
                grouping
                    .children
                    .iter()
                    .any(ProcessedHierarchyNode::leads_to_filter_target)
            }
            _ => false,
        };
        Ok(if expand { node.with_auto_expand(true) } else { node })
    }
}
