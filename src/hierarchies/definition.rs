use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{
    node_key::InstanceKey,
    nodes::{ProcessedGenericNode, ProcessedHierarchyNode, ProcessedInstanceNode, ProcessingParams},
    row_values::{row_bool, row_flag, row_json, row_required_str, row_str},
    select_clause::NodeSelectClauseColumnNames as Columns,
};
use crate::imodel_access::{normalize_full_class_name, EcSqlQueryDef, Result, Row};

/// Query producing instance nodes of (subclasses of) `full_class_name`.
#[derive(Clone, Debug, PartialEq)]
pub struct InstanceNodesQueryDefinition {
    pub full_class_name: String,
    pub query: EcSqlQueryDef,
}

/// A single node that doesn't come from a query.  `parent_keys` of the node
/// are filled in by the provider.
#[derive(Clone, Debug, PartialEq)]
pub struct GenericHierarchyNodeDefinition {
    pub node: ProcessedGenericNode,
}

#[derive(Clone, Debug, PartialEq)]
pub enum HierarchyLevelDefinition {
    GenericNode(GenericHierarchyNodeDefinition),
    InstanceNodesQuery(InstanceNodesQueryDefinition),
}

/// The domain-specific part of a hierarchy: what goes into each level, and
/// optional hooks to customize how rows become nodes.
///
/// `define_hierarchy_level` is only ever called for root (`None`), instance
/// and generic parents; children of grouping nodes are produced by the
/// grouping itself.
#[async_trait]
pub trait HierarchyDefinition {
    async fn define_hierarchy_level(
        &self,
        parent_node: Option<&ProcessedHierarchyNode>,
    ) -> Result<Vec<HierarchyLevelDefinition>>;

    async fn parse_node(
        &self,
        row: &Row,
        _parent_node: Option<&ProcessedHierarchyNode>,
    ) -> Result<ProcessedInstanceNode> {
        default_parse_node(row)
    }

    async fn pre_process_node(
        &self,
        node: ProcessedHierarchyNode,
    ) -> Result<Option<ProcessedHierarchyNode>> {
        Ok(Some(node))
    }

    async fn post_process_node(&self, node: ProcessedHierarchyNode) -> Result<ProcessedHierarchyNode> {
        Ok(node)
    }
}

pub type HierarchyDefinitionRef = Arc<dyn HierarchyDefinition + Send + Sync>;

/// Turn a row selected through `NodeSelectClauseFactory` into a node.
pub fn default_parse_node(row: &Row) -> Result<ProcessedInstanceNode> {
    let class_name = normalize_full_class_name(row_required_str(row, Columns::FULL_CLASS_NAME)?);
    let id = row_required_str(row, Columns::EC_INSTANCE_ID)?.to_string();

    let hide_if_no_children = row_bool(row, Columns::HIDE_IF_NO_CHILDREN);
    let hide_in_hierarchy = row_bool(row, Columns::HIDE_NODE_IN_HIERARCHY);
    let grouping = row_json(row, Columns::GROUPING)?;
    let processing_params = if hide_if_no_children || hide_in_hierarchy || grouping.is_some() {
        Some(ProcessingParams {
            hide_if_no_children,
            hide_in_hierarchy,
            grouping,
        })
    } else {
        None
    };

    Ok(ProcessedInstanceNode {
        key: vec![InstanceKey::new(class_name, id)],
        label: row_str(row, Columns::DISPLAY_LABEL).unwrap_or("").to_string(),
        parent_keys: vec![],
        children: row_flag(row, Columns::HAS_CHILDREN),
        processing_params,
        filtering: None,
        auto_expand: row_flag(row, Columns::AUTO_EXPAND).filter(|expand| *expand),
        extended_data: row_json::<Map<String, Value>>(row, Columns::EXTENDED_DATA)?,
    })
}
