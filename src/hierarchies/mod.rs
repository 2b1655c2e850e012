//! Hierarchy levels: node model, hierarchy definitions, filtering and
//! grouping, tied together by `HierarchyProvider`.

pub mod definition;
pub mod filtering;
pub mod grouping;
pub mod identifiers;
pub mod node_key;
pub mod nodes;
pub mod provider;
pub mod row_values;
pub mod select_clause;

pub use definition::{
    default_parse_node, GenericHierarchyNodeDefinition, HierarchyDefinition,
    HierarchyDefinitionRef, HierarchyLevelDefinition, InstanceNodesQueryDefinition,
};
pub use filtering::{FilteringHierarchyDefinition, FilteringSession};
pub use grouping::{
    DefaultPropertyValueFormatter, GroupingContext, GroupingHandler, PropertyValueFormatter,
    PropertyValueFormatterRef,
};
pub use identifiers::{
    identifiers_equal, AutoExpandOption, FilterTargetOptions, FilteringPathOptions,
    HierarchyFilteringPath, HierarchyNodeIdentifier, NormalizedFilteringPath,
};
pub use node_key::{
    canonical_instance_id, GenericNodeKey, GroupingNodeKey, HierarchyNodeKey, InstanceKey,
    PropertyIdentity,
};
pub use nodes::{
    BaseClassGroupingParams, BaseGroupingParams, FlagOrParams, GroupingAutoExpand, GroupingType,
    InstanceNodeGroupingParams, LabelGroupingAction, NodeFilteringProps, PathPosition,
    ProcessedGenericNode, ProcessedGroupingNode, ProcessedHierarchyNode, ProcessedInstanceNode,
    ProcessingParams, PropertiesGroupingParams, PropertyGroup, PropertyValueRange,
};
pub use provider::{HierarchyProvider, LoggedLevel};
pub use select_clause::{
    NodeSelectClauseColumnNames, NodeSelectClauseFactory, NodeSelectClauseProps, SelectValue,
};
