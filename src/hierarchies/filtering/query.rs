use tracing::trace;

use super::{
    matcher::{LevelFilteringContext, MatchedFilter},
    session::FilteringSession,
};
use crate::{
    hierarchies::{
        definition::{GenericHierarchyNodeDefinition, InstanceNodesQueryDefinition},
        identifiers::{merge_filter_target_options, FilterTargetOptions, HierarchyNodeIdentifier},
        node_key::canonical_instance_id,
        nodes::NodeFilteringProps,
        select_clause::quote_ecsql_string,
    },
    imodel_access::{ErrorLayer, HierarchyError, Result},
};

/// Names of the columns the filtered queries add to their rows.
pub struct FilteringColumnNames;

impl FilteringColumnNames {
    pub const FILTER_EC_INSTANCE_ID: &'static str = "FilterECInstanceId";
    pub const FILTER_CLASS_NAME: &'static str = "FilterClassName";
    pub const HAS_FILTER_TARGET_ANCESTOR: &'static str = "HasFilterTargetAncestor";
    pub const IS_FILTER_TARGET: &'static str = "IsFilterTarget";
    pub const FILTER_TARGET_OPTIONS: &'static str = "FilterTargetOptions";
}

const FILTERING_INFO_CTE: &str = "FilteringInfo";

struct FilteringInfoRow {
    id: String,
    class_name: String,
    is_filter_target: bool,
    options: Option<FilterTargetOptions>,
}

/// Collapse the matches into one row per canonical instance id.  Ids are
/// unique within an imodel, so matches that differ only by class or by id
/// spelling describe the same row.
fn filtering_info_rows(matches: &[MatchedFilter]) -> Result<Vec<FilteringInfoRow>> {
    let mut rows: Vec<FilteringInfoRow> = Vec::new();
    for matched in matches {
        let key = match &matched.id {
            HierarchyNodeIdentifier::Instance(key) => key,
            HierarchyNodeIdentifier::Generic(key) => {
                return Err(HierarchyError::sticky(
                    ErrorLayer::RuntimeInvariantViolation,
                    format!(
                        "generic identifier \"{}\" can't filter an instance nodes query",
                        key.id
                    ),
                ));
            }
        };
        let id = match canonical_instance_id(&key.id) {
            Some(id) => id,
            None => {
                return Err(HierarchyError::sticky(
                    ErrorLayer::BadInput,
                    format!("Invalid instance id \"{}\" in filtering path", key.id),
                ));
            }
        };

        match rows.iter_mut().find(|row| row.id == id) {
            Some(row) => {
                row.is_filter_target |= matched.is_filter_target;
                row.options = merge_filter_target_options(
                    row.options.take(),
                    matched.filter_target_options.as_ref(),
                );
            }
            None => rows.push(FilteringInfoRow {
                id,
                class_name: key.class_name.clone(),
                is_filter_target: matched.is_filter_target,
                options: matched.filter_target_options.clone(),
            }),
        }
    }
    Ok(rows)
}

fn render_filtering_info_cte(rows: &[FilteringInfoRow]) -> Result<String> {
    let mut values = Vec::with_capacity(rows.len());
    for row in rows {
        let options = match &row.options {
            Some(options) if row.is_filter_target => {
                quote_ecsql_string(&serde_json::to_string(options)?)
            }
            _ => "CAST(NULL AS TEXT)".to_string(),
        };
        values.push(format!(
            "VALUES ({}, {}, {}, {})",
            row.id,
            if row.is_filter_target { 1 } else { 0 },
            options,
            quote_ecsql_string(&row.class_name)
        ));
    }
    Ok(format!(
        "{}(ECInstanceId, {}, {}, {}) AS (\n    {}\n)",
        FILTERING_INFO_CTE,
        FilteringColumnNames::IS_FILTER_TARGET,
        FilteringColumnNames::FILTER_TARGET_OPTIONS,
        FilteringColumnNames::FILTER_CLASS_NAME,
        values.join("\n    UNION ALL\n    ")
    ))
}

/// Wrap the definition's query so that every row it returns carries the
/// filtering state of its instance in the reserved columns.
///
/// Without a filter target ancestor only the matched instances may show up,
/// so the filtering info is inner-joined; below a target everything shows up
/// and the join is a left one.
pub fn apply_filtering_to_query(
    definition: &InstanceNodesQueryDefinition,
    matches: &[MatchedFilter],
    has_filter_target_ancestor: bool,
) -> Result<InstanceNodesQueryDefinition> {
    type Columns = FilteringColumnNames;

    let rows = filtering_info_rows(matches)?;
    let mut query = definition.query.clone();
    let ancestor_flag = if has_filter_target_ancestor { 1 } else { 0 };

    let (columns, join) = if rows.is_empty() {
        (
            vec![
                format!("CAST(NULL AS TEXT) AS [{}]", Columns::FILTER_EC_INSTANCE_ID),
                format!("CAST(NULL AS TEXT) AS [{}]", Columns::FILTER_CLASS_NAME),
                format!("{} AS [{}]", ancestor_flag, Columns::HAS_FILTER_TARGET_ANCESTOR),
                format!("CAST(NULL AS BOOLEAN) AS [{}]", Columns::IS_FILTER_TARGET),
                format!("CAST(NULL AS TEXT) AS [{}]", Columns::FILTER_TARGET_OPTIONS),
            ],
            String::new(),
        )
    } else {
        query.ctes.push(render_filtering_info_cte(&rows)?);
        (
            vec![
                format!(
                    "IdToHex([f].[ECInstanceId]) AS [{}]",
                    Columns::FILTER_EC_INSTANCE_ID
                ),
                format!("[f].[{0}] AS [{0}]", Columns::FILTER_CLASS_NAME),
                format!("{} AS [{}]", ancestor_flag, Columns::HAS_FILTER_TARGET_ANCESTOR),
                format!("[f].[{0}] AS [{0}]", Columns::IS_FILTER_TARGET),
                format!("[f].[{0}] AS [{0}]", Columns::FILTER_TARGET_OPTIONS),
            ],
            format!(
                "\n{}JOIN {} [f] ON IdToHex([f].[ECInstanceId]) = [q].[ECInstanceId]",
                if has_filter_target_ancestor { "LEFT " } else { "" },
                FILTERING_INFO_CTE
            ),
        )
    };

    query.ecsql = format!(
        "SELECT\n    [q].*,\n    {}\nFROM (\n    {}\n) [q]{}",
        columns.join(",\n    "),
        definition.query.ecsql,
        join
    );
    trace!(
        class_name = definition.full_class_name.as_str(),
        filter_rows = rows.len(),
        "augmented instance nodes query"
    );

    Ok(InstanceNodesQueryDefinition {
        full_class_name: definition.full_class_name.clone(),
        query,
    })
}

/// Generic nodes don't go through a query, so the filtering state is put on
/// the node directly.
pub fn apply_filtering_to_generic_node(
    session: &FilteringSession,
    context: &LevelFilteringContext,
    mut definition: GenericHierarchyNodeDefinition,
    matches: &[MatchedFilter],
) -> GenericHierarchyNodeDefinition {
    let mut filtering = NodeFilteringProps {
        has_filter_target_ancestor: context.has_filter_target_ancestor,
        ..Default::default()
    };
    for matched in matches {
        filtering.is_filter_target |= matched.is_filter_target;
        filtering.filter_target_options = merge_filter_target_options(
            filtering.filter_target_options.take(),
            matched.filter_target_options.as_ref(),
        );
        filtering
            .filter_paths_identifier_positions
            .extend(matched.positions.iter().copied());
        filtering
            .filtered_children_identifier_paths
            .extend(matched.children_identifier_paths.iter().cloned());
    }

    if !matches.is_empty() {
        let expand = super::should_auto_expand(
            session,
            &filtering.filter_paths_identifier_positions,
            context.depth,
        );
        definition.node.auto_expand = Some(definition.node.auto_expand == Some(true) || expand);
    }
    definition.node.filtering = Some(filtering);
    definition
}
