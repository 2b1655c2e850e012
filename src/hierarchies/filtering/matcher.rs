use futures::future::try_join_all;
use tracing::{trace, trace_span, Instrument};

use super::{
    query::{apply_filtering_to_generic_node, apply_filtering_to_query},
    session::FilteringSession,
};
use crate::{
    hierarchies::{
        definition::HierarchyLevelDefinition,
        identifiers::{
            identifiers_equal, merge_filter_target_options, FilterTargetOptions,
            HierarchyNodeIdentifier, NormalizedFilteringPath,
        },
        nodes::{PathPosition, ProcessedHierarchyNode},
    },
    imodel_access::Result,
};

/// The slice of a filtering session that applies to one hierarchy level.
#[derive(Clone, Debug, PartialEq)]
pub struct LevelFilteringContext {
    /// Positions of the identifiers that nodes of this level may match.
    pub positions: Vec<PathPosition>,
    pub has_filter_target_ancestor: bool,
    /// Hierarchy depth of the nodes in this level; 0 for root nodes.
    pub depth: usize,
}

/// Work out which part of the filtering paths applies to the children of
/// `parent`.  `None` means filtering doesn't affect this level at all.
pub fn level_filtering_context(
    session: &FilteringSession,
    parent: Option<&ProcessedHierarchyNode>,
) -> Option<LevelFilteringContext> {
    let parent = match parent {
        None => {
            let positions = session.root_positions();
            if positions.is_empty() {
                return None;
            }
            return Some(LevelFilteringContext {
                positions,
                has_filter_target_ancestor: false,
                depth: 0,
            });
        }
        Some(parent) => parent,
    };

    let filtering = parent.filtering()?;
    let positions: Vec<PathPosition> = filtering
        .filter_paths_identifier_positions
        .iter()
        .filter_map(|pos| session.next_position(*pos))
        .collect();
    let has_filter_target_ancestor =
        filtering.is_filter_target || filtering.has_filter_target_ancestor;
    if positions.is_empty() && !has_filter_target_ancestor {
        return None;
    }
    Some(LevelFilteringContext {
        positions,
        has_filter_target_ancestor,
        depth: parent.parent_keys().len() + 1,
    })
}

/// One identifier (or several equal ones) matched against a level definition.
#[derive(Clone, Debug, PartialEq)]
pub struct MatchedFilter {
    pub id: HierarchyNodeIdentifier,
    pub is_filter_target: bool,
    pub filter_target_options: Option<FilterTargetOptions>,
    pub positions: Vec<PathPosition>,
    pub children_identifier_paths: Vec<NormalizedFilteringPath>,
}

async fn identifier_matches_definition(
    session: &FilteringSession,
    identifier: &HierarchyNodeIdentifier,
    definition: &HierarchyLevelDefinition,
) -> Result<bool> {
    match (identifier, definition) {
        (HierarchyNodeIdentifier::Generic(key), HierarchyLevelDefinition::GenericNode(def)) => {
            Ok(*key == def.node.key)
        }
        (
            HierarchyNodeIdentifier::Instance(key),
            HierarchyLevelDefinition::InstanceNodesQuery(def),
        ) => {
            if !session.accepts_imodel_key(key.imodel_key.as_deref()) {
                return Ok(false);
            }
            session
                .classes()
                .class_derives_from(&key.class_name, &def.full_class_name)
                .await
        }
        _ => Ok(false),
    }
}

/// Match every path position relevant to the level against one definition.
/// Equal identifiers are folded into one `MatchedFilter`.
pub async fn match_definition(
    session: &FilteringSession,
    context: &LevelFilteringContext,
    definition: &HierarchyLevelDefinition,
) -> Result<Vec<MatchedFilter>> {
    let mut matches: Vec<MatchedFilter> = Vec::new();
    for pos in &context.positions {
        let identifier = match session.identifier_at(*pos) {
            Some(identifier) => identifier,
            None => continue,
        };
        if !identifier_matches_definition(session, identifier, definition).await? {
            continue;
        }

        let mut existing = None;
        for (i, matched) in matches.iter().enumerate() {
            if identifiers_equal(&matched.id, identifier, session.classes()).await? {
                existing = Some(i);
                break;
            }
        }
        let entry = match existing {
            Some(i) => &mut matches[i],
            None => {
                matches.push(MatchedFilter {
                    id: identifier.clone(),
                    is_filter_target: false,
                    filter_target_options: None,
                    positions: vec![],
                    children_identifier_paths: vec![],
                });
                let last = matches.len() - 1;
                &mut matches[last]
            }
        };

        entry.positions.push(*pos);
        if session.is_terminal(*pos) {
            entry.is_filter_target = true;
            entry.filter_target_options = merge_filter_target_options(
                entry.filter_target_options.take(),
                session.path_options(pos.path_index),
            );
        } else {
            entry
                .children_identifier_paths
                .push(session.sub_path_after(*pos));
        }
    }
    Ok(matches)
}

/// Narrow the level down to the definitions that lie on a filtering path (or
/// everything, below a filter target) and mark them so that the nodes they
/// produce carry their filtering state.  Definitions keep their order.
pub async fn filter_level_definitions(
    session: &FilteringSession,
    context: &LevelFilteringContext,
    definitions: Vec<HierarchyLevelDefinition>,
) -> Result<Vec<HierarchyLevelDefinition>> {
    let span = trace_span!(
        "filter_level_definitions",
        definitions = definitions.len(),
        positions = context.positions.len(),
        has_filter_target_ancestor = context.has_filter_target_ancestor
    );
    async move {
        let matches = try_join_all(
            definitions
                .iter()
                .map(|definition| match_definition(session, context, definition)),
        )
        .await?;

        let mut filtered = Vec::with_capacity(definitions.len());
        for (definition, matches) in definitions.into_iter().zip(matches) {
            if matches.is_empty() && !context.has_filter_target_ancestor {
                continue;
            }
            filtered.push(match definition {
                HierarchyLevelDefinition::InstanceNodesQuery(def) => {
                    HierarchyLevelDefinition::InstanceNodesQuery(apply_filtering_to_query(
                        &def,
                        &matches,
                        context.has_filter_target_ancestor,
                    )?)
                }
                HierarchyLevelDefinition::GenericNode(def) => {
                    HierarchyLevelDefinition::GenericNode(apply_filtering_to_generic_node(
                        session, context, def, &matches,
                    ))
                }
            });
        }
        trace!(surviving = filtered.len(), "filtered level definitions");
        Ok(filtered)
    }
    .instrument(span)
    .await
}
