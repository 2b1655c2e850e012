//! Filtering a hierarchy down to the nodes that lie on a set of filtering
//! paths.
//!
//! A `FilteringSession` indexes the paths once.  `FilteringHierarchyDefinition`
//! wraps the domain's hierarchy definition: it narrows each level down to the
//! definitions that are on a path, augments their queries so every row
//! carries its filtering state, and reads that state back when parsing rows.

mod hierarchy_definition;
mod matcher;
mod query;
mod session;

pub use hierarchy_definition::FilteringHierarchyDefinition;
pub use matcher::{
    filter_level_definitions, level_filtering_context, match_definition, LevelFilteringContext,
    MatchedFilter,
};
pub use query::{apply_filtering_to_generic_node, apply_filtering_to_query, FilteringColumnNames};
pub use session::FilteringSession;

use super::nodes::PathPosition;

/// A node matched at `positions` gets auto-expanded if one of its paths
/// continues below it and asked for auto-expansion at the node's depth.
pub(crate) fn should_auto_expand(
    session: &FilteringSession,
    positions: &[PathPosition],
    depth: usize,
) -> bool {
    positions.iter().any(|pos| {
        !session.is_terminal(*pos)
            && session
                .path_options(pos.path_index)
                .and_then(|options| options.auto_expand.as_ref())
                .map(|auto_expand| auto_expand.expands_at_depth(depth))
                .unwrap_or(false)
    })
}
