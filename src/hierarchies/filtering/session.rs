use std::collections::HashMap;

use tracing::trace;

use crate::{
    hierarchies::{
        identifiers::{
            FilteringPathOptions, HierarchyFilteringPath, HierarchyNodeIdentifier,
            NormalizedFilteringPath,
        },
        node_key::{canonical_instance_id, GenericNodeKey},
        nodes::PathPosition,
    },
    imodel_access::{ClassDerivationCache, MetadataProviderRef},
};

/// Index key for an identifier.  Instance identifiers are keyed by id alone
/// (class names and imodel keys are checked later, per row, because that needs
/// the metadata provider); generic identifiers are keyed in full.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum IdentifierIndexKey {
    Instance(String),
    Generic(GenericNodeKey),
}

impl IdentifierIndexKey {
    fn for_identifier(identifier: &HierarchyNodeIdentifier) -> Self {
        match identifier {
            HierarchyNodeIdentifier::Instance(key) => {
                IdentifierIndexKey::Instance(key.canonical_id())
            }
            HierarchyNodeIdentifier::Generic(key) => IdentifierIndexKey::Generic(key.clone()),
        }
    }
}

/// Rows report their ids in canonical form, so the paths are brought into
/// the same form once up front.  Ids that don't parse are left alone and get
/// rejected when a query is filtered by them.
fn canonicalize_instance_ids(mut path: NormalizedFilteringPath) -> NormalizedFilteringPath {
    for identifier in path.path.iter_mut() {
        if let HierarchyNodeIdentifier::Instance(key) = identifier {
            if let Some(id) = canonical_instance_id(&key.id) {
                key.id = id;
            }
        }
    }
    path
}

/// Everything derived from one set of filtering paths.  Built once when the
/// paths are set and then shared read-only by every level computed while
/// they're in effect.
pub struct FilteringSession {
    paths: Vec<NormalizedFilteringPath>,
    index: HashMap<IdentifierIndexKey, Vec<PathPosition>>,
    classes: ClassDerivationCache,
    imodel_key: Option<String>,
}

impl FilteringSession {
    pub fn new(
        paths: Vec<HierarchyFilteringPath>,
        metadata: MetadataProviderRef,
        imodel_key: Option<String>,
    ) -> Self {
        let paths: Vec<NormalizedFilteringPath> = paths
            .into_iter()
            .map(HierarchyFilteringPath::normalize)
            .filter(|path| !path.path.is_empty())
            .map(canonicalize_instance_ids)
            .collect();

        let mut index: HashMap<IdentifierIndexKey, Vec<PathPosition>> = HashMap::new();
        for (path_index, path) in paths.iter().enumerate() {
            for (position, identifier) in path.path.iter().enumerate() {
                index
                    .entry(IdentifierIndexKey::for_identifier(identifier))
                    .or_default()
                    .push(PathPosition {
                        path_index,
                        position,
                    });
            }
        }
        trace!(paths = paths.len(), identifiers = index.len(), "built filtering session");

        FilteringSession {
            paths,
            index,
            classes: ClassDerivationCache::new(metadata),
            imodel_key,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn classes(&self) -> &ClassDerivationCache {
        &self.classes
    }

    pub fn imodel_key(&self) -> Option<&str> {
        self.imodel_key.as_deref()
    }

    /// Instance identifiers pinned to another imodel never match anything
    /// this session's provider produces.
    pub fn accepts_imodel_key(&self, imodel_key: Option<&str>) -> bool {
        match imodel_key {
            None => true,
            Some(key) => self.imodel_key.as_deref() == Some(key),
        }
    }

    /// The first step of every path; that's what root level definitions are
    /// matched against.
    pub fn root_positions(&self) -> Vec<PathPosition> {
        (0..self.paths.len())
            .map(|path_index| PathPosition {
                path_index,
                position: 0,
            })
            .collect()
    }

    pub fn identifier_at(&self, pos: PathPosition) -> Option<&HierarchyNodeIdentifier> {
        self.paths.get(pos.path_index)?.path.get(pos.position)
    }

    /// Does the path end at `pos`?
    pub fn is_terminal(&self, pos: PathPosition) -> bool {
        match self.paths.get(pos.path_index) {
            Some(path) => pos.position + 1 == path.path.len(),
            None => false,
        }
    }

    pub fn next_position(&self, pos: PathPosition) -> Option<PathPosition> {
        if self.is_terminal(pos) || self.identifier_at(pos).is_none() {
            return None;
        }
        Some(PathPosition {
            path_index: pos.path_index,
            position: pos.position + 1,
        })
    }

    pub fn path_options(&self, path_index: usize) -> Option<&FilteringPathOptions> {
        self.paths.get(path_index)?.options.as_ref()
    }

    /// What's left of the path below the node matched at `pos`.
    pub fn sub_path_after(&self, pos: PathPosition) -> NormalizedFilteringPath {
        match self.paths.get(pos.path_index) {
            Some(path) => NormalizedFilteringPath {
                path: path.path.iter().skip(pos.position + 1).cloned().collect(),
                options: path.options.clone(),
            },
            None => NormalizedFilteringPath::default(),
        }
    }

    /// All positions holding an instance identifier with the given id,
    /// regardless of class.
    pub fn instance_positions(&self, id: &str) -> &[PathPosition] {
        let id = canonical_instance_id(id).unwrap_or_else(|| id.to_lowercase());
        self.index
            .get(&IdentifierIndexKey::Instance(id))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn generic_positions(&self, key: &GenericNodeKey) -> &[PathPosition] {
        self.index
            .get(&IdentifierIndexKey::Generic(key.clone()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
