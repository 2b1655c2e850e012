use std::sync::Arc;

use async_stream::try_stream;
use futures::{
    future::{BoxFuture, FutureExt},
    stream::BoxStream,
    StreamExt,
};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{trace, trace_span, Instrument};

use super::{
    definition::{HierarchyDefinitionRef, HierarchyLevelDefinition, InstanceNodesQueryDefinition},
    filtering::{FilteringHierarchyDefinition, FilteringSession},
    grouping::{
        create_grouping_handlers, group_nodes, DefaultPropertyValueFormatter, GroupingContext,
        PropertyValueFormatterRef,
    },
    identifiers::HierarchyFilteringPath,
    node_key::HierarchyNodeKey,
    nodes::ProcessedHierarchyNode,
};
use crate::{
    config::HierarchyProviderConfig,
    imodel_access::{
        ClassDerivationCache, ErrorLayer, HierarchyError, MetadataProviderRef, QueryExecutorRef,
        QueryReaderOptions, Result, Row,
    },
    logging::SpanCapture,
};

/// A level along with everything logged while computing it.
pub struct LoggedLevel {
    pub nodes: Result<Vec<ProcessedHierarchyNode>>,
    /// `Null` unless `init_logging` was called.
    pub log: Value,
}

/// Produces hierarchy levels from a hierarchy definition: runs the level's
/// queries, turns rows into nodes, applies hiding and grouping, and, while
/// filtering paths are set, restricts the hierarchy to them.
pub struct HierarchyProvider {
    metadata: MetadataProviderRef,
    executor: QueryExecutorRef,
    source: HierarchyDefinitionRef,
    /// `source`, or `source` wrapped for the current filtering session.
    definition: HierarchyDefinitionRef,
    filtering: Option<Arc<FilteringSession>>,
    formatter: PropertyValueFormatterRef,
    config: HierarchyProviderConfig,
}

impl HierarchyProvider {
    pub fn new(
        metadata: MetadataProviderRef,
        executor: QueryExecutorRef,
        source: HierarchyDefinitionRef,
        config: HierarchyProviderConfig,
    ) -> Self {
        HierarchyProvider {
            metadata,
            executor,
            definition: source.clone(),
            source,
            filtering: None,
            formatter: Arc::new(DefaultPropertyValueFormatter),
            config,
        }
    }

    pub fn with_formatter(mut self, formatter: PropertyValueFormatterRef) -> Self {
        self.formatter = formatter;
        self
    }

    pub fn config(&self) -> &HierarchyProviderConfig {
        &self.config
    }

    pub fn filtering_session(&self) -> Option<&Arc<FilteringSession>> {
        self.filtering.as_ref()
    }

    /// Start a new filtering session; `None` (or no non-empty path) turns
    /// filtering off.  Nodes handed out before this call belong to the old
    /// session and shouldn't be used as parents afterwards.
    pub fn set_filtering_paths(&mut self, paths: Option<Vec<HierarchyFilteringPath>>) {
        let session = paths
            .map(|paths| {
                FilteringSession::new(paths, self.metadata.clone(), self.config.imodel_key.clone())
            })
            .filter(|session| !session.is_empty())
            .map(Arc::new);

        self.definition = match &session {
            Some(session) => Arc::new(FilteringHierarchyDefinition::new(
                self.source.clone(),
                session.clone(),
                self.config.class_check_concurrency,
            )),
            None => self.source.clone(),
        };
        trace!(filtering = session.is_some(), "set filtering paths");
        self.filtering = session;
    }

    /// `get_nodes`, with the log of the level's computation captured.  The
    /// log is kept for failed levels too.
    pub async fn get_nodes_logged(
        &self,
        parent: Option<&ProcessedHierarchyNode>,
        cancel: &CancellationToken,
    ) -> LoggedLevel {
        let capture = SpanCapture::new(parent.map(|p| p.label()).unwrap_or("<root>"));
        let nodes = self
            .get_nodes(parent, cancel)
            .instrument(capture.span())
            .await;
        LoggedLevel {
            nodes,
            log: capture.finish().await,
        }
    }

    /// Children of `parent`, or the root nodes when `parent` is `None`.
    /// Either the whole level comes back or an error does.
    pub async fn get_nodes(
        &self,
        parent: Option<&ProcessedHierarchyNode>,
        cancel: &CancellationToken,
    ) -> Result<Vec<ProcessedHierarchyNode>> {
        let span = trace_span!(
            "get_nodes",
            parent = parent.map(|p| p.label()).unwrap_or("<root>")
        );
        async move {
            if cancel.is_cancelled() {
                return Err(HierarchyError::Cancelled);
            }
            if let Some(ProcessedHierarchyNode::Grouping(group)) = parent {
                return Ok(group.children.clone());
            }

            let nodes = self.load_visible_level(parent, cancel).await?;

            let context = GroupingContext {
                classes: ClassDerivationCache::new(self.metadata.clone()),
                formatter: self.formatter.clone(),
                cancel: cancel.clone(),
            };
            let handlers = create_grouping_handlers(&nodes, &context).await?;
            let grouped = group_nodes(nodes, 0, &handlers, &context).await?;

            let mut result = Vec::with_capacity(grouped.len());
            for node in grouped {
                if cancel.is_cancelled() {
                    return Err(HierarchyError::Cancelled);
                }
                result.push(self.post_process(node).await?);
            }
            trace!(nodes = result.len(), "level ready");
            Ok(result)
        }
        .instrument(span)
        .await
    }

    /// Same as `get_nodes`, one node at a time.
    pub fn get_nodes_stream<'a>(
        &'a self,
        parent: Option<&'a ProcessedHierarchyNode>,
        cancel: CancellationToken,
    ) -> BoxStream<'a, Result<ProcessedHierarchyNode>> {
        Box::pin(try_stream! {
            let nodes = self.get_nodes(parent, &cancel).await?;
            for node in nodes {
                yield node;
            }
        })
    }

    /// The level with `hide_if_no_children` applied.
    fn load_visible_level<'a>(
        &'a self,
        parent: Option<&'a ProcessedHierarchyNode>,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Vec<ProcessedHierarchyNode>>> {
        async move {
            let nodes = self.load_processed_level(parent, cancel).await?;
            let mut visible = Vec::with_capacity(nodes.len());
            for node in nodes {
                let hide_if_no_children = node
                    .processing_params()
                    .map(|params| params.hide_if_no_children)
                    .unwrap_or(false);
                if !hide_if_no_children {
                    visible.push(node);
                    continue;
                }
                let has_children = match node.has_children() {
                    Some(has_children) => has_children,
                    None => !self.load_visible_level(Some(&node), cancel).await?.is_empty(),
                };
                if has_children {
                    visible.push(node.with_children_flag(true));
                } else {
                    trace!(label = node.label(), "hiding childless node");
                }
            }
            Ok(visible)
        }
        .boxed()
    }

    /// Define, query, parse and pre-process the level, replacing nodes that
    /// are hidden in the hierarchy with their own children.
    fn load_processed_level<'a>(
        &'a self,
        parent: Option<&'a ProcessedHierarchyNode>,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Vec<ProcessedHierarchyNode>>> {
        async move {
            let definitions = tokio::select! {
                _ = cancel.cancelled() => return Err(HierarchyError::Cancelled),
                definitions = self.definition.define_hierarchy_level(parent) => definitions?,
            };
            let parent_keys: Vec<HierarchyNodeKey> = parent
                .map(|parent| parent.child_parent_keys())
                .unwrap_or_default();

            let mut rows_read = 0;
            let mut nodes = Vec::new();
            for definition in definitions {
                match definition {
                    HierarchyLevelDefinition::GenericNode(definition) => {
                        let mut node = definition.node;
                        node.parent_keys = parent_keys.clone();
                        nodes.push(ProcessedHierarchyNode::Generic(node));
                    }
                    HierarchyLevelDefinition::InstanceNodesQuery(definition) => {
                        let rows = self.read_rows(&definition, &mut rows_read, cancel).await?;
                        for row in rows {
                            let mut node = self.definition.parse_node(&row, parent).await?;
                            node.parent_keys = parent_keys.clone();
                            nodes.push(ProcessedHierarchyNode::Instances(node));
                        }
                    }
                }
            }

            let mut level = Vec::with_capacity(nodes.len());
            for node in nodes {
                let node = match self.definition.pre_process_node(node).await? {
                    Some(node) => node,
                    None => continue,
                };
                let hide_in_hierarchy = node
                    .processing_params()
                    .map(|params| params.hide_in_hierarchy)
                    .unwrap_or(false);
                if !hide_in_hierarchy {
                    level.push(node);
                    continue;
                }
                if node.has_children() == Some(false) {
                    continue;
                }
                trace!(label = node.label(), "inlining children of hidden node");
                level.extend(self.load_processed_level(Some(&node), cancel).await?);
            }
            Ok(level)
        }
        .boxed()
    }

    async fn read_rows(
        &self,
        definition: &InstanceNodesQueryDefinition,
        rows_read: &mut usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<Row>> {
        let limit = self.config.hierarchy_level_size_limit;
        let options = QueryReaderOptions {
            limit: limit.map(|limit| limit.saturating_sub(*rows_read) + 1),
        };
        let mut reader = self
            .executor
            .create_query_reader(&definition.query, options)
            .await?;

        let mut rows = Vec::new();
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return Err(HierarchyError::Cancelled),
                next = reader.next() => next,
            };
            let row = match next {
                Some(row) => row?,
                None => break,
            };
            *rows_read += 1;
            if let Some(limit) = limit {
                if *rows_read > limit {
                    return Err(HierarchyError::sticky(
                        ErrorLayer::BadInput,
                        format!("Hierarchy level rows limit of {} exceeded", limit),
                    ));
                }
            }
            rows.push(row);
        }
        trace!(
            class_name = definition.full_class_name.as_str(),
            rows = rows.len(),
            "read rows"
        );
        Ok(rows)
    }

    /// Post-process grouping nodes' members before the grouping nodes
    /// themselves, so the hooks see finished children.
    fn post_process<'a>(
        &'a self,
        node: ProcessedHierarchyNode,
    ) -> BoxFuture<'a, Result<ProcessedHierarchyNode>> {
        async move {
            let node = match node {
                ProcessedHierarchyNode::Grouping(mut group) => {
                    let children = std::mem::take(&mut group.children);
                    let mut processed = Vec::with_capacity(children.len());
                    for child in children {
                        processed.push(self.post_process(child).await?);
                    }
                    group.children = processed;
                    ProcessedHierarchyNode::Grouping(group)
                }
                other => other,
            };
            self.definition.post_process_node(node).await
        }
        .boxed()
    }
}
