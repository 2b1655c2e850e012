#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use futures::{stream, stream::BoxStream, StreamExt};
use presentation_hierarchies::{
    hierarchies::{
        HierarchyDefinition, HierarchyLevelDefinition, InstanceNodesQueryDefinition,
        ProcessedHierarchyNode,
    },
    imodel_access::{
        EcSqlQueryDef, ErrorLayer, HierarchyError, InMemoryMetadata, QueryExecutor,
        QueryReaderOptions, Result, Row,
    },
};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

pub fn metadata() -> Arc<InMemoryMetadata> {
    Arc::new(
        InMemoryMetadata::new()
            .with_class("BisCore.Element", Some("Element"), &[])
            .with_class("BisCore.Subject", Some("Subject"), &["BisCore.Element"])
            .with_class("BisCore.PhysicalElement", Some("Physical Element"), &["BisCore.Element"])
            .with_class("Generic.PhysicalObject", Some("Physical Object"), &["BisCore.PhysicalElement"])
            .with_class("BisCore.Model", Some("Model"), &[]),
    )
}

pub fn row(class_name: &str, id: &str, label: &str) -> Row {
    let mut row = Row::new();
    row.insert("FullClassName".to_string(), json!(class_name));
    row.insert("ECInstanceId".to_string(), json!(id));
    row.insert("DisplayLabel".to_string(), json!(label));
    row
}

pub fn row_with(class_name: &str, id: &str, label: &str, column: &str, value: Value) -> Row {
    let mut row = row(class_name, id, label);
    row.insert(column.to_string(), value);
    row
}

pub fn instance_query(full_class_name: &str, marker: &str) -> HierarchyLevelDefinition {
    HierarchyLevelDefinition::InstanceNodesQuery(InstanceNodesQueryDefinition {
        full_class_name: full_class_name.to_string(),
        query: EcSqlQueryDef {
            ecsql: format!("SELECT * FROM {} /* {} */", full_class_name, marker),
            ..Default::default()
        },
    })
}

struct FilteringInfoRow {
    id: String,
    is_filter_target: bool,
    options: Value,
    class_name: String,
}

fn unquote(s: &str) -> String {
    s.trim_matches('\'').replace("''", "'")
}

/// Pull the rows back out of a `FilteringInfo` CTE.
fn parse_filtering_info(cte: &str) -> Vec<FilteringInfoRow> {
    cte.lines()
        .filter_map(|line| line.trim().strip_prefix("VALUES (")?.strip_suffix(')'))
        .filter_map(|values| {
            let (id, rest) = values.split_once(", ")?;
            let (is_filter_target, rest) = rest.split_once(", ")?;
            let (options, class_name) = rest.rsplit_once(", ")?;
            Some(FilteringInfoRow {
                id: id.to_string(),
                is_filter_target: is_filter_target == "1",
                options: if options.starts_with('\'') {
                    json!(unquote(options))
                } else {
                    Value::Null
                },
                class_name: unquote(class_name),
            })
        })
        .collect()
}

/// Query executor serving canned rows.  A query gets the rows registered
/// under the first marker its ECSQL contains; filtered queries get the
/// `FilteringInfo` join applied to those rows.
#[derive(Default)]
pub struct ScriptedExecutor {
    rows: Vec<(String, Vec<Row>)>,
    cancel_on: Option<(String, CancellationToken)>,
    queries: Mutex<Vec<EcSqlQueryDef>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(mut self, marker: &str, rows: Vec<Row>) -> Self {
        self.rows.push((marker.to_string(), rows));
        self
    }

    /// Cancel `token` when the query containing `marker` starts, and never
    /// produce a row for it.
    pub fn cancelling_on(mut self, marker: &str, token: CancellationToken) -> Self {
        self.cancel_on = Some((marker.to_string(), token));
        self
    }

    pub fn queries(&self) -> Vec<EcSqlQueryDef> {
        self.queries.lock().unwrap().clone()
    }

    fn apply_filtering(query: &EcSqlQueryDef, rows: Vec<Row>) -> Vec<Row> {
        if !query.ecsql.contains("[FilterECInstanceId]") {
            return rows;
        }
        let has_filter_target_ancestor = query.ecsql.contains("1 AS [HasFilterTargetAncestor]");
        let filtering_info = query
            .ctes
            .iter()
            .find(|cte| cte.starts_with("FilteringInfo("))
            .map(|cte| parse_filtering_info(cte));
        let left_join = query.ecsql.contains("LEFT JOIN");

        rows.into_iter()
            .filter_map(|mut row| {
                let id = row
                    .get("ECInstanceId")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string();
                let info = filtering_info
                    .as_ref()
                    .and_then(|infos| infos.iter().find(|info| info.id.eq_ignore_ascii_case(&id)));
                if filtering_info.is_some() && info.is_none() && !left_join {
                    return None;
                }
                let (filter_id, class_name, is_filter_target, options) = match info {
                    Some(info) => (
                        json!(info.id),
                        json!(info.class_name),
                        json!(if info.is_filter_target { 1 } else { 0 }),
                        info.options.clone(),
                    ),
                    None => (Value::Null, Value::Null, Value::Null, Value::Null),
                };
                row.insert("FilterECInstanceId".to_string(), filter_id);
                row.insert("FilterClassName".to_string(), class_name);
                row.insert(
                    "HasFilterTargetAncestor".to_string(),
                    json!(if has_filter_target_ancestor { 1 } else { 0 }),
                );
                row.insert("IsFilterTarget".to_string(), is_filter_target);
                row.insert("FilterTargetOptions".to_string(), options);
                Some(row)
            })
            .collect()
    }
}

#[async_trait]
impl QueryExecutor for ScriptedExecutor {
    async fn create_query_reader(
        &self,
        query: &EcSqlQueryDef,
        options: QueryReaderOptions,
    ) -> Result<BoxStream<'static, Result<Row>>> {
        self.queries.lock().unwrap().push(query.clone());

        if let Some((marker, token)) = &self.cancel_on {
            if query.ecsql.contains(marker.as_str()) {
                token.cancel();
                return Ok(stream::pending::<Result<Row>>().boxed());
            }
        }

        let rows = match self
            .rows
            .iter()
            .find(|(marker, _)| query.ecsql.contains(marker.as_str()))
        {
            Some((_, rows)) => rows.clone(),
            None => {
                return Err(HierarchyError::sticky(
                    ErrorLayer::QueryLayer,
                    format!("no rows scripted for {}", query.ecsql),
                ))
            }
        };
        let mut rows = Self::apply_filtering(query, rows);
        if let Some(limit) = options.limit {
            rows.truncate(limit);
        }
        Ok(stream::iter(rows.into_iter().map(Ok)).boxed())
    }
}

/// Hierarchy definition with a fixed set of levels, keyed by the parent's
/// instance or generic id (the root level is keyed by `""`).
#[derive(Default)]
pub struct ScriptedHierarchy {
    levels: HashMap<String, Vec<HierarchyLevelDefinition>>,
}

impl ScriptedHierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, parent_id: &str, definitions: Vec<HierarchyLevelDefinition>) -> Self {
        self.levels.insert(parent_id.to_string(), definitions);
        self
    }
}

#[async_trait]
impl HierarchyDefinition for ScriptedHierarchy {
    async fn define_hierarchy_level(
        &self,
        parent_node: Option<&ProcessedHierarchyNode>,
    ) -> Result<Vec<HierarchyLevelDefinition>> {
        let parent_id = match parent_node {
            None => String::new(),
            Some(ProcessedHierarchyNode::Instances(node)) => {
                node.key.first().map(|key| key.id.clone()).unwrap_or_default()
            }
            Some(ProcessedHierarchyNode::Generic(node)) => node.key.id.clone(),
            Some(ProcessedHierarchyNode::Grouping(_)) => return Ok(vec![]),
        };
        Ok(self.levels.get(&parent_id).cloned().unwrap_or_default())
    }
}

pub fn labels(nodes: &[ProcessedHierarchyNode]) -> Vec<&str> {
    nodes.iter().map(|node| node.label()).collect()
}
