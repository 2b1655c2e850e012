mod common;

use std::sync::Arc;

use futures::TryStreamExt;
use presentation_hierarchies::{
    config::HierarchyProviderConfig,
    hierarchies::{
        AutoExpandOption, FilteringPathOptions, GenericHierarchyNodeDefinition, GenericNodeKey,
        GroupingNodeKey, HierarchyFilteringPath, HierarchyLevelDefinition, HierarchyNodeIdentifier,
        HierarchyNodeKey, HierarchyProvider, InstanceKey, ProcessedGenericNode,
        ProcessedGroupingNode, ProcessedHierarchyNode,
    },
    imodel_access::{ErrorLayer, HierarchyError},
};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use common::{instance_query, labels, metadata, row, row_with, ScriptedExecutor, ScriptedHierarchy};

fn provider(
    hierarchy: ScriptedHierarchy,
    executor: Arc<ScriptedExecutor>,
    config: HierarchyProviderConfig,
) -> HierarchyProvider {
    HierarchyProvider::new(metadata(), executor, Arc::new(hierarchy), config)
}

fn subject(id: &str) -> HierarchyNodeIdentifier {
    HierarchyNodeIdentifier::instance("BisCore.Subject", id)
}

fn subjects_hierarchy() -> (ScriptedHierarchy, Arc<ScriptedExecutor>) {
    let hierarchy = ScriptedHierarchy::new()
        .with_level("", vec![instance_query("BisCore.Subject", "root-subjects")])
        .with_level("0x1", vec![instance_query("BisCore.Subject", "child-subjects")]);
    let executor = Arc::new(
        ScriptedExecutor::new()
            .with_rows("root-subjects", vec![row("BisCore.Subject", "0x1", "Root Subject")])
            .with_rows(
                "child-subjects",
                vec![
                    row("BisCore.Subject", "0x10", "Child Subject 1"),
                    row("BisCore.Subject", "0x11", "Child Subject 2"),
                    row("BisCore.Subject", "0x12", "Child Subject 3"),
                ],
            ),
    );
    (hierarchy, executor)
}

fn as_grouping(node: &ProcessedHierarchyNode) -> &ProcessedGroupingNode {
    match node {
        ProcessedHierarchyNode::Grouping(group) => group,
        other => panic!("expected a grouping node, got {:?}", other),
    }
}

#[tokio::test]
async fn unfiltered_levels_come_back_as_queried() {
    let (hierarchy, executor) = subjects_hierarchy();
    let provider = provider(hierarchy, executor.clone(), HierarchyProviderConfig::default());
    let cancel = CancellationToken::new();

    let roots = provider.get_nodes(None, &cancel).await.unwrap();
    assert_eq!(labels(&roots), vec!["Root Subject"]);
    assert_eq!(roots[0].auto_expand(), None);
    assert!(roots[0].parent_keys().is_empty());

    let children = provider.get_nodes(Some(&roots[0]), &cancel).await.unwrap();
    assert_eq!(
        labels(&children),
        vec!["Child Subject 1", "Child Subject 2", "Child Subject 3"]
    );
    assert_eq!(children[0].parent_keys(), &[roots[0].key()][..]);

    let queries = executor.queries();
    assert_eq!(queries.len(), 2);
    assert!(queries.iter().all(|query| query.ctes.is_empty()));
    assert!(!queries[0].ecsql.contains("FilterECInstanceId"));
}

#[tokio::test]
async fn filtering_paths_narrow_the_hierarchy_down() {
    let (hierarchy, executor) = subjects_hierarchy();
    let mut provider = provider(hierarchy, executor.clone(), HierarchyProviderConfig::default());
    let expand = Some(FilteringPathOptions {
        auto_expand: Some(AutoExpandOption::Flag(true)),
    });
    provider.set_filtering_paths(Some(vec![
        HierarchyFilteringPath::WithOptions {
            path: vec![subject("0x1"), subject("0x10")],
            options: expand.clone(),
        },
        HierarchyFilteringPath::WithOptions {
            path: vec![subject("0x1"), subject("0x12")],
            options: expand,
        },
    ]));
    let cancel = CancellationToken::new();

    let roots = provider.get_nodes(None, &cancel).await.unwrap();
    assert_eq!(labels(&roots), vec!["Root Subject"]);
    assert_eq!(roots[0].auto_expand(), Some(true));
    let filtering = roots[0].filtering().unwrap();
    assert!(!filtering.is_filter_target);
    assert_eq!(filtering.filtered_children_identifier_paths.len(), 2);

    let children = provider.get_nodes(Some(&roots[0]), &cancel).await.unwrap();
    assert_eq!(labels(&children), vec!["Child Subject 1", "Child Subject 3"]);
    for child in &children {
        assert_eq!(child.auto_expand(), Some(false));
        let filtering = child.filtering().unwrap();
        assert!(filtering.is_filter_target);
        assert_eq!(
            filtering
                .filter_target_options
                .as_ref()
                .and_then(|options| options.auto_expand.clone()),
            Some(AutoExpandOption::Flag(true))
        );
    }

    let queries = executor.queries();
    assert!(queries[0].ecsql.contains("0 AS [HasFilterTargetAncestor]"));
    assert!(queries[0].ecsql.contains("\nJOIN FilteringInfo [f]"));
    assert!(queries[0].ctes[0].starts_with("FilteringInfo("));
}

#[tokio::test]
async fn levels_below_a_filter_target_are_left_joined() {
    let (hierarchy, executor) = subjects_hierarchy();
    let mut provider = provider(hierarchy, executor.clone(), HierarchyProviderConfig::default());
    provider.set_filtering_paths(Some(vec![vec![subject("0x1")].into()]));
    let cancel = CancellationToken::new();

    let roots = provider.get_nodes(None, &cancel).await.unwrap();
    assert_eq!(roots[0].auto_expand(), Some(false));
    assert!(roots[0].filtering().unwrap().is_filter_target);

    let children = provider.get_nodes(Some(&roots[0]), &cancel).await.unwrap();
    assert_eq!(children.len(), 3);
    assert!(children
        .iter()
        .all(|child| child.filtering().unwrap().has_filter_target_ancestor));

    let queries = executor.queries();
    assert!(queries[1].ecsql.contains("1 AS [HasFilterTargetAncestor]"));
    assert!(queries[1].ctes.is_empty());
}

#[tokio::test]
async fn clearing_filtering_paths_restores_the_full_hierarchy() {
    let (hierarchy, executor) = subjects_hierarchy();
    let mut provider = provider(hierarchy, executor, HierarchyProviderConfig::default());
    let cancel = CancellationToken::new();

    provider.set_filtering_paths(Some(vec![vec![subject("0x1"), subject("0x11")].into()]));
    let roots = provider.get_nodes(None, &cancel).await.unwrap();
    let children = provider.get_nodes(Some(&roots[0]), &cancel).await.unwrap();
    assert_eq!(labels(&children), vec!["Child Subject 2"]);

    provider.set_filtering_paths(None);
    assert!(provider.filtering_session().is_none());
    let roots = provider.get_nodes(None, &cancel).await.unwrap();
    let children = provider.get_nodes(Some(&roots[0]), &cancel).await.unwrap();
    assert_eq!(children.len(), 3);
    assert!(children.iter().all(|child| child.filtering().is_none()));
}

#[tokio::test]
async fn generic_nodes_are_filtered_by_key() {
    let models = HierarchyLevelDefinition::GenericNode(GenericHierarchyNodeDefinition {
        node: ProcessedGenericNode {
            key: GenericNodeKey::new("models"),
            label: "Models".to_string(),
            ..Default::default()
        },
    });
    let hierarchy = ScriptedHierarchy::new().with_level(
        "",
        vec![models, instance_query("BisCore.Subject", "root-subjects")],
    );
    let executor = Arc::new(
        ScriptedExecutor::new()
            .with_rows("root-subjects", vec![row("BisCore.Subject", "0x1", "Root Subject")]),
    );
    let mut provider = provider(hierarchy, executor.clone(), HierarchyProviderConfig::default());
    provider.set_filtering_paths(Some(vec![vec![HierarchyNodeIdentifier::generic("models")].into()]));

    let roots = provider.get_nodes(None, &CancellationToken::new()).await.unwrap();
    assert_eq!(labels(&roots), vec!["Models"]);
    assert!(roots[0].filtering().unwrap().is_filter_target);
    assert!(executor.queries().is_empty());
}

#[tokio::test]
async fn class_groups_leading_to_targets_are_expanded() {
    let by_class = json!({ "byClass": true });
    let hierarchy = ScriptedHierarchy::new()
        .with_level("", vec![instance_query("BisCore.Subject", "root-subjects")])
        .with_level("0x1", vec![instance_query("BisCore.PhysicalElement", "elements")]);
    let executor = Arc::new(
        ScriptedExecutor::new()
            .with_rows("root-subjects", vec![row("BisCore.Subject", "0x1", "Root Subject")])
            .with_rows(
                "elements",
                vec![
                    row_with("Generic.PhysicalObject", "0x20", "Pump", "Grouping", by_class.clone()),
                    row_with("Generic.PhysicalObject", "0x21", "Valve", "Grouping", by_class),
                ],
            ),
    );
    let mut provider = provider(hierarchy, executor, HierarchyProviderConfig::default());
    provider.set_filtering_paths(Some(vec![vec![
        subject("0x1"),
        HierarchyNodeIdentifier::instance("Generic.PhysicalObject", "0x20"),
    ]
    .into()]));
    let cancel = CancellationToken::new();

    let roots = provider.get_nodes(None, &cancel).await.unwrap();
    let children = provider.get_nodes(Some(&roots[0]), &cancel).await.unwrap();
    assert_eq!(labels(&children), vec!["Physical Object"]);
    let group = as_grouping(&children[0]);
    assert_eq!(
        group.key,
        GroupingNodeKey::ClassGrouping {
            class_name: "Generic.PhysicalObject".to_string()
        }
    );
    assert_eq!(group.auto_expand, Some(true));

    let grouped = provider.get_nodes(Some(&children[0]), &cancel).await.unwrap();
    assert_eq!(labels(&grouped), vec!["Pump"]);
    assert_eq!(
        grouped[0].parent_keys().last(),
        Some(&HierarchyNodeKey::Grouping(group.key.clone()))
    );
}

fn weight_grouping(weight: i64, out_of_range_group: bool) -> serde_json::Value {
    json!({
        "byProperties": {
            "propertiesClassName": "BisCore:PhysicalElement",
            "propertyGroups": [{
                "propertyName": "Weight",
                "propertyValue": weight,
                "ranges": [
                    { "fromValue": 0, "toValue": 10 },
                    { "fromValue": 11, "toValue": 20 },
                ],
            }],
            "createGroupForOutOfRangeValues": out_of_range_group,
        }
    })
}

async fn weight_level(out_of_range_group: bool) -> Vec<ProcessedHierarchyNode> {
    let hierarchy = ScriptedHierarchy::new()
        .with_level("", vec![instance_query("BisCore.PhysicalElement", "elements")]);
    let executor = Arc::new(ScriptedExecutor::new().with_rows(
        "elements",
        vec![
            row_with(
                "Generic.PhysicalObject",
                "0x20",
                "Light",
                "Grouping",
                weight_grouping(5, out_of_range_group),
            ),
            row_with(
                "Generic.PhysicalObject",
                "0x21",
                "Heavy",
                "Grouping",
                weight_grouping(25, out_of_range_group),
            ),
        ],
    ));
    provider(hierarchy, executor, HierarchyProviderConfig::default())
        .get_nodes(None, &CancellationToken::new())
        .await
        .unwrap()
}

#[tokio::test]
async fn property_ranges_with_other_values_group() {
    let nodes = weight_level(true).await;
    assert_eq!(labels(&nodes), vec!["0 - 10", "Other"]);

    let range = as_grouping(&nodes[0]);
    assert_eq!(labels(&range.children), vec!["Light"]);
    assert_eq!(
        range.key,
        GroupingNodeKey::PropertyValueRangeGrouping {
            properties_class_name: "BisCore.PhysicalElement".to_string(),
            property_name: "Weight".to_string(),
            from_value: 0.0,
            to_value: 10.0,
        }
    );
    assert_eq!(labels(&as_grouping(&nodes[1]).children), vec!["Heavy"]);
}

#[tokio::test]
async fn property_values_out_of_range_stay_ungrouped() {
    let nodes = weight_level(false).await;
    assert_eq!(labels(&nodes), vec!["0 - 10", "Heavy"]);
    assert!(matches!(nodes[1], ProcessedHierarchyNode::Instances(_)));
}

#[tokio::test]
async fn hidden_nodes_are_replaced_by_their_children() {
    let hierarchy = ScriptedHierarchy::new()
        .with_level("", vec![instance_query("BisCore.Subject", "root-subjects")])
        .with_level("0x1", vec![instance_query("BisCore.Subject", "child-subjects")])
        .with_level("0x5", vec![instance_query("BisCore.Subject", "grandchildren")]);
    let executor = Arc::new(
        ScriptedExecutor::new()
            .with_rows(
                "root-subjects",
                vec![
                    row_with("BisCore.Subject", "0x1", "Hidden", "HideNodeInHierarchy", json!(1)),
                    row_with("BisCore.Subject", "0x4", "Empty", "HideIfNoChildren", json!(true)),
                    row_with("BisCore.Subject", "0x5", "Parent", "HideIfNoChildren", json!(true)),
                ],
            )
            .with_rows(
                "child-subjects",
                vec![
                    row("BisCore.Subject", "0x2", "B"),
                    row("BisCore.Subject", "0x3", "A"),
                ],
            )
            .with_rows("grandchildren", vec![row("BisCore.Subject", "0x6", "Leaf")]),
    );
    let provider = provider(hierarchy, executor, HierarchyProviderConfig::default());

    let roots = provider.get_nodes(None, &CancellationToken::new()).await.unwrap();
    assert_eq!(labels(&roots), vec!["B", "A", "Parent"]);
    assert_eq!(
        roots[0].parent_keys(),
        &[HierarchyNodeKey::Instances(vec![InstanceKey::new(
            "BisCore.Subject",
            "0x1"
        )])][..]
    );
    assert_eq!(roots[2].has_children(), Some(true));
}

#[tokio::test]
async fn nodes_stream_yields_the_level() {
    let (hierarchy, executor) = subjects_hierarchy();
    let provider = provider(hierarchy, executor, HierarchyProviderConfig::default());

    let roots: Vec<ProcessedHierarchyNode> = provider
        .get_nodes_stream(None, CancellationToken::new())
        .try_collect()
        .await
        .unwrap();
    assert_eq!(labels(&roots), vec!["Root Subject"]);
}

// Nothing in this binary installs a subscriber, so there's no log to capture.
#[tokio::test]
async fn logged_level_without_logging_has_no_log() {
    let (hierarchy, executor) = subjects_hierarchy();
    let provider = provider(hierarchy, executor, HierarchyProviderConfig::default());

    let roots = provider.get_nodes_logged(None, &CancellationToken::new()).await;
    assert_eq!(labels(&roots.nodes.unwrap()), vec!["Root Subject"]);
    assert_eq!(roots.log, serde_json::Value::Null);
}

#[tokio::test]
async fn level_size_limit_is_enforced() {
    let config = HierarchyProviderConfig {
        hierarchy_level_size_limit: Some(2),
        ..Default::default()
    };
    let (hierarchy, executor) = subjects_hierarchy();
    let provider = provider(hierarchy, executor, config);
    let cancel = CancellationToken::new();

    let roots = provider.get_nodes(None, &cancel).await.unwrap();
    let err = provider.get_nodes(Some(&roots[0]), &cancel).await.unwrap_err();
    assert_eq!(err.layer(), Some(&ErrorLayer::BadInput));
    assert!(err.to_string().contains("rows limit of 2 exceeded"));
}

#[tokio::test]
async fn cancellation_aborts_the_level() {
    let cancel = CancellationToken::new();
    let hierarchy =
        ScriptedHierarchy::new().with_level("", vec![instance_query("BisCore.Subject", "root-subjects")]);
    let executor = Arc::new(ScriptedExecutor::new().cancelling_on("root-subjects", cancel.clone()));
    let provider = provider(hierarchy, executor, HierarchyProviderConfig::default());

    let err = provider.get_nodes(None, &cancel).await.unwrap_err();
    assert_eq!(err, HierarchyError::Cancelled);

    // An already cancelled token doesn't even get to define the level.
    let err = provider.get_nodes(None, &cancel).await.unwrap_err();
    assert_eq!(err, HierarchyError::Cancelled);
}

#[tokio::test]
async fn unknown_classes_in_paths_fail_the_level() {
    let (hierarchy, executor) = subjects_hierarchy();
    let mut provider = provider(hierarchy, executor, HierarchyProviderConfig::default());
    provider.set_filtering_paths(Some(vec![vec![HierarchyNodeIdentifier::instance(
        "BisCore.Missing",
        "0x1",
    )]
    .into()]));

    let err = provider
        .get_nodes(None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, HierarchyError::StickyProblem(_)));
    assert_eq!(err.layer(), Some(&ErrorLayer::MetadataLayer));
}

#[tokio::test]
async fn paths_for_other_imodels_match_nothing() {
    let (hierarchy, executor) = subjects_hierarchy();
    let config = HierarchyProviderConfig {
        imodel_key: Some("model-a".to_string()),
        ..Default::default()
    };
    let mut provider = provider(hierarchy, executor, config);
    let mut foreign = InstanceKey::new("BisCore.Subject", "0x1");
    foreign.imodel_key = Some("model-b".to_string());
    provider.set_filtering_paths(Some(vec![vec![HierarchyNodeIdentifier::Instance(foreign)].into()]));

    let roots = provider.get_nodes(None, &CancellationToken::new()).await.unwrap();
    assert!(roots.is_empty());
}
