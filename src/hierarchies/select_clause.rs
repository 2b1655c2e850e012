use serde_json::{Map, Value};

use super::nodes::InstanceNodeGroupingParams;
use crate::imodel_access::Result;

/// Column aliases the default row parser reads.
pub struct NodeSelectClauseColumnNames;

impl NodeSelectClauseColumnNames {
    pub const FULL_CLASS_NAME: &'static str = "FullClassName";
    pub const EC_INSTANCE_ID: &'static str = "ECInstanceId";
    pub const DISPLAY_LABEL: &'static str = "DisplayLabel";
    pub const HAS_CHILDREN: &'static str = "HasChildren";
    pub const HIDE_IF_NO_CHILDREN: &'static str = "HideIfNoChildren";
    pub const HIDE_NODE_IN_HIERARCHY: &'static str = "HideNodeInHierarchy";
    pub const GROUPING: &'static str = "Grouping";
    pub const EXTENDED_DATA: &'static str = "ExtendedData";
    pub const AUTO_EXPAND: &'static str = "AutoExpand";
}

/// A value to select: either a constant or an ECSQL expression evaluated per
/// row.
#[derive(Clone, Debug, PartialEq)]
pub enum SelectValue {
    Literal(Value),
    Selector(String),
}

impl SelectValue {
    fn to_ecsql(&self) -> String {
        match self {
            SelectValue::Selector(selector) => selector.clone(),
            SelectValue::Literal(value) => literal_to_ecsql(value),
        }
    }
}

impl From<bool> for SelectValue {
    fn from(value: bool) -> Self {
        SelectValue::Literal(Value::Bool(value))
    }
}

pub fn quote_ecsql_string(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn literal_to_ecsql(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(true) => "TRUE".to_string(),
        Value::Bool(false) => "FALSE".to_string(),
        Value::Number(num) => num.to_string(),
        Value::String(s) => quote_ecsql_string(s),
        other => quote_ecsql_string(&other.to_string()),
    }
}

#[derive(Clone, Debug)]
pub struct NodeSelectClauseProps {
    /// Expression evaluating to the row's `ECClassId`.
    pub ec_class_id: String,
    /// Expression evaluating to the row's `ECInstanceId`.
    pub ec_instance_id: String,
    pub node_label: SelectValue,
    pub has_children: Option<SelectValue>,
    pub hide_if_no_children: Option<SelectValue>,
    pub hide_node_in_hierarchy: Option<SelectValue>,
    pub grouping: Option<InstanceNodeGroupingParams>,
    pub extended_data: Option<Map<String, Value>>,
    pub auto_expand: Option<SelectValue>,
}

impl NodeSelectClauseProps {
    pub fn new(ec_class_id: &str, ec_instance_id: &str, node_label: SelectValue) -> Self {
        Self {
            ec_class_id: ec_class_id.to_string(),
            ec_instance_id: ec_instance_id.to_string(),
            node_label,
            has_children: None,
            hide_if_no_children: None,
            hide_node_in_hierarchy: None,
            grouping: None,
            extended_data: None,
            auto_expand: None,
        }
    }
}

/// Builds the select list that produces exactly the columns
/// `default_parse_node` expects.
pub struct NodeSelectClauseFactory;

impl NodeSelectClauseFactory {
    pub fn create_select_clause(props: &NodeSelectClauseProps) -> Result<String> {
        type Columns = NodeSelectClauseColumnNames;

        let optional_flag = |value: &Option<SelectValue>| match value {
            Some(value) => format!("CAST({} AS BOOLEAN)", value.to_ecsql()),
            None => "CAST(NULL AS BOOLEAN)".to_string(),
        };
        let grouping = match &props.grouping {
            Some(grouping) => quote_ecsql_string(&serde_json::to_string(grouping)?),
            None => "CAST(NULL AS TEXT)".to_string(),
        };
        let extended_data = match &props.extended_data {
            Some(data) => quote_ecsql_string(&serde_json::to_string(data)?),
            None => "CAST(NULL AS TEXT)".to_string(),
        };

        let columns = [
            format!(
                "ec_classname({}, 's.c') AS [{}]",
                props.ec_class_id,
                Columns::FULL_CLASS_NAME
            ),
            format!("IdToHex({}) AS [{}]", props.ec_instance_id, Columns::EC_INSTANCE_ID),
            format!("{} AS [{}]", props.node_label.to_ecsql(), Columns::DISPLAY_LABEL),
            format!("{} AS [{}]", optional_flag(&props.has_children), Columns::HAS_CHILDREN),
            format!(
                "{} AS [{}]",
                optional_flag(&props.hide_if_no_children),
                Columns::HIDE_IF_NO_CHILDREN
            ),
            format!(
                "{} AS [{}]",
                optional_flag(&props.hide_node_in_hierarchy),
                Columns::HIDE_NODE_IN_HIERARCHY
            ),
            format!("{} AS [{}]", grouping, Columns::GROUPING),
            format!("{} AS [{}]", extended_data, Columns::EXTENDED_DATA),
            format!("{} AS [{}]", optional_flag(&props.auto_expand), Columns::AUTO_EXPAND),
        ];
        Ok(columns.join(",\n"))
    }
}
