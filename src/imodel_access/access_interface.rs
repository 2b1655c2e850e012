use std::fmt;

use async_trait::async_trait;
use futures_core::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type Result<T> = std::result::Result<T, HierarchyError>;

/// A single row produced by the query executor.  Columns are untyped and keyed
/// by their selected alias.
pub type Row = Map<String, Value>;

// JSON parse errors are sticky data problems.
impl From<serde_json::Error> for HierarchyError {
    fn from(err: serde_json::Error) -> HierarchyError {
        HierarchyError::StickyProblem(ErrorDetails {
            layer: ErrorLayer::DataLayer,
            message: err.to_string(),
        })
    }
}

/// Express whether the error seems to be happening in our own logic, in the
/// metadata we consult, or in the data the queries returned.
#[derive(Clone, Debug, PartialEq)]
pub enum ErrorLayer {
    /// The request itself has structural issues, like a filtering path that
    /// references a malformed instance id or a level that has more rows than
    /// the configured limit allows.
    BadInput,
    /// The provider configuration could not be loaded or makes no sense.
    ConfigLayer,
    /// A schema or class the hierarchy definition refers to does not exist.
    MetadataLayer,
    /// The query executor failed to run a query or stream its rows.
    QueryLayer,
    /// A row or a node carries values we could not interpret, for example a
    /// malformed `FilterTargetOptions` JSON column.
    DataLayer,
    /// Something that should be impossible happened, like a generic node
    /// definition being handed to the instance query augmentation.
    RuntimeInvariantViolation,
}

/// HierarchyError payload to provide details about what went wrong for
/// investigation purposes.
#[derive(Clone, Debug, PartialEq)]
pub struct ErrorDetails {
    pub layer: ErrorLayer,
    /// Stringified version of the lower level error.
    pub message: String,
}

/// Does a retry makes sense or not?
///
/// Nothing in this crate retries on its own; the distinction exists so that
/// the consumer of `HierarchyProvider::get_nodes` can make that call.
#[derive(Clone, Debug, PartialEq)]
pub enum HierarchyError {
    /// An error that will persist for the lifetime of the hierarchy session.
    /// Unknown schemas and classes fall in this bucket because schemas are
    /// presumed static for the session.
    StickyProblem(ErrorDetails),
    /// An error that might go away if retried later, like a query executor
    /// that timed out.
    TransientProblem(ErrorDetails),
    /// The level computation was aborted through its cancellation token.
    Cancelled,
}

impl HierarchyError {
    pub fn sticky(layer: ErrorLayer, message: impl Into<String>) -> Self {
        HierarchyError::StickyProblem(ErrorDetails {
            layer,
            message: message.into(),
        })
    }

    pub fn layer(&self) -> Option<&ErrorLayer> {
        match self {
            HierarchyError::StickyProblem(details) | HierarchyError::TransientProblem(details) => {
                Some(&details.layer)
            }
            HierarchyError::Cancelled => None,
        }
    }
}

impl fmt::Display for HierarchyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HierarchyError::StickyProblem(details) => {
                write!(f, "{:?}: {}", details.layer, details.message)
            }
            HierarchyError::TransientProblem(details) => {
                write!(f, "{:?} (transient): {}", details.layer, details.message)
            }
            HierarchyError::Cancelled => write!(f, "hierarchy level request was cancelled"),
        }
    }
}

impl std::error::Error for HierarchyError {}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ECSchemaInfo {
    pub name: String,
    pub alias: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ECClassInfo {
    /// `Schema.Class`
    pub full_name: String,
    pub name: String,
    pub label: Option<String>,
}

impl ECClassInfo {
    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }
}

/// Read access to the EC schema metadata of an iModel.
///
/// Every method may suspend; a class-derivation check can require a metadata
/// query on the implementation side.  Implementations are free to cache, this
/// crate only memoizes within a single filtering session (see
/// `ClassDerivationCache`).
#[async_trait]
pub trait ECMetadataProvider {
    /// Look up a schema by name, returning `None` if it doesn't exist.
    async fn get_schema(&self, schema_name: &str) -> Result<Option<ECSchemaInfo>>;

    /// Look up a class in a schema that is known to exist.
    async fn get_class(&self, schema: &ECSchemaInfo, class_name: &str)
        -> Result<Option<ECClassInfo>>;

    /// Does `derived_class_name` derive from (or equal) `base_class_name`?  Both
    /// names are full class names.
    async fn class_derives_from(
        &self,
        derived_class_name: &str,
        base_class_name: &str,
    ) -> Result<bool>;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "kebab-case")]
pub enum EcSqlBinding {
    Id(String),
    IdSet(Vec<String>),
    Int(i64),
    Double(f64),
    String(String),
    Boolean(bool),
}

/// A query to run against the iModel.  `ctes` are rendered in a `WITH
/// RECURSIVE` prefix by the executor.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EcSqlQueryDef {
    #[serde(default)]
    pub ctes: Vec<String>,
    pub ecsql: String,
    #[serde(default)]
    pub bindings: Vec<EcSqlBinding>,
}

#[derive(Clone, Debug, Default)]
pub struct QueryReaderOptions {
    /// Stop reading after this many rows.  The provider asks for one more row
    /// than it accepts so it can tell a full level from an overflowing one.
    pub limit: Option<usize>,
}

/// Unified exposure of the iModel query engine.
///
/// ## Runtime Assumptions
///
/// We assume that we are operating in a tokio runtime and that blocking
/// implementations use `tokio::task::block_in_place` or similar so the level
/// pipeline is never stalled by a synchronous database read.
#[async_trait]
pub trait QueryExecutor {
    async fn create_query_reader(
        &self,
        query: &EcSqlQueryDef,
        options: QueryReaderOptions,
    ) -> Result<BoxStream<'static, Result<Row>>>;
}
