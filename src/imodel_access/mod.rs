mod access_interface;
mod class_derivation;
mod in_memory;

use std::sync::Arc;

pub use access_interface::{
    ECClassInfo, ECMetadataProvider, ECSchemaInfo, EcSqlBinding, EcSqlQueryDef, ErrorDetails,
    ErrorLayer, HierarchyError, QueryExecutor, QueryReaderOptions, Result, Row,
};
pub use class_derivation::{
    get_class, normalize_full_class_name, parse_full_class_name, ClassDerivationCache,
    MetadataProviderRef,
};
pub use in_memory::InMemoryMetadata;

pub type QueryExecutorRef = Arc<dyn QueryExecutor + Send + Sync>;
