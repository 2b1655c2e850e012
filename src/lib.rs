extern crate serde;
extern crate serde_json;

#[macro_use]
extern crate lazy_static;

pub mod config;
pub mod hierarchies;
pub mod imodel_access;
pub mod logging;

mod utils;

pub use hierarchies::{
    FilteringHierarchyDefinition, HierarchyDefinition, HierarchyFilteringPath, HierarchyProvider,
};
pub use imodel_access::{HierarchyError, Result};
