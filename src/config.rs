use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::imodel_access::{ErrorLayer, HierarchyError, Result};

pub const DEFAULT_CLASS_CHECK_CONCURRENCY: usize = 16;

/// Knobs of a `HierarchyProvider`.  Every field has a default, so `{}` is a
/// valid config.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HierarchyProviderConfig {
    /// Key of the imodel the provider serves.  Filtering path identifiers
    /// pinned to a different imodel never match.
    pub imodel_key: Option<String>,
    /// Maximum number of rows a query-based hierarchy level may produce.
    pub hierarchy_level_size_limit: Option<usize>,
    /// How many class checks may be in flight while parsing a filtered row.
    pub class_check_concurrency: usize,
}

impl Default for HierarchyProviderConfig {
    fn default() -> Self {
        HierarchyProviderConfig {
            imodel_key: None,
            hierarchy_level_size_limit: None,
            class_check_concurrency: DEFAULT_CLASS_CHECK_CONCURRENCY,
        }
    }
}

fn config_error(message: String) -> HierarchyError {
    HierarchyError::sticky(ErrorLayer::ConfigLayer, message)
}

pub fn from_json_str(input: &str) -> Result<HierarchyProviderConfig> {
    let config: HierarchyProviderConfig = serde_json::from_str(input)
        .map_err(|err| config_error(format!("Invalid hierarchy provider config: {}", err)))?;
    if config.class_check_concurrency == 0 {
        return Err(config_error(
            "classCheckConcurrency must be at least 1".to_string(),
        ));
    }
    Ok(config)
}

pub fn load_config<P: AsRef<Path>>(config_path: P) -> Result<HierarchyProviderConfig> {
    let config_path = config_path.as_ref();
    let config_file = File::open(config_path).map_err(|err| {
        config_error(format!("Unable to open {}: {}", config_path.display(), err))
    })?;
    let mut reader = BufReader::new(&config_file);
    let mut input = String::new();
    reader.read_to_string(&mut input).map_err(|err| {
        config_error(format!("Unable to read {}: {}", config_path.display(), err))
    })?;
    from_json_str(&input)
}

#[cfg(test)]
mod tests {
    use std::{env, fs};

    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        assert_eq!(from_json_str("{}").unwrap(), HierarchyProviderConfig::default());
    }

    #[test]
    fn loads_config_file() {
        let dir = env::temp_dir().join("presentation-hierarchies-config-test");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");
        fs::write(
            &path,
            r#"{ "imodelKey": "model-a", "hierarchyLevelSizeLimit": 1000 }"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        fs::remove_dir_all(&dir).unwrap();
        assert_eq!(config.imodel_key.as_deref(), Some("model-a"));
        assert_eq!(config.hierarchy_level_size_limit, Some(1000));
        assert_eq!(config.class_check_concurrency, DEFAULT_CLASS_CHECK_CONCURRENCY);
    }

    #[test]
    fn bad_configs_are_config_errors() {
        let err = from_json_str(r#"{ "classCheckConcurrency": 0 }"#).unwrap_err();
        assert_eq!(err.layer(), Some(&ErrorLayer::ConfigLayer));
        let err = from_json_str("[").unwrap_err();
        assert_eq!(err.layer(), Some(&ErrorLayer::ConfigLayer));
        let err = load_config("/nonexistent/presentation-hierarchies.json").unwrap_err();
        assert_eq!(err.layer(), Some(&ErrorLayer::ConfigLayer));
    }
}
