#[cfg(feature = "toml")]
use std::fs;
#[cfg(feature = "toml")]
use std::path::Path;

use serde::{Deserialize, Serialize};

#[cfg(feature = "toml")]
use crate::config::error::SynapseConfigError;
use crate::config::meta::MetaConfig;
use crate::config::search::{ReorderConfig, SearchConfig, reorder_bound};
use crate::error::SynapseError;
use crate::synthesis::builder::{SearchParams, SearchParamsBuilder};

pub mod error;
pub mod merge;
pub mod meta;
pub mod search;

/// The contents of a synapse `.toml` file. Resolving it yields the
/// [SearchParams] that drive a search.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct SynapseConfig {
    #[serde(default)]
    pub meta: MetaConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub reorder: ReorderConfig,
}

impl SynapseConfig {
    #[cfg(feature = "toml")]
    pub fn from_toml(text: &str) -> Result<Self, SynapseConfigError> {
        Ok(toml_edit::de::from_str(text)?)
    }

    #[cfg(feature = "toml")]
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, SynapseConfigError> {
        Self::from_toml(&fs::read_to_string(path)?)
    }

    pub fn resolve(&self) -> Result<SearchParams, SynapseError> {
        let mut b = SearchParamsBuilder::default();
        b.seed(self.meta.seed);
        b.heuristic(self.search.heuristic);
        b.targets(self.search.targets.clone());
        b.max_reordered(reorder_bound(self.search.max_reordered)?);
        b.max_expansions(self.search.max_expansions);
        let params = b.build()?;
        Ok(params)
    }
}

#[cfg(all(test, feature = "toml"))]
mod tests {
    use crate::config::SynapseConfig;
    use crate::config::error::SynapseConfigError;
    use crate::config::meta::LogLevel;
    use crate::error::SynapseError;
    use crate::synthesis::heuristic::HeuristicKind;
    use crate::synthesis::target::TargetType;

    #[test]
    fn test_resolve_toml() {
        let text = r#"
[meta]
seed = 42
log_level = "DEBUG"

[search]
heuristic = "gallium"
targets = ["tofino", "x86"]
max_reordered = 2
"#;
        let config = SynapseConfig::from_toml(text).unwrap();
        assert_eq!(config.meta.log_level, LogLevel(tracing::Level::DEBUG));
        let params = config.resolve().unwrap();
        assert_eq!(params.seed, 42);
        assert_eq!(params.heuristic, HeuristicKind::Gallium);
        assert_eq!(params.targets, vec![TargetType::Tofino, TargetType::X86]);
        assert_eq!(params.max_reordered, Some(2));
        assert_eq!(params.max_expansions, None);
        assert_eq!(config.reorder.bound().unwrap(), None);
    }

    #[test]
    fn test_defaults_round_trip() {
        let config = SynapseConfig::default();
        let text = toml_edit::ser::to_string_pretty(&config).unwrap();
        let back: SynapseConfig = toml_edit::de::from_str(&text).unwrap();
        assert_eq!(back.meta.seed, config.meta.seed);
        assert_eq!(back.resolve().unwrap().max_reordered, None);
    }

    #[test]
    fn test_bad_bound() {
        let mut config = SynapseConfig::default();
        config.search.max_reordered = -4;
        assert!(matches!(config.resolve(), Err(SynapseError::Config(_))));
    }

    #[test]
    fn test_unreadable_config() {
        assert!(matches!(
            SynapseConfig::from_toml("[search]\nheuristic = \"fastest\""),
            Err(SynapseConfigError::Toml(_))
        ));
        assert!(matches!(
            SynapseConfig::from_toml("[meta\nseed = 1"),
            Err(SynapseConfigError::Toml(_))
        ));
        assert!(matches!(
            SynapseConfig::from_path("/nonexistent/synapse.toml"),
            Err(SynapseConfigError::Io(_))
        ));
    }
}
