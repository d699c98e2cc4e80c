use std::fmt::{Display, Formatter};
use std::str::FromStr;

use rand::random;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::Level;

use crate::config::error::SynapseConfigError;

/// A `tracing` level, named in either case (`"debug"`, `"INFO"`).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LogLevel(pub Level);

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel(Level::INFO)
    }
}

impl From<LogLevel> for Level {
    fn from(value: LogLevel) -> Self {
        value.0
    }
}

impl FromStr for LogLevel {
    type Err = SynapseConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<Level>()
            .map(LogLevel)
            .map_err(|_| SynapseConfigError::InvalidLogLevel(s.to_string()))
    }
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for LogLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for LogLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}

/// The `[meta]` section: the seed behind every random choice of a search,
/// and how much it logs.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct MetaConfig {
    #[serde(default = "random")]
    pub seed: i64,
    #[serde(default)]
    pub log_level: LogLevel,
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self {
            seed: random(),
            log_level: LogLevel::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use tracing::Level;

    use crate::config::error::SynapseConfigError;
    use crate::config::meta::LogLevel;

    #[test]
    fn test_log_level_names() {
        assert_eq!("debug".parse::<LogLevel>().unwrap(), LogLevel(Level::DEBUG));
        assert_eq!("WARN".parse::<LogLevel>().unwrap().to_string(), "WARN");
        assert!(matches!(
            "loud".parse::<LogLevel>(),
            Err(SynapseConfigError::InvalidLogLevel(_))
        ));
    }

    #[test]
    fn test_log_level_from_json() {
        let level: LogLevel = serde_json::from_str("\"trace\"").unwrap();
        assert_eq!(Level::from(level), Level::TRACE);
        assert_eq!(serde_json::to_string(&LogLevel::default()).unwrap(), "\"INFO\"");
        assert!(serde_json::from_str::<LogLevel>("\"verbose\"").is_err());
    }
}
