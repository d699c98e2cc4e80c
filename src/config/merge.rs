use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::error::SynapseConfigError;
use crate::merge::{MergePolicy, Side};

/// Settings of `nf-combination`, read from JSON.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct MergeConfig {
    pub bdd1_color: String,
    pub bdd2_color: String,
    pub enable_gviz: bool,
    pub prior_changes: u8,
    pub conflict_matrix: Vec<Vec<u8>>,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            bdd1_color: "cornflowerblue".to_string(),
            bdd2_color: "darkolivegreen3".to_string(),
            enable_gviz: false,
            prior_changes: 0,
            conflict_matrix: vec![vec![0; 3]; 3],
        }
    }
}

impl MergeConfig {
    pub fn from_json(text: &str) -> Result<Self, SynapseConfigError> {
        let config: MergeConfig = serde_json::from_str(text)?;
        config.policy()?;
        Ok(config)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, SynapseConfigError> {
        Self::from_json(&fs::read_to_string(path)?)
    }

    pub fn policy(&self) -> Result<MergePolicy, SynapseConfigError> {
        let prior_changes = match self.prior_changes {
            0 => Side::First,
            1 => Side::Second,
            v => return Err(SynapseConfigError::InvalidPriorChanges(v)),
        };
        if self.conflict_matrix.len() != 3 {
            return Err(SynapseConfigError::MalformedConflictMatrix(format!(
                "{} rows",
                self.conflict_matrix.len()
            )));
        }
        let mut conflict_matrix = [[0u8; 3]; 3];
        for (i, row) in self.conflict_matrix.iter().enumerate() {
            if row.len() != 3 {
                return Err(SynapseConfigError::MalformedConflictMatrix(format!(
                    "row {i} has {} entries",
                    row.len()
                )));
            }
            for (j, v) in row.iter().enumerate() {
                if *v > 1 {
                    return Err(SynapseConfigError::MalformedConflictMatrix(format!(
                        "entry [{i}][{j}] is {v}"
                    )));
                }
                conflict_matrix[i][j] = *v;
            }
        }
        Ok(MergePolicy {
            conflict_matrix,
            prior_changes,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::config::error::SynapseConfigError;
    use crate::config::merge::MergeConfig;
    use crate::merge::Side;

    #[test]
    fn test_parse_policy() {
        let config = MergeConfig::from_json(
            r#"{"bdd1_color": "red", "bdd2_color": "blue", "enable_gviz": true,
                "prior_changes": 1, "conflict_matrix": [[0,1,0],[0,0,0],[1,1,0]]}"#,
        )
        .unwrap();
        let policy = config.policy().unwrap();
        assert_eq!(policy.prior_changes, Side::Second);
        assert_eq!(policy.conflict_matrix[0][1], 1);
        assert_eq!(policy.conflict_matrix[2][0], 1);
        assert!(config.enable_gviz);
    }

    #[test]
    fn test_rejects_bad_matrix() {
        let base = MergeConfig::default();
        let mut short = base.clone();
        short.conflict_matrix.pop();
        assert!(matches!(
            short.policy(),
            Err(SynapseConfigError::MalformedConflictMatrix(_))
        ));
        let mut big = base.clone();
        big.conflict_matrix[1][2] = 2;
        assert!(matches!(
            big.policy(),
            Err(SynapseConfigError::MalformedConflictMatrix(_))
        ));
        let mut prior = base;
        prior.prior_changes = 3;
        assert!(matches!(prior.policy(), Err(SynapseConfigError::InvalidPriorChanges(3))));
        assert!(matches!(
            MergeConfig::from_json("{\"bdd1_color\": 1}"),
            Err(SynapseConfigError::Json(_))
        ));
    }
}
