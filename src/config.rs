use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, path::PathBuf};

/// Smallest branch length tolerated next to the root after rerooting
pub const MIN_ROOT_BRANCH_LENGTH: f64 = 0.01;

/// Agglomerative clustering used to turn the distance matrix into a tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    /// Neighbor joining on the Q-criterion
    #[default]
    Nj,
    /// Average linkage, branch lengths from half the merge dissimilarity
    Upgma,
}

/// Where pairwise distances come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMode {
    /// Ask the external tool for every pair of sketch sources
    Delegated,
    /// Estimate the Mash distance from the hash sets held in the dataset
    Sketch,
}

/// Options shared by every stage of the pipeline.
///
/// Every field has a default, so an empty JSON object is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    /// Executable used for `info` and `dist` calls
    pub mash_exe: PathBuf,
    /// Worker threads for pairwise distances; `None` uses the global rayon pool
    pub threads: Option<usize>,
    pub method: Method,
    /// `None` picks `Delegated` for file-backed sketches and `Sketch` otherwise
    pub distance_mode: Option<DistanceMode>,
    pub min_root_branch_length: f64,
    /// Extra attempts for a failed pairwise invocation
    pub retries: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            mash_exe: PathBuf::from("mash"),
            threads: None,
            method: Method::default(),
            distance_mode: None,
            min_root_branch_length: MIN_ROOT_BRANCH_LENGTH,
            retries: 0,
        }
    }
}

impl Config {
    /// Reads a JSON configuration file; missing keys fall back to their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Config> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| Error::InvalidConfig {
            reason: format!("cannot read {}: {}", path.display(), e),
        })?;

        Config::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Config> {
        let config: Config = serde_json::from_str(text).map_err(|e| Error::InvalidConfig {
            reason: e.to_string(),
        })?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.min_root_branch_length.is_finite() || self.min_root_branch_length < 0.0 {
            return Err(Error::InvalidConfig {
                reason: format!(
                    "min-root-branch-length must be a non-negative number, got {}",
                    self.min_root_branch_length
                ),
            });
        }

        if self.threads == Some(0) {
            return Err(Error::InvalidConfig {
                reason: "threads needs to be larger than zero".to_string(),
            });
        }

        Ok(())
    }
}
