use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Parameters a sketch was built with. Genomes can only share a dataset
/// when all of these are identical.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SketchParameters {
    #[serde(rename = "kmer")]
    pub kmer_size: u32,
    pub alphabet: String,
    pub preserve_case: bool,
    pub canonical: bool,
    pub sketch_size: u32,
    pub hash_type: String,
    pub hash_bits: u32,
    pub hash_seed: u64,
}

impl SketchParameters {
    /// Name of the first field that differs from `other`, checked in declaration order.
    pub fn first_difference(&self, other: &SketchParameters) -> Option<&'static str> {
        if self.kmer_size != other.kmer_size {
            Some("k-mer length")
        } else if self.alphabet != other.alphabet {
            Some("alphabet")
        } else if self.preserve_case != other.preserve_case {
            Some("preserve case")
        } else if self.canonical != other.canonical {
            Some("canonical")
        } else if self.sketch_size != other.sketch_size {
            Some("sketch size")
        } else if self.hash_type != other.hash_type {
            Some("hash function")
        } else if self.hash_bits != other.hash_bits {
            Some("hash bits")
        } else if self.hash_seed != other.hash_seed {
            Some("hash seed")
        } else {
            None
        }
    }
}

/// One genome as reported by the sketching tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SketchEntry {
    pub name: String,
    #[serde(default)]
    pub length: Option<u64>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub hashes: Vec<u64>,
}

/// Decoded content of one sketch source: shared parameters plus the genomes it holds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SketchInfo {
    #[serde(flatten)]
    pub parameters: SketchParameters,
    pub sketches: Vec<SketchEntry>,
}

/// A genome's sketch as held by the store and the dataset
#[derive(Debug, Clone, PartialEq)]
pub struct SketchRecord {
    pub name: String,
    pub parameters: SketchParameters,
    pub hashes: BTreeSet<u64>,
    pub length: Option<u64>,
    pub comment: Option<String>,
    /// Source the record was last decoded from; `None` for in-memory datasets
    pub source: Option<PathBuf>,
}

impl SketchRecord {
    pub fn new(
        name: &str,
        parameters: SketchParameters,
        hashes: impl IntoIterator<Item = u64>,
    ) -> Self {
        SketchRecord {
            name: name.to_string(),
            parameters,
            hashes: hashes.into_iter().collect(),
            length: None,
            comment: None,
            source: None,
        }
    }

    pub(crate) fn from_entry(
        entry: SketchEntry,
        parameters: &SketchParameters,
        source: Option<&Path>,
    ) -> Self {
        SketchRecord {
            name: entry.name,
            parameters: parameters.clone(),
            hashes: entry.hashes.into_iter().collect(),
            length: entry.length,
            comment: entry.comment,
            source: source.map(Path::to_path_buf),
        }
    }
}

/// Hashes shared between two sketches, out of the hashes considered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharedHashes {
    pub shared: u64,
    pub total: u64,
}

/// One line of pairwise distance output
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceRecord {
    pub reference: String,
    pub query: String,
    pub distance: f64,
    pub p_value: f64,
    pub shared: SharedHashes,
}

/// The external sketching tool, seen as a black box.
///
/// `Sync` because pairwise distances are requested from several worker threads.
pub trait SketchTool: Sync {
    /// Parameters and per-genome hashes held by the sketch source at `path`
    fn describe_sketches(&self, path: &Path) -> Result<SketchInfo>;

    /// One record per pair of genomes across the two sources
    fn pairwise_distance(&self, first: &Path, second: &Path) -> Result<Vec<DistanceRecord>>;
}

impl<T: SketchTool + ?Sized> SketchTool for &T {
    fn describe_sketches(&self, path: &Path) -> Result<SketchInfo> {
        (**self).describe_sketches(path)
    }

    fn pairwise_distance(&self, first: &Path, second: &Path) -> Result<Vec<DistanceRecord>> {
        (**self).pairwise_distance(first, second)
    }
}
