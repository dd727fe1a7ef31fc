//! In-memory stand-in for the sketching tool, shared by the unit tests.
use crate::error::{Error, Result};
use crate::sketch::{
    DistanceRecord, SharedHashes, SketchEntry, SketchInfo, SketchParameters, SketchTool,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

pub(crate) fn params(kmer_size: u32) -> SketchParameters {
    SketchParameters {
        kmer_size,
        alphabet: "ACGT".to_string(),
        preserve_case: false,
        canonical: true,
        sketch_size: 1000,
        hash_type: "MurmurHash3_x64_128".to_string(),
        hash_bits: 64,
        hash_seed: 42,
    }
}

pub(crate) fn info(parameters: SketchParameters, genomes: &[(&str, &[u64])]) -> SketchInfo {
    SketchInfo {
        parameters,
        sketches: genomes
            .iter()
            .map(|(name, hashes)| SketchEntry {
                name: name.to_string(),
                length: None,
                comment: None,
                hashes: hashes.to_vec(),
            })
            .collect(),
    }
}

#[derive(Default)]
pub(crate) struct FakeTool {
    sources: HashMap<PathBuf, SketchInfo>,
    distances: HashMap<(String, String), f64>,
    /// Distances that only hold between the copies found in two given sources
    source_distances: HashMap<(PathBuf, PathBuf, String, String), f64>,
    slow_pair: Option<(PathBuf, PathBuf, Duration)>,
    broken: bool,
    pub(crate) describe_calls: AtomicUsize,
    pub(crate) distance_calls: AtomicUsize,
}

impl FakeTool {
    pub(crate) fn new() -> Self {
        FakeTool::default()
    }

    pub(crate) fn with_source(mut self, path: &str, info: SketchInfo) -> Self {
        self.sources.insert(PathBuf::from(path), info);
        self
    }

    pub(crate) fn with_distance(mut self, first: &str, second: &str, distance: f64) -> Self {
        self.distances.insert((first.to_string(), second.to_string()), distance);
        self.distances.insert((second.to_string(), first.to_string()), distance);
        self
    }

    pub(crate) fn with_source_distance(
        mut self,
        (first_source, first): (&str, &str),
        (second_source, second): (&str, &str),
        distance: f64,
    ) -> Self {
        let (a, b) = (PathBuf::from(first_source), PathBuf::from(second_source));
        self.source_distances
            .insert((a.clone(), b.clone(), first.to_string(), second.to_string()), distance);
        self.source_distances
            .insert((b, a, second.to_string(), first.to_string()), distance);
        self
    }

    /// Calls comparing these two sources take `delay` before answering
    pub(crate) fn with_slow_pair(mut self, first: &str, second: &str, delay: Duration) -> Self {
        self.slow_pair = Some((PathBuf::from(first), PathBuf::from(second), delay));
        self
    }

    /// Every pairwise call fails
    pub(crate) fn broken(mut self) -> Self {
        self.broken = true;
        self
    }

    pub(crate) fn distance_calls(&self) -> usize {
        self.distance_calls.load(Ordering::SeqCst)
    }

    fn source(&self, path: &Path) -> Result<&SketchInfo> {
        self.sources.get(path).ok_or_else(|| Error::SourceUnavailable {
            path: path.display().to_string(),
            reason: "no such file".to_string(),
        })
    }
}

impl SketchTool for FakeTool {
    fn describe_sketches(&self, path: &Path) -> Result<SketchInfo> {
        self.describe_calls.fetch_add(1, Ordering::SeqCst);
        self.source(path).cloned()
    }

    fn pairwise_distance(&self, first: &Path, second: &Path) -> Result<Vec<DistanceRecord>> {
        self.distance_calls.fetch_add(1, Ordering::SeqCst);

        let failure = |reason: &str| Error::DistanceComputationFailed {
            first: first.display().to_string(),
            second: second.display().to_string(),
            reason: reason.to_string(),
        };
        if self.broken {
            return Err(failure("tool exited with status 1"));
        }

        if let Some((a, b, delay)) = &self.slow_pair {
            if a == first && b == second {
                thread::sleep(*delay);
            }
        }

        let references = self.source(first)?;
        let queries = self.source(second)?;

        let mut records = Vec::new();
        for reference in &references.sketches {
            for query in &queries.sketches {
                let distance = if reference.name == query.name {
                    0.0
                } else {
                    let key = (
                        first.to_path_buf(),
                        second.to_path_buf(),
                        reference.name.clone(),
                        query.name.clone(),
                    );
                    *self
                        .source_distances
                        .get(&key)
                        .or_else(|| self.distances.get(&(key.2.clone(), key.3.clone())))
                        .ok_or_else(|| failure("unknown pair"))?
                };
                records.push(DistanceRecord {
                    reference: reference.name.clone(),
                    query: query.name.clone(),
                    distance,
                    p_value: 0.0,
                    shared: SharedHashes { shared: 0, total: 1000 },
                });
            }
        }

        Ok(records)
    }
}
