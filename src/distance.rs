use crate::config::Config;
use crate::dataset::Dataset;
use crate::error::{Error, Result};
use crate::sketch::{SketchRecord, SketchTool};
use dashmap::DashMap;
use fxhash::{FxHashMap, FxHasher};
use itertools::Itertools;
use log::{debug, info, warn};
use ndarray::Array2;
use rayon::prelude::*;
use std::{hash::BuildHasherDefault, iter, path::PathBuf};

/// A `DashMap` w/ `FxHasher`, filled by the pairwise workers before the dense matrix is assembled.
type DashFx = DashMap<(usize, usize), f64, BuildHasherDefault<FxHasher>>;

/// Symmetric matrix of genetic distances between named genomes, zero on the diagonal
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceMatrix {
    names: Vec<String>,
    index: FxHashMap<String, usize>,
    values: Array2<f64>,
}

impl DistanceMatrix {
    /// All-zero matrix over `names`, in the given order
    pub fn new(names: Vec<String>) -> Self {
        let n = names.len();
        let index = names.iter().enumerate().map(|(i, name)| (name.clone(), i)).collect();
        DistanceMatrix {
            names,
            index,
            values: Array2::zeros((n, n)),
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Distance between two genomes, `None` if either is unknown
    pub fn get(&self, first: &str, second: &str) -> Option<f64> {
        Some(self.values[[self.index_of(first)?, self.index_of(second)?]])
    }

    /// Sets both directions at once; the diagonal stays zero.
    pub fn set(&mut self, i: usize, j: usize, distance: f64) {
        if i != j {
            self.values[[i, j]] = distance;
            self.values[[j, i]] = distance;
        }
    }

    pub fn as_array(&self) -> &Array2<f64> {
        &self.values
    }

    /// Upper triangle, row by row, as linkage routines expect it
    pub fn condensed(&self) -> Vec<f64> {
        let n = self.len();
        (0..n)
            .tuple_combinations()
            .map(|(i, j)| self.values[[i, j]])
            .collect()
    }

    /// Tab-separated matrix with a header row of names
    pub fn to_tsv(&self) -> String {
        let header = iter::once(".")
            .chain(self.names.iter().map(String::as_str))
            .join("\t");
        let rows = self.names.iter().zip(self.values.rows()).map(|(name, row)| {
            iter::once(name.clone())
                .chain(row.iter().map(|d| d.to_string()))
                .join("\t")
        });

        iter::once(header).chain(rows).map(|line| line + "\n").collect()
    }
}

/// Asks the tool for every pair of sources whose genomes still need a distance.
///
/// A genome counts only in the source it was last loaded from, so a record naming
/// an overwritten copy is dropped. Sources pair with themselves only when they hold
/// more than one current genome, so the diagonal is never requested. Pairs run on
/// rayon; the matrix is assembled once every worker has finished and any failure
/// discards all cells.
pub fn delegated<T: SketchTool>(
    tool: &T,
    dataset: &Dataset,
    sources: &[PathBuf],
    config: &Config,
) -> Result<DistanceMatrix> {
    let mut matrix = DistanceMatrix::new(dataset.names().to_vec());

    // source each genome was last loaded from
    let home: Vec<Option<usize>> = dataset
        .records()
        .map(|record| {
            let source = record.source.as_ref()?;
            sources.iter().position(|p| p == source)
        })
        .collect();
    let mut genomes_per_source = vec![0usize; sources.len()];
    for &i in home.iter().flatten() {
        genomes_per_source[i] += 1;
    }

    let cross = (0..sources.len())
        .tuple_combinations()
        .filter(|&(i, j)| genomes_per_source[i] > 0 && genomes_per_source[j] > 0);
    let within = (0..sources.len())
        .filter(|&i| genomes_per_source[i] > 1)
        .map(|i| (i, i));
    let pairs: Vec<(usize, usize)> = cross.chain(within).collect();
    info!(
        "Computing distances for {} genomes with {} pairwise calls",
        matrix.len(),
        pairs.len()
    );

    let cells: DashFx = DashMap::with_hasher(BuildHasherDefault::<FxHasher>::default());
    let compute = || {
        pairs.par_iter().try_for_each(|&(i, j)| -> Result<()> {
            let records = with_retries(config.retries, || {
                tool.pairwise_distance(&sources[i], &sources[j])
            })?;
            debug!(
                "{} vs {}: {} distances",
                sources[i].display(),
                sources[j].display(),
                records.len()
            );
            for record in records {
                match (matrix.index_of(&record.reference), matrix.index_of(&record.query)) {
                    (Some(a), Some(b)) if a != b && home[a] == Some(i) && home[b] == Some(j) => {
                        cells.insert((a, b), record.distance);
                    }
                    (Some(a), Some(b)) if a == b => {}
                    _ => debug!("Ignoring distance for {} vs {}", record.reference, record.query),
                }
            }
            Ok(())
        })
    };
    match config.threads {
        Some(threads) => rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| Error::InvalidConfig { reason: e.to_string() })?
            .install(compute)?,
        None => compute()?,
    }

    for (a, b) in (0..matrix.len()).tuple_combinations() {
        let distance = match (cells.get(&(a, b)), cells.get(&(b, a))) {
            (Some(d), _) | (None, Some(d)) => *d,
            (None, None) => {
                return Err(Error::DistanceComputationFailed {
                    first: matrix.names[a].clone(),
                    second: matrix.names[b].clone(),
                    reason: "the tool reported no distance for this pair".to_string(),
                })
            }
        };
        matrix.set(a, b, distance);
    }

    Ok(matrix)
}

fn with_retries<R>(retries: usize, mut call: impl FnMut() -> Result<R>) -> Result<R> {
    let mut attempt = 0;
    loop {
        match call() {
            Ok(value) => return Ok(value),
            Err(e) if attempt < retries => {
                attempt += 1;
                warn!("Retrying after failure ({}/{}): {}", attempt, retries, e);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Estimates every pairwise distance from the hash sets held in the dataset.
pub fn from_sketches(dataset: &Dataset) -> DistanceMatrix {
    let mut matrix = DistanceMatrix::new(dataset.names().to_vec());
    let records: Vec<&SketchRecord> = dataset.records().collect();
    info!("Estimating distances for {} genomes from their sketches", records.len());

    let pairs: Vec<(usize, usize)> = (0..records.len()).tuple_combinations().collect();
    let distances: Vec<f64> = pairs
        .par_iter()
        .map(|&(i, j)| mash_distance(records[i], records[j]))
        .collect();

    for (&(i, j), distance) in pairs.iter().zip(distances) {
        matrix.set(i, j, distance);
    }

    matrix
}

/// Mash distance between two bottom-s sketches.
///
/// The Jaccard index is estimated over the `s` smallest hashes of the union,
/// where `s` is the sketch size; no shared hash at all gives distance 1.
pub fn mash_distance(first: &SketchRecord, second: &SketchRecord) -> f64 {
    let sketch_size = first.parameters.sketch_size.max(1) as usize;
    let union: Vec<u64> = first
        .hashes
        .iter()
        .merge(second.hashes.iter())
        .dedup()
        .take(sketch_size)
        .copied()
        .collect();
    if union.is_empty() {
        return 1.0;
    }

    let shared = union
        .iter()
        .filter(|h| first.hashes.contains(h) && second.hashes.contains(h))
        .count();
    if shared == 0 {
        return 1.0;
    }
    if shared == union.len() {
        return 0.0;
    }

    let jaccard = shared as f64 / union.len() as f64;
    let k = first.parameters.kmer_size.max(1) as f64;
    -((2.0 * jaccard) / (1.0 + jaccard)).ln() / k
}
