use crate::dataset::{Dataset, HashCounts};
use crate::error::{Error, Result};
use crate::sketch::{SketchInfo, SketchRecord, SketchTool};
use fxhash::FxHashMap;
use log::debug;
use std::path::Path;

/// Decoded sketch records keyed by genome name, plus the running hash -> genome count table.
#[derive(Debug, Clone, Default)]
pub struct SketchStore {
    records: FxHashMap<String, SketchRecord>,
    hash_counts: HashCounts,
    /// First genome ever folded in; parameters of every other genome are checked against it
    reference: Option<String>,
}

impl SketchStore {
    pub fn new() -> Self {
        SketchStore::default()
    }

    /// Decodes the source at `path` and folds its genomes into the store.
    ///
    /// The store is left untouched when the tool cannot describe the source.
    /// Returns the number of genomes the source held.
    pub fn load<T: SketchTool>(&mut self, tool: &T, path: &Path) -> Result<usize> {
        let info = tool.describe_sketches(path)?;
        debug!("{} holds {} sketches", path.display(), info.sketches.len());

        Ok(self.fold(info, Some(path)))
    }

    /// Folds already decoded sketch info into the store.
    ///
    /// A genome name seen before is overwritten (last write wins). Every hash of every
    /// incoming genome bumps its count by one; counts are never decremented.
    pub fn fold(&mut self, info: SketchInfo, source: Option<&Path>) -> usize {
        let SketchInfo { parameters, sketches } = info;
        let n = sketches.len();

        for entry in sketches {
            let record = SketchRecord::from_entry(entry, &parameters, source);
            for hash in &record.hashes {
                *self.hash_counts.entry(*hash).or_insert(0) += 1;
            }
            if self.reference.is_none() {
                self.reference = Some(record.name.clone());
            }
            self.records.insert(record.name.clone(), record);
        }

        n
    }

    pub fn get(&self, name: &str) -> Option<&SketchRecord> {
        self.records.get(name)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn hash_counts(&self) -> &HashCounts {
        &self.hash_counts
    }

    pub fn reference(&self) -> Option<&str> {
        self.reference.as_deref()
    }

    /// Checks every genome's parameters against the reference genome.
    ///
    /// Genomes are visited in name order so the reported offender is stable.
    pub fn validate(&self) -> Result<()> {
        let Some(reference) = self.reference.as_ref().and_then(|name| self.records.get(name)) else {
            return Ok(());
        };

        let mut names: Vec<&String> = self.records.keys().collect();
        names.sort();

        for name in names {
            let record = &self.records[name];
            if let Some(field) = reference.parameters.first_difference(&record.parameters) {
                return Err(Error::IncompatibleSketch {
                    genome: record.name.clone(),
                    reference: reference.name.clone(),
                    field: field.to_string(),
                });
            }
        }

        Ok(())
    }

    /// Validates the store and turns it into a dataset with a sorted name list.
    pub fn into_dataset(self) -> Result<Dataset> {
        if self.records.is_empty() {
            return Err(Error::InvalidConstructorArgument {
                reason: "the sketch sources hold no genomes".to_string(),
            });
        }
        self.validate()?;

        let mut names: Vec<String> = self.records.keys().cloned().collect();
        names.sort();

        Ok(Dataset::new_unchecked(names, self.records, self.hash_counts))
    }
}
