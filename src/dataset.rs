use crate::error::{Error, Result};
use crate::sketch::{SketchParameters, SketchRecord, SketchTool};
use crate::store::SketchStore;
use fxhash::FxHashMap;
use log::info;
use std::path::Path;

/// Hash value -> number of genomes whose sketch contains it
pub type HashCounts = FxHashMap<u64, u32>;

/// A merged, validated set of genome sketches.
///
/// # Invariants
/// - `names` is sorted as plain strings and free of duplicates
/// - every name has a record and every record is named
/// - all records share identical [SketchParameters]
#[derive(Debug, Clone)]
pub struct Dataset {
    names: Vec<String>,
    records: FxHashMap<String, SketchRecord>,
    hash_counts: HashCounts,
}

impl Dataset {
    pub(crate) fn new_unchecked(
        names: Vec<String>,
        records: FxHashMap<String, SketchRecord>,
        hash_counts: HashCounts,
    ) -> Self {
        Dataset { names, records, hash_counts }
    }

    /// Decodes every source in order and merges them into one dataset.
    ///
    /// Fails without producing a dataset when a source is unavailable or
    /// any two genomes were sketched with different parameters.
    pub fn merge<T: SketchTool, P: AsRef<Path>>(tool: &T, sources: &[P]) -> Result<Dataset> {
        if sources.is_empty() {
            return Err(Error::InvalidConstructorArgument {
                reason: "at least one sketch source is needed".to_string(),
            });
        }

        let mut store = SketchStore::new();
        for source in sources {
            store.load(tool, source.as_ref())?;
        }

        let dataset = store.into_dataset()?;
        info!(
            "Merged {} genomes from {} sketch sources ({} distinct hashes)",
            dataset.len(),
            sources.len(),
            dataset.hash_counts.len()
        );

        Ok(dataset)
    }

    /// Builds a dataset from pre-built parts, checking the dataset invariants.
    ///
    /// `names` may come in any order; it is sorted here.
    pub fn from_parts(
        records: impl IntoIterator<Item = (String, SketchRecord)>,
        names: Vec<String>,
        hash_counts: impl IntoIterator<Item = (u64, u32)>,
    ) -> Result<Dataset> {
        let records: FxHashMap<String, SketchRecord> = records.into_iter().collect();

        let mut names = names;
        names.sort();
        if names.is_empty() {
            return Err(Error::InvalidConstructorArgument {
                reason: "the name list is empty".to_string(),
            });
        }
        if let Some(pair) = names.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(Error::DuplicateTaxon { name: pair[0].clone() });
        }

        for name in &names {
            match records.get(name) {
                None => {
                    return Err(Error::InvalidConstructorArgument {
                        reason: format!("genome {} has no sketch record", name),
                    })
                }
                Some(record) if record.name != *name => {
                    return Err(Error::InvalidConstructorArgument {
                        reason: format!("record stored under {} is named {}", name, record.name),
                    })
                }
                Some(_) => {}
            }
        }
        if records.len() != names.len() {
            let mut unlisted: Vec<&String> = records
                .keys()
                .filter(|k| names.binary_search(k).is_err())
                .collect();
            unlisted.sort();
            return Err(Error::InvalidConstructorArgument {
                reason: format!("genome {} is missing from the name list", unlisted[0]),
            });
        }

        let reference = &records[&names[0]];
        for name in &names[1..] {
            let record = &records[name];
            if let Some(field) = reference.parameters.first_difference(&record.parameters) {
                return Err(Error::IncompatibleSketch {
                    genome: name.clone(),
                    reference: reference.name.clone(),
                    field: field.to_string(),
                });
            }
        }

        Ok(Dataset {
            names,
            records,
            hash_counts: hash_counts.into_iter().collect(),
        })
    }

    /// Genome names in canonical (sorted) order
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn get(&self, name: &str) -> Option<&SketchRecord> {
        self.records.get(name)
    }

    /// Records in canonical order
    pub fn records(&self) -> impl Iterator<Item = &SketchRecord> + '_ {
        self.names.iter().map(move |name| &self.records[name])
    }

    pub fn hash_counts(&self) -> &HashCounts {
        &self.hash_counts
    }

    /// Sketch parameters shared by every genome
    pub fn parameters(&self) -> &SketchParameters {
        &self.records[&self.names[0]].parameters
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Number of hashes present in the sketch of every genome
    pub fn core_hashes(&self) -> usize {
        let n = self.names.len() as u32;
        self.hash_counts.values().filter(|&&count| count >= n).count()
    }
}
