//! # sketchtree
//!
//! `sketchtree` turns genome sketches produced by [Mash](https://github.com/marbl/Mash)
//! into a phylogenetic tree.
//!
//! Sketch files are merged into one [Dataset](dataset::Dataset) (all genomes must share
//! their sketch parameters), pairwise distances are either delegated to `mash dist` or
//! estimated from the hash sets, and the matrix is clustered by neighbor joining or
//! UPGMA. The tree is finally rerooted at the midpoint of its longest branch.
//!
//! [SketchTree](startup::SketchTree) ties the stages together and caches every result.

pub mod clustering;
pub mod config;
pub mod dataset;
pub mod distance;
pub mod error;
pub mod mash;
pub mod sketch;
pub mod startup;
pub mod store;
pub mod tree;

#[cfg(test)]
mod test_support;

pub use config::Config;
pub use error::{Error, Result};
pub use startup::SketchTree;
