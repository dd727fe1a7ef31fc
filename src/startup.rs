use crate::clustering::build_tree;
use crate::config::{Config, DistanceMode, Method};
use crate::dataset::Dataset;
use crate::distance::{self, DistanceMatrix};
use crate::error::{Error, Result};
use crate::mash::MashTool;
use crate::sketch::SketchTool;
use crate::tree::Tree;
use log::info;
use std::{
    cell::OnceCell,
    fmt,
    path::{Path, PathBuf},
};

/// Sketch sources turned into a rooted tree: merged dataset, cached distance matrix
/// and cached, midpoint-rooted tree.
///
/// Distances and the tree are computed on first request and kept for the lifetime
/// of the object; build a new one to start over.
pub struct SketchTree<T: SketchTool = MashTool> {
    tool: T,
    config: Config,
    sources: Vec<PathBuf>,
    dataset: Dataset,
    distances: OnceCell<DistanceMatrix>,
    tree: OnceCell<Tree>,
}

impl<T: SketchTool> SketchTree<T> {
    /// Merges the sketch files at `paths`, in order, into one dataset.
    pub fn from_sources<P: AsRef<Path>>(tool: T, paths: &[P], config: Config) -> Result<Self> {
        config.validate()?;
        let dataset = Dataset::merge(&tool, paths)?;

        Ok(SketchTree {
            tool,
            config,
            sources: paths.iter().map(|p| p.as_ref().to_path_buf()).collect(),
            dataset,
            distances: OnceCell::new(),
            tree: OnceCell::new(),
        })
    }

    /// Wraps a dataset built in memory; distances can only come from its sketches.
    pub fn from_dataset(tool: T, dataset: Dataset, config: Config) -> Result<Self> {
        config.validate()?;
        if config.distance_mode == Some(DistanceMode::Delegated) {
            return Err(Error::InvalidConstructorArgument {
                reason: "delegated distances need sketch source files".to_string(),
            });
        }

        Ok(SketchTree {
            tool,
            config,
            sources: Vec::new(),
            dataset,
            distances: OnceCell::new(),
            tree: OnceCell::new(),
        })
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    fn distance_mode(&self) -> DistanceMode {
        self.config.distance_mode.unwrap_or(if self.sources.is_empty() {
            DistanceMode::Sketch
        } else {
            DistanceMode::Delegated
        })
    }

    /// Pairwise distances between every genome of the dataset, computed once.
    ///
    /// A failed computation caches nothing, so a later call starts from scratch.
    pub fn distances(&self) -> Result<&DistanceMatrix> {
        if let Some(matrix) = self.distances.get() {
            return Ok(matrix);
        }

        let matrix = match self.distance_mode() {
            DistanceMode::Delegated => {
                distance::delegated(&self.tool, &self.dataset, &self.sources, &self.config)?
            }
            DistanceMode::Sketch => distance::from_sketches(&self.dataset),
        };

        Ok(self.distances.get_or_init(|| matrix))
    }

    /// Tree over the dataset's genomes, rerooted at the midpoint of its longest branch.
    pub fn tree(&self) -> Result<&Tree> {
        if let Some(tree) = self.tree.get() {
            return Ok(tree);
        }

        let mut tree = build_tree(self.distances()?, self.dataset.names(), self.config.method)?;
        tree.midpoint_reroot(self.config.min_root_branch_length);
        info!("Rerooted tree with {} nodes", tree.len());

        Ok(self.tree.get_or_init(|| tree))
    }

    /// Text report of the dataset and of whatever has been computed so far.
    ///
    /// Never triggers a computation.
    pub fn describe(&self) -> String {
        let parameters = self.dataset.parameters();
        let mut lines = vec![
            format!(
                "{} genomes, k = {}, sketch size {}, {}",
                self.dataset.len(),
                parameters.kmer_size,
                parameters.sketch_size,
                parameters.hash_type
            ),
            match self.distance_mode() {
                DistanceMode::Delegated => format!(
                    "Distances: reported by the sketching tool for {} sources",
                    self.sources.len()
                ),
                DistanceMode::Sketch => "Distances: estimated from the sketches".to_string(),
            },
            match self.config.method {
                Method::Nj => "Tree method: neighbor joining".to_string(),
                Method::Upgma => "Tree method: UPGMA".to_string(),
            },
            format!("Genomes: {}", self.dataset.names().join(", ")),
        ];

        match self.distances.get() {
            Some(matrix) => {
                lines.push("Distance matrix:".to_string());
                lines.extend(matrix.to_tsv().lines().map(str::to_string));
            }
            None => lines.push("Distance matrix: not computed".to_string()),
        }
        match self.tree.get() {
            Some(tree) => lines.push(format!("Tree: {}", tree)),
            None => lines.push("Tree: not built".to_string()),
        }

        lines.join("\n")
    }
}

impl<T: SketchTool> fmt::Display for SketchTree<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sketch::SketchRecord;
    use crate::test_support::{info, params, FakeTool};

    fn assert_close(actual: f64, expected: f64) {
        assert!((actual - expected).abs() < 1e-9, "{} != {}", actual, expected);
    }

    fn two_genomes() -> FakeTool {
        FakeTool::new()
            .with_source("a.msh", info(params(21), &[("GenomeA", &[1, 2, 3])]))
            .with_source("b.msh", info(params(21), &[("GenomeB", &[2, 3, 4])]))
            .with_distance("GenomeA", "GenomeB", 0.05)
    }

    fn two_genome_tree(config: Config) -> SketchTree<FakeTool> {
        SketchTree::from_sources(two_genomes(), &["a.msh", "b.msh"], config).unwrap()
    }

    #[test]
    fn two_genomes_end_to_end() {
        let sketch_tree = two_genome_tree(Config::default());
        assert_eq!(sketch_tree.dataset().names(), &["GenomeA", "GenomeB"]);

        let distances = sketch_tree.distances().unwrap();
        assert_eq!(distances.get("GenomeA", "GenomeB"), Some(0.05));
        assert_eq!(distances.get("GenomeB", "GenomeA"), Some(0.05));
        assert_eq!(distances.get("GenomeA", "GenomeA"), Some(0.0));

        let tree = sketch_tree.tree().unwrap();
        insta::assert_snapshot!(tree.to_newick(), @"(GenomeA:0.025,GenomeB:0.025);");
        assert_eq!(sketch_tree.tool.distance_calls(), 1);
    }

    #[test]
    fn three_genomes_root_on_the_branch_to_the_outlier() {
        let tool = FakeTool::new()
            .with_source("abc.msh", info(params(21), &[("A", &[1]), ("B", &[2]), ("C", &[3])]))
            .with_distance("A", "B", 0.1)
            .with_distance("A", "C", 0.4)
            .with_distance("B", "C", 0.4);
        let sketch_tree = SketchTree::from_sources(tool, &["abc.msh"], Config::default()).unwrap();

        let tree = sketch_tree.tree().unwrap();
        let root = &tree[tree.root()];
        assert_eq!(root.children().len(), 2);

        let c = tree.find("C").unwrap();
        assert_eq!(tree[c].parent(), Some(tree.root()));
        assert_close(tree[c].branch_length().unwrap(), 0.175);

        let cherry = root.children().iter().copied().find(|&child| child != c).unwrap();
        assert_close(tree[cherry].branch_length().unwrap(), 0.175);
        assert_eq!(tree[tree.find("A").unwrap()].parent(), Some(cherry));
        assert_eq!(tree[tree.find("B").unwrap()].parent(), Some(cherry));
        assert_close(tree.path_length("A", "B").unwrap(), 0.1);
    }

    #[test]
    fn distances_and_tree_are_computed_once() {
        let sketch_tree = two_genome_tree(Config::default());

        let first = sketch_tree.distances().unwrap();
        let second = sketch_tree.distances().unwrap();
        assert!(std::ptr::eq(first, second));
        assert_eq!(sketch_tree.tool.distance_calls(), 1);

        let first = sketch_tree.tree().unwrap();
        let second = sketch_tree.tree().unwrap();
        assert!(std::ptr::eq(first, second));
        assert_eq!(sketch_tree.tool.distance_calls(), 1);
    }

    #[test]
    fn failed_distances_are_not_cached() {
        let tool = two_genomes().broken();
        let sketch_tree =
            SketchTree::from_sources(tool, &["a.msh", "b.msh"], Config::default()).unwrap();

        assert!(matches!(
            sketch_tree.distances(),
            Err(Error::DistanceComputationFailed { .. })
        ));
        assert!(sketch_tree.tree().is_err());
        assert_eq!(sketch_tree.tool.distance_calls(), 2);
    }

    #[test]
    fn incompatible_sources_give_no_object() {
        let tool = FakeTool::new()
            .with_source("a.msh", info(params(21), &[("GenomeA", &[1])]))
            .with_source("b.msh", info(params(15), &[("GenomeB", &[1])]));

        let err = SketchTree::from_sources(tool, &["a.msh", "b.msh"], Config::default()).err();
        assert!(matches!(err, Some(Error::IncompatibleSketch { .. })));
    }

    #[test]
    fn root_branches_respect_the_floor() {
        let config = Config {
            min_root_branch_length: 0.1,
            ..Config::default()
        };
        let sketch_tree = two_genome_tree(config);

        let newick = sketch_tree.tree().unwrap().to_newick();
        insta::assert_snapshot!(newick, @"(GenomeA:0.1,GenomeB:0.1);");
    }

    #[test]
    fn in_memory_dataset_uses_sketch_distances() {
        let records = vec![
            ("X".to_string(), SketchRecord::new("X", params(21), vec![1, 2, 3])),
            ("Y".to_string(), SketchRecord::new("Y", params(21), vec![1, 2, 3])),
        ];
        let names = vec!["Y".to_string(), "X".to_string()];
        let dataset = Dataset::from_parts(records, names, vec![(1, 2), (2, 2), (3, 2)]).unwrap();
        let sketch_tree =
            SketchTree::from_dataset(FakeTool::new(), dataset, Config::default()).unwrap();

        assert_eq!(sketch_tree.distances().unwrap().get("X", "Y"), Some(0.0));
        assert_eq!(sketch_tree.tool.distance_calls(), 0);

        // identical sketches: both root branches are raised to the floor
        insta::assert_snapshot!(sketch_tree.tree().unwrap().to_newick(), @"(X:0.01,Y:0.01);");
    }

    #[test]
    fn in_memory_dataset_rejects_delegated_mode() {
        let records = vec![("X".to_string(), SketchRecord::new("X", params(21), vec![1]))];
        let dataset = Dataset::from_parts(records, vec!["X".to_string()], vec![(1, 1)]).unwrap();
        let config = Config {
            distance_mode: Some(DistanceMode::Delegated),
            ..Config::default()
        };

        assert!(matches!(
            SketchTree::from_dataset(FakeTool::new(), dataset, config),
            Err(Error::InvalidConstructorArgument { .. })
        ));
    }

    #[test]
    fn single_genome_has_no_tree() {
        let tool = FakeTool::new().with_source("a.msh", info(params(21), &[("GenomeA", &[1])]));
        let sketch_tree = SketchTree::from_sources(tool, &["a.msh"], Config::default()).unwrap();

        assert_eq!(sketch_tree.distances().unwrap().get("GenomeA", "GenomeA"), Some(0.0));
        assert_eq!(sketch_tree.tree().unwrap_err(), Error::InsufficientTaxa { count: 1 });
    }

    #[test]
    fn describe_reports_without_computing() {
        let sketch_tree = two_genome_tree(Config::default());

        insta::assert_snapshot!(sketch_tree.describe(), @r###"
        2 genomes, k = 21, sketch size 1000, MurmurHash3_x64_128
        Distances: reported by the sketching tool for 2 sources
        Tree method: neighbor joining
        Genomes: GenomeA, GenomeB
        Distance matrix: not computed
        Tree: not built
        "###);
        assert_eq!(sketch_tree.tool.distance_calls(), 0);

        sketch_tree.tree().unwrap();
        let report = sketch_tree.to_string();
        assert!(report.contains(
            "Distance matrix:\n.\tGenomeA\tGenomeB\nGenomeA\t0\t0.05\nGenomeB\t0.05\t0\n"
        ));
        assert!(report.ends_with("Tree: (GenomeA:0.025,GenomeB:0.025);"));
    }
}
