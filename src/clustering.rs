use crate::config::Method;
use crate::distance::DistanceMatrix;
use crate::error::{Error, Result};
use crate::tree::{NodeIndex, Tree};
use fxhash::FxHashSet;
use itertools::Itertools;
use kodama::{linkage, Method as Linkage};
use log::info;
use ndarray::Array2;

/// Q-criterion values closer than this are treated as ties
const TIE_EPSILON: f64 = 1e-12;

/// Builds a tree over `names` from the pairwise distances in `matrix`.
///
/// # Arguments
/// * `matrix` - Distances covering at least every genome in `names`
/// * `names` - Leaves of the tree; their sorted order decides ties
/// * `method` - Neighbor joining (unrooted, trifurcating centre) or average linkage (rooted)
///
/// # Returns
/// * A tree whose leaf set is exactly `names`, all branch lengths non-negative
pub fn build_tree(matrix: &DistanceMatrix, names: &[String], method: Method) -> Result<Tree> {
    let distances = leaf_distances(matrix, names)?;

    let tree = match method {
        Method::Nj => neighbor_joining(distances.as_array().clone(), names),
        Method::Upgma => average_linkage(&distances, names),
    };
    info!("Built {:?} tree over {} genomes", method, names.len());

    Ok(tree)
}

/// Distances between `names` alone, in the order given
fn leaf_distances(matrix: &DistanceMatrix, names: &[String]) -> Result<DistanceMatrix> {
    if names.len() < 2 {
        return Err(Error::InsufficientTaxa { count: names.len() });
    }

    let mut seen = FxHashSet::default();
    let mut rows = Vec::with_capacity(names.len());
    for name in names {
        if !seen.insert(name.as_str()) {
            return Err(Error::DuplicateTaxon { name: name.clone() });
        }
        let row = matrix.index_of(name).ok_or_else(|| Error::DistanceComputationFailed {
            first: name.clone(),
            second: "any genome".to_string(),
            reason: "the genome is missing from the distance matrix".to_string(),
        })?;
        rows.push(row);
    }

    let values = matrix.as_array();
    let mut leaves = DistanceMatrix::new(names.to_vec());
    for (i, j) in (0..names.len()).tuple_combinations() {
        leaves.set(i, j, values[[rows[i], rows[j]]]);
    }

    Ok(leaves)
}

/// Neighbor joining.
///
/// Every cluster is identified by its smallest leaf name. Among pairs with the
/// same Q value, the pair whose identifiers come first lexicographically is joined.
/// The last two clusters are linked by a single branch.
fn neighbor_joining(mut d: Array2<f64>, names: &[String]) -> Tree {
    let n = names.len();
    let mut tree = Tree::with_capacity(n);
    let mut nodes: Vec<NodeIndex> = names.iter().map(|name| tree.add_leaf(name)).collect();

    // a merged cluster keeps the slot of its first member, whose name is the smaller
    // one, so `active` stays sorted by cluster identifier
    let mut active: Vec<usize> = (0..n).collect();
    active.sort_by(|&a, &b| names[a].cmp(&names[b]));

    while active.len() > 2 {
        let r = active.len();
        let sums: Vec<f64> = active
            .iter()
            .map(|&a| active.iter().map(|&b| d[[a, b]]).sum())
            .collect();

        let (mut best_i, mut best_j, mut best_q) = (0, 1, f64::INFINITY);
        for (i, j) in (0..r).tuple_combinations() {
            let q = (r - 2) as f64 * d[[active[i], active[j]]] - sums[i] - sums[j];
            if q < best_q - TIE_EPSILON {
                best_i = i;
                best_j = j;
                best_q = q;
            }
        }

        let (a, b) = (active[best_i], active[best_j]);
        let d_ab = d[[a, b]];
        let length_a = d_ab / 2.0 + (sums[best_i] - sums[best_j]) / (2.0 * (r - 2) as f64);
        let length_b = d_ab - length_a;
        let joined =
            tree.add_internal(&[(nodes[a], length_a.max(0.0)), (nodes[b], length_b.max(0.0))]);

        for &k in &active {
            if k != a && k != b {
                let d_uk = (d[[a, k]] + d[[b, k]] - d_ab) / 2.0;
                d[[a, k]] = d_uk;
                d[[k, a]] = d_uk;
            }
        }
        nodes[a] = joined;
        active.remove(best_j);
    }

    let (a, b) = (active[0], active[1]);
    let length = d[[a, b]].max(0.0);
    let (x, y) = (nodes[a], nodes[b]);
    if !tree[x].is_leaf() {
        tree.attach(x, y, length);
        tree.set_root(x);
    } else if !tree[y].is_leaf() {
        tree.attach(y, x, length);
        tree.set_root(y);
    } else {
        tree.add_internal(&[(x, length / 2.0), (y, length / 2.0)]);
    }

    tree
}

/// Average linkage (UPGMA); a merge at dissimilarity `h` sits at height `h / 2`.
fn average_linkage(distances: &DistanceMatrix, names: &[String]) -> Tree {
    let n = names.len();
    let mut condensed = distances.condensed();
    let dendrogram = linkage(&mut condensed, n, Linkage::Average);

    let mut tree = Tree::with_capacity(n);
    let mut nodes: Vec<NodeIndex> = names.iter().map(|name| tree.add_leaf(name)).collect();
    let mut heights = vec![0.0; n];

    // kodama labels the cluster made at step s as n + s
    for step in dendrogram.steps() {
        let height = (step.dissimilarity / 2.0).max(0.0);
        let children =
            [step.cluster1, step.cluster2].map(|c| (nodes[c], (height - heights[c]).max(0.0)));
        nodes.push(tree.add_internal(&children));
        heights.push(height);
    }

    tree
}
