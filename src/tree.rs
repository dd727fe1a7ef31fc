//! Phylogenetic tree stored as an arena of nodes.
//!
//! The tree exclusively owns its nodes; they refer to each other by [NodeIndex].
//! Each non-root node carries the length of the branch to its parent.
use std::fmt;
use std::ops::Index;

/// Index of a node in the tree arena
pub type NodeIndex = usize;

/// *During construction only*, index for unset root.
const NO_ROOT_SET_INDEX: NodeIndex = usize::MAX;

/// Characters that force a leaf name into quotes
const NEWICK_PUNCTUATION: &[char] = &['(', ')', '[', ']', '\'', ':', ';', ',', ' ', '\t', '\n'];

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    name: Option<String>,
    parent: Option<NodeIndex>,
    children: Vec<NodeIndex>,
    branch_length: Option<f64>,
}

impl Node {
    fn new(name: Option<String>) -> Self {
        Node {
            name,
            parent: None,
            children: Vec::new(),
            branch_length: None,
        }
    }

    /// Genome name; only leaves are named
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn parent(&self) -> Option<NodeIndex> {
        self.parent
    }

    pub fn children(&self) -> &[NodeIndex] {
        &self.children
    }

    /// Length of the branch to the parent; `None` for the root
    pub fn branch_length(&self) -> Option<f64> {
        self.branch_length
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tree {
    nodes: Vec<Node>,
    root: NodeIndex,
}

impl Default for Tree {
    fn default() -> Self {
        Tree::new()
    }
}

impl Tree {
    pub fn new() -> Self {
        Tree {
            nodes: Vec::new(),
            root: NO_ROOT_SET_INDEX,
        }
    }

    pub fn with_capacity(num_leaves: usize) -> Self {
        Tree {
            nodes: Vec::with_capacity(2 * num_leaves),
            root: NO_ROOT_SET_INDEX,
        }
    }

    /// Adds an unattached leaf. The first node added becomes the root until another is set.
    pub fn add_leaf(&mut self, name: &str) -> NodeIndex {
        self.push(Node::new(Some(name.to_string())))
    }

    /// Adds an internal node above `children`, each with the length of its branch to the new node.
    pub fn add_internal(&mut self, children: &[(NodeIndex, f64)]) -> NodeIndex {
        let index = self.push(Node::new(None));
        for &(child, length) in children {
            self.attach(index, child, length);
        }
        self.root = index;

        index
    }

    /// Hangs `child` below `parent` with the given branch length.
    pub fn attach(&mut self, parent: NodeIndex, child: NodeIndex, length: f64) {
        self.nodes[child].parent = Some(parent);
        self.nodes[child].branch_length = Some(length);
        self.nodes[parent].children.push(child);
    }

    pub fn set_root(&mut self, index: NodeIndex) {
        self.nodes[index].parent = None;
        self.nodes[index].branch_length = None;
        self.root = index;
    }

    fn push(&mut self, node: Node) -> NodeIndex {
        let index = self.nodes.len();
        self.nodes.push(node);
        if self.root == NO_ROOT_SET_INDEX {
            self.root = index;
        }

        index
    }

    pub fn root(&self) -> NodeIndex {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes in arena order
    pub fn nodes(&self) -> impl Iterator<Item = (NodeIndex, &Node)> + '_ {
        self.nodes.iter().enumerate()
    }

    /// Node indices reachable from the root, parents before children
    pub fn preorder(&self) -> Vec<NodeIndex> {
        let mut order = Vec::with_capacity(self.nodes.len());
        if self.nodes.is_empty() {
            return order;
        }

        let mut stack = vec![self.root];
        while let Some(index) = stack.pop() {
            order.push(index);
            stack.extend(self.nodes[index].children.iter().rev());
        }

        order
    }

    /// Leaf names in preorder
    pub fn leaf_names(&self) -> Vec<&str> {
        self.preorder()
            .into_iter()
            .filter_map(|i| self.nodes[i].name())
            .collect()
    }

    pub fn find(&self, name: &str) -> Option<NodeIndex> {
        self.nodes.iter().position(|node| node.name() == Some(name))
    }

    pub fn total_branch_length(&self) -> f64 {
        self.preorder()
            .into_iter()
            .filter_map(|i| self.nodes[i].branch_length)
            .sum()
    }

    /// Sum of branch lengths on the path between two named nodes
    pub fn path_length(&self, first: &str, second: &str) -> Option<f64> {
        let first = self.find(first)?;
        let second = self.find(second)?;

        let ancestors = |mut index: NodeIndex| {
            let mut path = vec![(index, 0.0)];
            let mut length = 0.0;
            while let Some(parent) = self.nodes[index].parent {
                length += self.nodes[index].branch_length.unwrap_or(0.0);
                path.push((parent, length));
                index = parent;
            }
            path
        };
        let up_first = ancestors(first);
        let up_second = ancestors(second);

        up_first.iter().find_map(|&(node, length)| {
            up_second
                .iter()
                .find(|&&(other, _)| other == node)
                .map(|&(_, other_length)| length + other_length)
        })
    }

    /// Reroots at the midpoint of the longest branch, in place.
    ///
    /// A degree-two root is dissolved first so the tree is treated as unrooted.
    /// The branch whose lower node comes first in arena order wins ties. Afterwards
    /// every branch leaving the root is at least `min_root_branch_length`.
    pub fn midpoint_reroot(&mut self, min_root_branch_length: f64) {
        if self.nodes.len() < 2 {
            return;
        }
        self.dissolve_binary_root();

        let Some(target) = self.longest_branch() else {
            return;
        };
        let Some(parent) = self.nodes[target].parent else {
            return;
        };
        let half = self.nodes[target].branch_length.unwrap_or(0.0) / 2.0;

        self.detach(parent, target);
        let new_root = self.push(Node::new(None));

        // flip every branch between the old parent and the old root
        let mut previous = new_root;
        let mut current = parent;
        let mut incoming = half;
        loop {
            let next = self.nodes[current].parent;
            let outgoing = self.nodes[current].branch_length.unwrap_or(0.0);
            if let Some(next) = next {
                self.detach(next, current);
            }
            self.attach(previous, current, incoming);

            match next {
                Some(next) => {
                    previous = current;
                    current = next;
                    incoming = outgoing;
                }
                None => break,
            }
        }
        self.attach(new_root, target, half);
        self.set_root(new_root);
        self.dissolve_unary(current);

        for child in self.nodes[new_root].children.clone() {
            let length = self.nodes[child].branch_length.unwrap_or(0.0);
            if !(length >= min_root_branch_length) {
                self.nodes[child].branch_length = Some(min_root_branch_length);
            }
        }

        self.compact();
    }

    /// Non-root node with the longest branch to its parent, first in arena order on ties
    fn longest_branch(&self) -> Option<NodeIndex> {
        let mut best: Option<(NodeIndex, f64)> = None;
        for (index, node) in self.nodes.iter().enumerate() {
            if index == self.root || node.parent.is_none() {
                continue;
            }
            let length = node.branch_length.unwrap_or(0.0);
            if best.map_or(true, |(_, longest)| length > longest) {
                best = Some((index, length));
            }
        }

        best.map(|(index, _)| index)
    }

    fn detach(&mut self, parent: NodeIndex, child: NodeIndex) {
        self.nodes[parent].children.retain(|&c| c != child);
        self.nodes[child].parent = None;
    }

    /// Merges the two root branches into one, so the first child becomes the root.
    fn dissolve_binary_root(&mut self) {
        let root = self.root;
        if self.nodes[root].name.is_some() || self.nodes[root].children.len() != 2 {
            return;
        }

        let (first, second) = (self.nodes[root].children[0], self.nodes[root].children[1]);
        let length = self.nodes[first].branch_length.unwrap_or(0.0)
            + self.nodes[second].branch_length.unwrap_or(0.0);
        self.nodes[root].children.clear();
        self.set_root(first);
        self.attach(first, second, length);
    }

    /// Removes an unnamed node left with one parent and one child, joining its two branches.
    fn dissolve_unary(&mut self, index: NodeIndex) {
        let node = &self.nodes[index];
        let (Some(parent), [child]) = (node.parent, node.children.as_slice()) else {
            return;
        };
        if node.name.is_some() {
            return;
        }
        let child = *child;
        let length =
            node.branch_length.unwrap_or(0.0) + self.nodes[child].branch_length.unwrap_or(0.0);

        self.detach(parent, index);
        self.detach(index, child);
        self.attach(parent, child, length);
    }

    /// Drops unreachable nodes and renumbers the arena in preorder.
    fn compact(&mut self) {
        let order = self.preorder();
        let mut new_index = vec![NO_ROOT_SET_INDEX; self.nodes.len()];
        for (position, &old) in order.iter().enumerate() {
            new_index[old] = position;
        }

        let nodes = order
            .iter()
            .map(|&old| {
                let node = &self.nodes[old];
                Node {
                    name: node.name.clone(),
                    parent: node.parent.map(|p| new_index[p]),
                    children: node.children.iter().map(|&c| new_index[c]).collect(),
                    branch_length: node.branch_length,
                }
            })
            .collect();

        self.nodes = nodes;
        self.root = 0;
    }

    /// Newick string with branch lengths, terminated by `;`
    pub fn to_newick(&self) -> String {
        fn build(tree: &Tree, index: NodeIndex, newick: &mut String) {
            let node = &tree.nodes[index];
            if !node.children.is_empty() {
                newick.push('(');
                for (i, &child) in node.children.iter().enumerate() {
                    if i > 0 {
                        newick.push(',');
                    }
                    build(tree, child, newick);
                }
                newick.push(')');
            }
            if let Some(name) = &node.name {
                newick.push_str(&escape_label(name));
            }
            if let (Some(length), Some(_)) = (node.branch_length, node.parent) {
                newick.push(':');
                newick.push_str(&length.to_string());
            }
        }

        let mut newick = String::new();
        if !self.nodes.is_empty() {
            build(self, self.root, &mut newick);
        }
        newick.push(';');

        newick
    }
}

impl Index<NodeIndex> for Tree {
    type Output = Node;

    fn index(&self, index: NodeIndex) -> &Self::Output {
        &self.nodes[index]
    }
}

impl fmt::Display for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_newick())
    }
}

/// Quotes a label when it holds Newick punctuation, doubling inner quotes
fn escape_label(label: &str) -> String {
    if label.contains(NEWICK_PUNCTUATION) {
        format!("'{}'", label.replace('\'', "''"))
    } else {
        label.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: f64, expected: f64) {
        assert!((actual - expected).abs() < 1e-12, "{} != {}", actual, expected);
    }

    fn root_children(tree: &Tree) -> Vec<(Option<&str>, f64)> {
        tree[tree.root()]
            .children()
            .iter()
            .map(|&c| (tree[c].name(), tree[c].branch_length().unwrap()))
            .collect()
    }

    #[test]
    fn two_leaves_split_evenly() {
        let mut tree = Tree::new();
        let a = tree.add_leaf("GenomeA");
        let b = tree.add_leaf("GenomeB");
        tree.add_internal(&[(a, 0.025), (b, 0.025)]);

        tree.midpoint_reroot(0.01);

        assert_eq!(
            root_children(&tree),
            vec![(Some("GenomeA"), 0.025), (Some("GenomeB"), 0.025)]
        );
        assert_eq!(tree.len(), 3);
        insta::assert_snapshot!(tree.to_newick(), @"(GenomeA:0.025,GenomeB:0.025);");
    }

    #[test]
    fn star_reroots_on_longest_branch() {
        let mut tree = Tree::new();
        let a = tree.add_leaf("A");
        let b = tree.add_leaf("B");
        let c = tree.add_leaf("C");
        tree.add_internal(&[(a, 0.125), (b, 0.125), (c, 0.875)]);

        tree.midpoint_reroot(0.01);

        insta::assert_snapshot!(tree.to_newick(), @"((A:0.125,B:0.125):0.4375,C:0.4375);");
        assert_close(tree.path_length("A", "C").unwrap(), 1.0);
    }

    #[test]
    fn ties_go_to_first_node_in_arena_order() {
        let mut tree = Tree::new();
        let a = tree.add_leaf("A");
        let b = tree.add_leaf("B");
        let c = tree.add_leaf("C");
        tree.add_internal(&[(a, 0.5), (b, 0.5), (c, 0.25)]);

        tree.midpoint_reroot(0.01);

        assert_eq!(tree.to_newick(), "((B:0.5,C:0.25):0.25,A:0.25);");
    }

    #[test]
    fn flips_the_path_to_the_old_root() {
        let mut tree = Tree::new();
        let a = tree.add_leaf("A");
        let b = tree.add_leaf("B");
        let c = tree.add_leaf("C");
        let d = tree.add_leaf("D");
        let x = tree.add_internal(&[(a, 1.0), (b, 5.0)]);
        tree.add_internal(&[(x, 1.0), (c, 1.0), (d, 2.0)]);
        let before = tree.path_length("B", "D").unwrap();

        tree.midpoint_reroot(0.01);

        assert_eq!(tree.to_newick(), "((A:1,(C:1,D:2):1):2.5,B:2.5);");
        assert_eq!(tree.root(), 0);
        assert_close(tree.path_length("B", "D").unwrap(), before);
        assert_close(tree.path_length("A", "B").unwrap(), 6.0);
        for (index, node) in tree.nodes() {
            for &child in node.children() {
                assert_eq!(tree[child].parent(), Some(index));
            }
        }
    }

    #[test]
    fn short_root_branches_are_floored() {
        let mut tree = Tree::new();
        let a = tree.add_leaf("A");
        let b = tree.add_leaf("B");
        tree.add_internal(&[(a, 0.0), (b, 0.002)]);

        tree.midpoint_reroot(0.01);

        assert_eq!(root_children(&tree), vec![(Some("A"), 0.01), (Some("B"), 0.01)]);
    }

    #[test]
    fn single_leaf_is_left_alone() {
        let mut tree = Tree::new();
        tree.add_leaf("A");
        tree.midpoint_reroot(0.01);

        assert_eq!(tree.to_newick(), "A;");
        assert_eq!(tree.leaf_names(), vec!["A"]);
    }

    #[test]
    fn quotes_labels_with_punctuation() {
        let mut tree = Tree::new();
        let a = tree.add_leaf("E. coli K-12");
        let b = tree.add_leaf("it's");
        tree.add_internal(&[(a, 1.0), (b, 2.0)]);

        assert_eq!(tree.to_newick(), "('E. coli K-12':1,'it''s':2);");
        assert_eq!(tree.total_branch_length(), 3.0);
    }
}
