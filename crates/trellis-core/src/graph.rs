//! File-level dependency graph backed by petgraph::StableDiGraph
//!
//! An edge `from -> to` means "`from` needs `to`'s declarations to resolve".
//! The graph is rebuilt from the resolver's edge list on every run and is
//! read-only once resolution starts.

use crate::error::GraphError;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::Direction;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};

/// A node in the graph: one source file, keyed by canonical path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNode {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// One level of an explicit depth-first traversal.
struct Frame {
    node: NodeIndex,
    dependencies: Vec<NodeIndex>,
    cursor: usize,
}

impl Frame {
    fn next_dependency(&mut self) -> Option<NodeIndex> {
        let next = self.dependencies.get(self.cursor).copied();
        self.cursor += 1;
        next
    }
}

pub struct DependencyGraph {
    inner: StableDiGraph<FileNode, ()>,
    index: HashMap<PathBuf, NodeIndex>,
}

impl std::fmt::Debug for DependencyGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyGraph")
            .field("node_count", &self.inner.node_count())
            .field("edge_count", &self.inner.edge_count())
            .finish()
    }
}

impl DependencyGraph {
    pub fn new() -> Self {
        DependencyGraph {
            inner: StableDiGraph::new(),
            index: HashMap::new(),
        }
    }

    /// Build a graph from a file list and `(dependent, dependency)` pairs.
    ///
    /// Edge endpoints missing from `files` are added as nodes first.
    pub fn from_edges<'a>(
        files: impl IntoIterator<Item = &'a PathBuf>,
        edges: impl IntoIterator<Item = &'a (PathBuf, PathBuf)>,
    ) -> Self {
        let mut graph = DependencyGraph::new();
        for file in files {
            graph.add_node(file);
        }
        for (from, to) in edges {
            graph.add_node(from);
            graph.add_node(to);
            // Both endpoints were just ensured.
            let _ = graph.add_edge(from, to);
        }
        graph
    }

    /// Ensure a node exists for `path`. Idempotent.
    pub fn add_node(&mut self, path: &Path) {
        if self.index.contains_key(path) {
            return;
        }
        let idx = self.inner.add_node(FileNode { path: path.to_path_buf() });
        self.index.insert(path.to_path_buf(), idx);
    }

    /// Record that `from` depends on `to`. Both must already exist; duplicates are ignored.
    pub fn add_edge(&mut self, from: &Path, to: &Path) -> Result<(), GraphError> {
        let source = self.node_index(from)?;
        let target = self.node_index(to)?;
        if self.inner.find_edge(source, target).is_none() {
            self.inner.add_edge(source, target, ());
        }
        Ok(())
    }

    fn node_index(&self, path: &Path) -> Result<NodeIndex, GraphError> {
        self.index
            .get(path)
            .copied()
            .ok_or_else(|| GraphError::UnknownNode(path.to_path_buf()))
    }

    fn path_of(&self, idx: NodeIndex) -> &Path {
        &self.inner[idx].path
    }

    /// Neighbors in one direction, sorted by path so traversals are deterministic.
    fn sorted_neighbors(&self, idx: NodeIndex, direction: Direction) -> Vec<NodeIndex> {
        let mut neighbors: Vec<NodeIndex> = self.inner.neighbors_directed(idx, direction).collect();
        neighbors.sort_by(|a, b| self.path_of(*a).cmp(self.path_of(*b)));
        neighbors
    }

    fn frame(&self, node: NodeIndex) -> Frame {
        Frame {
            node,
            dependencies: self.sorted_neighbors(node, Direction::Outgoing),
            cursor: 0,
        }
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.index.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.inner.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.node_count() == 0
    }

    pub fn edge_count(&self) -> usize {
        self.inner.edge_count()
    }

    /// All files, in insertion order.
    pub fn files(&self) -> impl Iterator<Item = &Path> {
        self.inner.node_indices().map(move |idx| self.path_of(idx))
    }

    /// Direct dependencies of `path` (outgoing edges).
    pub fn dependencies(&self, path: &Path) -> Vec<PathBuf> {
        self.neighbor_paths(path, Direction::Outgoing)
    }

    /// Files that directly depend on `path` (incoming edges).
    pub fn dependents(&self, path: &Path) -> Vec<PathBuf> {
        self.neighbor_paths(path, Direction::Incoming)
    }

    fn neighbor_paths(&self, path: &Path, direction: Direction) -> Vec<PathBuf> {
        match self.index.get(path) {
            Some(&idx) => self
                .sorted_neighbors(idx, direction)
                .into_iter()
                .map(|n| self.path_of(n).to_path_buf())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Report one cycle per back edge found by a single depth-first search.
    ///
    /// Each cycle is listed from its entry node and closed by repeating it,
    /// e.g. `[a, b, c, a]`. Nodes are expanded once, so a cycle that only
    /// closes through an already finished node is not listed; the result is
    /// non-empty exactly when the graph has a cycle, but it is not an
    /// enumeration of every elementary cycle.
    pub fn detect_cycles(&self) -> Vec<Vec<PathBuf>> {
        let mut cycles = Vec::new();
        let mut visited: HashSet<NodeIndex> = HashSet::new();

        for root in self.inner.node_indices() {
            if !visited.insert(root) {
                continue;
            }
            let mut on_stack: HashSet<NodeIndex> = HashSet::from([root]);
            let mut stack = vec![self.frame(root)];

            while let Some(frame) = stack.last_mut() {
                match frame.next_dependency() {
                    Some(dep) if on_stack.contains(&dep) => {
                        let start = stack.iter().position(|f| f.node == dep).unwrap_or(0);
                        let mut cycle: Vec<PathBuf> = stack[start..]
                            .iter()
                            .map(|f| self.path_of(f.node).to_path_buf())
                            .collect();
                        cycle.push(self.path_of(dep).to_path_buf());
                        cycles.push(cycle);
                    }
                    Some(dep) => {
                        if visited.insert(dep) {
                            on_stack.insert(dep);
                            stack.push(self.frame(dep));
                        }
                    }
                    None => {
                        let node = frame.node;
                        stack.pop();
                        on_stack.remove(&node);
                    }
                }
            }
        }

        cycles
    }

    /// All files that depend on `path`, directly or indirectly.
    pub fn transitive_dependents(&self, path: &Path) -> HashSet<PathBuf> {
        let mut result = HashSet::new();
        let Some(&start) = self.index.get(path) else {
            return result;
        };

        let mut seen: HashSet<NodeIndex> = HashSet::new();
        let mut queue: VecDeque<NodeIndex> = self
            .inner
            .neighbors_directed(start, Direction::Incoming)
            .collect();

        while let Some(current) = queue.pop_front() {
            if !seen.insert(current) {
                continue;
            }
            result.insert(self.path_of(current).to_path_buf());
            queue.extend(
                self.inner
                    .neighbors_directed(current, Direction::Incoming)
                    .filter(|n| !seen.contains(n)),
            );
        }

        result
    }

    /// Order files so that each one follows all of its dependencies.
    ///
    /// In strict mode a back edge fails the call, naming the node it closes on.
    /// Otherwise the back edge is ignored and the remaining order is still valid
    /// for every acyclic portion of the graph.
    pub fn topological_sort(&self, strict: bool) -> Result<Vec<PathBuf>, GraphError> {
        let mut color: HashMap<NodeIndex, Color> =
            self.inner.node_indices().map(|idx| (idx, Color::White)).collect();
        let mut order = Vec::with_capacity(self.inner.node_count());

        for root in self.inner.node_indices() {
            if color.get(&root) != Some(&Color::White) {
                continue;
            }
            color.insert(root, Color::Gray);
            let mut stack = vec![self.frame(root)];

            while let Some(frame) = stack.last_mut() {
                match frame.next_dependency() {
                    Some(dep) => match color.get(&dep).copied().unwrap_or(Color::White) {
                        Color::White => {
                            color.insert(dep, Color::Gray);
                            stack.push(self.frame(dep));
                        }
                        Color::Gray if strict => {
                            return Err(GraphError::Cycle { node: self.path_of(dep).to_path_buf() });
                        }
                        Color::Gray => {
                            tracing::debug!(
                                "Ignoring back edge {} -> {}",
                                self.path_of(frame.node).display(),
                                self.path_of(dep).display()
                            );
                        }
                        Color::Black => {}
                    },
                    None => {
                        let node = frame.node;
                        stack.pop();
                        color.insert(node, Color::Black);
                        order.push(self.path_of(node).to_path_buf());
                    }
                }
            }
        }

        Ok(order)
    }

    pub fn has_cycles(&self) -> bool {
        self.topological_sort(true).is_err()
    }

    /// Partition a resolution order into layers for concurrent resolution.
    ///
    /// A file lands one layer after the deepest of its dependencies that
    /// precede it in `order`. Back edges dropped by a tolerant sort point
    /// forward in `order` and are ignored here as well.
    pub fn layers(&self, order: &[PathBuf]) -> Vec<Vec<PathBuf>> {
        let position: HashMap<NodeIndex, usize> = order
            .iter()
            .enumerate()
            .filter_map(|(pos, path)| self.index.get(path).map(|&idx| (idx, pos)))
            .collect();
        let mut level: HashMap<NodeIndex, usize> = HashMap::new();
        let mut layers: Vec<Vec<PathBuf>> = Vec::new();

        for (pos, path) in order.iter().enumerate() {
            let Some(&idx) = self.index.get(path) else {
                continue;
            };
            let layer = self
                .inner
                .neighbors_directed(idx, Direction::Outgoing)
                .filter(|dep| position.get(dep).is_some_and(|p| *p < pos))
                .filter_map(|dep| level.get(&dep).map(|l| l + 1))
                .max()
                .unwrap_or(0);
            level.insert(idx, layer);
            if layers.len() <= layer {
                layers.resize_with(layer + 1, Vec::new);
            }
            layers[layer].push(path.clone());
        }

        layers
    }
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}
