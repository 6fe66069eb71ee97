//! Duplicate graph: pooled documents as nodes, duplicate decisions as edges.

use crate::document::{Doi, DocumentId};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, warn};

/// Undirected graph over one pool, built for a single deduplication call
#[derive(Debug, Clone)]
pub struct DuplicateGraph {
    nodes: Vec<DocumentId>,
    index: HashMap<DocumentId, usize>,
    adjacency: Vec<Vec<usize>>,
    /// Edges in insertion order
    edges: Vec<(usize, usize)>,
}

impl DuplicateGraph {
    /// One node per id, in pool order
    #[must_use]
    pub fn new(ids: impl IntoIterator<Item = DocumentId>) -> Self {
        let nodes: Vec<DocumentId> = ids.into_iter().collect();
        let index = nodes.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        let adjacency = vec![Vec::new(); nodes.len()];

        Self {
            nodes,
            index,
            adjacency,
            edges: Vec::new(),
        }
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    #[must_use]
    pub fn position(&self, id: &DocumentId) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Link two documents. Unknown ids and self-loops are ignored.
    pub fn add_edge(&mut self, a: DocumentId, b: DocumentId) -> bool {
        let (Some(i), Some(j)) = (self.position(&a), self.position(&b)) else {
            warn!("Ignoring duplicate pair with unknown record {} / {}", a, b);
            return false;
        };
        if i == j {
            return false;
        }

        self.adjacency[i].push(j);
        self.adjacency[j].push(i);
        self.edges.push((i, j));
        true
    }

    /// Connected components as node positions.
    ///
    /// Components are ordered by their earliest member and list members in
    /// pool order, so the result partitions every node index.
    #[must_use]
    pub fn connected_components(&self) -> Vec<Vec<usize>> {
        let mut seen = vec![false; self.nodes.len()];
        let mut components = Vec::new();

        for start in 0..self.nodes.len() {
            if seen[start] {
                continue;
            }
            seen[start] = true;

            let mut members = vec![start];
            let mut queue = VecDeque::from([start]);
            while let Some(node) = queue.pop_front() {
                for &next in &self.adjacency[node] {
                    if !seen[next] {
                        seen[next] = true;
                        members.push(next);
                        queue.push_back(next);
                    }
                }
            }

            members.sort_unstable();
            components.push(members);
        }

        components
    }

    /// Components that never hold two different DOIs.
    ///
    /// Edges are merged in insertion order; an edge whose two clusters carry
    /// different non-empty DOIs is skipped. `dois` is indexed by node position.
    #[must_use]
    pub fn doi_guarded_components(&self, dois: &[Option<Doi>]) -> Vec<Vec<usize>> {
        let mut sets = DisjointSets::new(self.nodes.len(), dois);
        let mut refused = 0usize;

        for &(a, b) in &self.edges {
            if !sets.union(a, b) {
                refused += 1;
            }
        }
        if refused > 0 {
            debug!("Refused {} duplicate links joining different DOIs", refused);
        }

        let mut by_root: HashMap<usize, usize> = HashMap::new();
        let mut components: Vec<Vec<usize>> = Vec::new();
        for node in 0..self.nodes.len() {
            let root = sets.find(node);
            let slot = *by_root.entry(root).or_insert_with(|| {
                components.push(Vec::new());
                components.len() - 1
            });
            components[slot].push(node);
        }

        components
    }
}

/// Union-find whose roots remember the DOI of their cluster
struct DisjointSets<'a> {
    parent: Vec<usize>,
    rank: Vec<u8>,
    doi: Vec<Option<&'a Doi>>,
}

impl<'a> DisjointSets<'a> {
    fn new(len: usize, dois: &'a [Option<Doi>]) -> Self {
        Self {
            parent: (0..len).collect(),
            rank: vec![0; len],
            doi: (0..len).map(|i| dois.get(i).and_then(Option::as_ref)).collect(),
        }
    }

    fn find(&mut self, node: usize) -> usize {
        let mut root = node;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut cursor = node;
        while self.parent[cursor] != root {
            let next = self.parent[cursor];
            self.parent[cursor] = root;
            cursor = next;
        }
        root
    }

    /// Join the clusters of `a` and `b` unless their DOIs conflict
    fn union(&mut self, a: usize, b: usize) -> bool {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return true;
        }

        let merged = match (self.doi[ra], self.doi[rb]) {
            (Some(x), Some(y)) if x != y => return false,
            (x, y) => x.or(y),
        };

        let (root, child) = if self.rank[ra] >= self.rank[rb] { (ra, rb) } else { (rb, ra) };
        if self.rank[root] == self.rank[child] {
            self.rank[root] = self.rank[root].saturating_add(1);
        }
        self.parent[child] = root;
        self.doi[root] = merged;
        true
    }
}
