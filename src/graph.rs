use hashbrown::HashMap;

use crate::errors::{Result, TcrfrError};

/// Sparse undirected connectivity between vertices.
///
/// Each connected pair carries a transition type `1..=T` that selects the
/// transition matrix used on that edge. Absent pairs are unconnected.
#[derive(Clone, Debug, Default)]
pub struct Connectivity {
    n_vertices: usize,
    entries: HashMap<(usize, usize), u32>,
}

impl Connectivity {
    /// Creates an empty connectivity over `n_vertices` vertices.
    pub fn new(n_vertices: usize) -> Self {
        Self {
            n_vertices,
            entries: HashMap::new(),
        }
    }

    /// Builds a connectivity from a dense square matrix.
    ///
    /// Positive entries denote an edge and its transition type, zero denotes
    /// no edge.
    ///
    /// Both triangles are read and must agree. A matrix holding only its
    /// upper (or lower) triangle is rejected as asymmetric; build such input
    /// edge by edge with [`Connectivity::add_edge`] instead.
    ///
    /// # Errors
    ///
    /// Returns [`TcrfrError::InvalidGraph`] unless the matrix is square and
    /// symmetric, with non-negative entries and an empty diagonal.
    pub fn from_dense(rows: &[Vec<i64>]) -> Result<Self> {
        let n = rows.len();
        let mut connectivity = Self::new(n);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != n {
                return Err(TcrfrError::invalid_graph(format!(
                    "connectivity matrix is not square: row {i} has {} columns, expected {n}",
                    row.len()
                )));
            }
        }
        for (i, row) in rows.iter().enumerate() {
            for (j, &value) in row.iter().enumerate() {
                if value < 0 {
                    return Err(TcrfrError::invalid_graph(format!(
                        "negative entry {value} at ({i}, {j})"
                    )));
                }
                if value != rows[j][i] {
                    return Err(TcrfrError::invalid_graph(format!(
                        "entries at ({i}, {j}) and ({j}, {i}) differ"
                    )));
                }
                if j > i && value > 0 {
                    let trans_type = u32::try_from(value).map_err(|_| {
                        TcrfrError::invalid_graph(format!("transition type {value} is too large"))
                    })?;
                    connectivity.add_edge(i, j, trans_type)?;
                } else if j == i && value > 0 {
                    return Err(TcrfrError::invalid_graph(format!("self loop at vertex {i}")));
                }
            }
        }
        Ok(connectivity)
    }

    /// Connects two distinct vertices with the given transition type.
    ///
    /// Connecting an already connected pair replaces its type.
    ///
    /// # Errors
    ///
    /// Both vertices must exist and differ, and `trans_type` must be at least 1.
    pub fn add_edge(&mut self, i: usize, j: usize, trans_type: u32) -> Result<()> {
        if i >= self.n_vertices || j >= self.n_vertices {
            return Err(TcrfrError::invalid_graph(format!(
                "edge ({i}, {j}) is out of range for {} vertices",
                self.n_vertices
            )));
        }
        if i == j {
            return Err(TcrfrError::invalid_graph(format!("self loop at vertex {i}")));
        }
        if trans_type == 0 {
            return Err(TcrfrError::invalid_graph("transition type must be at least 1"));
        }
        self.entries.insert((i.min(j), i.max(j)), trans_type);
        Ok(())
    }

    /// Returns the transition type between two vertices, or 0 if unconnected.
    pub fn get(&self, i: usize, j: usize) -> u32 {
        self.entries
            .get(&(i.min(j), i.max(j)))
            .copied()
            .unwrap_or(0)
    }

    /// Returns the number of vertices.
    pub const fn n_vertices(&self) -> usize {
        self.n_vertices
    }
}

/// Represents an undirected edge with `source < target`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct GraphEdge {
    source: usize,
    target: usize,
    trans_type: usize,
}

impl GraphEdge {
    /// Gets the smaller endpoint.
    #[inline(always)]
    pub const fn source(&self) -> usize {
        self.source
    }

    /// Gets the larger endpoint.
    #[inline(always)]
    pub const fn target(&self) -> usize {
        self.target
    }

    /// Gets the zero-based index of the transition matrix used on this edge.
    #[inline(always)]
    pub const fn trans_type(&self) -> usize {
        self.trans_type
    }
}

/// Vertex, edge and neighbor tables derived from a [`Connectivity`].
#[derive(Clone, Debug)]
pub struct Graph {
    n_vertices: usize,
    edges: Vec<GraphEdge>,
    degrees: Vec<usize>,
    max_degree: usize,
    // row-major, n_vertices x max_degree
    neighbors: Vec<usize>,
    neighbor_weights: Vec<f64>,
    n_trans_types: usize,
}

impl Graph {
    /// Builds the graph tables.
    pub fn new(connectivity: &Connectivity) -> Self {
        let n_vertices = connectivity.n_vertices();
        let mut edges: Vec<GraphEdge> = connectivity
            .entries
            .iter()
            .map(|(&(source, target), &trans_type)| GraphEdge {
                source,
                target,
                trans_type: trans_type as usize - 1,
            })
            .collect();
        edges.sort_unstable_by_key(|e| (e.source, e.target));

        let n_trans_types = edges.iter().map(|e| e.trans_type + 1).max().unwrap_or(0);

        let mut adjacency = vec![vec![]; n_vertices];
        for edge in &edges {
            adjacency[edge.source].push(edge.target);
            adjacency[edge.target].push(edge.source);
        }
        for list in &mut adjacency {
            list.sort_unstable();
        }
        let degrees: Vec<usize> = adjacency.iter().map(Vec::len).collect();
        let max_degree = degrees.iter().copied().max().unwrap_or(0);

        let mut neighbors = vec![0; n_vertices * max_degree];
        let mut neighbor_weights = vec![0.0; n_vertices * max_degree];
        for (v, list) in adjacency.iter().enumerate() {
            let row = v * max_degree;
            neighbors[row..row + list.len()].copy_from_slice(list);
            for w in &mut neighbor_weights[row..row + list.len()] {
                *w = 1.0;
            }
        }

        Self {
            n_vertices,
            edges,
            degrees,
            max_degree,
            neighbors,
            neighbor_weights,
            n_trans_types,
        }
    }

    /// Returns the number of vertices.
    #[inline(always)]
    pub const fn n_vertices(&self) -> usize {
        self.n_vertices
    }

    /// Returns the edges ordered by `(source, target)`.
    #[inline(always)]
    pub fn edges(&self) -> &[GraphEdge] {
        &self.edges
    }

    /// Returns the number of transition types, i.e. the largest type used.
    #[inline(always)]
    pub const fn n_trans_types(&self) -> usize {
        self.n_trans_types
    }

    /// Returns the largest vertex degree, i.e. the width of the neighbor table.
    #[inline(always)]
    pub const fn max_degree(&self) -> usize {
        self.max_degree
    }

    /// Returns the degree of a vertex.
    #[inline(always)]
    pub fn degree(&self, vertex: usize) -> usize {
        self.degrees[vertex]
    }

    /// Returns the real neighbors of a vertex in ascending order.
    #[inline(always)]
    pub fn neighbors(&self, vertex: usize) -> &[usize] {
        let row = vertex * self.max_degree;
        &self.neighbors[row..row + self.degrees[vertex]]
    }

    /// Returns the padded neighbor row of a vertex.
    ///
    /// Entries at positions `>= degree(vertex)` are padding; their weight in
    /// [`Graph::neighbor_weights`] is 0.
    #[inline(always)]
    pub fn neighbor_row(&self, vertex: usize) -> &[usize] {
        let row = vertex * self.max_degree;
        &self.neighbors[row..row + self.max_degree]
    }

    /// Returns the padded neighbor-weight row of a vertex.
    #[inline(always)]
    pub fn neighbor_weights(&self, vertex: usize) -> &[f64] {
        let row = vertex * self.max_degree;
        &self.neighbor_weights[row..row + self.max_degree]
    }

    /// Returns the number of edges using each transition type.
    pub fn edges_per_type(&self) -> Vec<usize> {
        let mut counts = vec![0; self.n_trans_types];
        for edge in &self.edges {
            counts[edge.trans_type] += 1;
        }
        counts
    }
}
