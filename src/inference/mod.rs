//! Pairwise Markov network and most-probable-explanation inference.
//!
//! The network has one discrete variable per instance, each with `k` states,
//! a unary potential per variable and a `k × k` potential per constrained
//! pair. Potentials are stored as positive weights; inference works on their
//! logarithms.

mod belief;
mod exact;

use crate::config::InferenceMode;
use crate::error::ClusterError;
use ndarray::{Array1, Array2};
use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;

/// Floor applied to every potential entry
pub const POTENTIAL_FLOOR: f64 = 1e-9;

/// Pairwise Markov network over `k`-state variables.
///
/// Edge tables are stored with rows indexed by the state of the lower-numbered
/// variable and columns by the higher-numbered one.
#[derive(Debug, Clone)]
pub struct FactorGraph {
    graph: UnGraph<Array1<f64>, Array2<f64>>,
    k: usize,
}

impl FactorGraph {
    pub fn new(k: usize) -> Self {
        Self {
            graph: UnGraph::default(),
            k,
        }
    }

    /// Number of states per variable
    pub fn k(&self) -> usize {
        self.k
    }

    pub fn num_variables(&self) -> usize {
        self.graph.node_count()
    }

    pub fn num_pairwise(&self) -> usize {
        self.graph.edge_count()
    }

    /// Add a variable with its unary potential and return its index
    pub fn add_variable(&mut self, unary: Array1<f64>) -> Result<usize, ClusterError> {
        if unary.len() != self.k {
            return Err(ClusterError::DimensionMismatch {
                expected: self.k,
                found: unary.len(),
            });
        }
        Ok(self.graph.add_node(unary).index())
    }

    /// Add a pairwise potential whose rows index the states of `a`
    pub fn add_pairwise(
        &mut self,
        a: usize,
        b: usize,
        table: Array2<f64>,
    ) -> Result<(), ClusterError> {
        if a == b || a.max(b) >= self.num_variables() {
            return Err(ClusterError::InvalidConstraint(format!(
                "cannot connect variables {} and {} in a graph of {}",
                a,
                b,
                self.num_variables()
            )));
        }
        if table.dim() != (self.k, self.k) {
            return Err(ClusterError::DimensionMismatch {
                expected: self.k,
                found: table.nrows().max(table.ncols()),
            });
        }
        let (low, high, table) = if a < b {
            (a, b, table)
        } else {
            (b, a, table.reversed_axes())
        };
        self.graph
            .add_edge(NodeIndex::new(low), NodeIndex::new(high), table);
        Ok(())
    }

    pub fn unary(&self, i: usize) -> &Array1<f64> {
        &self.graph[NodeIndex::new(i)]
    }

    /// Pairwise table between `a` and `b` with rows indexing the states of `a`
    pub fn pairwise(&self, a: usize, b: usize) -> Option<Array2<f64>> {
        let edge = self
            .graph
            .find_edge(NodeIndex::new(a), NodeIndex::new(b))?;
        let table = &self.graph[edge];
        if a < b {
            Some(table.clone())
        } else {
            Some(table.t().to_owned())
        }
    }

    /// True when every unary entry of `i` sits at or below the floor, meaning
    /// its local evidence underflowed and the variable cannot be decoded
    pub fn is_degenerate(&self, i: usize) -> bool {
        self.unary(i).iter().all(|&u| !(u > POTENTIAL_FLOOR))
    }

    fn log_unaries(&self) -> Vec<Vec<f64>> {
        self.graph
            .node_indices()
            .map(|n| self.graph[n].iter().map(|&u| u.ln()).collect())
            .collect()
    }

    /// `(low, high, log table)` for every edge, in insertion order
    fn log_edges(&self) -> Vec<(usize, usize, Array2<f64>)> {
        self.graph
            .edge_references()
            .map(|e| {
                let (a, b) = (e.source().index(), e.target().index());
                let table = e.weight().mapv(f64::ln);
                if a < b {
                    (a, b, table)
                } else {
                    (b, a, table.reversed_axes())
                }
            })
            .collect()
    }
}

/// Argmax with ties broken toward the lowest index; `None` unless the best
/// value is finite
fn argmax(values: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &v) in values.iter().enumerate() {
        match best {
            None if !v.is_nan() => best = Some((i, v)),
            Some((_, b)) if v > b => best = Some((i, v)),
            _ => {}
        }
    }
    best.filter(|&(_, v)| v.is_finite()).map(|(i, _)| i)
}

/// Most probable joint state of every variable.
///
/// Entries are `None` for variables that could not be decoded.
pub fn infer(
    graph: &FactorGraph,
    mode: InferenceMode,
    passes: usize,
    max_exact_table: usize,
) -> Vec<Option<usize>> {
    let mut states = match mode {
        InferenceMode::Approximate => belief::max_product(graph, passes),
        InferenceMode::Exact => exact::variable_elimination(graph, passes, max_exact_table),
    };
    for (i, state) in states.iter_mut().enumerate() {
        if graph.is_degenerate(i) {
            *state = None;
        }
    }
    states
}
