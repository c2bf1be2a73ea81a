use super::{argmax, FactorGraph};
use ndarray::Array2;

/// Messages that moved less than this end message passing early
const CONVERGENCE_DELTA: f64 = 1e-9;

/// Neighbor of a variable: `(other variable, edge position, self is the lower index)`
type Neighbor = (usize, usize, bool);

/// Synchronous max-product belief propagation in the log domain.
///
/// With one pass every variable sees only its neighbors' local evidence,
/// which is exact on trees of depth one and a fast approximation elsewhere.
pub(super) fn max_product(graph: &FactorGraph, passes: usize) -> Vec<Option<usize>> {
    let unaries = graph.log_unaries();
    let edges = graph.log_edges();
    let all: Vec<usize> = (0..graph.num_variables()).collect();
    run(graph.k(), &unaries, &edges, &all, passes)
}

/// Message passing restricted to `vars`; decodes only those variables.
///
/// Every edge touching `vars` must have both endpoints in `vars`.
pub(super) fn run(
    k: usize,
    unaries: &[Vec<f64>],
    edges: &[(usize, usize, Array2<f64>)],
    vars: &[usize],
    passes: usize,
) -> Vec<Option<usize>> {
    let n = unaries.len();
    let mut in_scope = vec![false; n];
    for &v in vars {
        in_scope[v] = true;
    }

    let mut neighbors: Vec<Vec<Neighbor>> = vec![Vec::new(); n];
    for (pos, (low, high, _)) in edges.iter().enumerate() {
        if in_scope[*low] && in_scope[*high] {
            neighbors[*low].push((*high, pos, true));
            neighbors[*high].push((*low, pos, false));
        }
    }

    // messages[2e] flows low -> high, messages[2e + 1] flows high -> low
    let mut messages = vec![vec![0.0; k]; 2 * edges.len()];

    for _ in 0..passes {
        let mut next = messages.clone();
        let mut max_change: f64 = 0.0;

        for &i in vars {
            for &(_, pos, i_is_low) in &neighbors[i] {
                // Evidence at i excluding what j told it
                let mut evidence = unaries[i].clone();
                for &(_, other_pos, low_there) in &neighbors[i] {
                    if other_pos == pos {
                        continue;
                    }
                    let incoming = &messages[2 * other_pos + usize::from(low_there)];
                    for (e, m) in evidence.iter_mut().zip(incoming.iter()) {
                        *e += m;
                    }
                }

                let table = &edges[pos].2;
                let mut outgoing = vec![f64::NEG_INFINITY; k];
                for (s_j, out) in outgoing.iter_mut().enumerate() {
                    for (s_i, &ev) in evidence.iter().enumerate() {
                        let pair = if i_is_low {
                            table[[s_i, s_j]]
                        } else {
                            table[[s_j, s_i]]
                        };
                        let value = ev + pair;
                        if value > *out {
                            *out = value;
                        }
                    }
                }
                normalize(&mut outgoing);

                let slot = 2 * pos + usize::from(!i_is_low);
                for (old, new) in messages[slot].iter().zip(outgoing.iter()) {
                    let change = (old - new).abs();
                    if change.is_nan() || change > max_change {
                        max_change = if change.is_nan() { f64::INFINITY } else { change };
                    }
                }
                next[slot] = outgoing;
            }
        }

        messages = next;
        if max_change < CONVERGENCE_DELTA {
            break;
        }
    }

    vars.iter()
        .map(|&i| {
            let mut belief = unaries[i].clone();
            for &(_, pos, i_is_low) in &neighbors[i] {
                let incoming = &messages[2 * pos + usize::from(i_is_low)];
                for (b, m) in belief.iter_mut().zip(incoming.iter()) {
                    *b += m;
                }
            }
            argmax(&belief)
        })
        .collect()
}

/// Shift a log-message so its maximum is zero
fn normalize(message: &mut [f64]) {
    let max = message.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if max.is_finite() {
        for m in message.iter_mut() {
            *m -= max;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_chain_propagates_over_passes() {
        // 0 - 1 - 2 chain: only variable 0 has a preference, the links demand agreement
        let mut graph = FactorGraph::new(2);
        graph.add_variable(array![0.9, 0.1]).unwrap();
        graph.add_variable(array![0.5, 0.5]).unwrap();
        graph.add_variable(array![0.45, 0.55]).unwrap();
        let agree = array![[1.0, 0.01], [0.01, 1.0]];
        graph.add_pairwise(0, 1, agree.clone()).unwrap();
        graph.add_pairwise(1, 2, agree).unwrap();

        // A single pass cannot carry variable 0's evidence to variable 2
        assert_eq!(max_product(&graph, 1)[2], Some(1));
        // Enough passes reach the exact answer on a tree
        assert_eq!(max_product(&graph, 10), vec![Some(0), Some(0), Some(0)]);
    }

    #[test]
    fn test_isolated_variables_follow_unary() {
        let mut graph = FactorGraph::new(3);
        graph.add_variable(array![0.1, 0.7, 0.2]).unwrap();
        graph.add_variable(array![0.5, 0.5, 0.1]).unwrap();
        assert_eq!(max_product(&graph, 3), vec![Some(1), Some(0)]);
    }

    #[test]
    fn test_normalize_shifts_to_zero_max() {
        let mut m = vec![-3.0, -1.0, -2.0];
        normalize(&mut m);
        assert_eq!(m, vec![-2.0, 0.0, -1.0]);
    }
}
