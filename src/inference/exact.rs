use super::{argmax, belief, FactorGraph};
use petgraph::unionfind::UnionFind;
use std::collections::BTreeSet;
use tracing::warn;

/// Log-domain table over a sorted set of variables, row-major in scope order
#[derive(Debug, Clone)]
struct Factor {
    scope: Vec<usize>,
    table: Vec<f64>,
}

/// Remembers, for each assignment of `scope`, the best state of the
/// eliminated variable
struct Elimination {
    var: usize,
    scope: Vec<usize>,
    best: Vec<usize>,
}

fn table_len(k: usize, scope_len: usize) -> Option<usize> {
    k.checked_pow(u32::try_from(scope_len).ok()?)
}

/// Index of an assignment within a table over `scope`
fn index_of(scope: &[usize], states: &[usize], k: usize) -> usize {
    scope.iter().fold(0, |idx, &v| idx * k + states[v])
}

/// Exact max-sum variable elimination, one connected component at a time.
///
/// Components whose elimination would build a table larger than
/// `max_table` entries are decoded by message passing instead.
pub(super) fn variable_elimination(
    graph: &FactorGraph,
    fallback_passes: usize,
    max_table: usize,
) -> Vec<Option<usize>> {
    let n = graph.num_variables();
    let k = graph.k();
    let unaries = graph.log_unaries();
    let edges = graph.log_edges();

    let mut components = UnionFind::<usize>::new(n);
    for (low, high, _) in &edges {
        components.union(*low, *high);
    }
    let mut members: Vec<Vec<usize>> = vec![Vec::new(); n];
    for v in 0..n {
        members[components.find(v)].push(v);
    }
    let mut edges_of: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (pos, (low, _, _)) in edges.iter().enumerate() {
        edges_of[components.find(*low)].push(pos);
    }

    let mut states: Vec<Option<usize>> = vec![None; n];
    // Scratch assignment shared by every component; each one only touches its own slots
    let mut scratch = vec![0usize; n];
    for (root, vars) in members.into_iter().enumerate() {
        if vars.is_empty() {
            continue;
        }
        if edges_of[root].is_empty() {
            for &v in &vars {
                states[v] = argmax(&unaries[v]);
            }
            continue;
        }

        let mut factors: Vec<Factor> = vars
            .iter()
            .map(|&v| Factor {
                scope: vec![v],
                table: unaries[v].clone(),
            })
            .collect();
        for &pos in &edges_of[root] {
            let (low, high, table) = &edges[pos];
            factors.push(Factor {
                scope: vec![*low, *high],
                table: table.iter().copied().collect(),
            });
        }

        let order = match elimination_order(&vars, &factors, k, max_table) {
            Some(order) => order,
            None => {
                warn!(
                    variables = vars.len(),
                    max_table, "Component too large for exact inference, using message passing"
                );
                let decoded = belief::run(k, &unaries, &edges, &vars, fallback_passes.max(1));
                for (&v, state) in vars.iter().zip(decoded) {
                    states[v] = state;
                }
                continue;
            }
        };

        if let Some(decoded) = eliminate(k, factors, &order, &mut scratch) {
            for (v, s) in decoded {
                states[v] = Some(s);
            }
        }
    }
    states
}

/// Greedy min-neighbor elimination order, or `None` if some intermediate
/// table would exceed `max_table` entries
fn elimination_order(
    vars: &[usize],
    factors: &[Factor],
    k: usize,
    max_table: usize,
) -> Option<Vec<usize>> {
    let mut scopes: Vec<BTreeSet<usize>> = factors
        .iter()
        .map(|f| f.scope.iter().copied().collect())
        .collect();
    let mut remaining: BTreeSet<usize> = vars.iter().copied().collect();
    let mut order = Vec::with_capacity(vars.len());

    while !remaining.is_empty() {
        let mut best: Option<(usize, usize)> = None;
        for &v in &remaining {
            let mut joined: BTreeSet<usize> = BTreeSet::new();
            for scope in scopes.iter().filter(|s| s.contains(&v)) {
                joined.extend(scope.iter().copied());
            }
            let width = joined.len();
            if best.map_or(true, |(_, w)| width < w) {
                best = Some((v, width));
            }
        }
        let (v, width) = best?;
        if table_len(k, width)? > max_table {
            return None;
        }

        let mut joined: BTreeSet<usize> = BTreeSet::new();
        scopes.retain(|s| {
            if s.contains(&v) {
                joined.extend(s.iter().copied());
                false
            } else {
                true
            }
        });
        joined.remove(&v);
        scopes.push(joined);
        remaining.remove(&v);
        order.push(v);
    }
    Some(order)
}

/// Eliminate `order` and back-substitute.
///
/// Returns `(variable, state)` for every eliminated variable, or `None` when
/// the best joint score is not finite. `states` is scratch indexed by
/// variable; only the slots of this component are written.
fn eliminate(
    k: usize,
    mut factors: Vec<Factor>,
    order: &[usize],
    states: &mut [usize],
) -> Option<Vec<(usize, usize)>> {
    let mut eliminations: Vec<Elimination> = Vec::with_capacity(order.len());
    let mut total = 0.0;

    for &v in order {
        let (touching, rest): (Vec<Factor>, Vec<Factor>) =
            factors.into_iter().partition(|f| f.scope.contains(&v));
        factors = rest;

        let joined: BTreeSet<usize> = touching
            .iter()
            .flat_map(|f| f.scope.iter().copied())
            .filter(|&u| u != v)
            .collect();
        let scope: Vec<usize> = joined.into_iter().collect();
        let len = k.pow(scope.len() as u32);

        let mut table = vec![f64::NEG_INFINITY; len];
        let mut best = vec![0usize; len];
        for (idx, (slot, arg)) in table.iter_mut().zip(best.iter_mut()).enumerate() {
            // Decode idx into the states of `scope`
            let mut rem = idx;
            for &u in scope.iter().rev() {
                states[u] = rem % k;
                rem /= k;
            }
            let mut values = Vec::with_capacity(k);
            for s in 0..k {
                states[v] = s;
                let sum: f64 = touching
                    .iter()
                    .map(|f| f.table[index_of(&f.scope, states, k)])
                    .sum();
                values.push(sum);
            }
            match argmax(&values) {
                Some(s) => {
                    *slot = values[s];
                    *arg = s;
                }
                None => {
                    *slot = if values.iter().any(|x| x.is_nan()) {
                        f64::NAN
                    } else {
                        f64::NEG_INFINITY
                    };
                }
            }
        }

        if scope.is_empty() {
            total += table[0];
        } else {
            factors.push(Factor {
                scope: scope.clone(),
                table,
            });
        }
        eliminations.push(Elimination {
            var: v,
            scope,
            best,
        });
    }

    if !total.is_finite() {
        return None;
    }

    let mut decoded = Vec::with_capacity(eliminations.len());
    for step in eliminations.iter().rev() {
        let s = step.best[index_of(&step.scope, states, k)];
        states[step.var] = s;
        decoded.push((step.var, s));
    }
    Some(decoded)
}
