//! Pairwise must-link / cannot-link supervision.
//!
//! Every pair is stored once, keyed by its ordered `(low, high)` indices, and
//! indexed a second time per instance so that all constraints touching a
//! point can be visited in O(degree).

use crate::error::ClusterError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// Kind of pairwise constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkType {
    MustLink,
    CannotLink,
}

/// A stored constraint. `first < second` always holds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Constraint {
    pub first: usize,
    pub second: usize,
    pub link: LinkType,
    /// Per-pair multiplier on the global weight of `link`
    pub cost: f64,
}

impl Constraint {
    /// The endpoint that is not `index`
    pub fn other(&self, index: usize) -> usize {
        if self.first == index {
            self.second
        } else {
            self.first
        }
    }
}

/// Constraint set with global must-link / cannot-link weights
#[derive(Debug, Clone)]
pub struct ConstraintStore {
    entries: Vec<Constraint>,
    pairs: HashMap<(usize, usize), usize>,
    by_instance: HashMap<usize, Vec<usize>>,
    must_link_weight: f64,
    cannot_link_weight: f64,
}

impl Default for ConstraintStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstraintStore {
    /// Empty store with unit link weights
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            pairs: HashMap::new(),
            by_instance: HashMap::new(),
            must_link_weight: 1.0,
            cannot_link_weight: 1.0,
        }
    }

    /// Add a constraint with unit per-pair cost.
    ///
    /// Returns `Ok(false)` when the identical constraint is already present.
    pub fn add(&mut self, i: usize, j: usize, link: LinkType) -> Result<bool, ClusterError> {
        self.add_with_cost(i, j, link, 1.0)
    }

    /// Add a constraint whose violation cost is `cost` times the global weight
    /// of its link type.
    pub fn add_with_cost(
        &mut self,
        i: usize,
        j: usize,
        link: LinkType,
        cost: f64,
    ) -> Result<bool, ClusterError> {
        if i == j {
            return Err(ClusterError::InvalidConstraint(format!(
                "instance {} cannot be constrained to itself",
                i
            )));
        }
        if !cost.is_finite() || cost <= 0.0 {
            return Err(ClusterError::invalid_parameter(
                "cost",
                format!("constraint cost must be positive, got {}", cost),
            ));
        }
        let key = (i.min(j), i.max(j));
        if let Some(&pos) = self.pairs.get(&key) {
            let existing = self.entries[pos].link;
            if existing != link {
                return Err(ClusterError::ConflictingConstraint {
                    first: key.0,
                    second: key.1,
                    existing,
                    requested: link,
                });
            }
            return Ok(false);
        }

        let pos = self.entries.len();
        self.entries.push(Constraint {
            first: key.0,
            second: key.1,
            link,
            cost,
        });
        self.pairs.insert(key, pos);
        self.by_instance.entry(key.0).or_default().push(pos);
        self.by_instance.entry(key.1).or_default().push(pos);
        Ok(true)
    }

    /// Link type of an unordered pair, `None` when unconstrained
    pub fn link_type(&self, i: usize, j: usize) -> Option<LinkType> {
        self.pairs
            .get(&(i.min(j), i.max(j)))
            .map(|&pos| self.entries[pos].link)
    }

    /// All constraints touching instance `i`
    pub fn neighbors_of(&self, i: usize) -> impl Iterator<Item = &Constraint> + '_ {
        self.by_instance
            .get(&i)
            .into_iter()
            .flat_map(move |positions| positions.iter().map(move |&pos| &self.entries[pos]))
    }

    /// Number of constraints touching instance `i`
    pub fn degree(&self, i: usize) -> usize {
        self.by_instance.get(&i).map_or(0, Vec::len)
    }

    /// All constraints in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Constraint> + '_ {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn must_link_weight(&self) -> f64 {
        self.must_link_weight
    }

    pub fn cannot_link_weight(&self) -> f64 {
        self.cannot_link_weight
    }

    /// Global weight of a link type
    pub fn weight(&self, link: LinkType) -> f64 {
        match link {
            LinkType::MustLink => self.must_link_weight,
            LinkType::CannotLink => self.cannot_link_weight,
        }
    }

    /// Violation cost of a stored constraint: global weight times pair cost
    pub fn cost_of(&self, constraint: &Constraint) -> f64 {
        self.weight(constraint.link) * constraint.cost
    }

    /// Set the global link weights
    pub fn set_weights(
        &mut self,
        must_link_weight: f64,
        cannot_link_weight: f64,
    ) -> Result<(), ClusterError> {
        for (name, value) in [
            ("must_link_weight", must_link_weight),
            ("cannot_link_weight", cannot_link_weight),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ClusterError::invalid_parameter(
                    name,
                    format!("must be finite and non-negative, got {}", value),
                ));
            }
        }
        self.must_link_weight = must_link_weight;
        self.cannot_link_weight = cannot_link_weight;
        Ok(())
    }

    /// Fail if any constraint refers to an instance outside `0..num_instances`
    pub fn validate(&self, num_instances: usize) -> Result<(), ClusterError> {
        if let Some(bad) = self.entries.iter().find(|c| c.second >= num_instances) {
            return Err(ClusterError::InvalidConstraint(format!(
                "pair ({}, {}) refers to an instance outside 0..{}",
                bad.first, bad.second, num_instances
            )));
        }
        Ok(())
    }

    /// Connected components of the must-link graph.
    ///
    /// Only instances that take part in at least one must-link appear. Each
    /// component is sorted, and components are ordered by their smallest member.
    pub fn must_link_neighborhoods(&self) -> Vec<Vec<usize>> {
        let mut adjacency: HashMap<usize, Vec<usize>> = HashMap::new();
        for c in self.entries.iter().filter(|c| c.link == LinkType::MustLink) {
            adjacency.entry(c.first).or_default().push(c.second);
            adjacency.entry(c.second).or_default().push(c.first);
        }

        let mut roots: Vec<usize> = adjacency.keys().copied().collect();
        roots.sort_unstable();

        let mut visited: HashSet<usize> = HashSet::new();
        let mut neighborhoods = Vec::new();
        for root in roots {
            if visited.contains(&root) {
                continue;
            }
            let mut component = Vec::new();
            let mut stack = vec![root];
            visited.insert(root);
            while let Some(node) = stack.pop() {
                component.push(node);
                for &next in adjacency.get(&node).map(Vec::as_slice).unwrap_or(&[]) {
                    if visited.insert(next) {
                        stack.push(next);
                    }
                }
            }
            component.sort_unstable();
            neighborhoods.push(component);
        }
        neighborhoods
    }

    /// A new store with the must-link closure applied.
    ///
    /// Every pair inside a must-link neighborhood becomes a must-link, and every
    /// pair across two groups joined by a cannot-link becomes a cannot-link.
    /// Derived constraints that would contradict an existing one are skipped.
    pub fn transitive_closure(&self) -> ConstraintStore {
        let mut closed = ConstraintStore::new();
        closed.must_link_weight = self.must_link_weight;
        closed.cannot_link_weight = self.cannot_link_weight;

        let neighborhoods = self.must_link_neighborhoods();
        let mut group_of: HashMap<usize, usize> = HashMap::new();
        for (g, members) in neighborhoods.iter().enumerate() {
            for &m in members {
                group_of.insert(m, g);
            }
        }

        for members in &neighborhoods {
            for (a, &i) in members.iter().enumerate() {
                for &j in &members[a + 1..] {
                    let cost = self.pair_cost(i, j);
                    closed.add_or_warn(i, j, LinkType::MustLink, cost);
                }
            }
        }

        let singleton = |i: usize| vec![i];
        for c in self.entries.iter().filter(|c| c.link == LinkType::CannotLink) {
            let left = group_of
                .get(&c.first)
                .map(|&g| neighborhoods[g].clone())
                .unwrap_or_else(|| singleton(c.first));
            let right = group_of
                .get(&c.second)
                .map(|&g| neighborhoods[g].clone())
                .unwrap_or_else(|| singleton(c.second));
            for &i in &left {
                for &j in &right {
                    closed.add_or_warn(i, j, LinkType::CannotLink, c.cost);
                }
            }
        }
        closed
    }

    fn pair_cost(&self, i: usize, j: usize) -> f64 {
        self.pairs
            .get(&(i.min(j), i.max(j)))
            .map_or(1.0, |&pos| self.entries[pos].cost)
    }

    fn add_or_warn(&mut self, i: usize, j: usize, link: LinkType, cost: f64) {
        if let Err(e) = self.add_with_cost(i, j, link, cost) {
            warn!(first = i, second = j, error = %e, "Skipping derived constraint");
        }
    }
}
