//! Foreign-key dependency resolution
//!
//! Orders table creation and deletion so that referenced tables exist before
//! their referents, detects FK cycles, and — for cyclic graphs — computes
//! the set of foreign keys to detach so the rest can be ordered. Detached
//! FKs are emitted by the differ in the deferred phase, after all tables
//! exist.
//!
//! Self-referential FKs never contribute edges: PostgreSQL accepts them at
//! CREATE TABLE time.

use std::collections::{BTreeSet, HashMap, HashSet};

use thiserror::Error;

use crate::model::{ForeignKey, Table};

#[derive(Debug, Error)]
#[error("foreign-key cycle(s) detected: {}", format_cycles(cycles))]
pub struct CycleError {
    /// Each cycle as a list of table keys, smallest key first.
    pub cycles: Vec<Vec<String>>,
}

fn format_cycles(cycles: &[Vec<String>]) -> String {
    cycles
        .iter()
        .map(|c| {
            let mut path = c.join(" -> ");
            if let Some(first) = c.first() {
                path.push_str(" -> ");
                path.push_str(first);
            }
            path
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// A foreign key removed from the graph to break a cycle, with the table it
/// belongs to.
#[derive(Debug, Clone)]
pub struct DetachedFk {
    pub table: String,
    pub fk: ForeignKey,
}

/// Result of an order-with-detachment request.
#[derive(Debug)]
pub struct Detachment {
    pub order: Vec<String>,
    pub deferred_fks: Vec<DetachedFk>,
}

pub struct DependencyResolver {
    /// Table keys in input order; input order breaks topological ties.
    nodes: Vec<String>,
    /// FK edges as (source table idx, target table idx, fk), source = the
    /// table carrying the FK. Self-references are excluded on construction.
    edges: Vec<(usize, usize, ForeignKey)>,
}

impl DependencyResolver {
    pub fn new<'a>(tables: impl IntoIterator<Item = &'a Table>) -> Self {
        let tables: Vec<&Table> = tables.into_iter().collect();
        let nodes: Vec<String> = tables.iter().map(|t| t.name.key()).collect();
        let index: HashMap<String, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, k)| (k.clone(), i))
            .collect();

        let mut edges = Vec::new();
        for (src, table) in tables.iter().enumerate() {
            for fk in &table.foreign_keys {
                let Some(&dst) = index.get(&fk.ref_table.key()) else {
                    // References outside the managed set contribute no
                    // ordering constraint.
                    continue;
                };
                if dst == src {
                    continue;
                }
                edges.push((src, dst, fk.clone()));
            }
        }

        Self { nodes, edges }
    }

    /// Tables in an order where every FK target precedes its source.
    /// Fails with a [`CycleError`] naming all cycles when the graph is
    /// cyclic.
    pub fn creation_order(&self) -> Result<Vec<String>, CycleError> {
        match self.kahn(&self.edge_pairs()) {
            Some(order) => Ok(order),
            None => Err(CycleError {
                cycles: self.collect_cycles(),
            }),
        }
    }

    /// Tables in an order where every FK source precedes its target
    /// (dependents first) — the order for dropping.
    pub fn deletion_order(&self) -> Result<Vec<String>, CycleError> {
        let mut order = self.creation_order()?;
        order.reverse();
        Ok(order)
    }

    /// Creation order that never fails: FKs participating in cycles are
    /// detached from the graph and returned for the caller to emit after
    /// all tables exist.
    pub fn creation_order_with_detachment(&self) -> Detachment {
        let cyclic = self.cyclic_nodes();
        let deferred: Vec<DetachedFk> = self
            .edges
            .iter()
            .filter(|(src, dst, _)| cyclic.contains(src) && cyclic.contains(dst))
            .map(|(src, _, fk)| DetachedFk {
                table: self.nodes[*src].clone(),
                fk: fk.clone(),
            })
            .collect();

        let residual: Vec<(usize, usize)> = self
            .edges
            .iter()
            .filter(|(src, dst, _)| !(cyclic.contains(src) && cyclic.contains(dst)))
            .map(|(src, dst, _)| (*src, *dst))
            .collect();

        let order = self
            .kahn(&residual)
            .unwrap_or_else(|| panic!("cycle remains after FK detachment"));

        Detachment {
            order,
            deferred_fks: deferred,
        }
    }

    /// Deletion order that never fails. `deferred_fks` here is the set of
    /// FKs to drop first; `order` then drops tables dependents-first.
    pub fn deletion_order_with_detachment(&self) -> Detachment {
        let mut detachment = self.creation_order_with_detachment();
        detachment.order.reverse();
        detachment
    }

    fn edge_pairs(&self) -> Vec<(usize, usize)> {
        self.edges.iter().map(|(s, d, _)| (*s, *d)).collect()
    }

    /// Kahn's algorithm over "target before source" edges, ties broken by
    /// input order. Returns `None` when a cycle blocks completion.
    fn kahn(&self, edges: &[(usize, usize)]) -> Option<Vec<String>> {
        let n = self.nodes.len();
        // in_degree counts unsatisfied prerequisites: for edge (src, dst),
        // dst must come first, so src has a prerequisite.
        let mut in_degree = vec![0usize; n];
        for (src, _) in edges {
            in_degree[*src] += 1;
        }

        let mut emitted = vec![false; n];
        let mut order = Vec::with_capacity(n);
        for _ in 0..n {
            let next = (0..n).find(|&i| !emitted[i] && in_degree[i] == 0)?;
            emitted[next] = true;
            order.push(self.nodes[next].clone());
            for (src, dst) in edges {
                if *dst == next && !emitted[*src] {
                    in_degree[*src] -= 1;
                }
            }
        }
        Some(order)
    }

    /// Nodes participating in at least one cycle: members of strongly
    /// connected components with more than one node (self-references were
    /// excluded on construction).
    fn cyclic_nodes(&self) -> HashSet<usize> {
        let n = self.nodes.len();
        let mut adjacency = vec![Vec::new(); n];
        for (src, dst, _) in &self.edges {
            // Direction is irrelevant for SCC membership as long as it is
            // consistent.
            adjacency[*src].push(*dst);
        }

        let mut state = TarjanState {
            adjacency: &adjacency,
            index_counter: 0,
            stack: Vec::new(),
            on_stack: vec![false; n],
            indices: vec![None; n],
            lowlink: vec![0; n],
            cyclic: HashSet::new(),
        };
        for v in 0..n {
            if state.indices[v].is_none() {
                state.strongconnect(v);
            }
        }
        state.cyclic
    }

    /// Collect cycles for error reporting, deduplicated by rotation.
    fn collect_cycles(&self) -> Vec<Vec<String>> {
        let n = self.nodes.len();
        let mut adjacency = vec![Vec::new(); n];
        for (src, dst, _) in &self.edges {
            adjacency[*dst].push(*src);
        }

        let mut found: BTreeSet<Vec<String>> = BTreeSet::new();
        let mut stack = Vec::new();
        let mut on_stack = vec![false; n];
        let mut visited = vec![false; n];
        for start in 0..n {
            self.dfs_cycles(
                start, &adjacency, &mut stack, &mut on_stack, &mut visited, &mut found,
            );
        }
        found.into_iter().collect()
    }

    #[allow(clippy::too_many_arguments)]
    fn dfs_cycles(
        &self,
        v: usize,
        adjacency: &[Vec<usize>],
        stack: &mut Vec<usize>,
        on_stack: &mut [bool],
        visited: &mut [bool],
        found: &mut BTreeSet<Vec<String>>,
    ) {
        if on_stack[v] {
            // Extract the cycle slice from the recursion stack and rotate it
            // so the smallest key leads, making duplicates collapse.
            let pos = stack.iter().position(|&x| x == v).unwrap();
            let mut cycle: Vec<String> =
                stack[pos..].iter().map(|&i| self.nodes[i].clone()).collect();
            let min_pos = cycle
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| a.cmp(b))
                .map(|(i, _)| i)
                .unwrap_or(0);
            cycle.rotate_left(min_pos);
            found.insert(cycle);
            return;
        }
        if visited[v] {
            return;
        }
        visited[v] = true;
        on_stack[v] = true;
        stack.push(v);
        for &next in &adjacency[v] {
            self.dfs_cycles(next, adjacency, stack, on_stack, visited, found);
        }
        stack.pop();
        on_stack[v] = false;
    }
}

struct TarjanState<'a> {
    adjacency: &'a [Vec<usize>],
    index_counter: usize,
    stack: Vec<usize>,
    on_stack: Vec<bool>,
    indices: Vec<Option<usize>>,
    lowlink: Vec<usize>,
    cyclic: HashSet<usize>,
}

impl TarjanState<'_> {
    fn strongconnect(&mut self, v: usize) {
        self.indices[v] = Some(self.index_counter);
        self.lowlink[v] = self.index_counter;
        self.index_counter += 1;
        self.stack.push(v);
        self.on_stack[v] = true;

        for i in 0..self.adjacency[v].len() {
            let w = self.adjacency[v][i];
            match self.indices[w] {
                None => {
                    self.strongconnect(w);
                    self.lowlink[v] = self.lowlink[v].min(self.lowlink[w]);
                }
                Some(w_index) if self.on_stack[w] => {
                    self.lowlink[v] = self.lowlink[v].min(w_index);
                }
                _ => {}
            }
        }

        if self.lowlink[v] == self.indices[v].unwrap() {
            let mut component = Vec::new();
            while let Some(w) = self.stack.pop() {
                self.on_stack[w] = false;
                component.push(w);
                if w == v {
                    break;
                }
            }
            if component.len() > 1 {
                self.cyclic.extend(component);
            }
        }
    }
}
