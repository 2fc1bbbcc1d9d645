//! Dependency graph between queued transactions
//!
//! Edges are declared explicitly at submission. A dependency may name an id
//! that is not (yet) queued; such edges are still tracked so that a later
//! submission cannot close a cycle through them.

use crate::error::{TxQueueError, TxQueueResult};
use crate::types::TxId;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Dependency graph for queued transactions
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    /// Forward edges: tx -> transactions that depend on it
    forward: HashMap<TxId, Vec<TxId>>,
    /// Backward edges: tx -> transactions it depends on, declaration order
    backward: HashMap<TxId, Vec<TxId>>,
}

impl DependencyGraph {
    /// Create a new empty dependency graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `tx_id` with its dependencies
    ///
    /// Fails with `CircularDependency` when the edges would close a cycle,
    /// leaving the graph untouched.
    pub fn insert(&mut self, tx_id: TxId, dependencies: Vec<TxId>) -> TxQueueResult<()> {
        if self.would_create_cycle(&tx_id, &dependencies) {
            return Err(TxQueueError::CircularDependency(tx_id));
        }

        for dep in &dependencies {
            self.forward.entry(dep.clone()).or_default().push(tx_id.clone());
        }
        self.backward.insert(tx_id, dependencies);
        Ok(())
    }

    /// Drop `tx_id` and the edges it declared
    ///
    /// Edges declared by other transactions towards `tx_id` are kept: their
    /// dependency on it now counts as satisfied, but the reference remains.
    pub fn remove(&mut self, tx_id: &TxId) {
        let Some(deps) = self.backward.remove(tx_id) else {
            return;
        };

        for dep in deps {
            if let Some(dependents) = self.forward.get_mut(&dep) {
                dependents.retain(|d| d != tx_id);
                if dependents.is_empty() {
                    self.forward.remove(&dep);
                }
            }
        }
    }

    /// Transactions `tx_id` depends on
    pub fn dependencies(&self, tx_id: &TxId) -> &[TxId] {
        self.backward.get(tx_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Transactions that depend on `tx_id`
    pub fn dependents(&self, tx_id: &TxId) -> &[TxId] {
        self.forward.get(tx_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Check if transaction declared any dependencies
    pub fn has_dependencies(&self, tx_id: &TxId) -> bool {
        !self.dependencies(tx_id).is_empty()
    }

    /// Whether adding `tx_id -> dependencies` would close a cycle
    ///
    /// Walks backward edges from every new dependency looking for `tx_id`.
    pub fn would_create_cycle(&self, tx_id: &TxId, dependencies: &[TxId]) -> bool {
        let mut stack: Vec<&TxId> = dependencies.iter().collect();
        let mut visited: HashSet<&TxId> = HashSet::new();

        while let Some(current) = stack.pop() {
            if current == tx_id {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            stack.extend(self.dependencies(current));
        }

        false
    }

    /// Number of registered transactions
    pub fn len(&self) -> usize {
        self.backward.len()
    }

    /// Whether no transaction is registered
    pub fn is_empty(&self) -> bool {
        self.backward.is_empty()
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.forward.clear();
        self.backward.clear();
    }

    /// Ordered snapshot: tx -> dependencies
    pub fn snapshot(&self) -> BTreeMap<TxId, Vec<TxId>> {
        self.backward
            .iter()
            .map(|(id, deps)| (id.clone(), deps.clone()))
            .collect()
    }
}
