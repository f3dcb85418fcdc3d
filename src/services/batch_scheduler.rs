//! Batch scheduler: topological layering of selected roles over the fixed
//! base-type dependency DAG.
//!
//! Dependencies are declared per base type; a role depends on every
//! selected role of each dependency base type (multi-instance). Dependency
//! base types absent from the selection are silently dropped.

use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::role::BaseType;

pub struct BatchScheduler;

impl BatchScheduler {
    /// Compute an ordered list of batches, each safe to run in parallel.
    pub fn plan(role_ids: &[String]) -> EngineResult<Vec<Vec<String>>> {
        let graph = Self::build_graph(role_ids)?;
        let batches = Self::layer(&graph)?;
        Self::validate(&batches, &graph)?;
        debug!(
            roles = role_ids.len(),
            batches = batches.len(),
            "execution batches planned"
        );
        Ok(batches)
    }

    /// Expand base-type edges to concrete role edges.
    fn build_graph(role_ids: &[String]) -> EngineResult<BTreeMap<String, BTreeSet<String>>> {
        let mut by_base: BTreeMap<BaseType, Vec<&String>> = BTreeMap::new();
        for id in role_ids {
            let base = BaseType::from_role_id(id).ok_or_else(|| {
                EngineError::ContractViolation(format!("role id has no base-type prefix: {id}"))
            })?;
            by_base.entry(base).or_default().push(id);
        }

        let mut graph = BTreeMap::new();
        for id in role_ids {
            let base = BaseType::from_role_id(id).unwrap_or(BaseType::V4);
            let mut deps = BTreeSet::new();
            for dep_base in base.dependencies() {
                if let Some(dep_roles) = by_base.get(dep_base) {
                    deps.extend(dep_roles.iter().map(|r| (*r).clone()));
                }
            }
            graph.insert(id.clone(), deps);
        }
        Ok(graph)
    }

    /// Kahn-style layering: each iteration emits every node whose remaining
    /// dependencies were emitted in earlier iterations. Batches are sorted
    /// lexicographically for reproducibility.
    fn layer(graph: &BTreeMap<String, BTreeSet<String>>) -> EngineResult<Vec<Vec<String>>> {
        let mut emitted: BTreeSet<String> = BTreeSet::new();
        let mut remaining: BTreeSet<&String> = graph.keys().collect();
        let mut batches = Vec::new();

        while !remaining.is_empty() {
            let ready: Vec<String> = remaining
                .iter()
                .filter(|id| graph[**id].iter().all(|dep| emitted.contains(dep)))
                .map(|id| (*id).clone())
                .collect();

            if ready.is_empty() {
                let stuck: Vec<String> = remaining.iter().map(|id| (*id).clone()).collect();
                return Err(EngineError::CycleDetected(stuck));
            }

            for id in &ready {
                emitted.insert(id.clone());
                remaining.remove(id);
            }
            // BTreeSet iteration already yields sorted order; keep an
            // explicit sort so the contract survives refactors.
            let mut batch = ready;
            batch.sort();
            batches.push(batch);
        }
        Ok(batches)
    }

    /// Post-check: every dependency sits in a strictly earlier batch and no
    /// two roles within one batch depend on each other.
    fn validate(
        batches: &[Vec<String>],
        graph: &BTreeMap<String, BTreeSet<String>>,
    ) -> EngineResult<()> {
        let mut batch_of: BTreeMap<&str, usize> = BTreeMap::new();
        for (i, batch) in batches.iter().enumerate() {
            for id in batch {
                batch_of.insert(id.as_str(), i);
            }
        }
        for (i, batch) in batches.iter().enumerate() {
            for id in batch {
                for dep in &graph[id] {
                    match batch_of.get(dep.as_str()) {
                        Some(&j) if j < i => {}
                        _ => {
                            return Err(EngineError::Internal(format!(
                                "batch plan violates dependency order: {id} -> {dep}"
                            )))
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
