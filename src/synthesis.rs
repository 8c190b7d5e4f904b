//! # Single-Source Synthesis
//!
//! Backward best-first search over the catalog: start from the goal type and
//! extend the frontier toward the source type by prepending functions whose
//! codomain matches the current type. Dijkstra-style closing keeps the search
//! finite on cyclic function graphs; non-negative costs bounded by `max_cost`
//! guarantee termination.

use crate::catalog::Catalog;
use crate::model::FuncDef;
use crate::proof::Proof;
use serde_json::{json, Value as Json};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use tracing::debug;

/// Default search budget when callers do not supply one
pub const DEFAULT_MAX_COST: f64 = 10.0;

/// Default cap on the number of returned plans
pub const DEFAULT_MAX_RESULTS: usize = 5;

/// A linear plan: ordered function list with its cost, confidence, and proof
#[derive(Debug, Clone)]
pub struct SynthesisResult {
    /// Sum of function costs along the path
    pub cost: f64,
    /// Product of function confidences along the path
    pub confidence: f64,
    /// Functions in application order (source to goal)
    pub path: Vec<FuncDef>,
    pub proof: Proof,
}

impl SynthesisResult {
    pub fn proof_string(&self) -> String {
        self.proof.compact()
    }

    /// Plan serialisation: `{cost, confidence_est, steps, proof}`
    pub fn to_json(&self) -> Json {
        json!({
            "cost": self.cost,
            "confidence_est": self.confidence,
            "steps": self.path.iter().map(|f| json!({
                "id": f.id,
                "sig": f.signature(),
                "cost": f.cost,
                "conf": f.conf,
            })).collect::<Vec<_>>(),
            "proof": self.proof.compact(),
        })
    }
}

/// Frontier entry. Ordered by cumulative cost with a monotonically
/// increasing tiebreak counter, so function records are never compared.
struct State {
    cost: f64,
    seq: u64,
    ty: String,
    /// Path in source-to-goal order (functions are prepended on expansion)
    path: Vec<FuncDef>,
    conf: f64,
}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        self.cost == other.cost && self.seq == other.seq
    }
}

impl Eq for State {}

impl PartialOrd for State {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for State {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cost
            .total_cmp(&other.cost)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

/// Backward best-first search from `goal` to `src`.
///
/// Multi-argument functions are skipped here; they are the DAG planner's
/// territory. Results are returned in non-decreasing cost order, ties broken
/// by discovery order. An empty result list means no plan exists within the
/// budget; that is data, not an error.
pub fn synthesize_backward(
    catalog: &Catalog,
    src: &str,
    goal: &str,
    max_cost: f64,
    max_results: usize,
) -> Vec<SynthesisResult> {
    let mut frontier = BinaryHeap::new();
    let mut best_cost_seen: HashMap<String, f64> = HashMap::new();
    let mut results = Vec::new();
    let mut seq: u64 = 0;

    frontier.push(Reverse(State {
        cost: 0.0,
        seq,
        ty: goal.to_string(),
        path: Vec::new(),
        conf: 1.0,
    }));

    while let Some(Reverse(state)) = frontier.pop() {
        if state.ty == src {
            // The path is already in source-to-goal order
            results.push(SynthesisResult {
                cost: state.cost,
                confidence: state.conf,
                proof: Proof::path(src, &state.path),
                path: state.path,
            });
            if results.len() >= max_results {
                break;
            }
            continue;
        }

        // Dijkstra closing: the first pop of a type is minimal; later
        // arrivals are never strictly better
        match best_cost_seen.get(&state.ty) {
            Some(&seen) if state.cost >= seen => continue,
            _ => {
                best_cost_seen.insert(state.ty.clone(), state.cost);
            }
        }

        for func in catalog.funcs_returning(&state.ty) {
            if func.is_multiarg() {
                continue;
            }
            let next_cost = state.cost + func.cost;
            if next_cost > max_cost {
                continue;
            }

            seq += 1;
            let mut path = Vec::with_capacity(state.path.len() + 1);
            path.push(func.clone());
            path.extend_from_slice(&state.path);

            frontier.push(Reverse(State {
                cost: next_cost,
                seq,
                ty: func.dom_types()[0].clone(),
                path,
                conf: state.conf * func.conf,
            }));
        }
    }

    debug!(
        src,
        goal,
        results = results.len(),
        expanded = best_cost_seen.len(),
        "backward search finished"
    );

    results
}
