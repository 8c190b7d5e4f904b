//! # Multi-Source Planner
//!
//! Produces a DAG plan from several typed sources to a goal type by trying
//! three strategies and selecting one:
//!
//! - **A — direct multi-argument goal**: a multi-arg function with the goal
//!   codomain, each argument supplied by a source (direct type match) or by a
//!   single-source backward search.
//! - **B — via product type**: a declared product type with a path to the
//!   goal; components resolved as in A, then the aggregator path applied to
//!   the assembled tuple.
//! - **C — single-path fallback**: the best linear path from any one source.
//!
//! A source is consumed at most once per candidate, whether it satisfies an
//! argument directly or through a search. Iteration over sources follows the
//! order given by the caller, so planning is deterministic.

use crate::catalog::Catalog;
use crate::dag::{DagNode, NodeKind, SynthesisDag};
use crate::model::FuncDef;
use crate::proof::Proof;
use crate::synthesis::synthesize_backward;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// Planner knobs
#[derive(Debug, Clone)]
pub struct PlanOptions {
    /// Total cost budget shared by the aggregator and all argument paths
    pub max_cost: f64,
    /// Prefer strategies in the order A, B, C regardless of cost; when
    /// false, the global cost minimum across all strategies wins
    pub prefer_multiarg: bool,
}

impl Default for PlanOptions {
    fn default() -> Self {
        PlanOptions {
            max_cost: 20.0,
            prefer_multiarg: true,
        }
    }
}

/// How one required argument type was satisfied
struct ArgResolution {
    /// Index into the caller's source list
    source_index: usize,
    /// Conversion path from the source type to the argument type; empty for
    /// a direct type match
    path: Vec<FuncDef>,
    cost: f64,
    conf: f64,
    proof: Proof,
}

/// Synthesize a DAG plan from `sources` (ordered `(id, type)` pairs) to
/// `goal`. Returns `None` when all three strategies fail within the budget.
pub fn synthesize_multiarg_full(
    catalog: &Catalog,
    sources: &[(String, String)],
    goal: &str,
    opts: &PlanOptions,
) -> Option<SynthesisDag> {
    if sources.is_empty() {
        return None;
    }

    let mut direct = strategy_direct(catalog, sources, goal, opts.max_cost);
    let mut via_product = strategy_product(catalog, sources, goal, opts.max_cost);
    let mut fallback = strategy_fallback(catalog, sources, goal, opts.max_cost);

    sort_by_cost(&mut direct);
    sort_by_cost(&mut via_product);
    sort_by_cost(&mut fallback);

    debug!(
        direct = direct.len(),
        via_product = via_product.len(),
        fallback = fallback.len(),
        "planner candidates"
    );

    let chosen = if opts.prefer_multiarg {
        direct
            .into_iter()
            .next()
            .or_else(|| via_product.into_iter().next())
            .or_else(|| fallback.into_iter().next())
    } else {
        // Global cost minimum; ties resolve in strategy order A, B, C, then
        // discovery order
        let mut best: Option<SynthesisDag> = None;
        for dag in direct
            .into_iter()
            .chain(via_product)
            .chain(fallback)
        {
            let better = match &best {
                Some(current) => dag.total_cost < current.total_cost,
                None => true,
            };
            if better {
                best = Some(dag);
            }
        }
        best
    };

    if let Some(dag) = &chosen {
        info!(
            goal,
            cost = dag.total_cost,
            confidence = dag.total_confidence,
            proof = %dag.proof_string(),
            "plan selected"
        );
    }
    chosen
}

fn sort_by_cost(dags: &mut [SynthesisDag]) {
    dags.sort_by(|a, b| a.total_cost.total_cmp(&b.total_cost));
}

/// Strategy A: a multi-argument function whose codomain is the goal
fn strategy_direct(
    catalog: &Catalog,
    sources: &[(String, String)],
    goal: &str,
    max_cost: f64,
) -> Vec<SynthesisDag> {
    let mut candidates = Vec::new();

    for agg in catalog.funcs_returning(goal) {
        if !agg.is_multiarg() {
            continue;
        }
        let budget = max_cost - agg.cost;
        if budget < 0.0 {
            continue;
        }

        if let Some(resolutions) = resolve_args(catalog, sources, agg.dom_types(), budget) {
            candidates.push(build_dag(
                sources,
                resolutions,
                goal,
                GoalApply::Func(agg.clone()),
            ));
        }
    }

    candidates
}

/// Strategy B: assemble a declared product type, then run its path to the
/// goal
fn strategy_product(
    catalog: &Catalog,
    sources: &[(String, String)],
    goal: &str,
    max_cost: f64,
) -> Vec<SynthesisDag> {
    let mut candidates = Vec::new();

    for product in catalog.product_types_ordered() {
        let aggregators = synthesize_backward(catalog, &product.name, goal, max_cost, 1);
        let Some(aggregator) = aggregators.into_iter().next() else {
            continue;
        };
        if aggregator.path.is_empty() {
            // The product type itself is the goal; nothing to apply
            continue;
        }
        let budget = max_cost - aggregator.cost;

        if let Some(resolutions) = resolve_args(catalog, sources, &product.components, budget) {
            candidates.push(build_dag(
                sources,
                resolutions,
                goal,
                GoalApply::Path(aggregator.path),
            ));
        }
    }

    candidates
}

/// Strategy C: the best linear path from any single source
fn strategy_fallback(
    catalog: &Catalog,
    sources: &[(String, String)],
    goal: &str,
    max_cost: f64,
) -> Vec<SynthesisDag> {
    let mut candidates = Vec::new();

    for (source_id, source_type) in sources {
        let results = synthesize_backward(catalog, source_type, goal, max_cost, 1);
        let Some(best) = results.into_iter().next() else {
            continue;
        };

        let mut nodes = HashMap::new();
        nodes.insert(
            source_id.clone(),
            DagNode::source(source_id.clone(), source_type.clone()),
        );
        nodes.insert(
            "goal".to_string(),
            DagNode {
                id: "goal".to_string(),
                kind: NodeKind::Goal,
                type_name: goal.to_string(),
                func: None,
                path: best.path.clone(),
                inputs: vec![source_id.clone()],
            },
        );

        candidates.push(SynthesisDag {
            nodes,
            source_nodes: vec![source_id.clone()],
            goal_node: "goal".to_string(),
            total_cost: best.cost,
            total_confidence: best.confidence,
            proof: best.proof,
        });
    }

    candidates
}

/// Resolve each required argument type against the sources, consuming each
/// source at most once. Direct type matches are preferred; otherwise the
/// first unused source with a backward path within the remaining budget is
/// taken.
fn resolve_args(
    catalog: &Catalog,
    sources: &[(String, String)],
    arg_types: &[String],
    budget: f64,
) -> Option<Vec<ArgResolution>> {
    let mut used: HashSet<usize> = HashSet::new();
    let mut remaining = budget;
    let mut resolutions = Vec::with_capacity(arg_types.len());

    for arg_type in arg_types {
        let direct = sources
            .iter()
            .enumerate()
            .find(|(i, (_, ty))| !used.contains(i) && ty == arg_type)
            .map(|(i, _)| i);

        if let Some(i) = direct {
            used.insert(i);
            resolutions.push(ArgResolution {
                source_index: i,
                path: Vec::new(),
                cost: 0.0,
                conf: 1.0,
                proof: Proof::identity(arg_type),
            });
            continue;
        }

        let mut searched = None;
        for (i, (_, source_type)) in sources.iter().enumerate() {
            if used.contains(&i) {
                continue;
            }
            let results = synthesize_backward(catalog, source_type, arg_type, remaining, 1);
            if let Some(best) = results.into_iter().next() {
                searched = Some((i, best));
                break;
            }
        }

        let (i, best) = searched?;
        used.insert(i);
        remaining -= best.cost;
        resolutions.push(ArgResolution {
            source_index: i,
            cost: best.cost,
            conf: best.confidence,
            proof: best.proof,
            path: best.path,
        });
    }

    Some(resolutions)
}

/// Terminal application of a DAG under construction
enum GoalApply {
    /// Strategy A: a single multi-argument function
    Func(FuncDef),
    /// Strategy B: the product-to-goal path
    Path(Vec<FuncDef>),
}

fn build_dag(
    sources: &[(String, String)],
    resolutions: Vec<ArgResolution>,
    goal: &str,
    apply: GoalApply,
) -> SynthesisDag {
    let mut nodes = HashMap::new();
    let mut source_nodes = Vec::new();
    let mut goal_inputs = Vec::new();
    let mut child_proofs = Vec::new();
    let mut args_cost = 0.0;
    let mut args_conf = 1.0;

    for (position, resolution) in resolutions.iter().enumerate() {
        let (source_id, source_type) = &sources[resolution.source_index];
        if !nodes.contains_key(source_id) {
            nodes.insert(
                source_id.clone(),
                DagNode::source(source_id.clone(), source_type.clone()),
            );
            source_nodes.push(source_id.clone());
        }

        if resolution.path.is_empty() {
            goal_inputs.push(source_id.clone());
        } else {
            let transform_id = format!("transform_{position}");
            let produced = resolution
                .path
                .last()
                .map(|f| f.cod.clone())
                .unwrap_or_else(|| source_type.clone());
            nodes.insert(
                transform_id.clone(),
                DagNode::transform(
                    transform_id.clone(),
                    produced,
                    resolution.path.clone(),
                    source_id.clone(),
                ),
            );
            goal_inputs.push(transform_id);
        }

        args_cost += resolution.cost;
        args_conf *= resolution.conf;
        child_proofs.push(resolution.proof.clone());
    }

    let tuple_proof = Proof::tuple(child_proofs);
    let (goal_node, proof, total_cost, total_confidence) = match apply {
        GoalApply::Func(func) => {
            let proof = Proof::compose(vec![tuple_proof, Proof::func(&func)]);
            let cost = args_cost + func.cost;
            let conf = args_conf * func.conf;
            (
                DagNode {
                    id: "goal".to_string(),
                    kind: NodeKind::Goal,
                    type_name: goal.to_string(),
                    func: Some(func),
                    path: Vec::new(),
                    inputs: goal_inputs,
                },
                proof,
                cost,
                conf,
            )
        }
        GoalApply::Path(path) => {
            let mut parts = vec![tuple_proof];
            parts.extend(path.iter().map(Proof::func));
            let proof = Proof::compose(parts);
            let cost = args_cost + path.iter().map(|f| f.cost).sum::<f64>();
            let conf = args_conf * path.iter().map(|f| f.conf).product::<f64>();
            (
                DagNode {
                    id: "goal".to_string(),
                    kind: NodeKind::Goal,
                    type_name: goal.to_string(),
                    func: None,
                    path,
                    inputs: goal_inputs,
                },
                proof,
                cost,
                conf,
            )
        }
    };

    nodes.insert("goal".to_string(), goal_node);

    SynthesisDag {
        nodes,
        source_nodes,
        goal_node: "goal".to_string(),
        total_cost,
        total_confidence,
        proof,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ProductType, TypeDef};

    fn scope_catalog() -> Catalog {
        let mut catalog = Catalog::new();
        for name in ["Fuel", "Elec", "Scope1", "Scope2", "Scope3", "Total"] {
            catalog
                .add_type(TypeDef::with_attrs(name, [("unit", "kg-CO2")]))
                .unwrap();
        }
        catalog
            .add_func(
                FuncDef::formula("fuelToScope1", "Fuel", "Scope1", "value * 2.5")
                    .with_cost(1.0)
                    .with_conf(0.95),
            )
            .unwrap();
        catalog
            .add_func(
                FuncDef::formula("elecToScope2", "Elec", "Scope2", "value * 0.5")
                    .with_cost(1.0)
                    .with_conf(0.9),
            )
            .unwrap();
        catalog
            .add_func(FuncDef::formula(
                "agg",
                vec!["Scope1", "Scope2", "Scope3"],
                "Total",
                "scope1 + scope2 + scope3",
            ))
            .unwrap();
        catalog
    }

    fn scope_sources() -> Vec<(String, String)> {
        vec![
            ("fuel".to_string(), "Fuel".to_string()),
            ("elec".to_string(), "Elec".to_string()),
            ("scope3".to_string(), "Scope3".to_string()),
        ]
    }

    #[test]
    fn test_strategy_direct_builds_aggregate_dag() {
        let catalog = scope_catalog();
        let dag = synthesize_multiarg_full(
            &catalog,
            &scope_sources(),
            "Total",
            &PlanOptions::default(),
        )
        .expect("plan");

        // 3 sources + 2 transforms + goal
        assert_eq!(dag.nodes.len(), 6);
        assert_eq!(dag.total_cost, 3.0);
        assert!((dag.total_confidence - 0.95 * 0.9).abs() < 1e-12);

        let goal = &dag.nodes[&dag.goal_node];
        assert_eq!(goal.inputs.len(), 3);
        assert_eq!(goal.func.as_ref().map(|f| f.id.as_str()), Some("agg"));

        let proof = dag.proof_string();
        assert!(proof.contains('⟨'));
        assert!(proof.ends_with("∘ agg"));
    }

    #[test]
    fn test_source_consumed_once() {
        let mut catalog = Catalog::new();
        catalog.add_type(TypeDef::new("X")).unwrap();
        catalog.add_type(TypeDef::new("Y")).unwrap();
        catalog
            .add_func(FuncDef::new("pair", vec!["X", "X"], "Y"))
            .unwrap();

        let one_source = vec![("only".to_string(), "X".to_string())];
        let dag = synthesize_multiarg_full(&catalog, &one_source, "Y", &PlanOptions::default());
        assert!(dag.is_none());

        let two_sources = vec![
            ("first".to_string(), "X".to_string()),
            ("second".to_string(), "X".to_string()),
        ];
        let dag = synthesize_multiarg_full(&catalog, &two_sources, "Y", &PlanOptions::default())
            .expect("plan");
        let goal = &dag.nodes[&dag.goal_node];
        assert_eq!(goal.inputs, vec!["first".to_string(), "second".to_string()]);
    }

    #[test]
    fn test_strategy_product_route() {
        let mut catalog = Catalog::new();
        for name in ["Scope1", "Scope2", "Scope3", "Total"] {
            catalog.add_type(TypeDef::new(name)).unwrap();
        }
        catalog
            .add_product_type(ProductType::new("AllScopes", ["Scope1", "Scope2", "Scope3"]))
            .unwrap();
        catalog
            .add_func(FuncDef::formula(
                "aggregateAllScopes",
                "AllScopes",
                "Total",
                "scope1 + scope2 + scope3",
            ))
            .unwrap();

        let sources = vec![
            ("s1".to_string(), "Scope1".to_string()),
            ("s2".to_string(), "Scope2".to_string()),
            ("s3".to_string(), "Scope3".to_string()),
        ];
        let dag = synthesize_multiarg_full(&catalog, &sources, "Total", &PlanOptions::default())
            .expect("plan");

        let goal = &dag.nodes[&dag.goal_node];
        assert!(goal.func.is_none());
        assert_eq!(goal.path.len(), 1);
        assert_eq!(goal.path[0].id, "aggregateAllScopes");
        assert!(dag.proof_string().contains("aggregateAllScopes"));
    }

    #[test]
    fn test_fallback_single_path() {
        let mut catalog = Catalog::new();
        catalog.add_type(TypeDef::new("A")).unwrap();
        catalog.add_type(TypeDef::new("B")).unwrap();
        catalog
            .add_func(FuncDef::new("f", "A", "B").with_cost(1.0).with_conf(0.9))
            .unwrap();

        let sources = vec![("a".to_string(), "A".to_string())];
        let dag = synthesize_multiarg_full(&catalog, &sources, "B", &PlanOptions::default())
            .expect("plan");

        assert_eq!(dag.nodes.len(), 2);
        assert_eq!(dag.total_cost, 1.0);
        assert_eq!(dag.proof_string(), "f");
    }

    #[test]
    fn test_cost_minimum_selection() {
        // Strategy A exists but is expensive; with prefer_multiarg=false the
        // cheap linear fallback must win
        let mut catalog = Catalog::new();
        for name in ["A", "B", "Goal"] {
            catalog.add_type(TypeDef::new(name)).unwrap();
        }
        catalog
            .add_func(FuncDef::new("expensive", vec!["A", "B"], "Goal").with_cost(9.0))
            .unwrap();
        catalog
            .add_func(FuncDef::new("cheap", "A", "Goal").with_cost(1.0))
            .unwrap();

        let sources = vec![
            ("a".to_string(), "A".to_string()),
            ("b".to_string(), "B".to_string()),
        ];

        let preferred = synthesize_multiarg_full(
            &catalog,
            &sources,
            "Goal",
            &PlanOptions {
                prefer_multiarg: true,
                ..PlanOptions::default()
            },
        )
        .expect("plan");
        assert_eq!(preferred.total_cost, 9.0);

        let cheapest = synthesize_multiarg_full(
            &catalog,
            &sources,
            "Goal",
            &PlanOptions {
                prefer_multiarg: false,
                ..PlanOptions::default()
            },
        )
        .expect("plan");
        assert_eq!(cheapest.total_cost, 1.0);
    }

    #[test]
    fn test_no_plan_returns_none() {
        let mut catalog = Catalog::new();
        catalog.add_type(TypeDef::new("A")).unwrap();
        catalog.add_type(TypeDef::new("Goal")).unwrap();

        let sources = vec![("a".to_string(), "A".to_string())];
        assert!(
            synthesize_multiarg_full(&catalog, &sources, "Goal", &PlanOptions::default()).is_none()
        );
    }
}
