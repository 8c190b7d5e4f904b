//! # DAG Plans
//!
//! Multi-input plans produced by the multi-source planner: a directed acyclic
//! graph of source / transform / aggregate / goal nodes keyed by string id.
//! Inputs are edges by id, not owning pointers, so reference cycles cannot
//! arise; topological order is computed on demand by a DFS from the goal.

use crate::model::FuncDef;
use crate::proof::Proof;
use serde_json::{json, Map, Value as Json};
use std::collections::{HashMap, HashSet};

/// Node kind within a synthesis DAG
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// External input; bears the source type
    Source,
    /// Applies a linear sub-path to one input
    Transform,
    /// Applies a function to multiple inputs assembled as a tuple
    Aggregate,
    /// Terminal node; may itself behave as an aggregate or a transform
    Goal,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Source => "source",
            NodeKind::Transform => "transform",
            NodeKind::Aggregate => "aggregate",
            NodeKind::Goal => "goal",
        }
    }
}

/// A node in a synthesis DAG
#[derive(Debug, Clone)]
pub struct DagNode {
    pub id: String,
    pub kind: NodeKind,
    /// Type of the value this node produces
    pub type_name: String,
    /// Single function applied by an aggregate node (when it has no path)
    pub func: Option<FuncDef>,
    /// Linear sub-path applied by transform/aggregate/goal nodes
    pub path: Vec<FuncDef>,
    /// Input node ids in argument order
    pub inputs: Vec<String>,
}

impl DagNode {
    pub fn source(id: impl Into<String>, type_name: impl Into<String>) -> Self {
        DagNode {
            id: id.into(),
            kind: NodeKind::Source,
            type_name: type_name.into(),
            func: None,
            path: Vec::new(),
            inputs: Vec::new(),
        }
    }

    pub fn transform(
        id: impl Into<String>,
        type_name: impl Into<String>,
        path: Vec<FuncDef>,
        input: impl Into<String>,
    ) -> Self {
        DagNode {
            id: id.into(),
            kind: NodeKind::Transform,
            type_name: type_name.into(),
            func: None,
            path,
            inputs: vec![input.into()],
        }
    }

    /// Functions this node applies, in order
    pub fn funcs(&self) -> Vec<&FuncDef> {
        if !self.path.is_empty() {
            self.path.iter().collect()
        } else {
            self.func.iter().collect()
        }
    }
}

/// A multi-input plan with its total cost, confidence, and proof term
#[derive(Debug, Clone)]
pub struct SynthesisDag {
    pub nodes: HashMap<String, DagNode>,
    pub source_nodes: Vec<String>,
    pub goal_node: String,
    /// Sum over every function occurrence in every node's path
    pub total_cost: f64,
    /// Product over the same multiset
    pub total_confidence: f64,
    pub proof: Proof,
}

impl SynthesisDag {
    /// Topological order by DFS from the goal through `inputs`; a node's
    /// value is available before any dependent node is visited. The order is
    /// stable because input lists are ordered.
    pub fn topological_order(&self) -> Vec<String> {
        let mut visited = HashSet::new();
        let mut order = Vec::new();
        self.visit(&self.goal_node, &mut visited, &mut order);
        order
    }

    fn visit(&self, id: &str, visited: &mut HashSet<String>, order: &mut Vec<String>) {
        if !visited.insert(id.to_string()) {
            return;
        }
        if let Some(node) = self.nodes.get(id) {
            for input in &node.inputs {
                self.visit(input, visited, order);
            }
        }
        order.push(id.to_string());
    }

    pub fn proof_string(&self) -> String {
        self.proof.compact()
    }

    /// Plan serialisation:
    /// `{nodes, source_nodes, goal_node, total_cost, total_confidence,
    /// proof, proof_tree}`
    pub fn to_json(&self) -> Json {
        let mut nodes = Map::new();
        // Serialise in topological order so output is reproducible
        for id in self.topological_order() {
            let node = &self.nodes[&id];
            nodes.insert(
                id.clone(),
                json!({
                    "type": node.kind.as_str(),
                    "type_name": node.type_name,
                    "func": node.func.as_ref().map(|f| f.id.clone()),
                    "func_sig": node.func.as_ref().map(|f| f.signature()),
                    "inputs": node.inputs,
                    "path": node.path.iter().map(|f| f.id.clone()).collect::<Vec<_>>(),
                }),
            );
        }

        json!({
            "nodes": nodes,
            "source_nodes": self.source_nodes,
            "goal_node": self.goal_node,
            "total_cost": self.total_cost,
            "total_confidence": self.total_confidence,
            "proof": self.proof.compact(),
            "proof_tree": self.proof.tree(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_level_dag() -> SynthesisDag {
        let s1 = FuncDef::new("toB", "A", "B");
        let agg = FuncDef::new("agg", vec!["B", "C"], "Goal");

        let mut nodes = HashMap::new();
        nodes.insert("a".to_string(), DagNode::source("a", "A"));
        nodes.insert("c".to_string(), DagNode::source("c", "C"));
        nodes.insert(
            "t0".to_string(),
            DagNode::transform("t0", "B", vec![s1.clone()], "a"),
        );
        nodes.insert(
            "goal".to_string(),
            DagNode {
                id: "goal".to_string(),
                kind: NodeKind::Goal,
                type_name: "Goal".to_string(),
                func: Some(agg.clone()),
                path: Vec::new(),
                inputs: vec!["t0".to_string(), "c".to_string()],
            },
        );

        SynthesisDag {
            nodes,
            source_nodes: vec!["a".to_string(), "c".to_string()],
            goal_node: "goal".to_string(),
            total_cost: 2.0,
            total_confidence: 1.0,
            proof: Proof::compose(vec![
                Proof::tuple(vec![Proof::func(&s1), Proof::identity("C")]),
                Proof::func(&agg),
            ]),
        }
    }

    #[test]
    fn test_topological_order_respects_inputs() {
        let dag = two_level_dag();
        let order = dag.topological_order();

        let position = |id: &str| order.iter().position(|n| n == id).unwrap();
        assert!(position("a") < position("t0"));
        assert!(position("t0") < position("goal"));
        assert!(position("c") < position("goal"));
        assert_eq!(order.last().map(String::as_str), Some("goal"));
    }

    #[test]
    fn test_topological_order_is_stable() {
        let dag = two_level_dag();
        assert_eq!(dag.topological_order(), dag.topological_order());
    }

    #[test]
    fn test_plan_json_shape() {
        let dag = two_level_dag();
        let json = dag.to_json();

        assert_eq!(json["goal_node"], "goal");
        assert_eq!(json["nodes"]["goal"]["type"], "goal");
        assert_eq!(json["nodes"]["goal"]["func"], "agg");
        assert_eq!(json["nodes"]["t0"]["path"][0], "toB");
        assert!(json["proof"].as_str().unwrap().contains('⟨'));
        assert!(json["proof_tree"].as_str().unwrap().contains("COMPOSE:"));
    }
}
