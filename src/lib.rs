//! # TypeSynth
//!
//! Type-directed pipeline synthesis over a declared catalog of typed
//! transformations. Given functions annotated with domain/codomain types,
//! costs, and confidences, plus typed source values and a goal type, the
//! engine constructs and executes a pipeline (linear or DAG) that produces a
//! value of the goal type, together with a proof term witnessing the type
//! inhabitation and an optional W3C PROV provenance graph.
//!
//! ## Pipeline Architecture
//!
//! ```text
//! Catalog DSL (optional)
//!     ↓
//! [parser]              → Catalog (types, product types, functions)
//!     ↓
//! [synthesis]           → linear plans (backward best-first search)
//! [planner]             → DAG plans (multi-arg / product / fallback)
//!     ↓
//! [executor]            → value (formula / sparql / rest / builtin /
//!     ↓                    unit_conversion / json / template backends)
//! [provenance]          → PROV-O graph (JSON, Turtle, JSON-LD)
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use typesynth::{SynthesisEngine, ExecutionContext, Executor, Value};
//!
//! let engine = SynthesisEngine::from_dsl(r#"
//! type Fuel [unit=kg]
//! type CO2 [unit=kg-CO2]
//!
//! fn fuelToCO2 {
//!   sig: Fuel -> CO2
//!   impl: formula("co2 = fuel * emission_factor")
//!   confidence: 0.98
//! }
//! "#)?;
//!
//! let plans = engine.synthesize("Fuel", "CO2");
//! let mut executor = Executor::new(ExecutionContext::new());
//! let co2 = executor.execute_path(&plans[0].path, &Value::Float(400.0))?;
//! ```
//!
//! Synthesis failures are data (empty plan lists, `None` DAGs); execution
//! failures are errors. The engine itself performs no I/O except through the
//! REST and remote-query backends.

// Core model
pub mod catalog;
pub mod error;
pub mod model;
pub mod proof;
pub mod units;
pub mod value;

// Synthesis
pub mod dag;
pub mod planner;
pub mod synthesis;

// Execution
pub mod executor;

// Provenance (W3C PROV)
pub mod provenance;

// Catalog DSL loader
pub mod parser;

// Configuration system
pub mod config;

// Re-export the working set for convenience
pub use catalog::{Catalog, TypeEntry};
pub use config::Config;
pub use dag::{DagNode, NodeKind, SynthesisDag};
pub use error::{CatalogError, ExecError, ParseError};
pub use executor::{CancelToken, ExecutionContext, Executor};
pub use model::{Domain, FuncDef, FuncImpl, ProductType, TypeDef};
pub use planner::{synthesize_multiarg_full, PlanOptions};
pub use proof::Proof;
pub use provenance::{ProvenanceGraph, ProvenanceTracker};
pub use synthesis::{
    synthesize_backward, SynthesisResult, DEFAULT_MAX_COST, DEFAULT_MAX_RESULTS,
};
pub use units::{UnitConversion, UnitRegistry};
pub use value::Value;

use error::ExecResult;
use std::collections::HashMap;
use tracing::info;

/// High-level façade: a catalog plus synthesize-then-execute conveniences
/// and catalog interrogation.
#[derive(Debug, Clone, Default)]
pub struct SynthesisEngine {
    catalog: Catalog,
}

impl SynthesisEngine {
    pub fn new(catalog: Catalog) -> Self {
        SynthesisEngine { catalog }
    }

    /// Build an engine from catalog DSL text
    pub fn from_dsl(text: &str) -> Result<Self, ParseError> {
        let catalog = parser::parse_dsl(text)?;
        info!(
            types = catalog.type_count(),
            product_types = catalog.product_type_count(),
            funcs = catalog.func_count(),
            "catalog loaded"
        );
        Ok(SynthesisEngine { catalog })
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn catalog_mut(&mut self) -> &mut Catalog {
        &mut self.catalog
    }

    /// Linear plans from `src` to `goal` with default budgets
    pub fn synthesize(&self, src: &str, goal: &str) -> Vec<SynthesisResult> {
        synthesize_backward(&self.catalog, src, goal, DEFAULT_MAX_COST, DEFAULT_MAX_RESULTS)
    }

    /// Linear plans with explicit budget and result cap
    pub fn synthesize_with(
        &self,
        src: &str,
        goal: &str,
        max_cost: f64,
        max_results: usize,
    ) -> Vec<SynthesisResult> {
        synthesize_backward(&self.catalog, src, goal, max_cost, max_results)
    }

    /// DAG plan from several typed sources (ordered `(id, type)` pairs)
    pub fn plan_multi(
        &self,
        sources: &[(String, String)],
        goal: &str,
        opts: &PlanOptions,
    ) -> Option<SynthesisDag> {
        synthesize_multiarg_full(&self.catalog, sources, goal, opts)
    }

    /// Synthesize the best plan from ordered `(type, value)` sources and
    /// execute it in one call. Source ids `src0…srcN` are generated in
    /// order; absence of a plan surfaces as an execution failure.
    pub fn synthesize_and_execute(
        &self,
        sources: &[(String, Value)],
        goal: &str,
        executor: &mut Executor,
    ) -> ExecResult<Value> {
        let typed_sources: Vec<(String, String)> = sources
            .iter()
            .enumerate()
            .map(|(i, (ty, _))| (format!("src{i}"), ty.clone()))
            .collect();

        let dag = self
            .plan_multi(&typed_sources, goal, &PlanOptions::default())
            .ok_or_else(|| ExecError::failed(goal, "no plan found within cost budget"))?;

        let source_values: HashMap<String, Value> = sources
            .iter()
            .enumerate()
            .map(|(i, (_, value))| (format!("src{i}"), value.clone()))
            .collect();

        executor.execute_dag(&dag, &source_values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DSL: &str = r#"
type Input
type Middle
type Output

fn step1 {
  sig: Input -> Middle
  impl: formula("y = x * 2")
  cost: 1
}

fn step2 {
  sig: Middle -> Output
  impl: formula("y = x + 100")
  cost: 1
}
"#;

    #[test]
    fn test_engine_from_dsl() {
        let engine = SynthesisEngine::from_dsl(DSL).unwrap();
        assert_eq!(engine.catalog().func_count(), 2);
        assert!(engine.catalog().get_type("Input").is_some());
    }

    #[test]
    fn test_engine_synthesize() {
        let engine = SynthesisEngine::from_dsl(DSL).unwrap();
        let plans = engine.synthesize("Input", "Output");
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].cost, 2.0);
        assert_eq!(plans[0].proof_string(), "step1 ∘ step2");
    }

    #[test]
    fn test_synthesize_and_execute() {
        let engine = SynthesisEngine::from_dsl(DSL).unwrap();
        let mut executor = Executor::new(ExecutionContext::new());

        let result = engine
            .synthesize_and_execute(
                &[("Input".to_string(), Value::Float(10.0))],
                "Output",
                &mut executor,
            )
            .unwrap();

        // 10 * 2 = 20, 20 + 100 = 120
        assert_eq!(result, Value::Float(120.0));
    }

    #[test]
    fn test_synthesize_and_execute_no_plan() {
        let engine = SynthesisEngine::from_dsl(DSL).unwrap();
        let mut executor = Executor::new(ExecutionContext::new());

        let err = engine
            .synthesize_and_execute(
                &[("Output".to_string(), Value::Float(1.0))],
                "Input",
                &mut executor,
            )
            .unwrap_err();
        assert!(matches!(err, ExecError::Failed { .. }));
    }
}
