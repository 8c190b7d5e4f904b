//! Catalog DSL integration: parser plus synthesis and execution over
//! DSL-declared catalogs.

use typesynth::parser::{parse_dsl, parse_dsl_file};
use typesynth::{ExecutionContext, Executor, PlanOptions, SynthesisEngine, Value};

const GHG_DSL: &str = r#"
# GHG Scope 1/2/3 aggregation catalog
type Facility
type Organization
type Fuel [unit=kg]
type Electricity [unit=kWh]
type Scope1Emissions [unit=kg-CO2]
type Scope2Emissions [unit=kg-CO2]
type Scope3Emissions [unit=kg-CO2]
type TotalGHGEmissions [unit=kg-CO2]

type AllScopesEmissions = Scope1Emissions x Scope2Emissions x Scope3Emissions

fn facilityFuelConsumption {
  sig: Facility -> Fuel
  impl: sparql("SELECT ?fuel WHERE { ?facility :consumesFuel ?fuel }")
  cost: 1
  confidence: 0.9
}

fn fuelToScope1 {
  sig: Fuel -> Scope1Emissions
  impl: formula("co2 = value * 2.5")
  cost: 1
  confidence: 0.95
}

fn facilityElectricity {
  sig: Facility -> Electricity
  impl: sparql("SELECT ?elec WHERE { ?facility :usesElectricity ?elec }")
  cost: 1
  confidence: 0.9
}

fn electricityToScope2 {
  sig: Electricity -> Scope2Emissions
  impl: formula("co2 = value * 0.5")
  cost: 1
  confidence: 0.95
}

fn organizationTravel {
  sig: Organization -> Scope3Emissions
  impl: sparql("SELECT ?t WHERE { ?org :travelEmissions ?t }")
  cost: 2
  confidence: 0.8
}

fn aggregateScopes {
  sig: (Scope1Emissions, Scope2Emissions, Scope3Emissions) -> TotalGHGEmissions
  impl: formula("total = scope1 + scope2 + scope3")
  cost: 1
  confidence: 1.0
}

fn aggregateAllScopes {
  sig: AllScopesEmissions -> TotalGHGEmissions
  impl: formula("total = scope1 + scope2 + scope3")
  cost: 1
  confidence: 1.0
}
"#;

#[test]
fn test_ghg_catalog_loads() {
    let catalog = parse_dsl(GHG_DSL).unwrap();
    assert_eq!(catalog.type_count(), 8);
    assert_eq!(catalog.product_type_count(), 1);
    assert_eq!(catalog.func_count(), 7);

    let multiarg: Vec<&str> = catalog
        .funcs()
        .iter()
        .filter(|f| f.is_multiarg())
        .map(|f| f.id.as_str())
        .collect();
    assert_eq!(multiarg, vec!["aggregateScopes"]);
}

#[test]
fn test_scope_paths_from_facility() {
    let engine = SynthesisEngine::from_dsl(GHG_DSL).unwrap();

    let scope1 = engine.synthesize("Facility", "Scope1Emissions");
    assert!(!scope1.is_empty());
    assert_eq!(
        scope1[0].proof_string(),
        "facilityFuelConsumption ∘ fuelToScope1"
    );

    let scope2 = engine.synthesize("Facility", "Scope2Emissions");
    assert!(!scope2.is_empty());
    let ids: Vec<&str> = scope2[0].path.iter().map(|f| f.id.as_str()).collect();
    assert_eq!(ids, vec!["facilityElectricity", "electricityToScope2"]);
}

#[test]
fn test_aggregation_path_from_product_type() {
    let engine = SynthesisEngine::from_dsl(GHG_DSL).unwrap();
    let results = engine.synthesize("AllScopesEmissions", "TotalGHGEmissions");
    assert!(!results.is_empty());
    assert_eq!(results[0].proof_string(), "aggregateAllScopes");
}

#[test]
fn test_full_ghg_dag_synthesis_and_execution() {
    let engine = SynthesisEngine::from_dsl(GHG_DSL).unwrap();
    let sources = vec![
        ("facility_scope1".to_string(), "Facility".to_string()),
        ("facility_scope2".to_string(), "Facility".to_string()),
        ("organization_scope3".to_string(), "Organization".to_string()),
    ];

    let dag = engine
        .plan_multi(&sources, "TotalGHGEmissions", &PlanOptions::default())
        .expect("plan");
    assert!(dag.proof_string().contains("aggregateScopes"));

    // The remote-query mock resolves each facility record; fuel 400 becomes
    // scope1 1000, elec 3000 becomes scope2 1500, travel 800 passes through
    let values = std::collections::HashMap::from([
        (
            "facility_scope1".to_string(),
            Value::record([("fuel", Value::Float(400.0))]),
        ),
        (
            "facility_scope2".to_string(),
            Value::record([("elec", Value::Float(3000.0))]),
        ),
        (
            "organization_scope3".to_string(),
            Value::record([("value", Value::Float(800.0))]),
        ),
    ]);

    let mut executor = Executor::new(ExecutionContext::new());
    let result = executor.execute_dag(&dag, &values).unwrap();
    // scope3 mock yields 1000.0 for a record without preferred keys:
    // 1000 + 1500 + 1000
    assert_eq!(result, Value::Float(3500.0));
}

#[test]
fn test_parse_dsl_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("catalog.dsl");
    std::fs::write(&path, GHG_DSL).unwrap();

    let catalog = parse_dsl_file(&path).unwrap();
    assert_eq!(catalog.func_count(), 7);
}

#[test]
fn test_parse_error_reports_line_and_text() {
    let err = parse_dsl("type A\n\nnot_a_statement here\n").unwrap_err();
    assert_eq!(err.line, 3);
    assert!(err.to_string().contains("line 3"));
    assert!(err.to_string().contains("not_a_statement"));
}
