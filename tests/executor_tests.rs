//! Backend behaviour through the public executor API: symbol binding,
//! reducers, structured output, cancellation, and error surfaces.

use serde_json::json;
use std::collections::HashMap;
use typesynth::{
    synthesize_multiarg_full, Catalog, ExecError, ExecutionContext, Executor, FuncDef, FuncImpl,
    PlanOptions, TypeDef, Value,
};

fn executor() -> Executor {
    Executor::new(ExecutionContext::new())
}

#[test]
fn test_formula_record_input_binds_fields() {
    let func = FuncDef::formula("co2", "Report", "CO2", "fuel * emission_factor");
    let input = Value::record([("fuel", Value::Float(100.0))]);
    assert_eq!(
        executor().execute_func(&func, &input).unwrap(),
        Value::Float(250.0)
    );
}

#[test]
fn test_formula_variables_overlay_constants() {
    let mut context = ExecutionContext::new();
    context
        .variables
        .insert("emission_factor".to_string(), Value::Float(4.0));
    let mut exec = Executor::new(context);

    let func = FuncDef::formula("co2", "Fuel", "CO2", "fuel * emission_factor");
    assert_eq!(
        exec.execute_func(&func, &Value::Float(10.0)).unwrap(),
        Value::Float(40.0)
    );
}

#[test]
fn test_formula_division_by_zero_fails() {
    let func = FuncDef::formula("bad", "A", "B", "x / 0");
    let err = executor()
        .execute_func(&func, &Value::Float(1.0))
        .unwrap_err();
    match err {
        ExecError::Failed { func, cause } => {
            assert_eq!(func, "bad");
            assert!(cause.contains("division by zero"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_builtin_average_product_first_last() {
    let mut exec = executor();
    let list = Value::List(vec![Value::Float(2.0), Value::Float(4.0), Value::Float(6.0)]);

    let by_name = |name: &str| {
        FuncDef::new(name, "L", "N").with_impl(FuncImpl::Builtin {
            name: name.to_string(),
        })
    };

    assert_eq!(
        exec.execute_func(&by_name("average"), &list).unwrap(),
        Value::Float(4.0)
    );
    assert_eq!(
        exec.execute_func(&by_name("product"), &list).unwrap(),
        Value::Float(48.0)
    );
    assert_eq!(
        exec.execute_func(&by_name("first"), &list).unwrap(),
        Value::Float(2.0)
    );
    assert_eq!(
        exec.execute_func(&by_name("last"), &list).unwrap(),
        Value::Float(6.0)
    );
}

#[test]
fn test_json_backend_nested_schema() {
    let func = FuncDef::new("report", "Scopes", "Report").with_impl(FuncImpl::Json {
        schema: json!({
            "emissions": {
                "scope1": "scope1",
                "scope2": "scope2",
                "total": "scope1 + scope2 + scope3"
            },
            "version": 2,
            "sections": [ {"name": "summary"}, "literal" ]
        }),
    });

    let input = Value::Tuple(vec![
        Value::Float(1000.0),
        Value::Float(1500.0),
        Value::Float(800.0),
    ]);
    let result = executor().execute_func(&func, &input).unwrap();
    let fields = result.as_record().unwrap();

    let emissions = fields["emissions"].as_record().unwrap();
    assert_eq!(emissions["scope1"].as_f64(), Some(1000.0));
    assert_eq!(emissions["total"].as_f64(), Some(3300.0));
    assert_eq!(fields["version"], Value::Int(2));

    let sections = match &fields["sections"] {
        Value::List(items) => items,
        other => panic!("expected list, got {other}"),
    };
    assert_eq!(
        sections[0].as_record().unwrap()["name"],
        Value::Str("summary".into())
    );
    assert_eq!(sections[1], Value::Str("literal".into()));
}

#[test]
fn test_template_backend_with_tuple() {
    let mappings = HashMap::from([
        ("s1".to_string(), "arg0".to_string()),
        ("s2".to_string(), "arg1".to_string()),
        ("total".to_string(), "arg0 + arg1".to_string()),
    ]);
    let func = FuncDef::new("render", "Pair", "Xml").with_impl(FuncImpl::Template {
        template: "<ghg><s1>{{s1}}</s1><s2>{{s2}}</s2><total>{{total}}</total></ghg>".into(),
        mappings,
    });

    let input = Value::Tuple(vec![Value::Float(1000.0), Value::Float(1500.0)]);
    assert_eq!(
        executor().execute_func(&func, &input).unwrap(),
        Value::Str("<ghg><s1>1000</s1><s2>1500</s2><total>2500</total></ghg>".into())
    );
}

#[test]
fn test_unit_conversion_preserves_container_kind() {
    let func =
        FuncDef::new("gToKg", "G", "Kg").with_impl(FuncImpl::UnitConversion { factor: 1e-3 });
    let mut exec = executor();

    let list = Value::List(vec![Value::Float(500.0), Value::Float(1500.0)]);
    assert_eq!(
        exec.execute_func(&func, &list).unwrap(),
        Value::List(vec![Value::Float(0.5), Value::Float(1.5)])
    );

    let tuple = Value::Tuple(vec![Value::Float(500.0)]);
    assert!(matches!(
        exec.execute_func(&func, &tuple).unwrap(),
        Value::Tuple(_)
    ));
}

#[test]
fn test_cancellation_aborts_dag_and_keeps_partial_provenance() {
    let mut catalog = Catalog::new();
    for name in ["A", "B"] {
        catalog.add_type(TypeDef::new(name)).unwrap();
    }
    catalog
        .add_func(FuncDef::formula("f", "A", "B", "x * 2"))
        .unwrap();

    let sources = vec![("a".to_string(), "A".to_string())];
    let dag = synthesize_multiarg_full(&catalog, &sources, "B", &PlanOptions::default())
        .expect("plan");

    let context = ExecutionContext::new().with_deterministic_provenance();
    context.cancel.cancel();
    let mut exec = Executor::new(context);

    let values = HashMap::from([("a".to_string(), Value::Float(1.0))]);
    let err = exec.execute_dag(&dag, &values).unwrap_err();
    assert!(matches!(err, ExecError::Cancelled));

    // The graph accumulated so far is still inspectable
    let graph = exec.context().provenance().unwrap();
    assert!(graph.entities().is_empty());
    assert_eq!(graph.agents().len(), 1);
}

#[test]
fn test_missing_source_values_fail() {
    let mut catalog = Catalog::new();
    catalog.add_type(TypeDef::new("A")).unwrap();

    let sources = vec![("a".to_string(), "A".to_string())];
    let dag = synthesize_multiarg_full(&catalog, &sources, "A", &PlanOptions::default())
        .expect("plan");

    let mut exec = executor();
    let err = exec.execute_dag(&dag, &HashMap::new()).unwrap_err();
    assert!(matches!(err, ExecError::Failed { .. }));
}

#[test]
fn test_fallback_to_first_source_value() {
    let mut catalog = Catalog::new();
    catalog.add_type(TypeDef::new("A")).unwrap();

    let sources = vec![("a".to_string(), "A".to_string())];
    let dag = synthesize_multiarg_full(&catalog, &sources, "A", &PlanOptions::default())
        .expect("plan");

    // No key matches the node id or type; the first (sorted) value is used
    let values = HashMap::from([("unrelated".to_string(), Value::Float(9.0))]);
    let mut exec = executor();
    assert_eq!(exec.execute_dag(&dag, &values).unwrap(), Value::Float(9.0));
}

#[test]
fn test_remote_query_mock_prefers_known_keys() {
    let func = FuncDef::new("q", "Facility", "Energy").with_impl(FuncImpl::Sparql {
        query: "SELECT ?e WHERE { ?f :uses ?e }".into(),
    });
    let mut exec = executor();

    let with_energy = Value::record([
        ("energy", Value::Float(1234.0)),
        ("fuel", Value::Float(1.0)),
    ]);
    assert_eq!(
        exec.execute_func(&func, &with_energy).unwrap(),
        Value::Float(1234.0)
    );

    let unknown = Value::record([("other", Value::Float(5.0))]);
    assert_eq!(
        exec.execute_func(&func, &unknown).unwrap(),
        Value::Float(1000.0)
    );
}
