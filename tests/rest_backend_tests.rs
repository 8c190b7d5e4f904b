//! REST and remote-query backends against a mock HTTP server.
//!
//! The executor is synchronous, so each run is moved onto a blocking thread
//! while the mock server lives on the async test runtime.

use serde_json::json;
use typesynth::{ExecError, ExecutionContext, Executor, FuncDef, FuncImpl, Value};
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn run_blocking<F, T>(f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.expect("task completes")
}

#[tokio::test]
async fn test_rest_get_with_placeholder() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/items/7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": 800})))
        .mount(&server)
        .await;

    let url = format!("{}/items/{{id}}", server.uri());
    let result = run_blocking(move || {
        let func = FuncDef::new("fetch", "Id", "Doc")
            .with_impl(FuncImpl::Rest {
                method: "GET".into(),
                url,
            });
        let mut executor = Executor::new(ExecutionContext::new());
        executor.execute_func(&func, &Value::Int(7))
    })
    .await
    .unwrap();

    assert_eq!(result.as_record().unwrap()["value"], Value::Int(800));
}

#[tokio::test]
async fn test_rest_post_sends_json_body_and_headers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/convert"))
        .and(header("x-api-key", "secret"))
        .and(body_string_contains("400"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"co2": 1000.0})))
        .mount(&server)
        .await;

    let url = format!("{}/convert", server.uri());
    let result = run_blocking(move || {
        let mut context = ExecutionContext::new();
        context
            .rest_headers
            .insert("x-api-key".to_string(), "secret".to_string());
        let mut executor = Executor::new(context);

        let func = FuncDef::new("convert", "Fuel", "CO2").with_impl(FuncImpl::Rest {
            method: "POST".into(),
            url,
        });
        executor.execute_func(&func, &Value::record([("fuel", Value::Float(400.0))]))
    })
    .await
    .unwrap();

    assert_eq!(result.as_record().unwrap()["co2"].as_f64(), Some(1000.0));
}

#[tokio::test]
async fn test_rest_non_json_body_returned_as_text() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/plain"))
        .respond_with(ResponseTemplate::new(200).set_body_string("just text"))
        .mount(&server)
        .await;

    let url = format!("{}/plain", server.uri());
    let result = run_blocking(move || {
        let func = FuncDef::new("fetch", "A", "B").with_impl(FuncImpl::Rest {
            method: "GET".into(),
            url,
        });
        Executor::new(ExecutionContext::new()).execute_func(&func, &Value::Null)
    })
    .await
    .unwrap();

    assert_eq!(result, Value::Str("just text".into()));
}

#[tokio::test]
async fn test_rest_error_status_surfaces_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let url = format!("{}/broken", server.uri());
    let err = run_blocking(move || {
        let func = FuncDef::new("fetch", "A", "B").with_impl(FuncImpl::Rest {
            method: "GET".into(),
            url,
        });
        Executor::new(ExecutionContext::new()).execute_func(&func, &Value::Null)
    })
    .await
    .unwrap_err();

    match err {
        ExecError::Failed { func, cause } => {
            assert_eq!(func, "fetch");
            assert!(cause.contains("REST call failed"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_remote_query_endpoint_with_prefixes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sparql"))
        .and(body_string_contains("PREFIX"))
        .and(body_string_contains("plant-a"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": {
                "bindings": [
                    {"e": {"type": "literal", "value": "1234.5"}}
                ]
            }
        })))
        .mount(&server)
        .await;

    let endpoint = format!("{}/sparql", server.uri());
    let result = run_blocking(move || {
        let mut context = ExecutionContext::new();
        context.sparql_endpoint = Some(endpoint);
        context
            .sparql_prefixes
            .insert("ex".to_string(), "http://example.org/ns#".to_string());
        let mut executor = Executor::new(context);

        let func = FuncDef::new("q", "Site", "Energy").with_impl(FuncImpl::Sparql {
            query: "SELECT ?e WHERE { ex:{site} ex:energy ?e }".into(),
        });
        executor.execute_func(&func, &Value::record([("site", Value::Str("plant-a".into()))]))
    })
    .await
    .unwrap();

    // Numeric parsing is preferred for the first scalar binding
    assert_eq!(result, Value::Float(1234.5));
}

#[tokio::test]
async fn test_remote_query_empty_bindings_yield_null() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sparql"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"results": {"bindings": []}})),
        )
        .mount(&server)
        .await;

    let endpoint = format!("{}/sparql", server.uri());
    let result = run_blocking(move || {
        let mut context = ExecutionContext::new();
        context.sparql_endpoint = Some(endpoint);
        let mut executor = Executor::new(context);

        let func = FuncDef::new("q", "A", "B").with_impl(FuncImpl::Sparql {
            query: "SELECT ?x WHERE {}".into(),
        });
        executor.execute_func(&func, &Value::Null)
    })
    .await
    .unwrap();

    assert_eq!(result, Value::Null);
}

#[tokio::test]
async fn test_rest_dag_node_with_provenance() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/scope3/800"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(42.5)))
        .mount(&server)
        .await;

    let url = format!("{}/scope3/{{value}}", server.uri());
    let graph_counts = run_blocking(move || {
        let mut executor =
            Executor::new(ExecutionContext::new().with_deterministic_provenance());
        let func = FuncDef::new("fetchScope3", "Org", "Scope3").with_impl(FuncImpl::Rest {
            method: "GET".into(),
            url,
        });

        let value = executor
            .execute_path(&[func], &Value::Int(800))
            .unwrap();
        assert_eq!(value, Value::Float(42.5));

        let graph = executor.context().provenance().unwrap();
        (graph.entities().len(), graph.activities().len())
    })
    .await;

    assert_eq!(graph_counts, (2, 1));
}
