//! # Execution Engine
//!
//! Topological interpreter for synthesized plans. Linear paths fold left to
//! right; DAGs evaluate in an order where every node's inputs are computed
//! before the node itself. Each function application dispatches on its
//! implementation descriptor to one of the backends: formula evaluation,
//! remote query, REST call, built-in reducer, unit conversion, structured
//! JSON builder, or textual template.
//!
//! Execution is stateless across calls and synchronous throughout; the HTTP
//! backends are the only suspension points. When the context enables
//! provenance tracking, every function application is recorded as a PROV
//! activity with its usage, generation, and derivation edges.

pub mod formula;

use crate::dag::{NodeKind, SynthesisDag};
use crate::error::{ExecError, ExecResult};
use crate::model::{FuncDef, FuncImpl};
use crate::provenance::{ProvenanceGraph, ProvenanceTracker};
use crate::value::Value;
use self::formula::{build_symbols, evaluate, Whitelist};
use serde_json::{Map, Value as Json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Cooperative cancellation signal carried by the execution context.
/// Checked before every function application; backends check it before
/// issuing I/O.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Read-only configuration for a single run
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Remote-query endpoint; the deterministic mock is used when absent
    pub sparql_endpoint: Option<String>,
    /// Namespace prefix declarations prepended to remote queries
    pub sparql_prefixes: HashMap<String, String>,
    /// Headers sent with REST calls
    pub rest_headers: HashMap<String, String>,
    /// Variable bindings overlaid on the constants in formula evaluation
    pub variables: HashMap<String, Value>,
    /// Named constants available to formulas
    pub constants: HashMap<String, f64>,
    pub cancel: CancelToken,
    tracker: Option<ProvenanceTracker>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        let constants: HashMap<String, f64> = [
            ("emission_factor".to_string(), 2.5),
            ("efficiency".to_string(), 0.35),
            ("kWh_to_CO2".to_string(), 0.5),
        ]
        .into();

        ExecutionContext {
            sparql_endpoint: None,
            sparql_prefixes: HashMap::new(),
            rest_headers: HashMap::new(),
            variables: HashMap::new(),
            constants,
            cancel: CancelToken::new(),
            tracker: None,
        }
    }

    /// Enable provenance tracking with wall-clock timestamps and random ids
    pub fn with_provenance(mut self) -> Self {
        self.tracker = Some(ProvenanceTracker::new(ProvenanceGraph::new()));
        self
    }

    /// Enable provenance tracking with an injected deterministic clock and
    /// id generator (stable snapshots in tests)
    pub fn with_deterministic_provenance(mut self) -> Self {
        self.tracker = Some(ProvenanceTracker::new(ProvenanceGraph::deterministic()));
        self
    }

    pub fn tracking_enabled(&self) -> bool {
        self.tracker.is_some()
    }

    /// The provenance graph accumulated so far, if tracking is enabled.
    /// Retained even after a cancelled run.
    pub fn provenance(&self) -> Option<&ProvenanceGraph> {
        self.tracker.as_ref().map(|t| &t.graph)
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

type BuiltinFn = Box<dyn Fn(&Value) -> ExecResult<Value>>;

/// The plan interpreter
pub struct Executor {
    context: ExecutionContext,
    builtins: HashMap<String, BuiltinFn>,
}

impl Executor {
    pub fn new(context: ExecutionContext) -> Self {
        let mut executor = Executor {
            context,
            builtins: HashMap::new(),
        };
        executor.register_default_builtins();
        executor
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut ExecutionContext {
        &mut self.context
    }

    pub fn into_context(self) -> ExecutionContext {
        self.context
    }

    /// Late-bound registration hook for additional reducers
    pub fn register_builtin<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&Value) -> ExecResult<Value> + 'static,
    {
        self.builtins.insert(name.to_string(), Box::new(f));
    }

    fn register_default_builtins(&mut self) {
        fn fold_sequence(
            input: &Value,
            fold: impl Fn(&[Value]) -> ExecResult<Value>,
        ) -> ExecResult<Value> {
            match input.as_sequence() {
                Some(items) => fold(items),
                None => Ok(input.clone()),
            }
        }
        fn numbers(items: &[Value]) -> ExecResult<Vec<f64>> {
            items
                .iter()
                .map(|v| {
                    v.as_f64().ok_or_else(|| {
                        ExecError::failed("builtin", format!("non-numeric element {v}"))
                    })
                })
                .collect()
        }

        self.register_builtin("identity", |v| Ok(v.clone()));
        self.register_builtin("sum", |v| {
            fold_sequence(v, |items| Ok(Value::Float(numbers(items)?.iter().sum())))
        });
        self.register_builtin("product", |v| {
            fold_sequence(v, |items| Ok(Value::Float(numbers(items)?.iter().product())))
        });
        self.register_builtin("average", |v| {
            fold_sequence(v, |items| {
                if items.is_empty() {
                    return Ok(v.clone());
                }
                let nums = numbers(items)?;
                Ok(Value::Float(nums.iter().sum::<f64>() / nums.len() as f64))
            })
        });
        self.register_builtin("first", |v| {
            fold_sequence(v, |items| {
                items.first().cloned().ok_or_else(|| {
                    ExecError::failed("builtin", "first of empty sequence")
                })
            })
        });
        self.register_builtin("last", |v| {
            fold_sequence(v, |items| {
                items.last().cloned().ok_or_else(|| {
                    ExecError::failed("builtin", "last of empty sequence")
                })
            })
        });
        self.register_builtin("count", |v| match v.as_sequence() {
            Some(items) => Ok(Value::Int(items.len() as i64)),
            None => Ok(Value::Int(1)),
        });
        self.register_builtin("abs", |v| {
            v.as_f64()
                .map(|n| Value::Float(n.abs()))
                .ok_or_else(|| ExecError::failed("builtin", format!("abs of {v}")))
        });
        self.register_builtin("round", |v| {
            v.as_f64()
                .map(|n| Value::Float(n.round()))
                .ok_or_else(|| ExecError::failed("builtin", format!("round of {v}")))
        });
    }

    fn check_cancel(&self) -> ExecResult<()> {
        if self.context.cancel.is_cancelled() {
            Err(ExecError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Apply a single function. When tracking is enabled the input is
    /// materialised as a source entity and the application is recorded.
    pub fn execute_func(&mut self, func: &FuncDef, input: &Value) -> ExecResult<Value> {
        self.check_cancel()?;
        let output = self.dispatch(func, input)?;

        if self.context.tracking_enabled() {
            let source_type = source_type_of(func);
            let tracker = self.context.tracker.as_mut().expect("tracking enabled");
            let input_entity = tracker.add_source_entity(&source_type, &input.to_string());
            tracker.track_function_execution(
                &func.id,
                &func.signature(),
                &[input_entity],
                &output.to_string(),
                &func.cod,
            );
        }

        Ok(output)
    }

    /// Fold a linear path left to right
    pub fn execute_path(&mut self, path: &[FuncDef], input: &Value) -> ExecResult<Value> {
        let mut entities = Vec::new();
        if self.context.tracking_enabled() {
            let source_type = path
                .first()
                .map(source_type_of)
                .unwrap_or_else(|| "Value".to_string());
            let tracker = self.context.tracker.as_mut().expect("tracking enabled");
            entities.push(tracker.add_source_entity(&source_type, &input.to_string()));
        }

        let funcs: Vec<&FuncDef> = path.iter().collect();
        let (output, _) = self.run_funcs(&funcs, input.clone(), entities)?;
        Ok(output)
    }

    /// Evaluate a DAG plan against externally supplied source values
    pub fn execute_dag(
        &mut self,
        dag: &SynthesisDag,
        source_values: &HashMap<String, Value>,
    ) -> ExecResult<Value> {
        let order = dag.topological_order();
        let mut values: HashMap<String, Value> = HashMap::new();
        let mut entities: HashMap<String, String> = HashMap::new();

        for node_id in order {
            self.check_cancel()?;
            let node = &dag.nodes[&node_id];

            match node.kind {
                NodeKind::Source => {
                    let value = self.resolve_source_value(&node.id, &node.type_name, source_values)?;
                    if let Some(tracker) = self.context.tracker.as_mut() {
                        let entity =
                            tracker.add_source_entity(&node.type_name, &value.to_string());
                        entities.insert(node_id.clone(), entity);
                    }
                    values.insert(node_id, value);
                }
                NodeKind::Transform | NodeKind::Aggregate | NodeKind::Goal => {
                    let (input, input_entities) = if node.inputs.len() > 1 {
                        // Assemble the multi-input tuple in argument order
                        let tuple = Value::Tuple(
                            node.inputs
                                .iter()
                                .map(|id| values[id].clone())
                                .collect(),
                        );
                        let ids = node
                            .inputs
                            .iter()
                            .filter_map(|id| entities.get(id).cloned())
                            .collect();
                        (tuple, ids)
                    } else {
                        let input_id = node.inputs.first().ok_or_else(|| {
                            ExecError::failed(&node.id, "node has no inputs")
                        })?;
                        (
                            values[input_id].clone(),
                            entities.get(input_id).cloned().into_iter().collect(),
                        )
                    };

                    let funcs = node.funcs();
                    debug!(node = %node_id, funcs = funcs.len(), "evaluating DAG node");
                    let (output, entity) = self.run_funcs(&funcs, input, input_entities)?;
                    if let Some(entity) = entity {
                        entities.insert(node_id.clone(), entity);
                    }
                    values.insert(node_id, output);
                }
            }
        }

        values
            .remove(&dag.goal_node)
            .ok_or_else(|| ExecError::failed(&dag.goal_node, "goal node was not evaluated"))
    }

    /// Apply a chain of functions. With tracking, the first application
    /// consumes all the given input entities (the synthetic tuple-assembly
    /// step is covered by its activity) and later ones chain through the
    /// previous output entity.
    fn run_funcs(
        &mut self,
        funcs: &[&FuncDef],
        input: Value,
        input_entities: Vec<String>,
    ) -> ExecResult<(Value, Option<String>)> {
        let mut value = input;
        let mut entities = input_entities;

        if funcs.is_empty() {
            return Ok((value, entities.into_iter().next()));
        }

        for func in funcs {
            self.check_cancel()?;
            value = self.dispatch(func, &value)?;

            if self.context.tracking_enabled() {
                let tracker = self.context.tracker.as_mut().expect("tracking enabled");
                let output_entity = tracker.track_function_execution(
                    &func.id,
                    &func.signature(),
                    &entities,
                    &value.to_string(),
                    &func.cod,
                );
                entities = vec![output_entity];
            }
        }

        Ok((value, entities.into_iter().next()))
    }

    /// Source binding: exact id first, then the documented fuzzy fallback
    /// (substring match between the source key and the node's type name),
    /// then the first provided value. Clients wanting strict binding supply
    /// ids that match node ids exactly.
    fn resolve_source_value(
        &self,
        node_id: &str,
        type_name: &str,
        source_values: &HashMap<String, Value>,
    ) -> ExecResult<Value> {
        if let Some(value) = source_values.get(node_id) {
            return Ok(value.clone());
        }

        // Scan in sorted key order so the fallback stays reproducible
        let mut keys: Vec<&String> = source_values.keys().collect();
        keys.sort();

        for key in &keys {
            if type_name.contains(key.as_str()) || key.contains(type_name) {
                warn!(node = node_id, key = %key, "fuzzy source binding");
                return Ok(source_values[*key].clone());
            }
        }

        match keys.first() {
            Some(key) => {
                warn!(node = node_id, key = %key, "fallback to first source value");
                Ok(source_values[*key].clone())
            }
            None => Err(ExecError::failed(node_id, "no source values provided")),
        }
    }

    /// Dispatch one application on the implementation tag
    fn dispatch(&self, func: &FuncDef, input: &Value) -> ExecResult<Value> {
        match &func.imp {
            FuncImpl::Formula { expr } => self.exec_formula(func, expr, input),
            FuncImpl::Sparql { query } => self.exec_sparql(func, query, input),
            FuncImpl::Rest { method, url } => self.exec_rest(func, method, url, input),
            FuncImpl::Builtin { name } => self.exec_builtin(func, name, input),
            FuncImpl::UnitConversion { factor } => self.exec_unit_conversion(func, *factor, input),
            FuncImpl::Json { schema } => self.exec_json(func, schema, input),
            FuncImpl::Template { template, mappings } => {
                self.exec_template(func, template, mappings, input)
            }
        }
    }

    fn exec_formula(&self, func: &FuncDef, expr: &str, input: &Value) -> ExecResult<Value> {
        let symbols = build_symbols(
            &self.context.constants,
            &self.context.variables,
            input,
            Some(expr),
        );
        evaluate(expr, &symbols, Whitelist::Core).map_err(|e| {
            ExecError::failed(
                &func.id,
                format!(
                    "formula '{}' (evaluated as '{}'): {}",
                    expr,
                    formula::effective_expr(expr),
                    e
                ),
            )
        })
    }

    fn exec_sparql(&self, func: &FuncDef, query: &str, input: &Value) -> ExecResult<Value> {
        let expanded = expand_placeholders(query, input);

        let Some(endpoint) = &self.context.sparql_endpoint else {
            return Ok(mock_remote_query(input));
        };

        self.check_cancel()?;
        let prefixes: String = self
            .context
            .sparql_prefixes
            .iter()
            .map(|(k, v)| format!("PREFIX {k}: <{v}>"))
            .collect::<Vec<_>>()
            .join("\n");
        let full_query = format!("{prefixes}\n{expanded}");

        let client = reqwest::blocking::Client::builder()
            .build()
            .map_err(|e| ExecError::failed(&func.id, e.to_string()))?;
        let response = client
            .post(endpoint)
            .form(&[("query", full_query.as_str())])
            .header("Accept", "application/sparql-results+json")
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| ExecError::failed(&func.id, format!("remote query failed: {e}")))?;

        let body: Json = response
            .json()
            .map_err(|e| ExecError::failed(&func.id, format!("unparseable result: {e}")))?;

        let bindings = body["results"]["bindings"].as_array().cloned().unwrap_or_default();
        let Some(first_row) = bindings.first().and_then(Json::as_object) else {
            return Ok(Value::Null);
        };

        // First scalar binding of the first result row, numeric parse
        // preferred
        for binding in first_row.values() {
            if let Some(text) = binding["value"].as_str() {
                return Ok(match text.parse::<f64>() {
                    Ok(number) => Value::Float(number),
                    Err(_) => Value::Str(text.to_string()),
                });
            }
        }
        Ok(Value::Null)
    }

    fn exec_rest(
        &self,
        func: &FuncDef,
        method: &str,
        url: &str,
        input: &Value,
    ) -> ExecResult<Value> {
        self.check_cancel()?;
        let expanded = expand_placeholders(url, input);

        let client = reqwest::blocking::Client::builder()
            .build()
            .map_err(|e| ExecError::failed(&func.id, e.to_string()))?;

        let mut request = match method.to_ascii_uppercase().as_str() {
            "GET" => client.get(&expanded),
            "POST" => client.post(&expanded).json(&input.to_json()),
            other => {
                return Err(ExecError::failed(
                    &func.id,
                    format!("unsupported HTTP method: {other}"),
                ))
            }
        };
        for (name, value) in &self.context.rest_headers {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| ExecError::failed(&func.id, format!("REST call failed: {e}")))?;
        let text = response
            .text()
            .map_err(|e| ExecError::failed(&func.id, format!("unreadable body: {e}")))?;

        match serde_json::from_str::<Json>(&text) {
            Ok(json) => Ok(Value::from_json(&json)),
            Err(_) => Ok(Value::Str(text)),
        }
    }

    fn exec_builtin(&self, func: &FuncDef, name: &str, input: &Value) -> ExecResult<Value> {
        let builtin = self.builtins.get(name).ok_or_else(|| {
            ExecError::failed(&func.id, format!("unknown builtin function: {name}"))
        })?;
        builtin(input).map_err(|e| match e {
            ExecError::Failed { cause, .. } => ExecError::failed(&func.id, cause),
            other => other,
        })
    }

    fn exec_unit_conversion(
        &self,
        func: &FuncDef,
        factor: f64,
        input: &Value,
    ) -> ExecResult<Value> {
        match input {
            Value::Int(_) | Value::Float(_) => {
                let scaled = input.as_f64().expect("numeric variant") * factor;
                Ok(Value::Float(scaled))
            }
            Value::List(items) | Value::Tuple(items) => {
                let converted: ExecResult<Vec<Value>> = items
                    .iter()
                    .map(|item| {
                        item.as_f64().map(|n| Value::Float(n * factor)).ok_or_else(|| {
                            ExecError::failed(
                                &func.id,
                                format!("non-numeric element in unit conversion: {item}"),
                            )
                        })
                    })
                    .collect();
                let converted = converted?;
                Ok(match input {
                    Value::Tuple(_) => Value::Tuple(converted),
                    _ => Value::List(converted),
                })
            }
            other => Ok(other.clone()),
        }
    }

    fn exec_json(&self, _func: &FuncDef, schema: &Json, input: &Value) -> ExecResult<Value> {
        let built = self.build_json_from_schema(schema, input);
        Ok(Value::from_json(&built))
    }

    /// Walk the schema: string leaves are evaluated as expressions (falling
    /// back to the literal text on failure), objects recurse, arrays map
    /// object elements element-wise, other literals pass through
    fn build_json_from_schema(&self, schema: &Json, input: &Value) -> Json {
        let Some(fields) = schema.as_object() else {
            return schema.clone();
        };

        let mut result = Map::new();
        for (key, spec) in fields {
            let built = match spec {
                Json::String(expr) => self.eval_schema_leaf(expr, input),
                Json::Object(_) => self.build_json_from_schema(spec, input),
                Json::Array(items) => Json::Array(
                    items
                        .iter()
                        .map(|item| match item {
                            Json::Object(_) => self.build_json_from_schema(item, input),
                            other => other.clone(),
                        })
                        .collect(),
                ),
                other => other.clone(),
            };
            result.insert(key.clone(), built);
        }
        Json::Object(result)
    }

    fn eval_schema_leaf(&self, expr: &str, input: &Value) -> Json {
        // No free-identifier rebinding here: a leaf like "kg-CO2" must fail
        // evaluation and fall back to the literal text
        let symbols = build_symbols(
            &self.context.constants,
            &self.context.variables,
            input,
            None,
        );
        match evaluate(expr, &symbols, Whitelist::Extended) {
            Ok(value) => value.to_json(),
            // Best-effort policy: an unevaluable leaf is emitted verbatim
            Err(_) => Json::String(expr.to_string()),
        }
    }

    fn exec_template(
        &self,
        _func: &FuncDef,
        template: &str,
        mappings: &HashMap<String, String>,
        input: &Value,
    ) -> ExecResult<Value> {
        let mut result = template.to_string();
        for (key, expr) in mappings {
            let symbols = build_symbols(
                &self.context.constants,
                &self.context.variables,
                input,
                None,
            );
            let rendered = match evaluate(expr, &symbols, Whitelist::Extended) {
                Ok(value) => value.to_string(),
                Err(_) => expr.clone(),
            };
            result = result.replace(&format!("{{{{{key}}}}}"), &rendered);
        }
        Ok(Value::Str(result))
    }
}

/// Type bound to the input entity of a standalone or path-initial
/// application
fn source_type_of(func: &FuncDef) -> String {
    if func.is_multiarg() {
        format!("({})", func.dom_types().join(", "))
    } else {
        func.dom_types()[0].clone()
    }
}

/// Expand `{name}` / `?name` placeholders against the input: record fields
/// by key, scalars through the `id` / `value` / `input` stand-ins
fn expand_placeholders(template: &str, input: &Value) -> String {
    let mut result = template.to_string();
    match input {
        Value::Record(fields) => {
            for (key, value) in fields {
                let rendered = value.to_string();
                result = result.replace(&format!("{{{key}}}"), &rendered);
                result = result.replace(&format!("?{key}"), &rendered);
            }
        }
        other => {
            let rendered = other.to_string();
            result = result.replace("{id}", &rendered);
            result = result.replace("{value}", &rendered);
            result = result.replace("?input", &rendered);
        }
    }
    result
}

/// Deterministic stand-in used when no remote-query endpoint is configured:
/// prefers the `energy` / `fuel` / `elec` fields of a record input,
/// otherwise 1000.0
fn mock_remote_query(input: &Value) -> Value {
    if let Some(fields) = input.as_record() {
        for key in ["energy", "fuel", "elec"] {
            if let Some(value) = fields.get(key) {
                return value.clone();
            }
        }
    }
    Value::Float(1000.0)
}
