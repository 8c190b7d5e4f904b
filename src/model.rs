//! # Type and Function Model
//!
//! Declarative records that make up a transformation catalog: base types with
//! attribute maps, product (tuple) types, and typed functions carrying cost,
//! confidence, and an implementation descriptor.

use serde_json::Value as Json;
use std::collections::HashMap;

/// A named base type. Equality is by name; attributes are advisory metadata
/// (the distinguished `unit` attribute carries a unit symbol).
#[derive(Debug, Clone)]
pub struct TypeDef {
    pub name: String,
    pub attrs: HashMap<String, String>,
    /// Structural schema reserved for record-shaped types
    pub schema: Option<Json>,
}

impl TypeDef {
    pub fn new(name: impl Into<String>) -> Self {
        TypeDef {
            name: name.into(),
            attrs: HashMap::new(),
            schema: None,
        }
    }

    pub fn with_attrs<I, K, V>(name: impl Into<String>, attrs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        TypeDef {
            name: name.into(),
            attrs: attrs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            schema: None,
        }
    }

    /// Unit symbol, if the type declares one
    pub fn unit(&self) -> Option<&str> {
        self.attrs.get("unit").map(String::as_str)
    }

    pub fn is_structured(&self) -> bool {
        self.schema.is_some()
    }
}

impl PartialEq for TypeDef {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for TypeDef {}

/// A product (tuple) type: ordered component type names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductType {
    pub name: String,
    pub components: Vec<String>,
}

impl ProductType {
    pub fn new<I, S>(name: impl Into<String>, components: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ProductType {
            name: name.into(),
            components: components.into_iter().map(Into::into).collect(),
        }
    }

    pub fn arity(&self) -> usize {
        self.components.len()
    }
}

/// Function domain: a single type or an ordered argument-type list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Domain {
    Single(String),
    Multi(Vec<String>),
}

impl Domain {
    /// Domain types in argument order (a single domain is a 1-list)
    pub fn types(&self) -> &[String] {
        match self {
            Domain::Single(t) => std::slice::from_ref(t),
            Domain::Multi(ts) => ts,
        }
    }
}

impl From<&str> for Domain {
    fn from(t: &str) -> Self {
        Domain::Single(t.to_string())
    }
}

impl From<String> for Domain {
    fn from(t: String) -> Self {
        Domain::Single(t)
    }
}

impl From<Vec<&str>> for Domain {
    fn from(ts: Vec<&str>) -> Self {
        Domain::Multi(ts.into_iter().map(String::from).collect())
    }
}

/// Implementation descriptor: how the executor applies a function.
///
/// The tag set is closed, so "unknown implementation type" is a parse-time
/// concern rather than a runtime one.
#[derive(Debug, Clone, PartialEq)]
pub enum FuncImpl {
    /// Arithmetic expression over the guarded symbol table
    Formula { expr: String },
    /// Remote query with `{name}` / `?name` placeholders
    Sparql { query: String },
    /// HTTP call; placeholders expanded in the URL
    Rest { method: String, url: String },
    /// Key into the built-in reducer registry
    Builtin { name: String },
    /// Multiplicative factor, element-wise over sequences
    UnitConversion { factor: f64 },
    /// Nested schema whose string leaves are evaluated as expressions
    Json { schema: Json },
    /// `{{name}}` template plus name→expression mappings
    Template {
        template: String,
        mappings: HashMap<String, String>,
    },
}

impl Default for FuncImpl {
    /// Missing or empty impl defaults to the identity reducer
    fn default() -> Self {
        FuncImpl::Builtin {
            name: "identity".to_string(),
        }
    }
}

impl FuncImpl {
    /// Descriptor tag as it appears in the DSL and in plan serialisation
    pub fn tag(&self) -> &'static str {
        match self {
            FuncImpl::Formula { .. } => "formula",
            FuncImpl::Sparql { .. } => "sparql",
            FuncImpl::Rest { .. } => "rest",
            FuncImpl::Builtin { .. } => "builtin",
            FuncImpl::UnitConversion { .. } => "unit_conversion",
            FuncImpl::Json { .. } => "json",
            FuncImpl::Template { .. } => "template",
        }
    }
}

/// A typed transformation in the catalog
#[derive(Debug, Clone, PartialEq)]
pub struct FuncDef {
    pub id: String,
    pub dom: Domain,
    pub cod: String,
    /// Non-negative search cost
    pub cost: f64,
    /// Confidence in (0, 1]
    pub conf: f64,
    pub imp: FuncImpl,
    pub inverse_of: Option<String>,
    pub doc: String,
}

impl FuncDef {
    pub fn new(id: impl Into<String>, dom: impl Into<Domain>, cod: impl Into<String>) -> Self {
        FuncDef {
            id: id.into(),
            dom: dom.into(),
            cod: cod.into(),
            cost: 1.0,
            conf: 1.0,
            imp: FuncImpl::default(),
            inverse_of: None,
            doc: String::new(),
        }
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_conf(mut self, conf: f64) -> Self {
        self.conf = conf;
        self
    }

    pub fn with_impl(mut self, imp: FuncImpl) -> Self {
        self.imp = imp;
        self
    }

    /// Formula-backed function, the most common catalog entry kind
    pub fn formula(
        id: impl Into<String>,
        dom: impl Into<Domain>,
        cod: impl Into<String>,
        expr: impl Into<String>,
    ) -> Self {
        Self::new(id, dom, cod).with_impl(FuncImpl::Formula { expr: expr.into() })
    }

    pub fn is_multiarg(&self) -> bool {
        matches!(self.dom, Domain::Multi(_))
    }

    pub fn dom_types(&self) -> &[String] {
        self.dom.types()
    }

    pub fn arity(&self) -> usize {
        self.dom.types().len()
    }

    /// Signature string: `A -> B` or `(A, B, C) -> D`
    pub fn signature(&self) -> String {
        match &self.dom {
            Domain::Single(t) => format!("{} -> {}", t, self.cod),
            Domain::Multi(ts) => format!("({}) -> {}", ts.join(", "), self.cod),
        }
    }
}
