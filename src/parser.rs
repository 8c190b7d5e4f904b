//! # Catalog DSL Parser
//!
//! Loads a transformation catalog from the textual DSL:
//!
//! ```text
//! # base type with attributes
//! type Energy [unit=J, range=>=0]
//!
//! # product type ('x' or '×' between components)
//! type AllScopes = Scope1 x Scope2 x Scope3
//!
//! fn fuelToCO2 {
//!   sig: Fuel -> CO2
//!   impl: formula("co2 = fuel * emission_factor")
//!   cost: 1
//!   confidence: 0.98
//! }
//! ```
//!
//! Signatures are `A -> B` or `(A, B, C) -> D`; `#` starts a comment.
//! Parse failures carry the line number and the offending text.

use crate::catalog::Catalog;
use crate::error::ParseError;
use crate::model::{Domain, FuncDef, FuncImpl, ProductType, TypeDef};
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

/// Parse DSL text into a catalog
pub fn parse_dsl(text: &str) -> Result<Catalog, ParseError> {
    Parser::new().parse(text)
}

/// Parse a DSL file into a catalog
pub fn parse_dsl_file(path: impl AsRef<Path>) -> Result<Catalog, ParseError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|e| {
        ParseError::new(0, format!("cannot read {}", path.display()), e.to_string())
    })?;
    parse_dsl(&text)
}

struct Parser {
    catalog: Catalog,
}

impl Parser {
    fn new() -> Self {
        Parser {
            catalog: Catalog::new(),
        }
    }

    fn parse(mut self, text: &str) -> Result<Catalog, ParseError> {
        let lines: Vec<&str> = text.lines().collect();
        let mut i = 0;

        while i < lines.len() {
            let line_num = i + 1;
            let raw = lines[i];
            let line = strip_comment(raw).trim();

            if line.is_empty() {
                i += 1;
                continue;
            }

            if line.starts_with("type ") {
                self.parse_type(line, line_num)?;
                i += 1;
            } else if line.starts_with("fn ") {
                let (block, consumed) = collect_block(&lines, i)?;
                self.parse_func(&block, line_num)?;
                i += consumed;
            } else {
                return Err(ParseError::new(line_num, "unknown syntax", line));
            }
        }

        Ok(self.catalog)
    }

    fn parse_type(&mut self, line: &str, line_num: usize) -> Result<(), ParseError> {
        static PRODUCT_RE: OnceLock<Regex> = OnceLock::new();
        static BASE_RE: OnceLock<Regex> = OnceLock::new();

        let product_re =
            PRODUCT_RE.get_or_init(|| Regex::new(r"^type\s+(\w+)\s*=\s*(.+)$").unwrap());
        if let Some(caps) = product_re.captures(line) {
            static SEP_RE: OnceLock<Regex> = OnceLock::new();
            // 'x' only separates components as a standalone word, so type
            // names containing the letter survive
            let sep_re = SEP_RE.get_or_init(|| Regex::new(r"\s*(?:×|\bx\b)\s*").unwrap());
            let name = caps[1].to_string();
            let components: Vec<String> = sep_re
                .split(&caps[2])
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect();
            if components.len() < 2 {
                return Err(ParseError::new(
                    line_num,
                    "product type needs at least two components",
                    line,
                ));
            }
            self.catalog
                .add_product_type(ProductType::new(name, components))
                .map_err(|e| ParseError::new(line_num, e.to_string(), line))?;
            return Ok(());
        }

        let base_re =
            BASE_RE.get_or_init(|| Regex::new(r"^type\s+(\w+)(?:\s*\[([^\]]*)\])?\s*$").unwrap());
        if let Some(caps) = base_re.captures(line) {
            let name = caps[1].to_string();
            let attrs = caps
                .get(2)
                .map(|m| parse_attrs(m.as_str()))
                .unwrap_or_default();
            let mut type_def = TypeDef::new(name);
            type_def.attrs = attrs;
            self.catalog
                .add_type(type_def)
                .map_err(|e| ParseError::new(line_num, e.to_string(), line))?;
            return Ok(());
        }

        Err(ParseError::new(line_num, "invalid type definition", line))
    }

    fn parse_func(&mut self, block: &str, line_num: usize) -> Result<(), ParseError> {
        static FN_RE: OnceLock<Regex> = OnceLock::new();
        let fn_re = FN_RE.get_or_init(|| Regex::new(r"(?s)^fn\s+(\w+)\s*\{(.*)\}\s*$").unwrap());

        let caps = fn_re
            .captures(block.trim())
            .ok_or_else(|| ParseError::new(line_num, "invalid function definition", block))?;
        let name = caps[1].to_string();
        let body = caps[2].to_string();

        let fields = parse_func_body(&body);

        let sig = fields
            .get("sig")
            .ok_or_else(|| ParseError::new(line_num, "missing 'sig' field", &name))?;
        let (dom, cod) = parse_signature(sig, line_num)?;

        let imp = match fields.get("impl") {
            Some(impl_str) => parse_impl(impl_str, line_num)?,
            None => FuncImpl::default(),
        };

        let cost = parse_number(&fields, "cost", 1.0, line_num)?;
        let conf = parse_number(&fields, "confidence", 1.0, line_num)?;

        let func = FuncDef {
            id: name,
            dom,
            cod,
            cost,
            conf,
            imp,
            inverse_of: fields.get("inverse_of").cloned(),
            doc: fields
                .get("doc")
                .map(|d| d.trim_matches('"').to_string())
                .unwrap_or_default(),
        };

        self.catalog
            .add_func(func)
            .map_err(|e| ParseError::new(line_num, e.to_string(), block.lines().next().unwrap_or("")))
    }
}

fn parse_number(
    fields: &HashMap<String, String>,
    key: &str,
    default: f64,
    line_num: usize,
) -> Result<f64, ParseError> {
    match fields.get(key) {
        Some(text) => text
            .parse::<f64>()
            .map_err(|_| ParseError::new(line_num, format!("invalid {key}"), text)),
        None => Ok(default),
    }
}

/// Strip a `#` comment, leaving string literals intact
fn strip_comment(line: &str) -> &str {
    let mut in_string = false;
    for (i, c) in line.char_indices() {
        match c {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..i],
            _ => {}
        }
    }
    line
}

/// Collect a braced block starting at `start`; returns the block text and
/// the number of lines consumed
fn collect_block(lines: &[&str], start: usize) -> Result<(String, usize), ParseError> {
    let mut block = Vec::new();
    let mut depth = 0i32;
    let mut started = false;
    let mut i = start;

    while i < lines.len() {
        let line = strip_comment(lines[i]);
        block.push(line.to_string());

        for c in line.chars() {
            match c {
                '{' => {
                    depth += 1;
                    started = true;
                }
                '}' => depth -= 1,
                _ => {}
            }
        }

        i += 1;
        if started && depth == 0 {
            return Ok((block.join("\n"), i - start));
        }
    }

    Err(ParseError::new(
        start + 1,
        "unmatched braces in block",
        lines[start],
    ))
}

/// Parse `key: value` lines of a function body
fn parse_func_body(body: &str) -> HashMap<String, String> {
    static FIELD_RE: OnceLock<Regex> = OnceLock::new();
    let field_re = FIELD_RE.get_or_init(|| Regex::new(r"^(\w+)\s*:\s*(.+)$").unwrap());

    let mut fields = HashMap::new();
    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(caps) = field_re.captures(line) {
            fields.insert(caps[1].to_string(), caps[2].trim().to_string());
        }
    }
    fields
}

/// Parse `A -> B` or `(A, B, C) -> D`
fn parse_signature(sig: &str, line_num: usize) -> Result<(Domain, String), ParseError> {
    let parts: Vec<&str> = sig.splitn(2, "->").collect();
    if parts.len() != 2 {
        return Err(ParseError::new(line_num, "invalid signature", sig));
    }

    let dom_str = parts[0].trim();
    let cod = parts[1].trim().to_string();
    if cod.is_empty() || dom_str.is_empty() {
        return Err(ParseError::new(line_num, "invalid signature", sig));
    }

    let dom = if dom_str.starts_with('(') && dom_str.ends_with(')') {
        let inner = &dom_str[1..dom_str.len() - 1];
        Domain::Multi(inner.split(',').map(|t| t.trim().to_string()).collect())
    } else {
        Domain::Single(dom_str.to_string())
    };

    Ok((dom, cod))
}

fn parse_attrs(attrs_str: &str) -> HashMap<String, String> {
    let mut attrs = HashMap::new();
    for pair in attrs_str.split(',') {
        if let Some((key, value)) = pair.split_once('=') {
            attrs.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    attrs
}

/// Parse an implementation descriptor:
/// `formula("…")`, `sparql("…")`, `rest("METHOD, URL")`, `builtin("…")`,
/// `unit_conversion(FACTOR)`, `json({…})`, `template("…", {…})`.
/// Anything unrecognised is a parse error; a missing impl (handled by the
/// caller) defaults to `builtin("identity")`.
fn parse_impl(impl_str: &str, line_num: usize) -> Result<FuncImpl, ParseError> {
    static QUOTED_RE: OnceLock<Regex> = OnceLock::new();
    let quoted_re =
        QUOTED_RE.get_or_init(|| Regex::new(r#"^(\w+)\s*\(\s*"([^"]*)"\s*\)$"#).unwrap());

    let impl_str = impl_str.trim();

    if let Some(caps) = quoted_re.captures(impl_str) {
        let tag = &caps[1];
        let payload = caps[2].to_string();
        return match tag {
            "formula" => Ok(FuncImpl::Formula { expr: payload }),
            "sparql" => Ok(FuncImpl::Sparql { query: payload }),
            "builtin" => Ok(FuncImpl::Builtin { name: payload }),
            "rest" => {
                // "METHOD, URL" or bare URL (GET)
                let (method, url) = match payload.split_once(',') {
                    Some((method, url)) => (method.trim().to_string(), url.trim().to_string()),
                    None => ("GET".to_string(), payload),
                };
                Ok(FuncImpl::Rest { method, url })
            }
            other => Err(ParseError::new(
                line_num,
                format!("unknown implementation type '{other}'"),
                impl_str,
            )),
        };
    }

    static UNIT_RE: OnceLock<Regex> = OnceLock::new();
    let unit_re =
        UNIT_RE.get_or_init(|| Regex::new(r"^unit_conversion\s*\(\s*([^)]+)\s*\)$").unwrap());
    if let Some(caps) = unit_re.captures(impl_str) {
        let factor = caps[1]
            .trim()
            .parse::<f64>()
            .map_err(|_| ParseError::new(line_num, "invalid conversion factor", impl_str))?;
        return Ok(FuncImpl::UnitConversion { factor });
    }

    static JSON_RE: OnceLock<Regex> = OnceLock::new();
    let json_re = JSON_RE.get_or_init(|| Regex::new(r"(?s)^json\s*\(\s*(\{.*\})\s*\)$").unwrap());
    if let Some(caps) = json_re.captures(impl_str) {
        let schema = serde_json::from_str(&caps[1])
            .map_err(|e| ParseError::new(line_num, format!("invalid JSON schema: {e}"), impl_str))?;
        return Ok(FuncImpl::Json { schema });
    }

    static TEMPLATE_RE: OnceLock<Regex> = OnceLock::new();
    let template_re = TEMPLATE_RE
        .get_or_init(|| Regex::new(r#"(?s)^template\s*\(\s*"([^"]+)"\s*,\s*(\{.*\})\s*\)$"#).unwrap());
    if let Some(caps) = template_re.captures(impl_str) {
        let template = caps[1].to_string();
        let mappings: HashMap<String, String> = serde_json::from_str(&caps[2]).map_err(|e| {
            ParseError::new(line_num, format!("invalid template mappings: {e}"), impl_str)
        })?;
        return Ok(FuncImpl::Template { template, mappings });
    }

    if impl_str.is_empty() {
        return Ok(FuncImpl::default());
    }

    Err(ParseError::new(
        line_num,
        "unknown implementation type",
        impl_str,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_definition() {
        let catalog = parse_dsl("type Product\ntype Energy [unit=J, range=>=0]\n").unwrap();
        assert!(catalog.get_type("Product").is_some());
        assert_eq!(catalog.get_unit("Energy"), Some("J"));
    }

    #[test]
    fn test_product_type() {
        let dsl = "type A\ntype B\ntype C\ntype ABC = A x B x C\n";
        let catalog = parse_dsl(dsl).unwrap();
        let product = catalog.get_product_type("ABC").unwrap();
        assert_eq!(product.components, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_function_definition() {
        let dsl = r#"
type A
type B

fn transform {
  sig: A -> B
  impl: formula("y = x * 2")
  cost: 1.5
  confidence: 0.95
  doc: "Transform A to B"
}
"#;
        let catalog = parse_dsl(dsl).unwrap();
        assert_eq!(catalog.func_count(), 1);

        let func = catalog.get_func("transform").unwrap();
        assert_eq!(func.signature(), "A -> B");
        assert_eq!(func.cost, 1.5);
        assert_eq!(func.conf, 0.95);
        assert_eq!(func.doc, "Transform A to B");
        assert_eq!(
            func.imp,
            FuncImpl::Formula {
                expr: "y = x * 2".into()
            }
        );
    }

    #[test]
    fn test_multiarg_function() {
        let dsl = r#"
fn combine {
  sig: (A, B, C) -> D
  impl: formula("d = a + b + c")
  cost: 2
}
"#;
        let catalog = parse_dsl(dsl).unwrap();
        let func = catalog.get_func("combine").unwrap();
        assert!(func.is_multiarg());
        assert_eq!(func.dom_types(), &["A", "B", "C"]);
        assert_eq!(func.cod, "D");
    }

    #[test]
    fn test_missing_impl_defaults_to_identity() {
        let dsl = "fn noop {\n  sig: A -> A\n}\n";
        let catalog = parse_dsl(dsl).unwrap();
        assert_eq!(catalog.get_func("noop").unwrap().imp, FuncImpl::default());
    }

    #[test]
    fn test_parse_error_carries_line() {
        let err = parse_dsl("type A\nunknown_keyword Something\n").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.text.contains("unknown_keyword"));
    }

    #[test]
    fn test_unknown_impl_tag_rejected() {
        let dsl = "fn f {\n  sig: A -> B\n  impl: wasm(\"blob\")\n}\n";
        let err = parse_dsl(dsl).unwrap_err();
        assert!(err.message.contains("unknown implementation type"));
    }

    #[test]
    fn test_unit_conversion_impl() {
        let dsl = "fn kWhToJ {\n  sig: EkWh -> EJ\n  impl: unit_conversion(3.6e6)\n}\n";
        let catalog = parse_dsl(dsl).unwrap();
        assert_eq!(
            catalog.get_func("kWhToJ").unwrap().imp,
            FuncImpl::UnitConversion { factor: 3.6e6 }
        );
    }

    #[test]
    fn test_rest_impl_with_method() {
        let dsl = "fn fetch {\n  sig: Id -> Doc\n  impl: rest(\"POST, https://api/items/{id}\")\n}\n";
        let catalog = parse_dsl(dsl).unwrap();
        assert_eq!(
            catalog.get_func("fetch").unwrap().imp,
            FuncImpl::Rest {
                method: "POST".into(),
                url: "https://api/items/{id}".into()
            }
        );
    }

    #[test]
    fn test_comments_and_inline_comments() {
        let dsl = "# leading comment\ntype A # trailing comment\n\nfn f {\n  sig: A -> A # note\n}\n";
        let catalog = parse_dsl(dsl).unwrap();
        assert!(catalog.get_type("A").is_some());
        assert_eq!(catalog.get_func("f").unwrap().cod, "A");
    }

    #[test]
    fn test_unmatched_braces() {
        let err = parse_dsl("fn broken {\n  sig: A -> B\n").unwrap_err();
        assert!(err.message.contains("unmatched braces"));
    }
}
