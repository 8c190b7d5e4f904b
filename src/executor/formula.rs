//! # Formula Evaluator
//!
//! A small arithmetic expression language evaluated against a guarded symbol
//! table. This is a real parser and interpreter, not host-language `eval`:
//! the sandbox is a design requirement. Permitted syntax is numbers,
//! identifiers, unary/binary arithmetic, comparisons, booleans, and calls to
//! a whitelist of numeric functions. No attribute access, no calls outside
//! the whitelist, no imports.
//!
//! Expressions of the form `lhs = rhs` evaluate only the right-hand side
//! (the left-hand side is a documentation name). A single `=` is recognised
//! as the assignment separator; `==`, `!=`, `<=`, `>=` are untouched.

use crate::value::Value;
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;
use thiserror::Error;

/// Formula evaluation failure; wrapped into `ExecError::Failed` by the
/// executor with the offending expression attached
#[derive(Debug, Clone, Error)]
pub enum EvalError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("{0}")]
    Eval(String),
}

type EvalResult<T> = Result<T, EvalError>;

/// Function whitelist tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whitelist {
    /// Numeric functions available to `formula` implementations
    Core,
    /// Core plus conversion helpers, for JSON-schema and template leaves
    Extended,
}

const CORE_FUNCS: &[&str] = &[
    "abs", "round", "min", "max", "sum", "len", "pow", "sqrt", "log", "exp", "sin", "cos", "tan",
];

const EXTENDED_FUNCS: &[&str] = &["str", "int", "float", "list", "tuple"];

/// Names that are never rebound to the scalar input
const RESERVED: &[&str] = &[
    "and", "or", "not", "if", "else", "for", "in", "True", "False", "None", "true", "false",
    "null",
];

impl Whitelist {
    fn permits(&self, name: &str) -> bool {
        CORE_FUNCS.contains(&name)
            || (*self == Whitelist::Extended && EXTENDED_FUNCS.contains(&name))
    }
}

/// Strip the `lhs =` documentation prefix, leaving the evaluable right-hand
/// side. Comparison operators are not assignment separators.
pub fn effective_expr(expr: &str) -> &str {
    let bytes = expr.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if b != b'=' {
            continue;
        }
        let prev = if i > 0 { bytes[i - 1] } else { 0 };
        let next = bytes.get(i + 1).copied().unwrap_or(0);
        if prev != b'=' && prev != b'!' && prev != b'<' && prev != b'>' && next != b'=' {
            return expr[i + 1..].trim();
        }
    }
    expr.trim()
}

/// Build the symbol table for an input value per the binding rules:
/// constants first, variables overlaid, then input bindings by shape.
///
/// Tuples bind `arg0…`, `x0…`, plus `a`/`b` for pairs and
/// `scope1`/`scope2`/`scope3` for triples. Records merge their fields.
/// Scalars bind `x`, `input`, `value`, and every free identifier of the
/// expression that is not reserved, whitelisted, or already bound.
pub fn build_symbols(
    constants: &HashMap<String, f64>,
    variables: &HashMap<String, Value>,
    input: &Value,
    expr: Option<&str>,
) -> HashMap<String, Value> {
    let mut symbols: HashMap<String, Value> = constants
        .iter()
        .map(|(k, v)| (k.clone(), Value::Float(*v)))
        .collect();
    for (k, v) in variables {
        symbols.insert(k.clone(), v.clone());
    }

    match input {
        Value::Tuple(items) => {
            for (i, item) in items.iter().enumerate() {
                symbols.insert(format!("arg{i}"), item.clone());
                symbols.insert(format!("x{i}"), item.clone());
            }
            if items.len() == 2 {
                symbols.insert("a".to_string(), items[0].clone());
                symbols.insert("b".to_string(), items[1].clone());
            }
            if items.len() == 3 {
                symbols.insert("scope1".to_string(), items[0].clone());
                symbols.insert("scope2".to_string(), items[1].clone());
                symbols.insert("scope3".to_string(), items[2].clone());
            }
        }
        Value::Record(fields) => {
            for (k, v) in fields {
                symbols.insert(k.clone(), v.clone());
            }
        }
        other => {
            symbols.insert("x".to_string(), other.clone());
            symbols.insert("input".to_string(), other.clone());
            symbols.insert("value".to_string(), other.clone());

            if let Some(expr) = expr {
                for name in free_identifiers(expr) {
                    if !symbols.contains_key(&name)
                        && !RESERVED.contains(&name.as_str())
                        && !CORE_FUNCS.contains(&name.as_str())
                        && !EXTENDED_FUNCS.contains(&name.as_str())
                    {
                        symbols.insert(name, other.clone());
                    }
                }
            }
        }
    }

    symbols
}

fn free_identifiers(expr: &str) -> Vec<String> {
    static IDENT_RE: OnceLock<Regex> = OnceLock::new();
    let re = IDENT_RE.get_or_init(|| Regex::new(r"\b[a-zA-Z_][a-zA-Z0-9_]*\b").unwrap());
    re.find_iter(expr).map(|m| m.as_str().to_string()).collect()
}

/// Parse and evaluate an expression against a symbol table
pub fn evaluate(
    expr: &str,
    symbols: &HashMap<String, Value>,
    whitelist: Whitelist,
) -> EvalResult<Value> {
    let rhs = effective_expr(expr);
    let tokens = lex(rhs)?;
    let mut parser = Parser { tokens, pos: 0 };
    let ast = parser.parse_expr()?;
    parser.expect_end()?;
    eval_node(&ast, symbols, whitelist)
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    Percent,
    LParen,
    RParen,
    Comma,
    Lt,
    Le,
    Gt,
    Ge,
    EqEq,
    Ne,
    And,
    Or,
    Not,
}

fn lex(input: &str) -> EvalResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                if chars.get(i + 1) == Some(&'*') {
                    tokens.push(Token::DoubleStar);
                    i += 2;
                } else {
                    tokens.push(Token::Star);
                    i += 1;
                }
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '%' => {
                tokens.push(Token::Percent);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Le);
                    i += 2;
                } else {
                    tokens.push(Token::Lt);
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ge);
                    i += 2;
                } else {
                    tokens.push(Token::Gt);
                    i += 1;
                }
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::EqEq);
                    i += 2;
                } else {
                    return Err(EvalError::Parse("unexpected '='".to_string()));
                }
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ne);
                    i += 2;
                } else {
                    return Err(EvalError::Parse("unexpected '!'".to_string()));
                }
            }
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                // Scientific notation: 3.6e6, 1e-3
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        i = j;
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let num = text
                    .parse::<f64>()
                    .map_err(|_| EvalError::Parse(format!("bad number '{text}'")))?;
                tokens.push(Token::Num(num));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    _ => Token::Ident(word),
                });
            }
            other => {
                return Err(EvalError::Parse(format!("unexpected character '{other}'")));
            }
        }
    }

    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Node {
    Num(f64),
    Ident(String),
    Neg(Box<Node>),
    Not(Box<Node>),
    Binary(BinOp, Box<Node>, Box<Node>),
    Call(String, Vec<Node>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_end(&self) -> EvalResult<()> {
        if self.pos == self.tokens.len() {
            Ok(())
        } else {
            Err(EvalError::Parse("trailing tokens".to_string()))
        }
    }

    fn parse_expr(&mut self) -> EvalResult<Node> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> EvalResult<Node> {
        let mut left = self.parse_and()?;
        while self.eat(&Token::Or) {
            let right = self.parse_and()?;
            left = Node::Binary(BinOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> EvalResult<Node> {
        let mut left = self.parse_not()?;
        while self.eat(&Token::And) {
            let right = self.parse_not()?;
            left = Node::Binary(BinOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> EvalResult<Node> {
        if self.eat(&Token::Not) {
            let operand = self.parse_not()?;
            return Ok(Node::Not(Box::new(operand)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> EvalResult<Node> {
        let left = self.parse_additive()?;
        let op = match self.peek() {
            Some(Token::Lt) => BinOp::Lt,
            Some(Token::Le) => BinOp::Le,
            Some(Token::Gt) => BinOp::Gt,
            Some(Token::Ge) => BinOp::Ge,
            Some(Token::EqEq) => BinOp::Eq,
            Some(Token::Ne) => BinOp::Ne,
            _ => return Ok(left),
        };
        self.pos += 1;
        let right = self.parse_additive()?;
        Ok(Node::Binary(op, Box::new(left), Box::new(right)))
    }

    fn parse_additive(&mut self) -> EvalResult<Node> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_multiplicative()?;
            left = Node::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> EvalResult<Node> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::Percent) => BinOp::Mod,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_unary()?;
            left = Node::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> EvalResult<Node> {
        if self.eat(&Token::Minus) {
            let operand = self.parse_unary()?;
            return Ok(Node::Neg(Box::new(operand)));
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> EvalResult<Node> {
        let base = self.parse_primary()?;
        if self.eat(&Token::DoubleStar) {
            // Right-associative, unary-tight exponent
            let exponent = self.parse_unary()?;
            return Ok(Node::Binary(
                BinOp::Pow,
                Box::new(base),
                Box::new(exponent),
            ));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> EvalResult<Node> {
        match self.advance() {
            Some(Token::Num(n)) => Ok(Node::Num(n)),
            Some(Token::Ident(name)) => {
                if self.eat(&Token::LParen) {
                    let mut args = Vec::new();
                    if !self.eat(&Token::RParen) {
                        loop {
                            args.push(self.parse_expr()?);
                            if self.eat(&Token::RParen) {
                                break;
                            }
                            if !self.eat(&Token::Comma) {
                                return Err(EvalError::Parse(
                                    "expected ',' or ')' in call".to_string(),
                                ));
                            }
                        }
                    }
                    Ok(Node::Call(name, args))
                } else {
                    Ok(Node::Ident(name))
                }
            }
            Some(Token::LParen) => {
                let inner = self.parse_expr()?;
                if !self.eat(&Token::RParen) {
                    return Err(EvalError::Parse("expected ')'".to_string()));
                }
                Ok(inner)
            }
            other => Err(EvalError::Parse(format!("unexpected token {other:?}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------

fn eval_node(
    node: &Node,
    symbols: &HashMap<String, Value>,
    whitelist: Whitelist,
) -> EvalResult<Value> {
    match node {
        Node::Num(n) => Ok(Value::Float(*n)),
        Node::Ident(name) => match name.as_str() {
            "True" | "true" => Ok(Value::Bool(true)),
            "False" | "false" => Ok(Value::Bool(false)),
            "None" | "null" => Ok(Value::Null),
            _ => symbols
                .get(name)
                .cloned()
                .ok_or_else(|| EvalError::Eval(format!("undefined identifier '{name}'"))),
        },
        Node::Neg(operand) => {
            let value = numeric(&eval_node(operand, symbols, whitelist)?)?;
            Ok(Value::Float(-value))
        }
        Node::Not(operand) => {
            let value = eval_node(operand, symbols, whitelist)?;
            Ok(Value::Bool(!value.is_truthy()))
        }
        Node::Binary(op, left, right) => {
            // Short-circuit booleans before evaluating the right operand
            if *op == BinOp::And {
                let l = eval_node(left, symbols, whitelist)?;
                if !l.is_truthy() {
                    return Ok(l);
                }
                return eval_node(right, symbols, whitelist);
            }
            if *op == BinOp::Or {
                let l = eval_node(left, symbols, whitelist)?;
                if l.is_truthy() {
                    return Ok(l);
                }
                return eval_node(right, symbols, whitelist);
            }

            let l = eval_node(left, symbols, whitelist)?;
            let r = eval_node(right, symbols, whitelist)?;
            apply_binary(*op, &l, &r)
        }
        Node::Call(name, args) => {
            if !whitelist.permits(name) {
                return Err(EvalError::Eval(format!(
                    "call to '{name}' is not permitted"
                )));
            }
            let values: Vec<Value> = args
                .iter()
                .map(|a| eval_node(a, symbols, whitelist))
                .collect::<EvalResult<_>>()?;
            apply_call(name, &values)
        }
    }
}

fn numeric(value: &Value) -> EvalResult<f64> {
    value
        .as_f64()
        .ok_or_else(|| EvalError::Eval(format!("expected a number, got {value}")))
}

fn apply_binary(op: BinOp, l: &Value, r: &Value) -> EvalResult<Value> {
    // Equality works on any value kind; everything else is numeric
    match op {
        BinOp::Eq => return Ok(Value::Bool(values_equal(l, r))),
        BinOp::Ne => return Ok(Value::Bool(!values_equal(l, r))),
        _ => {}
    }

    let a = numeric(l)?;
    let b = numeric(r)?;
    let result = match op {
        BinOp::Add => Value::Float(a + b),
        BinOp::Sub => Value::Float(a - b),
        BinOp::Mul => Value::Float(a * b),
        BinOp::Div => {
            if b == 0.0 {
                return Err(EvalError::Eval("division by zero".to_string()));
            }
            Value::Float(a / b)
        }
        BinOp::Mod => {
            if b == 0.0 {
                return Err(EvalError::Eval("modulo by zero".to_string()));
            }
            Value::Float(a.rem_euclid(b))
        }
        BinOp::Pow => Value::Float(a.powf(b)),
        BinOp::Lt => Value::Bool(a < b),
        BinOp::Le => Value::Bool(a <= b),
        BinOp::Gt => Value::Bool(a > b),
        BinOp::Ge => Value::Bool(a >= b),
        BinOp::Eq | BinOp::Ne | BinOp::And | BinOp::Or => unreachable!("handled above"),
    };
    Ok(result)
}

fn values_equal(l: &Value, r: &Value) -> bool {
    match (l.as_f64(), r.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => l == r,
    }
}

fn apply_call(name: &str, args: &[Value]) -> EvalResult<Value> {
    let arity = |n: usize| -> EvalResult<()> {
        if args.len() == n {
            Ok(())
        } else {
            Err(EvalError::Eval(format!(
                "{name}() expects {n} argument(s), got {}",
                args.len()
            )))
        }
    };

    match name {
        "abs" => {
            arity(1)?;
            Ok(Value::Float(numeric(&args[0])?.abs()))
        }
        "round" => {
            arity(1)?;
            Ok(Value::Float(numeric(&args[0])?.round()))
        }
        "sqrt" => {
            arity(1)?;
            Ok(Value::Float(numeric(&args[0])?.sqrt()))
        }
        "log" => {
            arity(1)?;
            Ok(Value::Float(numeric(&args[0])?.ln()))
        }
        "exp" => {
            arity(1)?;
            Ok(Value::Float(numeric(&args[0])?.exp()))
        }
        "sin" => {
            arity(1)?;
            Ok(Value::Float(numeric(&args[0])?.sin()))
        }
        "cos" => {
            arity(1)?;
            Ok(Value::Float(numeric(&args[0])?.cos()))
        }
        "tan" => {
            arity(1)?;
            Ok(Value::Float(numeric(&args[0])?.tan()))
        }
        "pow" => {
            arity(2)?;
            Ok(Value::Float(numeric(&args[0])?.powf(numeric(&args[1])?)))
        }
        "min" | "max" => {
            let items: Vec<f64> = if args.len() == 1 {
                match args[0].as_sequence() {
                    Some(seq) => seq.iter().map(numeric).collect::<EvalResult<_>>()?,
                    None => vec![numeric(&args[0])?],
                }
            } else {
                args.iter().map(numeric).collect::<EvalResult<_>>()?
            };
            if items.is_empty() {
                return Err(EvalError::Eval(format!("{name}() of empty sequence")));
            }
            let folded = items
                .into_iter()
                .reduce(|x, y| if name == "min" { x.min(y) } else { x.max(y) })
                .unwrap();
            Ok(Value::Float(folded))
        }
        "sum" => {
            arity(1)?;
            let seq = args[0]
                .as_sequence()
                .ok_or_else(|| EvalError::Eval("sum() expects a sequence".to_string()))?;
            let total: f64 = seq.iter().map(numeric).collect::<EvalResult<Vec<_>>>()?.iter().sum();
            Ok(Value::Float(total))
        }
        "len" => {
            arity(1)?;
            match &args[0] {
                Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
                Value::List(items) | Value::Tuple(items) => Ok(Value::Int(items.len() as i64)),
                Value::Record(fields) => Ok(Value::Int(fields.len() as i64)),
                other => Err(EvalError::Eval(format!("len() of {other}"))),
            }
        }
        "str" => {
            arity(1)?;
            Ok(Value::Str(args[0].to_string()))
        }
        "int" => {
            arity(1)?;
            Ok(Value::Int(numeric(&args[0])? as i64))
        }
        "float" => {
            arity(1)?;
            Ok(Value::Float(numeric(&args[0])?))
        }
        "list" => {
            arity(1)?;
            let seq = args[0]
                .as_sequence()
                .ok_or_else(|| EvalError::Eval("list() expects a sequence".to_string()))?;
            Ok(Value::List(seq.to_vec()))
        }
        "tuple" => {
            arity(1)?;
            let seq = args[0]
                .as_sequence()
                .ok_or_else(|| EvalError::Eval("tuple() expects a sequence".to_string()))?;
            Ok(Value::Tuple(seq.to_vec()))
        }
        other => Err(EvalError::Eval(format!("unknown function '{other}'"))),
    }
}
