//! Template execution.
//!
//! Templates execute against a `serde_json::Value` dot in two modes:
//! plain rendering to an HTML string, and tree capture, where the same
//! walk drives the [`Tree`](crate::tmpl::Tree) builder so that statics
//! and dynamics are recorded separately.

use serde_json::Value;

use crate::error::TemplateError;
use crate::template::parser::{Expr, Node};
use crate::tmpl::Tree;

/// Variable bindings introduced by `range` headers.
struct Scope<'a> {
    dot: &'a Value,
    vars: Vec<(String, Value)>,
}

impl<'a> Scope<'a> {
    fn new(dot: &'a Value) -> Self {
        Self {
            dot,
            vars: Vec::new(),
        }
    }

    fn lookup_var(&self, name: &str) -> Value {
        self.vars
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
            .unwrap_or(Value::Null)
    }
}

fn eval(expr: &Expr, scope: &Scope) -> Value {
    match expr {
        Expr::Dot => scope.dot.clone(),
        Expr::Field(path) => walk_path(scope.dot, path),
        Expr::Var(name, path) => walk_path(&scope.lookup_var(name), path),
    }
}

fn walk_path(value: &Value, path: &[String]) -> Value {
    let mut cur = value;
    for field in path {
        match cur {
            Value::Object(map) => match map.get(field) {
                Some(v) => cur = v,
                None => return Value::Null,
            },
            _ => return Value::Null,
        }
    }
    cur.clone()
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Stringify a value for output, the way templates print them:
/// nulls vanish, strings print as-is, everything else as JSON.
fn display(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Escape HTML-significant characters.
pub fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn output_value(expr: &Expr, raw: bool, scope: &Scope) -> String {
    let s = display(&eval(expr, scope));
    if raw {
        s
    } else {
        html_escape(&s)
    }
}

/// The items a `range` expression produces: (index-or-key, value) pairs.
fn range_items(name: &str, value: Value) -> Result<Vec<(Value, Value)>, TemplateError> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => Ok(items
            .into_iter()
            .enumerate()
            .map(|(i, v)| (Value::from(i), v))
            .collect()),
        Value::Object(map) => Ok(map
            .into_iter()
            .map(|(k, v)| (Value::String(k), v))
            .collect()),
        Value::Bool(_) => Err(TemplateError::NotIterable { name: name.to_string(), kind: "bool" }),
        Value::Number(_) => Err(TemplateError::NotIterable { name: name.to_string(), kind: "number" }),
        Value::String(_) => Err(TemplateError::NotIterable { name: name.to_string(), kind: "string" }),
    }
}

/// Render nodes to a plain HTML string.
pub fn render_nodes(
    name: &str,
    nodes: &[Node],
    scope: &mut Scope,
    out: &mut String,
) -> Result<(), TemplateError> {
    for node in nodes {
        match node {
            Node::Text(s) => out.push_str(s),
            Node::Output { expr, raw } => out.push_str(&output_value(expr, *raw, scope)),
            Node::If {
                cond,
                body,
                else_body,
            } => {
                let branch = if truthy(&eval(cond, scope)) {
                    body
                } else {
                    else_body
                };
                render_nodes(name, branch, scope, out)?;
            }
            Node::Range {
                index_var,
                value_var,
                expr,
                body,
            } => {
                for (idx, item) in range_items(name, eval(expr, scope))? {
                    let mut inner = push_range_scope(scope, index_var, value_var, idx, &item);
                    render_nodes(name, body, &mut inner, out)?;
                }
            }
        }
    }
    Ok(())
}

/// Execute nodes into a tree, recording statics and dynamics.
pub fn capture_nodes(
    name: &str,
    nodes: &[Node],
    scope: &mut Scope,
    tree: &mut Tree,
) -> Result<(), TemplateError> {
    for node in nodes {
        match node {
            Node::Text(s) => tree.append_static(s),
            Node::Output { expr, raw } => tree.append_dynamic(output_value(expr, *raw, scope)),
            Node::If {
                cond,
                body,
                else_body,
            } => {
                let branch = if truthy(&eval(cond, scope)) {
                    body
                } else {
                    else_body
                };
                // an untaken branch leaves the sub empty, which
                // serializes as the empty string
                let sub = tree.append_sub();
                capture_nodes(name, branch, scope, sub)?;
            }
            Node::Range {
                index_var,
                value_var,
                expr,
                body,
            } => {
                let sub = tree.append_range_sub();
                for (idx, item) in range_items(name, eval(expr, scope))? {
                    let mut inner = push_range_scope(scope, index_var, value_var, idx, &item);
                    capture_nodes(name, body, &mut inner, sub)?;
                    if sub.current_row_len() == 0 {
                        // a dynamics-free iteration still needs a row,
                        // or the client would collapse the repetition
                        sub.append_dynamic(String::new());
                    }
                    sub.inc_range_step();
                }
            }
        }
    }
    Ok(())
}

/// Build the scope for one range iteration: the dot becomes the item,
/// and the optional `$i`/`$v` bindings are layered on.
fn push_range_scope<'a>(
    scope: &Scope<'_>,
    index_var: &Option<String>,
    value_var: &Option<String>,
    idx: Value,
    item: &'a Value,
) -> Scope<'a> {
    let mut vars = scope.vars.clone();
    if let Some(iv) = index_var {
        vars.push((iv.clone(), idx));
    }
    if let Some(vv) = value_var {
        vars.push((vv.clone(), item.clone()));
    }
    Scope { dot: item, vars }
}

/// Entry point: render to a plain string.
pub fn execute(name: &str, nodes: &[Node], dot: &Value) -> Result<String, TemplateError> {
    let mut out = String::new();
    let mut scope = Scope::new(dot);
    render_nodes(name, nodes, &mut scope, &mut out)?;
    Ok(out)
}

/// Entry point: execute into a tree.
pub fn execute_tree(name: &str, nodes: &[Node], dot: &Value) -> Result<Tree, TemplateError> {
    let mut tree = Tree::new();
    let mut scope = Scope::new(dot);
    capture_nodes(name, nodes, &mut scope, &mut tree)?;
    Ok(tree)
}
