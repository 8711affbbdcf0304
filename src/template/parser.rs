//! Template parser.
//!
//! Parses templates with `{{...}}` actions:
//! - `{{.Field}}`, `{{.Field.Sub}}`, `{{.}}` - escaped output
//! - `{{raw .Field}}` - unescaped output
//! - `{{if .X}}...{{else}}...{{end}}` - conditional block
//! - `{{range .X}}...{{end}}` - iteration block
//! - `{{range $i, $v := .X}}...{{end}}` - iteration with bindings
//! - `{{/*comment*/}}` - dropped from output

use crate::error::TemplateError;

/// A value reference inside an action.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// `.` - the current dot
    Dot,
    /// `.A.B` - field path from the dot
    Field(Vec<String>),
    /// `$v` or `$v.A.B` - bound variable with optional field path
    Var(String, Vec<String>),
}

/// A node in the template AST.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Raw HTML/text content
    Text(String),
    /// Output action; `raw` skips HTML escaping
    Output { expr: Expr, raw: bool },
    /// Conditional block
    If {
        cond: Expr,
        body: Vec<Node>,
        else_body: Vec<Node>,
    },
    /// Iteration block; bindings are the optional `$i, $v :=` names
    Range {
        index_var: Option<String>,
        value_var: Option<String>,
        expr: Expr,
        body: Vec<Node>,
    },
}

/// Token types during lexing.
#[derive(Debug, Clone, PartialEq)]
enum Token {
    Text(String),
    /// Trimmed contents of one `{{...}}` action
    Action(String),
}

/// Parse a template source into an AST.
pub fn parse(name: &str, source: &str) -> Result<Vec<Node>, TemplateError> {
    let tokens = tokenize(name, source)?;
    let mut pos = 0;
    let nodes = parse_nodes(name, &tokens, &mut pos, false)?;
    if pos != tokens.len() {
        // parse_nodes stopped at an {{else}}/{{end}} with no open block
        let found = match &tokens[pos] {
            Token::Action(a) => a.clone(),
            Token::Text(_) => String::new(),
        };
        return Err(TemplateError::unexpected(name, &found));
    }
    Ok(nodes)
}

fn tokenize(name: &str, source: &str) -> Result<Vec<Token>, TemplateError> {
    let mut tokens = Vec::new();
    let mut rest = source;

    while let Some(start) = rest.find("{{") {
        if start > 0 {
            tokens.push(Token::Text(rest[..start].to_string()));
        }
        let after = &rest[start + 2..];
        let end = after
            .find("}}")
            .ok_or_else(|| TemplateError::UnclosedTag {
                name: name.to_string(),
            })?;
        let action = after[..end].trim();
        // comments drop out entirely; static merging in the tree keeps
        // the alternation intact
        if !action.starts_with("/*") {
            tokens.push(Token::Action(action.to_string()));
        }
        rest = &after[end + 2..];
    }
    if !rest.is_empty() {
        tokens.push(Token::Text(rest.to_string()));
    }
    Ok(tokens)
}

/// Parse nodes until an `{{end}}`/`{{else}}` closes the enclosing block
/// (when `in_block`), or until the tokens run out.
fn parse_nodes(
    name: &str,
    tokens: &[Token],
    pos: &mut usize,
    in_block: bool,
) -> Result<Vec<Node>, TemplateError> {
    let mut nodes = Vec::new();

    while *pos < tokens.len() {
        match &tokens[*pos] {
            Token::Text(s) => {
                nodes.push(Node::Text(s.clone()));
                *pos += 1;
            }
            Token::Action(action) => {
                if action == "end" || action == "else" {
                    if !in_block {
                        return Err(TemplateError::unexpected(name, action));
                    }
                    return Ok(nodes);
                }
                if let Some(cond) = action.strip_prefix("if ") {
                    *pos += 1;
                    let body = parse_nodes(name, tokens, pos, true)?;
                    let else_body = expect_block_close(name, tokens, pos)?;
                    nodes.push(Node::If {
                        cond: parse_expr(name, cond.trim())?,
                        body,
                        else_body,
                    });
                } else if let Some(header) = action.strip_prefix("range ") {
                    let (index_var, value_var, expr) = parse_range_header(name, header.trim())?;
                    *pos += 1;
                    let body = parse_nodes(name, tokens, pos, true)?;
                    let else_body = expect_block_close(name, tokens, pos)?;
                    if !else_body.is_empty() {
                        return Err(TemplateError::unexpected(name, "else"));
                    }
                    nodes.push(Node::Range {
                        index_var,
                        value_var,
                        expr,
                        body,
                    });
                } else if let Some(expr) = action.strip_prefix("raw ") {
                    nodes.push(Node::Output {
                        expr: parse_expr(name, expr.trim())?,
                        raw: true,
                    });
                    *pos += 1;
                } else {
                    nodes.push(Node::Output {
                        expr: parse_expr(name, action)?,
                        raw: false,
                    });
                    *pos += 1;
                }
            }
        }
    }

    if in_block {
        return Err(TemplateError::MissingEnd {
            name: name.to_string(),
        });
    }
    Ok(nodes)
}

/// Consume the `{{else}}…{{end}}` or `{{end}}` that closes a block,
/// returning the else branch.
fn expect_block_close(
    name: &str,
    tokens: &[Token],
    pos: &mut usize,
) -> Result<Vec<Node>, TemplateError> {
    match tokens.get(*pos) {
        Some(Token::Action(a)) if a == "end" => {
            *pos += 1;
            Ok(Vec::new())
        }
        Some(Token::Action(a)) if a == "else" => {
            *pos += 1;
            let else_body = parse_nodes(name, tokens, pos, true)?;
            match tokens.get(*pos) {
                Some(Token::Action(a)) if a == "end" => {
                    *pos += 1;
                    Ok(else_body)
                }
                _ => Err(TemplateError::MissingEnd {
                    name: name.to_string(),
                }),
            }
        }
        _ => Err(TemplateError::MissingEnd {
            name: name.to_string(),
        }),
    }
}

/// Parse a range header: `EXPR` or `$i, $v := EXPR`.
fn parse_range_header(
    name: &str,
    header: &str,
) -> Result<(Option<String>, Option<String>, Expr), TemplateError> {
    let Some((bindings, expr)) = header.split_once(":=") else {
        return Ok((None, None, parse_expr(name, header)?));
    };
    let expr = parse_expr(name, expr.trim())?;
    let mut names = bindings.split(',').map(str::trim);
    let index_var = names.next().map(|v| parse_var_name(name, v)).transpose()?;
    let value_var = names.next().map(|v| parse_var_name(name, v)).transpose()?;
    if names.next().is_some() || index_var.is_none() {
        return Err(TemplateError::unexpected(name, header));
    }
    // with a single binding, `range $v := .X` binds the value
    if value_var.is_none() {
        return Ok((None, index_var, expr));
    }
    Ok((index_var, value_var, expr))
}

fn parse_var_name(name: &str, s: &str) -> Result<String, TemplateError> {
    s.strip_prefix('$')
        .filter(|rest| !rest.is_empty())
        .map(str::to_string)
        .ok_or_else(|| TemplateError::unexpected(name, s))
}

fn parse_expr(name: &str, s: &str) -> Result<Expr, TemplateError> {
    if s == "." {
        return Ok(Expr::Dot);
    }
    if let Some(path) = s.strip_prefix('.') {
        let fields: Vec<String> = path.split('.').map(str::to_string).collect();
        if fields.iter().any(|f| f.is_empty()) {
            return Err(TemplateError::unexpected(name, s));
        }
        return Ok(Expr::Field(fields));
    }
    if let Some(var) = s.strip_prefix('$') {
        let mut parts = var.split('.').map(str::to_string);
        let head = parts.next().unwrap_or_default();
        let fields: Vec<String> = parts.collect();
        if head.is_empty() || fields.iter().any(|f| f.is_empty()) {
            return Err(TemplateError::unexpected(name, s));
        }
        return Ok(Expr::Var(head, fields));
    }
    Err(TemplateError::unexpected(name, s))
}
