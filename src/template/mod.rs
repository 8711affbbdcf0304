//! Template engine for live views.
//!
//! A [`Template`] is parsed once and executed many times against a
//! `serde_json::Value` dot, either to a plain HTML string or to a
//! [`Tree`](crate::tmpl::Tree) that separates static fragments from
//! dynamic values. The two modes agree: flattening the captured tree
//! reproduces the plain rendering.

pub mod parser;
pub mod renderer;

use serde_json::Value;

use crate::error::TemplateError;
use parser::Node;

pub use renderer::html_escape;

/// A parsed template.
#[derive(Debug, Clone)]
pub struct Template {
    name: String,
    nodes: Vec<Node>,
}

impl Template {
    /// Parse a template from source.
    pub fn parse(name: impl Into<String>, source: &str) -> Result<Self, TemplateError> {
        let name = name.into();
        let nodes = parser::parse(&name, source)?;
        Ok(Self { name, nodes })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Render the template to a plain HTML string.
    pub fn execute(&self, dot: &Value) -> Result<String, TemplateError> {
        renderer::execute(&self.name, &self.nodes, dot)
    }

    /// Execute the template, capturing statics and dynamics into a tree.
    pub fn execute_tree(&self, dot: &Value) -> Result<crate::tmpl::Tree, TemplateError> {
        renderer::execute_tree(&self.name, &self.nodes, dot)
    }
}
