// Unit source: the host source text emitted by the codegen backend.
// Serialized as JSON; the render bridge links and executes it.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A complete generated unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitSource {
    /// Fully qualified unit name.
    pub unit: String,
    /// Logical path of the script the unit was generated from.
    pub script: String,
    /// Imported reference paths, sorted.
    #[serde(default)]
    pub imports: Vec<String>,
    pub body: Vec<Instr>,
}

impl UnitSource {
    pub fn to_source(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_source(source: &str) -> Result<Self> {
        Ok(serde_json::from_str(source)?)
    }
}

/// Escaping applied when an expression is written to the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkupContext {
    #[default]
    Html,
    Text,
    Attribute,
    Unsafe,
}

impl MarkupContext {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "html" => Some(MarkupContext::Html),
            "text" => Some(MarkupContext::Text),
            "attribute" => Some(MarkupContext::Attribute),
            "unsafe" => Some(MarkupContext::Unsafe),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Instr {
    Text {
        text: String,
    },
    Out {
        expr: Expr,
        #[serde(default)]
        context: MarkupContext,
    },
    Set {
        name: String,
        expr: Expr,
    },
    Use {
        name: String,
        target: Expr,
    },
    If {
        cond: Expr,
        then: Vec<Instr>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        otherwise: Vec<Instr>,
    },
    For {
        item: String,
        list: Expr,
        body: Vec<Instr>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expr {
    Literal {
        value: Literal,
    },
    /// Identifier resolved at execution: locals, imports, then bindings.
    Name {
        name: String,
    },
    /// Fully qualified reference that was not imported.
    TypeRef {
        path: String,
    },
    Property {
        target: Box<Expr>,
        name: String,
    },
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
    Not {
        expr: Box<Expr>,
    },
    And {
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Or {
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Eq {
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Ne {
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Runtime extension call.
    Call {
        function: String,
        args: Vec<Expr>,
    },
}

impl Expr {
    pub fn name(name: impl Into<String>) -> Self {
        Expr::Name { name: name.into() }
    }

    pub fn string(value: impl Into<String>) -> Self {
        Expr::Literal {
            value: Literal::Str(value.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}
