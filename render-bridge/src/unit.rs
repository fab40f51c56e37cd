//! Executable units.
//!
//! `ExecutableUnit` is the shareable handle the engine caches and hands out.
//! `ProgramUnit` is what the linker produces from unit source: the
//! instruction tree plus the import table, evaluated against a
//! `RenderContext`. Names resolve as locals, then imports, then bindings.

use indexmap::IndexMap;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use template_compiler::unit_ir::{Expr, Instr, MarkupContext};

use crate::context::RenderContext;
use crate::error::RenderError;
use crate::extension::USE_EXTENSION;
use crate::value::Value;

pub trait RenderUnit: Send + Sync {
    fn render(&self, out: &mut String, context: &RenderContext) -> Result<(), RenderError>;

    fn name(&self) -> &str {
        "<anonymous>"
    }
}

/// Cheap-to-clone handle to a compiled unit. Safe to render from many
/// threads at once.
#[derive(Clone)]
pub struct ExecutableUnit {
    inner: Arc<dyn RenderUnit>,
}

impl ExecutableUnit {
    pub fn new(unit: impl RenderUnit + 'static) -> Self {
        ExecutableUnit {
            inner: Arc::new(unit),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn execute(&self, context: &RenderContext) -> Result<String, RenderError> {
        let mut out = String::new();
        self.inner.render(&mut out, context)?;
        Ok(out)
    }

    pub fn ptr_eq(&self, other: &ExecutableUnit) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for ExecutableUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ExecutableUnit").field(&self.name()).finish()
    }
}

/// Linked unit source.
#[derive(Debug)]
pub struct ProgramUnit {
    name: String,
    /// simple name -> fully qualified reference path
    imports: HashMap<String, String>,
    body: Vec<Instr>,
}

impl ProgramUnit {
    pub fn new(name: impl Into<String>, imports: HashMap<String, String>, body: Vec<Instr>) -> Self {
        ProgramUnit {
            name: name.into(),
            imports,
            body,
        }
    }
}

impl RenderUnit for ProgramUnit {
    fn render(&self, out: &mut String, context: &RenderContext) -> Result<(), RenderError> {
        let mut frame = Frame {
            unit: self,
            context,
            locals: vec![HashMap::new()],
        };
        frame.exec_block(&self.body, out)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

struct Frame<'a> {
    unit: &'a ProgramUnit,
    context: &'a RenderContext,
    locals: Vec<HashMap<String, Value>>,
}

impl Frame<'_> {
    fn define(&mut self, name: &str, value: Value) {
        if let Some(scope) = self.locals.last_mut() {
            scope.insert(name.to_string(), value);
        }
    }

    fn lookup(&self, name: &str) -> Value {
        if let Some(value) = self.locals.iter().rev().find_map(|scope| scope.get(name)) {
            return value.clone();
        }
        if let Some(path) = self.unit.imports.get(name) {
            return Value::Str(path.clone());
        }
        self.context.bindings().get(name).unwrap_or_default()
    }

    fn exec_block(&mut self, body: &[Instr], out: &mut String) -> Result<(), RenderError> {
        let om = self.context.object_model();
        for instr in body {
            match instr {
                Instr::Text { text } => out.push_str(text),
                Instr::Out { expr, context } => {
                    let value = self.eval(expr)?;
                    write_escaped(out, &om.to_string(&value), *context);
                }
                Instr::Set { name, expr } => {
                    let value = self.eval(expr)?;
                    self.define(name, value);
                }
                Instr::Use { name, target } => {
                    let target = self.eval(target)?;
                    let object = self.context.call(USE_EXTENSION, &[target])?;
                    self.define(name, object);
                }
                Instr::If {
                    cond,
                    then,
                    otherwise,
                } => {
                    let test = self.eval(cond)?;
                    if om.to_bool(&test) {
                        self.exec_block(then, out)?;
                    } else {
                        self.exec_block(otherwise, out)?;
                    }
                }
                Instr::For { item, list, body } => {
                    let items = om.to_collection(&self.eval(list)?);
                    let count = items.len();
                    let status_name = format!("{}List", item);
                    for (index, value) in items.into_iter().enumerate() {
                        self.locals.push(HashMap::new());
                        self.define(item, value);
                        self.define(&status_name, loop_status(index, count));
                        let result = self.exec_block(body, out);
                        self.locals.pop();
                        result?;
                    }
                }
            }
        }
        Ok(())
    }

    fn eval(&self, expr: &Expr) -> Result<Value, RenderError> {
        let om = self.context.object_model();
        Ok(match expr {
            Expr::Literal { value } => Value::from(value),
            Expr::Name { name } => self.lookup(name),
            Expr::TypeRef { path } => Value::Str(path.clone()),
            Expr::Property { target, name } => om.resolve_property(&self.eval(target)?, name),
            Expr::Index { target, index } => {
                om.resolve_index(&self.eval(target)?, &self.eval(index)?)
            }
            Expr::Not { expr } => Value::Bool(!om.to_bool(&self.eval(expr)?)),
            Expr::And { left, right } => {
                let left = self.eval(left)?;
                if om.to_bool(&left) {
                    self.eval(right)?
                } else {
                    left
                }
            }
            Expr::Or { left, right } => {
                let left = self.eval(left)?;
                if om.to_bool(&left) {
                    left
                } else {
                    self.eval(right)?
                }
            }
            Expr::Eq { left, right } => Value::Bool(om.equals(&self.eval(left)?, &self.eval(right)?)),
            Expr::Ne { left, right } => {
                Value::Bool(!om.equals(&self.eval(left)?, &self.eval(right)?))
            }
            Expr::Call { function, args } => {
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                self.context.call(function, &args)?
            }
        })
    }
}

fn loop_status(index: usize, count: usize) -> Value {
    let mut status = IndexMap::new();
    status.insert("index".to_string(), Value::Int(index as i64));
    status.insert("count".to_string(), Value::Int(index as i64 + 1));
    status.insert("first".to_string(), Value::Bool(index == 0));
    status.insert("last".to_string(), Value::Bool(index + 1 == count));
    status.insert("odd".to_string(), Value::Bool(index % 2 == 1));
    status.insert("even".to_string(), Value::Bool(index % 2 == 0));
    Value::Map(status)
}

fn write_escaped(out: &mut String, text: &str, context: MarkupContext) {
    if context == MarkupContext::Unsafe {
        out.push_str(text);
        return;
    }
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            '`' if context == MarkupContext::Attribute => out.push_str("&#96;"),
            '=' if context == MarkupContext::Attribute => out.push_str("&#61;"),
            c => out.push(c),
        }
    }
}
