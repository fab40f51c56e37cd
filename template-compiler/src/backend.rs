// Codegen backend: command stream -> unit source
//
// INVARIANT:
// - A reference is imported only when every installed policy allows it.
// - A rejected reference is still usable; it is emitted fully qualified.
// - Output is deterministic for a fixed command stream and policy outcome.

use std::collections::BTreeSet;

use crate::commands::Command;
use crate::error::{Error, Result};
use crate::identity::{simple_name, SourceIdentifier};
use crate::unit_ir::{Expr, Instr, UnitSource};

/// Predicate deciding whether generated code may import a reference path.
pub trait ReferencePolicy: Send + Sync {
    fn allow(&self, path: &str) -> bool;
}

impl<F> ReferencePolicy for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn allow(&self, path: &str) -> bool {
        self(path)
    }
}

/// Ordered list of policies composed with logical AND.
///
/// An empty list allows every reference.
#[derive(Default)]
pub struct ReferencePolicies {
    policies: Vec<Box<dyn ReferencePolicy>>,
}

impl ReferencePolicies {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, policy: impl ReferencePolicy + 'static) {
        self.policies.push(Box::new(policy));
    }

    pub fn with(mut self, policy: impl ReferencePolicy + 'static) -> Self {
        self.push(policy);
        self
    }

    pub fn allow(&self, path: &str) -> bool {
        self.policies.iter().all(|policy| policy.allow(path))
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

/// Hook set a template compiler drives.
pub trait CodegenBackend {
    /// May generated code import `path` under its simple name?
    fn allow_reference(&self, path: &str) -> bool;

    /// Would a template-local `name` hide a global binding? Backends that
    /// know no globals never report one.
    fn shadows_global(&self, _name: &str) -> bool {
        false
    }

    /// Consume a lowered command stream.
    fn handle(&mut self, commands: Vec<Command>) -> Result<()>;

    /// Emit host source for everything handled so far.
    fn build(&self, source: &SourceIdentifier) -> Result<String>;
}

enum Block {
    Root(Vec<Instr>),
    If {
        cond: Expr,
        then: Vec<Instr>,
        otherwise: Option<Vec<Instr>>,
    },
    For {
        item: String,
        list: Expr,
        body: Vec<Instr>,
    },
}

impl Block {
    fn instrs_mut(&mut self) -> &mut Vec<Instr> {
        match self {
            Block::Root(body) => body,
            Block::If {
                then, otherwise, ..
            } => match otherwise {
                Some(body) => body,
                None => then,
            },
            Block::For { body, .. } => body,
        }
    }
}

/// Backend emitting JSON unit source.
#[derive(Default)]
pub struct UnitSourceBackend {
    policies: ReferencePolicies,
    globals: BTreeSet<String>,
    imports: BTreeSet<String>,
    body: Vec<Instr>,
}

impl UnitSourceBackend {
    pub fn new(policies: ReferencePolicies) -> Self {
        Self {
            policies,
            globals: BTreeSet::new(),
            imports: BTreeSet::new(),
            body: Vec::new(),
        }
    }

    /// Names bound globally when the generated unit renders.
    pub fn with_globals<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.globals.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn imports(&self) -> impl Iterator<Item = &str> {
        self.imports.iter().map(String::as_str)
    }

    // Import `path` unless a policy rejects it or another import already
    // claims its simple name.
    fn reference(&mut self, path: &str) -> Expr {
        let name = simple_name(path);
        let clashes = self
            .imports
            .iter()
            .any(|existing| existing != path && simple_name(existing) == name);
        if !clashes && self.allow_reference(path) {
            self.imports.insert(path.to_string());
            Expr::name(name)
        } else {
            Expr::TypeRef {
                path: path.to_string(),
            }
        }
    }
}

fn push_instr(stack: &mut [Block], instr: Instr) {
    if let Some(block) = stack.last_mut() {
        let body = block.instrs_mut();
        if let Instr::Text { text } = &instr {
            if let Some(Instr::Text { text: previous }) = body.last_mut() {
                previous.push_str(text);
                return;
            }
        }
        body.push(instr);
    }
}

impl CodegenBackend for UnitSourceBackend {
    fn allow_reference(&self, path: &str) -> bool {
        self.policies.allow(path)
    }

    fn shadows_global(&self, name: &str) -> bool {
        self.globals.contains(name)
    }

    fn handle(&mut self, commands: Vec<Command>) -> Result<()> {
        let mut stack = vec![Block::Root(Vec::new())];

        for command in commands {
            match command {
                Command::Text(text) => push_instr(&mut stack, Instr::Text { text }),
                Command::Output { expr, context } => {
                    push_instr(&mut stack, Instr::Out { expr, context })
                }
                Command::Set { name, expr } => push_instr(&mut stack, Instr::Set { name, expr }),
                Command::Use { name, path } => {
                    let target = self.reference(&path);
                    push_instr(&mut stack, Instr::Use { name, target });
                }
                Command::If { cond } => stack.push(Block::If {
                    cond,
                    then: Vec::new(),
                    otherwise: None,
                }),
                Command::Else => match stack.last_mut() {
                    Some(Block::If { otherwise, .. }) if otherwise.is_none() => {
                        *otherwise = Some(Vec::new());
                    }
                    _ => return Err(Error::Codegen("else outside of an if block".to_string())),
                },
                Command::EndIf => match stack.pop() {
                    Some(Block::If {
                        cond,
                        then,
                        otherwise,
                    }) => push_instr(
                        &mut stack,
                        Instr::If {
                            cond,
                            then,
                            otherwise: otherwise.unwrap_or_default(),
                        },
                    ),
                    _ => return Err(Error::Codegen("unbalanced end of if block".to_string())),
                },
                Command::For { item, list } => stack.push(Block::For {
                    item,
                    list,
                    body: Vec::new(),
                }),
                Command::EndFor => match stack.pop() {
                    Some(Block::For { item, list, body }) => {
                        push_instr(&mut stack, Instr::For { item, list, body })
                    }
                    _ => return Err(Error::Codegen("unbalanced end of for block".to_string())),
                },
            }
        }

        match stack.pop() {
            Some(Block::Root(body)) if stack.is_empty() => {
                self.body.extend(body);
                Ok(())
            }
            _ => Err(Error::Codegen("unclosed block at end of stream".to_string())),
        }
    }

    fn build(&self, source: &SourceIdentifier) -> Result<String> {
        let unit = UnitSource {
            unit: source.fully_qualified_name(),
            script: source.identity().path().to_string(),
            imports: self.imports.iter().cloned().collect(),
            body: self.body.clone(),
        };
        unit.to_source()
    }
}
