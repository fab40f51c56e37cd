// Lowering: template node tree -> flat command stream
// Blocks are opened and closed by explicit commands so a backend can emit
// them with a simple stack. Output options become extension calls here.

use std::collections::HashSet;

use crate::diagnostics::Diagnostic;
use crate::surface_parser::{Location, Node, OutputOption, Template};
use crate::unit_ir::{Expr, Literal, MarkupContext};

/// Option name selecting the escaping context of an output expression.
pub const CONTEXT_OPTION: &str = "context";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Text(String),
    Output { expr: Expr, context: MarkupContext },
    Set { name: String, expr: Expr },
    /// Use-object declaration; the backend decides whether `path` is imported.
    Use { name: String, path: String },
    If { cond: Expr },
    Else,
    EndIf,
    For { item: String, list: Expr },
    EndFor,
}

/// A template-local variable and where it is introduced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub name: String,
    pub location: Location,
}

/// Lowered command stream plus the diagnostics found while lowering.
#[derive(Debug, Clone, Default)]
pub struct Lowered {
    pub commands: Vec<Command>,
    pub diagnostics: Vec<Diagnostic>,
    /// Every local introduced by `set`, `use` or a `for` loop, in order.
    pub declarations: Vec<Declaration>,
}

struct Lowering<'a> {
    script_name: &'a str,
    scopes: Vec<HashSet<String>>,
    out: Lowered,
}

pub fn lower_template(template: &Template, script_name: &str) -> Lowered {
    let mut lowering = Lowering {
        script_name,
        scopes: vec![HashSet::new()],
        out: Lowered::default(),
    };
    lowering.lower_nodes(&template.nodes);
    lowering.out
}

impl<'a> Lowering<'a> {
    fn warn(&mut self, location: Location, message: String) {
        self.out.diagnostics.push(Diagnostic::warning(
            self.script_name,
            location.line,
            location.column,
            message,
        ));
    }

    fn error(&mut self, location: Location, message: String) {
        self.out.diagnostics.push(Diagnostic::error(
            self.script_name,
            location.line,
            location.column,
            message,
        ));
    }

    fn declare(&mut self, name: &str, location: Location) {
        self.out.declarations.push(Declaration {
            name: name.to_string(),
            location,
        });
        let redeclared = match self.scopes.last_mut() {
            Some(scope) => !scope.insert(name.to_string()),
            None => false,
        };
        if redeclared {
            self.warn(
                location,
                format!("variable '{}' is redeclared in the same scope", name),
            );
        }
    }

    fn emit(&mut self, command: Command) {
        self.out.commands.push(command);
    }

    fn lower_nodes(&mut self, nodes: &[Node]) {
        for node in nodes {
            self.lower_node(node);
        }
    }

    fn lower_node(&mut self, node: &Node) {
        match node {
            Node::Text(text) => self.emit(Command::Text(text.clone())),
            Node::Output {
                expr,
                options,
                location,
            } => self.lower_output(expr.as_ref(), options, *location),
            Node::Use {
                name,
                path,
                location,
            } => {
                self.declare(name, *location);
                self.emit(Command::Use {
                    name: name.clone(),
                    path: path.clone(),
                });
            }
            Node::Set {
                name,
                expr,
                location,
            } => {
                self.declare(name, *location);
                self.emit(Command::Set {
                    name: name.clone(),
                    expr: expr.clone(),
                });
            }
            Node::If {
                cond,
                then,
                otherwise,
                ..
            } => {
                self.emit(Command::If { cond: cond.clone() });
                self.lower_nodes(then);
                if let Some(otherwise) = otherwise {
                    self.emit(Command::Else);
                    self.lower_nodes(otherwise);
                }
                self.emit(Command::EndIf);
            }
            Node::For {
                item,
                list,
                body,
                location,
            } => {
                self.emit(Command::For {
                    item: item.clone(),
                    list: list.clone(),
                });
                self.scopes.push(HashSet::new());
                self.declare(item, *location);
                self.declare(&format!("{}List", item), *location);
                self.lower_nodes(body);
                self.scopes.pop();
                self.emit(Command::EndFor);
            }
        }
    }

    fn lower_output(&mut self, expr: Option<&Expr>, options: &[OutputOption], location: Location) {
        let mut expr = match expr {
            Some(expr) => expr.clone(),
            None => {
                self.warn(location, "empty expression renders nothing".to_string());
                return;
            }
        };

        let mut context = MarkupContext::Html;
        for option in options {
            if option.name == CONTEXT_OPTION {
                match &option.value {
                    Some(Expr::Literal {
                        value: Literal::Str(name),
                    }) => match MarkupContext::from_name(name) {
                        Some(selected) => context = selected,
                        None => self.warn(
                            option.location,
                            format!("unknown context '{}', falling back to 'html'", name),
                        ),
                    },
                    _ => self.error(
                        option.location,
                        "the context option expects a string literal".to_string(),
                    ),
                }
                continue;
            }

            let mut args = vec![expr];
            if let Some(value) = &option.value {
                args.push(value.clone());
            }
            expr = Expr::Call {
                function: option.name.clone(),
                args,
            };
        }

        self.emit(Command::Output { expr, context });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::DiagnosticKind;
    use crate::surface_parser::parse_template;

    fn lower(source: &str) -> Lowered {
        lower_template(&parse_template(source).unwrap(), "test.html")
    }

    #[test]
    fn test_options_become_calls() {
        let lowered = lower("${ title @ upper, join = '-', context = 'unsafe' }");
        assert!(lowered.diagnostics.is_empty());
        assert_eq!(
            lowered.commands,
            vec![Command::Output {
                expr: Expr::Call {
                    function: "join".to_string(),
                    args: vec![
                        Expr::Call {
                            function: "upper".to_string(),
                            args: vec![Expr::name("title")],
                        },
                        Expr::string("-"),
                    ],
                },
                context: MarkupContext::Unsafe,
            }]
        );
    }

    #[test]
    fn test_blocks_are_bracketed() {
        let lowered = lower("{% if a %}x{% else %}y{% end %}{% for i in l %}${i}{% end %}");
        let shapes: Vec<&str> = lowered
            .commands
            .iter()
            .map(|c| match c {
                Command::Text(_) => "text",
                Command::Output { .. } => "out",
                Command::Set { .. } => "set",
                Command::Use { .. } => "use",
                Command::If { .. } => "if",
                Command::Else => "else",
                Command::EndIf => "endif",
                Command::For { .. } => "for",
                Command::EndFor => "endfor",
            })
            .collect();
        assert_eq!(
            shapes,
            vec!["if", "text", "else", "text", "endif", "for", "out", "endfor"]
        );
    }

    #[test]
    fn test_warnings() {
        let lowered = lower("${}{% set a = 1 %}{% set a = 2 %}${ a @ context = 'script' }");
        let kinds: Vec<DiagnosticKind> = lowered.diagnostics.iter().map(|d| d.kind).collect();
        assert_eq!(kinds, vec![DiagnosticKind::Warning; 3]);
        assert!(lowered.diagnostics[0].message.contains("empty expression"));
        assert!(lowered.diagnostics[1].message.contains("redeclared"));
        assert!(lowered.diagnostics[2].message.contains("unknown context"));
        assert_eq!(lowered.diagnostics[1].script_name, "test.html");
    }

    #[test]
    fn test_loop_variable_does_not_leak() {
        let lowered = lower("{% for i in l %}{% set x = i %}{% end %}{% set x = 1 %}");
        assert!(lowered.diagnostics.is_empty());
    }

    #[test]
    fn test_non_literal_context_is_an_error() {
        let lowered = lower("${ a @ context = b }");
        assert_eq!(lowered.diagnostics.len(), 1);
        assert!(lowered.diagnostics[0].is_error());
    }

    #[test]
    fn test_declarations_are_recorded() {
        let lowered = lower("{% use m = 'com.acme.Model' %}{% for i in l %}{% set x = i %}{% end %}");
        let names: Vec<&str> = lowered.declarations.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["m", "i", "iList", "x"]);
        assert_eq!(lowered.declarations[1].location, Location { line: 1, column: 31 });
    }
}
