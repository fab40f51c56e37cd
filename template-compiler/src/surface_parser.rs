// Surface parser for the template language
// Parses: text, ${ expr @ options }, {% use | set | if | else | for | end %}, {# comments #}
// Produces a node tree; expressions are parsed straight into unit IR expressions.

use thiserror::Error;

use crate::identity::is_valid_reference_path;
use crate::unit_ir::{Expr, Literal};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{line}:{column}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub line: usize,
    pub column: usize,
}

/// `@ name` or `@ name = expr` following an output expression.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputOption {
    pub name: String,
    pub value: Option<Expr>,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Text(String),
    Output {
        expr: Option<Expr>,
        options: Vec<OutputOption>,
        location: Location,
    },
    Use {
        name: String,
        path: String,
        location: Location,
    },
    Set {
        name: String,
        expr: Expr,
        location: Location,
    },
    If {
        cond: Expr,
        then: Vec<Node>,
        otherwise: Option<Vec<Node>>,
        location: Location,
    },
    For {
        item: String,
        list: Expr,
        body: Vec<Node>,
        location: Location,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Template {
    pub nodes: Vec<Node>,
}

pub fn parse_template(source: &str) -> Result<Template, ParseError> {
    Parser::new(source).parse()
}

const PUNCTS: &[&str] = &[
    "&&", "||", "==", "!=", ".", "[", "]", "(", ")", "!", "=", ",", "@",
];

const LITERAL_WORDS: &[&str] = &["true", "false", "null"];

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Str(String),
    Int(i64),
    Float(f64),
    Punct(&'static str),
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    offset: usize,
}

fn describe(tok: &Tok) -> String {
    match tok {
        Tok::Ident(name) => format!("'{}'", name),
        Tok::Str(s) => format!("string {:?}", s),
        Tok::Int(n) => n.to_string(),
        Tok::Float(f) => f.to_string(),
        Tok::Punct(p) => format!("'{}'", p),
    }
}

struct TokenStream<'t> {
    tokens: &'t [Token],
    pos: usize,
    end_offset: usize,
}

impl<'t> TokenStream<'t> {
    fn new(tokens: &'t [Token], end_offset: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            end_offset,
        }
    }

    fn peek(&self) -> Option<&'t Tok> {
        self.tokens.get(self.pos).map(|t| &t.tok)
    }

    fn next(&mut self) -> Option<&'t Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|t| t.offset)
            .unwrap_or(self.end_offset)
    }

    fn at_punct(&self, punct: &str) -> bool {
        matches!(self.peek(), Some(Tok::Punct(p)) if *p == punct)
    }

    fn eat_punct(&mut self, punct: &str) -> bool {
        if self.at_punct(punct) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }
}

// Open block while its body is being collected
enum Frame {
    Root(Vec<Node>),
    If {
        cond: Expr,
        location: Location,
        then: Vec<Node>,
        otherwise: Option<Vec<Node>>,
    },
    For {
        item: String,
        list: Expr,
        location: Location,
        body: Vec<Node>,
    },
}

impl Frame {
    fn nodes_mut(&mut self) -> &mut Vec<Node> {
        match self {
            Frame::Root(nodes) => nodes,
            Frame::If {
                then, otherwise, ..
            } => match otherwise {
                Some(nodes) => nodes,
                None => then,
            },
            Frame::For { body, .. } => body,
        }
    }
}

struct Parser<'s> {
    source: &'s str,
    line_starts: Vec<usize>,
}

impl<'s> Parser<'s> {
    fn new(source: &'s str) -> Self {
        let mut line_starts = vec![0];
        for (i, b) in source.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(i + 1);
            }
        }
        Self {
            source,
            line_starts,
        }
    }

    fn location(&self, offset: usize) -> Location {
        let line_idx = match self.line_starts.binary_search(&offset) {
            Ok(idx) => idx,
            Err(idx) => idx - 1,
        };
        let line_start = self.line_starts[line_idx];
        let column = self.source[line_start..offset].chars().count() + 1;
        Location {
            line: line_idx + 1,
            column,
        }
    }

    fn error(&self, offset: usize, message: impl Into<String>) -> ParseError {
        let location = self.location(offset);
        ParseError {
            line: location.line,
            column: location.column,
            message: message.into(),
        }
    }

    fn parse(self) -> Result<Template, ParseError> {
        let bytes = self.source.as_bytes();
        let mut stack = vec![Frame::Root(Vec::new())];
        let mut text_start = 0;
        let mut pos = 0;

        while pos + 1 < bytes.len() {
            let pair = (bytes[pos], bytes[pos + 1]);
            match pair {
                (b'$', b'{') => {
                    self.flush_text(&mut stack, text_start, pos);
                    let end = self.find_close(pos, pos + 2, "}", "unterminated expression '${'")?;
                    let node = self.parse_output(pos, pos + 2, end)?;
                    push_node(&mut stack, node);
                    pos = end + 1;
                    text_start = pos;
                }
                (b'{', b'%') => {
                    self.flush_text(&mut stack, text_start, pos);
                    let end = self.find_close(pos, pos + 2, "%}", "unterminated block tag '{%'")?;
                    self.parse_tag(&mut stack, pos, pos + 2, end)?;
                    pos = end + 2;
                    text_start = pos;
                }
                (b'{', b'#') => {
                    self.flush_text(&mut stack, text_start, pos);
                    let end = match self.source[pos + 2..].find("#}") {
                        Some(rel) => pos + 2 + rel,
                        None => return Err(self.error(pos, "unterminated comment '{#'")),
                    };
                    pos = end + 2;
                    text_start = pos;
                }
                _ => pos += 1,
            }
        }
        self.flush_text(&mut stack, text_start, bytes.len());

        if stack.len() > 1 {
            let (kind, location) = match stack.last() {
                Some(Frame::If { location, .. }) => ("if", *location),
                Some(Frame::For { location, .. }) => ("for", *location),
                _ => ("block", Location { line: 1, column: 1 }),
            };
            return Err(ParseError {
                line: location.line,
                column: location.column,
                message: format!("missing '{{% end %}}' for '{}' block", kind),
            });
        }

        match stack.pop() {
            Some(Frame::Root(nodes)) => Ok(Template { nodes }),
            _ => Err(self.error(0, "unbalanced block structure")),
        }
    }

    fn flush_text(&self, stack: &mut [Frame], start: usize, end: usize) {
        if start >= end {
            return;
        }
        let text = &self.source[start..end];
        if let Some(frame) = stack.last_mut() {
            let nodes = frame.nodes_mut();
            if let Some(Node::Text(previous)) = nodes.last_mut() {
                previous.push_str(text);
            } else {
                nodes.push(Node::Text(text.to_string()));
            }
        }
    }

    // Find `delim` after `start`, skipping quoted strings
    fn find_close(
        &self,
        open: usize,
        start: usize,
        delim: &str,
        message: &str,
    ) -> Result<usize, ParseError> {
        let bytes = self.source.as_bytes();
        let mut quote: Option<u8> = None;
        let mut i = start;
        while i < bytes.len() {
            let b = bytes[i];
            match quote {
                Some(q) => {
                    if b == b'\\' {
                        i += 1;
                    } else if b == q {
                        quote = None;
                    }
                }
                None => {
                    if b == b'\'' || b == b'"' {
                        quote = Some(b);
                    } else if bytes[i..].starts_with(delim.as_bytes()) {
                        return Ok(i);
                    }
                }
            }
            i += 1;
        }
        Err(self.error(open, message))
    }

    fn lex(&self, start: usize, end: usize) -> Result<Vec<Token>, ParseError> {
        let text = &self.source[start..end];
        let bytes = text.as_bytes();
        let mut tokens = Vec::new();
        let mut i = 0;

        while i < bytes.len() {
            let b = bytes[i];
            let offset = start + i;

            if b.is_ascii_whitespace() {
                i += 1;
                continue;
            }

            if b.is_ascii_alphabetic() || b == b'_' {
                let s = i;
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                tokens.push(Token {
                    tok: Tok::Ident(text[s..i].to_string()),
                    offset,
                });
                continue;
            }

            if b.is_ascii_digit() {
                let s = i;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                let mut is_float = false;
                if i + 1 < bytes.len() && bytes[i] == b'.' && bytes[i + 1].is_ascii_digit() {
                    is_float = true;
                    i += 1;
                    while i < bytes.len() && bytes[i].is_ascii_digit() {
                        i += 1;
                    }
                }
                let literal = &text[s..i];
                let tok = if is_float {
                    literal.parse::<f64>().map(Tok::Float).ok()
                } else {
                    literal.parse::<i64>().map(Tok::Int).ok()
                };
                match tok {
                    Some(tok) => tokens.push(Token { tok, offset }),
                    None => {
                        return Err(self.error(offset, format!("invalid number literal '{}'", literal)))
                    }
                }
                continue;
            }

            if b == b'\'' || b == b'"' {
                let quote = b as char;
                i += 1;
                let mut value = String::new();
                loop {
                    let c = match text[i..].chars().next() {
                        Some(c) => c,
                        None => return Err(self.error(offset, "unterminated string literal")),
                    };
                    i += c.len_utf8();
                    if c == quote {
                        break;
                    }
                    if c == '\\' {
                        let escaped = match text[i..].chars().next() {
                            Some(e) => e,
                            None => return Err(self.error(offset, "unterminated string literal")),
                        };
                        i += escaped.len_utf8();
                        match escaped {
                            'n' => value.push('\n'),
                            't' => value.push('\t'),
                            '\\' | '\'' | '"' => value.push(escaped),
                            other => {
                                value.push('\\');
                                value.push(other);
                            }
                        }
                    } else {
                        value.push(c);
                    }
                }
                tokens.push(Token {
                    tok: Tok::Str(value),
                    offset,
                });
                continue;
            }

            if let Some(punct) = PUNCTS.iter().find(|p| bytes[i..].starts_with(p.as_bytes())) {
                tokens.push(Token {
                    tok: Tok::Punct(*punct),
                    offset,
                });
                i += punct.len();
                continue;
            }

            let c = text[i..].chars().next().unwrap_or('?');
            return Err(self.error(offset, format!("unexpected character '{}'", c)));
        }

        Ok(tokens)
    }

    fn parse_output(&self, open: usize, start: usize, end: usize) -> Result<Node, ParseError> {
        let tokens = self.lex(start, end)?;
        let mut ts = TokenStream::new(&tokens, end);
        let location = self.location(open);

        let expr = if ts.is_at_end() || ts.at_punct("@") {
            None
        } else {
            Some(self.parse_expr(&mut ts)?)
        };

        let mut options = Vec::new();
        if ts.eat_punct("@") {
            loop {
                let option_offset = ts.offset();
                let name = self.expect_ident(&mut ts, "option name")?;
                let value = if ts.eat_punct("=") {
                    Some(self.parse_expr(&mut ts)?)
                } else {
                    None
                };
                options.push(OutputOption {
                    name,
                    value,
                    location: self.location(option_offset),
                });
                if !ts.eat_punct(",") {
                    break;
                }
            }
        }

        self.expect_end(&ts)?;
        Ok(Node::Output {
            expr,
            options,
            location,
        })
    }

    fn parse_tag(
        &self,
        stack: &mut Vec<Frame>,
        open: usize,
        start: usize,
        end: usize,
    ) -> Result<(), ParseError> {
        let tokens = self.lex(start, end)?;
        let mut ts = TokenStream::new(&tokens, end);
        let location = self.location(open);

        let keyword = match ts.next() {
            Some(Token {
                tok: Tok::Ident(keyword),
                ..
            }) => keyword.as_str(),
            Some(token) => {
                return Err(self.error(
                    token.offset,
                    format!("expected block tag, found {}", describe(&token.tok)),
                ))
            }
            None => return Err(self.error(open, "empty block tag")),
        };

        match keyword {
            "use" => {
                let name = self.expect_variable(&mut ts)?;
                self.expect_punct(&mut ts, "=")?;
                let path_offset = ts.offset();
                let path = match ts.next() {
                    Some(Token {
                        tok: Tok::Str(path),
                        ..
                    }) => path.clone(),
                    _ => return Err(self.error(path_offset, "expected quoted use path")),
                };
                if !is_valid_reference_path(&path) {
                    return Err(self.error(path_offset, format!("invalid use path '{}'", path)));
                }
                self.expect_end(&ts)?;
                push_node(
                    stack,
                    Node::Use {
                        name,
                        path,
                        location,
                    },
                );
            }
            "set" => {
                let name = self.expect_variable(&mut ts)?;
                self.expect_punct(&mut ts, "=")?;
                let expr = self.parse_expr(&mut ts)?;
                self.expect_end(&ts)?;
                push_node(
                    stack,
                    Node::Set {
                        name,
                        expr,
                        location,
                    },
                );
            }
            "if" => {
                let cond = self.parse_expr(&mut ts)?;
                self.expect_end(&ts)?;
                stack.push(Frame::If {
                    cond,
                    location,
                    then: Vec::new(),
                    otherwise: None,
                });
            }
            "else" => {
                self.expect_end(&ts)?;
                match stack.last_mut() {
                    Some(Frame::If { otherwise, .. }) if otherwise.is_none() => {
                        *otherwise = Some(Vec::new());
                    }
                    _ => return Err(self.error(open, "unexpected '{% else %}'")),
                }
            }
            "for" => {
                let item = self.expect_variable(&mut ts)?;
                let in_offset = ts.offset();
                match ts.next() {
                    Some(Token {
                        tok: Tok::Ident(word),
                        ..
                    }) if word == "in" => {}
                    _ => return Err(self.error(in_offset, "expected 'in'")),
                }
                let list = self.parse_expr(&mut ts)?;
                self.expect_end(&ts)?;
                stack.push(Frame::For {
                    item,
                    list,
                    location,
                    body: Vec::new(),
                });
            }
            "end" => {
                self.expect_end(&ts)?;
                if stack.len() < 2 {
                    return Err(self.error(open, "unexpected '{% end %}'"));
                }
                let node = match stack.pop() {
                    Some(Frame::If {
                        cond,
                        location,
                        then,
                        otherwise,
                    }) => Node::If {
                        cond,
                        then,
                        otherwise,
                        location,
                    },
                    Some(Frame::For {
                        item,
                        list,
                        location,
                        body,
                    }) => Node::For {
                        item,
                        list,
                        body,
                        location,
                    },
                    _ => return Err(self.error(open, "unexpected '{% end %}'")),
                };
                push_node(stack, node);
            }
            other => {
                return Err(self.error(open, format!("unknown block tag '{}'", other)));
            }
        }
        Ok(())
    }

    fn expect_end(&self, ts: &TokenStream) -> Result<(), ParseError> {
        match ts.peek() {
            None => Ok(()),
            Some(tok) => Err(self.error(ts.offset(), format!("unexpected {}", describe(tok)))),
        }
    }

    fn expect_punct(&self, ts: &mut TokenStream, punct: &str) -> Result<(), ParseError> {
        if ts.eat_punct(punct) {
            Ok(())
        } else {
            Err(self.error(ts.offset(), format!("expected '{}'", punct)))
        }
    }

    fn expect_ident(&self, ts: &mut TokenStream, what: &str) -> Result<String, ParseError> {
        let offset = ts.offset();
        match ts.next() {
            Some(Token {
                tok: Tok::Ident(name),
                ..
            }) => Ok(name.clone()),
            Some(token) => Err(self.error(
                offset,
                format!("expected {}, found {}", what, describe(&token.tok)),
            )),
            None => Err(self.error(offset, format!("expected {}", what))),
        }
    }

    fn expect_variable(&self, ts: &mut TokenStream) -> Result<String, ParseError> {
        let offset = ts.offset();
        let name = self.expect_ident(ts, "variable name")?;
        if LITERAL_WORDS.contains(&name.as_str()) {
            return Err(self.error(offset, format!("'{}' cannot be used as a variable name", name)));
        }
        Ok(name)
    }

    fn parse_expr(&self, ts: &mut TokenStream) -> Result<Expr, ParseError> {
        self.parse_or(ts)
    }

    fn parse_or(&self, ts: &mut TokenStream) -> Result<Expr, ParseError> {
        let mut left = self.parse_and(ts)?;
        while ts.eat_punct("||") {
            let right = self.parse_and(ts)?;
            left = Expr::Or {
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_and(&self, ts: &mut TokenStream) -> Result<Expr, ParseError> {
        let mut left = self.parse_equality(ts)?;
        while ts.eat_punct("&&") {
            let right = self.parse_equality(ts)?;
            left = Expr::And {
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_equality(&self, ts: &mut TokenStream) -> Result<Expr, ParseError> {
        let left = self.parse_unary(ts)?;
        if ts.eat_punct("==") {
            let right = self.parse_unary(ts)?;
            return Ok(Expr::Eq {
                left: Box::new(left),
                right: Box::new(right),
            });
        }
        if ts.eat_punct("!=") {
            let right = self.parse_unary(ts)?;
            return Ok(Expr::Ne {
                left: Box::new(left),
                right: Box::new(right),
            });
        }
        Ok(left)
    }

    fn parse_unary(&self, ts: &mut TokenStream) -> Result<Expr, ParseError> {
        if ts.eat_punct("!") {
            let expr = self.parse_unary(ts)?;
            return Ok(Expr::Not {
                expr: Box::new(expr),
            });
        }
        self.parse_postfix(ts)
    }

    fn parse_postfix(&self, ts: &mut TokenStream) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary(ts)?;
        loop {
            if ts.eat_punct(".") {
                let name = self.expect_ident(ts, "property name")?;
                expr = Expr::Property {
                    target: Box::new(expr),
                    name,
                };
            } else if ts.eat_punct("[") {
                let index = self.parse_expr(ts)?;
                self.expect_punct(ts, "]")?;
                expr = Expr::Index {
                    target: Box::new(expr),
                    index: Box::new(index),
                };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_primary(&self, ts: &mut TokenStream) -> Result<Expr, ParseError> {
        let offset = ts.offset();
        let token = match ts.next() {
            Some(token) => token,
            None => return Err(self.error(offset, "expected expression")),
        };
        let literal = |value: Literal| -> Result<Expr, ParseError> { Ok(Expr::Literal { value }) };
        match &token.tok {
            Tok::Ident(word) if word == "true" => literal(Literal::Bool(true)),
            Tok::Ident(word) if word == "false" => literal(Literal::Bool(false)),
            Tok::Ident(word) if word == "null" => literal(Literal::Null),
            Tok::Ident(name) => Ok(Expr::name(name.clone())),
            Tok::Str(s) => literal(Literal::Str(s.clone())),
            Tok::Int(n) => literal(Literal::Int(*n)),
            Tok::Float(f) => literal(Literal::Float(*f)),
            Tok::Punct("(") => {
                let expr = self.parse_expr(ts)?;
                self.expect_punct(ts, ")")?;
                Ok(expr)
            }
            other => Err(self.error(
                offset,
                format!("expected expression, found {}", describe(other)),
            )),
        }
    }
}

fn push_node(stack: &mut [Frame], node: Node) {
    if let Some(frame) = stack.last_mut() {
        frame.nodes_mut().push(node);
    }
}
