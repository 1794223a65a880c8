//! Lexer and recursive-descent parser for the policy rule subset.

use crate::ast::{BinOp, Expr, Module, Rule, RuleKind, Selector, Stmt};
use serde_json::Value as JsonValue;
use thiserror::Error;

/// Parse failure with the offending source line.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("line {line}: {message}")]
pub struct ParseError {
    /// 1-based source line.
    pub line: usize,
    /// What went wrong.
    pub message: String,
}

impl ParseError {
    fn new(line: usize, message: impl Into<String>) -> Self {
        Self { line, message: message.into() }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Str(String),
    Num(serde_json::Number),
    Punct(&'static str),
    Newline,
}

struct Lexed {
    tok: Tok,
    line: usize,
}

fn lex(src: &str) -> Result<Vec<Lexed>, ParseError> {
    let mut out: Vec<Lexed> = Vec::new();
    let bytes = src.as_bytes();
    let mut i = 0usize;
    let mut line = 1usize;
    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            '\n' => {
                if !matches!(out.last(), None | Some(Lexed { tok: Tok::Newline, .. })) {
                    out.push(Lexed { tok: Tok::Newline, line });
                }
                line += 1;
                i += 1;
            }
            ' ' | '\t' | '\r' => i += 1,
            '#' => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            '"' => {
                let start = i;
                i += 1;
                while i < bytes.len() {
                    match bytes[i] {
                        b'\\' => i += 2,
                        b'"' => break,
                        b'\n' => {
                            return Err(ParseError::new(line, "unterminated string literal"))
                        }
                        _ => i += 1,
                    }
                }
                if i >= bytes.len() {
                    return Err(ParseError::new(line, "unterminated string literal"));
                }
                i += 1;
                let quoted = &src[start..i];
                let value: String = serde_json::from_str(quoted).map_err(|e| {
                    ParseError::new(line, format!("invalid string literal: {e}"))
                })?;
                out.push(Lexed { tok: Tok::Str(value), line });
            }
            '0'..='9' | '-' => {
                let start = i;
                i += 1;
                while i < bytes.len()
                    && matches!(bytes[i], b'0'..=b'9' | b'.' | b'e' | b'E' | b'+' | b'-')
                {
                    i += 1;
                }
                let raw = &src[start..i];
                let num: serde_json::Number = serde_json::from_str(raw).map_err(|e| {
                    ParseError::new(line, format!("invalid number '{raw}': {e}"))
                })?;
                out.push(Lexed { tok: Tok::Num(num), line });
            }
            'a'..='z' | 'A'..='Z' | '_' => {
                let start = i;
                while i < bytes.len()
                    && matches!(bytes[i], b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'_')
                {
                    i += 1;
                }
                out.push(Lexed { tok: Tok::Ident(src[start..i].to_string()), line });
            }
            _ => {
                // Two-byte puncts are all ASCII; guard the slice so a stray
                // multibyte character errors instead of panicking.
                let two = if i + 1 < bytes.len() && src.is_char_boundary(i + 2) {
                    &src[i..i + 2]
                } else {
                    ""
                };
                let punct: &'static str = match two {
                    ":=" => ":=",
                    "==" => "==",
                    "!=" => "!=",
                    "<=" => "<=",
                    ">=" => ">=",
                    _ => match c {
                        '{' => "{",
                        '}' => "}",
                        '[' => "[",
                        ']' => "]",
                        '(' => "(",
                        ')' => ")",
                        ',' => ",",
                        ';' => ";",
                        '.' => ".",
                        ':' => ":",
                        '=' => "=",
                        '<' => "<",
                        '>' => ">",
                        other => {
                            return Err(ParseError::new(
                                line,
                                format!("unexpected character '{other}'"),
                            ))
                        }
                    },
                };
                i += punct.len();
                out.push(Lexed { tok: Tok::Punct(punct), line });
            }
        }
    }
    Ok(out)
}

struct Parser {
    toks: Vec<Lexed>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos).map(|l| &l.tok)
    }

    fn line(&self) -> usize {
        self.toks
            .get(self.pos)
            .or_else(|| self.toks.last())
            .map_or(1, |l| l.line)
    }

    fn bump(&mut self) -> Option<Tok> {
        let t = self.toks.get(self.pos).map(|l| l.tok.clone());
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn skip_newlines(&mut self) {
        while matches!(self.peek(), Some(Tok::Newline)) {
            self.pos += 1;
        }
    }

    fn expect_punct(&mut self, p: &'static str) -> Result<(), ParseError> {
        match self.bump() {
            Some(Tok::Punct(got)) if got == p => Ok(()),
            other => Err(ParseError::new(
                self.line(),
                format!("expected '{p}', found {}", describe(other.as_ref())),
            )),
        }
    }

    fn expect_ident(&mut self) -> Result<String, ParseError> {
        match self.bump() {
            Some(Tok::Ident(name)) => Ok(name),
            other => Err(ParseError::new(
                self.line(),
                format!("expected identifier, found {}", describe(other.as_ref())),
            )),
        }
    }

    fn eat_punct(&mut self, p: &'static str) -> bool {
        if matches!(self.peek(), Some(Tok::Punct(got)) if *got == p) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_ident(&mut self, kw: &str) -> bool {
        if matches!(self.peek(), Some(Tok::Ident(name)) if name == kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn dotted_name(&mut self) -> Result<String, ParseError> {
        let mut name = self.expect_ident()?;
        while self.eat_punct(".") {
            name.push('.');
            name.push_str(&self.expect_ident()?);
        }
        Ok(name)
    }

    fn parse_module(&mut self) -> Result<Module, ParseError> {
        self.skip_newlines();
        if !self.eat_ident("package") {
            return Err(ParseError::new(self.line(), "module must start with 'package'"));
        }
        let package = self.dotted_name()?;
        let mut module = Module { package, default_allow: None, rules: Vec::new() };

        loop {
            self.skip_newlines();
            let Some(tok) = self.peek().cloned() else { break };
            match tok {
                Tok::Ident(ref name) if name == "import" => {
                    self.pos += 1;
                    let target = self.dotted_name()?;
                    if target != "input" && target != "data" && !target.starts_with("data.") {
                        return Err(ParseError::new(
                            self.line(),
                            format!("forbidden import '{target}': only input and data.* are available"),
                        ));
                    }
                }
                Tok::Ident(ref name) if name == "default" => {
                    self.pos += 1;
                    let head = self.expect_ident()?;
                    if head != "allow" {
                        return Err(ParseError::new(
                            self.line(),
                            "only 'default allow' is supported",
                        ));
                    }
                    if !self.eat_punct("=") && !self.eat_punct(":=") {
                        return Err(ParseError::new(self.line(), "expected '=' after 'default allow'"));
                    }
                    match self.bump() {
                        Some(Tok::Ident(v)) if v == "false" => {
                            module.default_allow = Some(false);
                        }
                        Some(Tok::Ident(v)) if v == "true" => {
                            return Err(ParseError::new(
                                self.line(),
                                "'default allow = true' is forbidden; decisions are fail-closed",
                            ));
                        }
                        other => {
                            return Err(ParseError::new(
                                self.line(),
                                format!("expected boolean, found {}", describe(other.as_ref())),
                            ))
                        }
                    }
                }
                Tok::Ident(_) => {
                    module.rules.push(self.parse_rule()?);
                }
                ref other => {
                    let msg = format!("expected rule, found {}", describe(Some(other)));
                    return Err(ParseError::new(self.line(), msg));
                }
            }
        }
        Ok(module)
    }

    fn parse_rule(&mut self) -> Result<Rule, ParseError> {
        let line = self.line();
        let head = self.expect_ident()?;
        let (kind, name) = match head.as_str() {
            "allow" => (RuleKind::Allow, None),
            "deny" => (RuleKind::Deny, None),
            "obligations" => (RuleKind::Obligation, None),
            "redact" => (RuleKind::Redact, None),
            "omit" => (RuleKind::Omit, None),
            // Anything else is a module-local boolean helper.
            "input" | "data" | "some" | "not" | "in" | "true" | "false" | "null" => {
                return Err(ParseError::new(
                    line,
                    format!("reserved word '{head}' cannot name a rule"),
                ))
            }
            _ => (RuleKind::Helper, Some(head.clone())),
        };

        let head_term = if matches!(kind, RuleKind::Allow | RuleKind::Helper) {
            // Optional `allow = true` / `allow := true` spelling.
            if self.eat_punct("=") || self.eat_punct(":=") {
                match self.bump() {
                    Some(Tok::Ident(v)) if v == "true" => {}
                    other => {
                        return Err(ParseError::new(
                            self.line(),
                            format!("boolean rules may only assign true, found {}", describe(other.as_ref())),
                        ))
                    }
                }
            }
            None
        } else {
            self.expect_punct("[")?;
            let term = self.parse_expr()?;
            self.expect_punct("]")?;
            Some(term)
        };

        let body = if self.eat_punct("{") {
            let mut stmts = Vec::new();
            loop {
                self.skip_newlines();
                while self.eat_punct(";") {
                    self.skip_newlines();
                }
                if self.eat_punct("}") {
                    break;
                }
                if self.peek().is_none() {
                    return Err(ParseError::new(self.line(), "unterminated rule body"));
                }
                stmts.push(self.parse_stmt()?);
                // Statements are separated by newlines or semicolons.
                match self.peek() {
                    Some(Tok::Newline) | Some(Tok::Punct(";")) | Some(Tok::Punct("}")) | None => {}
                    Some(other) => {
                        let msg = format!(
                            "expected end of statement, found {}",
                            describe(Some(other))
                        );
                        return Err(ParseError::new(self.line(), msg));
                    }
                }
            }
            stmts
        } else {
            Vec::new()
        };

        Ok(Rule { kind, name, head_term, body, line })
    }

    fn parse_stmt(&mut self) -> Result<Stmt, ParseError> {
        if self.eat_ident("some") {
            let var = self.expect_ident()?;
            if !self.eat_ident("in") {
                return Err(ParseError::new(self.line(), "expected 'in' after 'some <var>'"));
            }
            let collection = self.parse_expr()?;
            return Ok(Stmt::Some { var, collection });
        }
        if self.eat_ident("not") {
            return Ok(Stmt::Not(self.parse_expr()?));
        }
        // Lookahead for `ident := expr`.
        if let Some(Tok::Ident(name)) = self.peek() {
            let name = name.clone();
            if matches!(self.toks.get(self.pos + 1).map(|l| &l.tok), Some(Tok::Punct(":="))) {
                self.pos += 2;
                let expr = self.parse_expr()?;
                return Ok(Stmt::Assign { var: name, expr });
            }
        }
        Ok(Stmt::Expr(self.parse_expr()?))
    }

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        let lhs = self.parse_operand()?;
        if self.eat_ident("in") {
            let haystack = self.parse_operand()?;
            return Ok(Expr::In { needle: Box::new(lhs), haystack: Box::new(haystack) });
        }
        let op = match self.peek() {
            Some(Tok::Punct("==")) => Some(BinOp::Eq),
            Some(Tok::Punct("!=")) => Some(BinOp::Ne),
            Some(Tok::Punct("<")) => Some(BinOp::Lt),
            Some(Tok::Punct("<=")) => Some(BinOp::Le),
            Some(Tok::Punct(">")) => Some(BinOp::Gt),
            Some(Tok::Punct(">=")) => Some(BinOp::Ge),
            _ => None,
        };
        if let Some(op) = op {
            self.pos += 1;
            let rhs = self.parse_operand()?;
            return Ok(Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) });
        }
        Ok(lhs)
    }

    fn parse_operand(&mut self) -> Result<Expr, ParseError> {
        let line = self.line();
        match self.peek().cloned() {
            Some(Tok::Str(s)) => {
                self.pos += 1;
                Ok(Expr::Literal(JsonValue::String(s)))
            }
            Some(Tok::Num(n)) => {
                self.pos += 1;
                Ok(Expr::Literal(JsonValue::Number(n)))
            }
            Some(Tok::Punct("(")) => {
                self.pos += 1;
                let inner = self.parse_expr()?;
                self.expect_punct(")")?;
                Ok(inner)
            }
            Some(Tok::Punct("[")) => {
                self.pos += 1;
                let mut items = Vec::new();
                self.skip_newlines();
                if !self.eat_punct("]") {
                    loop {
                        self.skip_newlines();
                        items.push(self.parse_expr()?);
                        self.skip_newlines();
                        if self.eat_punct("]") {
                            break;
                        }
                        self.expect_punct(",")?;
                    }
                }
                Ok(Expr::Array(items))
            }
            Some(Tok::Punct("{")) => {
                self.pos += 1;
                let mut fields = Vec::new();
                self.skip_newlines();
                if !self.eat_punct("}") {
                    loop {
                        self.skip_newlines();
                        let key = match self.bump() {
                            Some(Tok::Str(s)) => s,
                            other => {
                                return Err(ParseError::new(
                                    self.line(),
                                    format!(
                                        "object keys must be string literals, found {}",
                                        describe(other.as_ref())
                                    ),
                                ))
                            }
                        };
                        self.expect_punct(":")?;
                        let value = self.parse_expr()?;
                        fields.push((key, value));
                        self.skip_newlines();
                        if self.eat_punct("}") {
                            break;
                        }
                        self.expect_punct(",")?;
                    }
                }
                Ok(Expr::Object(fields))
            }
            Some(Tok::Ident(name)) => {
                self.pos += 1;
                match name.as_str() {
                    "true" => return Ok(Expr::Literal(JsonValue::Bool(true))),
                    "false" => return Ok(Expr::Literal(JsonValue::Bool(false))),
                    "null" => return Ok(Expr::Literal(JsonValue::Null)),
                    _ => {}
                }
                self.parse_ref_or_call(name, line)
            }
            other => Err(ParseError::new(
                line,
                format!("expected expression, found {}", describe(other.as_ref())),
            )),
        }
    }

    /// After an initial identifier: either a reference chain
    /// (`input.principal.teams[0]`) or a builtin call (`regex.match(...)`).
    fn parse_ref_or_call(&mut self, root: String, line: usize) -> Result<Expr, ParseError> {
        let mut fields = vec![root];
        let mut path: Vec<Selector> = Vec::new();
        loop {
            if self.eat_punct(".") {
                let field = self.expect_ident()?;
                if path.is_empty() {
                    fields.push(field);
                } else {
                    path.push(Selector::Field(field));
                }
                continue;
            }
            if matches!(self.peek(), Some(Tok::Punct("["))) {
                // Move accumulated dotted fields into the selector path first.
                if path.is_empty() && fields.len() > 1 {
                    path = fields.drain(1..).map(Selector::Field).collect();
                }
                self.pos += 1;
                let index = self.parse_expr()?;
                self.expect_punct("]")?;
                path.push(Selector::Index(Box::new(index)));
                continue;
            }
            break;
        }

        if path.is_empty() && self.eat_punct("(") {
            let name = fields.join(".");
            let mut args = Vec::new();
            if !self.eat_punct(")") {
                loop {
                    args.push(self.parse_expr()?);
                    if self.eat_punct(")") {
                        break;
                    }
                    self.expect_punct(",")?;
                }
            }
            return Ok(Expr::Call { name, args, line });
        }

        if path.is_empty() {
            path = fields.drain(1..).map(Selector::Field).collect();
        }
        let root = fields.remove(0);
        Ok(Expr::Ref { root, path })
    }
}

fn describe(tok: Option<&Tok>) -> String {
    match tok {
        None => "end of input".to_string(),
        Some(Tok::Ident(name)) => format!("'{name}'"),
        Some(Tok::Str(_)) => "string literal".to_string(),
        Some(Tok::Num(_)) => "number literal".to_string(),
        Some(Tok::Punct(p)) => format!("'{p}'"),
        Some(Tok::Newline) => "newline".to_string(),
    }
}

/// Parse one module source into its AST.
pub fn parse_module(src: &str) -> Result<Module, ParseError> {
    let toks = lex(src)?;
    let mut parser = Parser { toks, pos: 0 };
    parser.parse_module()
}
