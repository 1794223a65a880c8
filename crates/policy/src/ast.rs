//! Abstract syntax for the policy rule subset.

use serde_json::Value as JsonValue;

/// A parsed policy module.
#[derive(Debug, Clone)]
pub struct Module {
    /// Dotted package path, e.g. `mcp.authz`.
    pub package: String,
    /// Explicit `default allow = false` declaration, if present.
    pub default_allow: Option<bool>,
    /// Rules in source order.
    pub rules: Vec<Rule>,
}

/// The rule heads the decision assembly understands, plus module-local
/// boolean helper rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    /// `allow { ... }` — boolean contribution to the allow set.
    Allow,
    /// `deny[term] { ... }` — contributes a violation.
    Deny,
    /// `obligations[token] { ... }` — attaches an obligation.
    Obligation,
    /// `redact[key] { ... }` — replaces a parameter value with the sentinel.
    Redact,
    /// `omit[key] { ... }` — removes a parameter.
    Omit,
    /// `<name> { ... }` — a boolean helper referenced from other rules in
    /// the same module. Contributes nothing to the decision directly.
    Helper,
}

impl RuleKind {
    /// Source spelling of the well-known heads.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
            Self::Obligation => "obligations",
            Self::Redact => "redact",
            Self::Omit => "omit",
            Self::Helper => "<helper>",
        }
    }
}

/// A single rule: head, optional head term, conjunction body.
#[derive(Debug, Clone)]
pub struct Rule {
    /// Which output the rule contributes to.
    pub kind: RuleKind,
    /// Helper name for [`RuleKind::Helper`]; `None` otherwise. Several rules
    /// may share a name — any one of their bodies firing makes the helper
    /// true.
    pub name: Option<String>,
    /// Head term for partial-set heads (`deny[term]` etc.); `None` for allow
    /// and helpers.
    pub head_term: Option<Expr>,
    /// Body statements; all must succeed for the rule to fire. An empty body
    /// fires unconditionally.
    pub body: Vec<Stmt>,
    /// Source line of the head, for diagnostics.
    pub line: usize,
}

/// One statement in a rule body.
#[derive(Debug, Clone)]
pub enum Stmt {
    /// Expression that must be defined and not `false`.
    Expr(Expr),
    /// Negation: succeeds when the inner expression is undefined or `false`.
    Not(Expr),
    /// Local binding `x := expr`; fails when the value is undefined.
    Assign {
        /// Variable name.
        var: String,
        /// Bound expression.
        expr: Expr,
    },
    /// Iteration `some x in collection`; the remainder of the body runs once
    /// per element.
    Some {
        /// Iteration variable.
        var: String,
        /// Array or object to iterate.
        collection: Expr,
    },
}

/// Selector applied to a reference chain.
#[derive(Debug, Clone)]
pub enum Selector {
    /// Dotted field access.
    Field(String),
    /// Bracket indexing with a computed key or index.
    Index(Box<Expr>),
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

/// An expression term.
#[derive(Debug, Clone)]
pub enum Expr {
    /// JSON literal (scalar).
    Literal(JsonValue),
    /// Array literal.
    Array(Vec<Expr>),
    /// Object literal with string keys.
    Object(Vec<(String, Expr)>),
    /// Reference rooted at `input`, `data`, or a local variable.
    Ref {
        /// Root name.
        root: String,
        /// Selector chain.
        path: Vec<Selector>,
    },
    /// Comparison.
    Binary {
        /// Operator.
        op: BinOp,
        /// Left operand.
        lhs: Box<Expr>,
        /// Right operand.
        rhs: Box<Expr>,
    },
    /// Membership test `needle in haystack`.
    In {
        /// Candidate element.
        needle: Box<Expr>,
        /// Array (element membership) or object (value membership).
        haystack: Box<Expr>,
    },
    /// Builtin call, name possibly dotted (`regex.match`).
    Call {
        /// Builtin name.
        name: String,
        /// Arguments.
        args: Vec<Expr>,
        /// Source line, for diagnostics.
        line: usize,
    },
}
