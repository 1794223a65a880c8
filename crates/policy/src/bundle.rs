//! Bundle manifest parsing, static validation, and compilation.
//!
//! A bundle either loads completely or is rejected; there is no partial
//! install. Rejection leaves any previously-installed bundle active.

use crate::ast::{Expr, Module, Rule, RuleKind, Selector, Stmt};
use crate::builtins;
use crate::parse::{self, ParseError};
use chrono::{DateTime, Utc};
use jsonschema::{Draft, JSONSchema};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Maximum number of modules in one bundle.
pub const MAX_MODULES: usize = 64;
/// Maximum total module source bytes.
pub const MAX_MODULE_BYTES: usize = 1024 * 1024;
/// Maximum serialized size of the bundle's read-only data document.
pub const MAX_DATA_BYTES: usize = 1024 * 1024;
/// Maximum rules across all modules.
pub const MAX_RULES: usize = 1000;

static MANIFEST_SCHEMA: Lazy<JSONSchema> = Lazy::new(|| {
    let schema: JsonValue = serde_json::from_str(include_str!("manifest.schema.json"))
        .expect("invalid embedded schema json");
    JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(&schema)
        .expect("compile manifest schema")
});

/// Why a bundle was rejected at load time.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The manifest does not match the schema.
    #[error("malformed manifest: {0}")]
    Manifest(String),
    /// A module failed to parse.
    #[error("module {module}: {source}")]
    Parse {
        /// Zero-based module index in the manifest.
        module: usize,
        /// Underlying parse failure.
        source: ParseError,
    },
    /// A reference root is neither `input`, `data`, nor a bound variable.
    /// Rules cannot reference other rules, which also rules out recursion.
    #[error("module {module} line {line}: unresolved reference '{name}'")]
    UnresolvedReference {
        /// Module index.
        module: usize,
        /// Rule head line.
        line: usize,
        /// Offending root name.
        name: String,
    },
    /// A call names a builtin that does not exist.
    #[error("module {module} line {line}: unknown builtin '{name}'")]
    UnknownBuiltin {
        /// Module index.
        module: usize,
        /// Call site line.
        line: usize,
        /// Offending name.
        name: String,
    },
    /// A builtin call has the wrong number of arguments.
    #[error("module {module} line {line}: {name} takes {expected} arguments, got {got}")]
    BadArity {
        /// Module index.
        module: usize,
        /// Call site line.
        line: usize,
        /// Builtin name.
        name: String,
        /// Declared arity.
        expected: usize,
        /// Provided argument count.
        got: usize,
    },
    /// `regex.match` was called with a non-literal pattern.
    #[error("module {module} line {line}: regex.match patterns must be string literals")]
    NonLiteralRegex {
        /// Module index.
        module: usize,
        /// Call site line.
        line: usize,
    },
    /// A literal regex pattern failed to compile.
    #[error("invalid regex pattern '{pattern}': {message}")]
    BadRegex {
        /// The pattern text.
        pattern: String,
        /// Compiler diagnostic.
        message: String,
    },
    /// More than [`MAX_MODULES`] modules.
    #[error("bundle has {0} modules, limit {MAX_MODULES}")]
    TooManyModules(usize),
    /// Total module source exceeds [`MAX_MODULE_BYTES`].
    #[error("bundle module text is {0} bytes, limit {MAX_MODULE_BYTES}")]
    ModulesTooLarge(usize),
    /// Serialized data document exceeds [`MAX_DATA_BYTES`].
    #[error("bundle data is {0} bytes, limit {MAX_DATA_BYTES}")]
    DataTooLarge(usize),
    /// More than [`MAX_RULES`] rules across all modules.
    #[error("bundle has {0} rules, limit {MAX_RULES}")]
    TooManyRules(usize),
    /// Helper rules reference each other in a cycle.
    #[error("module {module}: helper rule '{name}' is recursive")]
    RecursiveRule {
        /// Module index.
        module: usize,
        /// A rule on the cycle.
        name: String,
    },
}

/// Bundle manifest as shipped by the policy control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleManifest {
    /// Opaque version tag.
    pub version: String,
    /// When the control plane compiled the bundle.
    pub compiled_at: DateTime<Utc>,
    /// Module source texts.
    pub modules: Vec<String>,
    /// Read-only data made available to rules as `data.*`.
    #[serde(default)]
    pub data: JsonValue,
}

impl BundleManifest {
    /// Validate a raw JSON manifest against the schema, then deserialize it.
    pub fn from_json(raw: &JsonValue) -> Result<Self, LoadError> {
        if let Err(errors) = MANIFEST_SCHEMA.validate(raw) {
            let msg = errors.map(|e| e.to_string()).collect::<Vec<_>>().join("; ");
            return Err(LoadError::Manifest(msg));
        }
        serde_json::from_value(raw.clone()).map_err(|e| LoadError::Manifest(e.to_string()))
    }
}

/// A fully validated, immutable bundle ready for evaluation.
#[derive(Debug)]
pub struct CompiledBundle {
    version: String,
    compiled_at: DateTime<Utc>,
    data: JsonValue,
    modules: Vec<Module>,
    regexes: HashMap<String, Regex>,
    rule_count: usize,
}

impl CompiledBundle {
    /// Bundle version tag.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Control-plane compile timestamp.
    #[must_use]
    pub const fn compiled_at(&self) -> DateTime<Utc> {
        self.compiled_at
    }

    /// Read-only data document.
    #[must_use]
    pub const fn data(&self) -> &JsonValue {
        &self.data
    }

    /// Parsed modules in manifest order.
    #[must_use]
    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    /// Total rule count across modules.
    #[must_use]
    pub const fn rule_count(&self) -> usize {
        self.rule_count
    }

    /// Look up a load-time-compiled regex. `Regex` clones share the compiled
    /// program, so this is cheap.
    #[must_use]
    pub fn regex(&self, pattern: &str) -> Option<Regex> {
        self.regexes.get(pattern).cloned()
    }
}

/// Compile a manifest into an evaluatable bundle, or reject it whole.
pub fn compile(manifest: BundleManifest) -> Result<CompiledBundle, LoadError> {
    if manifest.modules.len() > MAX_MODULES {
        return Err(LoadError::TooManyModules(manifest.modules.len()));
    }
    let module_bytes: usize = manifest.modules.iter().map(String::len).sum();
    if module_bytes > MAX_MODULE_BYTES {
        return Err(LoadError::ModulesTooLarge(module_bytes));
    }
    let data = if manifest.data.is_null() { JsonValue::Object(serde_json::Map::new()) } else { manifest.data };
    let data_bytes = data.to_string().len();
    if data_bytes > MAX_DATA_BYTES {
        return Err(LoadError::DataTooLarge(data_bytes));
    }

    let mut modules = Vec::with_capacity(manifest.modules.len());
    let mut regexes = HashMap::new();
    let mut rule_count = 0usize;
    for (idx, src) in manifest.modules.iter().enumerate() {
        let module =
            parse::parse_module(src).map_err(|source| LoadError::Parse { module: idx, source })?;
        rule_count += module.rules.len();
        if rule_count > MAX_RULES {
            return Err(LoadError::TooManyRules(rule_count));
        }
        let helpers: HashSet<&str> =
            module.rules.iter().filter_map(|r| r.name.as_deref()).collect();
        for rule in &module.rules {
            check_rule(idx, rule, &helpers, &mut regexes)?;
        }
        check_helper_cycles(idx, &module)?;
        modules.push(module);
    }

    Ok(CompiledBundle {
        version: manifest.version,
        compiled_at: manifest.compiled_at,
        data,
        modules,
        regexes,
        rule_count,
    })
}

/// Static per-rule validation: sequential variable scoping, reference roots
/// (`input`, `data`, bound variables, module-local helpers), builtin
/// names/arities, literal regex patterns.
fn check_rule(
    module: usize,
    rule: &Rule,
    helpers: &HashSet<&str>,
    regexes: &mut HashMap<String, Regex>,
) -> Result<(), LoadError> {
    let mut bound: HashSet<&str> = HashSet::new();
    for stmt in &rule.body {
        match stmt {
            Stmt::Expr(expr) | Stmt::Not(expr) => {
                check_expr(module, rule.line, expr, &bound, helpers, regexes)?;
            }
            Stmt::Assign { var, expr } => {
                check_expr(module, rule.line, expr, &bound, helpers, regexes)?;
                bound.insert(var.as_str());
            }
            Stmt::Some { var, collection } => {
                check_expr(module, rule.line, collection, &bound, helpers, regexes)?;
                bound.insert(var.as_str());
            }
        }
    }
    if let Some(term) = &rule.head_term {
        check_expr(module, rule.line, term, &bound, helpers, regexes)?;
    }
    // Boolean heads never carry a term; enforced by the parser.
    debug_assert!(
        !matches!(rule.kind, RuleKind::Allow | RuleKind::Helper) || rule.head_term.is_none()
    );
    Ok(())
}

fn check_expr(
    module: usize,
    line: usize,
    expr: &Expr,
    bound: &HashSet<&str>,
    helpers: &HashSet<&str>,
    regexes: &mut HashMap<String, Regex>,
) -> Result<(), LoadError> {
    match expr {
        Expr::Literal(_) => Ok(()),
        Expr::Array(items) => {
            for item in items {
                check_expr(module, line, item, bound, helpers, regexes)?;
            }
            Ok(())
        }
        Expr::Object(fields) => {
            for (_, value) in fields {
                check_expr(module, line, value, bound, helpers, regexes)?;
            }
            Ok(())
        }
        Expr::Ref { root, path } => {
            if root != "input"
                && root != "data"
                && !bound.contains(root.as_str())
                && !helpers.contains(root.as_str())
            {
                return Err(LoadError::UnresolvedReference {
                    module,
                    line,
                    name: root.clone(),
                });
            }
            for selector in path {
                if let Selector::Index(index) = selector {
                    check_expr(module, line, index, bound, helpers, regexes)?;
                }
            }
            Ok(())
        }
        Expr::Binary { lhs, rhs, .. } => {
            check_expr(module, line, lhs, bound, helpers, regexes)?;
            check_expr(module, line, rhs, bound, helpers, regexes)
        }
        Expr::In { needle, haystack } => {
            check_expr(module, line, needle, bound, helpers, regexes)?;
            check_expr(module, line, haystack, bound, helpers, regexes)
        }
        Expr::Call { name, args, line: call_line } => {
            let Some(expected) = builtins::arity(name) else {
                return Err(LoadError::UnknownBuiltin {
                    module,
                    line: *call_line,
                    name: name.clone(),
                });
            };
            if args.len() != expected {
                return Err(LoadError::BadArity {
                    module,
                    line: *call_line,
                    name: name.clone(),
                    expected,
                    got: args.len(),
                });
            }
            if name == "regex.match" {
                match args.first() {
                    Some(Expr::Literal(JsonValue::String(pattern))) => {
                        if !regexes.contains_key(pattern) {
                            let compiled = Regex::new(pattern).map_err(|e| {
                                LoadError::BadRegex {
                                    pattern: pattern.clone(),
                                    message: e.to_string(),
                                }
                            })?;
                            regexes.insert(pattern.clone(), compiled);
                        }
                    }
                    _ => {
                        return Err(LoadError::NonLiteralRegex { module, line: *call_line })
                    }
                }
            }
            for arg in args {
                check_expr(module, line, arg, bound, helpers, regexes)?;
            }
            Ok(())
        }
    }
}

/// Reject helper-rule cycles. Recursion is statically impossible afterwards:
/// decision heads are unnamed, helpers form a checked DAG.
fn check_helper_cycles(module_idx: usize, module: &Module) -> Result<(), LoadError> {
    let mut deps: HashMap<&str, HashSet<&str>> = HashMap::new();
    let helper_names: HashSet<&str> =
        module.rules.iter().filter_map(|r| r.name.as_deref()).collect();
    for rule in &module.rules {
        let Some(name) = rule.name.as_deref() else { continue };
        let entry = deps.entry(name).or_default();
        for stmt in &rule.body {
            match stmt {
                Stmt::Expr(e) | Stmt::Not(e) => collect_helper_refs(e, &helper_names, entry),
                Stmt::Assign { expr, .. } => collect_helper_refs(expr, &helper_names, entry),
                Stmt::Some { collection, .. } => {
                    collect_helper_refs(collection, &helper_names, entry);
                }
            }
        }
    }

    // Iterative DFS with tri-color marking.
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }
    let mut marks: HashMap<&str, Mark> = HashMap::new();
    fn visit<'a>(
        node: &'a str,
        deps: &HashMap<&'a str, HashSet<&'a str>>,
        marks: &mut HashMap<&'a str, Mark>,
    ) -> bool {
        match marks.get(node) {
            Some(Mark::Done) => return true,
            Some(Mark::Visiting) => return false,
            None => {}
        }
        marks.insert(node, Mark::Visiting);
        if let Some(children) = deps.get(node) {
            for child in children {
                if !visit(child, deps, marks) {
                    return false;
                }
            }
        }
        marks.insert(node, Mark::Done);
        true
    }
    for name in deps.keys() {
        if !visit(name, &deps, &mut marks) {
            return Err(LoadError::RecursiveRule {
                module: module_idx,
                name: (*name).to_string(),
            });
        }
    }
    Ok(())
}

fn collect_helper_refs<'a>(
    expr: &'a Expr,
    helpers: &HashSet<&'a str>,
    out: &mut HashSet<&'a str>,
) {
    match expr {
        Expr::Literal(_) => {}
        Expr::Array(items) => items.iter().for_each(|e| collect_helper_refs(e, helpers, out)),
        Expr::Object(fields) => {
            fields.iter().for_each(|(_, e)| collect_helper_refs(e, helpers, out));
        }
        Expr::Ref { root, path } => {
            if helpers.contains(root.as_str()) {
                out.insert(root.as_str());
            }
            for selector in path {
                if let Selector::Index(index) = selector {
                    collect_helper_refs(index, helpers, out);
                }
            }
        }
        Expr::Binary { lhs, rhs, .. } => {
            collect_helper_refs(lhs, helpers, out);
            collect_helper_refs(rhs, helpers, out);
        }
        Expr::In { needle, haystack } => {
            collect_helper_refs(needle, helpers, out);
            collect_helper_refs(haystack, helpers, out);
        }
        Expr::Call { args, .. } => {
            args.iter().for_each(|e| collect_helper_refs(e, helpers, out));
        }
    }
}
