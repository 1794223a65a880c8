//! Deterministic rule evaluation and decision assembly.
//!
//! Evaluation order is fixed: modules in manifest order, rules in source
//! order, iteration over arrays in element order and over objects in sorted
//! key order. Missing `input`/`data` paths are undefined and fail only the
//! enclosing body; type errors and budget exhaustion abort the evaluation
//! and surface as a fail-closed error decision.

use crate::ast::{BinOp, Expr, Module, Rule, RuleKind, Selector, Stmt};
use crate::bundle::CompiledBundle;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::time::Instant;
use thiserror::Error;
use warden_core::decision::{AuthorizationDecision, Obligation, Violation, REDACTION_SENTINEL};

/// Per-evaluation work limits.
#[derive(Debug, Clone, Copy)]
pub struct EvalLimits {
    /// Maximum evaluation steps (statements, expression nodes, iterations).
    pub max_steps: u64,
    /// Wall-clock deadline, checked every 1024 steps.
    pub deadline: std::time::Duration,
}

impl Default for EvalLimits {
    fn default() -> Self {
        Self { max_steps: 100_000, deadline: std::time::Duration::from_millis(50) }
    }
}

/// Why an evaluation aborted. Every variant maps to a deny decision.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EvalError {
    /// Type mismatch in a builtin, comparison, or iteration.
    #[error("{0}")]
    Type(String),
    /// A `deny` head term is not a violation object or message string.
    #[error("deny head term must be a string or {{rule_id, message}} object")]
    BadViolationTerm,
    /// An `obligations` head term is not a known obligation token.
    #[error("unknown obligation token '{0}'")]
    UnknownObligation(String),
    /// A `redact`/`omit` head term is not a string key.
    #[error("redact/omit head term must be a string parameter key")]
    BadParameterKey,
    /// The step budget ran out.
    #[error("evaluation step budget exhausted")]
    BudgetExhausted,
    /// The wall-clock deadline passed.
    #[error("evaluation deadline exceeded")]
    Timeout,
}

/// Internal result of one engine evaluation: the decision plus the
/// distinguished error flag the coordinator uses to skip caching.
#[derive(Debug, Clone)]
pub struct EvalResult {
    /// The assembled (or fail-closed) decision.
    pub decision: AuthorizationDecision,
    /// True when the decision is a fail-closed error product; never cached.
    pub error: bool,
}

struct EvalCtx<'a> {
    input: &'a JsonValue,
    data: &'a JsonValue,
    bundle: &'a CompiledBundle,
    /// Module currently being evaluated; helper references are module-local.
    module: Option<&'a Module>,
    /// Helper results memoized per module (helpers are pure per input).
    helper_cache: HashMap<String, bool>,
    request_ns: i64,
    steps_left: u64,
    deadline: Instant,
    since_deadline_check: u32,
}

impl EvalCtx<'_> {
    fn charge(&mut self, steps: u64) -> Result<(), EvalError> {
        if self.steps_left < steps {
            return Err(EvalError::BudgetExhausted);
        }
        self.steps_left -= steps;
        self.since_deadline_check += u32::try_from(steps).unwrap_or(u32::MAX);
        if self.since_deadline_check >= 1024 {
            self.since_deadline_check = 0;
            if Instant::now() > self.deadline {
                return Err(EvalError::Timeout);
            }
        }
        Ok(())
    }
}

type Env = HashMap<String, JsonValue>;

fn restore(env: &mut Env, var: &str, prev: Option<JsonValue>) {
    match prev {
        Some(v) => {
            env.insert(var.to_string(), v);
        }
        None => {
            env.remove(var);
        }
    }
}

fn eval_body(
    ctx: &mut EvalCtx<'_>,
    stmts: &[Stmt],
    env: &mut Env,
    on_match: &mut dyn FnMut(&mut EvalCtx<'_>, &Env) -> Result<(), EvalError>,
) -> Result<(), EvalError> {
    let Some((stmt, rest)) = stmts.split_first() else {
        return on_match(ctx, env);
    };
    ctx.charge(1)?;
    match stmt {
        Stmt::Expr(expr) => match eval_expr(ctx, expr, env)? {
            Some(JsonValue::Bool(false)) | None => Ok(()),
            Some(_) => eval_body(ctx, rest, env, on_match),
        },
        Stmt::Not(expr) => match eval_expr(ctx, expr, env)? {
            Some(JsonValue::Bool(false)) | None => eval_body(ctx, rest, env, on_match),
            Some(_) => Ok(()),
        },
        Stmt::Assign { var, expr } => match eval_expr(ctx, expr, env)? {
            Some(value) => {
                let prev = env.insert(var.clone(), value);
                let result = eval_body(ctx, rest, env, on_match);
                restore(env, var, prev);
                result
            }
            None => Ok(()),
        },
        Stmt::Some { var, collection } => {
            let Some(coll) = eval_expr(ctx, collection, env)? else {
                return Ok(());
            };
            let items: Vec<JsonValue> = match coll {
                JsonValue::Array(items) => items,
                // Objects iterate values in sorted key order.
                JsonValue::Object(map) => map.into_iter().map(|(_, v)| v).collect(),
                _ => {
                    return Err(EvalError::Type(
                        "'some .. in' expects an array or object".into(),
                    ))
                }
            };
            for item in items {
                ctx.charge(1)?;
                let prev = env.insert(var.clone(), item);
                let result = eval_body(ctx, rest, env, on_match);
                restore(env, var, prev);
                result?;
            }
            Ok(())
        }
    }
}

fn eval_expr(
    ctx: &mut EvalCtx<'_>,
    expr: &Expr,
    env: &Env,
) -> Result<Option<JsonValue>, EvalError> {
    ctx.charge(1)?;
    match expr {
        Expr::Literal(value) => Ok(Some(value.clone())),
        Expr::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match eval_expr(ctx, item, env)? {
                    Some(v) => out.push(v),
                    None => return Ok(None),
                }
            }
            Ok(Some(JsonValue::Array(out)))
        }
        Expr::Object(fields) => {
            let mut map = serde_json::Map::new();
            for (key, value) in fields {
                match eval_expr(ctx, value, env)? {
                    Some(v) => {
                        map.insert(key.clone(), v);
                    }
                    None => return Ok(None),
                }
            }
            Ok(Some(JsonValue::Object(map)))
        }
        Expr::Ref { root, path } => {
            // Fast path: pure field chains walk by reference and clone only
            // the resolved leaf.
            if path.iter().all(|s| matches!(s, Selector::Field(_))) {
                let base: Option<&JsonValue> = if let Some(bound) = env.get(root) {
                    Some(bound)
                } else if root == "input" {
                    Some(ctx.input)
                } else if root == "data" {
                    Some(ctx.data)
                } else {
                    None
                };
                if let Some(mut cur) = base {
                    for selector in path {
                        let Selector::Field(name) = selector else { unreachable!() };
                        match cur.get(name) {
                            Some(v) => cur = v,
                            None => return Ok(None),
                        }
                    }
                    return Ok(Some(cur.clone()));
                }
                if module_has_helper(ctx, root) {
                    return if eval_helper(ctx, root)? && path.is_empty() {
                        Ok(Some(JsonValue::Bool(true)))
                    } else {
                        // A non-firing helper, or selectors into a boolean.
                        Ok(None)
                    };
                }
                return Ok(None);
            }
            let mut current: JsonValue = if let Some(bound) = env.get(root) {
                bound.clone()
            } else if root == "input" {
                ctx.input.clone()
            } else if root == "data" {
                ctx.data.clone()
            } else {
                // Helpers are booleans; indexing into one is undefined.
                // Anything else is unreachable after load-time resolution.
                return Ok(None);
            };
            for selector in path {
                let next = match selector {
                    Selector::Field(name) => current.get(name).cloned(),
                    Selector::Index(index_expr) => {
                        let Some(index) = eval_expr(ctx, index_expr, env)? else {
                            return Ok(None);
                        };
                        match (&current, &index) {
                            (JsonValue::Array(items), JsonValue::Number(n)) => {
                                let idx = n.as_u64().ok_or_else(|| {
                                    EvalError::Type("array index must be a non-negative integer".into())
                                })?;
                                items.get(usize::try_from(idx).unwrap_or(usize::MAX)).cloned()
                            }
                            (JsonValue::Object(map), JsonValue::String(key)) => {
                                map.get(key).cloned()
                            }
                            (JsonValue::Array(_), _) => {
                                return Err(EvalError::Type(
                                    "array index must be a number".into(),
                                ))
                            }
                            _ => None,
                        }
                    }
                };
                match next {
                    Some(v) => current = v,
                    None => return Ok(None),
                }
            }
            Ok(Some(current))
        }
        Expr::Binary { op, lhs, rhs } => {
            let (Some(l), Some(r)) = (eval_expr(ctx, lhs, env)?, eval_expr(ctx, rhs, env)?)
            else {
                return Ok(None);
            };
            compare(*op, &l, &r).map(|b| Some(JsonValue::Bool(b)))
        }
        Expr::In { needle, haystack } => {
            let (Some(n), Some(h)) = (eval_expr(ctx, needle, env)?, eval_expr(ctx, haystack, env)?)
            else {
                return Ok(None);
            };
            let found = match h {
                JsonValue::Array(items) => items.iter().any(|item| *item == n),
                JsonValue::Object(map) => map.values().any(|v| *v == n),
                _ => {
                    return Err(EvalError::Type(
                        "'in' expects an array or object on the right".into(),
                    ))
                }
            };
            Ok(Some(JsonValue::Bool(found)))
        }
        Expr::Call { name, args, .. } => {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                match eval_expr(ctx, arg, env)? {
                    Some(v) => values.push(v),
                    None => return Ok(None),
                }
            }
            let bundle = ctx.bundle;
            crate::builtins::call(name, &values, ctx.request_ns, &|pattern| {
                bundle.regex(pattern)
            })
            .map(Some)
        }
    }
}

fn compare(op: BinOp, l: &JsonValue, r: &JsonValue) -> Result<bool, EvalError> {
    match op {
        BinOp::Eq => Ok(l == r),
        BinOp::Ne => Ok(l != r),
        ordered => {
            let ordering = match (l, r) {
                (JsonValue::Number(a), JsonValue::Number(b)) => a
                    .as_f64()
                    .zip(b.as_f64())
                    .and_then(|(a, b)| a.partial_cmp(&b))
                    .ok_or_else(|| EvalError::Type("numbers are not comparable".into()))?,
                (JsonValue::String(a), JsonValue::String(b)) => a.cmp(b),
                _ => {
                    return Err(EvalError::Type(
                        "ordering comparisons need two numbers or two strings".into(),
                    ))
                }
            };
            Ok(match ordered {
                BinOp::Lt => ordering.is_lt(),
                BinOp::Le => ordering.is_le(),
                BinOp::Gt => ordering.is_gt(),
                BinOp::Ge => ordering.is_ge(),
                BinOp::Eq | BinOp::Ne => unreachable!("handled above"),
            })
        }
    }
}

fn module_has_helper(ctx: &EvalCtx<'_>, name: &str) -> bool {
    ctx.module
        .is_some_and(|m| m.rules.iter().any(|r| r.name.as_deref() == Some(name)))
}

/// Evaluate a module-local helper: true when any rule body with that name
/// matches. Memoized per (module, input) — helpers are pure.
fn eval_helper(ctx: &mut EvalCtx<'_>, name: &str) -> Result<bool, EvalError> {
    if let Some(&fired) = ctx.helper_cache.get(name) {
        return Ok(fired);
    }
    let Some(module) = ctx.module else { return Ok(false) };
    let mut fired = false;
    for rule in &module.rules {
        if rule.name.as_deref() != Some(name) {
            continue;
        }
        let mut env = Env::new();
        let mut matched = false;
        eval_body(ctx, &rule.body, &mut env, &mut |_: &mut EvalCtx<'_>, _: &Env| {
            matched = true;
            Ok(())
        })?;
        if matched {
            fired = true;
            break;
        }
    }
    ctx.helper_cache.insert(name.to_string(), fired);
    Ok(fired)
}

struct Outputs {
    allow_fired: bool,
    violations: Vec<Violation>,
    obligations: Vec<Obligation>,
    redact_keys: Vec<String>,
    omit_keys: Vec<String>,
}

fn collect_rule(
    ctx: &mut EvalCtx<'_>,
    rule: &Rule,
    outputs: &mut Outputs,
) -> Result<(), EvalError> {
    let mut env = Env::new();
    let kind = rule.kind;
    let head_term = rule.head_term.as_ref();
    let mut on_match = |ctx: &mut EvalCtx<'_>, env: &Env| -> Result<(), EvalError> {
        match kind {
            RuleKind::Allow => {
                outputs.allow_fired = true;
                Ok(())
            }
            RuleKind::Deny => {
                let term = eval_head(ctx, head_term, env)?;
                outputs.violations.push(violation_from(term)?);
                Ok(())
            }
            RuleKind::Obligation => {
                let term = eval_head(ctx, head_term, env)?;
                let token = term.as_str().ok_or(EvalError::Type(
                    "obligation head term must be a string".into(),
                ))?;
                let obligation = Obligation::parse(token)
                    .ok_or_else(|| EvalError::UnknownObligation(token.to_string()))?;
                outputs.obligations.push(obligation);
                Ok(())
            }
            RuleKind::Redact | RuleKind::Omit => {
                let term = eval_head(ctx, head_term, env)?;
                let key = term.as_str().ok_or(EvalError::BadParameterKey)?.to_string();
                if kind == RuleKind::Redact {
                    outputs.redact_keys.push(key);
                } else {
                    outputs.omit_keys.push(key);
                }
                Ok(())
            }
            RuleKind::Helper => unreachable!("helper rules are filtered out before collect_rule"),
        }
    };
    eval_body(ctx, &rule.body, &mut env, &mut on_match)
}

fn eval_head(
    ctx: &mut EvalCtx<'_>,
    head_term: Option<&Expr>,
    env: &Env,
) -> Result<JsonValue, EvalError> {
    let expr = head_term.ok_or(EvalError::BadViolationTerm)?;
    // A head term that references an undefined path is a policy bug, not a
    // silent non-match: the body already succeeded.
    eval_expr(ctx, expr, env)?
        .ok_or_else(|| EvalError::Type("rule head term is undefined".into()))
}

fn violation_from(term: JsonValue) -> Result<Violation, EvalError> {
    match term {
        JsonValue::String(message) => Ok(Violation { rule_id: "deny".into(), message }),
        JsonValue::Object(map) => {
            let rule_id = map
                .get("rule_id")
                .and_then(JsonValue::as_str)
                .ok_or(EvalError::BadViolationTerm)?
                .to_string();
            let message = map
                .get("message")
                .and_then(JsonValue::as_str)
                .ok_or(EvalError::BadViolationTerm)?
                .to_string();
            Ok(Violation { rule_id, message })
        }
        _ => Err(EvalError::BadViolationTerm),
    }
}

/// Evaluate the compiled bundle against an input JSON tree.
///
/// `parameters` seeds `filtered_parameters`; `request_ns` drives the time
/// builtins; `evaluated_at` stamps the decision.
pub fn evaluate(
    bundle: &CompiledBundle,
    input: &JsonValue,
    parameters: &std::collections::BTreeMap<String, JsonValue>,
    request_ns: i64,
    limits: EvalLimits,
    evaluated_at: chrono::DateTime<chrono::Utc>,
) -> EvalResult {
    let mut ctx = EvalCtx {
        input,
        data: bundle.data(),
        bundle,
        module: None,
        helper_cache: HashMap::new(),
        request_ns,
        steps_left: limits.max_steps,
        deadline: Instant::now() + limits.deadline,
        since_deadline_check: 0,
    };
    let mut outputs = Outputs {
        allow_fired: false,
        violations: Vec::new(),
        obligations: Vec::new(),
        redact_keys: Vec::new(),
        omit_keys: Vec::new(),
    };

    for module in bundle.modules() {
        ctx.module = Some(module);
        ctx.helper_cache.clear();
        for rule in &module.rules {
            if rule.kind == RuleKind::Helper {
                continue;
            }
            if let Err(err) = collect_rule(&mut ctx, rule, &mut outputs) {
                return fail_closed(bundle, evaluated_at, &err);
            }
        }
    }

    assemble(bundle, outputs, parameters, evaluated_at)
}

fn fail_closed(
    bundle: &CompiledBundle,
    evaluated_at: chrono::DateTime<chrono::Utc>,
    err: &EvalError,
) -> EvalResult {
    let reason = match err {
        EvalError::Timeout => "policy evaluation timeout".to_string(),
        other => format!("policy evaluation failed: {other}"),
    };
    EvalResult {
        decision: AuthorizationDecision::deny(reason, bundle.version(), evaluated_at),
        error: true,
    }
}

fn assemble(
    bundle: &CompiledBundle,
    outputs: Outputs,
    parameters: &std::collections::BTreeMap<String, JsonValue>,
    evaluated_at: chrono::DateTime<chrono::Utc>,
) -> EvalResult {
    // Union with first-occurrence order, deduplicated.
    let mut violations: Vec<Violation> = Vec::new();
    for v in outputs.violations {
        if !violations.contains(&v) {
            violations.push(v);
        }
    }
    let obligations: std::collections::BTreeSet<Obligation> =
        outputs.obligations.into_iter().collect();

    let mut filtered = parameters.clone();
    for key in &outputs.redact_keys {
        if let Some(slot) = filtered.get_mut(key) {
            *slot = JsonValue::String(REDACTION_SENTINEL.to_string());
        }
    }
    for key in &outputs.omit_keys {
        filtered.remove(key);
    }

    let allow = outputs.allow_fired && violations.is_empty();
    let reason = if allow {
        "allowed by policy".to_string()
    } else if let Some(first) = violations.first() {
        first.message.clone()
    } else {
        "no allow rule matched".to_string()
    };

    EvalResult {
        decision: AuthorizationDecision {
            allow,
            reason,
            obligations,
            filtered_parameters: filtered,
            violations,
            policy_version: bundle.version().to_string(),
            evaluated_at,
        },
        error: false,
    }
}
