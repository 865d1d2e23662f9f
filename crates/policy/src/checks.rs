//! Check model (C2): the algebra of evaluable nodes.
//!
//! `Check` is a tagged sum rather than a class hierarchy (`spec.md` §9):
//! constants and combinators are closed variants pattern-matched by `eval`;
//! only the base-check's kind dispatch uses a trait object, because the
//! check registry (C3) is explicitly open for runtime extension.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::target;

/// Maximum `rule:` resolution depth before a self-referential catalog is
/// treated as a (fail-closed) `false` result (`spec.md` §9 Open Question).
pub const MAX_RULE_DEPTH: u32 = 32;

/// Threaded through evaluation to bound recursive `rule:` resolution.
#[derive(Debug, Default)]
pub struct EvalContext {
    depth: u32,
}

impl EvalContext {
    /// Enter one more level of `rule:` recursion; `false` if the bound was
    /// already reached.
    fn enter(&mut self) -> bool {
        if self.depth >= MAX_RULE_DEPTH {
            return false;
        }
        self.depth += 1;
        true
    }

    fn exit(&mut self) {
        self.depth -= 1;
    }
}

/// Callback the enforcer implements so that `rule:` checks can recurse into
/// other named rules without `checks` depending on the enforcer module.
pub trait RuleLookup {
    /// Evaluate the named rule, or `false` if it is absent from the catalog.
    fn eval_named(&self, name: &str, target: &Value, cred: &Value, ctx: &mut EvalContext) -> bool;
}

/// Per-kind evaluation behavior for a `kind:match` base check, assembled by
/// the check registry (C3) at parse time.
pub trait BaseEval: fmt::Debug + Send + Sync {
    /// Evaluate this base check.
    fn evaluate(
        &self,
        target: &Value,
        cred: &Value,
        lookup: &dyn RuleLookup,
        ctx: &mut EvalContext,
    ) -> bool;
}

/// A `kind:match` leaf check plus the evaluator the registry bound it to.
#[derive(Debug, Clone)]
pub struct Base {
    pub(crate) kind: String,
    pub(crate) match_pattern: String,
    pub(crate) eval: Arc<dyn BaseEval>,
}

impl Base {
    /// Construct a base check from its raw `kind`/`match` text and the
    /// registry-assembled evaluator.
    pub fn new(kind: impl Into<String>, match_pattern: impl Into<String>, eval: Arc<dyn BaseEval>) -> Self {
        Self { kind: kind.into(), match_pattern: match_pattern.into(), eval }
    }
}

/// `rule:NAME` — resolves `NAME` in the enforcer's catalog.
#[derive(Debug)]
pub struct RuleEval {
    /// Name of the rule to resolve in the enforcer's catalog.
    pub name: String,
}

impl BaseEval for RuleEval {
    fn evaluate(&self, target: &Value, cred: &Value, lookup: &dyn RuleLookup, ctx: &mut EvalContext) -> bool {
        if !ctx.enter() {
            tracing::warn!(rule = %self.name, "rule: recursion depth exceeded, failing closed");
            return false;
        }
        let result = lookup.eval_named(&self.name, target, cred, ctx);
        ctx.exit();
        result
    }
}

/// `role:R` — `R` is a `%(key)s` format string interpolated from the
/// target, then matched case-insensitively against the credential's `roles`.
#[derive(Debug)]
pub struct RoleEval {
    /// `%(key)s`-interpolated pattern compared case-insensitively against
    /// the credential's `roles` array.
    pub pattern: String,
}

impl BaseEval for RoleEval {
    fn evaluate(&self, target: &Value, cred: &Value, _lookup: &dyn RuleLookup, _ctx: &mut EvalContext) -> bool {
        let Some(wanted) = target::interpolate(&self.pattern, target) else {
            return false;
        };
        let Some(roles) = cred.get("roles").and_then(Value::as_array) else {
            return false;
        };
        roles
            .iter()
            .filter_map(Value::as_str)
            .any(|role| role.eq_ignore_ascii_case(&wanted))
    }
}

/// The generic (wildcard) check: either a literal comparison, or a dotted
/// path walk into the credential.
#[derive(Debug)]
pub struct GenericEval {
    /// Raw check kind: either a JSON literal or a dotted credential path.
    pub kind: String,
    /// `%(key)s`-interpolated pattern the resolved value is compared against.
    pub match_pattern: String,
}

impl BaseEval for GenericEval {
    fn evaluate(&self, target: &Value, cred: &Value, _lookup: &dyn RuleLookup, _ctx: &mut EvalContext) -> bool {
        let Some(wanted) = target::interpolate(&self.match_pattern, target) else {
            return false;
        };
        if let Some(literal) = target::try_decode_literal(&self.kind) {
            return target::display_value(&literal) == wanted;
        }
        let path: Vec<&str> = self.kind.split('.').collect();
        target::find_in_object(cred, &path, &wanted)
    }
}

/// A node in the evaluable check tree.
#[derive(Debug, Clone)]
pub enum Check {
    /// Always denies.
    False,
    /// Always allows.
    True,
    /// `kind:match`, dispatched through the check registry.
    Base(Base),
    /// Logical negation of one child.
    Not(Box<Check>),
    /// Logical AND of at least two children; short-circuits on the first `false`.
    And(Vec<Check>),
    /// Logical OR of at least two children; short-circuits on the first `true`.
    Or(Vec<Check>),
}

impl Check {
    /// Evaluate this check against `(target, cred)`, recursing into other
    /// named rules through `lookup`.
    pub fn eval(&self, target: &Value, cred: &Value, lookup: &dyn RuleLookup) -> bool {
        let mut ctx = EvalContext::default();
        self.eval_with(target, cred, lookup, &mut ctx)
    }

    pub(crate) fn eval_with(
        &self,
        target: &Value,
        cred: &Value,
        lookup: &dyn RuleLookup,
        ctx: &mut EvalContext,
    ) -> bool {
        match self {
            Check::False => false,
            Check::True => true,
            Check::Base(base) => base.eval.evaluate(target, cred, lookup, ctx),
            Check::Not(inner) => !inner.eval_with(target, cred, lookup, ctx),
            Check::And(children) => children.iter().all(|c| c.eval_with(target, cred, lookup, ctx)),
            Check::Or(children) => children.iter().any(|c| c.eval_with(target, cred, lookup, ctx)),
        }
    }

    /// Append a child to an `And`/`Or` node in place. Only used by the
    /// parser while building a tree; panics on any other variant, mirroring
    /// the invariant that the tree is frozen once parsing completes.
    pub(crate) fn add_child(&mut self, child: Check) {
        match self {
            Check::And(children) | Check::Or(children) => children.push(child),
            other => panic!("add_child called on non-combinator check: {other:?}"),
        }
    }
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Check::False => write!(f, "!"),
            Check::True => write!(f, "@"),
            Check::Base(base) => write!(f, "{}:{}", base.kind, base.match_pattern),
            Check::Not(inner) => write!(f, "not {inner}"),
            Check::And(children) => {
                write!(f, "(")?;
                for (i, c) in children.iter().enumerate() {
                    if i > 0 {
                        write!(f, " and ")?;
                    }
                    write!(f, "{c}")?;
                }
                write!(f, ")")
            }
            Check::Or(children) => {
                write!(f, "(")?;
                for (i, c) in children.iter().enumerate() {
                    if i > 0 {
                        write!(f, " or ")?;
                    }
                    write!(f, "{c}")?;
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    struct NoRules;
    impl RuleLookup for NoRules {
        fn eval_named(&self, _name: &str, _target: &Value, _cred: &Value, _ctx: &mut EvalContext) -> bool {
            false
        }
    }

    #[test]
    fn constants_evaluate_and_render() {
        assert!(Check::True.eval(&json!({}), &json!({}), &NoRules));
        assert!(!Check::False.eval(&json!({}), &json!({}), &NoRules));
        assert_eq!(Check::True.to_string(), "@");
        assert_eq!(Check::False.to_string(), "!");
    }

    #[test]
    fn not_inverts_child() {
        let check = Check::Not(Box::new(Check::True));
        assert!(!check.eval(&json!({}), &json!({}), &NoRules));
        assert_eq!(check.to_string(), "not @");
    }

    /// A mock check that records whether it was ever evaluated, to verify
    /// `And`/`Or` short-circuit (testable property #3 in `spec.md` §8).
    #[derive(Debug)]
    struct CountingEval {
        value: bool,
        calls: Mutex<u32>,
    }

    impl BaseEval for CountingEval {
        fn evaluate(&self, _t: &Value, _c: &Value, _l: &dyn RuleLookup, _ctx: &mut EvalContext) -> bool {
            *self.calls.lock().unwrap() += 1;
            self.value
        }
    }

    fn counting(value: bool) -> (Check, Arc<CountingEval>) {
        let eval = Arc::new(CountingEval { value, calls: Mutex::new(0) });
        let check = Check::Base(Base::new("x", "y", eval.clone()));
        (check, eval)
    }

    #[test]
    fn and_short_circuits_on_first_false() {
        let (a, a_eval) = counting(false);
        let (b, b_eval) = counting(true);
        let and = Check::And(vec![a, b]);
        assert!(!and.eval(&json!({}), &json!({}), &NoRules));
        assert_eq!(*a_eval.calls.lock().unwrap(), 1);
        assert_eq!(*b_eval.calls.lock().unwrap(), 0, "second operand must not be evaluated");
    }

    #[test]
    fn or_short_circuits_on_first_true() {
        let (a, a_eval) = counting(true);
        let (b, b_eval) = counting(false);
        let or = Check::Or(vec![a, b]);
        assert!(or.eval(&json!({}), &json!({}), &NoRules));
        assert_eq!(*a_eval.calls.lock().unwrap(), 1);
        assert_eq!(*b_eval.calls.lock().unwrap(), 0, "second operand must not be evaluated");
    }

    #[test]
    fn rendering_matches_grammar() {
        let and = Check::And(vec![Check::True, Check::False]);
        assert_eq!(and.to_string(), "(@ and !)");
        let or = Check::Or(vec![Check::True, Check::False]);
        assert_eq!(or.to_string(), "(@ or !)");
    }
}
