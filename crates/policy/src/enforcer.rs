//! Enforcer (C5): rule catalog, lazy/thread-safe loader, enforcement entry
//! point (`spec.md` §4.5, §5).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};

use serde_json::Value;

use crate::cache;
use crate::checks::{Check, EvalContext, RuleLookup};
use crate::error::PolicyError;
use crate::parser;

/// The catalog's default rule, used when a requested rule name is absent
/// (`spec.md` §3 "Rule catalog").
#[derive(Debug, Clone, Default)]
pub enum DefaultRule {
    /// No default; a missing rule name fails the lookup.
    #[default]
    Unset,
    /// Fall back to another rule already present in the catalog.
    Name(String),
    /// Fall back to a pre-built check node.
    Node(Check),
}

/// An ordered mapping from rule name to check tree, plus the default rule.
#[derive(Debug, Default)]
struct Catalog {
    rules: HashMap<String, Check>,
    default_rule: DefaultRule,
}

impl Catalog {
    fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Look up `name`, falling back to the default rule exactly once
    /// (mirrors `Rules.__missing__` in the original — the default name must
    /// itself resolve directly in the catalog; it is not itself subject to
    /// further default-rule fallback, which would risk infinite recursion).
    fn get(&self, name: &str) -> Option<&Check> {
        if let Some(check) = self.rules.get(name) {
            return Some(check);
        }
        match &self.default_rule {
            DefaultRule::Unset => None,
            DefaultRule::Node(check) => Some(check),
            DefaultRule::Name(default_name) => self.rules.get(default_name),
        }
    }
}

/// Builder for [`Enforcer`], mirroring the original's
/// `Enforcer(policy_file, rules=None, default_rule=None, raise_error=False,
/// load_once=True)` constructor (`spec.md` §4.5, §6).
#[derive(Debug, Clone)]
pub struct EnforcerBuilder {
    policy_file: PathBuf,
    rules: HashMap<String, String>,
    default_rule: DefaultRule,
    raise_error: bool,
    load_once: bool,
}

impl EnforcerBuilder {
    fn new(policy_file: impl AsRef<Path>) -> Self {
        Self {
            policy_file: policy_file.as_ref().to_path_buf(),
            rules: HashMap::new(),
            default_rule: DefaultRule::Unset,
            raise_error: false,
            load_once: true,
        }
    }

    /// Seed the catalog with initial rule strings, parsed eagerly at `build`.
    #[must_use]
    pub fn rules(mut self, rules: HashMap<String, String>) -> Self {
        self.rules = rules;
        self
    }

    /// Set the default rule used when a requested name is absent.
    #[must_use]
    pub fn default_rule(mut self, default_rule: DefaultRule) -> Self {
        self.default_rule = default_rule;
        self
    }

    /// Raise errors on invalid rules / denied enforcement instead of
    /// failing closed silently.
    #[must_use]
    pub fn raise_error(mut self, raise_error: bool) -> Self {
        self.raise_error = raise_error;
        self
    }

    /// Re-read the policy file at most once per process (default `true`).
    #[must_use]
    pub fn load_once(mut self, load_once: bool) -> Self {
        self.load_once = load_once;
        self
    }

    /// Build the enforcer. Initial `rules` (if any) are parsed now, under
    /// the configured `raise_error` policy.
    pub fn build(self) -> Result<Enforcer, PolicyError> {
        let mut parsed = HashMap::with_capacity(self.rules.len());
        for (name, rule) in self.rules {
            parsed.insert(name, parser::parse_rule(&rule, self.raise_error)?);
        }
        let catalog = Catalog { rules: parsed, default_rule: self.default_rule.clone() };
        Ok(Enforcer {
            policy_file: self.policy_file,
            raise_error: self.raise_error,
            load_once: self.load_once,
            policy_loaded: AtomicBool::new(false),
            load_lock: Mutex::new(()),
            catalog: RwLock::new(catalog),
            default_rule: self.default_rule,
        })
    }
}

/// Responsible for loading and enforcing rules (`spec.md` §3 "Enforcer
/// state", §4.5, §5).
#[derive(Debug)]
pub struct Enforcer {
    policy_file: PathBuf,
    raise_error: bool,
    load_once: bool,
    policy_loaded: AtomicBool,
    load_lock: Mutex<()>,
    catalog: RwLock<Catalog>,
    default_rule: DefaultRule,
}

impl Enforcer {
    /// Start building an enforcer for the policy file at `policy_file`.
    pub fn builder(policy_file: impl AsRef<Path>) -> EnforcerBuilder {
        EnforcerBuilder::new(policy_file)
    }

    /// Load rules from the policy file (or from the process-global file
    /// cache) if needed.
    ///
    /// Implements double-checked locking (`spec.md` §4.5, §5): when
    /// `load_once` is set and a previous call already installed a catalog,
    /// this returns immediately without taking the load lock.
    pub fn load_rules(&self, force_reload: bool, overwrite: bool) -> Result<(), PolicyError> {
        if self.load_once && self.policy_loaded.load(Ordering::Acquire) {
            return Ok(());
        }

        let _guard = self.load_lock.lock().expect("policy load lock poisoned");

        if self.load_once && self.policy_loaded.load(Ordering::Acquire) {
            return Ok(());
        }

        let (reloaded, data) = cache::read(&self.policy_file, force_reload)?;
        let is_empty = self.catalog.read().expect("catalog lock poisoned").is_empty();

        if reloaded || is_empty {
            let raw: HashMap<String, String> =
                serde_json::from_str(&data).map_err(|source| PolicyError::Json {
                    path: self.policy_file.clone(),
                    source,
                })?;

            let mut parsed = HashMap::with_capacity(raw.len());
            for (name, rule) in raw {
                parsed.insert(name, parser::parse_rule(&rule, self.raise_error)?);
            }

            let mut catalog = self.catalog.write().expect("catalog lock poisoned");
            if overwrite {
                catalog.rules = parsed;
                catalog.default_rule = self.default_rule.clone();
            } else {
                catalog.rules.extend(parsed);
            }
            tracing::debug!(path = %self.policy_file.display(), "reloaded policy file");
        }

        // Set after the catalog is fully installed, so any thread observing
        // `loaded == true` also observes a complete catalog (`spec.md` §5).
        self.policy_loaded.store(true, Ordering::Release);
        Ok(())
    }

    /// Enforce `rule` against `(target, cred)`. Loads the catalog first
    /// (a no-op after the first successful load when `load_once` is set).
    ///
    /// On denial, raises [`PolicyError::NotAuthorized`] if this enforcer was
    /// built with `raise_error(true)`; otherwise returns `Ok(false)`.
    pub fn enforce(&self, rule: &str, target: &Value, cred: &Value) -> Result<bool, PolicyError> {
        self.enforce_or(rule, target, cred, PolicyError::not_authorized)
    }

    /// Like [`Enforcer::enforce`], but constructs a caller-supplied error
    /// type on denial instead of the default [`PolicyError::NotAuthorized`]
    /// (`spec.md` §4.5's "substitute exception factory"). Load/IO/JSON
    /// failures still propagate as `E` via `From<PolicyError>`.
    pub fn enforce_or<E>(
        &self,
        rule: &str,
        target: &Value,
        cred: &Value,
        make_exc: impl FnOnce(&str, &Value, &Value) -> E,
    ) -> Result<bool, E>
    where
        E: From<PolicyError>,
    {
        self.load_rules(false, true)?;

        // Clone the looked-up check and drop the read guard before evaluating:
        // evaluation may recurse into `rule:` references, which re-enters this
        // same `RwLock` via `eval_named`. Holding the guard across that call
        // would deadlock against a writer (`load_rules`) queued in between.
        let catalog = self.catalog.read().expect("catalog lock poisoned");
        let is_empty = catalog.is_empty();
        let found = catalog.get(rule).cloned();
        drop(catalog);

        let result = if is_empty {
            false
        } else {
            match found {
                Some(check) => {
                    let mut ctx = EvalContext::default();
                    check.eval_with(target, cred, self, &mut ctx)
                }
                None => {
                    tracing::debug!(rule, "rule does not exist in catalog, failing closed");
                    false
                }
            }
        };

        if self.raise_error && !result {
            tracing::warn!(rule, "enforcement denied");
            return Err(make_exc(rule, target, cred));
        }
        Ok(result)
    }

    /// Evaluate an already-built check tree directly, bypassing catalog
    /// lookup by name (`spec.md` §4.5 enforcement step 1). Still loads the
    /// catalog first, so any `rule:` references inside `check` resolve
    /// against it, matching every other enforcement entry point.
    pub fn enforce_check(&self, check: &Check, target: &Value, cred: &Value) -> Result<bool, PolicyError> {
        self.load_rules(false, true)?;
        Ok(check.eval(target, cred, self))
    }
}

impl RuleLookup for Enforcer {
    fn eval_named(&self, name: &str, target: &Value, cred: &Value, ctx: &mut EvalContext) -> bool {
        // See the comment in `enforce_or`: clone and drop the guard before
        // recursing, since a nested `rule:` reference re-enters here on the
        // same thread.
        let catalog = self.catalog.read().expect("catalog lock poisoned");
        let found = catalog.get(name).cloned();
        drop(catalog);

        match found {
            Some(check) => check.eval_with(target, cred, self, ctx),
            None => false,
        }
    }
}
