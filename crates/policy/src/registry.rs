//! Check registry (C3): a process-wide map from `kind` to a factory that
//! builds the evaluator for a `kind:match` base check.
//!
//! Registration is additive; a later registration under the same key
//! overwrites the earlier one. Three factories are registered lazily on
//! first access: `rule`, `role`, and the wildcard (generic) entry keyed by
//! `None`.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use crate::checks::{BaseEval, GenericEval, RoleEval, RuleEval};

/// Builds the evaluator for a base check given its raw `kind` and `match` text.
pub type Factory = Arc<dyn Fn(&str, &str) -> Arc<dyn BaseEval> + Send + Sync>;

struct Registry {
    factories: HashMap<Option<String>, Factory>,
}

static REGISTRY: OnceLock<RwLock<Registry>> = OnceLock::new();

fn registry() -> &'static RwLock<Registry> {
    REGISTRY.get_or_init(|| {
        let mut factories: HashMap<Option<String>, Factory> = HashMap::new();
        factories.insert(
            Some("rule".to_string()),
            Arc::new(|_kind: &str, m: &str| -> Arc<dyn BaseEval> { Arc::new(RuleEval { name: m.to_string() }) }),
        );
        factories.insert(
            Some("role".to_string()),
            Arc::new(|_kind: &str, m: &str| -> Arc<dyn BaseEval> { Arc::new(RoleEval { pattern: m.to_string() }) }),
        );
        factories.insert(
            None,
            Arc::new(|kind: &str, m: &str| -> Arc<dyn BaseEval> {
                Arc::new(GenericEval { kind: kind.to_string(), match_pattern: m.to_string() })
            }),
        );
        RwLock::new(Registry { factories })
    })
}

/// Register (or overwrite) the factory for `kind`. Passing `None` registers
/// the wildcard handler invoked for any kind with no specific registration.
pub fn register(kind: Option<&str>, factory: Factory) {
    let reg = registry();
    let mut guard = reg.write().expect("check registry lock poisoned");
    guard.factories.insert(kind.map(str::to_string), factory);
}

/// Look up the evaluator-building factory for `kind`, falling back to the
/// wildcard entry if no specific factory is registered.
pub fn lookup(kind: &str) -> Option<Factory> {
    let reg = registry();
    let guard = reg.read().expect("check registry lock poisoned");
    guard
        .factories
        .get(&Some(kind.to_string()))
        .or_else(|| guard.factories.get(&None))
        .cloned()
}
