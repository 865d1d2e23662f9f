//! A deterministic, fail-closed policy rule engine.
//!
//! A small DSL describes authorization rules as boolean expressions over
//! named checks (`role:admin`, `user_id:%(user_id)s`, `rule:other_rule`, ...).
//! Rules are parsed once into a [`checks::Check`] tree and evaluated against
//! a `(target, credentials)` pair.
//!
//! Security baseline: every ambiguity — a parse failure, a missing rule
//! name, a recursion bound exceeded, a placeholder that can't be filled —
//! resolves to `false` rather than panicking or raising, unless the
//! enforcer was explicitly configured to raise on denial.
//!
//! ```
//! use policy::Enforcer;
//! use serde_json::json;
//!
//! let path = std::env::temp_dir().join("policy_doctest_example.json");
//! std::fs::write(&path, r#"{"admin_only": "role:admin"}"#).unwrap();
//!
//! let enforcer = Enforcer::builder(&path).build().unwrap();
//!
//! let cred = json!({"roles": ["admin"]});
//! assert!(enforcer.enforce("admin_only", &json!({}), &cred).unwrap());
//! # std::fs::remove_file(&path).ok();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod checks;
mod enforcer;
mod error;
mod parser;
mod registry;
mod target;

pub use cache::invalidate as invalidate_cached_file;
pub use checks::{Base, BaseEval, Check, EvalContext, GenericEval, RoleEval, RuleEval, RuleLookup, MAX_RULE_DEPTH};
pub use enforcer::{DefaultRule, Enforcer, EnforcerBuilder};
pub use error::PolicyError;
pub use parser::{parse_rule, render};
pub use registry::{lookup as lookup_check_factory, register as register_check_factory, Factory};
pub use target::to_value;
