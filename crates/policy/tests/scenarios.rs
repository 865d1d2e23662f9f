use policy::Enforcer;
use serde_json::json;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

fn write_temp_policy(name: &str, content: &str) -> PathBuf {
    let mut p = std::env::temp_dir();
    p.push(format!("policy_scenarios_{}_{}_{}.json", name, std::process::id(), rand_suffix()));
    fs::write(&p, content).expect("write temp policy");
    p
}

fn rand_suffix() -> u128 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos()
}

const CATALOG: &str = r#"{
    "admin": "role:admin",
    "user:create": "rule:admin",
    "owner": "user_id:%(user_id)s",
    "article:delete": "rule:admin or rule:owner",
    "deny_all": "!",
    "always": ""
}"#;

#[test]
fn full_catalog_end_to_end_through_the_public_api() {
    let path = write_temp_policy("full", CATALOG);
    let enforcer = Enforcer::builder(&path).build().unwrap();

    let lily = json!({"roles": ["admin"]});
    let kate = json!({"roles": ["user"], "user_id": "kate"});
    let kates_article = json!({"user_id": "kate"});
    let others_article = json!({"user_id": "someone-else"});

    assert!(enforcer.enforce("user:create", &json!({}), &lily).unwrap());
    assert!(!enforcer.enforce("user:create", &json!({}), &kate).unwrap());
    assert!(enforcer.enforce("article:delete", &kates_article, &kate).unwrap());
    assert!(!enforcer.enforce("article:delete", &others_article, &kate).unwrap());
    assert!(enforcer.enforce("article:delete", &others_article, &lily).unwrap());
    assert!(!enforcer.enforce("deny_all", &json!({}), &lily).unwrap());
    assert!(enforcer.enforce("always", &json!({}), &kate).unwrap());
    assert!(!enforcer.enforce("unknown:rule", &json!({}), &lily).unwrap());

    fs::remove_file(&path).ok();
}

#[test]
fn concurrent_enforcement_loads_the_policy_file_only_once() {
    let path = write_temp_policy("concurrent", CATALOG);
    let enforcer = Arc::new(Enforcer::builder(&path).build().unwrap());

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let enforcer = Arc::clone(&enforcer);
            let cred = json!({"roles": ["admin"]});
            std::thread::spawn(move || {
                let rule = if i % 2 == 0 { "admin" } else { "always" };
                enforcer.enforce(rule, &json!({}), &cred).unwrap()
            })
        })
        .collect();

    for h in handles {
        assert!(h.join().unwrap());
    }

    fs::remove_file(&path).ok();
}

#[test]
fn malformed_policy_file_fails_closed_on_load() {
    let path = write_temp_policy("malformed", "not valid json");
    let enforcer = Enforcer::builder(&path).build().unwrap();
    let err = enforcer.enforce("anything", &json!({}), &json!({})).unwrap_err();
    assert!(matches!(err, policy::PolicyError::Json { .. }));
    fs::remove_file(&path).ok();
}

#[test]
fn missing_policy_file_fails_closed_on_load() {
    let mut path = std::env::temp_dir();
    path.push(format!("policy_scenarios_missing_{}_{}.json", std::process::id(), rand_suffix()));
    let enforcer = Enforcer::builder(&path).build().unwrap();
    let err = enforcer.enforce("anything", &json!({}), &json!({})).unwrap_err();
    assert!(matches!(err, policy::PolicyError::Io { .. }));
}
