//! Read-mostly registry of loaded rule sets.
//!
//! Rule sets are stored behind `Arc` so executions hold a consistent snapshot;
//! the enable/disable toggle replaces the entry rather than mutating it.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::RuleEngineError;

use super::RuleSet;

fn lock_err(context: &'static str) -> RuleEngineError {
    RuleEngineError::Registry {
        message: format!("{context}: lock poisoned"),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RuleSetDocument {
    Many(Vec<RuleSet>),
    One(Box<RuleSet>),
}

/// Shared map of rule set id to rule set.
#[derive(Debug, Default)]
pub struct RuleSetRegistry {
    sets: RwLock<HashMap<String, Arc<RuleSet>>>,
}

impl RuleSetRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a rule set.
    pub fn register(&self, set: RuleSet) -> Result<(), RuleEngineError> {
        if set.id.trim().is_empty() {
            return Err(RuleEngineError::InvalidDefinition {
                reason: "rule set id must not be empty".to_string(),
            });
        }
        if set.domain.trim().is_empty() {
            return Err(RuleEngineError::InvalidDefinition {
                reason: format!("rule set '{}' has an empty domain", set.id),
            });
        }
        let mut guard = self.sets.write().map_err(|_| lock_err("register"))?;
        debug!(rule_set = %set.id, domain = %set.domain, rules = set.rules.len(), "registering rule set");
        guard.insert(set.id.clone(), Arc::new(set));
        Ok(())
    }

    /// Loads one rule set object or an array of them. Returns the number loaded.
    pub fn load_json_str(&self, raw: &str) -> Result<usize, RuleEngineError> {
        let doc: RuleSetDocument = serde_json::from_str(raw).map_err(|e| RuleEngineError::InvalidDefinition {
            reason: e.to_string(),
        })?;
        let sets = match doc {
            RuleSetDocument::Many(sets) => sets,
            RuleSetDocument::One(set) => vec![*set],
        };
        let count = sets.len();
        for set in sets {
            self.register(set)?;
        }
        info!(count, "loaded rule sets");
        Ok(count)
    }

    /// Loads rule sets from a JSON file.
    pub fn load_json_file(&self, path: impl AsRef<Path>) -> Result<usize, RuleEngineError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| RuleEngineError::InvalidDefinition {
            reason: format!("failed to read {}: {e}", path.display()),
        })?;
        self.load_json_str(&raw)
    }

    /// Looks up a rule set by id.
    pub fn get(&self, id: &str) -> Result<Arc<RuleSet>, RuleEngineError> {
        let guard = self.sets.read().map_err(|_| lock_err("get"))?;
        guard
            .get(id)
            .cloned()
            .ok_or_else(|| RuleEngineError::RuleSetNotFound { id: id.to_string() })
    }

    /// Enabled rule sets for a domain (case-insensitive), highest priority
    /// first, then by id.
    pub fn by_domain(&self, domain: &str) -> Result<Vec<Arc<RuleSet>>, RuleEngineError> {
        let guard = self.sets.read().map_err(|_| lock_err("by_domain"))?;
        let mut out: Vec<Arc<RuleSet>> = guard
            .values()
            .filter(|s| s.enabled && s.domain.eq_ignore_ascii_case(domain))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }

    /// Every rule set, ordered by id.
    pub fn all(&self) -> Result<Vec<Arc<RuleSet>>, RuleEngineError> {
        let guard = self.sets.read().map_err(|_| lock_err("all"))?;
        let mut out: Vec<Arc<RuleSet>> = guard.values().cloned().collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    /// Distinct domains of enabled rule sets, lowercased and sorted.
    pub fn domains(&self) -> Result<Vec<String>, RuleEngineError> {
        let guard = self.sets.read().map_err(|_| lock_err("domains"))?;
        let mut out: Vec<String> = guard
            .values()
            .filter(|s| s.enabled)
            .map(|s| s.domain.to_lowercase())
            .collect();
        out.sort();
        out.dedup();
        Ok(out)
    }

    /// Toggles a rule set. In-flight executions keep the snapshot they hold.
    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<(), RuleEngineError> {
        let mut guard = self.sets.write().map_err(|_| lock_err("set_enabled"))?;
        let entry = guard
            .get_mut(id)
            .ok_or_else(|| RuleEngineError::RuleSetNotFound { id: id.to_string() })?;
        if entry.enabled != enabled {
            let mut next = (**entry).clone();
            next.enabled = enabled;
            *entry = Arc::new(next);
            debug!(rule_set = %id, enabled, "rule set toggled");
        }
        Ok(())
    }

    /// Removes a rule set, returning it.
    pub fn remove(&self, id: &str) -> Result<Arc<RuleSet>, RuleEngineError> {
        let mut guard = self.sets.write().map_err(|_| lock_err("remove"))?;
        guard
            .remove(id)
            .ok_or_else(|| RuleEngineError::RuleSetNotFound { id: id.to_string() })
    }

    pub fn len(&self) -> Result<usize, RuleEngineError> {
        Ok(self.sets.read().map_err(|_| lock_err("len"))?.len())
    }

    pub fn is_empty(&self) -> Result<bool, RuleEngineError> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::Rule;

    #[test]
    fn by_domain_orders_by_priority_then_id() {
        let reg = RuleSetRegistry::new();
        reg.register(RuleSet::new("b", "Legal").with_priority(1)).unwrap();
        reg.register(RuleSet::new("a", "legal").with_priority(1)).unwrap();
        reg.register(RuleSet::new("c", "legal").with_priority(5)).unwrap();
        reg.register(RuleSet::new("d", "legal").disabled()).unwrap();
        reg.register(RuleSet::new("e", "finance")).unwrap();

        let ids: Vec<String> = reg.by_domain("LEGAL").unwrap().iter().map(|s| s.id.clone()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
        assert_eq!(reg.domains().unwrap(), vec!["finance", "legal"]);
    }

    #[test]
    fn set_enabled_is_copy_on_write() {
        let reg = RuleSetRegistry::new();
        reg.register(RuleSet::new("s", "general").with_rule(Rule::keywords("r", &["x"])))
            .unwrap();
        let snapshot = reg.get("s").unwrap();
        reg.set_enabled("s", false).unwrap();

        assert!(snapshot.enabled);
        assert!(!reg.get("s").unwrap().enabled);
        assert!(reg.by_domain("general").unwrap().is_empty());
        assert!(matches!(
            reg.set_enabled("missing", true),
            Err(RuleEngineError::RuleSetNotFound { .. })
        ));
    }

    #[test]
    fn load_single_and_array_documents() {
        let reg = RuleSetRegistry::new();
        let one = r#"{"id": "one", "domain": "general", "rules": []}"#;
        let many = r#"[{"id": "two", "domain": "general"}, {"id": "three", "domain": "legal"}]"#;
        assert_eq!(reg.load_json_str(one).unwrap(), 1);
        assert_eq!(reg.load_json_str(many).unwrap(), 2);
        assert_eq!(reg.len().unwrap(), 3);

        assert!(matches!(
            reg.load_json_str("{\"id\": 5}"),
            Err(RuleEngineError::InvalidDefinition { .. })
        ));
        assert!(reg.register(RuleSet::new(" ", "general")).is_err());
    }

    #[test]
    fn remove_returns_the_set() {
        let reg = RuleSetRegistry::new();
        reg.register(RuleSet::new("s", "general")).unwrap();
        assert_eq!(reg.remove("s").unwrap().id, "s");
        assert!(reg.is_empty().unwrap());
        assert!(reg.remove("s").is_err());
    }
}
