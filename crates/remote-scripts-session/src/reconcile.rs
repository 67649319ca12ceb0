//! Pending model reloads awaiting their schema push.

use indexmap::IndexMap;
use remote_scripts_core::ParameterValues;

#[derive(Debug, Clone, PartialEq)]
struct PendingReload {
    values: ParameterValues,
    issued_at: u64,
}

/// Reload requests keyed by client model id, oldest first.
///
/// A schema push echoing a model id resolves that request and expires every
/// request issued before it. Pushes with any other model id leave the table
/// alone, so two reloads in flight both stay resolvable.
#[derive(Debug, Default)]
pub struct PendingReloads {
    entries: IndexMap<String, PendingReload>,
}

impl PendingReloads {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a reload issued at `version`.
    pub fn insert(&mut self, model_id: impl Into<String>, values: ParameterValues, version: u64) {
        let model_id = model_id.into();
        self.entries.shift_remove(&model_id);
        self.entries.insert(
            model_id,
            PendingReload {
                values,
                issued_at: version,
            },
        );
    }

    /// Resolve the reload with `model_id`, returning its values.
    pub fn resolve(&mut self, model_id: &str) -> Option<ParameterValues> {
        let index = self.entries.get_index_of(model_id)?;
        for (superseded, reload) in self.entries.drain(..index) {
            tracing::debug!(
                model_id = %superseded,
                "Expiring reload issued at version {}",
                reload.issued_at
            );
        }
        self.entries.shift_remove_index(0).map(|(_, reload)| reload.values)
    }

    /// Expire everything. Returns how many reloads were dropped.
    pub fn expire_all(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    #[must_use]
    pub fn contains(&self, model_id: &str) -> bool {
        self.entries.contains_key(model_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn values(env: &str) -> ParameterValues {
        let mut values = ParameterValues::new();
        values.insert("env".into(), json!(env));
        values
    }

    #[test]
    fn test_resolve_matching_reload() {
        let mut pending = PendingReloads::new();
        pending.insert("m1", values("staging"), 1);

        assert_eq!(pending.resolve("other"), None);
        assert!(pending.contains("m1"));
        assert_eq!(pending.resolve("m1"), Some(values("staging")));
        assert!(pending.is_empty());
    }

    #[test]
    fn test_racing_reloads() {
        let mut pending = PendingReloads::new();
        pending.insert("m1", values("staging"), 1);
        pending.insert("m2", values("prod"), 2);

        // The later reload answering first supersedes the earlier one.
        assert_eq!(pending.resolve("m2"), Some(values("prod")));
        assert!(!pending.contains("m1"));
        assert_eq!(pending.resolve("m1"), None);
    }

    #[test]
    fn test_in_order_answers_both_resolve() {
        let mut pending = PendingReloads::new();
        pending.insert("m1", values("staging"), 1);
        pending.insert("m2", values("prod"), 2);

        assert_eq!(pending.resolve("m1"), Some(values("staging")));
        assert_eq!(pending.resolve("m2"), Some(values("prod")));
    }

    #[test]
    fn test_expire_all() {
        let mut pending = PendingReloads::new();
        pending.insert("m1", values("a"), 1);
        pending.insert("m2", values("b"), 2);
        assert_eq!(pending.expire_all(), 2);
        assert_eq!(pending.len(), 0);
    }
}
