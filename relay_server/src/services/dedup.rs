//! Per-dispatch guard so a webhook target is posted to at most once per
//! commit, however many matched rules name it.

use std::collections::HashSet;

#[derive(Debug, Default)]
pub struct DedupGuard {
    seen: HashSet<String>,
}

impl DedupGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` the first time `target` is offered and records it;
    /// `false` on every later call for the same target.
    pub fn should_post(&mut self, target: &str) -> bool {
        if self.seen.contains(target) {
            return false;
        }
        self.seen.insert(target.to_string())
    }
}
