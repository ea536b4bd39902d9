//! Cache key layout.
//!
//! Records and claims live side by side under one namespace:
//! `{prefix}:event:{dedup_key}` and `{prefix}:claim:{dedup_key}`.

use crate::domain::events::DedupKey;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKeys {
    prefix: String,
}

impl CacheKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn event(&self, key: &DedupKey) -> String {
        format!("{}:event:{}", self.prefix, key)
    }

    pub fn claim(&self, key: &DedupKey) -> String {
        format!("{}:claim:{}", self.prefix, key)
    }

    /// Glob matching every key in the namespace.
    pub fn namespace_pattern(&self) -> String {
        format!("{}:*", escape_glob(&self.prefix))
    }
}

fn escape_glob(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_and_claim_keys_do_not_collide() {
        let keys = CacheKeys::new("gw");
        let key = DedupKey::new("abc");
        assert_eq!(keys.event(&key), "gw:event:abc");
        assert_eq!(keys.claim(&key), "gw:claim:abc");
    }

    #[test]
    fn namespace_pattern_escapes_glob_characters() {
        assert_eq!(CacheKeys::new("gw").namespace_pattern(), "gw:*");
        assert_eq!(CacheKeys::new("g*w").namespace_pattern(), "g\\*w:*");
    }
}
