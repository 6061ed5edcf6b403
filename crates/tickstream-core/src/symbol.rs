//! Symbol Registry
//!
//! Process-wide bidirectional mapping between symbol strings and dense 32-bit
//! ids. Id 0 is reserved as invalid; ids are assigned monotonically on first
//! sight and never recycled. Reads vastly outnumber writes, so lookups take a
//! shared lock and only a miss upgrades to the exclusive lock with a
//! double-check.

use std::collections::HashMap;
use std::sync::RwLock;

struct Inner {
    by_name: HashMap<String, u32>,
    /// Dense id -> name table; slot 0 is the reserved empty entry.
    names: Vec<String>,
}

pub struct SymbolRegistry {
    inner: RwLock<Inner>,
}

impl SymbolRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                by_name: HashMap::new(),
                names: vec![String::new()],
            }),
        }
    }

    /// Resolve a symbol to its id, assigning the next id on first sight.
    /// The first inserter wins; concurrent callers observe the same id.
    pub fn get_or_add(&self, symbol: &str) -> u32 {
        {
            let inner = self.inner.read().unwrap();
            if let Some(&id) = inner.by_name.get(symbol) {
                return id;
            }
        }

        let mut inner = self.inner.write().unwrap();
        // Double-check: another thread may have inserted while we upgraded.
        if let Some(&id) = inner.by_name.get(symbol) {
            return id;
        }

        let id = inner.names.len() as u32;
        inner.names.push(symbol.to_string());
        inner.by_name.insert(symbol.to_string(), id);
        id
    }

    /// Name for an id; empty string for id 0 or an unknown id.
    pub fn by_id(&self, id: u32) -> String {
        let inner = self.inner.read().unwrap();
        match inner.names.get(id as usize) {
            Some(name) if id != 0 => name.clone(),
            _ => String::new(),
        }
    }

    /// Snapshot of all registered symbols in insertion order (ascending id).
    pub fn list_all(&self) -> Vec<(u32, String)> {
        let inner = self.inner.read().unwrap();
        inner
            .names
            .iter()
            .enumerate()
            .skip(1)
            .map(|(id, name)| (id as u32, name.clone()))
            .collect()
    }

    /// Number of registered symbols (excluding the reserved slot).
    pub fn len(&self) -> usize {
        self.inner.read().unwrap().names.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SymbolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_first_id_is_one() {
        let registry = SymbolRegistry::new();
        assert_eq!(registry.get_or_add("BTCUSDT"), 1);
    }

    #[test]
    fn test_get_or_add_idempotent() {
        let registry = SymbolRegistry::new();
        let id = registry.get_or_add("ETHUSDT");
        assert_eq!(registry.get_or_add("ETHUSDT"), id);
        assert_eq!(registry.get_or_add("ETHUSDT"), id);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_ids_are_dense_and_monotonic() {
        let registry = SymbolRegistry::new();
        assert_eq!(registry.get_or_add("A"), 1);
        assert_eq!(registry.get_or_add("B"), 2);
        assert_eq!(registry.get_or_add("C"), 3);
    }

    #[test]
    fn test_by_id_roundtrip() {
        let registry = SymbolRegistry::new();
        let id = registry.get_or_add("SOLUSDT");
        assert_eq!(registry.by_id(id), "SOLUSDT");
    }

    #[test]
    fn test_by_id_reserved_and_unknown() {
        let registry = SymbolRegistry::new();
        registry.get_or_add("X");
        assert_eq!(registry.by_id(0), "");
        assert_eq!(registry.by_id(999), "");
    }

    #[test]
    fn test_list_all_in_insertion_order() {
        let registry = SymbolRegistry::new();
        registry.get_or_add("B");
        registry.get_or_add("A");
        registry.get_or_add("C");
        assert_eq!(
            registry.list_all(),
            vec![
                (1, "B".to_string()),
                (2, "A".to_string()),
                (3, "C".to_string())
            ]
        );
    }

    #[test]
    fn test_concurrent_get_or_add_agree_on_id() {
        let registry = Arc::new(SymbolRegistry::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            handles.push(std::thread::spawn(move || {
                let mut ids = Vec::new();
                for i in 0..100 {
                    ids.push(registry.get_or_add(&format!("SYM{}", i % 10)));
                }
                ids
            }));
        }

        let results: Vec<Vec<u32>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        // Every thread must have observed the same id for the same symbol.
        for ids in &results[1..] {
            assert_eq!(ids, &results[0]);
        }
        assert_eq!(registry.len(), 10);
    }
}
