//! Name interning: expanded names mapped to compact integer fingerprints.
//!
//! URIs and local names are `string_cache` atoms; the pool adds a dense `u32` per
//! distinct `(uri, local)` pair so that name tests compare a single integer.

use crate::model::ExpandedName;
use std::collections::HashMap;
use std::sync::{OnceLock, PoisonError, RwLock};
use string_cache::DefaultAtom;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(u32);

impl Fingerprint {
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

#[derive(Default)]
struct PoolState {
    by_name: HashMap<(DefaultAtom, DefaultAtom), Fingerprint>,
    names: Vec<(DefaultAtom, DefaultAtom)>,
}

#[derive(Default)]
pub struct NamePool {
    state: RwLock<PoolState>,
}

static GLOBAL_POOL: OnceLock<NamePool> = OnceLock::new();

impl NamePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide pool used by node providers and name tests.
    pub fn global() -> &'static NamePool {
        GLOBAL_POOL.get_or_init(NamePool::new)
    }

    /// Fingerprint for `(uri, local)`, allocating one on first use. An empty URI
    /// means "no namespace".
    pub fn allocate(&self, uri: &str, local: &str) -> Fingerprint {
        let key = (DefaultAtom::from(uri), DefaultAtom::from(local));
        let known =
            self.state.read().unwrap_or_else(PoisonError::into_inner).by_name.get(&key).copied();
        if let Some(fp) = known {
            return fp;
        }
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(fp) = state.by_name.get(&key) {
            return *fp;
        }
        let fp = Fingerprint(state.names.len() as u32);
        state.names.push(key.clone());
        state.by_name.insert(key, fp);
        fp
    }

    /// Fingerprint for a name already in the pool, without allocating.
    pub fn lookup(&self, uri: &str, local: &str) -> Option<Fingerprint> {
        let key = (DefaultAtom::from(uri), DefaultAtom::from(local));
        self.state.read().unwrap_or_else(PoisonError::into_inner).by_name.get(&key).copied()
    }

    pub fn name(&self, fp: Fingerprint) -> Option<ExpandedName> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .names
            .get(fp.0 as usize)
            .map(|(uri, local)| ExpandedName::new(Some(&**uri), &**local))
    }

    pub fn len(&self) -> usize {
        self.state.read().unwrap_or_else(PoisonError::into_inner).names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_is_stable() {
        let pool = NamePool::new();
        let a = pool.allocate("urn:x", "item");
        let b = pool.allocate("urn:x", "item");
        assert_eq!(a, b);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn uri_distinguishes_names() {
        let pool = NamePool::new();
        let plain = pool.allocate("", "item");
        let qualified = pool.allocate("urn:x", "item");
        assert_ne!(plain, qualified);
    }

    #[test]
    fn name_round_trips() {
        let pool = NamePool::new();
        let fp = pool.allocate("urn:x", "item");
        let name = pool.name(fp).unwrap();
        assert_eq!(name.ns_uri.as_deref(), Some("urn:x"));
        assert_eq!(name.local, "item");
        assert_eq!(pool.name(pool.allocate("", "bare")).unwrap().ns_uri, None);
    }

    #[test]
    fn lookup_does_not_allocate() {
        let pool = NamePool::new();
        assert!(pool.lookup("", "missing").is_none());
        assert!(pool.is_empty());
    }
}
