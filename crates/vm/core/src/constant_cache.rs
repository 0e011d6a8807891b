//! Per-instruction constant caches.
//!
//! A cached constant stays valid until the global constant serial moves.
//! Any definition anywhere bumps the serial, so invalidation is a single
//! integer comparison on the read path.

use std::sync::{Arc, RwLock};

use crate::call_site::SiteId;
use crate::value::{ModuleId, Symbol, Value};

#[derive(Debug)]
pub struct ConstantCacheEntry {
    value: Value,
    module: ModuleId,
    under: Option<ModuleId>,
    serial: u64,
}

impl ConstantCacheEntry {
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Module the constant was found in.
    pub fn module(&self) -> ModuleId {
        self.module
    }

    /// Scope the lookup was performed under, for scoped lookups.
    pub fn under(&self) -> Option<ModuleId> {
        self.under
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }
}

#[derive(Debug)]
pub struct ConstantCache {
    name: Symbol,
    site: SiteId,
    entry: RwLock<Option<Arc<ConstantCacheEntry>>>,
}

impl ConstantCache {
    pub fn empty(name: Symbol, site: SiteId) -> Self {
        Self {
            name,
            site,
            entry: RwLock::new(None),
        }
    }

    pub fn name(&self) -> &Symbol {
        &self.name
    }

    pub fn site(&self) -> SiteId {
        self.site
    }

    pub fn entry(&self) -> Option<Arc<ConstantCacheEntry>> {
        #[expect(clippy::unwrap_used, reason = "RwLock poisoning is unrecoverable")]
        let guard = self.entry.read().unwrap();
        guard.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.entry().is_none()
    }

    /// The cached value, if it was stored under `serial` for the same scope.
    pub fn retrieve(&self, serial: u64, under: Option<ModuleId>) -> Option<Value> {
        let entry = self.entry()?;
        (entry.serial == serial && entry.under == under).then(|| entry.value.clone())
    }

    pub fn update(&self, value: Value, module: ModuleId, under: Option<ModuleId>, serial: u64) {
        let entry = Arc::new(ConstantCacheEntry {
            value,
            module,
            under,
            serial,
        });
        #[expect(clippy::unwrap_used, reason = "RwLock poisoning is unrecoverable")]
        let mut guard = self.entry.write().unwrap();
        *guard = Some(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::MethodId;

    fn cache() -> ConstantCache {
        ConstantCache::empty(
            Symbol::new("LIMIT"),
            SiteId {
                method: MethodId(1),
                ip: 4,
            },
        )
    }

    #[test]
    fn test_empty_cache_misses() {
        let cache = cache();
        assert!(cache.is_empty());
        assert_eq!(cache.retrieve(0, None), None);
    }

    #[test]
    fn test_serial_change_invalidates() {
        let cache = cache();
        cache.update(Value::Integer(10), ModuleId::ROOT, None, 3);
        assert_eq!(cache.retrieve(3, None), Some(Value::Integer(10)));
        assert_eq!(cache.retrieve(4, None), None);
        assert_eq!(cache.entry().unwrap().module(), ModuleId::ROOT);
    }

    #[test]
    fn test_scope_is_part_of_the_key() {
        let cache = cache();
        cache.update(Value::Integer(1), ModuleId(70), Some(ModuleId(70)), 1);
        assert_eq!(cache.retrieve(1, Some(ModuleId(70))), Some(Value::Integer(1)));
        assert_eq!(cache.retrieve(1, Some(ModuleId(71))), None);
        assert_eq!(cache.retrieve(1, None), None);
    }
}
