//! Monomorphic call-site caches.
//!
//! Every dispatch instruction gets one [`CallSite`] at link time. The site
//! remembers the last receiver type it saw together with the method that
//! type resolved to. A hit costs one identity comparison; a miss asks the
//! [`MethodResolver`] and replaces the remembered entry.
//!
//! Entries are immutable once built. A miss builds a complete
//! [`MonoInlineCache`] first and only then publishes it, so a concurrent
//! reader sees either the old entry or the new one, never a mix.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::opcodes::Opcode;
use crate::resolver::{LookupFlags, Method, MethodResolver, Visibility};
use crate::value::{ClassId, MethodId, ModuleId, Symbol, Value};

/// Identity of an instruction: the method and the instruction offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SiteId {
    pub method: MethodId,
    pub ip: usize,
}

/// What the dispatching instruction does with the resolved method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Send,
    VCall,
    Super,
    ToS,
    CheckSerial,
    BranchIfSerial,
}

impl CallKind {
    pub fn for_opcode(opcode: Opcode) -> Option<Self> {
        let kind = match opcode {
            Opcode::SendMethod
            | Opcode::SendStack
            | Opcode::SendStackWithBlock
            | Opcode::SendStackWithSplat => Self::Send,
            Opcode::SendVcall => Self::VCall,
            Opcode::SendSuperStackWithBlock
            | Opcode::SendSuperStackWithSplat
            | Opcode::Zsuper => Self::Super,
            Opcode::ObjectToS => Self::ToS,
            Opcode::CheckSerial | Opcode::CheckSerialPrivate => Self::CheckSerial,
            Opcode::BIfSerial => Self::BranchIfSerial,
            _ => return None,
        };
        Some(kind)
    }
}

/// Why a cached entry must go through `method_missing` instead of calling
/// the method directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodMissingReason {
    /// The call is legal.
    None,
    Private,
    Protected,
    /// Implicit-self call with no arguments found nothing.
    VCall,
    Super,
    Normal,
}

impl MethodMissingReason {
    /// Message of the `NoMethodError` raised when no `method_missing`
    /// handles the call.
    pub fn message(self, name: &Symbol, receiver: &Value) -> String {
        let type_name = receiver.type_name();
        match self {
            Self::Private => format!("private method '{name}' called for an instance of {type_name}"),
            Self::Protected => {
                format!("protected method '{name}' called for an instance of {type_name}")
            }
            Self::VCall => {
                format!("undefined local variable or method '{name}' for an instance of {type_name}")
            }
            Self::Super => format!("super: no superclass method '{name}'"),
            Self::None | Self::Normal => {
                format!("undefined method '{name}' for an instance of {type_name}")
            }
        }
    }
}

/// One remembered resolution: receiver type to method.
#[derive(Debug)]
pub struct MonoInlineCache {
    receiver_class: ClassId,
    stored_module: Option<ModuleId>,
    method: Option<Arc<Method>>,
    method_missing: MethodMissingReason,
    hits: AtomicU64,
}

impl MonoInlineCache {
    pub fn receiver_class(&self) -> ClassId {
        self.receiver_class
    }

    /// Module the method was found in.
    pub fn stored_module(&self) -> Option<ModuleId> {
        self.stored_module
    }

    pub fn method(&self) -> Option<&Arc<Method>> {
        self.method.as_ref()
    }

    pub fn method_missing(&self) -> MethodMissingReason {
        self.method_missing
    }

    /// The method, if it may be called directly.
    pub fn callable(&self) -> Option<&Arc<Method>> {
        match self.method_missing {
            MethodMissingReason::None => self.method.as_ref(),
            _ => None,
        }
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }
}

/// Observable state of a call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallSiteState {
    Empty,
    Resolved(ClassId),
}

#[derive(Debug)]
pub struct CallSite {
    name: Symbol,
    site: SiteId,
    kind: CallKind,
    allow_private: bool,
    is_super: bool,
    cache: RwLock<Option<Arc<MonoInlineCache>>>,
    resolutions: AtomicU64,
}

impl CallSite {
    /// An empty site for `name`. Private and super lookups are implied by
    /// the kind and can be forced with the builder methods.
    pub fn create(name: Symbol, kind: CallKind, site: SiteId) -> Self {
        Self {
            name,
            site,
            kind,
            allow_private: kind == CallKind::VCall,
            is_super: kind == CallKind::Super,
            cache: RwLock::new(None),
            resolutions: AtomicU64::new(0),
        }
    }

    pub fn with_private(mut self, allow_private: bool) -> Self {
        self.allow_private |= allow_private;
        self
    }

    pub fn with_super(mut self, is_super: bool) -> Self {
        self.is_super |= is_super;
        self
    }

    pub fn name(&self) -> &Symbol {
        &self.name
    }

    pub fn site(&self) -> SiteId {
        self.site
    }

    pub fn ip(&self) -> usize {
        self.site.ip
    }

    pub fn kind(&self) -> CallKind {
        self.kind
    }

    pub fn allows_private(&self) -> bool {
        self.allow_private
    }

    pub fn is_super(&self) -> bool {
        self.is_super
    }

    /// Number of times the resolver was consulted.
    pub fn resolutions(&self) -> u64 {
        self.resolutions.load(Ordering::Relaxed)
    }

    /// The currently published entry.
    pub fn cached(&self) -> Option<Arc<MonoInlineCache>> {
        #[expect(clippy::unwrap_used, reason = "RwLock poisoning is unrecoverable")]
        let guard = self.cache.read().unwrap();
        guard.clone()
    }

    pub fn state(&self) -> CallSiteState {
        match self.cached() {
            Some(cache) => CallSiteState::Resolved(cache.receiver_class),
            None => CallSiteState::Empty,
        }
    }

    /// Entry for `receiver_class`, resolving and replacing the published
    /// entry on a miss.
    pub fn lookup(
        &self,
        receiver_class: ClassId,
        resolver: &dyn MethodResolver,
        owner: Option<ModuleId>,
    ) -> Arc<MonoInlineCache> {
        if let Some(cache) = self.cached()
            && cache.receiver_class == receiver_class
        {
            cache.record_hit();
            return cache;
        }

        let cache = Arc::new(self.resolve(receiver_class, resolver, owner));
        tracing::trace!(
            name = %self.name,
            method = %self.site.method,
            ip = self.site.ip,
            receiver = receiver_class.0,
            found = cache.method.is_some(),
            "call site miss"
        );

        #[expect(clippy::unwrap_used, reason = "RwLock poisoning is unrecoverable")]
        let mut guard = self.cache.write().unwrap();
        *guard = Some(Arc::clone(&cache));
        cache
    }

    fn resolve(
        &self,
        receiver_class: ClassId,
        resolver: &dyn MethodResolver,
        owner: Option<ModuleId>,
    ) -> MonoInlineCache {
        self.resolutions.fetch_add(1, Ordering::Relaxed);
        let flags = LookupFlags {
            allow_private: self.allow_private,
            is_super: self.is_super,
            owner,
        };

        let (stored_module, method, method_missing) =
            match resolver.resolve(receiver_class, &self.name, flags) {
                Some(found) => {
                    let reason = match found.method.visibility {
                        Visibility::Private if !self.allow_private => MethodMissingReason::Private,
                        Visibility::Protected if !self.allow_private => {
                            MethodMissingReason::Protected
                        }
                        _ => MethodMissingReason::None,
                    };
                    (Some(found.module), Some(found.method), reason)
                }
                None => {
                    let reason = if self.kind == CallKind::VCall {
                        MethodMissingReason::VCall
                    } else if self.is_super {
                        MethodMissingReason::Super
                    } else {
                        MethodMissingReason::Normal
                    };
                    (None, None, reason)
                }
            };

        MonoInlineCache {
            receiver_class,
            stored_module,
            method,
            method_missing,
            hits: AtomicU64::new(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{Executable, NativeFn, ResolvedMethod};
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    const DOG: ClassId = ClassId(100);
    const CAT: ClassId = ClassId(101);

    struct CountingResolver {
        calls: AtomicUsize,
        seen: Mutex<Vec<LookupFlags>>,
        visibility: Visibility,
    }

    impl CountingResolver {
        fn new(visibility: Visibility) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
                visibility,
            }
        }
    }

    impl MethodResolver for CountingResolver {
        fn resolve(
            &self,
            receiver: ClassId,
            name: &Symbol,
            flags: LookupFlags,
        ) -> Option<ResolvedMethod> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            self.seen.lock().unwrap().push(flags);
            if receiver != DOG && receiver != CAT {
                return None;
            }
            let body: NativeFn = Arc::new(
                |_: &mut crate::state::State, _: crate::resolver::NativeArgs<'_>| Ok(Value::Nil),
            );
            Some(ResolvedMethod {
                module: ModuleId::from(receiver),
                method: Arc::new(Method::new(
                    name.clone(),
                    self.visibility,
                    receiver.0,
                    Executable::Native(body),
                )),
            })
        }
    }

    fn site(kind: CallKind) -> CallSite {
        CallSite::create(
            Symbol::new("speak"),
            kind,
            SiteId {
                method: MethodId(1),
                ip: 10,
            },
        )
    }

    #[test]
    fn test_hit_skips_the_resolver() {
        let resolver = CountingResolver::new(Visibility::Public);
        let site = site(CallKind::Send);
        assert_eq!(site.state(), CallSiteState::Empty);

        let first = site.lookup(DOG, &resolver, None);
        let second = site.lookup(DOG, &resolver, None);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(resolver.calls.load(Ordering::Relaxed), 1);
        assert_eq!(second.hits(), 1);
        assert_eq!(site.state(), CallSiteState::Resolved(DOG));
    }

    #[test]
    fn test_miss_replaces_the_entry() {
        let resolver = CountingResolver::new(Visibility::Public);
        let site = site(CallKind::Send);
        site.lookup(DOG, &resolver, None);
        let cat = site.lookup(CAT, &resolver, None);
        assert_eq!(cat.method().unwrap().serial, CAT.0);
        assert_eq!(site.state(), CallSiteState::Resolved(CAT));
        assert_eq!(site.resolutions(), 2);
    }

    #[test]
    fn test_not_found_records_a_reason() {
        let resolver = CountingResolver::new(Visibility::Public);
        let normal = site(CallKind::Send).lookup(ClassId::INTEGER, &resolver, None);
        assert_eq!(normal.method_missing(), MethodMissingReason::Normal);
        let vcall = site(CallKind::VCall).lookup(ClassId::INTEGER, &resolver, None);
        assert_eq!(vcall.method_missing(), MethodMissingReason::VCall);
        let sup = site(CallKind::Super).lookup(ClassId::INTEGER, &resolver, None);
        assert_eq!(sup.method_missing(), MethodMissingReason::Super);
    }

    #[test]
    fn test_private_methods_need_permission() {
        let resolver = CountingResolver::new(Visibility::Private);
        let denied = site(CallKind::Send).lookup(DOG, &resolver, None);
        assert_eq!(denied.method_missing(), MethodMissingReason::Private);
        assert!(denied.callable().is_none());

        let allowed = site(CallKind::Send)
            .with_private(true)
            .lookup(DOG, &resolver, None);
        assert_eq!(allowed.method_missing(), MethodMissingReason::None);
        assert!(allowed.callable().is_some());
    }

    #[test]
    fn test_flags_reach_the_resolver() {
        let resolver = CountingResolver::new(Visibility::Public);
        let owner = Some(ModuleId(7));
        site(CallKind::Super).lookup(DOG, &resolver, owner);
        let seen = resolver.seen.lock().unwrap();
        assert_eq!(
            seen[0],
            LookupFlags {
                allow_private: false,
                is_super: true,
                owner
            }
        );
    }

    #[test]
    fn test_concurrent_lookups_see_whole_entries() {
        let resolver = Arc::new(CountingResolver::new(Visibility::Public));
        let site = Arc::new(site(CallKind::Send));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let resolver = Arc::clone(&resolver);
                let site = Arc::clone(&site);
                std::thread::spawn(move || {
                    let class = if i % 2 == 0 { DOG } else { CAT };
                    for _ in 0..200 {
                        let cache = site.lookup(class, resolver.as_ref(), None);
                        assert_eq!(cache.receiver_class(), class);
                        assert_eq!(cache.method().unwrap().serial, class.0);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(matches!(site.state(), CallSiteState::Resolved(c) if c == DOG || c == CAT));
    }
}
