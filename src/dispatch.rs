use crate::device::Device;
use crate::error::{LazyError, Result};
use crate::operation::OperatorHandle;
use crate::runtime::Runtime;
use crate::tensor::Tensor;
use crate::type_trait::Type;
use std::cell::Cell;
use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

/// Routing tags, lowest priority first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DispatchKey {
    Cpu,
    Lazy,
    /// Reserved for reconciling deferred tensors that outlive lazy mode.
    Unlazy,
}

impl DispatchKey {
    pub const ALL: [DispatchKey; 3] = [DispatchKey::Cpu, DispatchKey::Lazy, DispatchKey::Unlazy];

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DispatchKeySet(u8);

impl DispatchKeySet {
    pub fn empty() -> Self {
        Self(0)
    }

    pub fn add(self, key: DispatchKey) -> Self {
        Self(self.0 | key.bit())
    }

    pub fn remove(self, key: DispatchKey) -> Self {
        Self(self.0 & !key.bit())
    }

    pub fn contains(self, key: DispatchKey) -> bool {
        self.0 & key.bit() != 0
    }

    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn highest(self) -> Option<DispatchKey> {
        self.iter().last()
    }

    /// Keys in ascending priority.
    pub fn iter(self) -> impl DoubleEndedIterator<Item = DispatchKey> {
        DispatchKey::ALL.into_iter().filter(move |&k| self.contains(k))
    }
}

impl From<DispatchKey> for DispatchKeySet {
    fn from(key: DispatchKey) -> Self {
        Self::empty().add(key)
    }
}

impl FromIterator<DispatchKey> for DispatchKeySet {
    fn from_iter<I: IntoIterator<Item = DispatchKey>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), |set, key| set.add(key))
    }
}

impl Debug for DispatchKeySet {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Per-thread adjustments applied on top of the operand keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalDispatchKeySet {
    pub included: DispatchKeySet,
    pub excluded: DispatchKeySet,
}

thread_local! {
    static LOCAL_KEYS: Cell<LocalDispatchKeySet> = Cell::new(LocalDispatchKeySet::default());
}

pub fn tls_local_dispatch_key_set() -> LocalDispatchKeySet {
    LOCAL_KEYS.with(|keys| keys.get())
}

pub fn tls_set_dispatch_key_included(key: DispatchKey, included: bool) {
    LOCAL_KEYS.with(|keys| {
        let mut local = keys.get();
        local.included = if included {
            local.included.add(key)
        } else {
            local.included.remove(key)
        };
        keys.set(local);
    });
}

pub fn tls_set_dispatch_key_excluded(key: DispatchKey, excluded: bool) {
    LOCAL_KEYS.with(|keys| {
        let mut local = keys.get();
        local.excluded = if excluded {
            local.excluded.add(key)
        } else {
            local.excluded.remove(key)
        };
        keys.set(local);
    });
}

pub fn tls_is_dispatch_key_included(key: DispatchKey) -> bool {
    tls_local_dispatch_key_set().included.contains(key)
}

pub fn tls_is_dispatch_key_excluded(key: DispatchKey) -> bool {
    tls_local_dispatch_key_set().excluded.contains(key)
}

/// Includes `key` for the current thread until dropped.
pub struct IncludeDispatchKeyGuard {
    key: DispatchKey,
    prev: bool,
    _not_send: PhantomData<*const ()>,
}

impl IncludeDispatchKeyGuard {
    pub fn new(key: DispatchKey) -> Self {
        let prev = tls_is_dispatch_key_included(key);
        tls_set_dispatch_key_included(key, true);
        Self {
            key,
            prev,
            _not_send: PhantomData,
        }
    }
}

impl Drop for IncludeDispatchKeyGuard {
    fn drop(&mut self) {
        tls_set_dispatch_key_included(self.key, self.prev);
    }
}

/// Excludes `key` for the current thread until dropped.
pub struct ExcludeDispatchKeyGuard {
    key: DispatchKey,
    prev: bool,
    _not_send: PhantomData<*const ()>,
}

impl ExcludeDispatchKeyGuard {
    pub fn new(key: DispatchKey) -> Self {
        let prev = tls_is_dispatch_key_excluded(key);
        tls_set_dispatch_key_excluded(key, true);
        Self {
            key,
            prev,
            _not_send: PhantomData,
        }
    }
}

impl Drop for ExcludeDispatchKeyGuard {
    fn drop(&mut self) {
        tls_set_dispatch_key_excluded(self.key, self.prev);
    }
}

pub type Stack<T, D> = Vec<Tensor<T, D>>;

pub type KernelFn<T, D> = Arc<
    dyn Fn(&Runtime<T, D>, &OperatorHandle<T, D>, &mut Stack<T, D>) -> Result<()> + Send + Sync,
>;

pub struct Dispatcher<T: Type, D: Device> {
    fallbacks: RwLock<HashMap<DispatchKey, KernelFn<T, D>>>,
    counts: [AtomicUsize; 3],
}

impl<T: Type, D: Device> Dispatcher<T, D> {
    pub fn new() -> Self {
        Self {
            fallbacks: RwLock::new(HashMap::new()),
            counts: Default::default(),
        }
    }

    /// Installs `kernel` as the boxed fallback for every operator routed to `key`.
    pub fn register_fallback(
        &self,
        key: DispatchKey,
        kernel: impl Fn(&Runtime<T, D>, &OperatorHandle<T, D>, &mut Stack<T, D>) -> Result<()>
            + Send
            + Sync
            + 'static,
    ) {
        let prev = self
            .fallbacks
            .write()
            .unwrap()
            .insert(key, Arc::new(kernel));
        if prev.is_some() {
            log::warn!("replacing fallback kernel for {key:?}");
        }
    }

    pub fn has_fallback(&self, key: DispatchKey) -> bool {
        self.fallbacks.read().unwrap().contains_key(&key)
    }

    /// How many times the kernel for `key` has been entered.
    pub fn dispatch_count(&self, key: DispatchKey) -> usize {
        self.counts[key as usize].load(Ordering::Relaxed)
    }

    pub fn compute_dispatch_key_set(stack: &Stack<T, D>) -> DispatchKeySet {
        let local = tls_local_dispatch_key_set();
        stack
            .iter()
            .fold(DispatchKeySet::empty(), |keys, t| keys.union(t.key_set()))
            .union(local.included)
            .difference(local.excluded)
    }

    pub fn call(
        &self,
        rt: &Runtime<T, D>,
        op: &OperatorHandle<T, D>,
        stack: &mut Stack<T, D>,
    ) -> Result<()> {
        let keys = Self::compute_dispatch_key_set(stack);
        self.dispatch(rt, op, keys, stack)
    }

    /// Runs `op` using only `keys`, ignoring operand and thread-local keys.
    pub fn redispatch(
        &self,
        rt: &Runtime<T, D>,
        op: &OperatorHandle<T, D>,
        keys: DispatchKeySet,
        stack: &mut Stack<T, D>,
    ) -> Result<()> {
        self.dispatch(rt, op, keys, stack)
    }

    fn dispatch(
        &self,
        rt: &Runtime<T, D>,
        op: &OperatorHandle<T, D>,
        keys: DispatchKeySet,
        stack: &mut Stack<T, D>,
    ) -> Result<()> {
        let (key, kernel) = {
            let fallbacks = self.fallbacks.read().unwrap();
            keys.iter()
                .rev()
                .find_map(|key| fallbacks.get(&key).map(|k| (key, k.clone())))
                .ok_or(LazyError::NoKernel {
                    op: op.name(),
                    keys,
                })?
        };
        log::trace!("dispatching `{}` with {keys:?} to {key:?}", op.name());
        self.counts[key as usize].fetch_add(1, Ordering::Relaxed);
        kernel(rt, op, stack)
    }
}

impl<T: Type, D: Device> Default for Dispatcher<T, D> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_key_set() {
        let keys = DispatchKeySet::from(DispatchKey::Cpu).add(DispatchKey::Unlazy);
        assert!(keys.contains(DispatchKey::Cpu));
        assert!(!keys.contains(DispatchKey::Lazy));
        assert_eq!(keys.highest(), Some(DispatchKey::Unlazy));
        assert_eq!(keys.remove(DispatchKey::Unlazy).highest(), Some(DispatchKey::Cpu));
        assert_eq!(DispatchKeySet::empty().highest(), None);
        let all: DispatchKeySet = DispatchKey::ALL.into_iter().collect();
        assert_eq!(all.difference(keys), DispatchKeySet::from(DispatchKey::Lazy));
        assert_eq!(format!("{keys:?}"), "{Cpu, Unlazy}");
    }

    #[test]
    fn test_guards_restore() {
        assert!(tls_local_dispatch_key_set().excluded.is_empty());
        {
            let _outer = ExcludeDispatchKeyGuard::new(DispatchKey::Unlazy);
            {
                let _inner = ExcludeDispatchKeyGuard::new(DispatchKey::Unlazy);
                assert!(tls_is_dispatch_key_excluded(DispatchKey::Unlazy));
            }
            assert!(tls_is_dispatch_key_excluded(DispatchKey::Unlazy));
        }
        assert!(!tls_is_dispatch_key_excluded(DispatchKey::Unlazy));

        {
            let _guard = IncludeDispatchKeyGuard::new(DispatchKey::Lazy);
            assert!(tls_is_dispatch_key_included(DispatchKey::Lazy));
        }
        assert!(!tls_is_dispatch_key_included(DispatchKey::Lazy));
    }

    #[test]
    fn test_thread_local_keys() {
        tls_set_dispatch_key_included(DispatchKey::Lazy, true);
        let other = thread::spawn(|| tls_is_dispatch_key_included(DispatchKey::Lazy))
            .join()
            .unwrap();
        assert!(!other);
        assert!(tls_is_dispatch_key_included(DispatchKey::Lazy));
        tls_set_dispatch_key_included(DispatchKey::Lazy, false);
    }
}
