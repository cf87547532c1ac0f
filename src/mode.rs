use crate::device::{Device, DeviceHandle};
use crate::dispatch::{tls_set_dispatch_key_included, DispatchKey};
use crate::error::{LazyError, Result};
use crate::runtime::Runtime;
use crate::type_trait::Type;
use std::cell::Cell;
use std::collections::HashSet;
use std::marker::PhantomData;

thread_local! {
    static NESTS: Cell<usize> = Cell::new(0);
}

/// Returns the depth before incrementing, so the outermost enter sees 0.
pub(crate) fn increment() -> usize {
    NESTS.with(|nests| {
        let prev = nests.get();
        nests.set(prev + 1);
        prev
    })
}

/// Returns the depth after decrementing, so the outermost exit sees 0.
pub(crate) fn decrement() -> Result<usize> {
    NESTS.with(|nests| {
        let depth = nests.get();
        if depth == 0 {
            return Err(LazyError::invalid_state(
                "Attempting to exit from a lazy mode without entering",
            ));
        }
        nests.set(depth - 1);
        Ok(depth - 1)
    })
}

/// Unmatched enters on the current thread.
pub fn nest_depth() -> usize {
    NESTS.with(|nests| nests.get())
}

pub fn in_lazy_mode() -> bool {
    nest_depth() > 0
}

/// The key every deferred tensor carries so eager use after mode exit is
/// intercepted.
pub fn reserved_unlazy_key() -> DispatchKey {
    DispatchKey::Unlazy
}

impl<T: Type, D: Device> Runtime<T, D> {
    pub fn enter(&self, device: &DeviceHandle) {
        if increment() == 0 {
            log::debug!("entering lazy mode on {device}");
            tls_set_dispatch_key_included(DispatchKey::Lazy, true);
        }
    }

    /// **Warning**: must pair with an earlier `enter` on the same thread.
    pub fn exit(&self, device: &DeviceHandle) -> Result<()> {
        if decrement()? != 0 {
            return Ok(());
        }
        log::debug!("leaving lazy mode on {device}");
        tls_set_dispatch_key_included(DispatchKey::Lazy, false);

        let backend = self.registry().resolve_device(device)?;
        let devices = HashSet::from([backend.to_string()]);
        self.graph()
            .sync_live_tensors_graph(&backend, &devices, self.config().sync_wait)
    }

    /// Enters lazy mode until the returned guard is dropped or finished.
    pub fn lazy_mode(&self, device: &DeviceHandle) -> LazyModeGuard<'_, T, D> {
        self.enter(device);
        LazyModeGuard {
            rt: self,
            device: *device,
            active: true,
            _not_send: PhantomData,
        }
    }

    /// Runs `f` in lazy mode. The scope is exited on every path; an error from
    /// `f` takes precedence over one from the exit.
    pub fn lazy_scope<R>(&self, device: &DeviceHandle, f: impl FnOnce() -> Result<R>) -> Result<R> {
        let guard = self.lazy_mode(device);
        let result = f();
        let exited = guard.finish();
        let value = result?;
        exited?;
        Ok(value)
    }
}

pub struct LazyModeGuard<'a, T: Type, D: Device> {
    rt: &'a Runtime<T, D>,
    device: DeviceHandle,
    active: bool,
    _not_send: PhantomData<*const ()>,
}

impl<'a, T: Type, D: Device> LazyModeGuard<'a, T, D> {
    /// Exits now and reports the synchronization result.
    pub fn finish(mut self) -> Result<()> {
        self.active = false;
        self.rt.exit(&self.device)
    }
}

impl<'a, T: Type, D: Device> Drop for LazyModeGuard<'a, T, D> {
    fn drop(&mut self) {
        if self.active {
            if let Err(err) = self.rt.exit(&self.device) {
                log::error!("failed to exit lazy mode on {}: {err}", self.device);
            }
        }
    }
}
