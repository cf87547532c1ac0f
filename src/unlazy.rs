use crate::device::Device;
use crate::dispatch::{DispatchKey, Dispatcher, ExcludeDispatchKeyGuard, Stack};
use crate::eager_fallback::eager_fallback;
use crate::error::Result;
use crate::mode::{in_lazy_mode, reserved_unlazy_key};
use crate::operation::OperatorHandle;
use crate::runtime::Runtime;
use crate::type_trait::Type;

/// Runs for any operator that touches a deferred tensor. Outside lazy mode the
/// operator runs eagerly with the reserved key masked off.
pub fn unlazy_handler<T: Type, D: Device>(
    rt: &Runtime<T, D>,
    op: &OperatorHandle<T, D>,
    stack: &mut Stack<T, D>,
) -> Result<()> {
    if in_lazy_mode() {
        log::debug!("`{}` stays lazy, redispatching", op.name());
        return rt
            .dispatcher()
            .redispatch(rt, op, DispatchKey::Lazy.into(), stack);
    }

    log::warn!(
        "`{}` touched a lazy tensor outside lazy mode, running it eagerly",
        op.name()
    );
    let _guard = ExcludeDispatchKeyGuard::new(reserved_unlazy_key());
    let kind = rt.registry().default_eager_fallback_device_kind();
    eager_fallback(rt, op, stack, kind)
}

pub fn install_unlazy_handler<T: Type, D: Device>(dispatcher: &Dispatcher<T, D>) {
    dispatcher.register_fallback(reserved_unlazy_key(), unlazy_handler::<T, D>);
}
