use crate::device::{Device, DeviceHandle, DeviceKind};
use crate::dispatch::Stack;
use crate::error::{LazyError, Result};
use crate::operation::OperatorHandle;
use crate::runtime::Runtime;
use crate::tensor::Tensor;
use crate::type_trait::Type;

/// Runs `op` on an eager device of `kind`, converting deferred operands to
/// materialized ones first and leaving the eager results on `stack`.
///
/// Pending operands are synchronized through the graph engine before their
/// data is read.
pub fn eager_fallback<T: Type, D: Device>(
    rt: &Runtime<T, D>,
    op: &OperatorHandle<T, D>,
    stack: &mut Stack<T, D>,
    kind: DeviceKind,
) -> Result<()> {
    if kind.is_lazy() {
        return Err(LazyError::internal(format!(
            "eager fallback for `{}` targeted the lazy device",
            op.name()
        )));
    }

    let pending = stack
        .iter()
        .filter(|t| t.is_deferred() && !t.resolved())
        .cloned()
        .collect::<Vec<_>>();
    if !pending.is_empty() {
        log::debug!(
            "syncing {} pending operands of `{}` before eager fallback",
            pending.len(),
            op.name()
        );
        rt.graph().sync_tensors_graph(&pending, true)?;
    }

    let device = DeviceHandle::new(kind, None);
    let mut eager_stack = stack
        .iter()
        .map(|t| {
            if !t.is_deferred() {
                return Ok(t.clone());
            }
            let data = t.data().ok_or(LazyError::Unmaterialized(t.id()))?;
            Ok(Tensor::from_ndarray(data, device))
        })
        .collect::<Result<Stack<T, D>>>()?;

    log::trace!("running `{}` eagerly on {device}", op.name());
    rt.dispatcher().call(rt, op, &mut eager_stack)?;
    *stack = eager_stack;
    Ok(())
}
