use crate::device::{Device, DeviceHandle};
use crate::error::{LazyError, Result};
use crate::mode::in_lazy_mode;
use crate::operation::OperatorHandle;
use crate::runtime::Runtime;
use crate::tensor::Tensor;
use crate::type_trait::Type;

pub fn prepare_tensor_for_meta_kernel<T: Type, D: Device>(
    rt: &Runtime<T, D>,
    tensor: &Tensor<T, D>,
    lazy_device: &DeviceHandle,
) -> Result<Tensor<T, D>> {
    let device = tensor.device();
    if !in_lazy_mode() {
        if !device.kind.is_lazy() {
            return Err(LazyError::internal(format!(
                "eager tensor {:?} on {device} reached the lazy kernel outside lazy mode",
                tensor.id()
            )));
        }
        return Ok(tensor.clone());
    }

    if device.kind.is_lazy() {
        log::debug!("tensor {:?} is already on {device}", tensor.id());
        if device.has_index() {
            return Err(LazyError::internal(format!(
                "lazy tensor {:?} carries an index: {device}",
                tensor.id()
            )));
        }
        return Ok(tensor.clone());
    }

    log::warn!(
        "moving tensor {:?} from {device} to {lazy_device} for lazy execution",
        tensor.id()
    );
    let data = tensor
        .data()
        .ok_or(LazyError::Unmaterialized(tensor.id()))?;
    let backend = rt.registry().resolve_device(lazy_device)?;
    Ok(Tensor::device_data(data, *lazy_device, backend))
}

/// Shape inference over prepared operands. Nothing is computed.
pub fn run_meta_kernel<T: Type, D: Device>(
    op: &OperatorHandle<T, D>,
    prepared: &[Tensor<T, D>],
) -> Result<Vec<usize>> {
    if let Some(stray) = prepared.iter().find(|t| !t.device().kind.is_lazy()) {
        return Err(LazyError::internal(format!(
            "`{}` got operand {:?} on {} after preparation",
            op.name(),
            stray.id(),
            stray.device()
        )));
    }
    let shapes = prepared.iter().map(|t| t.shape()).collect::<Vec<_>>();
    op.infer_shape(&shapes)
}
