use crate::device::Device;
use crate::dispatch::Stack;
use crate::error::{LazyError, Result};
use crate::meta::{prepare_tensor_for_meta_kernel, run_meta_kernel};
use crate::operation::OperatorHandle;
use crate::runtime::Runtime;
use crate::tensor::Tensor;
use crate::type_trait::Type;

/// Runs `op` immediately on materialized operands.
pub(crate) fn eager_kernel<T: Type, D: Device>(
    _rt: &Runtime<T, D>,
    op: &OperatorHandle<T, D>,
    stack: &mut Stack<T, D>,
) -> Result<()> {
    let device = stack
        .first()
        .map(|t| t.device())
        .ok_or_else(|| LazyError::internal(format!("`{}` called without operands", op.name())))?;
    let mut args = Vec::with_capacity(stack.len());
    for tensor in stack.iter() {
        if tensor.is_deferred() {
            return Err(LazyError::internal(format!(
                "deferred tensor {:?} reached the eager kernel for `{}`",
                tensor.id(),
                op.name()
            )));
        }
        if tensor.device() != device {
            return Err(LazyError::DeviceMismatch(format!(
                "`{}` mixes {device} and {}",
                op.name(),
                tensor.device()
            )));
        }
        args.push(
            tensor
                .data()
                .ok_or(LazyError::Unmaterialized(tensor.id()))?,
        );
    }
    let shapes = args.iter().map(|a| a.shape()).collect::<Vec<_>>();
    op.infer_shape(&shapes)?;
    let out = op.compute(&args);
    *stack = vec![Tensor::from_ndarray(out, device)];
    Ok(())
}

/// Records `op` as a deferred node instead of running it.
pub(crate) fn lazy_kernel<T: Type, D: Device>(
    rt: &Runtime<T, D>,
    op: &OperatorHandle<T, D>,
    stack: &mut Stack<T, D>,
) -> Result<()> {
    let lazy_device = rt.config().lazy_device;
    let prepared = stack
        .iter()
        .map(|t| prepare_tensor_for_meta_kernel(rt, t, &lazy_device))
        .collect::<Result<Vec<_>>>()?;
    let shape = run_meta_kernel(op, &prepared)?;
    let backend = rt.registry().resolve_device(&lazy_device)?;
    let out = Tensor::deferred(op.clone(), prepared, shape, lazy_device, backend);
    rt.graph().register_tensor(&out);
    *stack = vec![out];
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LazyConfig;
    use crate::cpu::CPU;
    use crate::device::DeviceHandle;
    use crate::operation::{EWiseAdd, EWiseMul, Matmul};
    use crate::tensor::Origin;

    fn runtime() -> Runtime<f32, CPU> {
        Runtime::new(LazyConfig::default()).unwrap()
    }

    #[test]
    fn test_eager_kernel() {
        let rt = runtime();
        let a = Tensor::new1d([1., 2., 3.]);
        let b = Tensor::new1d([4., 5., 6.]);
        let mut stack = vec![a, b];
        eager_kernel(&rt, &OperatorHandle::new(EWiseMul), &mut stack).unwrap();
        assert_eq!(stack.len(), 1);
        assert!(stack[0] == Tensor::new1d([4., 10., 18.]));
        assert_eq!(stack[0].origin(), Origin::Materialized);
    }

    #[test]
    fn test_eager_kernel_checks_shapes() {
        let rt = runtime();
        let mut stack = vec![Tensor::ones(&[2, 3]), Tensor::ones(&[2, 3])];
        let err = eager_kernel(&rt, &OperatorHandle::new(Matmul), &mut stack).unwrap_err();
        assert!(matches!(err, LazyError::ShapeMismatch { op: "matmul", .. }));
    }

    #[test]
    fn test_eager_kernel_rejects_deferred() {
        let rt = runtime();
        let a = Tensor::<f32, CPU>::new1d([1., 2.]);
        rt.enter(&DeviceHandle::lazy());
        let x = rt.call(OperatorHandle::new(EWiseAdd), vec![a.clone(), a.clone()]).unwrap();
        rt.exit(&DeviceHandle::lazy()).unwrap();
        let mut stack = vec![x, a];
        let err = eager_kernel(&rt, &OperatorHandle::new(EWiseAdd), &mut stack).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_lazy_kernel() {
        let rt = runtime();
        let a = Tensor::new2d([[1., 2.], [3., 4.]]);
        let b = Tensor::new2d([[1., 0.], [0., 1.]]);
        rt.enter(&DeviceHandle::lazy());
        let mut stack = vec![a.clone(), b];
        lazy_kernel(&rt, &OperatorHandle::new(Matmul), &mut stack).unwrap();
        let out = stack.pop().unwrap();
        assert!(out.is_deferred());
        assert!(!out.resolved());
        assert_eq!(out.shape(), vec![2, 2]);
        assert_eq!(out.device(), DeviceHandle::lazy());
        assert!(out.inputs().iter().all(|t| t.is_deferred() && !t.is_same(&a)));
        rt.exit(&DeviceHandle::lazy()).unwrap();
        assert_eq!(out.underlying_data().unwrap(), vec![1., 2., 3., 4.]);
    }

    #[test]
    fn test_lazy_kernel_reports_shape_errors_early() {
        let rt = runtime();
        rt.enter(&DeviceHandle::lazy());
        let mut stack = vec![Tensor::ones(&[2]), Tensor::ones(&[3])];
        let err = lazy_kernel(&rt, &OperatorHandle::new(EWiseAdd), &mut stack).unwrap_err();
        rt.exit(&DeviceHandle::lazy()).unwrap();
        assert!(matches!(err, LazyError::ShapeMismatch { op: "add", .. }));
    }
}
