use crate::device::Device;
use crate::error::Result;
use crate::operation::{
    AddScalar, EWiseAdd, EWiseMul, EWiseSub, Matmul, MulScalar, OperatorHandle, Reshape, Summation,
};
use crate::runtime::Runtime;
use crate::tensor::Tensor;
use crate::type_trait::Type;

pub fn add<T: Type, D: Device>(
    rt: &Runtime<T, D>,
    lhs: &Tensor<T, D>,
    rhs: &Tensor<T, D>,
) -> Result<Tensor<T, D>> {
    rt.call(OperatorHandle::new(EWiseAdd), vec![lhs.clone(), rhs.clone()])
}

pub fn sub<T: Type, D: Device>(
    rt: &Runtime<T, D>,
    lhs: &Tensor<T, D>,
    rhs: &Tensor<T, D>,
) -> Result<Tensor<T, D>> {
    rt.call(OperatorHandle::new(EWiseSub), vec![lhs.clone(), rhs.clone()])
}

pub fn mul<T: Type, D: Device>(
    rt: &Runtime<T, D>,
    lhs: &Tensor<T, D>,
    rhs: &Tensor<T, D>,
) -> Result<Tensor<T, D>> {
    rt.call(OperatorHandle::new(EWiseMul), vec![lhs.clone(), rhs.clone()])
}

pub fn add_scalar<T: Type, D: Device>(
    rt: &Runtime<T, D>,
    lhs: &Tensor<T, D>,
    rhs: T,
) -> Result<Tensor<T, D>> {
    rt.call(OperatorHandle::new(AddScalar(rhs)), vec![lhs.clone()])
}

pub fn mul_scalar<T: Type, D: Device>(
    rt: &Runtime<T, D>,
    lhs: &Tensor<T, D>,
    rhs: T,
) -> Result<Tensor<T, D>> {
    rt.call(OperatorHandle::new(MulScalar(rhs)), vec![lhs.clone()])
}

/// Sums over `axes` (all axes when `None`). Reduced axes are kept with
/// length 1 when `keep_dims` is set.
pub fn sum<T: Type, D: Device>(
    rt: &Runtime<T, D>,
    tensor: &Tensor<T, D>,
    axes: Option<Vec<usize>>,
    keep_dims: bool,
) -> Result<Tensor<T, D>> {
    rt.call(
        OperatorHandle::new(Summation(axes, keep_dims)),
        vec![tensor.clone()],
    )
}

pub fn reshape<T: Type, D: Device>(
    rt: &Runtime<T, D>,
    tensor: &Tensor<T, D>,
    shape: &[usize],
) -> Result<Tensor<T, D>> {
    rt.call(
        OperatorHandle::new(Reshape(shape.to_vec())),
        vec![tensor.clone()],
    )
}

/// **Warning**: both operands must be 2-D.
pub fn matmul<T: Type, D: Device>(
    rt: &Runtime<T, D>,
    lhs: &Tensor<T, D>,
    rhs: &Tensor<T, D>,
) -> Result<Tensor<T, D>> {
    rt.call(OperatorHandle::new(Matmul), vec![lhs.clone(), rhs.clone()])
}
