use crate::device::Device;
use crate::error::{LazyError, Result};
use crate::ndarray::NDArray;
use crate::type_trait::Type;
use std::sync::Arc;

/// An operator with an eager kernel (`compute`) and a meta kernel
/// (`infer_shape`). Scalar parameters live in the operator itself, so the
/// argument stack only ever holds tensors.
pub trait Operation<T: Type, D: Device>: Send + Sync {
    fn name(&self) -> &'static str;

    fn infer_shape(&self, shapes: &[Vec<usize>]) -> Result<Vec<usize>>;

    /// **Warning**: callers must validate shapes with `infer_shape` first.
    fn compute(&self, args: &[NDArray<T, D>]) -> NDArray<T, D>;
}

#[derive(Clone)]
pub struct OperatorHandle<T: Type, D: Device>(Arc<dyn Operation<T, D>>);

impl<T: Type, D: Device> OperatorHandle<T, D> {
    pub fn new(op: impl Operation<T, D> + 'static) -> Self {
        Self(Arc::new(op))
    }

    pub fn name(&self) -> &'static str {
        self.0.name()
    }

    pub fn infer_shape(&self, shapes: &[Vec<usize>]) -> Result<Vec<usize>> {
        self.0.infer_shape(shapes)
    }

    pub fn compute(&self, args: &[NDArray<T, D>]) -> NDArray<T, D> {
        self.0.compute(args)
    }
}

pub struct EWiseAdd;

pub struct EWiseSub;

pub struct EWiseMul;

pub struct AddScalar<T: Type>(pub T);

pub struct MulScalar<T: Type>(pub T);

pub struct Summation(pub Option<Vec<usize>>, pub bool);

pub struct Reshape(pub Vec<usize>);

pub struct Matmul;

fn arity(op: &'static str, shapes: &[Vec<usize>], n: usize) -> Result<()> {
    if shapes.len() != n {
        return Err(LazyError::shape(
            op,
            format!("expected {n} operands, got {}", shapes.len()),
        ));
    }
    Ok(())
}

fn same_shape(op: &'static str, shapes: &[Vec<usize>]) -> Result<Vec<usize>> {
    arity(op, shapes, 2)?;
    if shapes[0] != shapes[1] {
        return Err(LazyError::shape(
            op,
            format!("{:?} vs {:?}", shapes[0], shapes[1]),
        ));
    }
    Ok(shapes[0].clone())
}

impl<T: Type, D: Device> Operation<T, D> for EWiseAdd {
    fn name(&self) -> &'static str {
        "add"
    }

    fn infer_shape(&self, shapes: &[Vec<usize>]) -> Result<Vec<usize>> {
        same_shape("add", shapes)
    }

    fn compute(&self, args: &[NDArray<T, D>]) -> NDArray<T, D> {
        &args[0] + &args[1]
    }
}

impl<T: Type, D: Device> Operation<T, D> for EWiseSub {
    fn name(&self) -> &'static str {
        "sub"
    }

    fn infer_shape(&self, shapes: &[Vec<usize>]) -> Result<Vec<usize>> {
        same_shape("sub", shapes)
    }

    fn compute(&self, args: &[NDArray<T, D>]) -> NDArray<T, D> {
        &args[0] - &args[1]
    }
}

impl<T: Type, D: Device> Operation<T, D> for EWiseMul {
    fn name(&self) -> &'static str {
        "mul"
    }

    fn infer_shape(&self, shapes: &[Vec<usize>]) -> Result<Vec<usize>> {
        same_shape("mul", shapes)
    }

    fn compute(&self, args: &[NDArray<T, D>]) -> NDArray<T, D> {
        &args[0] * &args[1]
    }
}

impl<T: Type, D: Device> Operation<T, D> for AddScalar<T> {
    fn name(&self) -> &'static str {
        "add_scalar"
    }

    fn infer_shape(&self, shapes: &[Vec<usize>]) -> Result<Vec<usize>> {
        arity("add_scalar", shapes, 1)?;
        Ok(shapes[0].clone())
    }

    fn compute(&self, args: &[NDArray<T, D>]) -> NDArray<T, D> {
        args[0].add_scalar(self.0)
    }
}

impl<T: Type, D: Device> Operation<T, D> for MulScalar<T> {
    fn name(&self) -> &'static str {
        "mul_scalar"
    }

    fn infer_shape(&self, shapes: &[Vec<usize>]) -> Result<Vec<usize>> {
        arity("mul_scalar", shapes, 1)?;
        Ok(shapes[0].clone())
    }

    fn compute(&self, args: &[NDArray<T, D>]) -> NDArray<T, D> {
        args[0].mul_scalar(self.0)
    }
}

impl<T: Type, D: Device> Operation<T, D> for Summation {
    fn name(&self) -> &'static str {
        "sum"
    }

    fn infer_shape(&self, shapes: &[Vec<usize>]) -> Result<Vec<usize>> {
        arity("sum", shapes, 1)?;
        let input = &shapes[0];
        let axes = self.0.clone().unwrap_or((0..input.len()).collect());
        if let Some(&axis) = axes.iter().find(|&&axis| axis >= input.len()) {
            return Err(LazyError::shape(
                "sum",
                format!("axis {axis} out of range for {input:?}"),
            ));
        }
        let mut unique = axes.clone();
        unique.sort_unstable();
        unique.dedup();
        if unique.len() != axes.len() {
            return Err(LazyError::shape("sum", format!("duplicate axes {axes:?}")));
        }
        let mut shape = vec![];
        for (i, &dim) in input.iter().enumerate() {
            if !axes.contains(&i) {
                shape.push(dim);
            } else if self.1 {
                shape.push(1);
            }
        }
        if shape.is_empty() {
            shape.push(1);
        }
        Ok(shape)
    }

    fn compute(&self, args: &[NDArray<T, D>]) -> NDArray<T, D> {
        args[0].sum(self.0.clone(), self.1)
    }
}

impl<T: Type, D: Device> Operation<T, D> for Reshape {
    fn name(&self) -> &'static str {
        "reshape"
    }

    fn infer_shape(&self, shapes: &[Vec<usize>]) -> Result<Vec<usize>> {
        arity("reshape", shapes, 1)?;
        let from = shapes[0].iter().product::<usize>();
        let to = self.0.iter().product::<usize>();
        if from != to {
            return Err(LazyError::shape(
                "reshape",
                format!("cannot view {:?} as {:?}", shapes[0], self.0),
            ));
        }
        Ok(self.0.clone())
    }

    fn compute(&self, args: &[NDArray<T, D>]) -> NDArray<T, D> {
        args[0].reshape(&self.0)
    }
}

impl<T: Type, D: Device> Operation<T, D> for Matmul {
    fn name(&self) -> &'static str {
        "matmul"
    }

    fn infer_shape(&self, shapes: &[Vec<usize>]) -> Result<Vec<usize>> {
        arity("matmul", shapes, 2)?;
        let (lhs, rhs) = (&shapes[0], &shapes[1]);
        if lhs.len() != 2 || rhs.len() != 2 || lhs[1] != rhs[0] {
            return Err(LazyError::shape(
                "matmul",
                format!("{lhs:?} @ {rhs:?}"),
            ));
        }
        Ok(vec![lhs[0], rhs[1]])
    }

    fn compute(&self, args: &[NDArray<T, D>]) -> NDArray<T, D> {
        args[0].matmul(&args[1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::CPU;

    fn infer(op: impl Operation<f32, CPU> + 'static, shapes: &[Vec<usize>]) -> Result<Vec<usize>> {
        OperatorHandle::new(op).infer_shape(shapes)
    }

    #[test]
    fn test_infer_shape() {
        assert_eq!(infer(EWiseAdd, &[vec![2, 3], vec![2, 3]]).unwrap(), vec![2, 3]);
        assert!(infer(EWiseMul, &[vec![2, 3], vec![3, 2]]).is_err());
        assert!(infer(EWiseSub, &[vec![2]]).is_err());
        assert_eq!(infer(Summation(None, false), &[vec![2, 3]]).unwrap(), vec![1]);
        assert_eq!(
            infer(Summation(Some(vec![1]), true), &[vec![2, 3]]).unwrap(),
            vec![2, 1]
        );
        assert!(infer(Summation(Some(vec![2]), false), &[vec![2, 3]]).is_err());
        assert!(infer(Summation(Some(vec![0, 0]), false), &[vec![2]]).is_err());
        assert!(infer(Summation(Some(vec![1, 0, 1]), true), &[vec![2, 3]]).is_err());
        assert_eq!(infer(Reshape(vec![3, 2]), &[vec![2, 3]]).unwrap(), vec![3, 2]);
        assert!(infer(Reshape(vec![4]), &[vec![2, 3]]).is_err());
        assert_eq!(infer(Matmul, &[vec![2, 3], vec![3, 4]]).unwrap(), vec![2, 4]);
        assert!(infer(Matmul, &[vec![2, 3], vec![2, 3]]).is_err());
    }

    #[test]
    fn test_names() {
        let op = OperatorHandle::<f32, CPU>::new(MulScalar(2.0));
        assert_eq!(op.name(), "mul_scalar");
        let out = op.compute(&[CPU::new(vec![1.0, 2.0], &[2])]);
        assert_eq!(out.to_vec(), vec![2.0, 4.0]);
    }
}
