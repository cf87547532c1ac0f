use crate::device::{Device, DeviceKind};
use crate::ndarray::{self, Idx, NDArray};
use crate::tensor::Tensor;
use crate::type_trait::Type;
use rand::distributions::{Distribution, Uniform};
use std::fmt::{self, Display, Formatter};
use std::ops::Index;

#[derive(Clone)]
pub struct CPU;

impl CPU {
    fn scalar_op<T: Type>(
        &self,
        lhs: &NDArray<T, Self>,
        rhs: T,
        op: impl Fn(T, T) -> T,
    ) -> NDArray<T, Self> {
        if !lhs.is_contiguous() {
            return self.scalar_op(&lhs.contiguous(), rhs, op);
        }
        let len = lhs.len();
        let data = lhs.0.data[lhs.0.offset..lhs.0.offset + len]
            .iter()
            .map(|&x| op(x, rhs))
            .collect::<Vec<_>>();
        NDArray::make(
            data,
            lhs.0.shape.clone(),
            lhs.0.strides.clone(),
            0,
            Self,
        )
    }

    fn ewise_op<T: Type>(
        &self,
        lhs: &NDArray<T, Self>,
        rhs: &NDArray<T, Self>,
        op: impl Fn(T, T) -> T,
    ) -> NDArray<T, Self> {
        if !lhs.is_contiguous() {
            return self.ewise_op(&lhs.contiguous(), rhs, op);
        }
        if !rhs.is_contiguous() {
            return self.ewise_op(lhs, &rhs.contiguous(), op);
        }
        let len = lhs.len();
        let data = lhs.0.data[lhs.0.offset..lhs.0.offset + len]
            .iter()
            .zip(&rhs.0.data[rhs.0.offset..rhs.0.offset + len])
            .map(|(&x, &y)| op(x, y))
            .collect::<Vec<_>>();
        NDArray::make(
            data,
            lhs.0.shape.clone(),
            lhs.0.strides.clone(),
            0,
            Self,
        )
    }

    fn reduce_op<T: Type>(
        &self,
        lhs: &NDArray<T, Self>,
        shape: Vec<usize>,
        reduce_dims: usize,
        init: T,
        op: impl Fn(T, T) -> T,
    ) -> NDArray<T, Self> {
        let strides = ndarray::compact_strides(&shape);
        let len = shape.iter().product::<usize>();
        let mut idx = Idx::new(&lhs.0.shape);
        let reduce_lens = idx.shape[reduce_dims..lhs.ndim()].iter().product::<usize>();
        let data = (0..len)
            .map(|_| {
                let mut acc = init;
                for _ in 0..reduce_lens {
                    acc = op(acc, lhs[&idx]);
                    idx.next();
                }
                acc
            })
            .collect::<Vec<_>>();
        NDArray::make(data, shape, strides, 0, Self)
    }

    fn filled<T: Type>(shape: &[usize], value: T) -> NDArray<T, Self> {
        let strides = ndarray::compact_strides(shape);
        NDArray::make(
            vec![value; shape.iter().product()],
            shape.to_vec(),
            strides,
            0,
            Self,
        )
    }
}

impl Device for CPU {
    fn kind() -> DeviceKind {
        DeviceKind::Cpu
    }

    fn new<T: Type>(data: Vec<T>, shape: &[usize]) -> NDArray<T, Self> {
        let strides = ndarray::compact_strides(shape);
        NDArray::make(data, shape.to_vec(), strides, 0, Self)
    }

    fn ones<T: Type>(shape: &[usize]) -> NDArray<T, Self> {
        Self::filled(shape, T::one())
    }

    fn zeros<T: Type>(shape: &[usize]) -> NDArray<T, Self> {
        Self::filled(shape, T::zero())
    }

    fn rand<T: Type>(shape: &[usize], low: T, high: T) -> NDArray<T, Self> {
        let strides = ndarray::compact_strides(shape);
        let len = shape.iter().product::<usize>();
        let mut rng = rand::thread_rng();
        let uniform = Uniform::new(low, high);
        let data = (0..len).map(|_| uniform.sample(&mut rng)).collect();
        NDArray::make(data, shape.to_vec(), strides, 0, Self)
    }

    fn add<T: Type>(&self, lhs: &NDArray<T, Self>, rhs: &NDArray<T, Self>) -> NDArray<T, Self> {
        self.ewise_op(lhs, rhs, |x, y| x + y)
    }

    fn sub<T: Type>(&self, lhs: &NDArray<T, Self>, rhs: &NDArray<T, Self>) -> NDArray<T, Self> {
        self.ewise_op(lhs, rhs, |x, y| x - y)
    }

    fn mul<T: Type>(&self, lhs: &NDArray<T, Self>, rhs: &NDArray<T, Self>) -> NDArray<T, Self> {
        self.ewise_op(lhs, rhs, |x, y| x * y)
    }

    fn add_scalar<T: Type>(&self, lhs: &NDArray<T, Self>, rhs: T) -> NDArray<T, Self> {
        self.scalar_op(lhs, rhs, |x, y| x + y)
    }

    fn mul_scalar<T: Type>(&self, lhs: &NDArray<T, Self>, rhs: T) -> NDArray<T, Self> {
        self.scalar_op(lhs, rhs, |x, y| x * y)
    }

    fn eq<T: Type>(&self, lhs: &NDArray<T, Self>, rhs: &NDArray<T, Self>) -> bool {
        if !lhs.is_contiguous() {
            return self.eq(&lhs.contiguous(), rhs);
        }
        if !rhs.is_contiguous() {
            return self.eq(lhs, &rhs.contiguous());
        }
        let len = lhs.len();
        lhs.0.data[lhs.0.offset..lhs.0.offset + len]
            .iter()
            .zip(&rhs.0.data[rhs.0.offset..rhs.0.offset + len])
            .all(|(&x, &y)| {
                let diff = if x > y { x - y } else { y - x };
                diff <= T::atol()
            })
    }

    fn matmul<T: Type>(&self, lhs: &NDArray<T, Self>, rhs: &NDArray<T, Self>) -> NDArray<T, Self> {
        let (m, k, n) = (lhs.0.shape[0], lhs.0.shape[1], rhs.0.shape[1]);
        let shape = vec![m, n];
        let strides = ndarray::compact_strides(&shape);
        let mut data = vec![T::zero(); m * n];
        let mut lhs_idx = Idx::new(&lhs.0.shape);
        for i in 0..m {
            for p in 0..k {
                let a = lhs[&lhs_idx];
                lhs_idx.next();
                let mut rhs_idx = Idx {
                    idx: vec![p, 0],
                    shape: rhs.0.shape.clone(),
                };
                for j in 0..n {
                    data[i * n + j] += a * rhs[&rhs_idx];
                    rhs_idx.next();
                }
            }
        }
        NDArray::make(data, shape, strides, 0, Self)
    }

    fn sum<T: Type>(
        &self,
        lhs: &NDArray<T, Self>,
        shape: Vec<usize>,
        reduce_dims: usize,
    ) -> NDArray<T, Self> {
        self.reduce_op(lhs, shape, reduce_dims, T::zero(), |x, y| x + y)
    }

    fn contiguous<T: Type>(&self, lhs: &NDArray<T, Self>) -> NDArray<T, Self> {
        let shape = lhs.0.shape.clone();
        let strides = ndarray::compact_strides(&shape);
        let mut idx = Idx::new(&shape);
        let mut data = Vec::with_capacity(lhs.len());
        if lhs.len() > 0 {
            loop {
                data.push(lhs[&idx]);
                if !idx.next() {
                    break;
                }
            }
        }
        NDArray::make(data, shape, strides, 0, Self)
    }

    fn data<T: Type>(lhs: &NDArray<T, Self>) -> Vec<T> {
        if lhs.is_contiguous() {
            lhs.0.data[lhs.0.offset..lhs.0.offset + lhs.len()].to_vec()
        } else {
            Self::data(&lhs.contiguous())
        }
    }
}

impl<T: Type> Index<&Idx> for NDArray<T, CPU> {
    type Output = T;

    fn index(&self, index: &Idx) -> &Self::Output {
        &self.0.data[index
            .idx
            .iter()
            .zip(&self.0.strides)
            .fold(self.0.offset, |acc, (idx, dim)| acc + idx * dim)]
    }
}

impl<T: Type> Display for Tensor<T, CPU> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.device())?;
        match self.data() {
            Some(data) => write!(f, "{:?}, shape={:?}", data.to_vec(), data.shape())?,
            None => write!(f, "<pending>, shape={:?}", self.shape())?,
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ewise() {
        let a = CPU::new(vec![1., 2., 3.], &[3]);
        let b = CPU::new(vec![4., 5., 6.], &[3]);
        assert!(&a + &b == CPU::new(vec![5., 7., 9.], &[3]));
        assert!(&a - &b == CPU::new(vec![-3., -3., -3.], &[3]));
        assert!(&a * &b == CPU::new(vec![4., 10., 18.], &[3]));
        assert!(a.add_scalar(1.) == CPU::new(vec![2., 3., 4.], &[3]));
        assert!(a.mul_scalar(2.) == CPU::new(vec![2., 4., 6.], &[3]));
    }

    #[test]
    fn test_transposed_operand() {
        let a = CPU::new(vec![1, 2, 3, 4, 5, 6], &[2, 3]).permute(&[1, 0]);
        let b = CPU::ones::<i32>(&[3, 2]);
        assert_eq!((&a + &b).to_vec(), vec![2, 5, 3, 6, 4, 7]);
    }

    #[test]
    fn test_matmul() {
        let a = CPU::new(vec![1., 2., 3., 4., 5., 6.], &[2, 3]);
        let b = CPU::new(vec![1., 0., 0., 1., 1., 1.], &[3, 2]);
        assert!(a.matmul(&b) == CPU::new(vec![4., 5., 10., 11.], &[2, 2]));
    }

    #[test]
    fn test_rand() {
        let a = CPU::rand(&[4, 4], -1.0f32, 1.0);
        assert_eq!(a.shape(), vec![4, 4]);
        assert!(a.to_vec().iter().all(|&x| (-1.0..1.0).contains(&x)));
    }
}
