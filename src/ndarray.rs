use crate::device::Device;
use crate::type_trait::Type;
use std::ops::{Add, Mul, Sub};
use std::sync::Arc;

pub struct Idx {
    pub(crate) idx: Vec<usize>,
    pub(crate) shape: Vec<usize>,
}

/// Strided storage owned by an eager backend. Cloning shares the buffer.
#[derive(Clone)]
pub struct NDArray<T: Type, D: Device>(pub(crate) Arc<_NDArray<T, D>>);

#[derive(Clone)]
pub(crate) struct _NDArray<T: Type, D: Device> {
    pub data: Arc<Vec<T>>,
    pub shape: Vec<usize>,
    pub strides: Vec<usize>,
    pub offset: usize,
    pub device: D,
}

impl<T: Type, D: Device> NDArray<T, D> {
    pub(crate) fn make(
        data: Vec<T>,
        shape: Vec<usize>,
        strides: Vec<usize>,
        offset: usize,
        device: D,
    ) -> Self {
        NDArray(Arc::new(_NDArray {
            data: Arc::new(data),
            shape,
            strides,
            offset,
            device,
        }))
    }

    pub fn shape(&self) -> Vec<usize> {
        self.0.shape.to_vec()
    }

    pub fn ndim(&self) -> usize {
        self.0.shape.len()
    }

    pub fn len(&self) -> usize {
        self.0.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether both arrays view the same underlying buffer.
    pub fn shares_storage(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0.data, &other.0.data)
    }

    /// Permute the axes of the `NDArray`.
    /// **Warning**: `axes` must be a permutation of `0..self.ndim()`.
    pub fn permute(&self, axes: &[usize]) -> Self {
        let mut shape = vec![0; axes.len()];
        let mut strides = vec![0; axes.len()];
        for (i, &axis) in axes.iter().enumerate() {
            shape[i] = self.0.shape[axis];
            strides[i] = self.0.strides[axis];
        }
        let mut ret = self.clone();
        Arc::make_mut(&mut ret.0).shape = shape;
        Arc::make_mut(&mut ret.0).strides = strides;
        ret
    }

    fn reduce_axes(&self, axes: &[usize], keep_dims: bool) -> (NDArray<T, D>, Vec<usize>) {
        let mut permutation = vec![];
        let mut shape = vec![];
        for i in 0..self.ndim() {
            if !axes.contains(&i) {
                permutation.push(i);
                shape.push(self.0.shape[i]);
            } else if keep_dims {
                shape.push(1);
            }
        }
        if shape.is_empty() {
            shape.push(1);
        }
        permutation.append(&mut axes.to_vec());
        let perm = self.permute(&permutation);
        (perm, shape)
    }

    pub fn sum(&self, axis: Option<Vec<usize>>, keep_dims: bool) -> Self {
        let axis = axis.unwrap_or((0..self.ndim()).collect::<Vec<_>>());
        let (perm, shape) = self.reduce_axes(&axis, keep_dims);
        self.0.device.sum(&perm, shape, self.ndim() - axis.len())
    }

    pub fn reshape(&self, shape: &[usize]) -> Self {
        let mut ret = if self.is_contiguous() {
            self.clone()
        } else {
            self.contiguous()
        };
        let strides = compact_strides(shape);
        Arc::make_mut(&mut ret.0).shape = shape.to_vec();
        Arc::make_mut(&mut ret.0).strides = strides;
        ret
    }

    pub fn matmul(&self, rhs: &Self) -> Self {
        self.0.device.matmul(self, rhs)
    }

    pub fn add_scalar(&self, rhs: T) -> Self {
        self.0.device.add_scalar(self, rhs)
    }

    pub fn mul_scalar(&self, rhs: T) -> Self {
        self.0.device.mul_scalar(self, rhs)
    }

    pub fn to_vec(&self) -> Vec<T> {
        D::data(self)
    }

    pub(crate) fn is_contiguous(&self) -> bool {
        self.0.strides == compact_strides(&self.0.shape)
    }

    pub(crate) fn contiguous(&self) -> Self {
        self.0.device.contiguous(self)
    }
}

impl<T: Type, D: Device> Add for &NDArray<T, D> {
    type Output = NDArray<T, D>;

    fn add(self, rhs: Self) -> Self::Output {
        self.0.device.add(self, rhs)
    }
}

impl<T: Type, D: Device> Sub for &NDArray<T, D> {
    type Output = NDArray<T, D>;

    fn sub(self, rhs: Self) -> Self::Output {
        self.0.device.sub(self, rhs)
    }
}

impl<T: Type, D: Device> Mul for &NDArray<T, D> {
    type Output = NDArray<T, D>;

    fn mul(self, rhs: Self) -> Self::Output {
        self.0.device.mul(self, rhs)
    }
}

impl<T: Type, D: Device> PartialEq for NDArray<T, D> {
    fn eq(&self, other: &Self) -> bool {
        self.0.shape == other.0.shape && self.0.device.eq(self, other)
    }
}

pub(crate) fn compact_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = Vec::with_capacity(shape.len());
    let mut stride = 1;
    for &dim in shape.iter().rev() {
        strides.push(stride);
        stride *= dim;
    }
    strides.reverse();
    strides
}

impl Idx {
    pub fn new(shape: &[usize]) -> Self {
        Self {
            idx: vec![0; shape.len()],
            shape: shape.to_vec(),
        }
    }

    pub fn next(&mut self) -> bool {
        for (i, &dim) in self.shape.iter().enumerate().rev() {
            self.idx[i] += 1;
            if self.idx[i] == dim {
                self.idx[i] = 0;
            } else {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::CPU;

    #[test]
    fn test_strides() {
        assert_eq!(compact_strides(&[2, 3, 4]), vec![12, 4, 1]);
        assert_eq!(compact_strides(&[5]), vec![1]);
    }

    #[test]
    fn test_permute_and_reshape() {
        let a = CPU::new(vec![1, 2, 3, 4, 5, 6], &[2, 3]);
        let t = a.permute(&[1, 0]);
        assert_eq!(t.shape(), vec![3, 2]);
        assert!(!t.is_contiguous());
        assert_eq!(t.reshape(&[6]).to_vec(), vec![1, 4, 2, 5, 3, 6]);
        assert!(a.reshape(&[3, 2]).shares_storage(&a));
    }

    #[test]
    fn test_sum() {
        let a = CPU::new(vec![1., 2., 3., 4., 5., 6.], &[2, 3]);
        assert!(a.sum(None, false) == CPU::new(vec![21.], &[1]));
        assert!(a.sum(Some(vec![0]), false) == CPU::new(vec![5., 7., 9.], &[3]));
        assert!(a.sum(Some(vec![1]), true) == CPU::new(vec![6., 15.], &[2, 1]));
    }

    #[test]
    fn test_idx() {
        let mut idx = Idx::new(&[2, 2]);
        let mut seen = vec![idx.idx.clone()];
        while idx.next() {
            seen.push(idx.idx.clone());
        }
        assert_eq!(seen, vec![vec![0, 0], vec![0, 1], vec![1, 0], vec![1, 1]]);
    }
}
