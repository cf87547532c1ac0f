use crate::device::{BackendDevice, Device, DeviceHandle, DeviceKind};
use crate::dispatch::{DispatchKey, DispatchKeySet};
use crate::error::{LazyError, Result};
use crate::ndarray::NDArray;
use crate::operation::OperatorHandle;
use crate::type_trait::Type;
use std::fmt::{self, Debug, Formatter};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TensorId(usize);

/// Fixed at construction. Graph synchronization only fills in the data of a
/// deferred tensor; it never turns it into a materialized one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Materialized,
    Deferred,
}

pub(crate) struct Value<T: Type, D: Device> {
    cached_data: Option<NDArray<T, D>>,
    pub inputs: Vec<Tensor<T, D>>,
    op: Option<OperatorHandle<T, D>>,
    shape: Vec<usize>,
    device: DeviceHandle,
    origin: Origin,
    backend: Option<BackendDevice>,
}

#[derive(Clone)]
pub struct Tensor<T: Type, D: Device>(pub(crate) Arc<RwLock<Value<T, D>>>, TensorId);

pub(crate) struct WeakTensor<T: Type, D: Device>(Weak<RwLock<Value<T, D>>>, TensorId);

impl<T: Type, D: Device> Tensor<T, D> {
    pub fn new_with_shape(data: &[T], shape: &[usize]) -> Self {
        Self::from_ndarray(D::new(data.to_vec(), shape), Self::eager_device())
    }

    pub fn new1d<const N: usize>(data: [T; N]) -> Self {
        Self::new_with_shape(&data, &[N])
    }

    pub fn new2d<const R: usize, const C: usize>(data: [[T; C]; R]) -> Self {
        let flat = data.iter().flatten().copied().collect::<Vec<_>>();
        Self::new_with_shape(&flat, &[R, C])
    }

    pub fn ones(shape: &[usize]) -> Self {
        Self::from_ndarray(D::ones(shape), Self::eager_device())
    }

    pub fn zeros(shape: &[usize]) -> Self {
        Self::from_ndarray(D::zeros(shape), Self::eager_device())
    }

    pub fn rand(shape: &[usize], low: T, high: T) -> Self {
        Self::from_ndarray(D::rand(shape, low, high), Self::eager_device())
    }

    /// A materialized tensor located on `device`.
    /// **Warning**: `device` must be an eager device.
    pub fn from_ndarray(data: NDArray<T, D>, device: DeviceHandle) -> Self {
        debug_assert!(!device.kind.is_lazy());
        let shape = data.shape();
        Self::make(
            Some(data),
            vec![],
            None,
            shape,
            device,
            Origin::Materialized,
            None,
        )
    }

    /// A deferred leaf that already holds data, used to move eager operands
    /// into the lazy domain. The storage is shared, not copied.
    pub(crate) fn device_data(
        data: NDArray<T, D>,
        device: DeviceHandle,
        backend: BackendDevice,
    ) -> Self {
        let shape = data.shape();
        Self::make(
            Some(data),
            vec![],
            None,
            shape,
            device,
            Origin::Deferred,
            Some(backend),
        )
    }

    /// A deferred IR node whose data appears after graph synchronization.
    pub(crate) fn deferred(
        op: OperatorHandle<T, D>,
        inputs: Vec<Tensor<T, D>>,
        shape: Vec<usize>,
        device: DeviceHandle,
        backend: BackendDevice,
    ) -> Self {
        Self::make(
            None,
            inputs,
            Some(op),
            shape,
            device,
            Origin::Deferred,
            Some(backend),
        )
    }

    fn make(
        cached_data: Option<NDArray<T, D>>,
        inputs: Vec<Tensor<T, D>>,
        op: Option<OperatorHandle<T, D>>,
        shape: Vec<usize>,
        device: DeviceHandle,
        origin: Origin,
        backend: Option<BackendDevice>,
    ) -> Self {
        Self(
            Arc::new(RwLock::new(Value {
                cached_data,
                inputs,
                op,
                shape,
                device,
                origin,
                backend,
            })),
            TensorId(uuid()),
        )
    }

    fn eager_device() -> DeviceHandle {
        DeviceHandle::new(D::kind(), None)
    }

    pub fn id(&self) -> TensorId {
        self.1
    }

    pub fn shape(&self) -> Vec<usize> {
        self.0.read().unwrap().shape.clone()
    }

    pub fn ndim(&self) -> usize {
        self.0.read().unwrap().shape.len()
    }

    pub fn device(&self) -> DeviceHandle {
        self.0.read().unwrap().device
    }

    pub fn origin(&self) -> Origin {
        self.0.read().unwrap().origin
    }

    pub fn is_deferred(&self) -> bool {
        self.origin() == Origin::Deferred
    }

    pub fn backend_device(&self) -> Option<BackendDevice> {
        self.0.read().unwrap().backend
    }

    /// Deferred tensors always carry `Unlazy`, so eager operators that touch
    /// them after lazy mode ends are intercepted.
    pub fn key_set(&self) -> DispatchKeySet {
        let value = self.0.read().unwrap();
        match value.origin {
            Origin::Deferred => DispatchKeySet::from(DispatchKey::Lazy).add(DispatchKey::Unlazy),
            Origin::Materialized => match value.device.kind {
                DeviceKind::Cpu => DispatchKey::Cpu.into(),
                DeviceKind::Lazy => DispatchKey::Lazy.into(),
            },
        }
    }

    /// Whether data is available, either from construction or from a sync.
    pub fn resolved(&self) -> bool {
        self.0.read().unwrap().cached_data.is_some()
    }

    pub fn data(&self) -> Option<NDArray<T, D>> {
        self.0.read().unwrap().cached_data.clone()
    }

    pub fn underlying_data(&self) -> Result<Vec<T>> {
        self.data()
            .map(|data| data.to_vec())
            .ok_or(LazyError::Unmaterialized(self.1))
    }

    /// Whether both handles refer to the same tensor value.
    pub fn is_same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn op(&self) -> Option<OperatorHandle<T, D>> {
        self.0.read().unwrap().op.clone()
    }

    pub(crate) fn inputs(&self) -> Vec<Tensor<T, D>> {
        self.0.read().unwrap().inputs.clone()
    }

    pub(crate) fn set_data(&self, data: NDArray<T, D>) {
        self.0.write().unwrap().cached_data = Some(data);
    }

    pub(crate) fn downgrade(&self) -> WeakTensor<T, D> {
        WeakTensor(Arc::downgrade(&self.0), self.1)
    }
}

impl<T: Type, D: Device> WeakTensor<T, D> {
    pub fn upgrade(&self) -> Option<Tensor<T, D>> {
        self.0.upgrade().map(|inner| Tensor(inner, self.1))
    }

    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }
}

impl<T: Type, D: Device> Debug for Tensor<T, D> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let value = self.0.read().unwrap();
        f.debug_struct("Tensor")
            .field("id", &self.1)
            .field("device", &value.device)
            .field("origin", &value.origin)
            .field("shape", &value.shape)
            .field("resolved", &value.cached_data.is_some())
            .finish()
    }
}

impl<T: Type, D: Device> PartialEq for Tensor<T, D> {
    fn eq(&self, other: &Self) -> bool {
        match (self.data(), other.data()) {
            (Some(lhs), Some(rhs)) => lhs == rhs,
            _ => false,
        }
    }
}

fn uuid() -> usize {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}
