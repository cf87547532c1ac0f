use crate::config::LazyConfig;
use crate::error::{LazyError, Result};
use crate::ndarray::NDArray;
use crate::type_trait::Type;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Eager compute backend. Kernels here never see deferred tensors.
pub trait Device: Clone + Send + Sync + 'static {
    fn kind() -> DeviceKind;

    fn new<T: Type>(data: Vec<T>, shape: &[usize]) -> NDArray<T, Self>;

    fn ones<T: Type>(shape: &[usize]) -> NDArray<T, Self>;

    fn zeros<T: Type>(shape: &[usize]) -> NDArray<T, Self>;

    fn rand<T: Type>(shape: &[usize], low: T, high: T) -> NDArray<T, Self>;

    fn add<T: Type>(&self, lhs: &NDArray<T, Self>, rhs: &NDArray<T, Self>) -> NDArray<T, Self>;

    fn sub<T: Type>(&self, lhs: &NDArray<T, Self>, rhs: &NDArray<T, Self>) -> NDArray<T, Self>;

    fn mul<T: Type>(&self, lhs: &NDArray<T, Self>, rhs: &NDArray<T, Self>) -> NDArray<T, Self>;

    fn add_scalar<T: Type>(&self, lhs: &NDArray<T, Self>, rhs: T) -> NDArray<T, Self>;

    fn mul_scalar<T: Type>(&self, lhs: &NDArray<T, Self>, rhs: T) -> NDArray<T, Self>;

    fn eq<T: Type>(&self, lhs: &NDArray<T, Self>, rhs: &NDArray<T, Self>) -> bool;

    /// **Warning**: both operands must be 2-D with matching inner dimension.
    fn matmul<T: Type>(&self, lhs: &NDArray<T, Self>, rhs: &NDArray<T, Self>) -> NDArray<T, Self>;

    fn sum<T: Type>(
        &self,
        lhs: &NDArray<T, Self>,
        shape: Vec<usize>,
        reduce_dims: usize,
    ) -> NDArray<T, Self>;

    fn contiguous<T: Type>(&self, lhs: &NDArray<T, Self>) -> NDArray<T, Self>;

    fn data<T: Type>(lhs: &NDArray<T, Self>) -> Vec<T>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Cpu,
    Lazy,
}

impl DeviceKind {
    pub fn is_lazy(self) -> bool {
        self == DeviceKind::Lazy
    }
}

impl Display for DeviceKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Cpu => write!(f, "cpu"),
            DeviceKind::Lazy => write!(f, "lazy"),
        }
    }
}

impl FromStr for DeviceKind {
    type Err = LazyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(DeviceKind::Cpu),
            "lazy" => Ok(DeviceKind::Lazy),
            _ => Err(LazyError::UnknownDevice(s.to_string())),
        }
    }
}

/// User facing device identifier: a kind plus an optional index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceHandle {
    pub kind: DeviceKind,
    pub index: Option<usize>,
}

impl DeviceHandle {
    pub fn new(kind: DeviceKind, index: Option<usize>) -> Self {
        Self { kind, index }
    }

    pub fn cpu() -> Self {
        Self::new(DeviceKind::Cpu, None)
    }

    pub fn lazy() -> Self {
        Self::new(DeviceKind::Lazy, None)
    }

    pub fn has_index(&self) -> bool {
        self.index.is_some()
    }
}

impl Display for DeviceHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(index) => write!(f, "{}:{}", self.kind, index),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl FromStr for DeviceHandle {
    type Err = LazyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(':') {
            Some((kind, index)) => {
                let index = index
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| LazyError::UnknownDevice(s.to_string()))?;
                Ok(Self::new(kind.parse()?, Some(index)))
            }
            None => Ok(Self::new(s.parse()?, None)),
        }
    }
}

impl TryFrom<String> for DeviceHandle {
    type Error = LazyError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<DeviceHandle> for String {
    fn from(handle: DeviceHandle) -> Self {
        handle.to_string()
    }
}

/// Backend descriptor a `DeviceHandle` resolves to. Its `Display` form is the
/// key the graph engine uses to select devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BackendDevice {
    pub kind: DeviceKind,
    pub ordinal: usize,
}

impl Display for BackendDevice {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}",
            self.kind.to_string().to_ascii_uppercase(),
            self.ordinal
        )
    }
}

pub trait DeviceRegistry: Send + Sync {
    fn resolve_device(&self, handle: &DeviceHandle) -> Result<BackendDevice>;

    fn default_eager_fallback_device_kind(&self) -> DeviceKind;
}

/// Maps lazy handles onto the configured hardware backend.
pub struct DefaultDeviceRegistry {
    backend: DeviceKind,
    ordinal: usize,
    fallback: DeviceKind,
}

impl DefaultDeviceRegistry {
    pub fn new(config: &LazyConfig) -> Result<Self> {
        if config.backend.is_lazy() {
            return Err(LazyError::Config(
                "the lazy backend must resolve to a hardware device".to_string(),
            ));
        }
        if config.eager_fallback_device.is_lazy() {
            return Err(LazyError::Config(
                "eager fallback device cannot be lazy".to_string(),
            ));
        }
        Ok(Self {
            backend: config.backend,
            ordinal: config.ordinal,
            fallback: config.eager_fallback_device,
        })
    }
}

impl DeviceRegistry for DefaultDeviceRegistry {
    fn resolve_device(&self, handle: &DeviceHandle) -> Result<BackendDevice> {
        match handle.kind {
            DeviceKind::Lazy => Ok(BackendDevice {
                kind: self.backend,
                ordinal: handle.index.unwrap_or(self.ordinal),
            }),
            kind => Ok(BackendDevice {
                kind,
                ordinal: handle.index.unwrap_or(0),
            }),
        }
    }

    fn default_eager_fallback_device_kind(&self) -> DeviceKind {
        self.fallback
    }
}
