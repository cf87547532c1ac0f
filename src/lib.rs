pub mod config;
pub mod cpu;
pub mod device;
pub mod dispatch;
pub mod eager_fallback;
pub mod error;
pub mod functional;
pub mod graph;
mod kernels;
pub mod meta;
pub mod mode;
mod ndarray;
pub mod operation;
pub mod runtime;
pub mod tensor;
mod type_trait;
pub mod unlazy;

pub use config::LazyConfig;
pub use device::{BackendDevice, DeviceHandle, DeviceKind, DeviceRegistry};
pub use dispatch::{DispatchKey, DispatchKeySet};
pub use error::{LazyError, Result};
pub use graph::{GraphEngine, LazyGraphExecutor};
pub use mode::{in_lazy_mode, reserved_unlazy_key, LazyModeGuard};
pub use ndarray::NDArray;
pub use runtime::Runtime;
pub use tensor::{Origin, Tensor, TensorId};
pub use type_trait::Type;
