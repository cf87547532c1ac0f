use crate::config::LazyConfig;
use crate::device::{DefaultDeviceRegistry, Device, DeviceRegistry};
use crate::dispatch::{DispatchKey, Dispatcher};
use crate::error::{LazyError, Result};
use crate::graph::{GraphEngine, LazyGraphExecutor};
use crate::kernels::{eager_kernel, lazy_kernel};
use crate::operation::OperatorHandle;
use crate::tensor::Tensor;
use crate::type_trait::Type;
use crate::unlazy::install_unlazy_handler;
use std::sync::Arc;

/// Everything an operator call needs besides the per-thread mode state:
/// configuration, device registry, graph engine and the dispatch table.
pub struct Runtime<T: Type, D: Device> {
    config: LazyConfig,
    registry: Arc<dyn DeviceRegistry>,
    graph: Arc<dyn GraphEngine<T, D>>,
    dispatcher: Dispatcher<T, D>,
}

impl<T: Type, D: Device> Runtime<T, D> {
    pub fn new(config: LazyConfig) -> Result<Self> {
        let registry = Arc::new(DefaultDeviceRegistry::new(&config)?);
        Ok(Self::with_parts(
            config,
            registry,
            Arc::new(LazyGraphExecutor::new()),
        ))
    }

    pub fn from_env() -> Result<Self> {
        Self::new(LazyConfig::from_env()?)
    }

    /// Builds a runtime around custom collaborators and installs the eager,
    /// lazy and unlazy kernels.
    pub fn with_parts(
        config: LazyConfig,
        registry: Arc<dyn DeviceRegistry>,
        graph: Arc<dyn GraphEngine<T, D>>,
    ) -> Self {
        let dispatcher = Dispatcher::new();
        dispatcher.register_fallback(DispatchKey::Cpu, eager_kernel::<T, D>);
        dispatcher.register_fallback(DispatchKey::Lazy, lazy_kernel::<T, D>);
        install_unlazy_handler(&dispatcher);
        Self {
            config,
            registry,
            graph,
            dispatcher,
        }
    }

    pub fn config(&self) -> &LazyConfig {
        &self.config
    }

    pub fn registry(&self) -> &dyn DeviceRegistry {
        self.registry.as_ref()
    }

    pub fn graph(&self) -> &dyn GraphEngine<T, D> {
        self.graph.as_ref()
    }

    pub fn dispatcher(&self) -> &Dispatcher<T, D> {
        &self.dispatcher
    }

    /// Routes a single-output operator call and returns its result.
    pub fn call(&self, op: OperatorHandle<T, D>, args: Vec<Tensor<T, D>>) -> Result<Tensor<T, D>> {
        let mut stack = args;
        self.dispatcher.call(self, &op, &mut stack)?;
        if stack.len() != 1 {
            return Err(LazyError::internal(format!(
                "`{}` left {} values on the stack",
                op.name(),
                stack.len()
            )));
        }
        stack
            .pop()
            .ok_or_else(|| LazyError::internal(format!("`{}` produced no output", op.name())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::CPU;
    use crate::device::{DeviceHandle, DeviceKind};
    use crate::operation::EWiseAdd;
    use std::thread;

    #[test]
    fn test_kernels_installed() {
        let rt = Runtime::<f32, CPU>::new(LazyConfig::default()).unwrap();
        for key in DispatchKey::ALL {
            assert!(rt.dispatcher().has_fallback(key));
        }
    }

    #[test]
    fn test_rejects_bad_config() {
        let config = LazyConfig {
            eager_fallback_device: DeviceKind::Lazy,
            ..LazyConfig::default()
        };
        assert!(matches!(
            Runtime::<f32, CPU>::new(config),
            Err(LazyError::Config(_))
        ));
    }

    #[test]
    fn test_call() {
        let rt = Runtime::<f32, CPU>::new(LazyConfig::default()).unwrap();
        let a = Tensor::new1d([1., 2.]);
        let out = rt.call(OperatorHandle::new(EWiseAdd), vec![a.clone(), a]).unwrap();
        assert!(out == Tensor::new1d([2., 4.]));
        assert_eq!(out.device(), DeviceHandle::cpu());
    }

    #[test]
    fn test_shared_across_threads() {
        let rt = Arc::new(Runtime::<f32, CPU>::new(LazyConfig::default()).unwrap());
        let handles = (0..4)
            .map(|i| {
                let rt = rt.clone();
                thread::spawn(move || {
                    let a = Tensor::<f32, CPU>::new1d([i as f32, 1.]);
                    let x = rt
                        .lazy_scope(&DeviceHandle::lazy(), || {
                            rt.call(OperatorHandle::new(EWiseAdd), vec![a.clone(), a.clone()])
                        })
                        .unwrap();
                    assert!(x.is_deferred());
                    x.underlying_data().unwrap()
                })
            })
            .collect::<Vec<_>>();
        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.join().unwrap(), vec![2. * i as f32, 2.]);
        }
    }
}
