use crate::device::{BackendDevice, Device};
use crate::error::{LazyError, Result};
use crate::tensor::{Tensor, TensorId, WeakTensor};
use crate::type_trait::Type;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;

/// Builds and runs the deferred computation graph.
pub trait GraphEngine<T: Type, D: Device>: Send + Sync {
    /// Tracks a freshly created deferred tensor as live.
    fn register_tensor(&self, tensor: &Tensor<T, D>);

    /// Materializes every live, unresolved deferred tensor whose backend
    /// device is in `devices`. With `wait` the call returns only once all work
    /// has been submitted to the device queue.
    fn sync_live_tensors_graph(
        &self,
        device: &BackendDevice,
        devices: &HashSet<String>,
        wait: bool,
    ) -> Result<()>;

    fn sync_tensors_graph(&self, tensors: &[Tensor<T, D>], wait: bool) -> Result<()>;
}

enum EmitStatus {
    Emitting,
    Emitted,
}

/// Reference graph engine. The eager backends it drives run synchronously,
/// so submission and completion coincide.
pub struct LazyGraphExecutor<T: Type, D: Device> {
    tensors: RwLock<BTreeMap<TensorId, WeakTensor<T, D>>>,
}

impl<T: Type, D: Device> LazyGraphExecutor<T, D> {
    pub fn new() -> Self {
        Self {
            tensors: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn unregister_tensor(&self, id: TensorId) {
        log::trace!("unregistering tensor {id:?}");
        self.tensors.write().unwrap().remove(&id);
    }

    /// Registered tensors that are still referenced somewhere.
    pub fn live_tensor_count(&self) -> usize {
        self.tensors
            .read()
            .unwrap()
            .values()
            .filter(|weak| weak.is_alive())
            .count()
    }

    fn get_live_tensors(&self, devices: &HashSet<String>) -> Vec<Tensor<T, D>> {
        self.tensors
            .read()
            .unwrap()
            .values()
            .filter_map(|weak| weak.upgrade())
            .filter(|t| !t.resolved())
            .filter(|t| {
                t.backend_device()
                    .map_or(false, |backend| devices.contains(&backend.to_string()))
            })
            .collect()
    }

    fn prune(&self) {
        self.tensors
            .write()
            .unwrap()
            .retain(|_, weak| weak.upgrade().map_or(false, |t| !t.resolved()));
    }

    fn materialize(&self, roots: &[Tensor<T, D>]) -> Result<usize> {
        let order = compute_post_order(roots)?;
        let mut executed = 0;
        for node in order {
            if node.resolved() {
                continue;
            }
            let op = node.op().ok_or_else(|| {
                LazyError::internal(format!(
                    "deferred tensor {:?} has neither data nor an IR node",
                    node.id()
                ))
            })?;
            let args = node
                .inputs()
                .iter()
                .map(|input| input.data().ok_or(LazyError::Unmaterialized(input.id())))
                .collect::<Result<Vec<_>>>()?;
            node.set_data(op.compute(&args));
            executed += 1;
        }
        Ok(executed)
    }
}

impl<T: Type, D: Device> Default for LazyGraphExecutor<T, D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Type, D: Device> GraphEngine<T, D> for LazyGraphExecutor<T, D> {
    fn register_tensor(&self, tensor: &Tensor<T, D>) {
        log::trace!("registering tensor {:?}", tensor.id());
        self.tensors
            .write()
            .unwrap()
            .insert(tensor.id(), tensor.downgrade());
    }

    fn sync_live_tensors_graph(
        &self,
        device: &BackendDevice,
        devices: &HashSet<String>,
        wait: bool,
    ) -> Result<()> {
        let tensors = self.get_live_tensors(devices);
        log::debug!(
            "syncing {} live tensors for {device} (wait={wait})",
            tensors.len()
        );
        let executed = self.materialize(&tensors)?;
        self.prune();
        log::debug!("executed {executed} nodes for {device}");
        Ok(())
    }

    fn sync_tensors_graph(&self, tensors: &[Tensor<T, D>], wait: bool) -> Result<()> {
        log::debug!("syncing {} tensors (wait={wait})", tensors.len());
        if tensors.iter().all(|t| t.resolved()) {
            return Ok(());
        }
        self.materialize(tensors)?;
        Ok(())
    }
}

fn compute_post_order<T: Type, D: Device>(roots: &[Tensor<T, D>]) -> Result<Vec<Tensor<T, D>>> {
    let mut post_order = Vec::new();
    let mut emission = HashMap::new();
    for root in roots {
        let mut stack = vec![root.clone()];
        while let Some(node) = stack.last().cloned() {
            match emission.get(&node.id()) {
                None => {
                    emission.insert(node.id(), EmitStatus::Emitting);
                    if node.resolved() {
                        continue;
                    }
                    for input in node.inputs() {
                        if let Some(EmitStatus::Emitting) = emission.get(&input.id()) {
                            return Err(LazyError::internal(format!(
                                "cycle detected at tensor {:?}",
                                input.id()
                            )));
                        }
                        stack.push(input);
                    }
                }
                Some(EmitStatus::Emitting) => {
                    emission.insert(node.id(), EmitStatus::Emitted);
                    post_order.push(node);
                    stack.pop();
                }
                Some(EmitStatus::Emitted) => {
                    stack.pop();
                }
            }
        }
    }
    Ok(post_order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::CPU;
    use crate::device::{DeviceHandle, DeviceKind};
    use crate::operation::{EWiseAdd, MulScalar, OperatorHandle};

    fn backend(ordinal: usize) -> BackendDevice {
        BackendDevice {
            kind: DeviceKind::Cpu,
            ordinal,
        }
    }

    fn leaf(data: [f32; 2], ordinal: usize) -> Tensor<f32, CPU> {
        let eager = Tensor::<f32, CPU>::new1d(data);
        Tensor::device_data(eager.data().unwrap(), DeviceHandle::lazy(), backend(ordinal))
    }

    fn node(
        op: OperatorHandle<f32, CPU>,
        inputs: Vec<Tensor<f32, CPU>>,
        ordinal: usize,
    ) -> Tensor<f32, CPU> {
        Tensor::deferred(op, inputs, vec![2], DeviceHandle::lazy(), backend(ordinal))
    }

    fn devices(ordinal: usize) -> HashSet<String> {
        HashSet::from([backend(ordinal).to_string()])
    }

    #[test]
    fn test_sync_live_tensors() {
        let graph = LazyGraphExecutor::<f32, CPU>::new();
        let a = leaf([1., 2.], 0);
        let b = node(OperatorHandle::new(EWiseAdd), vec![a.clone(), a.clone()], 0);
        let c = node(OperatorHandle::new(MulScalar(3.)), vec![b.clone()], 0);
        graph.register_tensor(&b);
        graph.register_tensor(&c);
        assert_eq!(graph.live_tensor_count(), 2);

        graph.sync_live_tensors_graph(&backend(0), &devices(0), true).unwrap();
        assert_eq!(b.underlying_data().unwrap(), vec![2., 4.]);
        assert_eq!(c.underlying_data().unwrap(), vec![6., 12.]);
        assert!(c.is_deferred());
        assert_eq!(graph.live_tensor_count(), 0);
    }

    #[test]
    fn test_sync_filters_devices() {
        let graph = LazyGraphExecutor::<f32, CPU>::new();
        let a = node(OperatorHandle::new(MulScalar(2.)), vec![leaf([1., 1.], 0)], 0);
        let b = node(OperatorHandle::new(MulScalar(2.)), vec![leaf([1., 1.], 1)], 1);
        graph.register_tensor(&a);
        graph.register_tensor(&b);
        graph.sync_live_tensors_graph(&backend(1), &devices(1), true).unwrap();
        assert!(!a.resolved());
        assert!(b.resolved());
        assert_eq!(graph.live_tensor_count(), 1);
    }

    #[test]
    fn test_dead_tensors_are_skipped() {
        let graph = LazyGraphExecutor::<f32, CPU>::new();
        let a = node(OperatorHandle::new(MulScalar(2.)), vec![leaf([1., 2.], 0)], 0);
        graph.register_tensor(&a);
        drop(a);
        assert_eq!(graph.live_tensor_count(), 0);
        graph.sync_live_tensors_graph(&backend(0), &devices(0), false).unwrap();
        assert!(graph.tensors.read().unwrap().is_empty());
    }

    #[test]
    fn test_sync_tensors_graph() {
        let graph = LazyGraphExecutor::<f32, CPU>::new();
        let a = node(OperatorHandle::new(EWiseAdd), vec![leaf([1., 2.], 0), leaf([3., 4.], 0)], 0);
        graph.register_tensor(&a);
        graph.sync_tensors_graph(&[a.clone()], true).unwrap();
        assert_eq!(a.underlying_data().unwrap(), vec![4., 6.]);
        graph.unregister_tensor(a.id());
        assert_eq!(graph.live_tensor_count(), 0);
    }
}
