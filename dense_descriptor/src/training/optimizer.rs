//! SGD with momentum and global gradient-norm clipping.
//!
//! The optimizer works on the gradients of a whole module at once: the global
//! L2 norm over every parameter gradient is clipped before the momentum
//! update, and velocity buffers are kept per parameter so they can be saved
//! under the parameter names of the network.

use std::collections::HashMap;

use burn::config::Config;
use burn::module::{AutodiffModule, ModuleMapper, ModuleVisitor, ParamId};
use burn::optim::GradientsParams;
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::ElementConversion;

use crate::nn::{parameter_shapes, ParamSnapshot, ParamTensor};

/// Configuration for the optimizer.
#[derive(Config, Debug)]
pub struct OptimizerConfig {
    /// Momentum factor.
    #[config(default = 0.9)]
    pub momentum: f32,

    /// Weight decay (L2 regularization).
    #[config(default = 0.0)]
    pub weight_decay: f32,

    /// Maximum global gradient norm (0 = no clipping).
    #[config(default = 10.0)]
    pub gradient_clip: f32,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of a single optimizer step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepStats {
    /// Global gradient norm before clipping.
    pub grad_norm: f32,
    /// Factor the gradients were scaled by.
    pub clip_scale: f32,
}

/// SGD with momentum: `v = momentum * v + g`, `p = p - lr * v`.
///
/// Velocity buffers live on the inner backend, flattened, keyed by parameter id.
pub struct SgdMomentum<B: AutodiffBackend> {
    config: OptimizerConfig,
    velocity: HashMap<ParamId, Tensor<B::InnerBackend, 1>>,
}

impl<B: AutodiffBackend> SgdMomentum<B> {
    /// Create an optimizer with empty velocity buffers.
    pub fn new(config: OptimizerConfig) -> Self {
        Self {
            config,
            velocity: HashMap::new(),
        }
    }

    /// The optimizer configuration.
    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Number of parameters with a velocity buffer.
    pub fn num_buffers(&self) -> usize {
        self.velocity.len()
    }

    /// Apply one update to `module` with learning rate `lr`.
    pub fn step<M: AutodiffModule<B>>(
        &mut self,
        lr: f64,
        module: M,
        grads: GradientsParams,
    ) -> (M, StepStats) {
        let grad_norm = global_grad_norm::<B, M>(&module, &grads);
        let clip_scale = clip_scale(grad_norm, self.config.gradient_clip);

        let mut mapper = MomentumMapper::<B> {
            grads,
            velocity: &mut self.velocity,
            lr: lr as f32,
            momentum: self.config.momentum,
            weight_decay: self.config.weight_decay,
            clip_scale,
        };
        let module = module.map(&mut mapper);

        (module, StepStats { grad_norm, clip_scale })
    }

    /// Copy velocity buffers to the host, keyed by parameter name.
    ///
    /// Buffers are stored with the shape of their parameter.
    pub fn snapshot<M: AutodiffModule<B>>(
        &self,
        module: &M,
        names: &HashMap<ParamId, String>,
    ) -> ParamSnapshot {
        let shapes = parameter_shapes::<B, M>(module);
        self.velocity
            .iter()
            .filter_map(|(id, velocity)| {
                let name = names.get(id)?;
                let shape = shapes.get(id)?.clone();
                let values = velocity.to_data().iter::<f32>().collect();
                Some((name.clone(), ParamTensor { shape, values }))
            })
            .collect()
    }

    /// Restore velocity buffers by name.
    ///
    /// Buffers whose name is unknown or whose shape differs from the current
    /// parameter are dropped and start from zero. Returns the number restored.
    pub fn restore<M: AutodiffModule<B>>(
        &mut self,
        module: &M,
        names: &HashMap<ParamId, String>,
        snapshot: &ParamSnapshot,
        device: &B::Device,
    ) -> usize {
        let shapes = parameter_shapes::<B, M>(module);
        self.velocity.clear();

        for (id, name) in names {
            let (Some(stored), Some(shape)) = (snapshot.get(name), shapes.get(id)) else {
                continue;
            };
            if &stored.shape != shape || stored.values.len() != stored.num_elements() {
                log::warn!("Dropping optimizer state for {}: shape mismatch", name);
                continue;
            }
            let flat = Tensor::<B::InnerBackend, 1>::from_data(
                TensorData::new(stored.values.clone(), [stored.values.len()]),
                device,
            );
            self.velocity.insert(*id, flat);
        }

        self.velocity.len()
    }
}

/// Scale that brings `norm` down to `max_norm`; 1 when no clipping applies.
pub fn clip_scale(norm: f32, max_norm: f32) -> f32 {
    if max_norm > 0.0 && norm > max_norm {
        max_norm / norm
    } else {
        1.0
    }
}

/// L2 norm over every parameter gradient of `module`.
pub fn global_grad_norm<B: AutodiffBackend, M: AutodiffModule<B>>(
    module: &M,
    grads: &GradientsParams,
) -> f32 {
    let mut visitor = GradNorm::<B> {
        grads,
        sum_squares: 0.0,
        _backend: std::marker::PhantomData,
    };
    module.visit(&mut visitor);
    visitor.sum_squares.sqrt() as f32
}

struct GradNorm<'a, B: AutodiffBackend> {
    grads: &'a GradientsParams,
    sum_squares: f64,
    _backend: std::marker::PhantomData<B>,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for GradNorm<'_, B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        if let Some(grad) = self.grads.get::<B::InnerBackend, D>(id) {
            let squares: f64 = grad.powf_scalar(2.0).sum().into_scalar().elem();
            self.sum_squares += squares;
        }
    }
}

struct MomentumMapper<'a, B: AutodiffBackend> {
    grads: GradientsParams,
    velocity: &'a mut HashMap<ParamId, Tensor<B::InnerBackend, 1>>,
    lr: f32,
    momentum: f32,
    weight_decay: f32,
    clip_scale: f32,
}

impl<B: AutodiffBackend> ModuleMapper<B> for MomentumMapper<'_, B> {
    fn map_float<const D: usize>(&mut self, id: ParamId, tensor: Tensor<B, D>) -> Tensor<B, D> {
        let Some(grad) = self.grads.remove::<B::InnerBackend, D>(id) else {
            return tensor;
        };

        let dims = tensor.dims();
        let require_grad = tensor.is_require_grad();
        let param = tensor.inner();

        let mut grad = grad.mul_scalar(self.clip_scale);
        if self.weight_decay > 0.0 {
            grad = grad + param.clone().mul_scalar(self.weight_decay);
        }

        let velocity = match self.velocity.remove(&id) {
            Some(previous) => previous.reshape(dims).mul_scalar(self.momentum) + grad,
            None => grad,
        };
        let updated = param - velocity.clone().mul_scalar(self.lr);
        let num_elements: usize = dims.iter().product();
        self.velocity.insert(id, velocity.reshape([num_elements]));

        let updated = Tensor::from_inner(updated);
        if require_grad {
            updated.require_grad()
        } else {
            updated
        }
    }
}
