//! Name-keyed parameter snapshots.
//!
//! Burn records restore a module by structure. Checkpoints here are keyed by
//! the hierarchical names a [`DescriptorModel`] reports, so a restore can be
//! partial: parameters are matched by name and shape, everything else is
//! reported instead of failing.

use std::collections::{BTreeMap, HashMap};

use burn::module::{Module, ModuleMapper, ModuleVisitor, ParamId};
use burn::prelude::*;
use serde::{Deserialize, Serialize};

use super::DescriptorModel;

/// Host copy of a single float tensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamTensor {
    /// Tensor dimensions.
    pub shape: Vec<usize>,
    /// Row-major values.
    pub values: Vec<f32>,
}

impl ParamTensor {
    /// Number of elements implied by the shape.
    pub fn num_elements(&self) -> usize {
        self.shape.iter().product()
    }

    fn from_tensor<B: Backend, const D: usize>(tensor: &Tensor<B, D>) -> Self {
        let values = tensor.to_data().iter::<f32>().collect();
        Self {
            shape: tensor.dims().to_vec(),
            values,
        }
    }

    fn to_tensor<B: Backend, const D: usize>(&self, device: &B::Device) -> Tensor<B, D> {
        Tensor::from_data(TensorData::new(self.values.clone(), self.shape.clone()), device)
    }
}

/// Parameters keyed by their hierarchical name.
pub type ParamSnapshot = BTreeMap<String, ParamTensor>;

/// Outcome of a name-matching restore.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RestoreReport {
    /// Names restored from the snapshot.
    pub restored: Vec<String>,
    /// Model parameters absent from the snapshot; they keep their values.
    pub missing: Vec<String>,
    /// Snapshot entries the model has no parameter for.
    pub unexpected: Vec<String>,
    /// Names present on both sides with different shapes.
    pub mismatched: Vec<String>,
}

impl RestoreReport {
    /// Whether every parameter was restored and nothing was left over.
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_empty() && self.mismatched.is_empty()
    }

    /// Log skipped entries at `warn`.
    pub fn log(&self, what: &str) {
        if self.is_complete() {
            log::info!("Restored {} {} parameters", self.restored.len(), what);
            return;
        }
        log::warn!(
            "Partially restored {} parameters: {} restored, missing {:?}, unexpected {:?}, shape mismatch {:?}",
            what,
            self.restored.len(),
            self.missing,
            self.unexpected,
            self.mismatched
        );
    }
}

/// Map from parameter id to name.
pub fn name_index<B: Backend, M: DescriptorModel<B>>(model: &M) -> HashMap<ParamId, String> {
    model.parameter_names().into_iter().collect()
}

/// Copy every named float parameter of `model` to the host.
pub fn snapshot_parameters<B: Backend, M: DescriptorModel<B>>(model: &M) -> ParamSnapshot {
    let names = name_index::<B, M>(model);
    let mut collector = Collector {
        names: &names,
        snapshot: BTreeMap::new(),
    };
    model.visit(&mut collector);
    collector.snapshot
}

/// Dimensions of every float parameter, keyed by id.
pub fn parameter_shapes<B: Backend, M: Module<B>>(model: &M) -> HashMap<ParamId, Vec<usize>> {
    let mut shapes = ShapeCollector {
        shapes: HashMap::new(),
    };
    model.visit(&mut shapes);
    shapes.shapes
}

/// Load `snapshot` into `model` by name.
///
/// Parameters whose name is missing from the snapshot, or whose stored shape
/// differs, keep their current values.
pub fn restore_parameters<B: Backend, M: DescriptorModel<B>>(
    model: M,
    snapshot: &ParamSnapshot,
) -> (M, RestoreReport) {
    let names = name_index::<B, M>(&model);
    let mut loader = Loader {
        names: &names,
        snapshot,
        report: RestoreReport::default(),
    };
    let model = model.map(&mut loader);

    let mut report = loader.report;
    let known: std::collections::HashSet<&String> = names.values().collect();
    report.unexpected = snapshot
        .keys()
        .filter(|name| !known.contains(name))
        .cloned()
        .collect();
    report.restored.sort();
    report.missing.sort();
    report.mismatched.sort();

    (model, report)
}

struct Collector<'a> {
    names: &'a HashMap<ParamId, String>,
    snapshot: ParamSnapshot,
}

impl<B: Backend> ModuleVisitor<B> for Collector<'_> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, tensor: &Tensor<B, D>) {
        if let Some(name) = self.names.get(&id) {
            self.snapshot
                .insert(name.clone(), ParamTensor::from_tensor(tensor));
        }
    }
}

struct ShapeCollector {
    shapes: HashMap<ParamId, Vec<usize>>,
}

impl<B: Backend> ModuleVisitor<B> for ShapeCollector {
    fn visit_float<const D: usize>(&mut self, id: ParamId, tensor: &Tensor<B, D>) {
        self.shapes.insert(id, tensor.dims().to_vec());
    }
}

struct Loader<'a> {
    names: &'a HashMap<ParamId, String>,
    snapshot: &'a ParamSnapshot,
    report: RestoreReport,
}

impl<B: Backend> ModuleMapper<B> for Loader<'_> {
    fn map_float<const D: usize>(&mut self, id: ParamId, tensor: Tensor<B, D>) -> Tensor<B, D> {
        let Some(name) = self.names.get(&id) else {
            return tensor;
        };
        let Some(stored) = self.snapshot.get(name) else {
            self.report.missing.push(name.clone());
            return tensor;
        };
        if stored.shape != tensor.dims().to_vec() || stored.values.len() != stored.num_elements() {
            self.report.mismatched.push(name.clone());
            return tensor;
        }

        let require_grad = tensor.is_require_grad();
        let restored = stored.to_tensor::<B, D>(&tensor.device());
        self.report.restored.push(name.clone());

        if require_grad {
            restored.require_grad()
        } else {
            restored
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DescriptorNetConfig;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn config() -> DescriptorNetConfig {
        DescriptorNetConfig::new()
            .with_feature_length(4)
            .with_filter_growth_rate(2)
            .with_out_chans_first_conv(3)
            .with_num_dense_layers(1)
    }

    #[test]
    fn test_snapshot_covers_named_parameters() {
        let device = Default::default();
        let net = config().init::<TestBackend>(&device);
        let snapshot = snapshot_parameters::<TestBackend, _>(&net);

        assert_eq!(snapshot.len(), 6);
        let stem = &snapshot["stem.weight"];
        assert_eq!(stem.shape, vec![3, 3, 3, 3]);
        assert_eq!(stem.values.len(), stem.num_elements());
    }

    #[test]
    fn test_restore_copies_values() {
        let device = Default::default();
        let source = config().init::<TestBackend>(&device);
        let target = config().init::<TestBackend>(&device);

        let snapshot = snapshot_parameters::<TestBackend, _>(&source);
        let (target, report) = restore_parameters::<TestBackend, _>(target, &snapshot);

        assert!(report.is_complete());
        assert_eq!(report.restored.len(), 6);
        assert_eq!(snapshot_parameters::<TestBackend, _>(&target), snapshot);
    }

    #[test]
    fn test_partial_restore_is_reported() {
        let device = Default::default();
        let source = config().init::<TestBackend>(&device);
        let target = config().with_feature_length(5).init::<TestBackend>(&device);

        let mut snapshot = snapshot_parameters::<TestBackend, _>(&source);
        snapshot.remove("stem.bias");
        snapshot.insert(
            "legacy.weight".to_string(),
            ParamTensor {
                shape: vec![1],
                values: vec![0.0],
            },
        );

        let before = snapshot_parameters::<TestBackend, _>(&target);
        let (target, report) = restore_parameters::<TestBackend, _>(target, &snapshot);
        let after = snapshot_parameters::<TestBackend, _>(&target);

        assert_eq!(report.missing, vec!["stem.bias".to_string()]);
        assert_eq!(report.unexpected, vec!["legacy.weight".to_string()]);
        assert_eq!(
            report.mismatched,
            vec!["head.bias".to_string(), "head.weight".to_string()]
        );
        assert_eq!(after["stem.weight"], snapshot["stem.weight"]);
        assert_eq!(after["head.weight"], before["head.weight"]);
    }
}
