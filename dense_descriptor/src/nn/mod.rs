//! Descriptor network and named parameter utilities.
//!
//! This module provides:
//! - `DescriptorModel`: the interface the trainer needs from a descriptor network
//! - `DescriptorNet`: a densely connected fully convolutional implementation
//! - Name-keyed parameter snapshots for partial checkpoint restore

mod descriptor;
mod params;

pub use descriptor::{l2_normalize, DescriptorModel, DescriptorNet};
pub use params::{
    name_index, parameter_shapes, restore_parameters, snapshot_parameters, ParamSnapshot,
    ParamTensor, RestoreReport,
};
