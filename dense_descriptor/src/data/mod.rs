//! Paired-frame data for descriptor training.

mod batch;
mod heatmap;
mod source;
mod synthetic;

pub use batch::{FramePairBatch, FramePairBatcher};
pub use heatmap::gaussian_heatmap;
pub use source::{EpochDataset, FramePairItem, PairSource};
pub use synthetic::SyntheticPairSource;
