//! Batching of paired-frame samples.

use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;

use super::FramePairItem;

/// A batch of frame pairs on a device.
#[derive(Debug, Clone)]
pub struct FramePairBatch<B: Backend> {
    /// First frames [batch, 3, height, width].
    pub colors_1: Tensor<B, 4>,
    /// Second frames [batch, 3, height, width].
    pub colors_2: Tensor<B, 4>,
    /// Flattened correspondence locations in frame 1 [batch, samples].
    pub locations_1d_1: Tensor<B, 2, Int>,
    /// Flattened correspondence locations in frame 2 [batch, samples].
    pub locations_1d_2: Tensor<B, 2, Int>,
    /// (row, col) correspondence locations in frame 1 [batch, samples, 2].
    pub locations_2d_1: Tensor<B, 3>,
    /// (row, col) correspondence locations in frame 2 [batch, samples, 2].
    pub locations_2d_2: Tensor<B, 3>,
    /// Ground-truth heatmaps of frame 1 [batch, 1, height, width].
    pub heatmaps_1: Tensor<B, 4>,
    /// Ground-truth heatmaps of frame 2 [batch, 1, height, width].
    pub heatmaps_2: Tensor<B, 4>,
    /// Validity masks [batch, 1, height, width].
    pub boundaries: Tensor<B, 4>,
    /// Sequence folder of every sample.
    pub folders: Vec<String>,
    /// Frame file names of every sample.
    pub frame_names: Vec<[String; 2]>,
}

impl<B: Backend> FramePairBatch<B> {
    /// Stack host samples into a batch.
    ///
    /// All items must share the image size and the sampling size.
    pub fn from_items(items: &[FramePairItem], device: &B::Device) -> Self {
        let batch = items.len();
        let (height, width, samples) = items
            .first()
            .map(|item| (item.height, item.width, item.sampling_size()))
            .unwrap_or_default();

        let images = |channels: usize, field: fn(&FramePairItem) -> &Vec<f32>| {
            let values: Vec<f32> = items.iter().flat_map(|item| field(item).iter().copied()).collect();
            Tensor::<B, 4>::from_data(TensorData::new(values, [batch, channels, height, width]), device)
        };
        let flat_locations = |field: fn(&FramePairItem) -> &Vec<i64>| {
            let values: Vec<i64> = items.iter().flat_map(|item| field(item).iter().copied()).collect();
            Tensor::<B, 2, Int>::from_data(TensorData::new(values, [batch, samples]), device)
        };
        let grid_locations = |field: fn(&FramePairItem) -> &Vec<[f32; 2]>| {
            let values: Vec<f32> = items
                .iter()
                .flat_map(|item| field(item).iter().flat_map(|location| *location))
                .collect();
            Tensor::<B, 3>::from_data(TensorData::new(values, [batch, samples, 2]), device)
        };

        Self {
            colors_1: images(3, |item| &item.colors_1),
            colors_2: images(3, |item| &item.colors_2),
            locations_1d_1: flat_locations(|item| &item.locations_1d_1),
            locations_1d_2: flat_locations(|item| &item.locations_1d_2),
            locations_2d_1: grid_locations(|item| &item.locations_2d_1),
            locations_2d_2: grid_locations(|item| &item.locations_2d_2),
            heatmaps_1: images(1, |item| &item.heatmaps_1),
            heatmaps_2: images(1, |item| &item.heatmaps_2),
            boundaries: images(1, |item| &item.boundary),
            folders: items.iter().map(|item| item.folder.clone()).collect(),
            frame_names: items.iter().map(|item| item.frame_names.clone()).collect(),
        }
    }

    /// Number of pairs in the batch.
    pub fn len(&self) -> usize {
        self.folders.len()
    }

    /// Whether the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.folders.is_empty()
    }
}

/// Batcher turning [`FramePairItem`]s into [`FramePairBatch`]es on a fixed device.
#[derive(Clone, Debug)]
pub struct FramePairBatcher<B: Backend> {
    device: B::Device,
}

impl<B: Backend> FramePairBatcher<B> {
    /// Create a batcher targeting `device`.
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

impl<B: Backend> Batcher<FramePairItem, FramePairBatch<B>> for FramePairBatcher<B> {
    fn batch(&self, items: Vec<FramePairItem>) -> FramePairBatch<B> {
        FramePairBatch::from_items(&items, &self.device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PairDataConfig;
    use crate::data::{PairSource, SyntheticPairSource};
    use crate::training::sample_rng;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_batch_shapes() {
        let config = PairDataConfig::new()
            .with_input_size([12, 16])
            .with_sampling_size(3)
            .with_adjacent_range([1, 2]);
        let source = SyntheticPairSource::new(&config, 2, 6, 4);
        let items: Vec<FramePairItem> = (0..2)
            .filter_map(|i| source.sample(i, &mut sample_rng(1, i)))
            .collect();

        let batcher = FramePairBatcher::<TestBackend>::new(Default::default());
        let batch = batcher.batch(items.clone());

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.colors_1.dims(), [2, 3, 12, 16]);
        assert_eq!(batch.locations_1d_2.dims(), [2, 3]);
        assert_eq!(batch.locations_2d_1.dims(), [2, 3, 2]);
        assert_eq!(batch.boundaries.dims(), [2, 1, 12, 16]);

        let locations: Vec<i64> = batch.locations_1d_1.into_data().iter::<i64>().collect();
        assert_eq!(&locations[3..], items[1].locations_1d_1.as_slice());
        let grid: Vec<f32> = batch.locations_2d_2.into_data().iter::<f32>().collect();
        assert_eq!(grid[0], items[0].locations_2d_2[0][0]);
        assert_eq!(grid[1], items[0].locations_2d_2[0][1]);
    }
}
