//! Paired-frame samples and their sources.

use std::sync::Arc;

use burn::data::dataset::Dataset;
use rand::rngs::StdRng;

use crate::error::{DescriptorError, Result};
use crate::training::sample_rng;

/// One pair of frames with ground-truth correspondences, on the host.
///
/// Images are row-major: colors are `[3, height, width]`, heatmaps and the
/// boundary are `[height, width]`. Location lists are positionally aligned:
/// entry `i` of frame 1 corresponds to entry `i` of frame 2.
#[derive(Debug, Clone, PartialEq)]
pub struct FramePairItem {
    /// Image height.
    pub height: usize,
    /// Image width.
    pub width: usize,
    /// First color frame.
    pub colors_1: Vec<f32>,
    /// Second color frame.
    pub colors_2: Vec<f32>,
    /// Flattened `row * width + col` correspondence locations in frame 1.
    pub locations_1d_1: Vec<i64>,
    /// Flattened correspondence locations in frame 2.
    pub locations_1d_2: Vec<i64>,
    /// (row, col) correspondence locations in frame 1.
    pub locations_2d_1: Vec<[f32; 2]>,
    /// (row, col) correspondence locations in frame 2.
    pub locations_2d_2: Vec<[f32; 2]>,
    /// Ground-truth heatmap of frame 1.
    pub heatmaps_1: Vec<f32>,
    /// Ground-truth heatmap of frame 2.
    pub heatmaps_2: Vec<f32>,
    /// Validity mask, 1 valid and 0 invalid.
    pub boundary: Vec<f32>,
    /// Sequence folder the frames come from.
    pub folder: String,
    /// File names of both frames.
    pub frame_names: [String; 2],
}

impl FramePairItem {
    /// Number of correspondences.
    pub fn sampling_size(&self) -> usize {
        self.locations_1d_1.len()
    }

    /// Check that every buffer matches the image size and sampling size.
    pub fn validate(&self) -> Result<()> {
        let pixels = self.height * self.width;
        let samples = self.sampling_size();

        let image_sizes = [
            ("colors_1", self.colors_1.len(), 3 * pixels),
            ("colors_2", self.colors_2.len(), 3 * pixels),
            ("heatmaps_1", self.heatmaps_1.len(), pixels),
            ("heatmaps_2", self.heatmaps_2.len(), pixels),
            ("boundary", self.boundary.len(), pixels),
            ("locations_1d_2", self.locations_1d_2.len(), samples),
            ("locations_2d_1", self.locations_2d_1.len(), samples),
            ("locations_2d_2", self.locations_2d_2.len(), samples),
        ];
        for (name, actual, expected) in image_sizes {
            if actual != expected {
                return Err(DescriptorError::InvalidData(format!(
                    "{} has {} values, expected {}",
                    name, actual, expected
                )));
            }
        }

        let in_range = |locations: &[i64]| locations.iter().all(|&l| l >= 0 && (l as usize) < pixels);
        if !in_range(&self.locations_1d_1) || !in_range(&self.locations_1d_2) {
            return Err(DescriptorError::InvalidData(format!(
                "correspondence location outside a {}x{} image",
                self.height, self.width
            )));
        }
        Ok(())
    }
}

/// Collaborator producing paired-frame samples.
///
/// Randomness must come from `rng` only, so a sample depends on nothing but
/// its index and the generator state handed in.
pub trait PairSource: Send + Sync {
    /// Number of samples per epoch.
    fn len(&self) -> usize;

    /// Whether the source is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Produce sample `index`.
    fn sample(&self, index: usize, rng: &mut StdRng) -> Option<FramePairItem>;
}

/// A pair source bound to one seed, as a Burn dataset.
///
/// Sample `i` draws from a generator seeded with `(seed, i)`, independent of
/// the loader worker that fetches it.
#[derive(Clone)]
pub struct EpochDataset {
    source: Arc<dyn PairSource>,
    seed: u64,
}

impl EpochDataset {
    /// Bind `source` to `seed`.
    pub fn new(source: Arc<dyn PairSource>, seed: u64) -> Self {
        Self { source, seed }
    }

    /// The seed samples are derived from.
    pub fn seed(&self) -> u64 {
        self.seed
    }
}

impl Dataset<FramePairItem> for EpochDataset {
    fn get(&self, index: usize) -> Option<FramePairItem> {
        if index >= self.source.len() {
            return None;
        }
        let mut rng = sample_rng(self.seed, index);
        self.source.sample(index, &mut rng)
    }

    fn len(&self) -> usize {
        self.source.len()
    }
}
