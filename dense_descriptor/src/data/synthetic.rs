//! Procedural endoscope-like frame pairs.
//!
//! Every sequence is a camera sliding over a fixed procedural texture. Frame
//! `t` shows the texture shifted by an integer offset that wobbles with `t`,
//! so correspondences between any two frames of a sequence are exact pixel
//! translations. A circular mask stands in for the endoscope field of view.

use rand::rngs::StdRng;
use rand::Rng;

use super::{gaussian_heatmap, FramePairItem, PairSource};
use crate::config::PairDataConfig;

/// Maximum frame offset as a fraction of the shorter image side.
const WOBBLE_FRACTION: f32 = 0.12;

/// Boundary radius as a fraction of the shorter image side.
const BOUNDARY_FRACTION: f32 = 0.45;

/// Correspondence draws per requested sample before falling back to the center.
const ATTEMPTS_PER_SAMPLE: usize = 50;

/// Reproducible sequences of shifted views inside a circular boundary.
#[derive(Debug, Clone)]
pub struct SyntheticPairSource {
    height: usize,
    width: usize,
    sampling_size: usize,
    adjacent_range: [usize; 2],
    heatmap_sigma: f32,
    num_sequences: usize,
    frames_per_sequence: usize,
    num_pairs: usize,
    boundary: Vec<f32>,
}

impl SyntheticPairSource {
    /// Create a source of `num_pairs` pairs drawn from `num_sequences`
    /// sequences of `frames_per_sequence` frames.
    pub fn new(
        config: &PairDataConfig,
        num_sequences: usize,
        frames_per_sequence: usize,
        num_pairs: usize,
    ) -> Self {
        let [height, width] = config.input_size;
        Self {
            height,
            width,
            sampling_size: config.sampling_size,
            adjacent_range: config.adjacent_range,
            heatmap_sigma: config.heatmap_sigma,
            num_sequences: num_sequences.max(1),
            frames_per_sequence: frames_per_sequence.max(2),
            num_pairs,
            boundary: circular_boundary(height, width),
        }
    }

    /// The shared boundary mask.
    pub fn boundary(&self) -> &[f32] {
        &self.boundary
    }

    /// Texture offset (rows, cols) of a frame.
    pub fn offset(&self, sequence: usize, frame: usize) -> [i64; 2] {
        let amplitude = self.height.min(self.width) as f32 * WOBBLE_FRACTION;
        let t = frame as f32;
        let phase = sequence as f32;
        [
            (amplitude * (0.07 * t + 2.0 * phase).sin()).round() as i64,
            (amplitude * (0.11 * t + phase).sin()).round() as i64,
        ]
    }

    /// Render frame `frame` of `sequence` as `[3, height, width]`.
    pub fn render(&self, sequence: usize, frame: usize) -> Vec<f32> {
        let [row_offset, col_offset] = self.offset(sequence, frame);
        let pixels = self.height * self.width;
        let mut image = vec![0.0f32; 3 * pixels];

        for channel in 0..3 {
            for row in 0..self.height {
                for col in 0..self.width {
                    let world_row = row as i64 + row_offset;
                    let world_col = col as i64 + col_offset;
                    image[channel * pixels + row * self.width + col] =
                        texture(sequence, channel, world_row, world_col);
                }
            }
        }

        image
    }

    fn is_valid(&self, row: i64, col: i64) -> bool {
        row >= 0
            && col >= 0
            && (row as usize) < self.height
            && (col as usize) < self.width
            && self.boundary[row as usize * self.width + col as usize] > 0.5
    }

    fn choose_frames(&self, rng: &mut StdRng) -> (usize, usize, usize) {
        let sequence = rng.gen_range(0..self.num_sequences);
        let max_gap = self.adjacent_range[1].min(self.frames_per_sequence - 1);
        let min_gap = self.adjacent_range[0].clamp(1, max_gap);
        let gap = rng.gen_range(min_gap..=max_gap);
        let first = rng.gen_range(0..self.frames_per_sequence - gap);
        (sequence, first, first + gap)
    }

    fn correspondences(&self, shift: [i64; 2], rng: &mut StdRng) -> Vec<([i64; 2], [i64; 2])> {
        let mut pairs = Vec::with_capacity(self.sampling_size);

        for _ in 0..self.sampling_size * ATTEMPTS_PER_SAMPLE {
            if pairs.len() == self.sampling_size {
                break;
            }
            let row = rng.gen_range(0..self.height) as i64;
            let col = rng.gen_range(0..self.width) as i64;
            let target = [row + shift[0], col + shift[1]];
            if self.is_valid(row, col) && self.is_valid(target[0], target[1]) {
                pairs.push(([row, col], target));
            }
        }

        // The wobble never moves the center out of the boundary.
        let center = [(self.height / 2) as i64, (self.width / 2) as i64];
        while pairs.len() < self.sampling_size {
            pairs.push((center, [center[0] + shift[0], center[1] + shift[1]]));
        }

        pairs
    }
}

impl PairSource for SyntheticPairSource {
    fn len(&self) -> usize {
        self.num_pairs
    }

    fn sample(&self, index: usize, rng: &mut StdRng) -> Option<FramePairItem> {
        if index >= self.num_pairs {
            return None;
        }
        let (sequence, frame_1, frame_2) = self.choose_frames(rng);

        // A pixel of frame 1 shows texture point p + o1, found in frame 2 at p + o1 - o2.
        let [row_1, col_1] = self.offset(sequence, frame_1);
        let [row_2, col_2] = self.offset(sequence, frame_2);
        let pairs = self.correspondences([row_1 - row_2, col_1 - col_2], rng);

        let flat = |[row, col]: [i64; 2]| row * self.width as i64 + col;
        let grid = |[row, col]: [i64; 2]| [row as f32, col as f32];
        let locations_2d_1: Vec<[f32; 2]> = pairs.iter().map(|(a, _)| grid(*a)).collect();
        let locations_2d_2: Vec<[f32; 2]> = pairs.iter().map(|(_, b)| grid(*b)).collect();

        Some(FramePairItem {
            height: self.height,
            width: self.width,
            colors_1: self.render(sequence, frame_1),
            colors_2: self.render(sequence, frame_2),
            locations_1d_1: pairs.iter().map(|(a, _)| flat(*a)).collect(),
            locations_1d_2: pairs.iter().map(|(_, b)| flat(*b)).collect(),
            heatmaps_1: gaussian_heatmap(&locations_2d_1, self.height, self.width, self.heatmap_sigma),
            heatmaps_2: gaussian_heatmap(&locations_2d_2, self.height, self.width, self.heatmap_sigma),
            locations_2d_1,
            locations_2d_2,
            boundary: self.boundary.clone(),
            folder: format!("sequence_{:02}", sequence),
            frame_names: [format!("{:08}.jpg", frame_1), format!("{:08}.jpg", frame_2)],
        })
    }
}

fn circular_boundary(height: usize, width: usize) -> Vec<f32> {
    let radius = height.min(width) as f32 * BOUNDARY_FRACTION;
    let center_row = height as f32 / 2.0;
    let center_col = width as f32 / 2.0;

    let mut boundary = vec![0.0f32; height * width];
    for row in 0..height {
        for col in 0..width {
            let d_row = row as f32 - center_row;
            let d_col = col as f32 - center_col;
            if (d_row * d_row + d_col * d_col).sqrt() <= radius {
                boundary[row * width + col] = 1.0;
            }
        }
    }
    boundary
}

/// Smooth shading plus hashed per-texel noise, in [0, 1].
fn texture(sequence: usize, channel: usize, row: i64, col: i64) -> f32 {
    let r = row as f32;
    let c = col as f32;
    let k = channel as f32;
    let shading = 0.5 + 0.5 * ((0.31 + 0.05 * k) * r + 0.17 * c + k).sin() * (0.23 * c - 0.11 * r).cos();

    let key = (sequence as u64)
        .wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ (channel as u64).wrapping_mul(0xC2B2_AE3D_27D4_EB4F)
        ^ (row as u64).wrapping_mul(0x1656_67B1_9E37_79F9)
        ^ (col as u64).wrapping_mul(0x27D4_EB2F_1656_67C5);
    let noise = (hash(key) >> 40) as f32 / (1u64 << 24) as f32;

    0.5 * shading + 0.5 * noise
}

fn hash(mut x: u64) -> u64 {
    x ^= x >> 33;
    x = x.wrapping_mul(0xFF51_AFD7_ED55_8CCD);
    x ^= x >> 33;
    x = x.wrapping_mul(0xC4CE_B9FE_1A85_EC53);
    x ^ (x >> 33)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::sample_rng;

    fn source() -> SyntheticPairSource {
        let config = PairDataConfig::new()
            .with_input_size([24, 32])
            .with_sampling_size(6)
            .with_adjacent_range([1, 10]);
        SyntheticPairSource::new(&config, 3, 20, 8)
    }

    #[test]
    fn test_sample_is_valid_and_reproducible() {
        let source = source();
        let a = source.sample(3, &mut sample_rng(5, 3)).unwrap();
        let b = source.sample(3, &mut sample_rng(5, 3)).unwrap();

        assert!(a.validate().is_ok());
        assert_eq!(a, b);
        assert_eq!(a.sampling_size(), 6);
        assert!(source.sample(8, &mut sample_rng(5, 8)).is_none());
    }

    #[test]
    fn test_correspondences_are_exact() {
        let source = source();
        let item = source.sample(0, &mut sample_rng(11, 0)).unwrap();
        let pixels = item.height * item.width;

        for (&l1, &l2) in item.locations_1d_1.iter().zip(item.locations_1d_2.iter()) {
            assert_eq!(item.boundary[l1 as usize], 1.0);
            assert_eq!(item.boundary[l2 as usize], 1.0);
            for channel in 0..3 {
                assert_eq!(
                    item.colors_1[channel * pixels + l1 as usize],
                    item.colors_2[channel * pixels + l2 as usize]
                );
            }
        }
    }

    #[test]
    fn test_pairs_respect_adjacent_range() {
        let source = source();
        for index in 0..8 {
            let item = source.sample(index, &mut sample_rng(2, index)).unwrap();
            let frames: Vec<usize> = item
                .frame_names
                .iter()
                .map(|name| name.trim_end_matches(".jpg").parse().unwrap())
                .collect();
            let gap = frames[1] - frames[0];
            assert!((1..=10).contains(&gap));
        }
    }
}
