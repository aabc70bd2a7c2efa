//! Ground-truth heatmaps.

/// Render the maximum of unit Gaussians centered at `locations`.
///
/// Locations are (row, col); the result is a row-major `height * width` image
/// in [0, 1]. Used for display only.
pub fn gaussian_heatmap(locations: &[[f32; 2]], height: usize, width: usize, sigma: f32) -> Vec<f32> {
    let mut heatmap = vec![0.0f32; height * width];
    if locations.is_empty() || sigma <= 0.0 {
        return heatmap;
    }
    let denominator = 2.0 * sigma * sigma;

    for row in 0..height {
        for col in 0..width {
            let peak = locations
                .iter()
                .map(|[r, c]| {
                    let d_row = row as f32 - r;
                    let d_col = col as f32 - c;
                    (-(d_row * d_row + d_col * d_col) / denominator).exp()
                })
                .fold(0.0f32, f32::max);
            heatmap[row * width + col] = peak;
        }
    }

    heatmap
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peaks_at_locations() {
        let heatmap = gaussian_heatmap(&[[2.0, 3.0], [7.0, 1.0]], 10, 8, 1.5);
        assert_eq!(heatmap[2 * 8 + 3], 1.0);
        assert_eq!(heatmap[7 * 8 + 1], 1.0);
        assert!(heatmap[2 * 8 + 4] < 1.0 && heatmap[2 * 8 + 4] > 0.5);
        assert!(heatmap.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_empty_locations() {
        assert!(gaussian_heatmap(&[], 4, 4, 2.0).iter().all(|&v| v == 0.0));
    }
}
