//! Terminal visualization helpers
//!
//! Renders the display snapshot (the most recently generated block) as a level
//! bar or a small character oscilloscope.

use crate::waveform::{AudioBlock, MAX_AMPLITUDE};

/// Create a volume bar visualization
///
/// `amplitude` is clamped to 0.0..=1.0.
pub fn create_volume_bar(amplitude: f32, max_length: usize) -> String {
    let normalized = amplitude.clamp(0.0, 1.0);
    let block_count = (normalized * max_length as f32) as usize;
    let blocks = "█".repeat(block_count.min(max_length));
    let spaces = " ".repeat(max_length.saturating_sub(block_count));
    format!("{}{}", blocks, spaces)
}

/// Peak absolute level of a block, 0.0..=1.0
pub fn peak_level(block: &AudioBlock) -> f32 {
    let peak = block
        .samples()
        .iter()
        .map(|s| s.unsigned_abs())
        .max()
        .unwrap_or(0);
    (peak as f32 / MAX_AMPLITUDE as f32).min(1.0)
}

/// RMS level of a block, 0.0..=1.0
pub fn rms_level(block: &AudioBlock) -> f32 {
    if block.is_empty() {
        return 0.0;
    }
    let sum: f64 = block
        .samples()
        .iter()
        .map(|&s| {
            let v = s as f64 / MAX_AMPLITUDE as f64;
            v * v
        })
        .sum();
    (sum / block.len() as f64).sqrt().min(1.0) as f32
}

/// Render the block as `height` rows of `width` columns.
///
/// Each column shows the sample nearest its position in the block; row 0 is
/// the positive peak.
pub fn render_oscilloscope(block: &AudioBlock, width: usize, height: usize) -> Vec<String> {
    if width == 0 || height == 0 {
        return Vec::new();
    }
    let mut grid = vec![vec![' '; width]; height];
    let mid = (height - 1) as f32 / 2.0;
    if !block.is_empty() {
        for (col, column) in (0..width).map(|c| (c, c * block.len() / width)) {
            let value = block.samples()[column] as f32 / MAX_AMPLITUDE as f32;
            let row = (mid - value.clamp(-1.0, 1.0) * mid).round() as usize;
            grid[row.min(height - 1)][col] = '•';
        }
    }
    grid.into_iter().map(|row| row.into_iter().collect()).collect()
}
