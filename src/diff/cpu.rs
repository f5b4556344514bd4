//! CPU Diff Kernel
//!
//! Reference implementation of the per-tile comparison: a rayon parallel
//! loop over tiles, each walking its rows in both frames. Serves machines
//! without a usable GPU adapter and every deterministic test; the GPU
//! kernel is held to this kernel's outputs.

use rayon::prelude::*;

use crate::error::Result;
use crate::frame::Frame;
use crate::grid::TileGrid;

use super::{DiffKernel, TileSignals, LUMA_B, LUMA_G, LUMA_R};

/// Rayon-parallel tile comparison backend
pub struct CpuDiffKernel {
    pixel_delta: u8,
    grid: TileGrid,
    previous: Option<Frame>,
    current: Option<Frame>,
    /// Per-tile results of the last dispatch
    changed: Vec<u32>,
    brightness: Vec<f32>,
    /// Tile index -> bounding area index
    tile_area: Vec<u32>,
}

impl CpuDiffKernel {
    /// Create a kernel for a grid
    pub fn new(pixel_delta: u8, grid: &TileGrid) -> Self {
        let tile_count = grid.tile_count();
        let tile_area = (0..tile_count)
            .map(|i| grid.area_of_tile(i) as u32)
            .collect();
        Self {
            pixel_delta,
            grid: grid.clone(),
            previous: None,
            current: None,
            changed: vec![0; tile_count],
            brightness: vec![0.0; tile_count],
            tile_area,
        }
    }
}

impl DiffKernel for CpuDiffKernel {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn resize(&mut self, grid: &TileGrid) -> Result<()> {
        *self = Self::new(self.pixel_delta, grid);
        Ok(())
    }

    fn seed(&mut self, frame: &Frame) -> Result<()> {
        self.previous = Some(frame.clone());
        self.current = None;
        Ok(())
    }

    fn is_seeded(&self) -> bool {
        self.previous.is_some()
    }

    fn dispatch(&mut self, frame: &Frame) -> Result<()> {
        // Frame clones only bump the Bytes refcount
        let prev = self
            .previous
            .clone()
            .expect("dispatch on unseeded kernel");
        debug_assert!(prev.matches_layout(frame), "layout drift reaches dispatch");

        let grid = self.grid.clone();
        let delta = self.pixel_delta;
        self.changed
            .par_iter_mut()
            .zip(self.brightness.par_iter_mut())
            .enumerate()
            .for_each(|(index, (changed_out, brightness_out))| {
                let (c, b) = compare_tile(&prev, frame, &grid, delta, index);
                *changed_out = c;
                *brightness_out = b;
            });

        self.current = Some(frame.clone());
        Ok(())
    }

    fn readback(&mut self, signals: &mut TileSignals) -> Result<()> {
        debug_assert!(self.current.is_some(), "readback without dispatch");

        signals.changed_pixels.copy_from_slice(&self.changed);
        signals.brightness.copy_from_slice(&self.brightness);

        for tally in signals.area_changed_tiles.iter_mut() {
            *tally = 0;
        }
        for (index, &count) in self.changed.iter().enumerate() {
            if count > 0 {
                signals.area_changed_tiles[self.tile_area[index] as usize] += 1;
            }
        }

        // Frame rotation: previous <- current
        if let Some(current) = self.current.take() {
            self.previous = Some(current);
        }
        Ok(())
    }
}

/// Compare one tile between frames; returns (changed pixel count, mean
/// luminance of the current tile)
fn compare_tile(
    prev: &Frame,
    curr: &Frame,
    grid: &TileGrid,
    pixel_delta: u8,
    index: usize,
) -> (u32, f32) {
    let (x, y, w, h) = grid.tile_rect(index);
    if w == 0 || h == 0 {
        return (0, 0.0);
    }

    let (ro, go, bo) = curr.format.rgb_offsets();
    let x0 = x as usize * 4;
    let x1 = (x + w) as usize * 4;
    let delta = pixel_delta as i16;

    let mut changed = 0u32;
    let mut luma_sum = 0.0f64;

    for row in y..y + h {
        let prev_row = &prev.row(row)[x0..x1];
        let curr_row = &curr.row(row)[x0..x1];

        for (p, c) in prev_row.chunks_exact(4).zip(curr_row.chunks_exact(4)) {
            let dr = (p[ro] as i16 - c[ro] as i16).abs();
            let dg = (p[go] as i16 - c[go] as i16).abs();
            let db = (p[bo] as i16 - c[bo] as i16).abs();
            if dr > delta || dg > delta || db > delta {
                changed += 1;
            }

            luma_sum += (LUMA_R * c[ro] as f32
                + LUMA_G * c[go] as f32
                + LUMA_B * c[bo] as f32) as f64;
        }
    }

    let brightness = (luma_sum / (w as f64 * h as f64 * 255.0)) as f32;
    (changed, brightness)
}

// =============================================================================
// Tests
// =============================================================================
