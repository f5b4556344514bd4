//! Tile Difference Kernels
//!
//! Per-tile comparison of the current frame against the previous one.
//! Two interchangeable backends: a rayon-parallel CPU kernel (always
//! available, the reference implementation) and a wgpu compute kernel
//! behind the `gpu` feature. The GPU backend is validated against the
//! CPU one; both produce identical signals for identical frames.
//!
//! # Protocol
//!
//! One tick is an explicit two-phase exchange:
//!
//! ```text
//! seed(frame)                    first tick only, previous <- frame
//! dispatch(frame)                upload current, run the comparison
//! readback(&mut signals)        synchronize, collect, previous <- current
//! ```
//!
//! A dispatched tick may be abandoned before `readback`; per-tick outputs
//! are overwritten by the next dispatch, and the previous frame only
//! rotates when `readback` completes.

use crate::error::Result;
use crate::frame::Frame;
use crate::grid::TileGrid;

pub mod cpu;
#[cfg(feature = "gpu")]
pub mod gpu;

pub use cpu::CpuDiffKernel;
#[cfg(feature = "gpu")]
pub use gpu::GpuDiffKernel;

/// Red weight of the ITU-R BT.601 luminance transform
pub const LUMA_R: f32 = 0.299;
/// Green weight of the ITU-R BT.601 luminance transform
pub const LUMA_G: f32 = 0.587;
/// Blue weight of the ITU-R BT.601 luminance transform
pub const LUMA_B: f32 = 0.114;

/// Per-tick kernel outputs, overwritten on every readback
#[derive(Debug, Clone, Default)]
pub struct TileSignals {
    /// Per-tile count of pixels whose per-channel difference exceeded
    /// the configured delta
    pub changed_pixels: Vec<u32>,

    /// Per-tile mean luminance of the current frame, 0..1
    pub brightness: Vec<f32>,

    /// Per-bounding-area count of tiles with at least one changed pixel
    /// above the raw significance bar
    pub area_changed_tiles: Vec<u32>,
}

impl TileSignals {
    /// Allocate buffers for a grid
    pub fn for_grid(grid: &TileGrid) -> Self {
        let mut signals = Self::default();
        signals.resize_for(grid);
        signals
    }

    /// Resize buffers for a grid, zeroing all values
    pub fn resize_for(&mut self, grid: &TileGrid) {
        self.changed_pixels.clear();
        self.changed_pixels.resize(grid.tile_count(), 0);
        self.brightness.clear();
        self.brightness.resize(grid.tile_count(), 0.0);
        self.area_changed_tiles.clear();
        self.area_changed_tiles.resize(grid.area_count(), 0);
    }
}

/// Per-tile frame comparison backend
pub trait DiffKernel: Send {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Rebuild internal buffers for a new grid, dropping all frame state
    fn resize(&mut self, grid: &TileGrid) -> Result<()>;

    /// Store `frame` as the previous frame without producing signals
    fn seed(&mut self, frame: &Frame) -> Result<()>;

    /// Whether a previous frame is held
    fn is_seeded(&self) -> bool;

    /// Phase one: make `frame` current and run the per-tile comparison
    ///
    /// Requires a seeded kernel. Tiles are independent; the comparison
    /// covers every tile in a single parallel dispatch.
    fn dispatch(&mut self, frame: &Frame) -> Result<()>;

    /// Phase two: wait for the comparison, fill `signals`, and rotate
    /// the previous frame
    ///
    /// Every GPU write is complete before any host read returns.
    fn readback(&mut self, signals: &mut TileSignals) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signals_sized_for_grid() {
        let grid = TileGrid::new(640, 480, 32, 10, 10);
        let signals = TileSignals::for_grid(&grid);
        assert_eq!(signals.changed_pixels.len(), grid.tile_count());
        assert_eq!(signals.brightness.len(), grid.tile_count());
        assert_eq!(signals.area_changed_tiles.len(), grid.area_count());
    }

    #[test]
    fn test_resize_zeroes_values() {
        let grid = TileGrid::new(64, 64, 32, 2, 2);
        let mut signals = TileSignals::for_grid(&grid);
        signals.changed_pixels[0] = 7;
        signals.brightness[0] = 0.5;

        signals.resize_for(&grid);
        assert_eq!(signals.changed_pixels[0], 0);
        assert_eq!(signals.brightness[0], 0.0);
    }
}
