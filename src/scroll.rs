//! Scroll Suppression
//!
//! Sustained wide-area change (scrolling text, video) produces a stream
//! of individually-eligible tiles whose refresh would be wasted work and
//! visually disruptive. Tiles are grouped into bounding areas; each area
//! keeps a one-bit-per-tick history of "significantly changed" flags in a
//! ring of `history_frames` bits. Once enough of the window is set, every
//! tile in the area is excluded from candidacy until the motion stops.
//!
//! The per-frame significance flag uses the raw (unsmoothed) changed-tile
//! tally so the suppressor reacts a tick ahead of the per-tile smoothing.

use crate::config::BoundingAreaConfig;
use crate::grid::TileGrid;

/// Per-bounding-area change history and blocking flags
pub struct ScrollSuppressor {
    /// History ring length in ticks
    history_frames: u32,

    /// Set bits in the window at which an area becomes blocked
    required_bits: u32,

    /// Changed-tile count making an area significant for one tick,
    /// clamped to each area's actual tile count
    sig_thresholds: Vec<u32>,

    /// Per-area history bitmask; only the low `history_frames` bits are
    /// meaningful
    history: Vec<u64>,

    /// Per-area blocked flag for the current tick
    blocked: Vec<bool>,
}

impl ScrollSuppressor {
    /// Build suppressor state for a grid
    pub fn new(config: &BoundingAreaConfig, grid: &TileGrid) -> Self {
        let required_bits = Self::required_bits(config);
        let sig_thresholds = Self::thresholds(config, grid);
        let areas = grid.area_count();
        Self {
            history_frames: config.history_frames,
            required_bits,
            sig_thresholds,
            history: vec![0; areas],
            blocked: vec![false; areas],
        }
    }

    fn required_bits(config: &BoundingAreaConfig) -> u32 {
        let bits = (config.block_ratio() * config.history_frames as f64).ceil() as u32;
        bits.clamp(1, config.history_frames)
    }

    fn thresholds(config: &BoundingAreaConfig, grid: &TileGrid) -> Vec<u32> {
        (0..grid.area_count())
            .map(|a| config.change_threshold.min(grid.area_tile_count(a)).max(1))
            .collect()
    }

    /// Discard history and rebuild thresholds for a new grid
    pub fn reset(&mut self, config: &BoundingAreaConfig, grid: &TileGrid) {
        self.history_frames = config.history_frames;
        self.required_bits = Self::required_bits(config);
        self.sig_thresholds = Self::thresholds(config, grid);
        let areas = grid.area_count();
        self.history.clear();
        self.history.resize(areas, 0);
        self.blocked.clear();
        self.blocked.resize(areas, false);
    }

    /// Record this tick's per-area changed-tile tallies and recompute
    /// blocked flags
    ///
    /// The bit at `frame % history_frames` is set when the tally meets
    /// the area's significance threshold and cleared otherwise, so stale
    /// entries age out as the ring wraps.
    pub fn observe(&mut self, frame: u64, area_changed_tiles: &[u32]) {
        debug_assert_eq!(area_changed_tiles.len(), self.history.len());

        let bit = frame % self.history_frames as u64;
        let window_mask = if self.history_frames >= 64 {
            u64::MAX
        } else {
            (1u64 << self.history_frames) - 1
        };

        for (a, &changed) in area_changed_tiles.iter().enumerate() {
            if changed >= self.sig_thresholds[a] {
                self.history[a] |= 1 << bit;
            } else {
                self.history[a] &= !(1 << bit);
            }
            self.history[a] &= window_mask;
            self.blocked[a] = self.history[a].count_ones() >= self.required_bits;
        }
    }

    /// Whether an area is blocked this tick
    #[inline]
    pub fn is_blocked(&self, area: usize) -> bool {
        self.blocked[area]
    }

    /// Per-area blocked flags for the current tick
    #[inline]
    pub fn blocked(&self) -> &[bool] {
        &self.blocked
    }

    /// Number of currently blocked areas
    pub fn blocked_count(&self) -> usize {
        self.blocked.iter().filter(|&&b| b).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn area_45x45() -> (BoundingAreaConfig, TileGrid) {
        let config = BoundingAreaConfig {
            width: 45,
            height: 45,
            history_frames: 3,
            change_threshold: 20,
            refresh_block_threshold: 1518,
        };
        // 1440x1440 at 32px tiles = exactly 45x45 tiles, one area
        let grid = TileGrid::new(1440, 1440, 32, 45, 45);
        (config, grid)
    }

    #[test]
    fn test_sustained_change_blocks_after_window_fills() {
        let (config, grid) = area_45x45();
        let mut suppressor = ScrollSuppressor::new(&config, &grid);
        assert_eq!(grid.area_count(), 1);

        // 40 tiles changing per tick: significant, but blocking needs
        // the full 3-tick window at a 75% ratio
        suppressor.observe(2, &[40]);
        assert!(!suppressor.is_blocked(0));
        suppressor.observe(3, &[40]);
        assert!(!suppressor.is_blocked(0));
        suppressor.observe(4, &[40]);
        assert!(suppressor.is_blocked(0));
        suppressor.observe(5, &[40]);
        assert!(suppressor.is_blocked(0));
    }

    #[test]
    fn test_block_lifts_when_motion_stops() {
        let (config, grid) = area_45x45();
        let mut suppressor = ScrollSuppressor::new(&config, &grid);

        for frame in 2..8 {
            suppressor.observe(frame, &[40]);
        }
        assert!(suppressor.is_blocked(0));

        // One quiet tick drops the window below 3 of 3
        suppressor.observe(8, &[0]);
        assert!(!suppressor.is_blocked(0));
    }

    #[test]
    fn test_insignificant_change_never_blocks() {
        let (config, grid) = area_45x45();
        let mut suppressor = ScrollSuppressor::new(&config, &grid);

        for frame in 2..20 {
            suppressor.observe(frame, &[19]);
        }
        assert!(!suppressor.is_blocked(0));
    }

    #[test]
    fn test_ring_wraparound_ages_out_old_bits() {
        let (config, grid) = area_45x45();
        let mut suppressor = ScrollSuppressor::new(&config, &grid);

        // Significant at frames 2 and 3, quiet at 4: bits 2, 0 set
        suppressor.observe(2, &[40]);
        suppressor.observe(3, &[40]);
        suppressor.observe(4, &[0]);
        assert!(!suppressor.is_blocked(0));

        // Frame 5 overwrites frame 2's slot (both mod 3 = 2)
        suppressor.observe(5, &[40]);
        assert!(!suppressor.is_blocked(0));
        suppressor.observe(6, &[40]);
        assert!(!suppressor.is_blocked(0));
        suppressor.observe(7, &[40]);
        assert!(suppressor.is_blocked(0));
    }

    #[test]
    fn test_edge_area_threshold_clamped() {
        let config = BoundingAreaConfig {
            width: 8,
            height: 8,
            history_frames: 2,
            change_threshold: 20,
            refresh_block_threshold: 64,
        };
        // 10x10 tiles with 8x8 areas: area 3 is 2x2 = 4 tiles, well
        // below change_threshold, so the clamp makes it suppressible
        let grid = TileGrid::new(320, 320, 32, 8, 8);
        assert_eq!(grid.area_count(), 4);
        assert_eq!(grid.area_tile_count(3), 4);

        let mut suppressor = ScrollSuppressor::new(&config, &grid);
        suppressor.observe(2, &[0, 0, 0, 4]);
        suppressor.observe(3, &[0, 0, 0, 4]);
        assert!(suppressor.is_blocked(3));
        assert!(!suppressor.is_blocked(0));
    }

    #[test]
    fn test_reset_clears_history() {
        let (config, grid) = area_45x45();
        let mut suppressor = ScrollSuppressor::new(&config, &grid);
        for frame in 2..6 {
            suppressor.observe(frame, &[40]);
        }
        assert!(suppressor.is_blocked(0));

        suppressor.reset(&config, &grid);
        assert!(!suppressor.is_blocked(0));
        suppressor.observe(2, &[40]);
        assert!(!suppressor.is_blocked(0));
    }
}
