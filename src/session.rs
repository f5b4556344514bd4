//! Capture Session
//!
//! One session owns the full pipeline for a single display: frame source,
//! diff kernel, per-tile decision state and scroll suppression, plus the
//! monotonic frame counter every downstream deadline is measured against.
//! All cross-tile state lives here rather than in globals, so independent
//! displays run independent sessions.
//!
//! # Architecture
//!
//! ```text
//!  FrameSource --capture--> [geometry/layout checks]
//!       |                          |
//!       v                          v
//!  DiffKernel.dispatch ----> DiffKernel.readback --> TileSignals
//!                                                        |
//!                        ScrollSuppressor.observe <------+
//!                                  |                     |
//!                                  v                     v
//!                        TileDecisionEngine.evaluate --> TickOutput
//! ```
//!
//! `advance` runs one tick of that pipeline synchronously; the async
//! runner layer schedules it on a cadence.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::EngineConfig;
use crate::decision::TileDecisionEngine;
use crate::diff::{CpuDiffKernel, DiffKernel, TileSignals};
use crate::error::Result;
use crate::frame::{Frame, PixelFormat};
use crate::grid::{TileCoord, TileGrid};
use crate::scroll::ScrollSuppressor;
use crate::source::{FrameSource, SourceEvent};

// =============================================================================
// TickOutput
// =============================================================================

/// Result of one pipeline tick
#[derive(Debug, Clone)]
pub struct TickOutput {
    /// Frame number this output belongs to
    pub frame: u64,

    /// Tiles to refresh this tick, in row-major tile order
    pub tiles: Vec<TileCoord>,

    /// Per-tile mean luminance (0.0 black to 1.0 white) from the most
    /// recent comparison, indexed by linear tile id
    pub brightness: Vec<f32>,

    /// Tick produced no comparison (capture timeout or cancellation)
    pub skipped: bool,
}

// =============================================================================
// SessionStats
// =============================================================================

/// Session statistics
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    /// Ticks that ran the full pipeline
    pub ticks_processed: u64,

    /// Ticks skipped on capture timeout or cancellation
    pub ticks_skipped: u64,

    /// Ticks that only seeded the previous-frame store
    pub seed_ticks: u64,

    /// Grid rebuilds after a display size change
    pub geometry_rebuilds: u64,

    /// Reseeds after a stride or pixel-format change
    pub format_reseeds: u64,

    /// Refresh candidates emitted over the session
    pub candidates_emitted: u64,

    /// Tile evaluations that ran under an active scroll block
    pub tiles_suppressed: u64,

    /// Total time spent in `advance` (nanoseconds)
    pub total_tick_time_ns: u64,
}

impl SessionStats {
    /// Average full-pipeline tick time in milliseconds
    pub fn avg_tick_time_ms(&self) -> f64 {
        if self.ticks_processed == 0 {
            0.0
        } else {
            (self.total_tick_time_ns as f64 / self.ticks_processed as f64) / 1_000_000.0
        }
    }
}

// =============================================================================
// CaptureSession
// =============================================================================

/// Change-detection pipeline for one display
pub struct CaptureSession {
    config: EngineConfig,
    source: Box<dyn FrameSource>,
    kernel: Box<dyn DiffKernel>,
    grid: TileGrid,
    decision: TileDecisionEngine,
    suppressor: ScrollSuppressor,
    signals: TileSignals,

    /// Bounding area of each tile, cached for the suppression expansion
    tile_area: Vec<usize>,
    /// Per-tile suppression flags for the current tick
    suppressed: Vec<bool>,
    /// Scratch for candidate indices, reused across ticks
    candidates: Vec<usize>,

    /// Monotonic tick counter; never rewinds within a session, even
    /// across geometry rebuilds, so downstream deadlines stay valid
    frame_counter: u64,
    /// Stride and format of the seeded frame store
    frame_layout: Option<(u32, PixelFormat)>,
    capture_timeout: Duration,

    stats: Arc<RwLock<SessionStats>>,
}

impl CaptureSession {
    /// Create a session with the default kernel for this build
    ///
    /// With the `gpu` feature the GPU kernel is tried first and the CPU
    /// kernel is the fallback when no adapter is usable; without it the
    /// CPU kernel is used directly.
    ///
    /// # Errors
    /// Returns [`crate::EngineError::InvalidConfig`] when the
    /// configuration fails validation.
    pub fn new(
        config: EngineConfig,
        source: Box<dyn FrameSource>,
        width: u32,
        height: u32,
        capture_timeout: Duration,
    ) -> Result<Self> {
        config.validate()?;
        let grid = Self::grid_for(&config, width, height);
        let kernel = default_kernel(config.pixel_delta, &grid);
        Self::assemble(config, source, kernel, grid, capture_timeout)
    }

    /// Create a session with an explicit kernel
    ///
    /// # Errors
    /// Returns [`crate::EngineError::InvalidConfig`] when the
    /// configuration fails validation.
    pub fn with_kernel(
        config: EngineConfig,
        source: Box<dyn FrameSource>,
        mut kernel: Box<dyn DiffKernel>,
        width: u32,
        height: u32,
        capture_timeout: Duration,
    ) -> Result<Self> {
        config.validate()?;
        let grid = Self::grid_for(&config, width, height);
        kernel.resize(&grid)?;
        Self::assemble(config, source, kernel, grid, capture_timeout)
    }

    fn grid_for(config: &EngineConfig, width: u32, height: u32) -> TileGrid {
        TileGrid::new(
            width,
            height,
            config.tile_size,
            config.bounding_area.width,
            config.bounding_area.height,
        )
    }

    fn assemble(
        config: EngineConfig,
        source: Box<dyn FrameSource>,
        kernel: Box<dyn DiffKernel>,
        grid: TileGrid,
        capture_timeout: Duration,
    ) -> Result<Self> {
        let tile_count = grid.tile_count();
        let decision = TileDecisionEngine::new(&config, tile_count);
        let suppressor = ScrollSuppressor::new(&config.bounding_area, &grid);
        let signals = TileSignals::for_grid(&grid);
        let tile_area = (0..tile_count).map(|i| grid.area_of_tile(i)).collect();

        info!(
            width = grid.width,
            height = grid.height,
            tiles_x = grid.tiles_x,
            tiles_y = grid.tiles_y,
            areas_x = grid.areas_x,
            areas_y = grid.areas_y,
            kernel = kernel.name(),
            "capture session created"
        );

        Ok(Self {
            config,
            source,
            kernel,
            grid,
            decision,
            suppressor,
            signals,
            tile_area,
            suppressed: vec![false; tile_count],
            candidates: Vec::new(),
            frame_counter: 0,
            frame_layout: None,
            capture_timeout,
            stats: Arc::new(RwLock::new(SessionStats::default())),
        })
    }

    /// Current tile/area geometry
    pub fn grid(&self) -> &TileGrid {
        &self.grid
    }

    /// Backend name of the active diff kernel
    pub fn kernel_name(&self) -> &'static str {
        self.kernel.name()
    }

    /// Next frame number to be processed
    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    /// Snapshot of the session statistics
    pub fn stats(&self) -> SessionStats {
        self.stats.read().clone()
    }

    /// Shared handle for reading statistics from other tasks
    pub fn stats_handle(&self) -> Arc<RwLock<SessionStats>> {
        Arc::clone(&self.stats)
    }

    /// Run one tick of the pipeline
    ///
    /// Captures a frame, compares it against the stored previous frame,
    /// and returns the refresh candidates. A capture timeout or a
    /// cancellation observed mid-tick yields a skipped output; the seed
    /// tick after session start, a geometry rebuild or a layout change
    /// yields an empty (non-skipped) output.
    ///
    /// # Errors
    /// Fails when the source disconnects, a frame is malformed, or the
    /// kernel loses its device.
    pub fn advance(&mut self, cancel: &CancellationToken) -> Result<TickOutput> {
        if cancel.is_cancelled() {
            return Ok(self.skipped_output());
        }

        let frame = match self.source.capture(self.capture_timeout)? {
            SourceEvent::Frame(frame) => frame,
            SourceEvent::Timeout => {
                trace!(frame = self.frame_counter, "capture timed out, skipping tick");
                self.stats.write().ticks_skipped += 1;
                return Ok(self.skipped_output());
            }
        };
        let started = Instant::now();

        if frame.width != self.grid.width || frame.height != self.grid.height {
            self.rebuild_geometry(&frame)?;
        }

        let drifted = self
            .frame_layout
            .is_some_and(|(stride, format)| stride != frame.stride || format != frame.format);
        if drifted {
            warn!(
                stride = frame.stride,
                format = ?frame.format,
                "frame layout changed mid-session, reseeding"
            );
            self.stats.write().format_reseeds += 1;
        }
        if drifted || !self.kernel.is_seeded() {
            return self.seed_tick(&frame);
        }

        self.kernel.dispatch(&frame)?;

        if cancel.is_cancelled() {
            // Abandon mid-flight: nothing was read back and the previous
            // frame was not rotated, so the next dispatch simply
            // overwrites this tick's GPU outputs.
            debug!(frame = self.frame_counter, "cancelled between dispatch and readback");
            self.stats.write().ticks_skipped += 1;
            return Ok(self.skipped_output());
        }

        self.kernel.readback(&mut self.signals)?;

        self.suppressor
            .observe(self.frame_counter, &self.signals.area_changed_tiles);
        for (flag, &area) in self.suppressed.iter_mut().zip(&self.tile_area) {
            *flag = self.suppressor.is_blocked(area);
        }
        let suppressed_tiles = self.suppressed.iter().filter(|&&b| b).count();

        self.candidates.clear();
        self.decision.evaluate(
            self.frame_counter,
            &self.signals.changed_pixels,
            &self.suppressed,
            &mut self.candidates,
        );
        let tiles: Vec<TileCoord> = self.candidates.iter().map(|&i| self.grid.coord(i)).collect();

        let elapsed = started.elapsed();
        {
            let mut stats = self.stats.write();
            stats.ticks_processed += 1;
            stats.candidates_emitted += tiles.len() as u64;
            stats.tiles_suppressed += suppressed_tiles as u64;
            stats.total_tick_time_ns += elapsed.as_nanos() as u64;
        }
        trace!(
            frame = self.frame_counter,
            tiles = tiles.len(),
            blocked_areas = self.suppressor.blocked_count(),
            ?elapsed,
            "tick complete"
        );

        let output = TickOutput {
            frame: self.frame_counter,
            tiles,
            brightness: self.signals.brightness.clone(),
            skipped: false,
        };
        self.frame_counter += 1;
        Ok(output)
    }

    /// Store the frame as the comparison baseline and emit nothing
    fn seed_tick(&mut self, frame: &Frame) -> Result<TickOutput> {
        debug!(
            frame = self.frame_counter,
            width = frame.width,
            height = frame.height,
            "seeding previous-frame store"
        );
        self.kernel.seed(frame)?;
        self.frame_layout = Some((frame.stride, frame.format));
        self.stats.write().seed_ticks += 1;

        let output = TickOutput {
            frame: self.frame_counter,
            tiles: Vec::new(),
            brightness: self.signals.brightness.clone(),
            skipped: false,
        };
        self.frame_counter += 1;
        Ok(output)
    }

    /// Rebuild all per-tile state after a display size change
    ///
    /// Every counter, window and suppression history refers to tiles of
    /// the old grid, so the whole pipeline restarts from a seed; only the
    /// frame counter carries over.
    fn rebuild_geometry(&mut self, frame: &Frame) -> Result<()> {
        info!(
            old_width = self.grid.width,
            old_height = self.grid.height,
            new_width = frame.width,
            new_height = frame.height,
            "display geometry changed, rebuilding session state"
        );

        self.grid = Self::grid_for(&self.config, frame.width, frame.height);
        self.kernel.resize(&self.grid)?;

        let tile_count = self.grid.tile_count();
        self.decision.reset(tile_count);
        self.suppressor.reset(&self.config.bounding_area, &self.grid);
        self.signals.resize_for(&self.grid);
        self.tile_area = (0..tile_count).map(|i| self.grid.area_of_tile(i)).collect();
        self.suppressed.clear();
        self.suppressed.resize(tile_count, false);
        self.frame_layout = None;

        self.stats.write().geometry_rebuilds += 1;
        Ok(())
    }

    fn skipped_output(&self) -> TickOutput {
        TickOutput {
            frame: self.frame_counter,
            tiles: Vec::new(),
            brightness: self.signals.brightness.clone(),
            skipped: true,
        }
    }
}

/// Pick the diff kernel for this build, preferring the GPU when available
#[cfg(feature = "gpu")]
fn default_kernel(pixel_delta: u8, grid: &TileGrid) -> Box<dyn DiffKernel> {
    match crate::diff::GpuDiffKernel::new(pixel_delta, grid) {
        Ok(kernel) => Box::new(kernel),
        Err(e) => {
            warn!("GPU diff kernel unavailable ({e}), falling back to CPU");
            Box::new(CpuDiffKernel::new(pixel_delta, grid))
        }
    }
}

/// Pick the diff kernel for this build
#[cfg(not(feature = "gpu"))]
fn default_kernel(pixel_delta: u8, grid: &TileGrid) -> Box<dyn DiffKernel> {
    Box::new(CpuDiffKernel::new(pixel_delta, grid))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MockFrameSource;
    use bytes::Bytes;

    fn test_config() -> EngineConfig {
        EngineConfig {
            tile_size: 32,
            average_window: 1,
            ..Default::default()
        }
    }

    fn solid_frame(width: u32, height: u32, value: u8) -> Frame {
        Frame::tight(
            width,
            height,
            PixelFormat::Bgra8,
            Bytes::from(vec![value; (width * height * 4) as usize]),
        )
        .unwrap()
    }

    fn cpu_session(config: EngineConfig, source: Box<dyn FrameSource>, size: u32) -> CaptureSession {
        let grid = CaptureSession::grid_for(&config, size, size);
        let kernel = Box::new(CpuDiffKernel::new(config.pixel_delta, &grid));
        CaptureSession::with_kernel(config, source, kernel, size, size, Duration::from_millis(5))
            .unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = EngineConfig {
            tile_size: 0,
            ..Default::default()
        };
        let (_tx, source) = crate::source::ChannelSource::channel(1);
        let err =
            CaptureSession::new(config, Box::new(source), 64, 64, Duration::from_millis(5));
        assert!(err.is_err());
    }

    #[test]
    fn test_first_tick_seeds_without_output() {
        let mut source = MockFrameSource::new();
        source
            .expect_capture()
            .times(1)
            .returning(|_| Ok(SourceEvent::Frame(solid_frame(64, 64, 0))));

        let mut session = cpu_session(test_config(), Box::new(source), 64);
        let cancel = CancellationToken::new();
        let out = session.advance(&cancel).unwrap();

        assert!(!out.skipped);
        assert_eq!(out.frame, 0);
        assert!(out.tiles.is_empty());
        assert_eq!(session.frame_counter(), 1);
        assert_eq!(session.stats().seed_ticks, 1);
    }

    #[test]
    fn test_timeout_skips_without_advancing_counter() {
        let mut source = MockFrameSource::new();
        source
            .expect_capture()
            .times(1)
            .returning(|_| Ok(SourceEvent::Timeout));

        let mut session = cpu_session(test_config(), Box::new(source), 64);
        let cancel = CancellationToken::new();
        let out = session.advance(&cancel).unwrap();

        assert!(out.skipped);
        assert_eq!(session.frame_counter(), 0);
        assert_eq!(session.stats().ticks_skipped, 1);
    }

    #[test]
    fn test_source_disconnect_propagates() {
        let mut source = MockFrameSource::new();
        source
            .expect_capture()
            .times(1)
            .returning(|_| Err(crate::EngineError::SourceDisconnected));

        let mut session = cpu_session(test_config(), Box::new(source), 64);
        let cancel = CancellationToken::new();
        assert!(session.advance(&cancel).is_err());
    }

    #[test]
    fn test_cancel_before_capture_skips() {
        let mut source = MockFrameSource::new();
        source.expect_capture().times(0);

        let mut session = cpu_session(test_config(), Box::new(source), 64);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let out = session.advance(&cancel).unwrap();
        assert!(out.skipped);
    }

    #[test]
    fn test_changed_tile_emits_after_stabilization() {
        // One 32px tile flips black -> white at the first comparison and
        // stays white; the change pends until stable + first-extra ticks
        // have passed
        let mut source = MockFrameSource::new();
        let mut tick = 0u32;
        source.expect_capture().returning(move |_| {
            let value = if tick == 0 { 0 } else { 255 };
            tick += 1;
            Ok(SourceEvent::Frame(solid_frame(32, 32, value)))
        });

        let mut session = cpu_session(test_config(), Box::new(source), 32);
        let cancel = CancellationToken::new();

        let mut emitted_at = None;
        for _ in 0..12 {
            let out = session.advance(&cancel).unwrap();
            if !out.tiles.is_empty() {
                emitted_at = Some(out.frame);
                break;
            }
        }
        // Seed at 0, flip seen at frame 1, counter reaches
        // stable 4 + first-extra 1 at frame 6
        assert_eq!(emitted_at, Some(6));
        assert_eq!(session.stats().candidates_emitted, 1);
    }

    #[test]
    fn test_geometry_change_rebuilds_and_reseeds() {
        let mut source = MockFrameSource::new();
        let mut tick = 0u32;
        source.expect_capture().returning(move |_| {
            let size = if tick < 2 { 64 } else { 128 };
            tick += 1;
            Ok(SourceEvent::Frame(solid_frame(size, size, 10)))
        });

        let mut session = cpu_session(test_config(), Box::new(source), 64);
        let cancel = CancellationToken::new();

        session.advance(&cancel).unwrap(); // seed 64x64
        session.advance(&cancel).unwrap(); // compare 64x64
        let out = session.advance(&cancel).unwrap(); // 128x128 arrives

        assert!(!out.skipped);
        assert!(out.tiles.is_empty());
        assert_eq!(session.grid().width, 128);
        assert_eq!(session.grid().tiles_x, 4);
        let stats = session.stats();
        assert_eq!(stats.geometry_rebuilds, 1);
        assert_eq!(stats.seed_ticks, 2);
        // Counter is monotonic across the rebuild
        assert_eq!(session.frame_counter(), 3);
    }

    #[test]
    fn test_format_drift_reseeds() {
        let mut source = MockFrameSource::new();
        let mut tick = 0u32;
        source.expect_capture().returning(move |_| {
            let format = if tick < 2 {
                PixelFormat::Bgra8
            } else {
                PixelFormat::Rgba8
            };
            tick += 1;
            Ok(SourceEvent::Frame(
                Frame::tight(64, 64, format, Bytes::from(vec![10u8; 64 * 64 * 4])).unwrap(),
            ))
        });

        let mut session = cpu_session(test_config(), Box::new(source), 64);
        let cancel = CancellationToken::new();

        session.advance(&cancel).unwrap(); // seed BGRA
        session.advance(&cancel).unwrap(); // compare BGRA
        let out = session.advance(&cancel).unwrap(); // RGBA arrives

        assert!(!out.skipped);
        assert!(out.tiles.is_empty());
        let stats = session.stats();
        assert_eq!(stats.format_reseeds, 1);
        assert_eq!(stats.seed_ticks, 2);
    }

    #[test]
    fn test_brightness_tracks_content() {
        let mut source = MockFrameSource::new();
        source
            .expect_capture()
            .returning(|_| Ok(SourceEvent::Frame(solid_frame(32, 32, 255))));

        let mut session = cpu_session(test_config(), Box::new(source), 32);
        let cancel = CancellationToken::new();

        session.advance(&cancel).unwrap(); // seed
        let out = session.advance(&cancel).unwrap();
        assert_eq!(out.brightness.len(), 1);
        assert!((out.brightness[0] - 1.0).abs() < 1e-3);
    }
}
