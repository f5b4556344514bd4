//! # inktile
//!
//! GPU-accelerated screen change detection for tile-addressable displays.
//!
//! Successive full-screen captures are compared tile by tile on the GPU
//! (CPU fallback included); per-tile temporal filtering turns the raw
//! pixel differences into refresh candidates, and per-region scroll
//! suppression withholds refreshes while large areas churn. The intended
//! consumer is a partial-refresh display driver (e-paper or similar)
//! where every refresh costs visible flicker, so the engine errs on the
//! side of refreshing late but exactly once.
//!
//! # Architecture
//!
//! ```text
//! inktile
//!   ├─> FrameSource (capture abstraction, one frame per tick)
//!   ├─> DiffKernel (per-tile compare; wgpu compute or rayon CPU)
//!   ├─> ScrollSuppressor (per-area change history, scroll blocking)
//!   ├─> TileDecisionEngine (per-tile stability/protection/cooldown)
//!   └─> CaptureSession + TickRunner (orchestration and scheduling)
//! ```
//!
//! # Data Flow
//!
//! **Tick Path:** FrameSource → DiffKernel.dispatch → DiffKernel.readback
//! → ScrollSuppressor → TileDecisionEngine → TickOutput
//!
//! A tick that cannot complete (capture timeout, cancellation) is
//! skipped without touching any temporal state, so a stall never turns
//! into a burst of spurious refreshes.

#![warn(missing_docs)]
#![warn(clippy::all)]

// =============================================================================
// Pipeline modules
// =============================================================================

/// Engine and runner configuration
pub mod config;

/// Per-tile refresh decision state machine
pub mod decision;

/// Tile comparison kernels (GPU compute and CPU reference)
pub mod diff;

/// Error taxonomy
pub mod error;

/// Frame-indexed deadline ring for retiring per-emission state
pub mod expiry;

/// Captured frame representation
pub mod frame;

/// Tile and bounding-area geometry
pub mod grid;

/// Tick scheduling on the async runtime
pub mod runner;

/// Scroll detection over bounding-area change history
pub mod scroll;

/// Capture session orchestration
///
/// A [`session::CaptureSession`] owns one display's entire pipeline:
/// source, kernel, decision state, suppression and the monotonic frame
/// counter. Independent displays run independent sessions; there is no
/// process-global state.
pub mod session;

/// Frame capture sources
pub mod source;

// =============================================================================
// Convenience re-exports
// =============================================================================

pub use config::{BoundingAreaConfig, Config, EngineConfig, RunnerConfig};
pub use decision::TileDecisionEngine;
#[cfg(feature = "gpu")]
pub use diff::GpuDiffKernel;
pub use diff::{CpuDiffKernel, DiffKernel, TileSignals};
pub use error::{EngineError, Result};
pub use expiry::DeadlineRing;
pub use frame::{Frame, PixelFormat};
pub use grid::{TileCoord, TileGrid};
pub use runner::TickRunner;
pub use scroll::ScrollSuppressor;
pub use session::{CaptureSession, SessionStats, TickOutput};
pub use source::{ChannelSource, FrameSender, FrameSource, SourceEvent};
