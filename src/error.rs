//! Engine Error Types
//!
//! Error taxonomy for the tile-difference pipeline. Transient conditions
//! (a missed capture) are not errors at all: they surface as a skipped
//! tick. Everything here either ends the session or rejects it up front.

use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Tile-difference engine error types
#[derive(Error, Debug)]
pub enum EngineError {
    /// Configuration rejected at session construction
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Frame source hung up; no further frames will arrive
    #[error("Frame source disconnected")]
    SourceDisconnected,

    /// Frame payload does not match its declared geometry
    #[error("Frame size mismatch: got {got} bytes, expected {expected} for {width}x{height}")]
    FrameSizeMismatch {
        /// Bytes actually provided
        got: usize,
        /// Minimum bytes the geometry requires
        expected: usize,
        /// Declared frame width
        width: u32,
        /// Declared frame height
        height: u32,
    },

    /// GPU adapter or device could not be acquired
    #[error("GPU unavailable: {0}")]
    GpuUnavailable(String),

    /// GPU device lost mid-session; the session must be recreated
    #[error("GPU device lost: {0}")]
    DeviceLost(String),

    /// GPU readback produced no data or malformed data
    #[error("Readback failed: {0}")]
    ReadbackFailed(String),
}
