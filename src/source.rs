//! Frame Sources
//!
//! Capture abstraction feeding the engine. Hardware desktop duplication
//! and software screen copy both sit behind [`FrameSource`]; downstream
//! stages cannot tell them apart. A source that misses its bounded wait
//! causes the tick to be skipped, nothing more.

use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use crate::error::{EngineError, Result};
use crate::frame::Frame;

/// Outcome of one capture attempt
#[derive(Debug)]
pub enum SourceEvent {
    /// A new frame arrived
    Frame(Frame),
    /// No new frame within the bounded wait; skip the tick
    Timeout,
}

/// Produces one full-resolution frame per tick
#[cfg_attr(test, mockall::automock)]
pub trait FrameSource: Send {
    /// Wait up to `timeout` for the next frame
    ///
    /// `Err` means the source is gone for good and the session must end;
    /// a missed deadline is the `Timeout` event, not an error.
    fn capture(&mut self, timeout: Duration) -> Result<SourceEvent>;
}

/// Frame source backed by a bounded channel
///
/// A capture thread pushes frames through the [`FrameSender`] half; the
/// engine blocks on the receiver with the per-tick timeout. Dropping the
/// sender ends the session.
pub struct ChannelSource {
    rx: Receiver<Frame>,
}

/// Producer half of a [`ChannelSource`]
#[derive(Clone)]
pub struct FrameSender {
    tx: Sender<Frame>,
}

impl ChannelSource {
    /// Create a connected sender/source pair
    pub fn channel(capacity: usize) -> (FrameSender, ChannelSource) {
        let (tx, rx) = bounded(capacity);
        (FrameSender { tx }, ChannelSource { rx })
    }
}

impl FrameSender {
    /// Offer a frame without blocking
    ///
    /// Returns false if the channel is full (the engine is behind and the
    /// frame is dropped) or the source side is gone.
    pub fn offer(&self, frame: Frame) -> bool {
        self.tx.try_send(frame).is_ok()
    }
}

impl FrameSource for ChannelSource {
    fn capture(&mut self, timeout: Duration) -> Result<SourceEvent> {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => Ok(SourceEvent::Frame(frame)),
            Err(RecvTimeoutError::Timeout) => Ok(SourceEvent::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(EngineError::SourceDisconnected),
        }
    }
}
