//! Tick Runner
//!
//! Drives a [`CaptureSession`] on a fixed cadence inside the async
//! runtime. The runner owns the session for its whole life; consumers see
//! only the stream of [`TickOutput`]s and a shared statistics handle, so
//! there is no shared mutable pipeline state to lock.
//!
//! Missed ticks are skipped rather than bursted: when a tick overruns the
//! interval the schedule realigns instead of replaying stale deadlines.

use tokio::sync::mpsc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::RunnerConfig;
use crate::error::Result;
use crate::session::{CaptureSession, TickOutput};

/// Scheduled driver for one capture session
pub struct TickRunner {
    session: CaptureSession,
    config: RunnerConfig,
}

impl TickRunner {
    /// Wrap a session with a tick schedule
    pub fn new(session: CaptureSession, config: RunnerConfig) -> Self {
        Self { session, config }
    }

    /// The wrapped session
    pub fn session(&self) -> &CaptureSession {
        &self.session
    }

    /// Run ticks until cancelled or the output side closes
    ///
    /// Every completed tick (including seed ticks) is forwarded so
    /// consumers can track frame progression and brightness; skipped
    /// ticks are not. Returns after the token is cancelled or the
    /// receiver is dropped.
    ///
    /// # Errors
    /// Propagates fatal session errors: source disconnect, malformed
    /// frames, device loss.
    pub async fn run(
        mut self,
        cancel: CancellationToken,
        output: mpsc::Sender<TickOutput>,
    ) -> Result<()> {
        let mut ticker = interval(Duration::from_millis(self.config.tick_interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            interval_ms = self.config.tick_interval_ms,
            kernel = self.session.kernel_name(),
            "tick runner started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("tick runner cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    let out = self.session.advance(&cancel)?;
                    if out.skipped {
                        continue;
                    }
                    if output.send(out).await.is_err() {
                        debug!("output channel closed, stopping tick runner");
                        break;
                    }
                }
            }
        }

        let stats = self.session.stats();
        info!(
            ticks = stats.ticks_processed,
            skipped = stats.ticks_skipped,
            candidates = stats.candidates_emitted,
            avg_tick_ms = format!("{:.2}", stats.avg_tick_time_ms()),
            "tick runner stopped"
        );
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::diff::CpuDiffKernel;
    use crate::frame::{Frame, PixelFormat};
    use crate::grid::TileGrid;
    use crate::source::ChannelSource;
    use bytes::Bytes;

    fn solid_frame(size: u32, value: u8) -> Frame {
        Frame::tight(
            size,
            size,
            PixelFormat::Bgra8,
            Bytes::from(vec![value; (size * size * 4) as usize]),
        )
        .unwrap()
    }

    fn test_runner(source: ChannelSource, size: u32) -> TickRunner {
        let config = EngineConfig {
            tile_size: 32,
            average_window: 1,
            ..Default::default()
        };
        let grid = TileGrid::new(
            size,
            size,
            config.tile_size,
            config.bounding_area.width,
            config.bounding_area.height,
        );
        let kernel = Box::new(CpuDiffKernel::new(config.pixel_delta, &grid));
        let session = CaptureSession::with_kernel(
            config,
            Box::new(source),
            kernel,
            size,
            size,
            Duration::from_millis(2),
        )
        .unwrap();
        let runner_config = RunnerConfig {
            tick_interval_ms: 5,
            capture_timeout_ms: 2,
            ..Default::default()
        };
        TickRunner::new(session, runner_config)
    }

    #[tokio::test]
    async fn test_runner_forwards_ticks_and_stops_on_cancel() {
        let (tx, source) = ChannelSource::channel(8);
        for _ in 0..4 {
            assert!(tx.offer(solid_frame(64, 40)));
        }

        let runner = test_runner(source, 64);
        let cancel = CancellationToken::new();
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let handle = tokio::spawn(runner.run(cancel.clone(), out_tx));

        let mut frames = Vec::new();
        for _ in 0..4 {
            let out = tokio::time::timeout(Duration::from_secs(5), out_rx.recv())
                .await
                .expect("runner stalled")
                .expect("runner closed early");
            frames.push(out.frame);
        }
        assert_eq!(frames, vec![0, 1, 2, 3]);

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_runner_stops_when_receiver_drops() {
        let (tx, source) = ChannelSource::channel(8);
        for _ in 0..3 {
            assert!(tx.offer(solid_frame(64, 40)));
        }

        let runner = test_runner(source, 64);
        let cancel = CancellationToken::new();
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let handle = tokio::spawn(runner.run(cancel, out_tx));

        let first = tokio::time::timeout(Duration::from_secs(5), out_rx.recv())
            .await
            .expect("runner stalled");
        assert!(first.is_some());
        drop(out_rx);

        // Next forwarded tick hits the closed channel and the runner
        // exits cleanly
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_runner_propagates_source_loss() {
        let (tx, source) = ChannelSource::channel(2);
        drop(tx);

        let runner = test_runner(source, 64);
        let cancel = CancellationToken::new();
        let (out_tx, _out_rx) = mpsc::channel(8);

        let result = tokio::spawn(runner.run(cancel, out_tx)).await.unwrap();
        assert!(result.is_err());
    }
}
