//! Per-Tile Refresh Decision State Machine
//!
//! Turns raw per-tile pixel-difference counts into refresh candidates.
//! Each tile walks `New(-1)` -> `Accumulating(0..)` -> `Eligible` ->
//! `Emitted/Cooldown` and back, so that:
//!
//! 1. Small one-frame differences (capture dithering) never start a cycle:
//!    the rolling window mean must reach one changed pixel per frame.
//! 2. A real change keeps a tile pending until the refresh is emitted,
//!    because the panel keeps displaying stale content until then.
//! 3. A just-refreshed tile is protected from re-emission for
//!    `protection_frames + additional_cooldown_frames` ticks.
//! 4. A tile's first-ever refresh waits `first_refresh_extra_delay`
//!    extra ticks to avoid startup flicker.
//!
//! This stage is pure arithmetic over its inputs; it cannot fail, only
//! produce an empty candidate set.

use crate::config::EngineConfig;

// =============================================================================
// TileDecisionEngine
// =============================================================================

/// Per-tile temporal state, arena-allocated for one capture session
pub struct TileDecisionEngine {
    /// Consecutive changed ticks required before eligibility
    stable_required: u32,

    /// Extra delay for a tile's first-ever emission
    first_extra: u32,

    /// Ticks of post-emission protection plus cooldown slack
    protection_total: u64,

    /// Smoothing window length (1..=4)
    window: usize,

    /// Rolling raw signals, `tile_count * window`, zero = quiet history
    signal_ring: Vec<u32>,

    /// Ring column written this tick
    ring_pos: usize,

    /// Stable counters; -1 = never evaluated / quiet
    counters: Vec<i32>,

    /// Absolute frame number before which a tile may not be re-emitted
    expiries: Vec<u64>,

    /// Change observed but not yet serviced by a refresh
    pending: Vec<bool>,

    /// Tile has been emitted at least once this session
    has_emitted: Vec<bool>,
}

impl TileDecisionEngine {
    /// Allocate state for a tile grid
    pub fn new(config: &EngineConfig, tile_count: usize) -> Self {
        Self {
            stable_required: config.stable_frames_required,
            first_extra: config.first_refresh_extra_delay,
            protection_total: (config.protection_frames + config.additional_cooldown_frames)
                as u64,
            window: config.average_window,
            signal_ring: vec![0; tile_count * config.average_window],
            ring_pos: 0,
            counters: vec![-1; tile_count],
            expiries: vec![0; tile_count],
            pending: vec![false; tile_count],
            has_emitted: vec![false; tile_count],
        }
    }

    /// Number of tiles tracked
    #[inline]
    pub fn tile_count(&self) -> usize {
        self.counters.len()
    }

    /// Stable counter of a tile (-1 = quiet)
    #[inline]
    pub fn stable_counter(&self, index: usize) -> i32 {
        self.counters[index]
    }

    /// Protection expiry frame of a tile
    #[inline]
    pub fn protection_expiry(&self, index: usize) -> u64 {
        self.expiries[index]
    }

    /// Discard all state and resize for a new grid
    pub fn reset(&mut self, tile_count: usize) {
        self.signal_ring.clear();
        self.signal_ring.resize(tile_count * self.window, 0);
        self.ring_pos = 0;
        self.counters.clear();
        self.counters.resize(tile_count, -1);
        self.expiries.clear();
        self.expiries.resize(tile_count, 0);
        self.pending.clear();
        self.pending.resize(tile_count, false);
        self.has_emitted.clear();
        self.has_emitted.resize(tile_count, false);
    }

    /// Advance every tile one tick and collect refresh candidates
    ///
    /// `raw` holds this tick's per-tile changed-pixel counts. Tiles whose
    /// `suppressed` flag is set are held back without any state change,
    /// so suppression is transparent once it lifts. Candidate indices are
    /// appended to `candidates` in tile order.
    pub fn evaluate(
        &mut self,
        frame: u64,
        raw: &[u32],
        suppressed: &[bool],
        candidates: &mut Vec<usize>,
    ) {
        debug_assert_eq!(raw.len(), self.counters.len());
        debug_assert_eq!(suppressed.len(), self.counters.len());

        let w = self.window;
        for (i, &signal) in raw.iter().enumerate() {
            let ring = &mut self.signal_ring[i * w..(i + 1) * w];
            ring[self.ring_pos] = signal;

            // Window mean of at least one changed pixel per frame; the
            // zero-initialized ring treats pre-session history as quiet.
            let sum: u64 = ring.iter().map(|&v| v as u64).sum();
            if sum >= w as u64 {
                self.pending[i] = true;
            }

            if !self.pending[i] {
                self.counters[i] = -1;
                continue;
            }

            self.counters[i] = if self.counters[i] < 0 {
                0
            } else {
                self.counters[i].saturating_add(1)
            };

            let threshold = if self.has_emitted[i] {
                self.stable_required
            } else {
                self.stable_required + self.first_extra
            };
            if (self.counters[i] as u32) < threshold {
                continue;
            }
            if frame < self.expiries[i] {
                // Protected: held back, counter keeps accumulating
                continue;
            }
            if suppressed[i] {
                // Scroll-suppressed: held back untouched
                continue;
            }

            candidates.push(i);
            self.expiries[i] = frame + self.protection_total;
            self.counters[i] = -1;
            self.pending[i] = false;
            self.has_emitted[i] = true;
        }

        self.ring_pos = (self.ring_pos + 1) % w;
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_config() -> EngineConfig {
        EngineConfig {
            average_window: 1,
            stable_frames_required: 4,
            first_refresh_extra_delay: 1,
            protection_frames: 2,
            additional_cooldown_frames: 2,
            ..Default::default()
        }
    }

    /// Drive one engine over per-tick signals for a single tile,
    /// returning the ticks at which it was emitted
    fn run_single_tile(
        engine: &mut TileDecisionEngine,
        signals: &[(u64, u32)],
    ) -> Vec<u64> {
        let none = vec![false];
        let mut emitted = Vec::new();
        for &(frame, signal) in signals {
            let mut candidates = Vec::new();
            engine.evaluate(frame, &[signal], &none, &mut candidates);
            if !candidates.is_empty() {
                emitted.push(frame);
            }
        }
        emitted
    }

    #[test]
    fn test_quiet_tile_stays_unevaluated() {
        let mut engine = TileDecisionEngine::new(&test_config(), 1);
        let signals: Vec<(u64, u32)> = (2..50).map(|f| (f, 0)).collect();
        let emitted = run_single_tile(&mut engine, &signals);
        assert!(emitted.is_empty());
        assert_eq!(engine.stable_counter(0), -1);
    }

    #[test]
    fn test_first_emission_timing() {
        // Change begins at tick 5; stable 4 + first-extra 1 puts the
        // first emission at tick 10
        let mut engine = TileDecisionEngine::new(&test_config(), 1);
        let signals: Vec<(u64, u32)> = (2..=12)
            .map(|f| (f, if f == 5 { 1024 } else { 0 }))
            .collect();
        let emitted = run_single_tile(&mut engine, &signals);
        assert_eq!(emitted, vec![10]);
        // Serviced: the one-time change never re-emits
        assert_eq!(engine.stable_counter(0), -1);
        assert_eq!(engine.protection_expiry(0), 14);
    }

    #[test]
    fn test_change_pends_until_serviced() {
        // A single changed tick keeps the tile accumulating because the
        // panel still displays the old content
        let mut engine = TileDecisionEngine::new(&test_config(), 1);
        let signals = vec![(2, 500), (3, 0), (4, 0)];
        run_single_tile(&mut engine, &signals);
        assert_eq!(engine.stable_counter(0), 2);
    }

    #[test]
    fn test_continuous_change_reemission_gap() {
        // Continuously changing tile: first emission at tick 10, then a
        // fresh accumulation cycle lands at tick 15
        let mut engine = TileDecisionEngine::new(&test_config(), 1);
        let signals: Vec<(u64, u32)> = (5..=20).map(|f| (f, 2048)).collect();
        let emitted = run_single_tile(&mut engine, &signals);
        assert_eq!(emitted, vec![10, 15, 20]);
    }

    #[test]
    fn test_protection_holds_without_reset() {
        // stable_frames_required 1: the counter is ready long before the
        // protection window ends, and the tile emits the tick it expires
        let config = EngineConfig {
            stable_frames_required: 1,
            ..test_config()
        };
        let mut engine = TileDecisionEngine::new(&config, 1);
        let signals: Vec<(u64, u32)> = (5..=20).map(|f| (f, 2048)).collect();
        let emitted = run_single_tile(&mut engine, &signals);
        // First at 7 (counter 0 at 5, 1 at 6, first-extra makes it 2 at 7),
        // then exactly every protection_total = 4 ticks
        assert_eq!(emitted, vec![7, 11, 15, 19]);
    }

    #[test]
    fn test_first_extra_delay_applies_once() {
        let config = EngineConfig {
            stable_frames_required: 2,
            first_refresh_extra_delay: 2,
            protection_frames: 0,
            additional_cooldown_frames: 0,
            ..test_config()
        };
        let mut engine = TileDecisionEngine::new(&config, 1);
        let signals: Vec<(u64, u32)> = (2..=12).map(|f| (f, 100)).collect();
        let emitted = run_single_tile(&mut engine, &signals);
        // First cycle needs counter 4 (tick 6); later cycles need 2
        assert_eq!(emitted, vec![6, 9, 12]);
    }

    #[test]
    fn test_window_mean_filters_single_frame_noise() {
        let config = EngineConfig {
            average_window: 4,
            ..test_config()
        };
        let mut engine = TileDecisionEngine::new(&config, 1);
        // Two stray pixels for one tick never reach one pixel per frame
        let signals = vec![(2, 2), (3, 0), (4, 0), (5, 0), (6, 0)];
        let emitted = run_single_tile(&mut engine, &signals);
        assert!(emitted.is_empty());
        assert_eq!(engine.stable_counter(0), -1);
    }

    #[test]
    fn test_window_mean_passes_real_change() {
        let config = EngineConfig {
            average_window: 4,
            ..test_config()
        };
        let mut engine = TileDecisionEngine::new(&config, 1);
        let signals: Vec<(u64, u32)> = (2..=12)
            .map(|f| (f, if f == 5 { 1024 } else { 0 }))
            .collect();
        let emitted = run_single_tile(&mut engine, &signals);
        assert_eq!(emitted, vec![10]);
    }

    #[test]
    fn test_suppression_holds_state_untouched() {
        let mut engine = TileDecisionEngine::new(&test_config(), 1);
        let mut candidates = Vec::new();

        // Accumulate to the brink of emission
        for frame in 5..10 {
            engine.evaluate(frame, &[2048], &[false], &mut candidates);
        }
        assert!(candidates.is_empty());
        assert_eq!(engine.stable_counter(0), 4);

        // Suppressed on the tick it would emit: held, not reset
        engine.evaluate(10, &[2048], &[true], &mut candidates);
        assert!(candidates.is_empty());
        assert_eq!(engine.stable_counter(0), 5);

        // Suppression lifts: emits immediately
        engine.evaluate(11, &[2048], &[false], &mut candidates);
        assert_eq!(candidates, vec![0]);
        assert_eq!(engine.stable_counter(0), -1);
    }

    #[test]
    fn test_reset_discards_state() {
        let mut engine = TileDecisionEngine::new(&test_config(), 2);
        let mut candidates = Vec::new();
        for frame in 2..8 {
            engine.evaluate(frame, &[100, 100], &[false, false], &mut candidates);
        }
        engine.reset(4);
        assert_eq!(engine.tile_count(), 4);
        for i in 0..4 {
            assert_eq!(engine.stable_counter(i), -1);
            assert_eq!(engine.protection_expiry(i), 0);
        }
    }

    proptest! {
        /// Two emissions of the same tile are always separated by at
        /// least protection_frames + additional_cooldown_frames ticks
        #[test]
        fn prop_emission_gap_respects_protection(
            signals in proptest::collection::vec(0u32..5000, 1..120),
            window in 1usize..=4,
        ) {
            let config = EngineConfig {
                average_window: window,
                ..test_config()
            };
            let mut engine = TileDecisionEngine::new(&config, 1);
            let timeline: Vec<(u64, u32)> = signals
                .iter()
                .enumerate()
                .map(|(i, &s)| (i as u64 + 2, s))
                .collect();
            let emitted = run_single_tile(&mut engine, &timeline);
            for pair in emitted.windows(2) {
                prop_assert!(pair[1] - pair[0] >= 4);
            }
        }

        /// The stable counter never skips the -1 -> 0 transition
        #[test]
        fn prop_counter_starts_at_zero(
            signals in proptest::collection::vec(0u32..5000, 1..80),
        ) {
            let mut engine = TileDecisionEngine::new(&test_config(), 1);
            let none = vec![false];
            let mut prev = engine.stable_counter(0);
            for (i, &s) in signals.iter().enumerate() {
                let mut candidates = Vec::new();
                engine.evaluate(i as u64 + 2, &[s], &none, &mut candidates);
                let now = engine.stable_counter(0);
                if prev == -1 && now != -1 {
                    prop_assert_eq!(now, 0);
                }
                prev = now;
            }
        }
    }
}
