use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

use crate::framing::SyncState;

/// Entries kept in each rolling history.
pub const HISTORY_LEN: usize = 200;

/// Statistics for one run, written by the stage threads and readable at any time from
/// any thread.
///
/// Every field is an atomic, including the rolling histories, so writers never block
/// and a reader never waits on a stage.
#[derive(Debug)]
pub struct PipelineState {
    bytes_consumed: AtomicU64,
    bytes_total: AtomicU64,
    has_total: AtomicBool,
    symbols: AtomicU64,
    bits: AtomicU64,
    frames: AtomicU64,
    synced_frames: AtomicU64,
    packets: AtomicU64,
    anomalies: AtomicU64,
    missing_packets: AtomicU64,
    locks: AtomicU64,
    unlocks: AtomicU64,
    sync_state: AtomicU8,
    viterbi_locked: AtomicBool,
    corrected_bits: AtomicU64,
    // f32 bits
    ber: AtomicU32,
    ber_history: History,
    correlation_history: History,
}

// Ring of the last HISTORY_LEN values. A snapshot racing a push may see the slot's
// previous value.
#[derive(Debug)]
struct History {
    slots: Vec<AtomicU32>,
    written: AtomicUsize,
}

impl History {
    fn new() -> Self {
        History {
            slots: (0..HISTORY_LEN).map(|_| AtomicU32::new(0)).collect(),
            written: AtomicUsize::new(0),
        }
    }

    fn push(&self, value: u32) {
        let n = self.written.fetch_add(1, Ordering::AcqRel);
        self.slots[n % HISTORY_LEN].store(value, Ordering::Release);
    }

    fn snapshot(&self) -> Vec<u32> {
        let n = self.written.load(Ordering::Acquire);
        (n.saturating_sub(HISTORY_LEN)..n)
            .map(|i| self.slots[i % HISTORY_LEN].load(Ordering::Acquire))
            .collect()
    }
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineState {
    #[must_use]
    pub fn new() -> Self {
        PipelineState {
            bytes_consumed: AtomicU64::new(0),
            bytes_total: AtomicU64::new(0),
            has_total: AtomicBool::new(false),
            symbols: AtomicU64::new(0),
            bits: AtomicU64::new(0),
            frames: AtomicU64::new(0),
            synced_frames: AtomicU64::new(0),
            packets: AtomicU64::new(0),
            anomalies: AtomicU64::new(0),
            missing_packets: AtomicU64::new(0),
            locks: AtomicU64::new(0),
            unlocks: AtomicU64::new(0),
            sync_state: AtomicU8::new(encode_sync(SyncState::Searching)),
            viterbi_locked: AtomicBool::new(false),
            corrected_bits: AtomicU64::new(0),
            ber: AtomicU32::new(0),
            ber_history: History::new(),
            correlation_history: History::new(),
        }
    }

    pub(crate) fn set_total(&self, total: u64) {
        self.bytes_total.store(total, Ordering::Relaxed);
        self.has_total.store(true, Ordering::Relaxed);
    }

    pub(crate) fn add_bytes(&self, n: u64) {
        self.bytes_consumed.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn add_symbols(&self, n: u64) {
        self.symbols.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn add_bits(&self, n: u64) {
        self.bits.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn add_packet(&self) {
        self.packets.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_anomalies(&self, n: u64) {
        self.anomalies.store(n, Ordering::Relaxed);
    }

    pub(crate) fn set_missing_packets(&self, n: u64) {
        self.missing_packets.store(n, Ordering::Relaxed);
    }

    pub(crate) fn record_frame(&self, score: u32, synced: bool) {
        self.frames.fetch_add(1, Ordering::Relaxed);
        if synced {
            self.synced_frames.fetch_add(1, Ordering::Relaxed);
        }
        self.correlation_history.push(score);
    }

    pub(crate) fn set_sync(&self, state: SyncState, locks: u64, unlocks: u64) {
        self.sync_state.store(encode_sync(state), Ordering::Relaxed);
        self.locks.store(locks, Ordering::Relaxed);
        self.unlocks.store(unlocks, Ordering::Relaxed);
    }

    pub(crate) fn record_viterbi(&self, locked: bool, ber: Option<f32>, corrected: u64) {
        self.viterbi_locked.store(locked, Ordering::Relaxed);
        self.corrected_bits.store(corrected, Ordering::Relaxed);
        if let Some(ber) = ber {
            self.ber.store(ber.to_bits(), Ordering::Relaxed);
            self.ber_history.push(ber.to_bits());
        }
    }

    /// Fraction of the input file consumed, `None` for live input.
    #[must_use]
    pub fn progress(&self) -> Option<f64> {
        if !self.has_total.load(Ordering::Relaxed) {
            return None;
        }
        let total = self.bytes_total.load(Ordering::Relaxed);
        if total == 0 {
            return Some(1.0);
        }
        let consumed = self.bytes_consumed.load(Ordering::Relaxed);
        Some(consumed as f64 / total as f64)
    }

    #[must_use]
    pub fn sync_state(&self) -> SyncState {
        decode_sync(self.sync_state.load(Ordering::Relaxed))
    }

    #[must_use]
    pub fn viterbi_locked(&self) -> bool {
        self.viterbi_locked.load(Ordering::Relaxed)
    }

    /// Most recent bit error rate estimate from the convolutional decoder.
    #[must_use]
    pub fn ber(&self) -> f32 {
        f32::from_bits(self.ber.load(Ordering::Relaxed))
    }

    /// Rolling BER history, oldest first.
    #[must_use]
    pub fn ber_history(&self) -> Vec<f32> {
        self.ber_history
            .snapshot()
            .into_iter()
            .map(f32::from_bits)
            .collect()
    }

    /// Rolling marker correlation score history, oldest first.
    #[must_use]
    pub fn correlation_history(&self) -> Vec<u32> {
        self.correlation_history.snapshot()
    }

    /// Snapshot of the counters.
    #[must_use]
    pub fn summary(&self) -> Summary {
        Summary {
            bytes_consumed: self.bytes_consumed.load(Ordering::Relaxed),
            bytes_total: self
                .has_total
                .load(Ordering::Relaxed)
                .then(|| self.bytes_total.load(Ordering::Relaxed)),
            symbols: self.symbols.load(Ordering::Relaxed),
            bits: self.bits.load(Ordering::Relaxed),
            frames: self.frames.load(Ordering::Relaxed),
            synced_frames: self.synced_frames.load(Ordering::Relaxed),
            packets: self.packets.load(Ordering::Relaxed),
            anomalies: self.anomalies.load(Ordering::Relaxed),
            missing_packets: self.missing_packets.load(Ordering::Relaxed),
            locks: self.locks.load(Ordering::Relaxed),
            unlocks: self.unlocks.load(Ordering::Relaxed),
            corrected_bits: self.corrected_bits.load(Ordering::Relaxed),
            sync_state: self.sync_state(),
            viterbi_locked: self.viterbi_locked(),
        }
    }
}

fn encode_sync(state: SyncState) -> u8 {
    match state {
        SyncState::Searching => 0,
        SyncState::Syncing => 1,
        SyncState::Locked => 2,
    }
}

fn decode_sync(v: u8) -> SyncState {
    match v {
        1 => SyncState::Syncing,
        2 => SyncState::Locked,
        _ => SyncState::Searching,
    }
}

/// Counters for a run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub bytes_consumed: u64,
    /// Input size in file mode.
    pub bytes_total: Option<u64>,
    pub symbols: u64,
    pub bits: u64,
    pub frames: u64,
    pub synced_frames: u64,
    pub packets: u64,
    pub anomalies: u64,
    /// Packet sequence counts skipped, summed over every APID.
    pub missing_packets: u64,
    /// Deframer lock acquisitions.
    pub locks: u64,
    /// Deframer lock losses.
    pub unlocks: u64,
    pub corrected_bits: u64,
    pub sync_state: SyncState,
    pub viterbi_locked: bool,
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn histories_are_bounded() {
        let state = PipelineState::new();
        for i in 0..(HISTORY_LEN as u32 + 50) {
            state.record_frame(i, true);
            state.record_viterbi(true, Some(i as f32), 0);
        }
        let cor = state.correlation_history();
        assert_eq!(cor.len(), HISTORY_LEN);
        assert_eq!(cor[0], 50);
        assert_eq!(state.ber_history().len(), HISTORY_LEN);
        assert_eq!(state.ber(), (HISTORY_LEN + 49) as f32);
    }

    #[test]
    fn history_snapshot_is_oldest_first_before_wrapping() {
        let state = PipelineState::new();
        assert!(state.correlation_history().is_empty());
        for score in [7, 3, 5] {
            state.record_frame(score, true);
        }
        assert_eq!(state.correlation_history(), vec![7, 3, 5]);
        state.record_viterbi(false, Some(0.25), 1);
        state.record_viterbi(false, None, 1);
        assert_eq!(state.ber_history(), vec![0.25]);
    }

    #[test]
    fn history_reads_do_not_wait_on_writers() {
        let state = Arc::new(PipelineState::new());
        let writer = {
            let state = state.clone();
            thread::spawn(move || {
                for i in 0..10_000u32 {
                    state.record_frame(i % 32, true);
                }
            })
        };
        while !writer.is_finished() {
            let cor = state.correlation_history();
            assert!(cor.len() <= HISTORY_LEN);
            assert!(cor.iter().all(|score| *score < 32));
        }
        writer.join().unwrap();
        let cor = state.correlation_history();
        assert_eq!(cor.len(), HISTORY_LEN);
        assert_eq!(cor[HISTORY_LEN - 1], 9_999 % 32);
    }

    #[test]
    fn progress_is_undefined_without_total() {
        let state = PipelineState::new();
        state.add_bytes(10);
        assert_eq!(state.progress(), None);
        state.set_total(40);
        assert_eq!(state.progress(), Some(0.25));
    }

    #[test]
    fn counters_are_shared_across_threads() {
        let state = Arc::new(PipelineState::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let state = state.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        state.add_packet();
                        state.record_frame(0, false);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let summary = state.summary();
        assert_eq!(summary.packets, 4000);
        assert_eq!(summary.frames, 4000);
        assert_eq!(summary.synced_frames, 0);
        assert_eq!(state.correlation_history().len(), HISTORY_LEN);
    }
}
