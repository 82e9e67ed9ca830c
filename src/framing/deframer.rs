use std::fmt::Display;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};
use typed_builder::TypedBuilder;

use super::pn::{Derandomizer, Randomization};
use super::{Frame, ASM};
use crate::block::Block;
use crate::{Error, Result};

/// Frame synchronization parameters.
#[derive(Serialize, Deserialize, TypedBuilder, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct DeframerConfig {
    /// Sync marker bits, right aligned.
    #[builder(default = u64::from(u32::from_be_bytes(ASM)))]
    pub marker: u64,
    /// Marker length in bits, at most 64.
    #[builder(default = 32)]
    pub marker_bits: u32,
    /// Frame length in bytes, not including the marker.
    #[builder(default = 1020)]
    pub frame_length: usize,
    /// Largest marker bit error count accepted while searching.
    #[builder(default = 3)]
    pub threshold: u32,
    /// Largest marker bit error count accepted while locked.
    #[builder(default = 6)]
    pub lock_threshold: u32,
    /// Consecutive marker failures tolerated before lock is dropped.
    #[builder(default = 3)]
    pub max_failures: u32,
    /// Also search for the bit-inverted marker.
    #[builder(default = true)]
    pub inverted_search: bool,
    #[builder(default)]
    pub randomization: Randomization,
}

impl Default for DeframerConfig {
    fn default() -> Self {
        DeframerConfig::builder().build()
    }
}

impl DeframerConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.marker_bits == 0 || self.marker_bits > 64 {
            return Err(Error::Config(format!(
                "marker length {} bits outside 1..=64",
                self.marker_bits
            )));
        }
        if self.marker_bits < 64 && self.marker >> self.marker_bits != 0 {
            return Err(Error::Config(format!(
                "marker {:#x} is longer than {} bits",
                self.marker, self.marker_bits
            )));
        }
        if self.frame_length == 0 {
            return Err(Error::Config("frame length must be non-zero".to_string()));
        }
        if self.threshold >= self.marker_bits || self.lock_threshold >= self.marker_bits {
            return Err(Error::Config(format!(
                "marker thresholds must be less than the marker length {}",
                self.marker_bits
            )));
        }
        if let Randomization::Sequence(seq) = &self.randomization {
            if seq.is_empty() {
                return Err(Error::Config(
                    "derandomization sequence is empty".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn mask(&self) -> u64 {
        if self.marker_bits == 64 {
            u64::MAX
        } else {
            (1 << self.marker_bits) - 1
        }
    }
}

/// Deframer synchronization state.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Correlating the marker at every bit position.
    Searching,
    /// A marker was found within the search threshold but not yet confirmed.
    Syncing,
    /// Markers are being found on every frame boundary.
    Locked,
}

impl Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SyncState::Searching => "searching",
            SyncState::Syncing => "syncing",
            SyncState::Locked => "locked",
        };
        write!(f, "{name}")
    }
}

// What the incoming bits are being used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Marker,
    Data,
}

/// Locates sync markers in a bitstream and slices the frames following them.
///
/// Each input element is one bit (0 or 1). While searching, every bit position is
/// correlated against the marker and, if enabled, its inverse. Once a marker is found
/// the deframer stops searching and takes frame-length bits followed by marker-length
/// bits, checking the marker at each expected boundary.
pub struct Deframer {
    marker: u64,
    marker_bits: u32,
    mask: u64,
    frame_bits: usize,
    threshold: u32,
    lock_threshold: u32,
    max_failures: u32,
    inverted_search: bool,
    derandomizer: Option<Box<dyn Derandomizer>>,

    state: SyncState,
    phase: Phase,
    window: u64,
    window_len: u32,
    inverted: bool,
    failures: u32,
    score: u32,
    data: Vec<u8>,
    data_bits: usize,
    data_start: u64,
    position: u64,

    locks: u64,
    losses: u64,
}

impl Deframer {
    /// # Errors
    /// [Error::Config] if the configuration is invalid.
    pub fn new(config: &DeframerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Deframer {
            marker: config.marker,
            marker_bits: config.marker_bits,
            mask: config.mask(),
            frame_bits: config.frame_length * 8,
            threshold: config.threshold,
            lock_threshold: config.lock_threshold,
            max_failures: config.max_failures,
            inverted_search: config.inverted_search,
            derandomizer: config.randomization.derandomizer(),
            state: SyncState::Searching,
            phase: Phase::Marker,
            window: 0,
            window_len: 0,
            inverted: false,
            failures: 0,
            score: 0,
            data: Vec::with_capacity(config.frame_length),
            data_bits: 0,
            data_start: 0,
            position: 0,
            locks: 0,
            losses: 0,
        })
    }

    #[must_use]
    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Times the deframer has entered [SyncState::Locked].
    #[must_use]
    pub fn locks(&self) -> u64 {
        self.locks
    }

    /// Times the deframer has dropped from [SyncState::Locked] back to searching.
    #[must_use]
    pub fn losses(&self) -> u64 {
        self.losses
    }

    /// Feed one bit, returning a frame when one completes.
    pub fn push(&mut self, bit: u8) -> Option<Frame> {
        let bit = bit & 1;
        self.position += 1;
        match self.phase {
            Phase::Marker => {
                self.window = ((self.window << 1) | u64::from(bit)) & self.mask;
                self.window_len = (self.window_len + 1).min(self.marker_bits);
                if self.window_len == self.marker_bits {
                    self.check_marker();
                }
                None
            }
            Phase::Data => {
                let bit = bit ^ u8::from(self.inverted);
                if self.data_bits % 8 == 0 {
                    self.data.push(0);
                }
                if let Some(last) = self.data.last_mut() {
                    *last |= bit << (7 - self.data_bits % 8);
                }
                self.data_bits += 1;
                if self.data_bits == self.frame_bits {
                    return Some(self.finish_frame());
                }
                None
            }
        }
    }

    fn distance(&self, inverted: bool) -> u32 {
        let expected = if inverted {
            !self.marker & self.mask
        } else {
            self.marker
        };
        (self.window ^ expected).count_ones()
    }

    fn check_marker(&mut self) {
        match self.state {
            SyncState::Searching => {
                let mut score = self.distance(false);
                let mut inverted = false;
                if self.inverted_search {
                    let d = self.distance(true);
                    if d < score {
                        score = d;
                        inverted = true;
                    }
                }
                if score > self.threshold {
                    return;
                }
                self.inverted = inverted;
                if score == 0 {
                    self.lock(score);
                } else {
                    debug!(score, position = self.position, inverted, "sync candidate");
                    self.state = SyncState::Syncing;
                }
                self.start_frame(score);
            }
            SyncState::Syncing => {
                let score = self.distance(self.inverted);
                if score <= self.threshold {
                    self.lock(score);
                    self.start_frame(score);
                } else {
                    debug!(score, position = self.position, "sync candidate rejected");
                    self.search();
                }
            }
            SyncState::Locked => {
                let score = self.distance(self.inverted);
                if score <= self.lock_threshold {
                    self.failures = 0;
                } else {
                    self.failures += 1;
                    trace!(
                        score,
                        failures = self.failures,
                        "marker validation failed"
                    );
                    if self.failures > self.max_failures {
                        info!(
                            position = self.position,
                            failures = self.failures,
                            "sync lost"
                        );
                        self.losses += 1;
                        self.search();
                        return;
                    }
                }
                self.start_frame(score);
            }
        }
    }

    fn lock(&mut self, score: u32) {
        info!(
            score,
            position = self.position,
            inverted = self.inverted,
            "sync acquired"
        );
        self.state = SyncState::Locked;
        self.failures = 0;
        self.locks += 1;
    }

    // Resume correlating with the bit following the marker just checked.
    fn search(&mut self) {
        self.state = SyncState::Searching;
        self.phase = Phase::Marker;
        self.failures = 0;
        self.window = 0;
        self.window_len = 0;
    }

    fn start_frame(&mut self, score: u32) {
        self.phase = Phase::Data;
        self.score = score;
        self.data.clear();
        self.data_bits = 0;
        self.data_start = self.position;
    }

    fn finish_frame(&mut self) -> Frame {
        let raw = std::mem::take(&mut self.data);
        let data = match &self.derandomizer {
            Some(pn) => pn.derandomize(&raw),
            None => raw,
        };
        let frame = Frame {
            data,
            score: self.score,
            synced: self.state == SyncState::Locked,
            inverted: self.inverted,
            position: self.data_start,
        };
        self.phase = Phase::Marker;
        self.window = 0;
        self.window_len = 0;
        self.data_bits = 0;
        frame
    }
}

impl Block for Deframer {
    type Input = u8;
    type Output = Frame;

    fn work(&mut self, input: &[u8], output: &mut Vec<Frame>) {
        output.extend(input.iter().filter_map(|bit| self.push(*bit)));
    }
}
