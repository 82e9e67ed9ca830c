use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use typed_builder::TypedBuilder;

use super::viterbi::{Code, Viterbi};
use crate::block::Block;
use crate::dsp::slice;
use crate::{Error, Result};

/// Polarity of the received symbol pairs.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Polarity {
    Normal,
    Inverted,
}

/// Convolutional decoding parameters.
#[derive(Serialize, Deserialize, TypedBuilder, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ViterbiConfig {
    #[builder(default)]
    pub code: Code,
    /// Traceback depth in decoded bits. Defaults to 5 times the code memory.
    #[builder(default, setter(strip_option))]
    pub traceback_depth: Option<usize>,
    /// Restrict acquisition to one polarity. Both are tried when `None`.
    #[builder(default, setter(strip_option))]
    pub polarity: Option<Polarity>,
    /// Largest corrected/coded bit ratio considered locked.
    #[builder(default = 0.1)]
    pub ber_threshold: f32,
    /// Symbol pairs used to evaluate each acquisition candidate.
    #[builder(default = 1024)]
    pub acquisition_length: usize,
    /// Decoded bits in the sliding BER window.
    #[builder(default = 2048)]
    pub ber_window: usize,
}

impl Default for ViterbiConfig {
    fn default() -> Self {
        ViterbiConfig::builder().build()
    }
}

impl ViterbiConfig {
    #[must_use]
    pub fn depth(&self) -> usize {
        self.traceback_depth
            .unwrap_or(5 * (self.code.constraint_length.max(2) - 1))
    }

    pub(crate) fn validate(&self) -> Result<()> {
        self.code.validate()?;
        if self.depth() == 0 {
            return Err(Error::Config(
                "traceback depth must be non-zero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.ber_threshold) {
            return Err(Error::Config(format!(
                "ber threshold {} outside 0..=1",
                self.ber_threshold
            )));
        }
        if self.acquisition_length <= self.depth() {
            return Err(Error::Config(format!(
                "acquisition length {} must exceed the traceback depth {}",
                self.acquisition_length,
                self.depth()
            )));
        }
        if self.ber_window == 0 {
            return Err(Error::Config("ber window must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// One way of reading the received symbols as code pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Candidate {
    inverted: bool,
    /// Symbols skipped so that pairs start on the right symbol.
    shift: usize,
}

impl Candidate {
    // Tie-break order: earlier candidates win equal error rates.
    const ALL: [Candidate; 4] = [
        Candidate {
            inverted: false,
            shift: 0,
        },
        Candidate {
            inverted: false,
            shift: 1,
        },
        Candidate {
            inverted: true,
            shift: 0,
        },
        Candidate {
            inverted: true,
            shift: 1,
        },
    ];

    fn bit(&self, symbol: f32) -> u8 {
        slice(symbol) ^ u8::from(self.inverted)
    }
}

/// Streaming rate 1/2 decoder stage taking soft symbols and producing decoded bits.
///
/// The stage starts out acquiring: it buffers an acquisition window of symbols and
/// decodes it under every polarity/alignment candidate, keeping the one with the lowest
/// error rate. If that rate is within `ber_threshold` the stage locks and the buffered
/// symbols are decoded for real, so nothing before the lock point is lost. While locked
/// the error rate is tracked over a sliding window of decoded bits; when a full window
/// exceeds the threshold the decoder flushes and goes back to acquiring.
///
/// Codes whose generators both have odd weight decode an inverted stream as a valid
/// one carrying inverted data. For such codes polarity cannot be told apart here and
/// acquisition settles on `Normal`; the deframer resolves the data inversion from the
/// sync marker.
pub struct ConvolutionalDecoder {
    code: Code,
    depth: usize,
    candidates: Vec<Candidate>,
    ber_threshold: f32,
    acquisition_symbols: usize,
    ber_window: usize,

    viterbi: Viterbi,
    locked: Option<Candidate>,
    acquiring: Vec<f32>,
    half: Option<f32>,
    window: VecDeque<u8>,
    window_errors: u32,
    locks: u64,
    lock_losses: u64,
}

impl ConvolutionalDecoder {
    /// # Errors
    /// [Error::Config] if the configuration is invalid.
    pub fn new(config: &ViterbiConfig) -> Result<Self> {
        config.validate()?;
        let depth = config.depth();
        let candidates = Candidate::ALL
            .into_iter()
            .filter(|c| match config.polarity {
                Some(Polarity::Normal) => !c.inverted,
                Some(Polarity::Inverted) => c.inverted,
                None => true,
            })
            .collect();
        Ok(ConvolutionalDecoder {
            code: config.code,
            depth,
            candidates,
            ber_threshold: config.ber_threshold,
            acquisition_symbols: 2 * config.acquisition_length + 1,
            ber_window: config.ber_window,
            viterbi: Viterbi::new(config.code, depth),
            locked: None,
            acquiring: Vec::new(),
            half: None,
            window: VecDeque::with_capacity(config.ber_window),
            window_errors: 0,
            locks: 0,
            lock_losses: 0,
        })
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked.is_some()
    }

    /// Polarity of the current lock, if any.
    #[must_use]
    pub fn polarity(&self) -> Option<Polarity> {
        self.locked.map(|c| {
            if c.inverted {
                Polarity::Inverted
            } else {
                Polarity::Normal
            }
        })
    }

    /// Channel bit error rate across the sliding window, `None` before any bit has been
    /// decoded since the last lock.
    ///
    /// This is corrected channel bits over coded bits received, two per decoded bit,
    /// so it measures the link before correction rather than the residual error rate
    /// of the decoded output. `ber_threshold` is compared against this value.
    #[must_use]
    pub fn ber(&self) -> Option<f32> {
        if self.window.is_empty() {
            return None;
        }
        Some(self.window_errors as f32 / (2 * self.window.len()) as f32)
    }

    /// Channel bits corrected over the life of the decoder.
    #[must_use]
    pub fn corrected(&self) -> u64 {
        self.viterbi.errors()
    }

    #[must_use]
    pub fn locks(&self) -> u64 {
        self.locks
    }

    #[must_use]
    pub fn lock_losses(&self) -> u64 {
        self.lock_losses
    }

    fn push(&mut self, symbol: f32, output: &mut Vec<u8>) {
        let Some(candidate) = self.locked else {
            self.acquiring.push(symbol);
            if self.acquiring.len() >= self.acquisition_symbols {
                self.acquire(output, false);
            }
            return;
        };
        let Some(first) = self.half.take() else {
            self.half = Some(symbol);
            return;
        };
        let pair = [candidate.bit(first), candidate.bit(symbol)];
        if let Some((bit, corrected)) = self.viterbi.push(pair) {
            output.push(bit);
            self.track(corrected, output);
        }
    }

    fn track(&mut self, corrected: u8, output: &mut Vec<u8>) {
        self.window.push_back(corrected);
        self.window_errors += u32::from(corrected);
        if self.window.len() > self.ber_window {
            if let Some(old) = self.window.pop_front() {
                self.window_errors -= u32::from(old);
            }
        }
        if self.window.len() < self.ber_window {
            return;
        }
        let ber = self.ber().unwrap_or(0.0);
        if ber > self.ber_threshold {
            info!(ber, "convolutional decoder lost lock");
            output.extend(self.viterbi.flush().into_iter().map(|(bit, _)| bit));
            self.unlock();
        }
    }

    fn unlock(&mut self) {
        self.locked = None;
        self.half = None;
        self.window.clear();
        self.window_errors = 0;
        self.lock_losses += 1;
    }

    // Error rate of `symbols` decoded under `candidate`.
    fn measure(&self, symbols: &[f32], candidate: Candidate) -> f32 {
        let mut viterbi = Viterbi::new(self.code, self.depth);
        let mut decided = 0usize;
        let mut corrected = 0u64;
        for pair in symbols
            .get(candidate.shift..)
            .unwrap_or(&[])
            .chunks_exact(2)
        {
            if let Some((_, c)) = viterbi.push([candidate.bit(pair[0]), candidate.bit(pair[1])]) {
                decided += 1;
                corrected += u64::from(c);
            }
        }
        if decided == 0 {
            return 1.0;
        }
        corrected as f32 / (2 * decided) as f32
    }

    fn acquire(&mut self, output: &mut Vec<u8>, at_end: bool) {
        let symbols = std::mem::take(&mut self.acquiring);
        let mut best: Option<(Candidate, f32)> = None;
        for candidate in &self.candidates {
            let ber = self.measure(&symbols, *candidate);
            if best.map_or(true, |(_, b)| ber < b) {
                best = Some((*candidate, ber));
            }
        }

        match best {
            Some((candidate, ber)) if ber <= self.ber_threshold => {
                info!(
                    inverted = candidate.inverted,
                    shift = candidate.shift,
                    ber,
                    "convolutional decoder locked"
                );
                self.locked = Some(candidate);
                self.locks += 1;
                self.viterbi.reset();
                for symbol in &symbols[candidate.shift..] {
                    self.push(*symbol, output);
                }
            }
            _ => {
                debug!(ber = best.map(|(_, b)| b), "no convolutional lock");
                if !at_end {
                    // slide the window by half to retry on partly new data
                    self.acquiring = symbols[symbols.len() / 2..].to_vec();
                }
            }
        }
    }
}

impl Block for ConvolutionalDecoder {
    type Input = f32;
    type Output = u8;

    fn work(&mut self, input: &[f32], output: &mut Vec<u8>) {
        for symbol in input {
            self.push(*symbol, output);
        }
    }

    fn flush(&mut self, output: &mut Vec<u8>) {
        if self.locked.is_none() && !self.acquiring.is_empty() {
            self.acquire(output, true);
        }
        if self.locked.is_some() {
            output.extend(self.viterbi.flush().into_iter().map(|(bit, _)| bit));
        }
    }
}
