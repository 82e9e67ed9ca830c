use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Largest supported constraint length.
pub const MAX_CONSTRAINT_LENGTH: usize = 9;

/// Rate 1/2 convolutional code definition.
///
/// Generators are tap masks over a `K` bit register whose most significant bit
/// (bit `K-1`) holds the newest input bit and bit 0 the oldest.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Code {
    pub constraint_length: usize,
    pub generators: [u32; 2],
}

impl Code {
    /// NASA/CCSDS standard K=7 code, generators 171 and 133 (octal).
    pub const CCSDS: Code = Code {
        constraint_length: 7,
        generators: [0o171, 0o133],
    };

    pub(crate) fn validate(&self) -> Result<()> {
        let k = self.constraint_length;
        if !(2..=MAX_CONSTRAINT_LENGTH).contains(&k) {
            return Err(Error::Config(format!(
                "constraint length {k} outside 2..={MAX_CONSTRAINT_LENGTH}"
            )));
        }
        for g in self.generators {
            if g == 0 || g >= 1 << k {
                return Err(Error::Config(format!(
                    "generator {g:#o} does not fit constraint length {k}"
                )));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn num_states(&self) -> usize {
        1 << (self.constraint_length - 1)
    }

    /// Expected output pair for every value of the full `K` bit register.
    fn outputs(&self) -> Vec<[u8; 2]> {
        (0..1u32 << self.constraint_length)
            .map(|reg| {
                [
                    ((reg & self.generators[0]).count_ones() & 1) as u8,
                    ((reg & self.generators[1]).count_ones() & 1) as u8,
                ]
            })
            .collect()
    }
}

impl Default for Code {
    fn default() -> Self {
        Self::CCSDS
    }
}

/// Convolutional encoder, used to synthesize test signals and to re-encode decoded
/// bits when counting corrections.
#[derive(Debug, Clone)]
pub struct Encoder {
    code: Code,
    outputs: Vec<[u8; 2]>,
    state: u32,
}

impl Encoder {
    #[must_use]
    pub fn new(code: Code) -> Self {
        Encoder {
            outputs: code.outputs(),
            code,
            state: 0,
        }
    }

    /// Encode one bit into its output pair.
    pub fn push(&mut self, bit: u8) -> [u8; 2] {
        let reg = (u32::from(bit & 1) << (self.code.constraint_length - 1)) | self.state;
        self.state = reg >> 1;
        self.outputs[reg as usize]
    }

    /// Encode `bits`, two output bits per input bit.
    pub fn encode(&mut self, bits: &[u8]) -> Vec<u8> {
        bits.iter().flat_map(|b| self.push(*b)).collect()
    }
}

/// Hard decision Viterbi decoder for rate 1/2 codes.
///
/// Decisions are released with a fixed delay equal to the traceback depth: every step
/// after the first `depth` traces back from the best state and decides the bit `depth`
/// steps in the past. Each released bit is re-encoded along the survivor path and
/// compared against the pair actually received for that step; the mismatches are the
/// channel bits the decoder corrected.
#[derive(Debug, Clone)]
pub struct Viterbi {
    k: usize,
    mask: usize,
    depth: usize,
    outputs: Vec<[u8; 2]>,
    metrics: Vec<u32>,
    scratch: Vec<u32>,
    // Ring of the last depth+1 steps: per-state survivor decisions (the register bit
    // shifted out) and the received pair.
    decisions: Vec<Vec<u8>>,
    received: Vec<[u8; 2]>,
    head: usize,
    steps: u64,
    errors: u64,
}

impl Viterbi {
    /// # Panics
    /// If `depth` is zero or the code is invalid; see [Code::validate].
    #[must_use]
    pub fn new(code: Code, depth: usize) -> Self {
        assert!(depth > 0, "traceback depth must be non-zero");
        assert!(code.validate().is_ok(), "invalid code {code:?}");
        let states = code.num_states();
        Viterbi {
            k: code.constraint_length,
            mask: states - 1,
            depth,
            outputs: code.outputs(),
            metrics: vec![0; states],
            scratch: vec![0; states],
            decisions: vec![vec![0; states]; depth + 1],
            received: vec![[0; 2]; depth + 1],
            head: 0,
            steps: 0,
            errors: 0,
        }
    }

    /// Number of output bits held back at any time.
    #[must_use]
    pub fn delay(&self) -> usize {
        self.depth
    }

    /// Channel bits corrected so far.
    #[must_use]
    pub fn errors(&self) -> u64 {
        self.errors
    }

    /// Extend the trellis by one received pair. Returns the decided bit for the step
    /// `depth` pairs ago, together with the number of channel bits corrected in it.
    pub fn push(&mut self, pair: [u8; 2]) -> Option<(u8, u8)> {
        let top = self.k - 2;
        let slot = self.head;
        for next in 0..=self.mask {
            let input = next >> top;
            let mut best = u32::MAX;
            let mut choice = 0u8;
            for lsb in 0..2usize {
                let prev = ((next << 1) & self.mask) | lsb;
                let reg = (input << (self.k - 1)) | prev;
                let expected = self.outputs[reg];
                let branch = u32::from(expected[0] ^ pair[0]) + u32::from(expected[1] ^ pair[1]);
                let metric = self.metrics[prev] + branch;
                if metric < best {
                    best = metric;
                    choice = lsb as u8;
                }
            }
            self.scratch[next] = best;
            self.decisions[slot][next] = choice;
        }
        std::mem::swap(&mut self.metrics, &mut self.scratch);
        let min = self.metrics.iter().copied().min().unwrap_or(0);
        self.metrics.iter_mut().for_each(|m| *m -= min);

        self.received[slot] = pair;
        self.head = (self.head + 1) % (self.depth + 1);
        self.steps += 1;

        if self.steps <= self.depth as u64 {
            return None;
        }
        let mut state = self.best_state();
        for back in 0..self.depth {
            state = self.previous(state, self.slot_back(back));
        }
        Some(self.decide(state, self.slot_back(self.depth)))
    }

    /// Release every bit still held back, tracing back from the best final state.
    pub fn flush(&mut self) -> Vec<(u8, u8)> {
        let pending = self.steps.min(self.depth as u64) as usize;
        let mut states = Vec::with_capacity(pending);
        let mut state = self.best_state();
        for back in 0..pending {
            states.push(state);
            state = self.previous(state, self.slot_back(back));
        }
        let out = (0..pending)
            .rev()
            .map(|back| self.decide(states[back], self.slot_back(back)))
            .collect();
        self.reset();
        out
    }

    /// Forget the trellis, keeping the error count.
    pub fn reset(&mut self) {
        self.metrics.iter_mut().for_each(|m| *m = 0);
        self.head = 0;
        self.steps = 0;
    }

    fn best_state(&self) -> usize {
        self.metrics
            .iter()
            .enumerate()
            .min_by_key(|(_, m)| **m)
            .map_or(0, |(s, _)| s)
    }

    // Ring slot of the step `back` steps before the most recent one.
    fn slot_back(&self, back: usize) -> usize {
        (self.head + self.depth - back) % (self.depth + 1)
    }

    fn previous(&self, state: usize, slot: usize) -> usize {
        ((state << 1) & self.mask) | usize::from(self.decisions[slot][state])
    }

    // `state` is the survivor state right after the step stored at `slot`.
    fn decide(&mut self, state: usize, slot: usize) -> (u8, u8) {
        let reg = (state << 1) | usize::from(self.decisions[slot][state]);
        let expected = self.outputs[reg];
        let got = self.received[slot];
        let corrected = (expected[0] ^ got[0]) + (expected[1] ^ got[1]);
        self.errors += u64::from(corrected);
        ((state >> (self.k - 2)) as u8, corrected)
    }
}
