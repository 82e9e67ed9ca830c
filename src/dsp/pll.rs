use std::f32::consts::PI;

use num_complex::Complex32;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::block::Block;
use crate::{Error, Result};

/// Loop parameters for [CarrierPll].
#[derive(Serialize, Deserialize, TypedBuilder, Debug, Clone, Copy, PartialEq)]
pub struct PllConfig {
    /// Phase (proportional) gain.
    pub alpha: f32,
    /// Frequency (integral) gain.
    pub beta: f32,
    /// Frequency estimate clamp in cycles/sample.
    pub max_offset: f32,
}

impl PllConfig {
    /// Critically damped gains for a normalized loop bandwidth.
    #[must_use]
    pub fn from_loop_bandwidth(bandwidth: f32, max_offset: f32) -> Self {
        const DAMPING: f32 = 0.707;
        let omega = bandwidth / (DAMPING + 1.0 / (4.0 * DAMPING));
        PllConfig {
            alpha: 2.0 * DAMPING * omega,
            beta: omega * omega,
            max_offset,
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        let finite = self.alpha.is_finite() && self.beta.is_finite() && self.max_offset.is_finite();
        if !finite || self.alpha <= 0.0 || self.beta <= 0.0 || self.max_offset < 0.0 {
            return Err(Error::Config(format!("invalid pll gains {self:?}")));
        }
        Ok(())
    }
}

impl Default for PllConfig {
    fn default() -> Self {
        Self::from_loop_bandwidth(0.01, 0.01)
    }
}

/// Decision-directed BPSK carrier recovery.
///
/// Each sample is de-rotated by the current phase estimate and the real part is emitted
/// as the soft symbol. The phase error is the quadrature component signed by the
/// in-phase decision, which makes the loop insensitive to the data modulation (and to
/// which of the two BPSK phases it locks on).
///
/// ```text
/// input → [× e^(-jθ)] → re → symbol
///              ↑          ↓
///         phase/freq ← sign(re)·im
/// ```
#[derive(Debug, Clone)]
pub struct CarrierPll {
    alpha: f32,
    beta: f32,
    /// radians/sample
    max_freq: f32,
    phase: f32,
    /// radians/sample
    freq: f32,
    error: f32,
}

impl CarrierPll {
    pub fn new(config: PllConfig) -> Self {
        CarrierPll {
            alpha: config.alpha,
            beta: config.beta,
            max_freq: 2.0 * PI * config.max_offset,
            phase: 0.0,
            freq: 0.0,
            error: 0.0,
        }
    }

    /// Track one sample and return the demodulated soft symbol.
    pub fn process(&mut self, sample: Complex32) -> f32 {
        let rotated = sample * Complex32::from_polar(1.0, -self.phase);

        let decision = if rotated.re >= 0.0 { 1.0 } else { -1.0 };
        let error = (decision * rotated.im).clamp(-1.0, 1.0);
        self.error = error;

        self.freq = (self.freq + self.beta * error).clamp(-self.max_freq, self.max_freq);
        self.phase += self.freq + self.alpha * error;
        while self.phase > PI {
            self.phase -= 2.0 * PI;
        }
        while self.phase < -PI {
            self.phase += 2.0 * PI;
        }

        rotated.re
    }

    /// Current phase estimate in radians.
    #[must_use]
    pub fn phase(&self) -> f32 {
        self.phase
    }

    /// Current frequency estimate in cycles/sample.
    #[must_use]
    pub fn frequency(&self) -> f32 {
        self.freq / (2.0 * PI)
    }

    /// Phase error computed for the most recent sample.
    #[must_use]
    pub fn error(&self) -> f32 {
        self.error
    }
}

impl Block for CarrierPll {
    type Input = Complex32;
    type Output = f32;

    fn work(&mut self, input: &[Complex32], output: &mut Vec<f32>) {
        output.extend(input.iter().map(|s| self.process(*s)));
    }
}
