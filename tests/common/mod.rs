//! Synthetic transmitter for end to end tests.
#![allow(dead_code)]

use std::f32::consts::PI;
use std::path::Path;

use downlink::fec::{Code, Encoder};
use downlink::framing::{DefaultDerandomizer, Derandomizer, ASM};
use downlink::spacepacket::{Packet, PrimaryHeader};
use num_complex::Complex32;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

/// MSB first bits of `bytes`.
pub fn bits(bytes: &[u8]) -> Vec<u8> {
    bytes
        .iter()
        .flat_map(|b| (0..8).rev().map(move |i| (b >> i) & 1))
        .collect()
}

pub fn random_bits(rng: &mut StdRng, n: usize) -> Vec<u8> {
    (0..n).map(|_| rng.gen_range(0..=1u8)).collect()
}

/// Unsegmented telemetry packet with a payload counting up from `seed`.
pub fn packet(apid: u16, sequence_id: u16, payload_len: usize, seed: u8) -> Packet {
    let header = PrimaryHeader {
        version: 0,
        type_flag: 0,
        has_secondary_header: false,
        apid,
        sequence_flags: 3,
        sequence_id,
        len_minus1: 0,
    };
    let payload: Vec<u8> = (0..payload_len)
        .map(|i| seed.wrapping_add(i as u8))
        .collect();
    Packet::new(header, &payload).unwrap()
}

/// Transmitter settings.
pub struct Transmitter {
    pub frame_length: usize,
    pub randomize: bool,
    /// Random bits before the first marker, long enough for decoder acquisition.
    pub preamble_bits: usize,
    /// Random bits after the last frame. Keep it shorter than a marker plus frame so
    /// no flywheel frame is cut from it.
    pub postamble_bits: usize,
    /// Carrier phase in radians.
    pub phase: f32,
    /// Carrier offset in cycles/sample.
    pub frequency: f32,
    /// Standard deviation of gaussian noise added to each symbol.
    pub noise: f32,
    pub seed: u64,
}

impl Default for Transmitter {
    fn default() -> Self {
        Transmitter {
            frame_length: 16,
            randomize: true,
            preamble_bits: 4096,
            postamble_bits: 64,
            phase: 0.4,
            frequency: 0.0002,
            noise: 0.0,
            seed: 42,
        }
    }
}

impl Transmitter {
    /// Frame each packet into its own frame, filling the remainder with zeros.
    pub fn frames_for(&self, packets: &[Packet]) -> Vec<Vec<u8>> {
        packets
            .iter()
            .map(|p| {
                let mut frame = p.data.clone();
                assert!(frame.len() <= self.frame_length, "packet exceeds frame");
                frame.resize(self.frame_length, 0);
                frame
            })
            .collect()
    }

    /// Uncoded bit stream: preamble, each frame behind an ASM, postamble, and a zero
    /// tail that returns the encoder to its start state.
    pub fn bitstream(&self, frames: &[Vec<u8>]) -> Vec<u8> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut out = random_bits(&mut rng, self.preamble_bits);
        for frame in frames {
            out.extend(bits(&ASM));
            if self.randomize {
                out.extend(bits(&DefaultDerandomizer.derandomize(frame)));
            } else {
                out.extend(bits(frame));
            }
        }
        out.extend(random_bits(&mut rng, self.postamble_bits));
        out.resize(out.len() + Code::CCSDS.constraint_length - 1, 0);
        out
    }

    /// Convolutionally encoded BPSK symbols, bit 1 mapped to +1.
    pub fn symbols(&self, frames: &[Vec<u8>]) -> Vec<f32> {
        let mut rng = StdRng::seed_from_u64(self.seed + 1);
        let noise = Normal::new(0.0, self.noise).unwrap();
        Encoder::new(Code::CCSDS)
            .encode(&self.bitstream(frames))
            .into_iter()
            .map(|b| {
                let s = if b == 1 { 1.0 } else { -1.0 };
                s + noise.sample(&mut rng)
            })
            .collect()
    }

    /// Symbols rotated by the configured carrier phase and frequency offset.
    pub fn samples(&self, frames: &[Vec<u8>]) -> Vec<Complex32> {
        self.symbols(frames)
            .into_iter()
            .enumerate()
            .map(|(i, s)| {
                let theta = self.phase + 2.0 * PI * self.frequency * i as f32;
                Complex32::from_polar(s, theta)
            })
            .collect()
    }

    /// Write samples as little-endian complex float32 to `path`.
    pub fn write_cf32(&self, frames: &[Vec<u8>], path: &Path) {
        let bytes: Vec<u8> = self
            .samples(frames)
            .iter()
            .flat_map(|s| s.re.to_le_bytes().into_iter().chain(s.im.to_le_bytes()))
            .collect();
        std::fs::write(path, bytes).unwrap();
    }

    /// Write symbols as int8 soft symbols to `path`.
    pub fn write_i8_soft(&self, frames: &[Vec<u8>], path: &Path) {
        let bytes: Vec<u8> = self
            .symbols(frames)
            .iter()
            .map(|s| (s * 100.0).clamp(-127.0, 127.0) as i8 as u8)
            .collect();
        std::fs::write(path, bytes).unwrap();
    }
}
