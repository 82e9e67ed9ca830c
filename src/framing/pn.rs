use serde::{Deserialize, Serialize};

/// Removes the pseudo-noise sequence applied to frame data by the transmitter.
///
/// Derandomization is a pure per-frame transform; nothing is carried from one frame to
/// the next.
pub trait Derandomizer: Send + Sync {
    fn derandomize(&self, dat: &[u8]) -> Vec<u8>;
}

const PN_LEN: usize = 255;

// CCSDS PN, h(x) = x^8 + x^7 + x^5 + x^3 + 1 seeded with all ones, generated MSB first.
const fn ccsds_sequence() -> [u8; PN_LEN] {
    let mut out = [0u8; PN_LEN];
    let mut reg: u8 = 0xff;
    let mut i = 0;
    while i < PN_LEN {
        let mut byte = 0u8;
        let mut b = 0;
        while b < 8 {
            byte = (byte << 1) | (reg & 1);
            let feedback = (reg ^ (reg >> 3) ^ (reg >> 5) ^ (reg >> 7)) & 1;
            reg = (reg >> 1) | (feedback << 7);
            b += 1;
        }
        out[i] = byte;
        i += 1;
    }
    out
}

static CCSDS_PN: [u8; PN_LEN] = ccsds_sequence();

/// Derandomizer for the CCSDS standard pseudo-random sequence (CCSDS 131.0-B).
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultDerandomizer;

impl Derandomizer for DefaultDerandomizer {
    fn derandomize(&self, dat: &[u8]) -> Vec<u8> {
        dat.iter()
            .zip(CCSDS_PN.iter().cycle())
            .map(|(d, p)| d ^ p)
            .collect()
    }
}

/// XORs frame data with a caller supplied sequence, repeated as needed.
#[derive(Debug, Clone)]
pub struct SequenceDerandomizer {
    sequence: Vec<u8>,
}

impl SequenceDerandomizer {
    /// # Panics
    /// If `sequence` is empty.
    #[must_use]
    pub fn new(sequence: Vec<u8>) -> Self {
        assert!(!sequence.is_empty(), "derandomization sequence is empty");
        SequenceDerandomizer { sequence }
    }
}

impl Derandomizer for SequenceDerandomizer {
    fn derandomize(&self, dat: &[u8]) -> Vec<u8> {
        dat.iter()
            .zip(self.sequence.iter().cycle())
            .map(|(d, p)| d ^ p)
            .collect()
    }
}

/// Which derandomization, if any, a link uses.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Randomization {
    None,
    #[default]
    Ccsds,
    Sequence(Vec<u8>),
}

impl Randomization {
    /// The derandomizer for this setting; `None` for a link sent in the clear.
    #[must_use]
    pub fn derandomizer(&self) -> Option<Box<dyn Derandomizer>> {
        match self {
            Randomization::None => None,
            Randomization::Ccsds => Some(Box::new(DefaultDerandomizer)),
            Randomization::Sequence(seq) => Some(Box::new(SequenceDerandomizer::new(seq.clone()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ccsds_sequence_starts_with_known_bytes() {
        assert_eq!(
            hex::encode(&CCSDS_PN[..6]),
            "ff480ec09a0d",
            "first bytes of the CCSDS PN sequence"
        );
    }

    #[test]
    fn ccsds_sequence_repeats_every_255_bytes() {
        let zeros = vec![0u8; 2 * PN_LEN];
        let pn = DefaultDerandomizer.derandomize(&zeros);
        assert_eq!(pn[..PN_LEN], pn[PN_LEN..]);
    }

    #[test]
    fn derandomize_is_its_own_inverse() {
        let dat: Vec<u8> = (0..=255).collect();
        let pn = DefaultDerandomizer;
        assert_eq!(pn.derandomize(&pn.derandomize(&dat)), dat);
    }

    #[test]
    fn sequence_derandomizer_cycles() {
        let pn = SequenceDerandomizer::new(vec![0xff, 0x00]);
        assert_eq!(pn.derandomize(&[0x0f, 0x0f, 0x0f]), vec![0xf0, 0x0f, 0xf0]);
    }
}
