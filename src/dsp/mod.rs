//! Symbol-level signal processing: carrier recovery and hard decisions.
mod pll;

pub use pll::*;

use crate::block::Block;

/// Hard decision for a BPSK soft symbol; a positive symbol carries a 1.
#[inline]
#[must_use]
pub fn slice(symbol: f32) -> u8 {
    u8::from(symbol >= 0.0)
}

/// Converts soft symbols into hard bits for uncoded links.
#[derive(Debug, Default, Clone, Copy)]
pub struct Slicer;

impl Block for Slicer {
    type Input = f32;
    type Output = u8;

    fn work(&mut self, input: &[f32], output: &mut Vec<u8>) {
        output.extend(input.iter().map(|s| slice(*s)));
    }
}
