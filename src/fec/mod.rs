//! Forward error correction for rate 1/2 convolutionally coded links.
mod decoder;
mod viterbi;

pub use decoder::*;
pub use viterbi::*;
