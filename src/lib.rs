#![doc = include_str!("../README.md")]

mod error;

pub mod block;
pub mod dsp;
pub mod fec;
pub mod framing;
pub mod pipeline;
pub mod spacepacket;
pub mod stream;

pub use error::{Error, Result};
