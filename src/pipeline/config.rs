use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::dsp::PllConfig;
use crate::fec::ViterbiConfig;
use crate::framing::DeframerConfig;
use crate::spacepacket::{LengthPolicy, PacketMode};
use crate::{Error, Result};

/// Layout of raw input files.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum InputFormat {
    /// Complex float32 samples, little-endian I then Q.
    #[default]
    Cf32,
    /// Complex int8 samples, I then Q.
    Ci8,
    /// Int8 soft symbols, already demodulated.
    I8Soft,
}

impl InputFormat {
    /// Bytes per input element.
    #[must_use]
    pub fn element_size(&self) -> usize {
        match self {
            InputFormat::Cf32 => 8,
            InputFormat::Ci8 => 2,
            InputFormat::I8Soft => 1,
        }
    }

    #[must_use]
    pub fn is_complex(&self) -> bool {
        !matches!(self, InputFormat::I8Soft)
    }
}

/// Mission profile: which stages a run uses and how each is configured.
///
/// Profiles load from JSON, where every field has a default:
/// ```
/// use downlink::pipeline::Profile;
///
/// let profile = Profile::from_json_reader(
///     r#"{"input": "ci8", "deframer": {"frame_length": 892}}"#.as_bytes(),
/// ).unwrap();
/// assert_eq!(profile.deframer.frame_length, 892);
/// ```
#[derive(Serialize, Deserialize, TypedBuilder, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Profile {
    #[builder(default)]
    pub input: InputFormat,
    /// Carrier recovery for complex input. Without it the in-phase component is used
    /// as the soft symbol.
    #[builder(default = Some(PllConfig::default()))]
    pub pll: Option<PllConfig>,
    /// Convolutional decoding. Without it symbols are sliced straight to bits.
    #[builder(default = Some(ViterbiConfig::default()))]
    pub viterbi: Option<ViterbiConfig>,
    #[builder(default)]
    pub deframer: DeframerConfig,
    #[builder(default)]
    pub packets: PacketMode,
    #[builder(default)]
    pub length_policy: LengthPolicy,
    /// Chunks in flight between two stages.
    #[builder(default = 16)]
    pub stream_capacity: usize,
    /// Elements read per stage iteration.
    #[builder(default = 8192)]
    pub chunk_size: usize,
}

impl Default for Profile {
    fn default() -> Self {
        Profile::builder().build()
    }
}

impl Profile {
    /// # Errors
    /// [Error::Io] if the JSON is malformed, or [Error::Config] if it does not hold a
    /// valid profile.
    pub fn from_json_reader<R: Read>(reader: R) -> Result<Self> {
        let profile: Profile = serde_json::from_reader(reader).map_err(std::io::Error::from)?;
        profile.validate()?;
        Ok(profile)
    }

    /// # Errors
    /// See [Profile::from_json_reader]; also [Error::Io] if the file cannot be opened.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_json_reader(BufReader::new(File::open(path)?))
    }

    /// Check every value, returning the first problem found.
    ///
    /// # Errors
    /// [Error::Config] describing the invalid value.
    pub fn validate(&self) -> Result<()> {
        if let Some(pll) = &self.pll {
            if !self.input.is_complex() {
                return Err(Error::Config(
                    "carrier recovery requires complex input".to_string(),
                ));
            }
            pll.validate()?;
        }
        if let Some(viterbi) = &self.viterbi {
            viterbi.validate()?;
        }
        self.deframer.validate()?;
        if self.stream_capacity == 0 {
            return Err(Error::Config(
                "stream capacity must be non-zero".to_string(),
            ));
        }
        if self.chunk_size == 0 {
            return Err(Error::Config("chunk size must be non-zero".to_string()));
        }
        Ok(())
    }
}
