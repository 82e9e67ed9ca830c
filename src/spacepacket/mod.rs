//! CCSDS space packet primary header codec and packet assembly from frames.
//!
//! References:
//! * CCSDS Space Packet Protocol 133.0-B-2
mod assembler;

use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub use assembler::*;

pub type Apid = u16;

/// CCSDS Primary Header
///
/// The primary header format is common to all CCSDS space packets. Every field is
/// masked to its width on encode, so any header value round-trips through
/// [PrimaryHeader::encode] and [PrimaryHeader::decode] once it fits its field.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
pub struct PrimaryHeader {
    /// 3 bits
    pub version: u8,
    /// 1 bit; 0 for telemetry
    pub type_flag: u8,
    pub has_secondary_header: bool,
    /// 11 bits
    pub apid: Apid,
    /// 2 bits; 3 for an unsegmented packet.
    pub sequence_flags: u8,
    /// 14 bits
    pub sequence_id: u16,
    /// Length of the packet data field minus one.
    pub len_minus1: u16,
}

impl PrimaryHeader {
    /// Size of a ``PrimaryHeader``
    pub const LEN: usize = 6;
    pub const SEQ_MAX: u16 = 16383;

    /// Decode from bytes. Returns `None` if there are not enough bytes to construct the
    /// header.
    #[must_use]
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::LEN {
            return None;
        }
        let d1 = u16::from_be_bytes([buf[0], buf[1]]);
        let d2 = u16::from_be_bytes([buf[2], buf[3]]);
        let d3 = u16::from_be_bytes([buf[4], buf[5]]);

        Some(PrimaryHeader {
            version: (d1 >> 13 & 0x7) as u8,
            type_flag: (d1 >> 12 & 0x1) as u8,
            has_secondary_header: (d1 >> 11 & 0x1) == 1,
            apid: (d1 & 0x7ff),
            sequence_flags: (d2 >> 14 & 0x3) as u8,
            sequence_id: (d2 & 0x3fff),
            len_minus1: d3,
        })
    }

    /// Encode to bytes.
    #[must_use]
    pub fn encode(&self) -> [u8; Self::LEN] {
        let d1 = (u16::from(self.version & 0x7) << 13)
            | (u16::from(self.type_flag & 0x1) << 12)
            | (u16::from(self.has_secondary_header) << 11)
            | (self.apid & 0x7ff);
        let d2 = (u16::from(self.sequence_flags & 0x3) << 14) | (self.sequence_id & 0x3fff);
        let [a, b] = d1.to_be_bytes();
        let [c, d] = d2.to_be_bytes();
        let [e, f] = self.len_minus1.to_be_bytes();
        [a, b, c, d, e, f]
    }

    /// Total packet length in bytes, including this header, as declared by the header.
    #[must_use]
    pub fn packet_len(&self) -> usize {
        Self::LEN + self.len_minus1 as usize + 1
    }
}

/// Packet represents a single CCSDS space packet and its associated data.
///
/// This packet contains the primary header data as well as the user data,
/// which may or may not container a secondary header. See the header's
/// `has_secondary_header` flag.
///
/// # Example
/// ```
/// use downlink::spacepacket::{Packet, PrimaryHeader};
///
/// let header = PrimaryHeader {
///     version: 0,
///     type_flag: 0,
///     has_secondary_header: false,
///     apid: 100,
///     sequence_flags: 3,
///     sequence_id: 1,
///     len_minus1: 0,
/// };
/// let packet = Packet::new(header, &[0u8; 10]).unwrap();
/// assert_eq!(packet.header.len_minus1, 9);
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// All packets have a primary header
    pub header: PrimaryHeader,
    /// All packet bytes, including header and user data
    pub data: Vec<u8>,
}

impl Display for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Packet{{header: {:?}, data:[len={}]}}",
            self.header,
            self.data.len()
        )?;
        Ok(())
    }
}

impl Packet {
    /// Create a packet with `header`, setting its length field from `payload`.
    ///
    /// # Errors
    /// [Error::NotEnoughData] if `payload` is empty and [Error::Overflow] if it is
    /// longer than the length field can describe.
    pub fn new(mut header: PrimaryHeader, payload: &[u8]) -> Result<Self> {
        if payload.is_empty() {
            return Err(Error::NotEnoughData {
                actual: 0,
                minimum: 1,
            });
        }
        header.len_minus1 = u16::try_from(payload.len() - 1).map_err(|_| Error::Overflow)?;
        let mut data = Vec::with_capacity(PrimaryHeader::LEN + payload.len());
        data.extend_from_slice(&header.encode());
        data.extend_from_slice(payload);
        Ok(Packet { header, data })
    }

    /// Decode from bytes. Returns `None` if there are not enough bytes to construct the
    /// header or if there are not enough bytes to construct the [Packet] of the length
    /// indicated by the header.
    #[must_use]
    pub fn decode(dat: &[u8]) -> Option<Packet> {
        let header = PrimaryHeader::decode(dat)?;
        let data = dat.get(..header.packet_len())?;
        Some(Packet {
            header,
            data: data.to_vec(),
        })
    }

    /// Header and payload bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = self.header.encode().to_vec();
        out.extend_from_slice(self.payload());
        out
    }

    /// User data following the primary header.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        self.data.get(PrimaryHeader::LEN..).unwrap_or(&[])
    }
}

/// Sequence counts skipped between `last` and `cur`, counting modulo the 14-bit
/// sequence counter.
#[must_use]
pub fn missing_packets(cur: u16, last: u16) -> u16 {
    cur.wrapping_sub(last).wrapping_sub(1) & PrimaryHeader::SEQ_MAX
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use test_case::test_case;

    use super::*;

    #[test]
    fn decode_header() {
        // bytes from a SNPP CrIS packet
        let dat = hex::decode("0d59d2ab0a8f").unwrap();
        let ph = PrimaryHeader::decode(&dat).unwrap();

        assert_eq!(ph.version, 0);
        assert_eq!(ph.type_flag, 0);
        assert!(ph.has_secondary_header);
        assert_eq!(ph.apid, 1369);
        assert_eq!(ph.sequence_flags, 3);
        assert_eq!(ph.sequence_id, 4779);
        assert_eq!(ph.len_minus1, 2703);
        assert_eq!(ph.encode().to_vec(), dat);
    }

    #[test]
    fn decode_is_none_when_data_too_short() {
        assert!(PrimaryHeader::decode(&[0u8; 5]).is_none());
        let short = hex::decode("0d59d2ab0001ff").unwrap();
        assert!(Packet::decode(&short).is_none());
    }

    #[test]
    fn header_round_trips() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            let header = PrimaryHeader {
                version: rng.gen_range(0..8),
                type_flag: rng.gen_range(0..2),
                has_secondary_header: rng.gen(),
                apid: rng.gen_range(0..0x800),
                sequence_flags: rng.gen_range(0..4),
                sequence_id: rng.gen_range(0..=PrimaryHeader::SEQ_MAX),
                len_minus1: rng.gen(),
            };
            assert_eq!(PrimaryHeader::decode(&header.encode()), Some(header));
        }
    }

    #[test_case(1 ; "single byte")]
    #[test_case(10 ; "ten bytes")]
    #[test_case(65536 ; "largest")]
    fn new_packet_sets_length_field(size: usize) {
        let header = PrimaryHeader::decode(&[0u8; 6]).unwrap();
        let packet = Packet::new(header, &vec![0xa5; size]).unwrap();

        assert_eq!(packet.header.len_minus1 as usize, size - 1);
        let encoded = packet.encode();
        let decoded = PrimaryHeader::decode(&encoded).unwrap();
        assert_eq!(decoded.len_minus1 as usize, size - 1);
        assert_eq!(encoded.len(), PrimaryHeader::LEN + size);
        assert_eq!(Packet::decode(&encoded), Some(packet));
    }

    #[test]
    fn new_packet_rejects_bad_payload_sizes() {
        let header = PrimaryHeader::decode(&[0u8; 6]).unwrap();
        assert!(matches!(
            Packet::new(header, &[]),
            Err(Error::NotEnoughData { .. })
        ));
        assert!(matches!(
            Packet::new(header, &vec![0; 65537]),
            Err(Error::Overflow)
        ));
    }

    #[test_case(5, 4, 0 ; "consecutive")]
    #[test_case(5, 3, 1 ; "one skipped")]
    #[test_case(0, PrimaryHeader::SEQ_MAX, 0 ; "counter wraps")]
    #[test_case(0, PrimaryHeader::SEQ_MAX - 1, 1 ; "gap across wrap")]
    #[test_case(2, PrimaryHeader::SEQ_MAX, 2 ; "gap after wrap")]
    #[test_case(7, 7, PrimaryHeader::SEQ_MAX ; "repeated count")]
    fn test_missing_packets(cur: u16, last: u16, expected: u16) {
        assert_eq!(missing_packets(cur, last), expected);
    }
}
