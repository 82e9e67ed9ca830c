//! Frame synchronization and transfer frame decoding.
//!
//! The [Deframer] turns a corrected bitstream into fixed length [Frame]s. When the
//! link carries CCSDS virtual channel frames, [Vcdu] and [MPDU] give access to the
//! transfer frame header and the multiplexed packet data it carries.
mod deframer;
mod pn;

pub use deframer::*;
pub use pn::*;

use serde::{Deserialize, Serialize};

pub type Scid = u16;
pub type Vcid = u16;

/// Default CCSDS attached sync marker.
pub const ASM: [u8; 4] = [0x1a, 0xcf, 0xfc, 0x1d];

/// A fixed length block of data found following a sync marker.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame bytes, derandomized if the link is randomized. Does not include the marker.
    pub data: Vec<u8>,
    /// Bit errors in the marker preceding this frame; 0 is a perfect match.
    pub score: u32,
    /// True if the deframer was locked when the frame was cut. Frames cut on an
    /// unconfirmed marker are not synced.
    pub synced: bool,
    /// The frame was found following an inverted marker and its bits have been
    /// inverted back.
    pub inverted: bool,
    /// Offset in bits of the first data bit in the deframer's input.
    pub position: u64,
}

/// Primary header of a CCSDS virtual channel transfer frame.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct VCDUHeader {
    /// 2 bits
    pub version: u8,
    /// 8 bits
    pub scid: Scid,
    /// 6 bits
    pub vcid: Vcid,
    /// 24 bit virtual channel frame count.
    pub counter: u32,
    pub replay: bool,
    /// The frame count cycle field is in use.
    pub cycle: bool,
    /// 4 bits
    pub counter_cycle: u8,
}

impl VCDUHeader {
    pub const LEN: usize = 6;
    /// Virtual channel carrying only fill.
    pub const FILL: Vcid = 63;
    /// Frame counts are taken modulo `COUNTER_MASK + 1`.
    pub const COUNTER_MASK: u32 = 0xff_ffff;

    /// Parse the header at the start of `dat`, `None` if it is shorter than
    /// [VCDUHeader::LEN].
    #[must_use]
    pub fn decode(dat: &[u8]) -> Option<Self> {
        let [a, b, c0, c1, c2, flags]: [u8; Self::LEN] = dat.get(..Self::LEN)?.try_into().ok()?;
        let id = u16::from_be_bytes([a, b]);
        Some(VCDUHeader {
            version: a >> 6,
            scid: (id >> 6) & 0xff,
            vcid: id & 0x3f,
            counter: u32::from_be_bytes([0, c0, c1, c2]),
            replay: flags & 0x80 != 0,
            cycle: flags & 0x40 != 0,
            counter_cycle: flags & 0xf,
        })
    }

    /// Header bytes with every field masked to its width.
    #[must_use]
    pub fn encode(&self) -> [u8; Self::LEN] {
        let x = (u16::from(self.version & 0x3) << 14)
            | ((self.scid & 0xff) << 6)
            | (self.vcid & 0x3f);
        let [a, b] = x.to_be_bytes();
        let [_, c0, c1, c2] = (self.counter & Self::COUNTER_MASK).to_be_bytes();
        let flags = (u8::from(self.replay) << 7)
            | (u8::from(self.cycle) << 6)
            | (self.counter_cycle & 0xf);
        [a, b, c0, c1, c2, flags]
    }
}

/// Multiplexing protocol data unit, the packet zone of a VCDU.
#[derive(Debug, Clone)]
pub struct MPDU {
    // offset of the first packet header in the payload
    first_header: u16,
    data: Vec<u8>,
}

impl MPDU {
    /// First-header pointer of a packet zone holding only idle data.
    pub const FILL: u16 = 0x7fe;
    /// First-header pointer of a packet zone that continues a packet without starting
    /// a new one.
    pub const NO_HEADER: u16 = 0x7ff;

    /// `None` if `data` cannot hold the first-header pointer.
    #[must_use]
    pub fn decode(data: &[u8]) -> Option<Self> {
        let pointer = data.get(..2)?;
        Some(MPDU {
            first_header: u16::from_be_bytes([pointer[0], pointer[1]]) & 0x7ff,
            data: data.to_vec(),
        })
    }

    #[must_use]
    pub fn is_fill(&self) -> bool {
        self.first_header == Self::FILL
    }

    #[must_use]
    pub fn has_header(&self) -> bool {
        self.first_header != Self::NO_HEADER
    }

    /// Packet zone bytes following the first-header pointer.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.data[2..]
    }

    #[must_use]
    pub fn header_offset(&self) -> usize {
        self.first_header as usize
    }
}

/// A frame read as a virtual channel data unit.
#[derive(Debug, Clone)]
pub struct Vcdu {
    pub header: VCDUHeader,
    /// The whole frame, header included.
    pub data: Vec<u8>,
}

impl Vcdu {
    #[must_use]
    pub fn decode(data: Vec<u8>) -> Option<Self> {
        let header = VCDUHeader::decode(&data)?;
        Some(Vcdu { header, data })
    }

    #[must_use]
    pub fn is_fill(&self) -> bool {
        self.header.vcid == VCDUHeader::FILL
    }

    /// Packet zone between the insert zone and the trailer, `None` if the frame is too
    /// short for either.
    #[must_use]
    pub fn mpdu(&self, izone_length: usize, trailer_length: usize) -> Option<MPDU> {
        let start = VCDUHeader::LEN + izone_length;
        let end = self.data.len().checked_sub(trailer_length)?;
        MPDU::decode(self.data.get(start..end)?)
    }
}

/// Frame counts skipped between `last` and `cur`. A repeated count reads as a full
/// counter cycle of missing frames.
#[must_use]
pub fn missing_frames(cur: u32, last: u32) -> u32 {
    cur.wrapping_sub(last).wrapping_sub(1) & VCDUHeader::COUNTER_MASK
}

#[cfg(test)]
mod test {
    use test_case::test_case;

    use super::*;

    #[test]
    fn vcdu_header_fields() {
        // version 1, scid 85, vcid 33, count 123456, cycle 5, then insert zone
        let dat = hex::decode("556101e24005010203").unwrap();

        let header = VCDUHeader::decode(&dat).unwrap();

        assert_eq!(header.version, 1);
        assert_eq!(header.scid, 85);
        assert_eq!(header.vcid, 33);
        assert_eq!(header.counter, 123_456);
        assert!(!header.replay);
        assert!(!header.cycle);
        assert_eq!(header.counter_cycle, 5);
        assert_eq!(header.encode(), dat[..VCDUHeader::LEN]);
        assert!(VCDUHeader::decode(&dat[..5]).is_none());
    }

    #[test]
    fn mpdu_is_none_when_frame_too_short() {
        let vcdu = Vcdu::decode(vec![0u8; 7]).unwrap();
        assert!(vcdu.mpdu(0, 0).is_none());
        assert!(vcdu.mpdu(4, 0).is_none());
    }

    #[test]
    fn mpdu_first_header_pointer() {
        let mut dat = vec![0u8; 12];
        dat[6] = 0x07;
        dat[7] = 0xff;
        let vcdu = Vcdu::decode(dat).unwrap();
        let mpdu = vcdu.mpdu(0, 2).unwrap();
        assert!(!mpdu.has_header());
        assert_eq!(mpdu.payload().len(), 2);
    }

    #[test_case(5, 4, 0 ; "consecutive")]
    #[test_case(0, VCDUHeader::COUNTER_MASK, 0 ; "counter wraps")]
    #[test_case(1, VCDUHeader::COUNTER_MASK - 1, 2 ; "gap across wrap")]
    #[test_case(9, 9, VCDUHeader::COUNTER_MASK ; "repeated count")]
    fn frame_count_gaps(cur: u32, last: u32, expected: u32) {
        assert_eq!(missing_frames(cur, last), expected);
    }
}
