use std::collections::HashMap;
use std::fmt::Display;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use super::{missing_packets, Apid, Packet, PrimaryHeader};
use crate::framing::{missing_frames, Frame, Scid, Vcdu, Vcid};

// Idle packets carry no sequence.
const IDLE_APID: Apid = 0x7ff;

/// What to do with a packet whose header declares more data than its frame holds.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LengthPolicy {
    /// Keep the bytes available; the header is left as received.
    #[default]
    Truncate,
    /// Zero-fill the packet to its declared length.
    Pad,
    /// Discard the packet.
    Drop,
}

/// How packets are laid out in frames.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PacketMode {
    /// Each frame starts with one packet; bytes past the declared length are fill.
    #[default]
    PerFrame,
    /// Frames are CCSDS VCDUs whose M_PDUs carry packets, possibly spanning frames.
    Vcdu {
        izone_length: usize,
        trailer_length: usize,
    },
}

/// A [Packet] with additional framing metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPacket {
    pub scid: Option<Scid>,
    pub vcid: Option<Vcid>,
    /// Bit position of the frame the packet started in.
    pub position: u64,
    pub packet: Packet,
}

struct VcidTracker {
    vcid: Vcid,
    /// Caches partial packets for this vcid
    cache: Vec<u8>,
    /// Bit position of the frame the cached packet started in.
    position: u64,
    last_counter: Option<u32>,
    // True when a first-header pointer has been found and data should be added to the
    // cache. False while data is missing due to frame counter discontinuities.
    sync: bool,
}

impl VcidTracker {
    fn new(vcid: Vcid) -> Self {
        VcidTracker {
            vcid,
            cache: vec![],
            position: 0,
            last_counter: None,
            sync: false,
        }
    }

    fn reset(&mut self) {
        self.cache.clear();
        self.sync = false;
    }
}

impl Display for VcidTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "VcidTracker{{vcid={}, sync={}, cache_len={}}}",
            self.vcid,
            self.sync,
            self.cache.len()
        )
    }
}

/// Builds packets from synchronized frames.
///
/// Frames that are not [Frame::synced] are ignored. Packets are produced in the order in
/// which they complete.
///
/// Sequence counts are followed per APID, except for idle packets, and every count
/// skipped between two packets of an APID is added to [PacketAssembler::missing_packets].
pub struct PacketAssembler {
    mode: PacketMode,
    policy: LengthPolicy,
    trackers: HashMap<Vcid, VcidTracker>,
    sequences: HashMap<Apid, u16>,
    anomalies: u64,
    missing: u64,
}

impl PacketAssembler {
    #[must_use]
    pub fn new(mode: PacketMode, policy: LengthPolicy) -> Self {
        PacketAssembler {
            mode,
            policy,
            trackers: HashMap::new(),
            sequences: HashMap::new(),
            anomalies: 0,
            missing: 0,
        }
    }

    /// Structural problems seen so far: short frames, invalid headers, and length
    /// mismatches.
    #[must_use]
    pub fn anomalies(&self) -> u64 {
        self.anomalies
    }

    /// Sequence counts skipped so far, summed over every APID.
    #[must_use]
    pub fn missing_packets(&self) -> u64 {
        self.missing
    }

    /// Extract the packets completed by `frame`.
    pub fn push(&mut self, frame: &Frame) -> Vec<DecodedPacket> {
        if !frame.synced {
            trace!(position = frame.position, "skipping unsynced frame");
            return vec![];
        }
        let packets = match self.mode {
            PacketMode::PerFrame => self.per_frame(frame).into_iter().collect(),
            PacketMode::Vcdu {
                izone_length,
                trailer_length,
            } => self.vcdu(frame, izone_length, trailer_length),
        };
        for packet in &packets {
            self.check_sequence(&packet.packet.header);
        }
        packets
    }

    fn check_sequence(&mut self, header: &PrimaryHeader) {
        if header.apid == IDLE_APID {
            return;
        }
        let Some(last) = self.sequences.insert(header.apid, header.sequence_id) else {
            return;
        };
        // a repeated count is a duplicate, not a full wrap of lost packets
        if header.sequence_id == last {
            return;
        }
        let missing = missing_packets(header.sequence_id, last);
        if missing > 0 {
            debug!(
                apid = header.apid,
                last,
                cur = header.sequence_id,
                missing,
                "packet sequence gap"
            );
            self.missing += u64::from(missing);
        }
    }

    fn per_frame(&mut self, frame: &Frame) -> Option<DecodedPacket> {
        let Some(header) = PrimaryHeader::decode(&frame.data) else {
            debug!(
                len = frame.data.len(),
                "frame too short for a packet header"
            );
            self.anomalies += 1;
            return None;
        };
        let declared = header.packet_len();
        let available = frame.data.len();
        let data = if declared <= available {
            frame.data[..declared].to_vec()
        } else {
            self.anomalies += 1;
            warn!(
                apid = header.apid,
                declared,
                available,
                policy = ?self.policy,
                "packet length exceeds frame"
            );
            match self.policy {
                LengthPolicy::Truncate => frame.data.clone(),
                LengthPolicy::Pad => {
                    let mut data = frame.data.clone();
                    data.resize(declared, 0);
                    data
                }
                LengthPolicy::Drop => return None,
            }
        };
        Some(DecodedPacket {
            scid: None,
            vcid: None,
            position: frame.position,
            packet: Packet { header, data },
        })
    }

    fn vcdu(
        &mut self,
        frame: &Frame,
        izone_length: usize,
        trailer_length: usize,
    ) -> Vec<DecodedPacket> {
        let mut ready = Vec::new();
        let Some(vcdu) = Vcdu::decode(frame.data.clone()) else {
            self.anomalies += 1;
            return ready;
        };
        if vcdu.is_fill() {
            return ready;
        }
        let Some(mpdu) = vcdu.mpdu(izone_length, trailer_length) else {
            debug!(vcid = vcdu.header.vcid, "frame too short for mpdu");
            self.anomalies += 1;
            return ready;
        };
        let scid = vcdu.header.scid;
        let vcid = vcdu.header.vcid;
        let tracker = self
            .trackers
            .entry(vcid)
            .or_insert_with(|| VcidTracker::new(vcid));

        // Missing frames before this one; this one is still usable, but any partial
        // packet cannot be completed.
        if let Some(last) = tracker.last_counter {
            let missing = missing_frames(vcdu.header.counter, last);
            if missing > 0 {
                trace!(
                    tracker = %tracker,
                    missing,
                    "missing frames, dropping tracker"
                );
                tracker.reset();
            }
        }
        tracker.last_counter = Some(vcdu.header.counter);

        if tracker.sync {
            tracker.cache.extend_from_slice(mpdu.payload());
        } else {
            if !mpdu.has_header() || mpdu.is_fill() {
                trace!(tracker = %tracker, "no packet header in mpdu, dropping");
                return ready;
            }
            if mpdu.header_offset() > mpdu.payload().len() {
                debug!(
                    offset = mpdu.header_offset(),
                    len = mpdu.payload().len(),
                    "invalid mpdu header offset"
                );
                self.anomalies += 1;
                return ready;
            }
            tracker.sync = true;
            tracker.cache = mpdu.payload()[mpdu.header_offset()..].to_vec();
            tracker.position = frame.position;
        }

        // The start of the cache always holds a packet primary header. Take as many
        // complete packets as the cache holds.
        while let Some(header) = PrimaryHeader::decode(&tracker.cache) {
            if header.version != 0 {
                warn!(?header, "bad packet version, dropping tracker");
                self.anomalies += 1;
                tracker.reset();
                break;
            }
            let need = header.packet_len();
            if tracker.cache.len() < need {
                break;
            }
            let tail = tracker.cache.split_off(need);
            let data = std::mem::replace(&mut tracker.cache, tail);
            ready.push(DecodedPacket {
                scid: Some(scid),
                vcid: Some(vcid),
                position: tracker.position,
                packet: Packet { header, data },
            });
            tracker.position = frame.position;
        }

        ready
    }
}
