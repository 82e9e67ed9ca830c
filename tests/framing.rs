mod common;

use std::collections::HashMap;

use common::{bits, packet};
use downlink::block::Block;
use downlink::framing::*;
use downlink::spacepacket::{LengthPolicy, PacketAssembler, PacketMode};

const FRAME_LEN: usize = 128;
const ZONE_LEN: usize = FRAME_LEN - VCDUHeader::LEN - 2;

fn vcdu(vcid: Vcid, counter: u32, first_header: u16, zone: &[u8]) -> Vec<u8> {
    let header = VCDUHeader {
        version: 1,
        scid: 157,
        vcid,
        counter,
        replay: false,
        cycle: false,
        counter_cycle: 0,
    };
    let mut data = header.encode().to_vec();
    data.extend_from_slice(&first_header.to_be_bytes());
    data.extend_from_slice(zone);
    data.resize(FRAME_LEN, 0);
    data
}

/// Randomized CADUs: `count` VCID 16 frames carrying back to back packets of
/// `packet_len` bytes, with a fill frame after every third.
fn cadus(count: usize, packet_len: usize) -> Vec<u8> {
    let stream: Vec<u8> = (0..=count * ZONE_LEN / packet_len)
        .flat_map(|i| packet(16, i as u16, packet_len - 6, i as u8).data)
        .collect();

    let mut out = Vec::new();
    let mut fill_counter = 0;
    for k in 0..count {
        let start = k * ZONE_LEN;
        let offset = start.div_ceil(packet_len) * packet_len - start;
        let first_header = if offset < ZONE_LEN {
            offset as u16
        } else {
            MPDU::NO_HEADER
        };
        let frame = vcdu(16, k as u32, first_header, &stream[start..start + ZONE_LEN]);
        out.extend_from_slice(&ASM);
        out.extend(DefaultDerandomizer.derandomize(&frame));
        if k % 3 == 2 {
            let fill = vcdu(VCDUHeader::FILL, fill_counter, MPDU::FILL, &[]);
            out.extend_from_slice(&ASM);
            out.extend(DefaultDerandomizer.derandomize(&fill));
            fill_counter += 1;
        }
    }
    out
}

fn do_framing_test(input: &[u8], expected: &[(Vcid, usize)]) -> Vec<Frame> {
    let config = DeframerConfig::builder().frame_length(FRAME_LEN).build();
    let mut deframer = Deframer::new(&config).unwrap();
    let mut frames = Vec::new();
    deframer.work(&bits(input), &mut frames);

    let mut assembler = PacketAssembler::new(
        PacketMode::Vcdu {
            izone_length: 0,
            trailer_length: 0,
        },
        LengthPolicy::Truncate,
    );
    let mut got_counts: HashMap<Vcid, usize> = HashMap::default();
    for frame in &frames {
        for p in assembler.push(frame) {
            *got_counts.entry(p.vcid.unwrap()).or_default() += 1;
        }
    }

    dbg!(&got_counts);
    assert_eq!(assembler.anomalies(), 0);
    for (vcid, expected) in expected {
        match got_counts.get(vcid) {
            Some(got) => assert_eq!(
                got, expected,
                "Expected {expected} for vcid {vcid}, got {got}"
            ),
            None => panic!("Expected {expected} for vcid {vcid}, got 0"),
        }
    }
    frames
}

#[test]
fn test_framing_spanning_packets() {
    let frames = do_framing_test(&cadus(10, 50), &[(16, 10 * ZONE_LEN / 50)]);

    assert_eq!(frames.len(), 13);
    assert!(frames.iter().all(|f| f.synced && f.score == 0));
    let header = VCDUHeader::decode(&frames[0].data).unwrap();
    assert_eq!(header.scid, 157);
    assert_eq!(header.vcid, 16);
}

#[test]
fn test_framing_large_packets() {
    // packets longer than a frame; only whole packets come out
    do_framing_test(&cadus(12, 300), &[(16, 12 * ZONE_LEN / 300)]);
}

#[test]
fn test_framing_after_garbage() {
    let mut input = vec![0u8; 200];
    input.extend(cadus(6, 40));
    do_framing_test(&input, &[(16, 6 * ZONE_LEN / 40)]);
}

#[test]
fn test_framing_missing_frame_drops_partial_packet() {
    let input = cadus(6, 100);
    let cadu_len = ASM.len() + FRAME_LEN;
    // cadus are frames 0, 1, 2, fill, 3, 4, 5, fill; drop frame 3
    let mut cut = input[..4 * cadu_len].to_vec();
    cut.extend_from_slice(&input[5 * cadu_len..]);

    let config = DeframerConfig::builder().frame_length(FRAME_LEN).build();
    let mut deframer = Deframer::new(&config).unwrap();
    let mut frames = Vec::new();
    deframer.work(&bits(&cut), &mut frames);
    let mut assembler = PacketAssembler::new(
        PacketMode::Vcdu {
            izone_length: 0,
            trailer_length: 0,
        },
        LengthPolicy::Truncate,
    );
    let seqs: Vec<u16> = frames
        .iter()
        .flat_map(|f| assembler.push(f))
        .map(|p| p.packet.header.sequence_id)
        .collect();

    // packet 3 started before the gap and packet 4 straddled it
    assert_eq!(seqs, vec![0, 1, 2, 5, 6]);
}
