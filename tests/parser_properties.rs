//! Property tests for the cursor, the generic tree parser and detectors

use proptest::prelude::*;

use stream_drill::bitwriter::BitWriter;
use stream_drill::h264::golomb::ExpGolomb;
use stream_drill::{
    AsfGrammar, AsfObject, Cursor, DataBlockBuilder, DataFormat, DataSource, Detector, H264Detector, HeaderTree,
    ParseError, ScanContext, TreeParser,
};

fn asf_object(guid: &[u8; 16], body_len: usize) -> Vec<u8> {
    let mut out = guid.to_vec();
    out.extend((24 + body_len as u64).to_le_bytes());
    out.extend(vec![0x3c; body_len]);
    out
}

/// Random garbage with a few real ASF objects and packet prefixes mixed in.
fn asf_soup() -> impl Strategy<Value = Vec<u8>> {
    let piece = prop_oneof![
        proptest::collection::vec(any::<u8>(), 1..64),
        (0usize..64).prop_map(|n| asf_object(AsfObject::FileProperties.guid().unwrap(), n)),
        (0usize..64).prop_map(|n| asf_object(AsfObject::Padding.guid().unwrap(), n)),
        Just(vec![0x82, 0x00, 0x00, 0x40, 0x5d, 0x20, 0x00]),
        (
            prop_oneof![Just(AsfObject::Header), Just(AsfObject::HeaderExtension), Just(AsfObject::Data)],
            any::<u64>(),
            proptest::collection::vec(any::<u8>(), 0..40),
        )
            .prop_map(|(kind, size, body)| {
                let mut out = kind.guid().unwrap().to_vec();
                out.extend(size.to_le_bytes());
                out.extend(body);
                out
            }),
    ];
    proptest::collection::vec(piece, 1..12).prop_map(|pieces| pieces.concat())
}

proptest! {
    #[test]
    fn split_bit_reads_reconstruct_window(bytes in proptest::collection::vec(any::<u8>(), 4..12), n in 1u32..32) {
        let mut cursor = Cursor::from_bytes(&bytes);
        let hi = cursor.read_bits(n).unwrap();
        let lo = cursor.read_bits(32 - n).unwrap();
        let expected = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        prop_assert_eq!((hi << (32 - n)) | lo, expected);
    }

    #[test]
    fn exp_golomb_codes_decode_to_their_value(values in proptest::collection::vec(0u32..(1 << 20), 1..40)) {
        let mut w = BitWriter::new();
        for &v in &values {
            w.write_ue(v);
        }
        w.write_trailing_bits();
        let bytes = w.finish();
        let mut cursor = Cursor::from_bytes(&bytes);
        for &v in &values {
            prop_assert_eq!(cursor.read_ue().unwrap(), v);
        }
    }

    #[test]
    fn asf_tree_invariants_hold(data in asf_soup()) {
        let mut cursor = Cursor::from_bytes(&data);
        let len = data.len() as u64;
        let mut parser = TreeParser::new(AsfGrammar).with_max_unparsed_bytes(8);
        while cursor.position() < len {
            let before = cursor.position();
            let mut tree = HeaderTree::new(AsfObject::Root, before);
            let found = parser.parse_root(&mut cursor, &mut tree, len).unwrap();
            prop_assert!(tree.check_invariants());
            if !found {
                prop_assert_eq!(cursor.position(), len);
                break;
            }
            prop_assert!(cursor.position() > before);
        }
    }

    #[test]
    fn parse_root_is_idempotent_after_rejection(data in proptest::collection::vec(any::<u8>(), 0..256)) {
        let len = data.len() as u64;
        let mut cursor = Cursor::from_bytes(&data);
        let mut parser = TreeParser::new(AsfGrammar);
        let mut tree = HeaderTree::new(AsfObject::Root, 0);
        while parser.parse_root(&mut cursor, &mut tree, len).unwrap() {
            tree = HeaderTree::new(AsfObject::Root, cursor.position());
        }
        let pos = cursor.position();
        let mut again = HeaderTree::new(AsfObject::Root, pos);
        prop_assert!(!parser.parse_root(&mut cursor, &mut again, len).unwrap());
        prop_assert_eq!(cursor.position(), pos);
        prop_assert!(again.is_empty());
    }

    #[test]
    fn h264_detector_always_makes_progress(data in proptest::collection::vec(prop_oneof![Just(0u8), Just(1u8), any::<u8>()], 0..512)) {
        let detector = H264Detector::default();
        let mut builder = DataBlockBuilder::new(DataFormat::H264);
        let ctx = ScanContext::new(data.len() as u64, &[]);
        let mut cursor = Cursor::from_bytes(&data);
        let mut pos = 0u64;
        while pos < data.len() as u64 {
            cursor.set_position(pos);
            builder.reset();
            let next = match detector.detect(&mut cursor, &mut builder, &ctx) {
                Some(block) => {
                    prop_assert!(block.start_offset >= pos);
                    prop_assert!(block.end_offset <= data.len() as u64);
                    block.end_offset
                }
                None => cursor.position(),
            };
            prop_assert!(next > pos);
            pos = next;
        }
    }
}

#[test]
fn cancelled_source_stops_cursor_reads() {
    let source = DataSource::from_vec("image", vec![0xab; 256 * 1024]);
    let mut cursor = Cursor::new(&source);
    source.cancel_token().cancel();
    let mut result = Ok(&[][..]);
    for _ in 0..8 {
        result = cursor.read_bytes(64 * 1024);
        if result.is_err() {
            break;
        }
    }
    assert_eq!(result, Err(ParseError::Cancelled));
}
