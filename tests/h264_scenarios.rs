//! End-to-end H.264 carving scenarios

use std::sync::Arc;

use stream_drill::h264::framing::UnitLocator;
use stream_drill::h264::writer::{PpsParams, SliceParams, SpsParams, StreamWriter};
use stream_drill::{
    Carver, Config, Cursor, DataBlock, DataBlockBuilder, DataFormat, DataSource, Detector, H264Config, H264Detector,
    NalFraming, ParseError, ReferenceHeader, ScanContext,
};
use tempfile::tempdir;

fn h264_only(workers: usize) -> Config {
    let mut config = Config::default();
    config.scan.formats = vec![DataFormat::H264];
    config.scan.workers = workers;
    config
}

fn detect_once(data: &[u8], refs: &[Arc<ReferenceHeader>]) -> (Option<DataBlock>, u64) {
    let detector = H264Detector::default();
    let mut cursor = Cursor::from_bytes(data);
    let mut builder = DataBlockBuilder::new(DataFormat::H264);
    let ctx = ScanContext::new(data.len() as u64, refs);
    let block = detector.detect(&mut cursor, &mut builder, &ctx);
    (block, cursor.position())
}

fn slice(first_mb_in_slice: u32) -> SliceParams {
    SliceParams {
        first_mb_in_slice,
        ..Default::default()
    }
}

#[test]
fn test_complete_picture_is_one_block() {
    let (sps, pps) = (SpsParams::default(), PpsParams::default());
    let mut w = StreamWriter::new(NalFraming::ByteStream);
    w.sps(&sps).pps(&pps);
    w.slice(true, &slice(0), &sps, &pps);
    w.slice(true, &slice(99), &sps, &pps);
    let data = w.finish();

    let (block, pos) = detect_once(&data, &[]);
    let block = block.expect("stream accepted");
    assert_eq!(block.start_offset, 0);
    assert_eq!(block.end_offset, data.len() as u64);
    assert_eq!(block.header_count, 4);
    assert!(block.reference_header.is_none());
    assert_eq!(pos, block.end_offset);
}

#[test]
fn test_repeated_first_mb_is_a_false_hit() {
    let mut w = StreamWriter::new(NalFraming::ByteStream);
    w.partial_slice(5, 0, 0).partial_slice(5, 0, 0);
    let data = w.finish();

    let (block, _) = detect_once(&data, &[]);
    assert!(block.is_none());

    let report = Carver::new(&h264_only(1)).scan(&DataSource::from_vec("fragment", data));
    assert!(report.blocks.is_empty());
}

#[test]
fn test_false_hit_reduction_can_be_disabled() {
    let mut w = StreamWriter::new(NalFraming::ByteStream);
    for _ in 0..3 {
        w.partial_slice(5, 0, 0);
    }
    let data = w.finish();

    let mut config = h264_only(1);
    let strict = Carver::new(&config).scan(&DataSource::from_vec("fragment", data.clone()));
    assert!(strict.blocks.is_empty());

    config.h264.false_hit_reduction = false;
    let lenient = Carver::new(&config).scan(&DataSource::from_vec("fragment", data.clone()));
    assert_eq!(lenient.blocks.len(), 1);
    assert_eq!(lenient.blocks[0].block.end_offset, data.len() as u64);
}

#[test]
fn test_enough_plausible_slices_outweigh_a_false_hit() {
    let mut w = StreamWriter::new(NalFraming::ByteStream);
    for first_mb in [0, 5, 5, 10] {
        w.partial_slice(first_mb, 0, 0);
    }
    let data = w.finish();

    let (block, _) = detect_once(&data, &[]);
    let block = block.expect("four plausible slices accepted");
    assert_eq!(block.header_count, 4);
    assert_eq!(block.end_offset, data.len() as u64);

    // one fewer and the flagged run is rejected
    let mut w = StreamWriter::new(NalFraming::ByteStream);
    for first_mb in [0, 5, 5] {
        w.partial_slice(first_mb, 0, 0);
    }
    let (block, _) = detect_once(&w.finish(), &[]);
    assert!(block.is_none());
}

#[test]
fn test_single_unit_with_reference_header_is_rejected() {
    let config = H264Config::default();
    let reference =
        Arc::new(ReferenceHeader::parse("camera.264", reference_file(NalFraming::ByteStream), &config).unwrap());
    let (sps, pps) = (SpsParams::default(), PpsParams::default());
    let mut w = StreamWriter::new(NalFraming::ByteStream);
    w.slice(false, &slice(0), &sps, &pps);
    let data = w.finish();

    let (block, pos) = detect_once(&data, &[Arc::clone(&reference)]);
    assert!(block.is_none());
    assert_eq!(pos, 1);

    let mut config = h264_only(1);
    config.h264.min_headers_for_acceptance = 1;
    let report = Carver::new(&config)
        .with_references(vec![reference])
        .scan(&DataSource::from_vec("image", data));
    assert_eq!(report.blocks.len(), 1);
    assert_eq!(report.blocks[0].block.header_count, 1);
}

#[test]
fn test_pps_with_unknown_sps_resumes_scan() {
    let (sps, pps) = (SpsParams::default(), PpsParams::default());
    let orphan = PpsParams {
        sps_id: 3,
        ..Default::default()
    };
    let mut w = StreamWriter::new(NalFraming::ByteStream);
    w.raw(&[0xee; 17]).pps(&orphan).raw(&[0, 0, 0]).raw(&[0xee; 300]);
    let start = w.len() as u64;
    w.sps(&sps).pps(&pps).slice(true, &slice(0), &sps, &pps);
    let end = w.len() as u64;
    let data = w.finish();

    let report = Carver::new(&h264_only(1)).scan(&DataSource::from_vec("image", data));
    assert_eq!(report.blocks.len(), 1);
    assert_eq!(report.blocks[0].block.start_offset, start);
    assert_eq!(report.blocks[0].block.end_offset, end);
}

#[test]
fn test_length_prefix_past_end_is_overflow() {
    // 4-byte length 0x1000 announcing an IDR slice, 6 bytes present
    let data = [0x00, 0x00, 0x10, 0x00, 0x65, 0x88, 0x84, 0x21, 0x43, 0x10];
    let config = H264Config::default();
    let locator = UnitLocator::new(&config);
    assert_eq!(
        locator.locate(&data, 0, Some(NalFraming::LengthPrefixed)),
        Err(ParseError::Overflow)
    );

    let (block, pos) = detect_once(&data, &[]);
    assert!(block.is_none());
    assert_eq!(pos, data.len() as u64);
}

fn reference_file(framing: NalFraming) -> Vec<u8> {
    let mut w = StreamWriter::new(framing);
    w.sps(&SpsParams::default()).pps(&PpsParams::default());
    w.finish()
}

fn headerless_fragment(framing: NalFraming) -> Vec<u8> {
    let (sps, pps) = (SpsParams::default(), PpsParams::default());
    let mut w = StreamWriter::new(framing);
    for first_mb in [0, 40, 80] {
        w.slice(false, &slice(first_mb), &sps, &pps);
    }
    w.finish()
}

#[test]
fn test_reference_header_resolves_fragment() {
    let config = H264Config::default();
    let reference =
        Arc::new(ReferenceHeader::parse("camera.264", reference_file(NalFraming::ByteStream), &config).unwrap());
    let data = headerless_fragment(NalFraming::ByteStream);

    let (block, _) = detect_once(&data, &[Arc::clone(&reference)]);
    let block = block.expect("fragment accepted");
    let used = block.reference_header.expect("reference recorded");
    assert_eq!(used.name, "camera.264");
    assert_eq!(used.length, reference.bytes().len() as u64);
    assert_eq!(used.payload(), reference.bytes());
    assert_eq!(block.end_offset, data.len() as u64);
}

#[test]
fn test_reference_header_framing_must_match() {
    let config = H264Config::default();
    let reference =
        Arc::new(ReferenceHeader::parse("camera.avc", reference_file(NalFraming::LengthPrefixed), &config).unwrap());
    let data = headerless_fragment(NalFraming::ByteStream);

    let (block, _) = detect_once(&data, &[reference]);
    // still plausible as partial slices, but nothing was substituted
    let block = block.expect("fragment accepted");
    assert!(block.reference_header.is_none());
}

#[test]
fn test_reference_file_on_disk_through_carver() {
    let dir = tempdir().unwrap();
    let ref_path = dir.path().join("ref.264");
    std::fs::write(&ref_path, reference_file(NalFraming::ByteStream)).unwrap();

    let mut image = vec![0x5a; 2048];
    image.extend(headerless_fragment(NalFraming::ByteStream));
    image.extend([0u8; 3]);
    image.extend(vec![0x5a; 1024]);
    let image_path = dir.path().join("disk.img");
    std::fs::write(&image_path, &image).unwrap();

    let config = h264_only(4);
    let reference = ReferenceHeader::load(&ref_path, &config.h264).unwrap();
    let source = DataSource::open(&image_path).unwrap();
    let report = Carver::new(&config)
        .with_references(vec![Arc::new(reference)])
        .scan(&source);

    assert_eq!(report.blocks.len(), 1);
    let block = &report.blocks[0].block;
    assert_eq!(block.start_offset, 2048);
    assert_eq!(block.reference_header.as_ref().map(|r| r.name.as_str()), Some("ref.264"));
    assert_eq!(report.summary.by_format.get("h264"), Some(&1));
}

#[test]
fn test_length_prefixed_stream_with_aud_and_sei() {
    let (sps, pps) = (SpsParams::default(), PpsParams::default());
    let mut w = StreamWriter::new(NalFraming::LengthPrefixed);
    w.aud(0).sps(&sps).pps(&pps).sei(5, &[0x42; 20]);
    w.slice(true, &slice(0), &sps, &pps);
    w.aud(0);
    w.slice(false, &slice(0), &sps, &pps);
    let data = w.finish();

    let (block, _) = detect_once(&data, &[]);
    let block = block.expect("stream accepted");
    assert_eq!(block.header_count, 7);
    assert_eq!(block.end_offset, data.len() as u64);
}

#[test]
fn test_report_serializes_to_json() {
    let (sps, pps) = (SpsParams::default(), PpsParams::default());
    let mut w = StreamWriter::new(NalFraming::ByteStream);
    w.sps(&sps).pps(&pps).slice(true, &slice(0), &sps, &pps);

    let mut config = h264_only(1);
    config.scan.hash_blocks = true;
    let report = Carver::new(&config).scan(&DataSource::from_vec("image", w.finish()));
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["blocks"][0]["data_format"], "h264");
    assert_eq!(json["blocks"][0]["hash"].as_str().map(str::len), Some(64));
    assert_eq!(json["summary"]["blocks_found"], 1);
}
