//! ASF carving through the parallel carver

use stream_drill::h264::writer::{PpsParams, SliceParams, SpsParams, StreamWriter};
use stream_drill::{AsfObject, Carver, Config, DataFormat, DataSource, NalFraming};
use tempfile::tempdir;

fn object(kind: AsfObject, body_len: usize) -> Vec<u8> {
    let mut out = kind.guid().unwrap().to_vec();
    out.extend((24 + body_len as u64).to_le_bytes());
    out.extend(vec![0u8; body_len]);
    out
}

fn packet(len: u16, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![0x82, 0x00, 0x00, 0x40, 0x5d];
    out.extend(len.to_le_bytes());
    out.extend(2000u32.to_le_bytes());
    out.extend(40u16.to_le_bytes());
    out.extend_from_slice(payload);
    out.resize(len as usize, 0x00);
    out
}

/// Header (file and stream properties) followed by a data object.
fn asf_file(packets: &[Vec<u8>]) -> Vec<u8> {
    let children = [object(AsfObject::FileProperties, 80), object(AsfObject::StreamProperties, 54)].concat();
    let mut file = AsfObject::Header.guid().unwrap().to_vec();
    file.extend((30 + children.len() as u64).to_le_bytes());
    file.extend(2u32.to_le_bytes());
    file.extend([0x01, 0x02]);
    file.extend(children);

    let body = packets.concat();
    file.extend(AsfObject::Data.guid().unwrap());
    file.extend((50 + body.len() as u64).to_le_bytes());
    file.extend([0x44; 16]);
    file.extend((packets.len() as u64).to_le_bytes());
    file.extend([0x01, 0x01]);
    file.extend(body);
    file
}

fn config(formats: Vec<DataFormat>, workers: usize) -> Config {
    let mut config = Config::default();
    config.scan.formats = formats;
    config.scan.workers = workers;
    config
}

#[test]
fn test_two_files_in_one_image() {
    let first = asf_file(&[packet(128, &[]), packet(128, &[])]);
    let second = asf_file(&vec![packet(96, &[]); 3]);

    let mut image = vec![0xc3; 4096];
    let first_start = image.len() as u64;
    image.extend(&first);
    image.extend(vec![0xc3; 777]);
    let second_start = image.len() as u64;
    image.extend(&second);
    image.extend(vec![0xc3; 100]);

    let report = Carver::new(&config(vec![DataFormat::Asf], 3)).scan(&DataSource::from_vec("image", image));
    let spans: Vec<_> = report
        .blocks
        .iter()
        .map(|b| (b.block.start_offset, b.block.end_offset))
        .collect();
    assert_eq!(
        spans,
        vec![
            (first_start, first_start + first.len() as u64),
            (second_start, second_start + second.len() as u64),
        ]
    );
    assert_eq!(report.summary.by_format.get("asf"), Some(&2));
    assert_eq!(report.summary.bytes_covered, (first.len() + second.len()) as u64);
}

#[test]
fn test_image_file_on_disk() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("card.dd");
    let file = asf_file(&[packet(64, &[]), packet(64, &[])]);
    let mut image = vec![0u8; 512];
    image.extend(&file);
    std::fs::write(&path, &image).unwrap();

    let source = DataSource::open(&path).unwrap();
    assert!(source.name().ends_with("card.dd"));
    let report = Carver::new(&config(vec![DataFormat::Asf], 2)).scan(&source);
    assert_eq!(report.blocks.len(), 1);
    assert_eq!(report.blocks[0].block.start_offset, 512);
    assert_eq!(report.blocks[0].block.header_count, 6);
}

#[test]
fn test_h264_inside_asf_packets_is_reported_twice() {
    let (sps, pps) = (SpsParams::default(), PpsParams::default());
    let mut w = StreamWriter::new(NalFraming::ByteStream);
    w.sps(&sps).pps(&pps);
    w.slice(true, &SliceParams::default(), &sps, &pps);
    w.raw(&[0, 0, 0]);
    let video = w.finish();

    let file = asf_file(&[packet(400, &video)]);
    let mut image = vec![0xe1; 300];
    image.extend(&file);
    image.extend(vec![0xe1; 300]);

    let carver = Carver::new(&config(DataFormat::ALL.to_vec(), 1));
    let report = carver.scan(&DataSource::from_vec("image", image));

    let formats: Vec<_> = report.blocks.iter().map(|b| b.block.data_format).collect();
    assert!(formats.contains(&DataFormat::Asf));
    assert!(formats.contains(&DataFormat::H264));
    let asf = report.blocks.iter().find(|b| b.block.data_format == DataFormat::Asf).unwrap();
    let h264 = report.blocks.iter().find(|b| b.block.data_format == DataFormat::H264).unwrap();
    assert!(asf.block.start_offset < h264.block.start_offset);
    assert!(h264.block.end_offset <= asf.block.end_offset);
}

#[test]
fn test_cancelled_before_start_finds_nothing() {
    let source = DataSource::from_vec("image", asf_file(&[packet(64, &[])]));
    source.cancel_token().cancel();
    let report = Carver::new(&config(vec![DataFormat::Asf], 1)).scan(&source);
    assert!(report.summary.cancelled);
    assert!(report.blocks.is_empty());
}
