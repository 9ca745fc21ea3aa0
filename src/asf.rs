//! ASF object grammar.
//!
//! Objects start with a 16-byte GUID and a little-endian 64-bit size that
//! covers the whole object. The Header, Header Extension and Data objects
//! are containers; their children follow their fixed fields. Data packets
//! carry no GUID and are recognised by their `82 00 00` error correction
//! prefix, which also lets a run of packets be carved when the Data object
//! itself was lost. Only the object framing is decoded.

use std::fmt;

use crate::config::AsfConfig;
use crate::cursor::{Cursor, Endian};
use crate::detector::{DataBlock, DataBlockBuilder, DataFormat, Detector, ScanContext};
use crate::error::{ParseError, ParseResult};
use crate::grammar::{HasSuitableParent, HeaderGrammar, IsBackToBack, ParsesHeader};
use crate::parser::TreeParser;
use crate::tree::{AttrValue, HeaderNode, HeaderTree};

/// Size of the GUID plus the object size field.
const OBJECT_HEADER_LEN: u64 = 24;
const HEADER_FIXED_LEN: u64 = 30;
const HEADER_EXTENSION_FIXED_LEN: u64 = 46;
const DATA_FIXED_LEN: u64 = 50;

/// Error correction flags with two bytes of error correction data.
const PACKET_SYNC: [u8; 3] = [0x82, 0x00, 0x00];

/// ASF object types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AsfObject {
    Root,
    Header,
    FileProperties,
    StreamProperties,
    HeaderExtension,
    CodecList,
    ContentDescription,
    ExtendedContentDescription,
    StreamBitrateProperties,
    Padding,
    ExtendedStreamProperties,
    Metadata,
    LanguageList,
    Data,
    DataPacket,
    SimpleIndex,
    Index,
}

/// Object GUIDs in stored (little-endian) byte order.
static OBJECT_GUIDS: [(AsfObject, [u8; 16]); 15] = [
    (AsfObject::Header, [0x30, 0x26, 0xB2, 0x75, 0x8E, 0x66, 0xCF, 0x11, 0xA6, 0xD9, 0x00, 0xAA, 0x00, 0x62, 0xCE, 0x6C]),
    (AsfObject::Data, [0x36, 0x26, 0xB2, 0x75, 0x8E, 0x66, 0xCF, 0x11, 0xA6, 0xD9, 0x00, 0xAA, 0x00, 0x62, 0xCE, 0x6C]),
    (AsfObject::ContentDescription, [0x33, 0x26, 0xB2, 0x75, 0x8E, 0x66, 0xCF, 0x11, 0xA6, 0xD9, 0x00, 0xAA, 0x00, 0x62, 0xCE, 0x6C]),
    (AsfObject::SimpleIndex, [0x90, 0x08, 0x00, 0x33, 0xB1, 0xE5, 0xCF, 0x11, 0x89, 0xF4, 0x00, 0xA0, 0xC9, 0x03, 0x49, 0xCB]),
    (AsfObject::Index, [0xD3, 0x29, 0xE2, 0xD6, 0xDA, 0x35, 0xD1, 0x11, 0x90, 0x34, 0x00, 0xA0, 0xC9, 0x03, 0x49, 0xBE]),
    (AsfObject::FileProperties, [0xA1, 0xDC, 0xAB, 0x8C, 0x47, 0xA9, 0xCF, 0x11, 0x8E, 0xE4, 0x00, 0xC0, 0x0C, 0x20, 0x53, 0x65]),
    (AsfObject::StreamProperties, [0x91, 0x07, 0xDC, 0xB7, 0xB7, 0xA9, 0xCF, 0x11, 0x8E, 0xE6, 0x00, 0xC0, 0x0C, 0x20, 0x53, 0x65]),
    (AsfObject::HeaderExtension, [0xB5, 0x03, 0xBF, 0x5F, 0x2E, 0xA9, 0xCF, 0x11, 0x8E, 0xE3, 0x00, 0xC0, 0x0C, 0x20, 0x53, 0x65]),
    (AsfObject::CodecList, [0x40, 0x52, 0xD1, 0x86, 0x1D, 0x31, 0xD0, 0x11, 0xA3, 0xA4, 0x00, 0xA0, 0xC9, 0x03, 0x48, 0xF6]),
    (AsfObject::ExtendedContentDescription, [0x40, 0xA4, 0xD0, 0xD2, 0x07, 0xE3, 0xD2, 0x11, 0x97, 0xF0, 0x00, 0xA0, 0xC9, 0x5E, 0xA8, 0x50]),
    (AsfObject::StreamBitrateProperties, [0xCE, 0x75, 0xF8, 0x7B, 0x8D, 0x46, 0xD1, 0x11, 0x8D, 0x82, 0x00, 0x60, 0x97, 0xC9, 0xA2, 0xB2]),
    (AsfObject::Padding, [0x74, 0xD4, 0x06, 0x18, 0xDF, 0xCA, 0x09, 0x45, 0xA4, 0xBA, 0x9A, 0xAB, 0xCB, 0x96, 0xAA, 0xE8]),
    (AsfObject::ExtendedStreamProperties, [0xCB, 0xA5, 0xE6, 0x14, 0x72, 0xC6, 0x32, 0x43, 0x83, 0x99, 0xA9, 0x69, 0x52, 0x06, 0x5B, 0x5A]),
    (AsfObject::Metadata, [0xEA, 0xCB, 0xF8, 0xC5, 0xAF, 0x5B, 0x77, 0x48, 0x84, 0x67, 0xAA, 0x8C, 0x44, 0xFA, 0x4C, 0xCA]),
    (AsfObject::LanguageList, [0xA9, 0x46, 0x43, 0x7C, 0xE0, 0xEF, 0xFC, 0x4B, 0xB2, 0x29, 0x39, 0x3E, 0xDE, 0x41, 0x5C, 0x85]),
];

impl AsfObject {
    pub fn from_guid(guid: &[u8]) -> Option<Self> {
        OBJECT_GUIDS
            .iter()
            .find(|(_, g)| g.as_slice() == guid)
            .map(|(kind, _)| *kind)
    }

    /// Stored GUID bytes; `None` for the root and for data packets.
    pub fn guid(&self) -> Option<&'static [u8; 16]> {
        OBJECT_GUIDS.iter().find(|(k, _)| k == self).map(|(_, g)| g)
    }

    pub fn name(&self) -> &'static str {
        match self {
            AsfObject::Root => "root",
            AsfObject::Header => "header",
            AsfObject::FileProperties => "file_properties",
            AsfObject::StreamProperties => "stream_properties",
            AsfObject::HeaderExtension => "header_extension",
            AsfObject::CodecList => "codec_list",
            AsfObject::ContentDescription => "content_description",
            AsfObject::ExtendedContentDescription => "extended_content_description",
            AsfObject::StreamBitrateProperties => "stream_bitrate_properties",
            AsfObject::Padding => "padding",
            AsfObject::ExtendedStreamProperties => "extended_stream_properties",
            AsfObject::Metadata => "metadata",
            AsfObject::LanguageList => "language_list",
            AsfObject::Data => "data",
            AsfObject::DataPacket => "data_packet",
            AsfObject::SimpleIndex => "simple_index",
            AsfObject::Index => "index",
        }
    }
}

impl fmt::Display for AsfObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Object framing rules for the tree parser.
#[derive(Debug, Clone, Copy, Default)]
pub struct AsfGrammar;

impl HeaderGrammar for AsfGrammar {
    type Kind = AsfObject;

    const ROOT: AsfObject = AsfObject::Root;
    const SIGNATURE_LEN: usize = 16;

    fn header_type_of(&self, signature: &[u8]) -> Option<AsfObject> {
        if signature.len() < Self::SIGNATURE_LEN {
            return None;
        }
        AsfObject::from_guid(signature)
    }

    fn sync_loss_type_of(&self, signature: &[u8]) -> Option<AsfObject> {
        signature.starts_with(&PACKET_SYNC).then_some(AsfObject::DataPacket)
    }

    fn legal_parents(&self, kind: AsfObject) -> &'static [AsfObject] {
        use AsfObject::*;
        match kind {
            Root => &[],
            Header | Data | SimpleIndex | Index => &[Root],
            FileProperties | StreamProperties | HeaderExtension | CodecList | ContentDescription
            | ExtendedContentDescription | StreamBitrateProperties => &[Header],
            Padding => &[Header, HeaderExtension],
            ExtendedStreamProperties | Metadata | LanguageList => &[HeaderExtension],
            DataPacket => &[Data],
        }
    }

    fn is_container(&self, kind: AsfObject) -> bool {
        matches!(kind, AsfObject::Header | AsfObject::HeaderExtension | AsfObject::Data)
    }

    fn allows_duplicates(&self, kind: AsfObject) -> bool {
        !matches!(
            kind,
            AsfObject::Header | AsfObject::Data | AsfObject::FileProperties | AsfObject::HeaderExtension
        )
    }
}

/// GUID and size; returns the declared object size.
/// Reads GUID and size; returns the size and the offset the object ends at.
fn read_object_header(
    cursor: &mut Cursor<'_>,
    node: &mut HeaderNode<AsfObject>,
    min_size: u64,
) -> ParseResult<(u64, u64)> {
    cursor.read_guid()?;
    let size = cursor.read_u64(Endian::Little)?;
    if size < min_size {
        return Err(ParseError::semantic("object_size", size as i64));
    }
    let end = node.offset.checked_add(size).ok_or(ParseError::Overflow)?;
    node.push_attribute("size", AttrValue::Unsigned(size), true);
    Ok((size, end))
}

/// Variable-width packet field selected by a two-bit length type.
fn read_sized(cursor: &mut Cursor<'_>, length_type: u8) -> ParseResult<Option<u32>> {
    Ok(match length_type & 0x03 {
        0 => None,
        1 => Some(u32::from(cursor.read_u8()?)),
        2 => Some(u32::from(cursor.read_u16(Endian::Little)?)),
        _ => Some(cursor.read_u32(Endian::Little)?),
    })
}

fn parse_data_packet(cursor: &mut Cursor<'_>, node: &mut HeaderNode<AsfObject>) -> ParseResult<()> {
    let ec_flags = cursor.read_u8()?;
    if ec_flags & 0x80 == 0 {
        return Err(ParseError::StructuralInvalid("missing error correction flags"));
    }
    if ec_flags & 0x60 != 0 {
        return Err(ParseError::UnsupportedConstruct("error correction length type"));
    }
    cursor.read_bytes(u64::from(ec_flags & 0x0F))?;

    let length_flags = cursor.read_u8()?;
    let property_flags = cursor.read_u8()?;
    if length_flags & 0x80 != 0 {
        return Err(ParseError::StructuralInvalid("error correction present twice"));
    }
    // stream number length type is fixed at one byte
    if property_flags >> 6 != 0x01 {
        return Err(ParseError::semantic("stream_number_length_type", property_flags >> 6));
    }

    let packet_length = read_sized(cursor, length_flags >> 5)?
        .ok_or(ParseError::UnsupportedConstruct("implicit packet length"))?;
    let sequence = read_sized(cursor, length_flags >> 1)?;
    let padding = read_sized(cursor, length_flags >> 3)?.unwrap_or(0);
    let send_time = cursor.read_u32(Endian::Little)?;
    let duration = cursor.read_u16(Endian::Little)?;

    let header_len = cursor.position() - node.offset;
    let packet_length = u64::from(packet_length);
    if packet_length < header_len || u64::from(padding) >= packet_length {
        return Err(ParseError::semantic("packet_length", packet_length as i64));
    }
    cursor.read_bytes(packet_length - header_len)?;

    node.push_attribute("packet_length", AttrValue::Unsigned(packet_length), true);
    node.push_attribute("padding_length", AttrValue::Unsigned(u64::from(padding)), true);
    if let Some(sequence) = sequence {
        node.push_attribute("sequence", AttrValue::Unsigned(u64::from(sequence)), true);
    }
    node.push_attribute("send_time", AttrValue::Unsigned(u64::from(send_time)), true);
    node.push_attribute("duration", AttrValue::Unsigned(u64::from(duration)), true);
    node.push_attribute("multiple_payloads", AttrValue::Flag(length_flags & 0x01 != 0), true);
    Ok(())
}

impl ParsesHeader for AsfGrammar {
    fn parse(&mut self, cursor: &mut Cursor<'_>, node: &mut HeaderNode<AsfObject>) -> ParseResult<()> {
        match node.kind {
            AsfObject::Root => Err(ParseError::StructuralInvalid("root is synthetic")),
            AsfObject::DataPacket => parse_data_packet(cursor, node),
            AsfObject::Header => {
                let (_, end) = read_object_header(cursor, node, HEADER_FIXED_LEN)?;
                let count = cursor.read_u32(Endian::Little)?;
                cursor.read_u8()?;
                if cursor.read_u8()? != 0x02 {
                    return Err(ParseError::StructuralInvalid("header reserved2"));
                }
                node.push_attribute("object_count", AttrValue::Unsigned(u64::from(count)), true);
                node.declared_end = Some(end);
                Ok(())
            }
            AsfObject::HeaderExtension => {
                let (size, end) = read_object_header(cursor, node, HEADER_EXTENSION_FIXED_LEN)?;
                cursor.read_guid()?;
                cursor.read_u16(Endian::Little)?;
                let data_size = u64::from(cursor.read_u32(Endian::Little)?);
                if data_size != size - HEADER_EXTENSION_FIXED_LEN {
                    return Err(ParseError::semantic("extension_data_size", data_size as i64));
                }
                node.declared_end = Some(end);
                Ok(())
            }
            AsfObject::Data => {
                let (_, end) = read_object_header(cursor, node, DATA_FIXED_LEN)?;
                cursor.read_guid()?;
                let packets = cursor.read_u64(Endian::Little)?;
                cursor.read_u16(Endian::Little)?;
                node.push_attribute("total_data_packets", AttrValue::Unsigned(packets), true);
                node.declared_end = Some(end);
                Ok(())
            }
            _ => {
                let (size, _) = read_object_header(cursor, node, OBJECT_HEADER_LEN)?;
                cursor.read_bytes(size - OBJECT_HEADER_LEN)?;
                Ok(())
            }
        }
    }
}

impl IsBackToBack for AsfGrammar {}
impl HasSuitableParent for AsfGrammar {}

/// Detector for ASF object chains.
#[derive(Debug, Clone, Default)]
pub struct AsfDetector {
    config: AsfConfig,
}

impl AsfDetector {
    pub fn new(config: AsfConfig) -> Self {
        Self { config }
    }

    /// Parse the next object chain before `offset_limit`. Returns the tree
    /// whether or not it is large enough to report.
    pub fn parse_chain(&self, cursor: &mut Cursor<'_>, offset_limit: u64) -> ParseResult<Option<HeaderTree<AsfObject>>> {
        let mut tree = HeaderTree::new(AsfObject::Root, cursor.position());
        let mut parser = TreeParser::new(AsfGrammar).with_max_unparsed_bytes(self.config.max_unparsed_bytes);
        Ok(parser.parse_root(cursor, &mut tree, offset_limit)?.then_some(tree))
    }

    fn is_acceptable(&self, tree: &HeaderTree<AsfObject>) -> bool {
        tree.header_count() >= self.config.min_headers
            || tree
                .headers()
                .any(|(_, n)| AsfGrammar.is_container(n.kind) && !n.children().is_empty())
    }
}

impl Detector for AsfDetector {
    fn format(&self) -> DataFormat {
        DataFormat::Asf
    }

    fn detect(
        &self,
        cursor: &mut Cursor<'_>,
        builder: &mut DataBlockBuilder,
        ctx: &ScanContext<'_>,
    ) -> Option<DataBlock> {
        let tree = match self.parse_chain(cursor, ctx.scan_limit) {
            Ok(Some(tree)) => tree,
            Ok(None) => return None,
            Err(err) => {
                tracing::debug!(offset = cursor.position(), %err, "ASF detection stopped");
                return None;
            }
        };
        let start = tree.root().offset;
        if !self.is_acceptable(&tree) {
            tracing::trace!(offset = start, objects = tree.header_count(), "ASF chain rejected");
            cursor.set_position(start + 1);
            return None;
        }
        let end = cursor.position().max(tree.root().end());
        tracing::debug!(start, end, objects = tree.header_count(), "ASF block carved");
        builder
            .start_offset(start)
            .end_offset(end)
            .header_count(tree.header_count());
        builder.build()
    }
}
