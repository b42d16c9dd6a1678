//! Diagnostic access to a written section: the parsed section header and a
//! packet-by-packet walk. Used by the CLI's `inspect` command.

use crate::checked_file::OffsetKind;
use crate::error::Result;
use crate::imagefile::ImageFile;
use crate::packet::{
    DataPacket, PacketHeader, SectionHeader, DATA_PACKET, PACKET_HEADER_SIZE, SECTION_HEADER_SIZE,
};

/// Summary of one packet in a section.
#[derive(Debug, Clone)]
pub struct PacketInfo {
    pub logical_offset: u64,
    pub kind: u8,
    pub logical_length: u64,
    /// Per-stream payload lengths; empty for non-data packets.
    pub stream_lengths: Vec<usize>,
}

/// Read and parse the section header at `section_start`.
pub fn section_header(file: &ImageFile, section_start: u64) -> Result<SectionHeader> {
    file.check_open()?;
    let mut f = file.file().borrow_mut();
    f.seek(section_start, OffsetKind::Logical)?;
    let mut buf = [0u8; SECTION_HEADER_SIZE as usize];
    f.read(&mut buf)?;
    SectionHeader::from_bytes(&buf, section_start)
}

/// Walk every packet in the section at `section_start`.
pub fn walk_packets(file: &ImageFile, section_start: u64) -> Result<Vec<PacketInfo>> {
    let header = section_header(file, section_start)?;
    let section_end = section_start + header.section_logical_length;

    let mut packets = Vec::new();
    let mut offset = section_start + SECTION_HEADER_SIZE;
    while offset < section_end {
        let mut f = file.file().borrow_mut();
        f.seek(offset, OffsetKind::Logical)?;
        let mut header_buf = [0u8; PACKET_HEADER_SIZE as usize];
        f.read(&mut header_buf)?;
        let packet_header = PacketHeader::from_bytes(&header_buf, offset)?;

        let length = packet_header.logical_length() as usize;
        if length < PACKET_HEADER_SIZE as usize {
            return Err(crate::error::Error::BadCvPacket {
                offset,
                reason: format!("declared packet length {} is shorter than the header", length),
            });
        }
        let mut bytes = vec![0u8; length];
        bytes[..PACKET_HEADER_SIZE as usize].copy_from_slice(&header_buf);
        f.seek(offset + PACKET_HEADER_SIZE, OffsetKind::Logical)?;
        f.read(&mut bytes[PACKET_HEADER_SIZE as usize..])?;
        drop(f);

        let stream_lengths = if packet_header.kind == DATA_PACKET {
            let view = DataPacket::parse(&bytes, offset)?;
            (0..view.bytestream_count())
                .map(|s| view.payload_length(s))
                .collect()
        } else {
            Vec::new()
        };

        packets.push(PacketInfo {
            logical_offset: offset,
            kind: packet_header.kind,
            logical_length: packet_header.logical_length(),
            stream_lengths,
        });
        offset += packet_header.logical_length();
    }
    Ok(packets)
}
