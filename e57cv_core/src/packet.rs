//! Wire format of the binary section: packet headers, data packets, and the
//! compressed-vector section header. All multi-byte integers little-endian.

use crate::error::{Error, Result};

// ── Packet kinds ───────────────────────────────────────────────────────────

pub const INDEX_PACKET: u8 = 0;
pub const DATA_PACKET: u8 = 1;
pub const IGNORED_PACKET: u8 = 2;

/// Fixed size of the common packet header in bytes.
///   kind:u8 + flags:u8 + logical_length_minus_1:u16 = 4
pub const PACKET_HEADER_SIZE: u64 = 4;

/// Maximum logical length of any packet: the length field stores length-1
/// in 16 bits, so 64 KiB exactly fits.
pub const MAX_PACKET_SIZE: u64 = 64 * 1024;

/// Section identifier byte for a compressed-vector binary section.
pub const COMPRESSED_VECTOR_SECTION_ID: u8 = 1;

/// Fixed size of the section header in bytes.
///   section_id:u8 + reserved[7] + section_logical_length:u64
///   + data_physical_offset:u64 + index_physical_offset:u64
///   + record_count:u64 = 40
pub const SECTION_HEADER_SIZE: u64 = 40;

// ── Packet header ──────────────────────────────────────────────────────────

/// Decoded representation of the 4-byte packet header common to every
/// packet kind.
#[derive(Debug, Clone, Copy)]
pub struct PacketHeader {
    pub kind: u8,
    pub flags: u8,
    /// Logical packet length minus one, so 64 KiB fits in 16 bits.
    pub logical_length_minus_1: u16,
}

impl PacketHeader {
    pub fn to_bytes(&self) -> [u8; PACKET_HEADER_SIZE as usize] {
        let mut buf = [0u8; PACKET_HEADER_SIZE as usize];
        buf[0] = self.kind;
        buf[1] = self.flags;
        buf[2..4].copy_from_slice(&self.logical_length_minus_1.to_le_bytes());
        buf
    }

    /// Parse a header, rejecting unknown packet kinds. `offset` is only used
    /// to label the error.
    pub fn from_bytes(buf: &[u8; PACKET_HEADER_SIZE as usize], offset: u64) -> Result<Self> {
        if buf[0] > IGNORED_PACKET {
            return Err(Error::BadCvPacket {
                offset,
                reason: format!("unknown packet kind {}", buf[0]),
            });
        }
        Ok(Self {
            kind: buf[0],
            flags: buf[1],
            logical_length_minus_1: u16::from_le_bytes(buf[2..4].try_into().unwrap()),
        })
    }

    /// Full logical packet length, header included.
    #[inline]
    pub fn logical_length(&self) -> u64 {
        self.logical_length_minus_1 as u64 + 1
    }
}

// ── Data packet ────────────────────────────────────────────────────────────

/// Zero-copy view over a complete data packet.
///
/// Layout after the common header:
///   bytestream_count:u16, payload_lengths:u16[count], payloads…
/// Payloads are concatenated in bytestream-number order; any stream may
/// contribute zero bytes to a given packet.
pub struct DataPacket<'a> {
    bytes: &'a [u8],
    stream_count: usize,
}

impl<'a> DataPacket<'a> {
    /// Validate and wrap a full packet byte slice (header included).
    pub fn parse(bytes: &'a [u8], offset: u64) -> Result<Self> {
        let bad = |reason: String| Error::BadCvPacket { offset, reason };

        let header_buf: [u8; 4] = bytes
            .get(..4)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| bad("packet shorter than header".into()))?;
        let header = PacketHeader::from_bytes(&header_buf, offset)?;
        if header.kind != DATA_PACKET {
            return Err(bad(format!("expected data packet, found kind {}", header.kind)));
        }
        if header.logical_length() as usize != bytes.len() {
            return Err(bad(format!(
                "header says {} bytes but packet has {}",
                header.logical_length(),
                bytes.len()
            )));
        }

        let stream_count = bytes
            .get(4..6)
            .map(|b| u16::from_le_bytes(b.try_into().unwrap()) as usize)
            .ok_or_else(|| bad("packet truncated before bytestream count".into()))?;

        let payload_start = 6 + 2 * stream_count;
        if bytes.len() < payload_start {
            return Err(bad("packet truncated inside payload-length table".into()));
        }

        let view = Self { bytes, stream_count };
        let total: usize = (0..stream_count).map(|s| view.payload_length(s)).sum();
        if payload_start + total != bytes.len() {
            return Err(bad(format!(
                "payload lengths sum to {} but {} bytes follow the table",
                total,
                bytes.len() - payload_start
            )));
        }
        Ok(view)
    }

    #[inline]
    pub fn bytestream_count(&self) -> usize {
        self.stream_count
    }

    /// Payload byte count this packet carries for `stream`. Streams beyond
    /// the table contribute nothing.
    pub fn payload_length(&self, stream: usize) -> usize {
        if stream >= self.stream_count {
            return 0;
        }
        let at = 6 + 2 * stream;
        u16::from_le_bytes(self.bytes[at..at + 2].try_into().unwrap()) as usize
    }

    /// The payload slice for `stream`.
    pub fn bytestream(&self, stream: usize) -> &'a [u8] {
        if stream >= self.stream_count {
            return &[];
        }
        let mut at = 6 + 2 * self.stream_count;
        for s in 0..stream {
            at += self.payload_length(s);
        }
        &self.bytes[at..at + self.payload_length(stream)]
    }
}

/// Assemble a complete data packet from per-stream payloads given in
/// bytestream-number order.
pub fn build_data_packet(payloads: &[Vec<u8>]) -> Result<Vec<u8>> {
    let stream_count = payloads.len();
    if stream_count > u16::MAX as usize {
        return Err(Error::Internal(format!("{} bytestreams", stream_count)));
    }
    let total_payload: usize = payloads.iter().map(|p| p.len()).sum();
    let logical_length = 6 + 2 * stream_count + total_payload;
    if logical_length > MAX_PACKET_SIZE as usize {
        return Err(Error::Internal(format!(
            "data packet would be {} bytes, limit is {}",
            logical_length, MAX_PACKET_SIZE
        )));
    }

    let header = PacketHeader {
        kind: DATA_PACKET,
        flags: 0,
        logical_length_minus_1: (logical_length - 1) as u16,
    };

    let mut bytes = Vec::with_capacity(logical_length);
    bytes.extend_from_slice(&header.to_bytes());
    bytes.extend_from_slice(&(stream_count as u16).to_le_bytes());
    for p in payloads {
        if p.len() > u16::MAX as usize {
            return Err(Error::Internal(format!("bytestream payload of {} bytes", p.len())));
        }
        bytes.extend_from_slice(&(p.len() as u16).to_le_bytes());
    }
    for p in payloads {
        bytes.extend_from_slice(p);
    }
    Ok(bytes)
}

// ── Section header ─────────────────────────────────────────────────────────

/// Decoded representation of the 40-byte compressed-vector section header.
#[derive(Debug, Clone, Default)]
pub struct SectionHeader {
    /// Logical byte length of the whole section, this header included.
    pub section_logical_length: u64,
    /// Physical offset of the first data packet.
    pub data_physical_offset: u64,
    /// Physical offset of the optional index packet chain; 0 when absent.
    pub index_physical_offset: u64,
    /// Number of records written to the section.
    pub record_count: u64,
}

impl SectionHeader {
    pub fn to_bytes(&self) -> [u8; SECTION_HEADER_SIZE as usize] {
        let mut buf = [0u8; SECTION_HEADER_SIZE as usize];
        buf[0] = COMPRESSED_VECTOR_SECTION_ID;
        // reserved[7] stays zero
        buf[8..16].copy_from_slice(&self.section_logical_length.to_le_bytes());
        buf[16..24].copy_from_slice(&self.data_physical_offset.to_le_bytes());
        buf[24..32].copy_from_slice(&self.index_physical_offset.to_le_bytes());
        buf[32..40].copy_from_slice(&self.record_count.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; SECTION_HEADER_SIZE as usize], offset: u64) -> Result<Self> {
        if buf[0] != COMPRESSED_VECTOR_SECTION_ID {
            return Err(Error::BadCvPacket {
                offset,
                reason: format!("bad section id {}", buf[0]),
            });
        }
        Ok(Self {
            section_logical_length: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
            data_physical_offset: u64::from_le_bytes(buf[16..24].try_into().unwrap()),
            index_physical_offset: u64::from_le_bytes(buf[24..32].try_into().unwrap()),
            record_count: u64::from_le_bytes(buf[32..40].try_into().unwrap()),
        })
    }
}
