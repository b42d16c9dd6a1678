//! Bit-packed integer codec.
//!
//! A field declared over the closed interval `[min, max]` needs
//! `ceil(log2(max − min + 1))` bits per value. Values are stored as
//! `value − min`, packed LSB-first into a little-endian bit stream that
//! runs continuously across packet boundaries; only the very last byte of
//! the whole stream may carry pad bits. A field with `min == max` needs no
//! bits at all: readers reproduce the constant for every record.
//!
//! Scaled integers ride the same machinery: the raw value is bit-packed,
//! and scaling to/from the rational value happens in the buffer layer.

use crate::buffer::{SourceDestBuffer, TransferDirection};
use crate::codec::{Decoder, Encoder};
use crate::error::{Error, Result};
use crate::packet::MAX_PACKET_SIZE;
use crate::prototype::NodeKind;

/// Bits needed to represent any value of the closed interval `[min, max]`.
pub fn bits_for_range(min: i64, max: i64) -> u32 {
    debug_assert!(min <= max);
    let range = (max as i128 - min as i128) as u128;
    128 - range.leading_zeros()
}

fn interval_of(kind: &NodeKind) -> Result<(i64, i64, Option<(f64, f64)>)> {
    match *kind {
        NodeKind::Integer { min, max } => Ok((min, max, None)),
        NodeKind::ScaledInteger { min, max, scale, offset } => {
            Ok((min, max, Some((scale, offset))))
        }
        _ => Err(Error::Internal("bit-pack codec over non-integer node".into())),
    }
}

// ── Decoder ────────────────────────────────────────────────────────────────

/// The input queue holds a full packet's worth of payload, so a feed call
/// always ends with the input consumed or the output buffer full, which is
/// the invariant the reader's packet-advance logic relies on.
const INPUT_QUEUE_CAPACITY: usize = MAX_PACKET_SIZE as usize;

pub struct BitPackDecoder {
    kind: NodeKind,
    sdb: SourceDestBuffer,
    min: i64,
    width: u32,
    scaled: Option<(f64, f64)>,
    queue: Vec<u8>,
    bit_offset: usize,
    max_records: u64,
    emitted: u64,
}

impl BitPackDecoder {
    pub fn new(kind: NodeKind, sdb: SourceDestBuffer, max_records: u64) -> Result<Self> {
        let (min, max, scaled) = interval_of(&kind)?;
        Ok(Self {
            kind,
            sdb,
            min,
            width: bits_for_range(min, max),
            scaled,
            queue: Vec::new(),
            bit_offset: 0,
            max_records,
            emitted: 0,
        })
    }

    fn deliver(&mut self) -> Result<()> {
        while self.emitted < self.max_records && !self.sdb.is_full() {
            let raw = if self.width == 0 {
                0
            } else {
                let available = self.queue.len() * 8 - self.bit_offset;
                if available < self.width as usize {
                    break;
                }
                let raw = take_bits(&self.queue, self.bit_offset, self.width);
                self.bit_offset += self.width as usize;
                raw
            };

            let value = (self.min as i128 + raw as i128) as i64;
            match self.scaled {
                Some((scale, offset)) => self.sdb.put_scaled(value, scale, offset)?,
                None => self.sdb.put_integer(value)?,
            }
            self.emitted += 1;
        }

        // Drop whole consumed bytes so the queue never grows unbounded.
        let consumed_bytes = self.bit_offset / 8;
        if consumed_bytes > 0 {
            self.queue.drain(..consumed_bytes);
            self.bit_offset %= 8;
        }
        Ok(())
    }
}

impl Decoder for BitPackDecoder {
    fn validate(&self) -> Result<()> {
        self.sdb.validate_transfer(&self.kind, TransferDirection::Read)
    }

    fn input_process(&mut self, input: &[u8]) -> Result<usize> {
        let take = input.len().min(INPUT_QUEUE_CAPACITY - self.queue.len());
        self.queue.extend_from_slice(&input[..take]);
        self.deliver()?;
        Ok(take)
    }
}

/// Extract `width` bits starting at `bit_offset`, LSB-first.
fn take_bits(buf: &[u8], bit_offset: usize, width: u32) -> u64 {
    let mut value = 0u64;
    for i in 0..width as usize {
        let bit = bit_offset + i;
        if buf[bit / 8] >> (bit % 8) & 1 == 1 {
            value |= 1 << i;
        }
    }
    value
}

// ── Encoder ────────────────────────────────────────────────────────────────

pub struct BitPackEncoder {
    kind: NodeKind,
    sdb: SourceDestBuffer,
    min: i64,
    max: i64,
    width: u32,
    scaled: Option<(f64, f64)>,
    /// Bit accumulator; never holds more than 71 bits.
    acc: u128,
    acc_bits: u32,
    out: Vec<u8>,
    records: u64,
}

impl BitPackEncoder {
    pub fn new(kind: NodeKind, sdb: SourceDestBuffer) -> Result<Self> {
        let (min, max, scaled) = interval_of(&kind)?;
        Ok(Self {
            kind,
            sdb,
            min,
            max,
            width: bits_for_range(min, max),
            scaled,
            acc: 0,
            acc_bits: 0,
            out: Vec::new(),
            records: 0,
        })
    }

    fn push_bits(&mut self, packed: u64) {
        if self.width == 0 {
            return;
        }
        self.acc |= (packed as u128) << self.acc_bits;
        self.acc_bits += self.width;
        while self.acc_bits >= 8 {
            self.out.push(self.acc as u8);
            self.acc >>= 8;
            self.acc_bits -= 8;
        }
    }
}

impl Encoder for BitPackEncoder {
    fn validate(&self) -> Result<()> {
        self.sdb.validate_transfer(&self.kind, TransferDirection::Write)
    }

    fn feed(&mut self, limit: usize) -> Result<()> {
        while self.sdb.next_index() < limit {
            let raw = match self.scaled {
                Some((scale, offset)) => {
                    self.sdb.take_scaled(self.min, self.max, scale, offset)?
                }
                None => self.sdb.take_integer(self.min, self.max)?,
            };
            let packed = (raw as i128 - self.min as i128) as u64;
            self.push_bits(packed);
            self.records += 1;
        }
        Ok(())
    }

    fn queued_bytes(&self) -> usize {
        self.out.len()
    }

    fn drain(&mut self, max_bytes: usize, out: &mut Vec<u8>) -> usize {
        let n = max_bytes.min(self.out.len());
        out.extend(self.out.drain(..n));
        n
    }

    fn flush(&mut self) -> Result<()> {
        if self.acc_bits > 0 {
            self.out.push(self.acc as u8);
            self.acc = 0;
            self.acc_bits = 0;
        }
        Ok(())
    }

    fn records_consumed(&self) -> u64 {
        self.records
    }
}
