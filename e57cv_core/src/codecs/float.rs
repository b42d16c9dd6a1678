//! IEEE-754 float codec: little-endian passthrough, 4 or 8 bytes per value.
//!
//! An element may straddle a packet boundary, so the decoder keeps the bytes
//! of a partially received element between calls.

use crate::buffer::{SourceDestBuffer, TransferDirection};
use crate::codec::{Decoder, Encoder};
use crate::error::Result;
use crate::prototype::{FloatPrecision, NodeKind};

fn element_size(precision: FloatPrecision) -> usize {
    match precision {
        FloatPrecision::Single => 4,
        FloatPrecision::Double => 8,
    }
}

pub struct FloatDecoder {
    precision: FloatPrecision,
    sdb: SourceDestBuffer,
    partial: Vec<u8>,
}

impl FloatDecoder {
    pub fn new(precision: FloatPrecision, sdb: SourceDestBuffer) -> Self {
        Self {
            precision,
            sdb,
            partial: Vec::new(),
        }
    }
}

impl Decoder for FloatDecoder {
    fn validate(&self) -> Result<()> {
        self.sdb.validate_transfer(
            &NodeKind::Float { precision: self.precision },
            TransferDirection::Read,
        )
    }

    fn input_process(&mut self, input: &[u8]) -> Result<usize> {
        let elem = element_size(self.precision);
        let mut consumed = 0;
        while !self.sdb.is_full() {
            let need = elem - self.partial.len();
            let take = need.min(input.len() - consumed);
            self.partial.extend_from_slice(&input[consumed..consumed + take]);
            consumed += take;
            if self.partial.len() < elem {
                break;
            }
            let value = match self.precision {
                FloatPrecision::Single => {
                    f32::from_le_bytes(self.partial[..4].try_into().unwrap()) as f64
                }
                FloatPrecision::Double => {
                    f64::from_le_bytes(self.partial[..8].try_into().unwrap())
                }
            };
            self.sdb.put_float(value)?;
            self.partial.clear();
        }
        Ok(consumed)
    }
}

pub struct FloatEncoder {
    precision: FloatPrecision,
    sdb: SourceDestBuffer,
    out: Vec<u8>,
    records: u64,
}

impl FloatEncoder {
    pub fn new(precision: FloatPrecision, sdb: SourceDestBuffer) -> Self {
        Self {
            precision,
            sdb,
            out: Vec::new(),
            records: 0,
        }
    }
}

impl Encoder for FloatEncoder {
    fn validate(&self) -> Result<()> {
        self.sdb.validate_transfer(
            &NodeKind::Float { precision: self.precision },
            TransferDirection::Write,
        )
    }

    fn feed(&mut self, limit: usize) -> Result<()> {
        let single = matches!(self.precision, FloatPrecision::Single);
        while self.sdb.next_index() < limit {
            let value = self.sdb.take_float(single)?;
            match self.precision {
                FloatPrecision::Single => self.out.extend_from_slice(&(value as f32).to_le_bytes()),
                FloatPrecision::Double => self.out.extend_from_slice(&value.to_le_bytes()),
            }
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
        Ok(())
    }

    fn records_consumed(&self) -> u64 {
        self.records
    }
}
