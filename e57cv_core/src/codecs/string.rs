//! Length-prefixed string codec.
//!
//! Each record is `{ length: u32 LE, utf8 bytes }`. Strings are not
//! bit-packed; the framing is self-terminating, so no record bound is
//! needed. Both the length prefix and the character bytes may straddle
//! packet boundaries, so the decoder is a small state machine: collect four
//! length bytes, then collect the announced number of character bytes, then
//! deliver.

use crate::buffer::{SourceDestBuffer, TransferDirection};
use crate::codec::{Decoder, Encoder};
use crate::error::{Error, Result};
use crate::prototype::NodeKind;

pub struct StringDecoder {
    sdb: SourceDestBuffer,
    len_buf: Vec<u8>,
    /// Byte length of the string being collected, once the prefix is whole.
    pending: Option<usize>,
    str_buf: Vec<u8>,
}

impl StringDecoder {
    pub fn new(sdb: SourceDestBuffer) -> Self {
        Self {
            sdb,
            len_buf: Vec::with_capacity(4),
            pending: None,
            str_buf: Vec::new(),
        }
    }
}

impl Decoder for StringDecoder {
    fn validate(&self) -> Result<()> {
        self.sdb.validate_transfer(&NodeKind::String, TransferDirection::Read)
    }

    fn input_process(&mut self, input: &[u8]) -> Result<usize> {
        let mut consumed = 0;
        while !self.sdb.is_full() {
            match self.pending {
                None => {
                    let need = 4 - self.len_buf.len();
                    let take = need.min(input.len() - consumed);
                    self.len_buf.extend_from_slice(&input[consumed..consumed + take]);
                    consumed += take;
                    if self.len_buf.len() < 4 {
                        break;
                    }
                    let length = u32::from_le_bytes(self.len_buf[..4].try_into().unwrap());
                    self.len_buf.clear();
                    self.pending = Some(length as usize);
                }
                Some(length) => {
                    let need = length - self.str_buf.len();
                    let take = need.min(input.len() - consumed);
                    self.str_buf.extend_from_slice(&input[consumed..consumed + take]);
                    consumed += take;
                    if self.str_buf.len() < length {
                        break;
                    }
                    let value = String::from_utf8(std::mem::take(&mut self.str_buf))
                        .map_err(|e| Error::Internal(format!("string bytestream is not valid UTF-8: {}", e)))?;
                    self.sdb.put_string(value)?;
                    self.pending = None;
                }
            }
        }
        Ok(consumed)
    }
}

pub struct StringEncoder {
    sdb: SourceDestBuffer,
    out: Vec<u8>,
    records: u64,
}

impl StringEncoder {
    pub fn new(sdb: SourceDestBuffer) -> Self {
        Self {
            sdb,
            out: Vec::new(),
            records: 0,
        }
    }
}

impl Encoder for StringEncoder {
    fn validate(&self) -> Result<()> {
        self.sdb.validate_transfer(&NodeKind::String, TransferDirection::Write)
    }

    fn feed(&mut self, limit: usize) -> Result<()> {
        while self.sdb.next_index() < limit {
            let value = self.sdb.take_string()?;
            if value.len() > u32::MAX as usize {
                return Err(Error::ValueOutOfRange {
                    record: self.records,
                    reason: format!("string of {} bytes exceeds the u32 length prefix", value.len()),
                });
            }
            self.out.extend_from_slice(&(value.len() as u32).to_le_bytes());
            self.out.extend_from_slice(value.as_bytes());
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
