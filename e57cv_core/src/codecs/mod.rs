//! Concrete per-bytestream codecs and their factory.

mod bitpack;
mod float;
mod string;

pub use bitpack::{bits_for_range, BitPackDecoder, BitPackEncoder};
pub use float::{FloatDecoder, FloatEncoder};
pub use string::{StringDecoder, StringEncoder};

use crate::buffer::SourceDestBuffer;
use crate::codec::{Decoder, Encoder};
use crate::error::{Error, Result};
use crate::prototype::NodeKind;

/// Build the decoder for a terminal node, bound to `sdb`.
///
/// `max_records` bounds the total values the decoder may ever emit; it is
/// what keeps zero-width (constant) streams and the pad bits of the final
/// packed byte from fabricating records.
pub fn decoder_for(
    kind: &NodeKind,
    sdb: &SourceDestBuffer,
    max_records: u64,
) -> Result<Box<dyn Decoder>> {
    match kind {
        NodeKind::Integer { .. } | NodeKind::ScaledInteger { .. } => {
            Ok(Box::new(BitPackDecoder::new(kind.clone(), sdb.clone(), max_records)?))
        }
        NodeKind::Float { precision } => {
            Ok(Box::new(FloatDecoder::new(*precision, sdb.clone())))
        }
        NodeKind::String => Ok(Box::new(StringDecoder::new(sdb.clone()))),
        NodeKind::Structure | NodeKind::Vector { .. } => Err(Error::Internal(
            "no decoder for interior node".into(),
        )),
    }
}

/// Build the encoder for a terminal node, bound to `sdb`.
pub fn encoder_for(kind: &NodeKind, sdb: &SourceDestBuffer) -> Result<Box<dyn Encoder>> {
    match kind {
        NodeKind::Integer { .. } | NodeKind::ScaledInteger { .. } => {
            Ok(Box::new(BitPackEncoder::new(kind.clone(), sdb.clone())?))
        }
        NodeKind::Float { precision } => {
            Ok(Box::new(FloatEncoder::new(*precision, sdb.clone())))
        }
        NodeKind::String => Ok(Box::new(StringEncoder::new(sdb.clone()))),
        NodeKind::Structure | NodeKind::Vector { .. } => Err(Error::Internal(
            "no encoder for interior node".into(),
        )),
    }
}
