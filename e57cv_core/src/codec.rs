//! Per-bytestream codec abstraction.
//!
//! Each terminal leaf of the prototype gets one decoder (read side) or one
//! encoder (write side), bound to the source/dest buffer for that leaf.
//! Codecs are pure in-memory transducers: they never touch the file, and
//! they never block. Concrete implementations live in [`crate::codecs`].

use crate::error::Result;

/// Read-side codec: consumes raw bytestream payload bytes, produces decoded
/// values into its bound buffer.
pub trait Decoder {
    /// Run the policy check of the conversion matrix for this binding.
    /// Called once, before the first value moves.
    fn validate(&self) -> Result<()>;

    /// Feed payload bytes and decode as much as the output buffer allows.
    ///
    /// Returns how many input bytes were actually consumed; the caller
    /// re-offers the unconsumed tail on the next call. An empty slice is a
    /// drain request: "emit what you can from what you already hold".
    ///
    /// Invariant relied on by the reader's packet-advance logic: after this
    /// call, either the whole input was consumed or the output buffer is
    /// full. Implementations size their internal queues to a full packet to
    /// guarantee it.
    fn input_process(&mut self, input: &[u8]) -> Result<usize>;
}

/// Write-side codec: consumes values from its bound buffer, queues
/// compressed bytes for packet emission.
pub trait Encoder {
    /// Run the policy check of the conversion matrix for this binding.
    /// Called once, before the first value moves.
    fn validate(&self) -> Result<()>;

    /// Consume buffer elements up to (not including) index `limit`.
    fn feed(&mut self, limit: usize) -> Result<()>;

    /// Whole bytes ready for packet emission. Bits still sitting in a
    /// partial byte do not count until [`flush`](Encoder::flush).
    fn queued_bytes(&self) -> usize;

    /// Move up to `max_bytes` queued bytes into `out`; returns how many.
    fn drain(&mut self, max_bytes: usize, out: &mut Vec<u8>) -> usize;

    /// End of stream: pad and queue any partial byte.
    fn flush(&mut self) -> Result<()>;

    /// Total records consumed over the encoder's lifetime.
    fn records_consumed(&self) -> u64;
}
