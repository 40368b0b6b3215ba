//! Deterministic, byte-stable encoding for bucket payloads.
//!
//! This module provides the [`Encode`] and [`Decode`] traits together with
//! the framing used for every bucket written to the backing store. Because
//! the format is hand-written, the persisted representation never changes
//! due to a dependency upgrade.
//!
//! # Payload layout
//!
//! ```text
//! [magic "RKB"][u8 version][u32 count][count × (u64 id, f64 score)][u32 crc32]
//! ```
//!
//! | Field      | Encoding                                        |
//! |------------|-------------------------------------------------|
//! | magic      | 3 raw bytes, `b"RKB"`                           |
//! | version    | 1 byte, currently `1`                           |
//! | count      | `u32`, little-endian                            |
//! | record     | `u64` id + `f64` score bits, little-endian      |
//! | crc32      | CRC32 over every preceding byte                 |
//!
//! A payload is accepted only if its length is exactly
//! `8 + 16 × count + 4`, its checksum matches and every score is finite.
//! Anything else is reported as a [`CodecError`], which the gateway
//! surfaces as a corrupt payload.
//!
//! # Compression
//!
//! After framing, a payload passes through a [`Compression`] stage:
//! `None` leaves it untouched, `Base91` turns it into printable ASCII
//! (see [`base91`]).

#[cfg(test)]
mod tests;

pub mod base91;

use crc32fast::Hasher as Crc32;
use thiserror::Error;

use crate::entry::Entry;

// ------------------------------------------------------------------------------------------------
// Layout constants
// ------------------------------------------------------------------------------------------------

/// Leading magic bytes of every raw payload.
pub const MAGIC: [u8; 3] = *b"RKB";

/// Current payload format version.
pub const VERSION: u8 = 1;

/// Bytes before the first record: magic, version, count.
pub const HEADER_SIZE: usize = 8;

/// Bytes per `(id, score)` record.
pub const RECORD_SIZE: usize = 16;

/// Trailing checksum width.
pub const CRC_SIZE: usize = 4;

/// Maximum record count accepted while decoding (16 M).
///
/// Rejects allocation bombs from corrupted count fields before any
/// allocation happens.
pub const MAX_ENTRIES: u32 = 16 * 1024 * 1024;

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors produced while encoding or decoding payloads.
#[derive(Debug, Error, PartialEq)]
pub enum CodecError {
    /// The buffer ran out of bytes before decoding completed.
    #[error("unexpected end of buffer (need {needed} bytes, have {available})")]
    UnexpectedEof {
        /// Bytes required to continue decoding.
        needed: usize,
        /// Bytes actually remaining.
        available: usize,
    },

    /// Payload did not start with [`MAGIC`].
    #[error("bad payload magic")]
    BadMagic,

    /// Payload was written by an unknown format version.
    #[error("unsupported payload version {0}")]
    UnsupportedVersion(u8),

    /// A length or count exceeded its safety limit.
    #[error("length overflow: {0}")]
    LengthOverflow(String),

    /// Stored checksum did not match the payload contents.
    #[error("checksum mismatch (stored {stored:08x}, computed {computed:08x})")]
    ChecksumMismatch { stored: u32, computed: u32 },

    /// Bytes remained after the declared records and checksum.
    #[error("{0} trailing bytes after payload")]
    TrailingBytes(usize),

    /// A base91 input byte outside the alphabet.
    #[error("invalid base91 symbol 0x{0:02X}")]
    InvalidSymbol(u8),

    /// A record carried a NaN or infinite score.
    #[error("non-finite score for id {0}")]
    NonFiniteScore(u64),
}

// ------------------------------------------------------------------------------------------------
// Core traits
// ------------------------------------------------------------------------------------------------

/// Serialize `self` into a byte buffer.
///
/// Implementations must be deterministic: the same logical value always
/// yields the exact same byte sequence.
pub trait Encode {
    /// Append the encoded representation of `self` to `buf`.
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), CodecError>;
}

/// Deserialize a value from a byte slice.
///
/// Returns `(value, bytes_consumed)` so callers can advance a cursor.
pub trait Decode: Sized {
    /// Decode one value starting at `buf[0]`.
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), CodecError>;
}

// ------------------------------------------------------------------------------------------------
// Internal helpers
// ------------------------------------------------------------------------------------------------

/// Verify that `buf` has at least `needed` bytes.
#[inline]
fn require(buf: &[u8], needed: usize) -> Result<(), CodecError> {
    if buf.len() < needed {
        Err(CodecError::UnexpectedEof {
            needed,
            available: buf.len(),
        })
    } else {
        Ok(())
    }
}

/// Convert a `usize` count to `u32`, rejecting anything above [`MAX_ENTRIES`].
#[inline]
fn count_to_u32(len: usize) -> Result<u32, CodecError> {
    match u32::try_from(len) {
        Ok(n) if n <= MAX_ENTRIES => Ok(n),
        _ => Err(CodecError::LengthOverflow(format!(
            "entry count {len} exceeds MAX_ENTRIES ({MAX_ENTRIES})"
        ))),
    }
}

#[inline]
fn array<const N: usize>(buf: &[u8]) -> Result<[u8; N], CodecError> {
    require(buf, N)?;
    let mut arr = [0u8; N];
    arr.copy_from_slice(&buf[..N]);
    Ok(arr)
}

fn checksum(bytes: &[u8]) -> u32 {
    let mut hasher = Crc32::new();
    hasher.update(bytes);
    hasher.finalize()
}

// ------------------------------------------------------------------------------------------------
// Primitive implementations
// ------------------------------------------------------------------------------------------------

impl Encode for u8 {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), CodecError> {
        buf.push(*self);
        Ok(())
    }
}

impl Decode for u8 {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), CodecError> {
        require(buf, 1)?;
        Ok((buf[0], 1))
    }
}

impl Encode for u32 {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), CodecError> {
        buf.extend_from_slice(&self.to_le_bytes());
        Ok(())
    }
}

impl Decode for u32 {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), CodecError> {
        Ok((u32::from_le_bytes(array::<4>(buf)?), 4))
    }
}

impl Encode for u64 {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), CodecError> {
        buf.extend_from_slice(&self.to_le_bytes());
        Ok(())
    }
}

impl Decode for u64 {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), CodecError> {
        Ok((u64::from_le_bytes(array::<8>(buf)?), 8))
    }
}

/// `f64` is stored as its IEEE-754 bit pattern, so `-0.0` and every
/// payload of a finite value round-trip exactly.
impl Encode for f64 {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), CodecError> {
        self.to_bits().encode_to(buf)
    }
}

impl Decode for f64 {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), CodecError> {
        let (bits, n) = u64::decode_from(buf)?;
        Ok((f64::from_bits(bits), n))
    }
}

// ------------------------------------------------------------------------------------------------
// Entry records: [u64 id][f64 score]
// ------------------------------------------------------------------------------------------------

impl Encode for Entry {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), CodecError> {
        self.id.encode_to(buf)?;
        self.score.encode_to(buf)
    }
}

impl Decode for Entry {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), CodecError> {
        let (id, a) = u64::decode_from(buf)?;
        let (score, b) = f64::decode_from(&buf[a..])?;
        if !score.is_finite() {
            return Err(CodecError::NonFiniteScore(id));
        }
        Ok((Entry { id, score }, a + b))
    }
}

// ------------------------------------------------------------------------------------------------
// Payload framing
// ------------------------------------------------------------------------------------------------

/// Frame an ordered entry sequence as a raw (uncompressed) payload.
pub fn encode_entries(entries: &[Entry]) -> Result<Vec<u8>, CodecError> {
    let count = count_to_u32(entries.len())?;
    let mut buf = Vec::with_capacity(HEADER_SIZE + entries.len() * RECORD_SIZE + CRC_SIZE);
    write_header(&mut buf, count)?;
    for entry in entries {
        entry.encode_to(&mut buf)?;
    }
    seal(&mut buf);
    Ok(buf)
}

/// Frame already-encoded records (a multiple of [`RECORD_SIZE`] bytes).
pub(crate) fn frame_records(records: &[u8]) -> Result<Vec<u8>, CodecError> {
    if records.len() % RECORD_SIZE != 0 {
        return Err(CodecError::TrailingBytes(records.len() % RECORD_SIZE));
    }
    let count = count_to_u32(records.len() / RECORD_SIZE)?;
    let mut buf = Vec::with_capacity(HEADER_SIZE + records.len() + CRC_SIZE);
    write_header(&mut buf, count)?;
    buf.extend_from_slice(records);
    seal(&mut buf);
    Ok(buf)
}

/// Validate a raw payload and return the slice holding its records.
///
/// Checks magic, version, count bound, exact length and checksum. The
/// records themselves are not decoded.
pub(crate) fn unframe(buf: &[u8]) -> Result<&[u8], CodecError> {
    require(buf, HEADER_SIZE)?;
    if buf[..3] != MAGIC {
        return Err(CodecError::BadMagic);
    }
    if buf[3] != VERSION {
        return Err(CodecError::UnsupportedVersion(buf[3]));
    }
    let (count, _) = u32::decode_from(&buf[4..])?;
    if count > MAX_ENTRIES {
        return Err(CodecError::LengthOverflow(format!(
            "entry count {count} exceeds MAX_ENTRIES ({MAX_ENTRIES})"
        )));
    }

    let body_end = HEADER_SIZE + count as usize * RECORD_SIZE;
    let total = body_end + CRC_SIZE;
    require(buf, total)?;
    if buf.len() > total {
        return Err(CodecError::TrailingBytes(buf.len() - total));
    }

    let (stored, _) = u32::decode_from(&buf[body_end..])?;
    let computed = checksum(&buf[..body_end]);
    if stored != computed {
        return Err(CodecError::ChecksumMismatch { stored, computed });
    }
    Ok(&buf[HEADER_SIZE..body_end])
}

/// Decode a raw payload back into its ordered entries.
pub fn decode_entries(buf: &[u8]) -> Result<Vec<Entry>, CodecError> {
    let records = unframe(buf)?;
    decode_records(records)
}

/// Decode a contiguous run of records.
pub(crate) fn decode_records(records: &[u8]) -> Result<Vec<Entry>, CodecError> {
    let mut entries = Vec::with_capacity(records.len() / RECORD_SIZE);
    let mut offset = 0;
    while offset < records.len() {
        let (entry, consumed) = Entry::decode_from(&records[offset..])?;
        offset += consumed;
        entries.push(entry);
    }
    Ok(entries)
}

fn write_header(buf: &mut Vec<u8>, count: u32) -> Result<(), CodecError> {
    buf.extend_from_slice(&MAGIC);
    VERSION.encode_to(buf)?;
    count.encode_to(buf)
}

fn seal(buf: &mut Vec<u8>) {
    let crc = checksum(buf);
    buf.extend_from_slice(&crc.to_le_bytes());
}

// ------------------------------------------------------------------------------------------------
// Compression
// ------------------------------------------------------------------------------------------------

/// Reversible transform applied to a framed payload before it leaves the
/// process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    /// Payload bytes are stored unchanged.
    None,

    /// Payload bytes are stored as printable basE91 text.
    #[default]
    Base91,
}

impl Compression {
    pub fn compress(self, raw: &[u8]) -> Vec<u8> {
        match self {
            Self::None => raw.to_vec(),
            Self::Base91 => base91::encode(raw),
        }
    }

    pub fn decompress(self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        match self {
            Self::None => Ok(data.to_vec()),
            Self::Base91 => base91::decode(data),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Base91 => "base91",
        }
    }
}

/// Frame and compress `entries` into a bucket payload.
pub fn encode_payload(entries: &[Entry], compression: Compression) -> Result<Vec<u8>, CodecError> {
    Ok(compression.compress(&encode_entries(entries)?))
}

/// Inverse of [`encode_payload`].
pub fn decode_payload(data: &[u8], compression: Compression) -> Result<Vec<Entry>, CodecError> {
    decode_entries(&compression.decompress(data)?)
}
