//! basE91 binary-to-text transform.
//!
//! Packs 13 or 14 input bits into each pair of output symbols drawn from a
//! 91-character printable alphabet, for roughly 23% overhead over the raw
//! bytes. Output never contains bytes outside `0x21..=0x7E`, which keeps
//! payloads safe for backends that only accept printable text.

use super::CodecError;

const ALPHABET: &[u8; 91] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789!#$%&()*+,./:;<=>?@[]^_`{|}~\"";

const INVALID: u8 = 0xFF;

const DECODE_TABLE: [u8; 256] = {
    let mut table = [INVALID; 256];
    let mut i = 0;
    while i < ALPHABET.len() {
        table[ALPHABET[i] as usize] = i as u8;
        i += 1;
    }
    table
};

/// Encode `input` as basE91 text.
pub fn encode(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len() * 123 / 100 + 2);
    let mut bits: u32 = 0;
    let mut width: u32 = 0;

    for &byte in input {
        bits |= u32::from(byte) << width;
        width += 8;
        if width > 13 {
            let mut value = bits & 8191;
            if value > 88 {
                bits >>= 13;
                width -= 13;
            } else {
                value = bits & 16383;
                bits >>= 14;
                width -= 14;
            }
            out.push(ALPHABET[(value % 91) as usize]);
            out.push(ALPHABET[(value / 91) as usize]);
        }
    }

    if width > 0 {
        out.push(ALPHABET[(bits % 91) as usize]);
        if width > 7 || bits > 90 {
            out.push(ALPHABET[(bits / 91) as usize]);
        }
    }
    out
}

/// Decode basE91 text produced by [`encode`].
///
/// Any byte outside the alphabet fails with [`CodecError::InvalidSymbol`].
pub fn decode(input: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(input.len() * 100 / 123 + 1);
    let mut bits: u32 = 0;
    let mut width: u32 = 0;
    let mut pending: Option<u32> = None;

    for &symbol in input {
        let digit = DECODE_TABLE[symbol as usize];
        if digit == INVALID {
            return Err(CodecError::InvalidSymbol(symbol));
        }
        let digit = u32::from(digit);

        match pending.take() {
            None => pending = Some(digit),
            Some(low) => {
                let value = low + digit * 91;
                bits |= value << width;
                width += if value & 8191 > 88 { 13 } else { 14 };
                loop {
                    out.push((bits & 0xFF) as u8);
                    bits >>= 8;
                    width -= 8;
                    if width <= 7 {
                        break;
                    }
                }
            }
        }
    }

    if let Some(low) = pending {
        out.push(((bits | low << width) & 0xFF) as u8);
    }
    Ok(out)
}
