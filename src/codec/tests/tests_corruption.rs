//! Corruption detection: every malformed payload must be rejected.

#[cfg(test)]
mod tests {
    use crate::codec::*;
    use crate::entry::Entry;

    fn payload() -> Vec<u8> {
        encode_entries(&[Entry::new(1, 10.0), Entry::new(2, 5.0)]).unwrap()
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let bytes = payload();
        for cut in 0..bytes.len() {
            assert!(decode_entries(&bytes[..cut]).is_err(), "cut at {cut} accepted");
        }
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut bytes = payload();
        bytes.push(0);
        assert_eq!(decode_entries(&bytes), Err(CodecError::TrailingBytes(1)));
    }

    #[test]
    fn flipped_bit_fails_checksum() {
        let mut bytes = payload();
        bytes[HEADER_SIZE + 3] ^= 0x10;
        assert!(matches!(
            decode_entries(&bytes),
            Err(CodecError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut bytes = payload();
        bytes[0] = b'X';
        assert_eq!(decode_entries(&bytes), Err(CodecError::BadMagic));
    }

    #[test]
    fn unknown_version_is_rejected() {
        let mut bytes = payload();
        bytes[3] = 9;
        assert_eq!(decode_entries(&bytes), Err(CodecError::UnsupportedVersion(9)));
    }

    #[test]
    fn oversized_count_is_rejected_before_allocation() {
        let mut bytes = payload();
        bytes[4..8].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            decode_entries(&bytes),
            Err(CodecError::LengthOverflow(_))
        ));
    }

    #[test]
    fn non_finite_score_is_rejected() {
        let mut records = Vec::new();
        7u64.encode_to(&mut records).unwrap();
        f64::NAN.encode_to(&mut records).unwrap();
        let bytes = frame_records(&records).unwrap();
        assert_eq!(decode_entries(&bytes), Err(CodecError::NonFiniteScore(7)));
    }

    #[test]
    fn misaligned_records_cannot_be_framed() {
        assert_eq!(frame_records(&[0u8; 17]), Err(CodecError::TrailingBytes(1)));
    }

    #[test]
    fn garbage_text_fails_base91_payload_decode() {
        assert!(decode_payload(b"not a payload", Compression::Base91).is_err());
        assert_eq!(
            decode_payload(b"abc def", Compression::Base91),
            Err(CodecError::InvalidSymbol(b' '))
        );
    }
}
