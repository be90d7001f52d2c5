//! Telnet control-sequence stripping for the raw cluster byte stream.
//!
//! DX cluster servers speak a telnet-flavored protocol and interleave
//! option negotiation with the text feed. The bridge never negotiates;
//! it discards the sequences and keeps the text.

/// Telnet "Interpret As Command" escape byte.
const IAC: u8 = 255;

/// Strip telnet control sequences from a raw chunk and decode it.
///
/// An IAC byte consumes itself plus one following byte, or plus two when
/// the following byte is a negotiation command (WILL/WONT/DO/DONT,
/// 251-254) that carries an option byte. A truncated escape at the end of
/// the chunk is dropped without error. Of the remaining bytes, only CR,
/// LF, and printable bytes (>= 32) are kept. Decoding is lossy: invalid
/// UTF-8 sequences are replaced, never fatal.
pub fn sanitize(data: &[u8]) -> String {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        let b = data[i];
        if b == IAC {
            i += 1;
            if i < data.len() && matches!(data[i], 251..=254) {
                // command byte + option byte
                i += 2;
            } else {
                i += 1;
            }
            continue;
        }
        if b == b'\r' || b == b'\n' || b >= 32 {
            out.push(b);
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_plain_text_passes_through() {
        assert_eq!(
            sanitize(b"DX de W1AW: 14074.0 JA1ABC FT8\r\n"),
            "DX de W1AW: 14074.0 JA1ABC FT8\r\n"
        );
    }

    #[test]
    fn test_negotiation_sequence_removed() {
        // IAC DO ECHO in front of the text
        assert_eq!(sanitize(&[255, 253, 1, b'h', b'i']), "hi");
        // IAC WILL SGA in the middle
        assert_eq!(sanitize(&[b'a', 255, 251, 3, b'b']), "ab");
    }

    #[test]
    fn test_two_byte_escape_removed() {
        // IAC NOP: no option byte follows
        assert_eq!(sanitize(&[b'a', 255, 241, b'b']), "ab");
    }

    #[test]
    fn test_truncated_escape_at_end() {
        // Bare IAC as the final byte
        assert_eq!(sanitize(&[b'o', b'k', 255]), "ok");
        // IAC + negotiation command with the option byte cut off
        assert_eq!(sanitize(&[b'o', b'k', 255, 253]), "ok");
    }

    #[test]
    fn test_control_bytes_dropped() {
        assert_eq!(sanitize(&[0, 7, b'a', 8, b'b', 31]), "ab");
    }

    #[test]
    fn test_invalid_utf8_replaced() {
        // 0xC3 starts a two-byte sequence; 0x28 cannot continue it
        let out = sanitize(&[0xC3, 0x28]);
        assert!(out.contains('\u{FFFD}'));
        assert!(out.contains('('));
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(sanitize(b""), "");
    }

    proptest! {
        #[test]
        fn prop_negotiation_triples_vanish(
            prefix in "[ -~]{0,32}",
            cmd in 251u8..=254,
            opt in any::<u8>(),
            suffix in "[ -~]{0,32}",
        ) {
            let mut data = prefix.clone().into_bytes();
            data.extend_from_slice(&[IAC, cmd, opt]);
            data.extend_from_slice(suffix.as_bytes());
            prop_assert_eq!(sanitize(&data), format!("{prefix}{suffix}"));
        }

        #[test]
        fn prop_never_panics_and_output_is_clean(data in proptest::collection::vec(any::<u8>(), 0..256)) {
            let out = sanitize(&data);
            for c in out.chars() {
                prop_assert!(
                    c == '\r' || c == '\n' || c as u32 >= 32,
                    "control character {:?} leaked through", c
                );
            }
        }
    }
}
