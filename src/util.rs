//! Internal utilities.

/// Lowercase hex rendering for engine IDs and opaque payloads.
pub(crate) mod hex {
    use std::fmt;

    const DIGITS: &[u8; 16] = b"0123456789abcdef";

    /// Render bytes as a lowercase hex string.
    pub fn encode(bytes: &[u8]) -> String {
        let mut out = String::with_capacity(bytes.len() * 2);
        for &b in bytes {
            out.push(DIGITS[usize::from(b >> 4)] as char);
            out.push(DIGITS[usize::from(b & 0x0F)] as char);
        }
        out
    }

    /// Hex formatter that only does work when the log line is emitted.
    pub struct Bytes<'a>(pub &'a [u8]);

    impl fmt::Display for Bytes<'_> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            self.0.iter().try_for_each(|b| write!(f, "{b:02x}"))
        }
    }

    impl fmt::Debug for Bytes<'_> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            fmt::Display::fmt(self, f)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn encode_known_bytes() {
            assert_eq!(encode(b"agent"), "6167656e74");
            assert_eq!(encode(&[0x00, 0x0f, 0xf0, 0xff]), "000ff0ff");
            assert_eq!(encode(&[]), "");
        }

        #[test]
        fn lazy_formatter_matches_encode() {
            let data = [0x80, 0x00, 0x4f, 0xb8, 0x05];
            assert_eq!(format!("{}", Bytes(&data)), encode(&data));
            assert_eq!(format!("{:?}", Bytes(&data)), "80004fb805");
            assert_eq!(format!("{}", Bytes(&[])), "");
        }
    }
}
