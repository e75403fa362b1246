//! BER encoding.
//!
//! Uses a reverse buffer: content is written back to front, so every
//! length is known by the time it is emitted and nothing needs a
//! pre-computed size.

use bytes::Bytes;

use super::length::encode_length;
use super::tag;
use crate::oid::Oid;

/// Buffer for BER encoding that writes backwards.
///
/// Because the buffer grows toward the start of the message, fields must
/// be pushed in reverse order: the last field of a SEQUENCE first.
/// [`finish`](Self::finish) reverses the buffer into wire order.
pub struct EncodeBuf {
    buf: Vec<u8>,
}

impl EncodeBuf {
    /// Create an encode buffer with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(512)
    }

    /// Create an encode buffer with the given capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Prepend a single byte.
    pub fn push_byte(&mut self, byte: u8) {
        self.buf.push(byte);
    }

    /// Prepend a run of bytes, preserving their order in the output.
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend(bytes.iter().rev());
    }

    /// Prepend a BER definite length.
    pub fn push_length(&mut self, len: usize) {
        let (bytes, count) = encode_length(len);
        // encode_length already returns octets in reverse order
        self.buf.extend_from_slice(&bytes[..count]);
    }

    /// Prepend a tag byte.
    pub fn push_tag(&mut self, tag: u8) {
        self.buf.push(tag);
    }

    /// Number of bytes encoded so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True if nothing has been encoded yet.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Encode a constructed type with the given tag.
    ///
    /// The closure encodes the contents (in reverse field order); the
    /// length and tag are prepended once the content size is known.
    pub fn push_constructed<F>(&mut self, tag: u8, f: F)
    where
        F: FnOnce(&mut Self),
    {
        let start_len = self.len();
        f(self);
        let content_len = self.len() - start_len;
        self.push_length(content_len);
        self.push_tag(tag);
    }

    /// Encode a SEQUENCE.
    pub fn push_sequence<F>(&mut self, f: F)
    where
        F: FnOnce(&mut Self),
    {
        self.push_constructed(tag::universal::SEQUENCE, f);
    }

    /// Encode a signed INTEGER in minimal form.
    pub fn push_integer(&mut self, value: i32) {
        let (arr, len) = integer_bytes(value);
        self.push_bytes(&arr[4 - len..]);
        self.push_length(len);
        self.push_tag(tag::universal::INTEGER);
    }

    /// Encode an unsigned 32-bit value under an application tag
    /// (Counter32, Gauge32, TimeTicks).
    pub fn push_unsigned32(&mut self, tag: u8, value: u32) {
        let (arr, len) = unsigned32_bytes(value);
        self.push_bytes(&arr[5 - len..]);
        self.push_length(len);
        self.push_tag(tag);
    }

    /// Encode an unsigned 64-bit value under an application tag (Counter64).
    pub fn push_unsigned64(&mut self, tag: u8, value: u64) {
        let (arr, len) = unsigned64_bytes(value);
        self.push_bytes(&arr[9 - len..]);
        self.push_length(len);
        self.push_tag(tag);
    }

    /// Encode an OCTET STRING.
    pub fn push_octet_string(&mut self, data: &[u8]) {
        self.push_bytes(data);
        self.push_length(data.len());
        self.push_tag(tag::universal::OCTET_STRING);
    }

    /// Encode a NULL.
    pub fn push_null(&mut self) {
        self.push_length(0);
        self.push_tag(tag::universal::NULL);
    }

    /// Encode an OBJECT IDENTIFIER.
    pub fn push_oid(&mut self, oid: &Oid) {
        let ber = oid.to_ber_smallvec();
        self.push_bytes(&ber);
        self.push_length(ber.len());
        self.push_tag(tag::universal::OBJECT_IDENTIFIER);
    }

    /// Encode an IpAddress.
    pub fn push_ip_address(&mut self, addr: [u8; 4]) {
        self.push_bytes(&addr);
        self.push_length(4);
        self.push_tag(tag::application::IP_ADDRESS);
    }

    /// Finalize into wire order.
    pub fn finish(mut self) -> Bytes {
        self.buf.reverse();
        Bytes::from(self.buf)
    }

    /// Finalize into an owned `Vec<u8>`.
    pub fn finish_vec(mut self) -> Vec<u8> {
        self.buf.reverse();
        self.buf
    }
}

impl Default for EncodeBuf {
    fn default() -> Self {
        Self::new()
    }
}

/// Minimal two's-complement content octets for a signed 32-bit value.
/// Valid bytes sit at the end of the array so they can be pushed onto
/// the reverse buffer directly.
#[inline]
fn integer_bytes(value: i32) -> ([u8; 4], usize) {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    if value >= 0 {
        while start < 3 && bytes[start] == 0 && bytes[start + 1] & 0x80 == 0 {
            start += 1;
        }
    } else {
        while start < 3 && bytes[start] == 0xFF && bytes[start + 1] & 0x80 != 0 {
            start += 1;
        }
    }
    (bytes, 4 - start)
}

/// Minimal content octets for an unsigned 32-bit value, with a leading
/// zero when the top bit would otherwise read as a sign.
#[inline]
fn unsigned32_bytes(value: u32) -> ([u8; 5], usize) {
    if value == 0 {
        return ([0; 5], 1);
    }

    let bytes = value.to_be_bytes();
    let mut start = 0;
    while start < 3 && bytes[start] == 0 {
        start += 1;
    }

    let mut result = [0u8; 5];
    result[1..].copy_from_slice(&bytes);
    if bytes[start] & 0x80 != 0 {
        (result, 5 - start)
    } else {
        (result, 4 - start)
    }
}

/// Minimal content octets for an unsigned 64-bit value.
#[inline]
fn unsigned64_bytes(value: u64) -> ([u8; 9], usize) {
    if value == 0 {
        return ([0; 9], 1);
    }

    let bytes = value.to_be_bytes();
    let mut start = 0;
    while start < 7 && bytes[start] == 0 {
        start += 1;
    }

    let mut result = [0u8; 9];
    result[1..].copy_from_slice(&bytes);
    if bytes[start] & 0x80 != 0 {
        (result, 9 - start)
    } else {
        (result, 8 - start)
    }
}
