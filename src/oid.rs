//! Object identifiers.
//!
//! [`Oid`] keeps its arcs inline in a `SmallVec<[u32; 16]>`, which is
//! deep enough that MIB-2 and most enterprise OIDs never touch the heap.

use crate::error::{Error, Result};
use smallvec::SmallVec;
use std::fmt;

/// Arc-count ceiling from RFC 2578 Section 3.5: "there are at most 128
/// sub-identifiers in a value". [`Oid::from_ber`] enforces it.
pub const MAX_OID_LEN: usize = 128;

/// An object identifier as a sequence of numeric arcs.
///
/// `Ord` is lexicographic over the arcs, which is the ordering MIB walks
/// advance through.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Oid {
    arcs: SmallVec<[u32; 16]>,
}

impl Oid {
    /// The zero-arc OID.
    pub fn empty() -> Self {
        Self {
            arcs: SmallVec::new(),
        }
    }

    /// Collect arcs from any iterator.
    ///
    /// ```
    /// use snmp_engine::oid::Oid;
    ///
    /// let oid = Oid::new(vec![1, 3, 6, 1, 4, 1]);
    /// assert_eq!(oid.arcs(), &[1, 3, 6, 1, 4, 1]);
    /// ```
    pub fn new(arcs: impl IntoIterator<Item = u32>) -> Self {
        Self {
            arcs: arcs.into_iter().collect(),
        }
    }

    /// Copy arcs out of a slice.
    pub fn from_slice(arcs: &[u32]) -> Self {
        Self {
            arcs: SmallVec::from_slice(arcs),
        }
    }

    /// Parse dotted notation such as `"1.3.6.1.2.1.1.1.0"`.
    ///
    /// Accepts anything numeric; X.690 arc constraints are a separate
    /// concern, checked by [`validate`](Self::validate).
    pub fn parse(s: &str) -> Result<Self> {
        let mut arcs = SmallVec::new();

        for part in s.split('.') {
            // tolerate empty segments, including the fully empty string
            if part.is_empty() {
                continue;
            }
            let arc: u32 = part
                .parse()
                .map_err(|_| Error::InvalidOid(s.into()).boxed())?;
            arcs.push(arc);
        }

        Ok(Self { arcs })
    }

    pub fn arcs(&self) -> &[u32] {
        &self.arcs
    }

    pub fn len(&self) -> usize {
        self.arcs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arcs.is_empty()
    }

    /// Whether `other` is a prefix of this OID.
    ///
    /// Every OID starts with itself and with the empty OID.
    ///
    /// ```
    /// use snmp_engine::oid::Oid;
    ///
    /// let if_in_octets = Oid::parse("1.3.6.1.2.1.2.2.1.10.3").unwrap();
    /// let if_entry = Oid::parse("1.3.6.1.2.1.2.2.1").unwrap();
    /// assert!(if_in_octets.starts_with(&if_entry));
    /// assert!(!if_entry.starts_with(&if_in_octets));
    /// ```
    pub fn starts_with(&self, other: &Oid) -> bool {
        self.arcs.len() >= other.arcs.len() && self.arcs[..other.arcs.len()] == other.arcs[..]
    }

    /// A copy of this OID with `arc` appended.
    pub fn child(&self, arc: u32) -> Oid {
        let mut arcs = self.arcs.clone();
        arcs.push(arc);
        Oid { arcs }
    }

    /// Check the X.690 Section 8.19.4 arc constraints: the first arc is
    /// 0, 1, or 2, and the second stays below 40 unless the first is 2.
    pub fn validate(&self) -> Result<()> {
        match self.arcs.as_slice() {
            [first, ..] if *first > 2 => Err(Error::InvalidOid(
                format!("first arc must be 0, 1, or 2, got {first}").into(),
            )
            .boxed()),
            [first, second, ..] if *first < 2 && *second >= 40 => Err(Error::InvalidOid(
                format!("second arc {second} too large for first arc {first}").into(),
            )
            .boxed()),
            _ => Ok(()),
        }
    }

    /// BER content octets, inline up to 64 bytes.
    ///
    /// X.690 Section 8.19 folds the first two arcs into a single
    /// subidentifier, `arc1 * 40 + arc2`; everything is base-128.
    pub fn to_ber_smallvec(&self) -> SmallVec<[u8; 64]> {
        let mut bytes = SmallVec::new();

        match self.arcs.as_slice() {
            [] => {}
            [first] => push_base128(&mut bytes, first * 40),
            [first, second, rest @ ..] => {
                // base-128 even for the head: arc2 can exceed 127 under arc1 = 2
                push_base128(&mut bytes, first * 40 + second);
                for &arc in rest {
                    push_base128(&mut bytes, arc);
                }
            }
        }

        bytes
    }

    /// BER content octets as a `Vec`.
    pub fn to_ber(&self) -> Vec<u8> {
        self.to_ber_smallvec().to_vec()
    }

    /// Decode BER content octets.
    ///
    /// Enforces [`MAX_OID_LEN`]. Non-minimal subidentifier encodings
    /// (leading 0x80 continuation bytes) are accepted, matching what
    /// deployed agents emit.
    pub fn from_ber(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Ok(Self::empty());
        }

        let (head, mut pos) = read_base128(data)?;
        let (first, second) = match head {
            0..=39 => (0, head),
            40..=79 => (1, head - 40),
            _ => (2, head - 80),
        };

        let mut arcs = SmallVec::new();
        arcs.push(first);
        arcs.push(second);

        while pos < data.len() {
            let (arc, used) = read_base128(&data[pos..])?;
            arcs.push(arc);
            pos += used;

            if arcs.len() > MAX_OID_LEN {
                tracing::debug!(
                    target: "snmp_engine::ber",
                    { snmp.oid_arcs = arcs.len() },
                    "OID exceeds maximum arc count"
                );
                return Err(Error::InvalidOid("too many arcs".into()).boxed());
            }
        }

        Ok(Self { arcs })
    }
}

/// Append one subidentifier in base-128, high septet first.
#[inline]
fn push_base128(bytes: &mut SmallVec<[u8; 64]>, value: u32) {
    // `| 1` keeps the zero case at one output byte
    let mut shift = (31 - (value | 1).leading_zeros()) / 7 * 7;
    loop {
        let septet = ((value >> shift) & 0x7F) as u8;
        if shift == 0 {
            bytes.push(septet);
            return;
        }
        bytes.push(septet | 0x80);
        shift -= 7;
    }
}

/// Read one base-128 subidentifier, returning the value and the octets
/// consumed.
fn read_base128(data: &[u8]) -> Result<(u32, usize)> {
    let mut value: u32 = 0;

    for (i, &byte) in data.iter().enumerate() {
        if value > u32::MAX >> 7 {
            return Err(Error::InvalidOid("subidentifier overflow".into()).boxed());
        }
        value = value << 7 | u32::from(byte & 0x7F);

        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }

    // ran out of octets with the continuation bit still set
    Err(Error::InvalidOid("truncated subidentifier".into()).boxed())
}

impl fmt::Debug for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Oid({self})")
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut arcs = self.arcs.iter();
        if let Some(first) = arcs.next() {
            write!(f, "{first}")?;
            for arc in arcs {
                write!(f, ".{arc}")?;
            }
        }
        Ok(())
    }
}

impl std::str::FromStr for Oid {
    type Err = Box<crate::error::Error>;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl From<&[u32]> for Oid {
    fn from(arcs: &[u32]) -> Self {
        Self::from_slice(arcs)
    }
}

impl<const N: usize> From<[u32; N]> for Oid {
    fn from(arcs: [u32; N]) -> Self {
        Self::new(arcs)
    }
}

impl PartialOrd for Oid {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Oid {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.arcs.cmp(&other.arcs)
    }
}

/// Build an [`Oid`] from literal arcs.
///
/// ```
/// use snmp_engine::oid;
///
/// let if_number = oid!(1, 3, 6, 1, 2, 1, 2, 1, 0);
/// assert_eq!(if_number.to_string(), "1.3.6.1.2.1.2.1.0");
/// ```
#[macro_export]
macro_rules! oid {
    ($($arc:expr),* $(,)?) => {
        $crate::oid::Oid::from_slice(&[$($arc),*])
    };
}
